//! Auth routes
//!
//! Only OTP dispatch lives here. Verification and token issuance belong to
//! the identity service; this service just verifies the tokens it issues.

use serde::Deserialize;

use crate::audit::{AuditAction, AuditLogEntry, AuditUserType, ResourceType};
use crate::notify::Notification;
use crate::ratelimit::RouteClass;
use crate::routes::Attempt;
use crate::server::{ApiRequest, AppState, Handled, Reply};
use crate::types::GrievanceError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOtpRequest {
    #[serde(alias = "phone", alias = "phone_number")]
    pub phone_number: String,
}

/// Digits with an optional leading `+`; separators are dropped
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    if (7..=15).contains(&digits.len()) {
        Some(format!("{}{}", plus, digits))
    } else {
        None
    }
}

/// POST /auth/send-otp
///
/// Limited per phone number, not per client, so one attacker cannot exhaust
/// another number's quota by rotating addresses.
pub async fn send_otp(state: &AppState, req: &ApiRequest) -> Handled {
    let attempt = Attempt::new(state, req, AuditAction::OtpRequest, None);
    let body: SendOtpRequest = attempt.body(None)?;
    let phone = normalize_phone(&body.phone_number).ok_or_else(|| {
        attempt.refuse(
            None,
            GrievanceError::Validation("A valid phone number is required".into()),
        )
    })?;

    let admission = attempt.admit(None, RouteClass::AuthSendOtp, &phone).await?;

    state.notifier.dispatch(Notification::OtpRequested {
        phone: phone.clone(),
    });
    state.audit().log(
        AuditLogEntry::new(AuditAction::OtpRequest, phone.as_str(), AuditUserType::Guest)
            .with_resource(ResourceType::User, phone.as_str())
            .with_request(&req.context()),
    );

    Ok(Reply::ok(&serde_json::json!({
        "success": true,
        "message": "OTP sent successfully",
    }))
    .with_admission(admission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+91 98450-12345").as_deref(), Some("+919845012345"));
        assert_eq!(normalize_phone("(555) 010-0100").as_deref(), Some("5550100100"));
        assert!(normalize_phone("12345").is_none());
        assert!(normalize_phone("+1555abc0100").is_none());
        assert!(normalize_phone("").is_none());
    }

    #[test]
    fn test_request_aliases() {
        let a: SendOtpRequest = serde_json::from_str(r#"{"phoneNumber":"+15550100"}"#).unwrap();
        let b: SendOtpRequest = serde_json::from_str(r#"{"phone":"+15550100"}"#).unwrap();
        assert_eq!(a.phone_number, b.phone_number);
    }
}
