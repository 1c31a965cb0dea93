//! Bearer JWT authentication
//!
//! Tokens are issued elsewhere; this module only verifies them and maps the
//! claims onto a [`Caller`]. `generate_token` exists for dev mode and tests.
//!
//! Security notes:
//! - Tokens are signed with HS256 (HMAC-SHA256)
//! - In production, JWT_SECRET should be a strong random value from environment

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audit::{AuditUserType, RequestContext};
use crate::complaint::ActorType;
use crate::types::{GrievanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Citizen,
    Staff,
    Supervisor,
}

impl Role {
    pub fn actor_type(&self) -> ActorType {
        match self {
            Self::Citizen => ActorType::Citizen,
            Self::Staff => ActorType::Staff,
            Self::Supervisor => ActorType::Supervisor,
        }
    }
}

/// Payload stored in JWT token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Issued at (Unix timestamp)
    pub iat: u64,
}

/// Authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub role: Role,
    pub department_id: Option<String>,
}

impl Caller {
    pub fn actor_type(&self) -> ActorType {
        self.role.actor_type()
    }

    pub fn user_type(&self) -> AuditUserType {
        self.actor_type().into()
    }

    pub fn is_staff(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Supervisor)
    }

    pub fn require_citizen(&self) -> Result<()> {
        if self.role == Role::Citizen {
            Ok(())
        } else {
            Err(GrievanceError::Forbidden("Citizen access required".into()))
        }
    }

    pub fn require_staff(&self) -> Result<()> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(GrievanceError::Forbidden("Staff access required".into()))
        }
    }

    pub fn require_supervisor(&self) -> Result<()> {
        if self.role == Role::Supervisor {
            Ok(())
        } else {
            Err(GrievanceError::Forbidden("Supervisor access required".into()))
        }
    }

    /// Request context with the caller's department filled in
    pub fn context(&self, mut ctx: RequestContext) -> RequestContext {
        if ctx.department_id.is_none() {
            ctx.department_id = self.department_id.clone();
        }
        ctx
    }
}

impl From<Claims> for Caller {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            department_id: claims.department_id,
        }
    }
}

/// JWT validator and generator
#[derive(Clone)]
pub struct JwtValidator {
    secret: String,
    expiry_seconds: u64,
}

impl JwtValidator {
    /// Create a new JWT validator
    ///
    /// Returns an error if the secret is empty or too short
    pub fn new(secret: String, expiry_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            return Err(GrievanceError::Config(
                "JWT_SECRET is required outside dev mode".into(),
            ));
        }

        if secret.len() < 32 {
            return Err(GrievanceError::Config(
                "JWT_SECRET must be at least 32 characters".into(),
            ));
        }

        Ok(Self {
            secret,
            expiry_seconds,
        })
    }

    /// Create a validator for dev mode (allows empty secret)
    pub fn new_dev() -> Self {
        Self {
            secret: "dev-mode-secret-not-for-production-use-123456".into(),
            expiry_seconds: 3600,
        }
    }

    /// Sign a token for `sub`; for dev mode and tests
    pub fn generate_token(
        &self,
        sub: &str,
        role: Role,
        department_id: Option<&str>,
    ) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| GrievanceError::Internal(format!("System time error: {}", e)))?
            .as_secs();

        let claims = Claims {
            sub: sub.to_string(),
            role,
            department_id: department_id.map(str::to_string),
            iat: now,
            exp: now + self.expiry_seconds,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GrievanceError::Internal(format!("Failed to generate token: {}", e)))
    }

    /// Verify and decode a JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let validation = Validation::default();

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|err| {
            use jsonwebtoken::errors::ErrorKind;
            let msg = match err.kind() {
                ErrorKind::ExpiredSignature => "Token expired",
                ErrorKind::InvalidToken => "Invalid token",
                ErrorKind::InvalidSignature => "Invalid signature",
                _ => "Token validation failed",
            };
            GrievanceError::Unauthorized(msg.into())
        })
    }

    /// Resolve the caller from an Authorization header value
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<Caller> {
        let token = extract_token_from_header(auth_header)
            .ok_or_else(|| GrievanceError::Unauthorized("Missing bearer token".into()))?;
        Ok(self.verify_token(token)?.into())
    }
}

/// Extract token from Authorization header.
/// Supports "Bearer <token>" format and raw tokens.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Option<&str> {
    let header = auth_header?;

    if let Some(token) = header.strip_prefix("Bearer ") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    // Also support raw token (for flexibility)
    if !header.contains(' ') {
        let token = header.trim();
        if !token.is_empty() {
            return Some(token);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_validator() -> JwtValidator {
        JwtValidator::new(
            "test-secret-that-is-at-least-32-characters-long".into(),
            3600,
        )
        .unwrap()
    }

    #[test]
    fn test_generate_and_authenticate() {
        let validator = test_validator();
        let token = validator
            .generate_token("staff-7", Role::Staff, Some("roads"))
            .unwrap();

        let caller = validator
            .authenticate(Some(&format!("Bearer {}", token)))
            .unwrap();
        assert_eq!(caller.id, "staff-7");
        assert_eq!(caller.actor_type(), ActorType::Staff);
        assert!(caller.require_staff().is_ok());
        assert!(caller.require_supervisor().is_err());
        assert_eq!(
            caller.context(RequestContext::default()).department_id.as_deref(),
            Some("roads")
        );
    }

    #[test]
    fn test_rejections() {
        let validator = test_validator();
        assert!(matches!(
            validator.authenticate(None),
            Err(GrievanceError::Unauthorized(_))
        ));
        assert!(matches!(
            validator.verify_token("invalid-token"),
            Err(GrievanceError::Unauthorized(_))
        ));

        let other = JwtValidator::new(
            "different-secret-that-is-at-least-32-characters".into(),
            3600,
        )
        .unwrap();
        let token = other.generate_token("c1", Role::Citizen, None).unwrap();
        assert!(validator.verify_token(&token).is_err());
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(
            extract_token_from_header(Some("Bearer abc123")),
            Some("abc123")
        );
        assert_eq!(extract_token_from_header(Some("abc123")), Some("abc123"));
        assert_eq!(extract_token_from_header(None), None);
        assert_eq!(extract_token_from_header(Some("Bearer ")), None);
        assert_eq!(extract_token_from_header(Some("Basic abc123")), None);
    }

    #[test]
    fn test_secret_validation() {
        assert!(JwtValidator::new("short".into(), 3600).is_err());
        assert!(JwtValidator::new("".into(), 3600).is_err());
        assert!(JwtValidator::new("this-secret-is-at-least-32-chars-long".into(), 3600).is_ok());
    }

    #[test]
    fn test_citizen_role() {
        let validator = JwtValidator::new_dev();
        let token = validator.generate_token("user-123", Role::Citizen, None).unwrap();
        let caller = validator.authenticate(Some(&token)).unwrap();
        assert!(caller.require_citizen().is_ok());
        assert!(matches!(
            caller.require_staff(),
            Err(GrievanceError::Forbidden(_))
        ));
    }
}
