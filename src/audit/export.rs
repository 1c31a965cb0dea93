//! Audit log export formats

use std::str::FromStr;

use super::entry::AuditLogEntry;
use crate::types::{GrievanceError, Result};

/// Fixed CSV column set
pub const CSV_HEADER: &str =
    "timestamp,user_id,user_type,action,resource_type,resource_id,ip_address,success";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = GrievanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(GrievanceError::Validation(format!(
                "Unsupported export format '{}'",
                other
            ))),
        }
    }
}

/// Rendered export
#[derive(Debug, Clone)]
pub struct Export {
    pub format: ExportFormat,
    pub count: usize,
    pub body: Vec<u8>,
}

pub fn render(entries: &[AuditLogEntry], format: ExportFormat) -> Result<Export> {
    let body = match format {
        ExportFormat::Json => serde_json::to_vec_pretty(entries)?,
        ExportFormat::Csv => to_csv(entries).into_bytes(),
    };
    Ok(Export {
        format,
        count: entries.len(),
        body,
    })
}

pub fn to_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::with_capacity(64 * (entries.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");

    for e in entries {
        let row = [
            e.timestamp.to_rfc3339(),
            e.user_id.clone(),
            e.user_type.as_str().to_string(),
            e.action.clone(),
            e.resource_type.as_str().to_string(),
            e.resource_id.clone().unwrap_or_default(),
            e.ip_address.clone().unwrap_or_default(),
            e.success.to_string(),
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Quote a field when it holds a separator, quote or line break (RFC 4180)
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditUserType, RequestContext, ResourceType};

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_csv_rows() {
        let ctx = RequestContext::default().with_ip("10.0.0.1");
        let entry = AuditLogEntry::new(AuditAction::ComplaintCreate, "user,123", AuditUserType::Citizen)
            .with_resource(ResourceType::Complaint, "COMP-1")
            .with_request(&ctx);

        let csv = to_csv(&[entry]);
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("\"user,123\",citizen,COMPLAINT_CREATE,complaint,COMP-1,10.0.0.1,true"));
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_render_json() {
        let entry = AuditLogEntry::system(AuditAction::AutoResolutionRun);
        let export = render(&[entry], ExportFormat::Json).unwrap();
        let parsed: Vec<AuditLogEntry> = serde_json::from_slice(&export.body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(export.count, 1);
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
