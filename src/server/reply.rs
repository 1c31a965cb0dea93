//! Handler responses
//!
//! Handlers return [`Handled`]; both arms carry a finished [`Reply`] so
//! early exits (auth, rate limit, bad input) use `?` like any other error.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::{error, warn};

use crate::cache::CacheStatus;
use crate::ratelimit::{Admission, RouteClass};
use crate::types::GrievanceError;

pub type Handled = std::result::Result<Reply, Reply>;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: &'static str,
    pub cache: Option<CacheStatus>,
    pub admission: Option<Admission>,
    /// Download filename for exports
    pub attachment: Option<String>,
}

impl Reply {
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        let body = match serde_json::to_vec(body) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(error = %e, "Failed to serialize response");
                return Self::from(GrievanceError::Internal(e.to_string()));
            }
        };
        Self::raw(status, "application/json", body)
    }

    pub fn ok<T: Serialize>(body: &T) -> Self {
        Self::json(StatusCode::OK, body)
    }

    pub fn raw(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            content_type,
            cache: None,
            admission: None,
            attachment: None,
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::json(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "success": false,
                "error": "Not Found",
                "reason": "not_found",
                "path": path,
            }),
        )
    }

    pub fn no_content() -> Self {
        Self::raw(StatusCode::NO_CONTENT, "application/json", Bytes::new())
    }

    /// 429 body for a rejected admission
    pub fn rate_limited(class: RouteClass, admission: Admission) -> Self {
        let retry_after = admission.retry_after_secs();
        Self::json(
            StatusCode::TOO_MANY_REQUESTS,
            &serde_json::json!({
                "success": false,
                "error": "Rate limit exceeded. Please try again later.",
                "reason": "rate_limited",
                "routeClass": class,
                "retryAfter": retry_after,
            }),
        )
        .with_admission(admission)
    }

    pub fn with_cache(mut self, status: CacheStatus) -> Self {
        self.cache = Some(status);
        self
    }

    pub fn with_admission(mut self, admission: Admission) -> Self {
        self.admission = Some(admission);
        self
    }

    pub fn with_attachment(mut self, filename: impl Into<String>) -> Self {
        self.attachment = Some(filename.into());
        self
    }

    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(
            HeaderName::from_static("access-control-allow-origin"),
            HeaderValue::from_static("*"),
        );

        if let Some(cache) = self.cache {
            headers.insert(
                HeaderName::from_static("x-cache"),
                HeaderValue::from_static(cache.as_header()),
            );
        }

        if let Some(admission) = &self.admission {
            let reset = admission.retry_after_secs();
            headers.insert(
                HeaderName::from_static("ratelimit-limit"),
                HeaderValue::from(admission.limit),
            );
            headers.insert(
                HeaderName::from_static("ratelimit-remaining"),
                HeaderValue::from(admission.remaining),
            );
            headers.insert(
                HeaderName::from_static("ratelimit-reset"),
                HeaderValue::from(reset),
            );
            if self.status == StatusCode::TOO_MANY_REQUESTS {
                headers.insert(HeaderName::from_static("retry-after"), HeaderValue::from(reset));
            }
        }

        if let Some(filename) = &self.attachment {
            let disposition = format!("attachment; filename=\"{}\"", filename);
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(HeaderName::from_static("content-disposition"), value);
            }
        }

        response
    }
}

impl From<GrievanceError> for Reply {
    fn from(err: GrievanceError) -> Self {
        if err.status_code().is_server_error() {
            warn!(error = %err, reason = err.reason(), "Request failed");
        }
        let (status, body) = err.into_status_code_and_body();
        let bytes = Bytes::from(body.to_string());
        Self::raw(status, "application/json", bytes)
    }
}
