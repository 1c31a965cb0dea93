//! Cache key definitions
//!
//! Keys are a pure function of route, normalized query parameters and caller
//! scope. Every family a complaint can appear in is listed by
//! [`CacheKeys::affected_by`] so a mutation can invalidate all of them.

use std::fmt;

use crate::counter::escape_glob;

/// Largest page size accepted by list endpoints
pub const MAX_PAGE_LIMIT: u64 = 100;

/// Page size used when the caller gives none
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

/// Cache key for one cacheable read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheKey {
    /// Single complaint detail
    Complaint { id: String },
    /// Action and audit history of one complaint
    ComplaintHistory { id: String },
    /// A citizen's own complaints, optionally filtered by status
    CitizenList {
        citizen_id: String,
        status: Option<String>,
    },
    /// Staff view of all complaints
    StaffList {
        status: Option<String>,
        page: u64,
        limit: u64,
    },
    /// Complaints around a point
    Nearby { lat: f64, lng: f64, radius_km: f64 },
}

impl CacheKey {
    pub fn complaint(id: &str) -> Self {
        Self::Complaint { id: id.to_string() }
    }

    pub fn history(id: &str) -> Self {
        Self::ComplaintHistory { id: id.to_string() }
    }

    pub fn citizen_list(citizen_id: &str, status: Option<&str>) -> Self {
        Self::CitizenList {
            citizen_id: citizen_id.to_string(),
            status: normalize_status(status),
        }
    }

    pub fn staff_list(status: Option<&str>, page: u64, limit: u64) -> Self {
        let (page, limit) = normalize_page(page, limit);
        Self::StaffList {
            status: normalize_status(status),
            page,
            limit,
        }
    }

    pub fn nearby(lat: f64, lng: f64, radius_km: f64) -> Self {
        Self::Nearby {
            lat: round4(lat),
            lng: round4(lng),
            radius_km: round4(radius_km),
        }
    }

    /// Convert to storage key string
    pub fn to_storage_key(&self) -> String {
        match self {
            Self::Complaint { id } => format!("complaint:{}", id),
            Self::ComplaintHistory { id } => format!("complaint:{}:history", id),
            Self::CitizenList { citizen_id, status } => format!(
                "complaints:citizen:{}:{}",
                citizen_id,
                status.as_deref().unwrap_or("all")
            ),
            Self::StaffList {
                status,
                page,
                limit,
            } => format!(
                "complaints:staff:{}:{}:{}",
                status.as_deref().unwrap_or("all"),
                page,
                limit
            ),
            Self::Nearby {
                lat,
                lng,
                radius_km,
            } => format!("complaints:nearby:{:.4}:{:.4}:{:.4}", lat, lng, radius_km),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage_key())
    }
}

/// Invalidation patterns per resource
pub struct CacheKeys;

impl CacheKeys {
    /// Every key pattern that may hold stale data after `complaint_id`
    /// (owned by `citizen_id`) changes.
    pub fn affected_by(complaint_id: &str, citizen_id: &str) -> Vec<String> {
        vec![
            CacheKey::complaint(complaint_id).to_storage_key(),
            CacheKey::history(complaint_id).to_storage_key(),
            Self::citizen_pattern(citizen_id),
            Self::staff_pattern(),
            Self::nearby_pattern(),
        ]
    }

    /// All list variants of one citizen. The trailing separator keeps `u1`
    /// from matching `u12`; the id is escaped so it matches only itself.
    pub fn citizen_pattern(citizen_id: &str) -> String {
        format!("complaints:citizen:{}:*", escape_glob(citizen_id))
    }

    /// All staff pagination and filter variants
    pub fn staff_pattern() -> String {
        "complaints:staff:*".to_string()
    }

    pub fn nearby_pattern() -> String {
        "complaints:nearby:*".to_string()
    }
}

fn normalize_status(status: Option<&str>) -> Option<String> {
    status
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != "all")
}

/// Clamp page to >= 1 and limit to 1..=MAX_PAGE_LIMIT
pub fn normalize_page(page: u64, limit: u64) -> (u64, u64) {
    let limit = if limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else {
        limit.min(MAX_PAGE_LIMIT)
    };
    (page.max(1), limit)
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::glob_match;

    #[test]
    fn test_storage_keys() {
        assert_eq!(CacheKey::complaint("COMP-1").to_storage_key(), "complaint:COMP-1");
        assert_eq!(
            CacheKey::citizen_list("user-123", None).to_storage_key(),
            "complaints:citizen:user-123:all"
        );
        assert_eq!(
            CacheKey::staff_list(Some("In_Progress"), 2, 20).to_storage_key(),
            "complaints:staff:in_progress:2:20"
        );
    }

    #[test]
    fn test_normalization_is_deterministic() {
        assert_eq!(
            CacheKey::staff_list(Some("ALL"), 0, 0),
            CacheKey::staff_list(None, 1, DEFAULT_PAGE_LIMIT)
        );
        assert_eq!(
            CacheKey::staff_list(None, 1, 5000).to_storage_key(),
            "complaints:staff:all:1:100"
        );
        assert_eq!(
            CacheKey::nearby(12.971598, 77.594566, 5.0).to_storage_key(),
            CacheKey::nearby(12.97160, 77.59457, 5.0).to_storage_key()
        );
    }

    #[test]
    fn test_affected_patterns_cover_every_family() {
        let patterns = CacheKeys::affected_by("COMP-1", "user-123");
        let keys = [
            CacheKey::complaint("COMP-1").to_storage_key(),
            CacheKey::history("COMP-1").to_storage_key(),
            CacheKey::citizen_list("user-123", None).to_storage_key(),
            CacheKey::citizen_list("user-123", Some("resolved")).to_storage_key(),
            CacheKey::staff_list(None, 1, 10).to_storage_key(),
            CacheKey::staff_list(Some("unresolved"), 7, 50).to_storage_key(),
            CacheKey::nearby(1.0, 2.0, 3.0).to_storage_key(),
        ];
        for key in &keys {
            assert!(
                patterns.iter().any(|p| glob_match(p, key)),
                "no pattern covers {}",
                key
            );
        }
    }

    #[test]
    fn test_affected_patterns_spare_other_citizens() {
        let patterns = CacheKeys::affected_by("COMP-1", "user-1");
        let other = CacheKey::citizen_list("user-12", None).to_storage_key();
        assert!(!patterns.iter().any(|p| glob_match(p, &other)));
        let other_detail = CacheKey::complaint("COMP-12").to_storage_key();
        assert!(!patterns.iter().any(|p| glob_match(p, &other_detail)));
    }

    #[test]
    fn test_citizen_pattern_with_glob_characters() {
        let citizen = "user[1]*?";
        let pattern = CacheKeys::citizen_pattern(citizen);
        assert!(glob_match(
            &pattern,
            &CacheKey::citizen_list(citizen, Some("resolved")).to_storage_key()
        ));
        assert!(!glob_match(
            &pattern,
            &CacheKey::citizen_list("user[1]xy", None).to_storage_key()
        ));
    }
}
