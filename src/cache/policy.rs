//! Resource classes and their freshness rules
//!
//! Everything here is pure: no clock reads, no I/O. Callers pass `now`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Category of cached content sharing one strategy and one TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    /// HTML documents and app shell routes
    Navigation,
    /// Versioned scripts, styles and fonts
    StaticAsset,
    /// List and search API responses
    ListApi,
    /// Single-record API responses
    DetailApi,
    /// User-facing images
    Image,
    /// Document thumbnails and previews
    Thumbnail,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 6] = [
        ResourceClass::Navigation,
        ResourceClass::StaticAsset,
        ResourceClass::ListApi,
        ResourceClass::DetailApi,
        ResourceClass::Image,
        ResourceClass::Thumbnail,
    ];

    /// Store namespace for this class
    pub fn store_name(&self) -> &'static str {
        match self {
            ResourceClass::Navigation => "pages",
            ResourceClass::StaticAsset => "static",
            ResourceClass::ListApi => "list-api",
            ResourceClass::DetailApi => "detail-api",
            ResourceClass::Image => "images",
            ResourceClass::Thumbnail => "thumbnails",
        }
    }

    pub fn from_store_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.store_name() == name)
    }

    /// Entry ceiling per store; the oldest entries go first under pressure
    pub fn max_entries(&self) -> usize {
        match self {
            ResourceClass::Navigation => 200,
            ResourceClass::StaticAsset => 500,
            ResourceClass::ListApi => 300,
            ResourceClass::DetailApi => 1_000,
            ResourceClass::Image => 400,
            ResourceClass::Thumbnail => 150,
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.store_name())
    }
}

/// Cache TTL per resource class
pub struct CacheTtl;

impl CacheTtl {
    // Search results and listings change with every upload
    pub const LIST_API: Duration = Duration::from_secs(5 * 60); // 5 min

    pub const NAVIGATION: Duration = Duration::from_secs(60 * 60); // 1 hr
    pub const THUMBNAIL: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
    pub const DETAIL_API: Duration = Duration::from_secs(24 * 60 * 60); // 24 hr
    pub const IMAGE: Duration = Duration::from_secs(7 * 24 * 60 * 60); // 7 days

    // Asset URLs are content-hashed by the build
    pub const STATIC_ASSET: Duration = Duration::from_secs(30 * 24 * 60 * 60); // 30 days
}

/// Maps (resource class, stored timestamp) to a freshness verdict
pub struct ExpirationPolicy;

impl ExpirationPolicy {
    pub fn ttl(class: ResourceClass) -> Duration {
        match class {
            ResourceClass::Navigation => CacheTtl::NAVIGATION,
            ResourceClass::StaticAsset => CacheTtl::STATIC_ASSET,
            ResourceClass::ListApi => CacheTtl::LIST_API,
            ResourceClass::DetailApi => CacheTtl::DETAIL_API,
            ResourceClass::Image => CacheTtl::IMAGE,
            ResourceClass::Thumbnail => CacheTtl::THUMBNAIL,
        }
    }

    pub fn expires_at(class: ResourceClass, stored_at: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(Self::ttl(class)).unwrap_or(chrono::Duration::zero());
        stored_at + ttl
    }

    /// An entry is fresh until `now` passes its expiry instant
    pub fn is_fresh(class: ResourceClass, stored_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now <= Self::expires_at(class, stored_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_detail_api_day_boundary() {
        let stored = t0();
        let at = |h| stored + chrono::Duration::hours(h);

        assert!(ExpirationPolicy::is_fresh(ResourceClass::DetailApi, stored, at(23)));
        assert!(!ExpirationPolicy::is_fresh(ResourceClass::DetailApi, stored, at(25)));
    }

    #[test]
    fn test_list_expires_fastest_static_slowest() {
        let ttls: Vec<Duration> = ResourceClass::ALL
            .iter()
            .map(|c| ExpirationPolicy::ttl(*c))
            .collect();
        let min = ttls.iter().min().unwrap();
        let max = ttls.iter().max().unwrap();

        assert_eq!(*min, ExpirationPolicy::ttl(ResourceClass::ListApi));
        assert_eq!(*max, ExpirationPolicy::ttl(ResourceClass::StaticAsset));
    }

    #[test]
    fn test_fresh_at_exact_expiry() {
        let stored = t0();
        let expiry = ExpirationPolicy::expires_at(ResourceClass::ListApi, stored);
        assert!(ExpirationPolicy::is_fresh(ResourceClass::ListApi, stored, expiry));
        assert!(!ExpirationPolicy::is_fresh(
            ResourceClass::ListApi,
            stored,
            expiry + chrono::Duration::seconds(1)
        ));
    }

    #[test]
    fn test_store_names_round_trip() {
        for class in ResourceClass::ALL {
            assert_eq!(ResourceClass::from_store_name(class.store_name()), Some(class));
        }
        assert_eq!(ResourceClass::from_store_name("unknown"), None);
    }

    #[test]
    fn test_thumbnails_trimmed_hardest() {
        let min = ResourceClass::ALL.iter().map(|c| c.max_entries()).min();
        assert_eq!(min, Some(ResourceClass::Thumbnail.max_entries()));
    }
}
