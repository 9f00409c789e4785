//! Request classification and per-class caching strategy

use url::Url;

use crate::cache::ResourceClass;
use crate::network::OutboundRequest;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico"];
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "map", "woff", "woff2", "ttf", "otf", "eot", "wasm", "json",
];

/// What an outbound request is, as far as caching is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// State-changing request, never cached
    Write,
    Read(ResourceClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::Navigation | ResourceClass::StaticAsset => Strategy::CacheFirst,
            ResourceClass::ListApi | ResourceClass::DetailApi => Strategy::NetworkFirst,
            ResourceClass::Image | ResourceClass::Thumbnail => Strategy::StaleWhileRevalidate,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        };
        f.write_str(s)
    }
}

fn extension(path: &str) -> Option<&str> {
    let last = path.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext)
}

/// Segment that names a single record: numeric, uuid-like or otherwise
/// carrying a digit
fn is_identifier(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().any(|c| c.is_ascii_digit())
}

/// Classify a request by method and path
pub fn classify(request: &OutboundRequest, url: &Url) -> RequestKind {
    if request.is_write() {
        return RequestKind::Write;
    }

    let path = url.path().to_ascii_lowercase();

    if path.contains("/thumbnail") || path.contains("/preview") {
        return RequestKind::Read(ResourceClass::Thumbnail);
    }

    let ext = extension(&path);

    if path.starts_with("/api/") {
        if ext.is_some_and(|e| IMAGE_EXTENSIONS.contains(&e)) {
            return RequestKind::Read(ResourceClass::Image);
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let is_search = segments.iter().any(|s| *s == "search");
        let names_record = segments.last().is_some_and(|s| is_identifier(s));

        return if is_search || !names_record {
            RequestKind::Read(ResourceClass::ListApi)
        } else {
            RequestKind::Read(ResourceClass::DetailApi)
        };
    }

    match ext {
        Some(e) if IMAGE_EXTENSIONS.contains(&e) => RequestKind::Read(ResourceClass::Image),
        Some(e) if STATIC_EXTENSIONS.contains(&e) => RequestKind::Read(ResourceClass::StaticAsset),
        _ => RequestKind::Read(ResourceClass::Navigation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(method: &str, path: &str) -> RequestKind {
        let url = Url::parse("https://portal.example.com")
            .unwrap()
            .join(path)
            .unwrap();
        classify(&OutboundRequest::new(method, path), &url)
    }

    fn read(class: ResourceClass) -> RequestKind {
        RequestKind::Read(class)
    }

    #[test]
    fn test_writes() {
        assert_eq!(kind("POST", "/api/docs"), RequestKind::Write);
        assert_eq!(kind("PATCH", "/api/docs/12"), RequestKind::Write);
        assert_eq!(kind("DELETE", "/assets/app.js"), RequestKind::Write);
    }

    #[test]
    fn test_api_reads() {
        assert_eq!(kind("GET", "/api/docs"), read(ResourceClass::ListApi));
        assert_eq!(kind("GET", "/api/search?q=vpn"), read(ResourceClass::ListApi));
        assert_eq!(kind("GET", "/api/docs/42/comments"), read(ResourceClass::ListApi));
        assert_eq!(kind("GET", "/api/docs/42"), read(ResourceClass::DetailApi));
        assert_eq!(
            kind("GET", "/api/docs/0190f3a2-7c1e-7b55-9c11-3f0d1a2b3c4d"),
            read(ResourceClass::DetailApi)
        );
    }

    #[test]
    fn test_media() {
        assert_eq!(kind("GET", "/media/logo.PNG"), read(ResourceClass::Image));
        assert_eq!(kind("GET", "/api/files/7/avatar.webp"), read(ResourceClass::Image));
        assert_eq!(kind("GET", "/api/files/7/thumbnail"), read(ResourceClass::Thumbnail));
        assert_eq!(kind("GET", "/preview/7.jpg"), read(ResourceClass::Thumbnail));
    }

    #[test]
    fn test_static_and_navigation() {
        assert_eq!(kind("GET", "/assets/app.3f9a.js"), read(ResourceClass::StaticAsset));
        assert_eq!(kind("GET", "/fonts/inter.woff2"), read(ResourceClass::StaticAsset));
        assert_eq!(kind("GET", "/"), read(ResourceClass::Navigation));
        assert_eq!(kind("GET", "/wiki/onboarding"), read(ResourceClass::Navigation));
        assert_eq!(kind("HEAD", "/wiki/onboarding"), read(ResourceClass::Navigation));
    }

    #[test]
    fn test_strategy_per_class() {
        assert_eq!(Strategy::for_class(ResourceClass::StaticAsset), Strategy::CacheFirst);
        assert_eq!(Strategy::for_class(ResourceClass::Navigation), Strategy::CacheFirst);
        assert_eq!(Strategy::for_class(ResourceClass::ListApi), Strategy::NetworkFirst);
        assert_eq!(Strategy::for_class(ResourceClass::DetailApi), Strategy::NetworkFirst);
        assert_eq!(
            Strategy::for_class(ResourceClass::Image),
            Strategy::StaleWhileRevalidate
        );
        assert_eq!(
            Strategy::for_class(ResourceClass::Thumbnail),
            Strategy::StaleWhileRevalidate
        );
    }
}
