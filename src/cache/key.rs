//! Cache key generation using SHA-256 hashes

use sha2::{Digest, Sha256};
use url::Url;

/// Canonical form of a request URL.
///
/// Scheme and host are lower-cased by the parser, the fragment is dropped and
/// query parameters are sorted so that equivalent URLs share one entry.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        pairs.sort();
        canonical.query_pairs_mut().clear().extend_pairs(pairs);
    }

    canonical.to_string()
}

/// Generate a deterministic cache key from method, URL and auth partition.
///
/// The partition keeps entries fetched under one identity from ever being
/// served to another.
pub fn cache_key(method: &str, url: &Url, partition: Option<&str>) -> String {
    let mut hasher = Sha256::new();

    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"|");

    hasher.update(canonical_url(url).as_bytes());
    hasher.update(b"|");

    if let Some(p) = partition {
        hasher.update(p.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// Opaque partition id for an identity, so raw emails never reach the cache
pub fn partition_for(identity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"partition|");
    hasher.update(identity.trim().to_lowercase().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
