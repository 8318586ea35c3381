//! HTTP cache validation
//!
//! Entity tags are weak and deterministic: the same artifact bytes always
//! produce the same tag, across workers and restarts, so any replica can
//! answer an `If-None-Match` revalidation with a 304.

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Weak entity tag over the given byte slices
pub fn weak_etag(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    format!("W/\"{:x}\"", digest)
}

/// Whether the request's `If-None-Match` matches the computed tag
pub fn not_modified(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|candidates| {
            candidates
                .split(',')
                .any(|candidate| candidate.trim() == etag)
        })
}

/// Build a response honoring conditional revalidation: 304 with no body
/// when the client's tag matches, a full 200 with validators otherwise.
pub fn cached_response(
    headers: &HeaderMap,
    etag: &str,
    content_type: &str,
    cache_control: &str,
    body: Bytes,
) -> Response {
    let builder = Response::builder()
        .header(ETAG, etag)
        .header(CACHE_CONTROL, cache_control);

    let response = if not_modified(headers, etag) {
        builder
            .status(StatusCode::NOT_MODIFIED)
            .body(Body::empty())
    } else {
        builder
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .body(Body::from(body))
    };

    // Header values are static or hex strings; building cannot fail
    response.unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_etag_is_deterministic() {
        let a = weak_etag(&[b"slide", b"tile:1:2:3"]);
        let b = weak_etag(&[b"slide", b"tile:1:2:3"]);
        assert_eq!(a, b);
        assert!(a.starts_with("W/\""));
    }

    #[test]
    fn test_etag_varies_with_content() {
        let a = weak_etag(&[b"tile:1:2:3"]);
        let b = weak_etag(&[b"tile:1:2:4"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_not_modified_matches_listed_tag() {
        let etag = weak_etag(&[b"payload"]);
        let mut headers = HeaderMap::new();
        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_str(&format!("W/\"other\", {}", etag)).unwrap(),
        );
        assert!(not_modified(&headers, &etag));
    }

    #[test]
    fn test_not_modified_requires_exact_match() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("W/\"deadbeef\""));
        assert!(!not_modified(&headers, &weak_etag(&[b"payload"])));
    }

    #[test]
    fn test_cached_response_status_codes() {
        let etag = weak_etag(&[b"body"]);

        let miss = cached_response(
            &HeaderMap::new(),
            &etag,
            "image/jpeg",
            "public, max-age=3600",
            Bytes::from_static(b"body"),
        );
        assert_eq!(miss.status(), StatusCode::OK);
        assert_eq!(miss.headers().get(ETAG).unwrap().to_str().unwrap(), etag);

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&etag).unwrap());
        let hit = cached_response(
            &headers,
            &etag,
            "image/jpeg",
            "public, max-age=3600",
            Bytes::from_static(b"body"),
        );
        assert_eq!(hit.status(), StatusCode::NOT_MODIFIED);
        assert!(hit.headers().get(CONTENT_TYPE).is_none());
    }
}
