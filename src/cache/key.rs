//! Cache key generation.
//!
//! Keys are plain strings with `:`-separated segments so that a whole family of
//! keys can be dropped with a trailing-`*` prefix pattern.

use reqwest::Method;
use url::form_urlencoded;

/// Marker that turns a pattern into a prefix match.
pub const WILDCARD: char = '*';

pub fn episode_by_guid(guid: &str) -> String {
    format!("episode:guid:{}", guid)
}

pub fn episode_by_id(id: i64) -> String {
    format!("episode:id:{}", id)
}

pub fn podcast_episodes(podcast_id: i64, page: u32, page_size: u32) -> String {
    format!(
        "collection:{}:episodes:page:{}:size:{}",
        podcast_id, page, page_size
    )
}

/// Pattern covering every cached listing of one podcast.
pub fn podcast_pattern(podcast_id: i64) -> String {
    format!("collection:{}:{}", podcast_id, WILDCARD)
}

pub fn recent_episodes(limit: u32) -> String {
    format!("episodes:recent:{}", limit)
}

pub fn recent_pattern() -> String {
    format!("episodes:recent:{}", WILDCARD)
}

/// Key for a whole HTTP response.
///
/// Only the method, the path, and the query participate; the query is sorted by
/// name then value so parameter order never changes the key. Pairs are
/// re-encoded, so a decoded `&` or `=` inside a value cannot pass for a
/// separator and the key never contains a second `?`.
pub fn http_response(method: &Method, path: &str, query: &[(String, String)]) -> String {
    let mut params: Vec<&(String, String)> = query.iter().collect();
    params.sort();
    let canonical = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .finish();
    format!("http:{}:{}?{}", method.as_str(), path, canonical)
}

/// Pattern covering every cached HTTP response for a path, regardless of query.
pub fn http_path_pattern(method: &Method, path: &str) -> String {
    format!("http:{}:{}?{}", method.as_str(), path, WILDCARD)
}

/// Exact match, or prefix match when `pattern` ends with [`WILDCARD`].
pub fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix(WILDCARD) {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
