//! Attachment URL resolution.
//!
//! CMS payloads mix absolute URLs with site-relative paths. [`UrlResolver`]
//! turns every reference into an absolute URL on the configured site:
//!
//! - `https://cdn.example.com/a.jpg` stays as-is
//! - `//cdn.example.com/a.jpg`       → `http://cdn.example.com/a.jpg`
//! - `/upload/a.jpg`                 → `http://{domain}/upload/a.jpg`
//! - `upload/a.jpg`                  → `http://{domain}/upload/a.jpg`
//! - `../upload/a.jpg`               → `http://{domain}/upload/a.jpg`

use std::sync::OnceLock;

use regex_lite::Regex;
use tracing::trace;

use crate::errors::AttachmentError;
use crate::models::AttachmentCategory;

/// Scheme used for site-relative paths.
const SITE_SCHEME: &str = "http";

#[derive(Debug, Clone)]
pub struct UrlResolver {
    domain: String,
}

impl UrlResolver {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Resolve a raw reference. Returns `None` for blank input.
    pub fn absolutize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if has_scheme(raw) {
            return Some(raw.to_string());
        }
        if raw.starts_with("//") {
            return Some(format!("{SITE_SCHEME}:{raw}"));
        }

        let resolved = format!(
            "{SITE_SCHEME}://{}{}",
            self.domain,
            site_path(rewrite_w_suffix(raw))
        );
        trace!(raw, %resolved, "absolutized attachment path");
        Some(resolved)
    }
}

/// Root a relative reference at the site and collapse its `.` and `..`
/// segments. `..` never climbs above the root. Any query or fragment is
/// kept verbatim.
fn site_path(raw: &str) -> String {
    let (path, tail) = raw.split_at(raw.find(['?', '#']).unwrap_or(raw.len()));

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = format!("/{}", segments.join("/"));
    if path.ends_with('/') && !segments.is_empty() {
        out.push('/');
    }
    out.push_str(tail);
    out
}

/// Whether `raw` starts with `scheme://`.
pub fn has_scheme(raw: &str) -> bool {
    match raw.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Check that a publish URL can anchor the body attachment: either an
/// absolute URL with a host, or a rooted or relative path.
pub fn validate_publish_url(raw: &str) -> Result<(), AttachmentError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AttachmentError::EmptyPublishUrl);
    }
    if raw.starts_with('/') || raw.starts_with("./") || raw.starts_with("../") {
        return Ok(());
    }
    if has_scheme(raw) {
        let host = raw
            .split_once("://")
            .map(|(_, rest)| rest.split(['/', '?', '#']).next().unwrap_or(""))
            .unwrap_or("");
        if !host.is_empty() {
            return Ok(());
        }
    }
    Err(AttachmentError::MalformedPublishUrl(raw.to_string()))
}

fn w_suffix_image() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)W\d+\.(jpg|jpeg|png|gif|bmp|webp)$").expect("W-suffix pattern compiles")
    })
}

/// Hook for CMS image names of the form `W<digits>.<image ext>`.
///
/// These are recognized but currently passed through unchanged.
pub fn rewrite_w_suffix(path: &str) -> &str {
    if w_suffix_image().is_match(path) {
        trace!(path, "W-suffix image path left unchanged");
    }
    path
}

/// Lower-case extension of the last path segment, without the dot.
///
/// Query strings and fragments are ignored, as is the host of an absolute
/// URL.
pub fn extension(url: &str) -> Option<String> {
    let url = url.split(['?', '#']).next().unwrap_or("");
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |i| &rest[i..]),
        None => url,
    };
    let segment = path.rsplit('/').next().unwrap_or("");
    let (stem, ext) = segment.rsplit_once('.')?;
    // `stem` is empty for dotfiles such as `.htaccess`.
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Extension with a leading dot, or the category default.
pub fn extension_or_default(url: &str, category: AttachmentCategory) -> String {
    match extension(url) {
        Some(ext) => format!(".{ext}"),
        None => category.default_extension().to_string(),
    }
}
