use url::Url;

use crate::utils::error::{AppError, Result};

/// Parse a URL and insist on an http(s) scheme with a host.
pub fn parse_http_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| AppError::InvalidInput(format!("Invalid URL: {}, error: {}", url, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::InvalidInput(format!(
            "Unsupported URL scheme '{}': {}",
            parsed.scheme(),
            url
        )));
    }
    if parsed.host_str().is_none() {
        return Err(AppError::InvalidInput(format!("URL has no host: {}", url)));
    }

    Ok(parsed)
}

/// Lower-cased host of the URL.
pub fn extract_domain(url: &str) -> Result<String> {
    let parsed = parse_http_url(url)?;
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| AppError::InvalidInput(format!("URL has no host: {}", url)))
}

/// Remove the fragment and make sure a bare host ends with `/`.
pub fn normalize_url(url: &str) -> Result<String> {
    let mut normalized = parse_http_url(url)?;
    normalized.set_fragment(None);
    if normalized.path().is_empty() {
        normalized.set_path("/");
    }
    Ok(normalized.to_string())
}

/// `scheme://host[:port]`, the key robots.txt policies are cached under.
pub fn origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Path plus query, the part robots.txt rules are matched against.
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// True when `domain` is `pattern` or a subdomain of it.
pub fn domain_matches(domain: &str, pattern: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim().trim_start_matches("*.").trim_end_matches('.').to_ascii_lowercase();
    if pattern.is_empty() {
        return false;
    }
    domain == pattern || domain.ends_with(&format!(".{}", pattern))
}
