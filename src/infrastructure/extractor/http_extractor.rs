use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client as HttpClient;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::settings::Extractor as ExtractorSettings;
use crate::domain::document::Document;
use crate::infrastructure::extractor::{ContentExtractor, ExtractionResult};
use crate::utils::urls;

/// Configuration for the HTTP extractor
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// User agent to use for requests
    pub user_agent: String,
    /// Timeout for requests
    pub request_timeout: Duration,
    /// Maximum size of a page to download (in bytes)
    pub max_page_size_bytes: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::from(&ExtractorSettings::default())
    }
}

impl From<&ExtractorSettings> for ExtractorConfig {
    fn from(settings: &ExtractorSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            max_page_size_bytes: settings.max_page_size_bytes,
        }
    }
}

/// GETs a page and pulls out its title, links and visible text.
pub struct HttpContentExtractor {
    http_client: HttpClient,
    config: ExtractorConfig,
    title_re: Regex,
    link_re: Regex,
}

impl HttpContentExtractor {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .build()?;

        Ok(Self {
            http_client,
            config,
            title_re: Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?,
            link_re: Regex::new(r#"(?i)<a[^>]+href=["']([^"']+)["']"#)?,
        })
    }

    fn extract_title(&self, html: &str) -> Option<String> {
        self.title_re
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|title| !title.is_empty())
    }

    fn extract_links(&self, html: &str, base_url: &Url) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for cap in self.link_re.captures_iter(html) {
            let Some(href) = cap.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            // Skip empty links, javascript, mailto, tel and in-page anchors
            if href.is_empty()
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with('#')
            {
                continue;
            }

            if let Ok(mut absolute) = base_url.join(href) {
                if absolute.scheme() != "http" && absolute.scheme() != "https" {
                    continue;
                }
                absolute.set_fragment(None);
                let absolute = absolute.to_string();
                if seen.insert(absolute.clone()) {
                    links.push(absolute);
                }
            }
        }

        links
    }
}

/// Visible text of the body, whitespace-collapsed, without script and style content.
fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut words: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|parent| parent.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract_content(&self, url: &str) -> Result<ExtractionResult> {
        let started = Instant::now();

        let parsed = match urls::parse_http_url(url) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(ExtractionResult::failed(None, e.to_string(), started.elapsed())),
        };

        let response = match self.http_client.get(parsed.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request error for URL {}: {}", url, e);
                return Ok(ExtractionResult::failed(None, format!("Request failed: {}", e), started.elapsed()));
            }
        };

        let status = response.status();
        let status_code = status.as_u16();
        if !status.is_success() {
            debug!("HTTP {} for {}", status_code, url);
            return Ok(ExtractionResult::failed(
                Some(status_code),
                format!("HTTP error: {}", status),
                started.elapsed(),
            ));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.config.max_page_size_bytes {
                return Ok(ExtractionResult::failed(
                    Some(status_code),
                    format!(
                        "Content too large: {} bytes (max: {} bytes)",
                        length, self.config.max_page_size_bytes
                    ),
                    started.elapsed(),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let final_url = response.url().clone();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Ok(ExtractionResult::failed(
                    Some(status_code),
                    format!("Failed to read body: {}", e),
                    started.elapsed(),
                ))
            }
        };
        if body.len() > self.config.max_page_size_bytes {
            return Ok(ExtractionResult::failed(
                Some(status_code),
                format!(
                    "Content too large: {} bytes (max: {} bytes)",
                    body.len(),
                    self.config.max_page_size_bytes
                ),
                started.elapsed(),
            ));
        }

        let is_html = content_type
            .as_deref()
            .map_or(true, |ct| ct.contains("html"));
        let (text, title, links) = if is_html {
            (extract_text(&body), self.extract_title(&body), self.extract_links(&body, &final_url))
        } else {
            (body.trim().to_string(), None, Vec::new())
        };

        let domain = final_url
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_default();
        let mut document = Document::new(final_url.to_string(), domain, text, status_code);
        if let Some(title) = title {
            document.set_title(title);
        }
        document.links = links;
        document.content_type = content_type;
        document.add_metadata("content_length", serde_json::json!(body.len()));
        document.add_metadata("word_count", serde_json::json!(document.word_count()));

        debug!(
            url = %url,
            status = status_code,
            links = document.links.len(),
            "Extracted document"
        );
        Ok(ExtractionResult::extracted(document, started.elapsed()))
    }
}
