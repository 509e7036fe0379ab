use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extracted page content handed between the extractor, the validator and storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub links: Vec<String>,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub metadata: serde_json::Value,
    pub source_id: Option<String>,
    pub quality_score: Option<f64>,
    pub quality_tier: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl Document {
    pub fn new(url: String, domain: String, content: String, status_code: u16) -> Self {
        let content_hash = format!("{:x}", md5::compute(content.as_bytes()));
        Self {
            id: Uuid::new_v4(),
            url,
            domain,
            title: None,
            content,
            content_hash,
            links: Vec::new(),
            status_code,
            content_type: None,
            metadata: serde_json::json!({}),
            source_id: None,
            quality_score: None,
            quality_tier: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn set_title(&mut self, title: String) {
        self.title = Some(title);
    }

    pub fn add_metadata(&mut self, key: &str, value: serde_json::Value) {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(key.to_string(), value);
        }
    }

    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_for_equal_content() {
        let a = Document::new("https://a.org/".into(), "a.org".into(), "same body".into(), 200);
        let b = Document::new("https://b.org/".into(), "b.org".into(), "same body".into(), 200);
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn metadata_accumulates_keys() {
        let mut doc = Document::new("https://a.org/".into(), "a.org".into(), "one two three".into(), 200);
        doc.add_metadata("lang", serde_json::json!("en"));
        doc.add_metadata("words", serde_json::json!(doc.word_count()));
        assert_eq!(doc.metadata["lang"], "en");
        assert_eq!(doc.metadata["words"], 3);
    }
}
