use regex::Regex;
use std::collections::{HashSet, VecDeque};

use crate::domain::job::CrawlScope;
use crate::utils::urls;

/// Compiled link-following rules for one job's scope.
pub struct LinkFilter {
    same_domain_only: bool,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl LinkFilter {
    pub fn new(scope: &CrawlScope) -> Result<Self, regex::Error> {
        Ok(Self {
            same_domain_only: scope.same_domain_only,
            include: scope
                .include_patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
            exclude: scope
                .exclude_patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Normalised form of `link` when it should be followed from a page on `domain`.
    pub fn accept(&self, domain: &str, link: &str) -> Option<String> {
        let normalized = urls::normalize_url(link).ok()?;
        if self.same_domain_only && urls::extract_domain(&normalized).ok()? != domain {
            return None;
        }
        // If include patterns are specified, at least one must match
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(&normalized)) {
            return None;
        }
        if self.exclude.iter().any(|re| re.is_match(&normalized)) {
            return None;
        }
        Some(normalized)
    }
}

/// Set of already-followed keys that forgets its oldest entries past `capacity`.
pub struct SeenUrls {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenUrls {
    pub fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// True when `key` was not seen before.
    pub fn insert(&mut self, key: String) -> bool {
        if self.set.contains(&key) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        self.set.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(include: &[&str], exclude: &[&str]) -> CrawlScope {
        CrawlScope {
            max_depth: 2,
            same_domain_only: true,
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn filters_by_domain_and_patterns() {
        let filter = LinkFilter::new(&scope(&["/docs/"], &[r"\.pdf$"])).unwrap();
        assert_eq!(
            filter.accept("example.org", "https://example.org/docs/a#part").as_deref(),
            Some("https://example.org/docs/a")
        );
        assert!(filter.accept("example.org", "https://example.org/blog/a").is_none());
        assert!(filter.accept("example.org", "https://example.org/docs/a.pdf").is_none());
        assert!(filter.accept("example.org", "https://other.org/docs/a").is_none());
        assert!(filter.accept("example.org", "mailto:x@example.org").is_none());
    }

    #[test]
    fn bad_patterns_are_rejected() {
        assert!(LinkFilter::new(&scope(&["(unclosed"], &[])).is_err());
    }

    #[test]
    fn seen_set_is_bounded() {
        let mut seen = SeenUrls::new(2);
        assert!(seen.insert("a".into()));
        assert!(!seen.insert("a".into()));
        assert!(seen.insert("b".into()));
        assert!(seen.insert("c".into()));
        assert_eq!(seen.len(), 2);
        // "a" was evicted
        assert!(seen.insert("a".into()));
    }
}
