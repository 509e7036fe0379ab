use serde::Serialize;

use crate::utils::urls::domain_matches;

/// Heuristic reading of a site's terms of service. No network involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermsPolicy {
    pub allows_automation: bool,
    pub requires_attribution: bool,
    pub confidence: f64,
}

impl TermsPolicy {
    fn closed() -> Self {
        Self {
            allows_automation: false,
            requires_attribution: false,
            confidence: 0.3,
        }
    }
}

// (domain, requires attribution, confidence)
const KNOWN_GOOD_DOMAINS: &[(&str, bool, f64)] = &[
    ("wikipedia.org", true, 0.95),
    ("wikimedia.org", true, 0.9),
    ("wikibooks.org", true, 0.9),
    ("arxiv.org", true, 0.9),
    ("stackoverflow.com", true, 0.85),
    ("stackexchange.com", true, 0.85),
    ("developer.mozilla.org", true, 0.9),
    ("gutenberg.org", false, 0.9),
    ("docs.python.org", false, 0.85),
    ("docs.rs", false, 0.85),
    ("rust-lang.org", false, 0.85),
    ("readthedocs.io", false, 0.8),
    ("github.io", false, 0.7),
];

/// Allows automation only for known-good and explicitly trusted domains.
#[derive(Debug, Clone, Default)]
pub struct TermsAssessor {
    trusted_domains: Vec<String>,
}

impl TermsAssessor {
    pub fn new(trusted_domains: Vec<String>) -> Self {
        Self { trusted_domains }
    }

    pub fn assess(&self, domain: &str) -> TermsPolicy {
        if let Some((_, requires_attribution, confidence)) = KNOWN_GOOD_DOMAINS
            .iter()
            .find(|(known, _, _)| domain_matches(domain, known))
        {
            return TermsPolicy {
                allows_automation: true,
                requires_attribution: *requires_attribution,
                confidence: *confidence,
            };
        }

        if self.trusted_domains.iter().any(|trusted| domain_matches(domain, trusted)) {
            return TermsPolicy {
                allows_automation: true,
                requires_attribution: false,
                confidence: 0.7,
            };
        }

        TermsPolicy::closed()
    }
}
