use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Verdict for a single URL. Produced fresh on every check; only its inputs
/// (robots and terms policies) are cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceDecision {
    pub allowed: bool,
    pub robots_compliant: bool,
    pub tos_compliant: bool,
    pub required_delay: Duration,
    pub attribution_needed: bool,
    pub restrictions: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ComplianceDecision {
    /// A denial that never reached robots.txt or terms evaluation.
    pub fn denied(required_delay: Duration, restriction: String) -> Self {
        Self {
            allowed: false,
            robots_compliant: false,
            tos_compliant: false,
            required_delay,
            attribution_needed: false,
            restrictions: vec![restriction],
            recommendations: Vec::new(),
        }
    }
}
