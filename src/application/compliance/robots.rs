use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Allow/Disallow rules and crawl delay declared for one user-agent group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RobotsRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay: Option<Duration>,
}

/// Parsed robots.txt for one origin. Replaced wholesale on refresh, never edited.
#[derive(Debug, Clone, Serialize)]
pub struct RobotsPolicy {
    groups: HashMap<String, RobotsRules>,
    sitemaps: Vec<String>,
    fetched_at: DateTime<Utc>,
}

impl RobotsPolicy {
    pub fn parse(content: &str) -> Self {
        let mut groups: HashMap<String, RobotsRules> = HashMap::new();
        let mut sitemaps = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            // Drop trailing comments
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    // A user-agent line after rules opens a new group
                    if in_rules {
                        current_agents.clear();
                        in_rules = false;
                    }
                    let agent = value.to_lowercase();
                    groups.entry(agent.clone()).or_default();
                    current_agents.push(agent);
                }
                "allow" => {
                    in_rules = true;
                    if !value.is_empty() {
                        for agent in &current_agents {
                            if let Some(rules) = groups.get_mut(agent) {
                                rules.allow.push(value.to_string());
                            }
                        }
                    }
                }
                "disallow" => {
                    in_rules = true;
                    // An empty Disallow blocks nothing
                    if !value.is_empty() {
                        for agent in &current_agents {
                            if let Some(rules) = groups.get_mut(agent) {
                                rules.disallow.push(value.to_string());
                            }
                        }
                    }
                }
                "crawl-delay" => {
                    in_rules = true;
                    // Negative, NaN or out-of-range values are ignored
                    if let Some(delay) = value
                        .parse::<f64>()
                        .ok()
                        .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
                    {
                        for agent in &current_agents {
                            if let Some(rules) = groups.get_mut(agent) {
                                rules.crawl_delay = Some(delay);
                            }
                        }
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        Self {
            groups,
            sitemaps,
            fetched_at: Utc::now(),
        }
    }

    /// Used when robots.txt is missing or unreachable.
    pub fn allow_all() -> Self {
        Self {
            groups: HashMap::new(),
            sitemaps: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Rules for the exact agent token, falling back to `*`.
    pub fn rules_for(&self, agent_token: &str) -> Option<&RobotsRules> {
        self.groups
            .get(&agent_token.to_lowercase())
            .or_else(|| self.groups.get("*"))
    }

    /// Allow rules are consulted before Disallow rules; the first hit wins.
    pub fn is_allowed(&self, agent_token: &str, path: &str) -> bool {
        let Some(rules) = self.rules_for(agent_token) else {
            return true;
        };

        if rules.allow.iter().any(|rule| rule_matches(rule, path)) {
            return true;
        }
        if rules.disallow.iter().any(|rule| rule_matches(rule, path)) {
            return false;
        }
        true
    }

    /// Largest Crawl-delay declared by any group.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.groups.values().filter_map(|rules| rules.crawl_delay).max()
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

/// Exact match, `prefix*` match, or `dir/` prefix match.
fn rule_matches(rule: &str, path: &str) -> bool {
    if let Some(prefix) = rule.strip_suffix('*') {
        path.starts_with(prefix)
    } else if rule.ends_with('/') {
        path.starts_with(rule)
    } else {
        path == rule
    }
}

/// Product token of a user-agent string: `FortaiCorpusBot/1.0 (+info)` -> `fortaicorpusbot`.
pub fn agent_token(user_agent: &str) -> String {
    user_agent
        .split(|c: char| c == '/' || c.is_whitespace())
        .next()
        .unwrap_or(user_agent)
        .to_lowercase()
}
