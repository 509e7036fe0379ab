use reqwest::Client as HttpClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::compliance::cache::TtlCache;
use crate::application::compliance::robots::{agent_token, RobotsPolicy};
use crate::application::compliance::terms::{TermsAssessor, TermsPolicy};
use crate::config::settings::Compliance as ComplianceSettings;
use crate::domain::compliance::ComplianceDecision;
use crate::utils::error::Result;
use crate::utils::urls;

/// Configuration for the compliance engine
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    /// User agent sent with robots.txt requests and matched against its groups
    pub user_agent: String,
    /// Whether to fetch and obey robots.txt at all
    pub respect_robots_txt: bool,
    /// Timeout for a robots.txt fetch
    pub robots_timeout: Duration,
    /// Lifetime of cached robots and terms policies
    pub cache_ttl: Duration,
    /// Delay used when robots.txt declares none
    pub default_crawl_delay: Duration,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    /// Deny every domain missing from `allowed_domains`
    pub enforce_allowlist: bool,
    /// Extra domains whose terms are known to permit crawling
    pub trusted_domains: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self::from(&ComplianceSettings::default())
    }
}

impl From<&ComplianceSettings> for ComplianceConfig {
    fn from(settings: &ComplianceSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            respect_robots_txt: settings.respect_robots_txt,
            robots_timeout: Duration::from_secs(settings.robots_timeout_secs),
            cache_ttl: Duration::from_secs(settings.cache_ttl_secs),
            default_crawl_delay: Duration::from_millis(settings.default_crawl_delay_ms),
            allowed_domains: settings.allowed_domains.clone(),
            blocked_domains: settings.blocked_domains.clone(),
            enforce_allowlist: settings.enforce_allowlist,
            trusted_domains: settings.trusted_domains.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub robots_entries: usize,
    pub terms_entries: usize,
}

/// Decides whether a URL may be fetched and how long to wait between requests.
pub struct ComplianceEngine {
    http_client: HttpClient,
    config: ComplianceConfig,
    agent_token: String,
    robots_cache: TtlCache<Arc<RobotsPolicy>>,
    terms_cache: TtlCache<TermsPolicy>,
    terms: TermsAssessor,
}

impl ComplianceEngine {
    pub fn new(config: ComplianceConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.robots_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            http_client,
            agent_token: agent_token(&config.user_agent),
            robots_cache: TtlCache::new(config.cache_ttl),
            terms_cache: TtlCache::new(config.cache_ttl),
            terms: TermsAssessor::new(config.trusted_domains.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ComplianceConfig {
        &self.config
    }

    /// Evaluate domain lists, robots.txt and terms of service for `url`.
    ///
    /// Only a malformed URL is an error. Robots.txt failures fail open, unknown
    /// terms fail closed, and list hits short-circuit without any network call.
    pub async fn check_compliance(&self, url: &str) -> Result<ComplianceDecision> {
        let parsed = urls::parse_http_url(url)?;
        let domain = urls::extract_domain(url)?;
        let default_delay = self.config.default_crawl_delay;

        if self
            .config
            .blocked_domains
            .iter()
            .any(|blocked| urls::domain_matches(&domain, blocked))
        {
            debug!("Domain {} is blocked", domain);
            return Ok(ComplianceDecision::denied(
                default_delay,
                format!("Domain {} is on the block list", domain),
            ));
        }

        if self.config.enforce_allowlist
            && !self
                .config
                .allowed_domains
                .iter()
                .any(|allowed| urls::domain_matches(&domain, allowed))
        {
            debug!("Domain {} is not on the allow list", domain);
            return Ok(ComplianceDecision::denied(
                default_delay,
                format!("Domain {} is not on the allow list", domain),
            ));
        }

        let mut restrictions = Vec::new();
        let mut recommendations = Vec::new();

        let (robots_compliant, required_delay) = if self.config.respect_robots_txt {
            let robots = self.robots_policy(&urls::origin(&parsed)).await;
            let path = urls::path_and_query(&parsed);
            let compliant = robots.is_allowed(&self.agent_token, &path);
            if !compliant {
                restrictions.push(format!("robots.txt disallows {} for {}", path, self.agent_token));
            }
            if !robots.sitemaps().is_empty() {
                recommendations.push(format!("Sitemaps available: {}", robots.sitemaps().join(", ")));
            }
            (compliant, robots.crawl_delay().unwrap_or(default_delay))
        } else {
            (true, default_delay)
        };

        let terms = self.terms_policy(&domain).await;
        let tos_compliant = terms.allows_automation;
        if !tos_compliant {
            restrictions.push(format!(
                "Terms of service for {} do not permit automated access (confidence {:.2})",
                domain, terms.confidence
            ));
        }
        if terms.requires_attribution {
            recommendations.push(format!("Attribute collected content to {}", domain));
        }
        if !required_delay.is_zero() {
            recommendations.push(format!(
                "Wait at least {:.1}s between requests to {}",
                required_delay.as_secs_f64(),
                domain
            ));
        }

        let decision = ComplianceDecision {
            allowed: robots_compliant && tos_compliant,
            robots_compliant,
            tos_compliant,
            required_delay,
            attribution_needed: terms.requires_attribution,
            restrictions,
            recommendations,
        };
        debug!(
            url = %url,
            allowed = decision.allowed,
            robots = decision.robots_compliant,
            tos = decision.tos_compliant,
            "Compliance checked"
        );
        Ok(decision)
    }

    /// Read-through lookup of the robots policy for an origin.
    pub async fn robots_policy(&self, origin: &str) -> Arc<RobotsPolicy> {
        if let Some(policy) = self.robots_cache.get(origin).await {
            return policy;
        }
        let policy = Arc::new(self.fetch_robots(origin).await);
        self.robots_cache.insert(origin, policy.clone()).await;
        policy
    }

    /// Read-through lookup of the terms policy for a domain.
    pub async fn terms_policy(&self, domain: &str) -> TermsPolicy {
        if let Some(policy) = self.terms_cache.get(domain).await {
            return policy;
        }
        let policy = self.terms.assess(domain);
        self.terms_cache.insert(domain, policy.clone()).await;
        policy
    }

    async fn fetch_robots(&self, origin: &str) -> RobotsPolicy {
        let robots_url = format!("{}/robots.txt", origin);

        match self.http_client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(content) => {
                    let policy = RobotsPolicy::parse(&content);
                    info!("Fetched robots.txt for {} ({} groups)", origin, policy.group_count());
                    policy
                }
                Err(e) => {
                    warn!("Unreadable robots.txt at {}, allowing all: {}", robots_url, e);
                    RobotsPolicy::allow_all()
                }
            },
            Ok(response) => {
                // No robots.txt means nothing is forbidden
                debug!("robots.txt at {} returned {}, allowing all", robots_url, response.status());
                RobotsPolicy::allow_all()
            }
            Err(e) => {
                warn!("Failed to fetch {}, allowing all: {}", robots_url, e);
                RobotsPolicy::allow_all()
            }
        }
    }

    /// Remove expired robots and terms entries. Called from the health check.
    pub async fn sweep_expired(&self) -> usize {
        let swept = self.robots_cache.sweep_expired().await + self.terms_cache.sweep_expired().await;
        if swept > 0 {
            debug!("Swept {} expired compliance cache entries", swept);
        }
        swept
    }

    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            robots_entries: self.robots_cache.len().await,
            terms_entries: self.terms_cache.len().await,
        }
    }
}
