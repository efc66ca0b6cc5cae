//! Visitor info resolver: walks the provider chain and picks the best answer.
//!
//! Selection: the first successful answer is kept unless it lacks a city and a
//! later answer has one. Every failure is absorbed; total failure yields
//! `VisitorInfo::unknown()`.

use super::providers::{default_providers, normalize, HttpSource, ProviderDescriptor, ProviderSource};
use super::types::{FanOut, ProviderUnavailable, VisitorInfo};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_millis(2500);
pub const DEFAULT_TOTAL_BUDGET: Duration = Duration::from_millis(6000);

/// Resolver settings: provider chain, latency bounds, fan-out mode.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub providers: Vec<ProviderDescriptor>,
    pub provider_timeout: Duration,
    pub total_budget: Duration,
    pub fan_out: FanOut,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            total_budget: DEFAULT_TOTAL_BUDGET,
            fan_out: FanOut::Sequential,
        }
    }
}

/// Running best answer across provider attempts.
#[derive(Default)]
struct Selection {
    best: Option<(String, VisitorInfo)>,
}

impl Selection {
    fn offer(&mut self, provider: &str, candidate: VisitorInfo) {
        let replace = match &self.best {
            None => true,
            Some((_, current)) => !current.has_city() && candidate.has_city(),
        };
        if replace {
            debug!(provider, city = %candidate.city, "selected as current best");
            self.best = Some((provider.to_string(), candidate));
        }
    }

    /// Nothing later can displace a result that already has a city.
    fn is_settled(&self) -> bool {
        self.best.as_ref().is_some_and(|(_, b)| b.has_city())
    }

    fn finish(self) -> VisitorInfo {
        match self.best {
            Some((provider, info)) => {
                info!(provider = %provider, ip = %info.ip, city = %info.city, "visitor info resolved");
                info
            }
            None => {
                info!("no provider answered; using unknown visitor record");
                VisitorInfo::unknown()
            }
        }
    }
}

/// Reduce ordered provider attempts with the selection rule.
pub fn select_best<I>(attempts: I) -> VisitorInfo
where
    I: IntoIterator<Item = Result<VisitorInfo, ProviderUnavailable>>,
{
    let mut selection = Selection::default();
    for (i, attempt) in attempts.into_iter().enumerate() {
        if let Ok(info) = attempt {
            selection.offer(&format!("#{}", i), info);
        }
    }
    selection.finish()
}

/// Queries geolocation providers and returns one canonical record.
pub struct VisitorInfoResolver {
    config: ResolverConfig,
    source: Box<dyn ProviderSource>,
}

impl VisitorInfoResolver {
    /// Create a resolver that talks HTTP to the configured providers.
    pub fn new(config: ResolverConfig, user_agent: &str) -> Self {
        Self::with_source(config, Box::new(HttpSource::new(user_agent)))
    }

    /// Create a resolver with a specific provider source (for testing).
    pub fn with_source(config: ResolverConfig, source: Box<dyn ProviderSource>) -> Self {
        Self { config, source }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve within the configured total budget.
    pub fn resolve(&self) -> VisitorInfo {
        self.resolve_within(self.config.total_budget)
    }

    /// Resolve, never taking much longer than `budget`.
    pub fn resolve_within(&self, budget: Duration) -> VisitorInfo {
        match self.config.fan_out {
            FanOut::Sequential => self.resolve_sequential(budget),
            FanOut::Parallel => self.resolve_parallel(budget),
        }
    }

    fn attempt(
        &self,
        provider: &ProviderDescriptor,
        timeout: Duration,
    ) -> Result<VisitorInfo, ProviderUnavailable> {
        let body = self.source.fetch(provider, timeout)?;
        normalize(&body, &provider.fields)
    }

    fn resolve_sequential(&self, budget: Duration) -> VisitorInfo {
        // A budget too large to add to `now` means no overall bound
        let deadline = Instant::now().checked_add(budget);
        let mut selection = Selection::default();

        for provider in &self.config.providers {
            let timeout = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        debug!(provider = %provider.name, "budget exhausted; skipping remaining providers");
                        break;
                    }
                    remaining.min(self.config.provider_timeout)
                }
                None => self.config.provider_timeout,
            };

            match self.attempt(provider, timeout) {
                Ok(info) => selection.offer(&provider.name, info),
                Err(e) => debug!(provider = %provider.name, error = %e, "provider unavailable"),
            }

            if selection.is_settled() {
                break;
            }
        }

        selection.finish()
    }

    fn resolve_parallel(&self, budget: Duration) -> VisitorInfo {
        let timeout = self.config.provider_timeout.min(budget);
        let providers = &self.config.providers;

        let attempts: Vec<Result<VisitorInfo, ProviderUnavailable>> = thread::scope(|s| {
            let handles: Vec<_> = providers
                .iter()
                .map(|p| s.spawn(move || self.attempt(p, timeout)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(ProviderUnavailable::Network("provider worker panicked".into()))
                    })
                })
                .collect()
        });

        let mut selection = Selection::default();
        for (provider, attempt) in providers.iter().zip(attempts) {
            match attempt {
                Ok(info) => selection.offer(&provider.name, info),
                Err(e) => debug!(provider = %provider.name, error = %e, "provider unavailable"),
            }
        }
        selection.finish()
    }
}
