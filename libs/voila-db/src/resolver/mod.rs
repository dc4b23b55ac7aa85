//! Cached, retried, circuit-broken resolution of organization id → URL.
//!
//! The resolver is the fault-tolerance boundary of the router: user hooks may
//! be slow, flaky, or wrong, and none of that reaches callers. Every resolve
//! produces a usable URL — from the cache, from the hook, from the base-URL
//! template, or (last) from the configured emergency fallback. Hook failures
//! feed a per-org circuit breaker that short-circuits to the template until a
//! success closes it.

mod metrics;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::ident::OrgId;
use crate::urls;
use crate::Result;

pub use metrics::ResolverMetricsSnapshot;
use metrics::ResolverMetrics;

/// Upper bound on cached org URLs.
pub const MAX_CACHE_SIZE: usize = 1000;

/// Consecutive hook failures that open an org's circuit.
pub const FAILURE_THRESHOLD: u32 = 5;

/// TTL for template-fallback entries so recovery is probed soon.
const FALLBACK_TTL: Duration = Duration::from_secs(60);

/// Per-attempt budget for one hook invocation.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

// Delays between attempts: 100 ms, 200 ms, 400 ms.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u32 = 4;

/// Failure records idle longer than this are purged by the sweeper.
const FAILURE_RECORD_TTL: Duration = Duration::from_secs(3600);

/// User-supplied organization URL resolution.
///
/// Implementations may be arbitrarily slow or failing; the resolver imposes
/// timeouts, retries and fallbacks around every call.
#[async_trait]
pub trait OrgUrlHook: Send + Sync {
    /// Map an organization id to a database URL.
    ///
    /// # Errors
    /// Any error is treated as a transient resolution failure.
    async fn resolve(&self, org: &OrgId) -> anyhow::Result<String>;

    /// Enumerate known organizations, when the backing source supports it.
    ///
    /// # Errors
    /// Errors are treated as "listing unavailable".
    async fn list(&self) -> anyhow::Result<Option<Vec<String>>> {
        Ok(None)
    }
}

/// Where a resolved URL came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UrlSource {
    Resolver,
    Template,
    Emergency,
}

/// A resolved URL plus its provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: String,
    pub source: UrlSource,
}

#[derive(Clone, Debug)]
struct UrlCacheEntry {
    url: String,
    source: UrlSource,
    expires_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

#[derive(Clone, Debug, Default)]
struct FailureRecord {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_error: String,
    manually_opened: bool,
}

impl FailureRecord {
    fn is_open(&self) -> bool {
        self.manually_opened || self.consecutive_failures >= FAILURE_THRESHOLD
    }
}

/// Resolver configuration, derived from [`crate::RouterConfig`].
#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Base URL (template) used for fallbacks; may contain `{org}`.
    pub base_url: String,
    /// TTL for hook-resolved entries.
    pub cache_ttl: Duration,
    /// Emergency fallback template with `{org}` placeholder.
    pub emergency_url_template: String,
}

/// Cached, retried, circuit-broken org-id → URL resolution.
pub struct OrgUrlResolver {
    options: ResolverOptions,
    hook: Option<Arc<dyn OrgUrlHook>>,
    cache: DashMap<OrgId, UrlCacheEntry>,
    failures: DashMap<OrgId, FailureRecord>,
    metrics: ResolverMetrics,
}

impl OrgUrlResolver {
    #[must_use]
    pub fn new(options: ResolverOptions, hook: Option<Arc<dyn OrgUrlHook>>) -> Self {
        Self {
            options,
            hook,
            cache: DashMap::new(),
            failures: DashMap::new(),
            metrics: ResolverMetrics::default(),
        }
    }

    /// Resolve a raw organization id.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidId`] for a malformed id. Hook failures
    /// never error: they degrade to template or emergency fallbacks.
    pub async fn resolve(&self, org: &str) -> Result<ResolvedUrl> {
        let org = OrgId::parse(org)?;
        Ok(self.resolve_org(&org).await)
    }

    /// Resolve an already-validated organization id. Infallible: the caller
    /// always receives a URL.
    pub async fn resolve_org(&self, org: &OrgId) -> ResolvedUrl {
        let started = Instant::now();
        self.metrics
            .total_resolves
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if self.circuit_open(org) {
            self.metrics
                .circuit_breaker_trips
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::warn!(
                target: "org_resolver",
                org = %org,
                "circuit open; serving template fallback"
            );
            let resolved = self.template_fallback(org);
            self.metrics
                .record_resolve_time(elapsed_ms(started));
            return resolved;
        }

        if let Some(hit) = self.cache_probe(org) {
            self.metrics
                .record_resolve_time(elapsed_ms(started));
            return hit;
        }

        let resolved = self.resolve_uncached(org).await;
        self.metrics.record_resolve_time(elapsed_ms(started));
        resolved
    }

    fn cache_probe(&self, org: &OrgId) -> Option<ResolvedUrl> {
        let now = Instant::now();
        if let Some(mut entry) = self.cache.get_mut(org)
            && entry.expires_at > now
        {
            entry.last_accessed = now;
            entry.access_count += 1;
            self.metrics
                .cache_hits
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(target: "org_resolver", org = %org, "cache hit");
            return Some(ResolvedUrl {
                url: entry.url.clone(),
                source: entry.source,
            });
        }
        self.metrics
            .cache_misses
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        None
    }

    async fn resolve_uncached(&self, org: &OrgId) -> ResolvedUrl {
        let Some(hook) = self.hook.clone() else {
            // No hook configured: the template is the canonical source.
            let resolved = self.template_fallback(org);
            if resolved.source == UrlSource::Template {
                self.cache_insert(org, &resolved, self.options.cache_ttl);
            }
            return resolved;
        };

        match self.attempt_hook(&*hook, org).await {
            Ok(url) => {
                if urls::detect_kind(&url).is_ok() {
                    self.record_success(org);
                    let resolved = ResolvedUrl {
                        url,
                        source: UrlSource::Resolver,
                    };
                    self.cache_insert(org, &resolved, self.options.cache_ttl);
                    tracing::info!(
                        target: "org_resolver",
                        org = %org,
                        "hook resolved organization URL"
                    );
                    return resolved;
                }
                // A malformed URL must never reach the cache.
                tracing::warn!(
                    target: "org_resolver",
                    org = %org,
                    url = urls::redact_credentials(&url),
                    "hook returned a malformed URL; falling back"
                );
                self.record_failure(org, "hook returned a malformed URL");
            }
            Err(last_error) => {
                self.record_failure(org, &last_error);
                tracing::warn!(
                    target: "org_resolver",
                    org = %org,
                    error = last_error,
                    "hook resolution failed after retries; serving template fallback"
                );
            }
        }

        let resolved = self.template_fallback(org);
        if resolved.source == UrlSource::Template {
            // Short TTL so recovery is probed soon.
            self.cache_insert(org, &resolved, FALLBACK_TTL);
        }
        resolved
    }

    /// Invoke the hook with exponential backoff, racing every attempt
    /// against [`ATTEMPT_TIMEOUT`]. Dropping the returned future abandons
    /// the in-flight attempt; nothing is cached on cancellation.
    async fn attempt_hook(
        &self,
        hook: &dyn OrgUrlHook,
        org: &OrgId,
    ) -> std::result::Result<String, String> {
        let mut delay = BACKOFF_BASE;
        let mut last_error = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            match tokio::time::timeout(ATTEMPT_TIMEOUT, hook.resolve(org)).await {
                Ok(Ok(url)) => return Ok(url),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("attempt timed out after {ATTEMPT_TIMEOUT:?}"),
            }
            tracing::debug!(
                target: "org_resolver",
                org = %org,
                attempt,
                error = last_error,
                "hook attempt failed"
            );
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }
        Err(last_error)
    }

    /// Build the template fallback for an org, degrading to the emergency
    /// URL when even the template is unusable.
    fn template_fallback(&self, org: &OrgId) -> ResolvedUrl {
        match urls::build_org_url(&self.options.base_url, Some(org)) {
            Ok(url) => ResolvedUrl {
                url,
                source: UrlSource::Template,
            },
            Err(err) => {
                let url = self
                    .options
                    .emergency_url_template
                    .replace(urls::ORG_PLACEHOLDER, org.as_str());
                tracing::error!(
                    target: "org_resolver",
                    org = %org,
                    error = %err,
                    url = urls::redact_credentials(&url),
                    "template fallback unusable; serving emergency URL"
                );
                ResolvedUrl {
                    url,
                    source: UrlSource::Emergency,
                }
            }
        }
    }

    fn cache_insert(&self, org: &OrgId, resolved: &ResolvedUrl, ttl: Duration) {
        if self.cache.len() >= MAX_CACHE_SIZE && !self.cache.contains_key(org) {
            self.evict_tail();
        }
        let now = Instant::now();
        self.cache.insert(
            org.clone(),
            UrlCacheEntry {
                url: resolved.url.clone(),
                source: resolved.source,
                expires_at: now + ttl,
                last_accessed: now,
                access_count: 1,
            },
        );
    }

    /// Evict the least-recently-accessed 10% of the cache.
    fn evict_tail(&self) {
        let mut entries: Vec<(OrgId, Instant)> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed))
            .collect();
        entries.sort_by_key(|(_, accessed)| *accessed);
        let evict = (entries.len() / 10).max(1);
        for (org, _) in entries.into_iter().take(evict) {
            self.cache.remove(&org);
        }
        tracing::debug!(target: "org_resolver", evicted = evict, "evicted cache tail");
    }

    fn record_success(&self, org: &OrgId) {
        self.metrics
            .resolver_successes
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        // Any success closes the circuit.
        self.failures.remove(org);
    }

    fn record_failure(&self, org: &OrgId, error: &str) {
        self.metrics
            .resolver_failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut record = self.failures.entry(org.clone()).or_default();
        record.consecutive_failures += 1;
        record.last_failure_at = Some(Instant::now());
        record.last_error = error.to_owned();
        if record.is_open() {
            tracing::warn!(
                target: "org_resolver",
                org = %org,
                failures = record.consecutive_failures,
                last_error = %record.last_error,
                "circuit opened"
            );
        }
    }

    /// Whether the per-org circuit is currently open.
    #[must_use]
    pub fn circuit_open(&self, org: &OrgId) -> bool {
        self.failures.get(org).is_some_and(|r| r.is_open())
    }

    /// Force an org's circuit open (test and operations support).
    pub fn open_circuit(&self, org: &OrgId) {
        let mut record = self.failures.entry(org.clone()).or_default();
        record.manually_opened = true;
        record.last_failure_at = Some(Instant::now());
    }

    /// Force an org's circuit closed.
    pub fn close_circuit(&self, org: &OrgId) {
        self.failures.remove(org);
    }

    /// Drop an org's cached URL (e.g. after org deletion).
    pub fn invalidate(&self, org: &OrgId) {
        self.cache.remove(org);
    }

    /// Remove failure records that have been idle for over an hour.
    pub fn purge_stale_failures(&self) {
        let now = Instant::now();
        self.failures.retain(|_, record| {
            record.manually_opened
                || record
                    .last_failure_at
                    .is_none_or(|at| now.duration_since(at) < FAILURE_RECORD_TTL)
        });
    }

    /// Spawn a periodic sweeper for stale failure records. The task stops
    /// when the resolver is dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(resolver) = weak.upgrade() else {
                    break;
                };
                resolver.purge_stale_failures();
            }
        })
    }

    /// Organizations currently present in the URL cache.
    #[must_use]
    pub fn cached_orgs(&self) -> Vec<OrgId> {
        self.cache.iter().map(|e| e.key().clone()).collect()
    }

    /// Best-effort enumeration: cached orgs plus whatever the hook can list.
    pub async fn list_orgs(&self) -> Vec<OrgId> {
        let mut orgs = self.cached_orgs();
        if let Some(hook) = &self.hook
            && let Ok(Some(listed)) = hook.list().await
        {
            for raw in listed {
                if let Ok(org) = OrgId::parse(&raw)
                    && !orgs.contains(&org)
                {
                    orgs.push(org);
                }
            }
        }
        orgs.sort();
        orgs
    }

    /// Point-in-time metrics, with the `top_n` most-accessed orgs.
    #[must_use]
    pub fn metrics_snapshot(&self, top_n: usize) -> ResolverMetricsSnapshot {
        let mut by_access: Vec<(String, u64)> = self
            .cache
            .iter()
            .map(|e| (e.key().to_string(), e.value().access_count))
            .collect();
        by_access.sort_by(|a, b| b.1.cmp(&a.1));
        by_access.truncate(top_n);

        let open_circuits = self
            .failures
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.key().to_string())
            .collect();

        ResolverMetricsSnapshot::from_counters(
            &self.metrics,
            self.cache.len(),
            by_access,
            open_circuits,
        )
    }

    /// Number of cached URLs (test support).
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for OrgUrlResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgUrlResolver")
            .field("cache_size", &self.cache.len())
            .field("has_hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

// ===================== tests =====================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn org(s: &str) -> OrgId {
        OrgId::parse(s).unwrap()
    }

    fn options(base: &str) -> ResolverOptions {
        ResolverOptions {
            base_url: base.to_owned(),
            cache_ttl: Duration::from_secs(300),
            emergency_url_template: crate::config::DEFAULT_EMERGENCY_URL_TEMPLATE.to_owned(),
        }
    }

    /// Hook that fails `failures` times, then succeeds.
    struct FlakyHook {
        calls: AtomicU32,
        failures: u32,
        url: String,
    }

    impl FlakyHook {
        fn new(failures: u32, url: &str) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                url: url.to_owned(),
            }
        }
    }

    #[async_trait]
    impl OrgUrlHook for FlakyHook {
        async fn resolve(&self, _org: &OrgId) -> anyhow::Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("resolver backend unavailable");
            }
            Ok(self.url.clone())
        }
    }

    struct StaticHook(String);

    #[async_trait]
    impl OrgUrlHook for StaticHook {
        async fn resolve(&self, org: &OrgId) -> anyhow::Result<String> {
            Ok(self.0.replace("{org}", org.as_str()))
        }

        async fn list(&self) -> anyhow::Result<Option<Vec<String>>> {
            Ok(Some(vec!["listed".to_owned()]))
        }
    }

    #[tokio::test]
    async fn template_is_canonical_without_a_hook() {
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), None);
        let resolved = resolver.resolve("acme").await.unwrap();
        assert_eq!(resolved.url, "postgresql://h/acme");
        assert_eq!(resolved.source, UrlSource::Template);

        // Second resolve is a cache hit.
        let _ = resolver.resolve("acme").await.unwrap();
        let snapshot = resolver.metrics_snapshot(5);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.total_resolves, 2);
    }

    #[tokio::test]
    async fn invalid_id_is_rejected_before_any_work() {
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), None);
        let err = resolver.resolve("not valid!").await.unwrap_err();
        assert!(matches!(err, crate::Error::InvalidId { .. }));
        assert_eq!(resolver.metrics_snapshot(5).total_resolves, 0);
    }

    #[tokio::test]
    async fn hook_success_is_cached_with_resolver_source() {
        let hook = Arc::new(StaticHook("postgresql://dyn/{org}".to_owned()));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook));
        let resolved = resolver.resolve_org(&org("acme")).await;
        assert_eq!(resolved.url, "postgresql://dyn/acme");
        assert_eq!(resolved.source, UrlSource::Resolver);

        let again = resolver.resolve_org(&org("acme")).await;
        assert_eq!(again.source, UrlSource::Resolver);
        assert_eq!(resolver.metrics_snapshot(5).resolver_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_then_succeeds() {
        let hook = Arc::new(FlakyHook::new(2, "postgresql://dyn/db"));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook.clone()));
        let resolved = resolver.resolve_org(&org("acme")).await;
        assert_eq!(resolved.source, UrlSource::Resolver);
        assert_eq!(hook.calls.load(Ordering::SeqCst), 3);
        // A success resets the failure record.
        assert!(!resolver.circuit_open(&org("acme")));
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_degrades_to_template() {
        let hook = Arc::new(FlakyHook::new(u32::MAX, "unused"));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook.clone()));
        let resolved = resolver.resolve_org(&org("broken")).await;
        assert_eq!(resolved.url, "postgresql://h/broken");
        assert_eq!(resolved.source, UrlSource::Template);
        // One resolve consumes every attempt and records one failure.
        assert_eq!(hook.calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert_eq!(resolver.metrics_snapshot(5).resolver_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_five_failures_and_skips_the_hook() {
        let hook = Arc::new(FlakyHook::new(u32::MAX, "unused"));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook.clone()));
        let o = org("broken");

        for _ in 0..FAILURE_THRESHOLD {
            // Step past the fallback TTL so every resolve reaches the hook.
            let _ = resolver.resolve_org(&o).await;
            resolver.invalidate(&o);
        }
        assert!(resolver.circuit_open(&o));

        let calls_before = hook.calls.load(Ordering::SeqCst);
        let resolved = resolver.resolve_org(&o).await;
        assert_eq!(resolved.source, UrlSource::Template);
        assert_eq!(hook.calls.load(Ordering::SeqCst), calls_before);
        assert!(resolver.metrics_snapshot(5).circuit_breaker_trips >= 1);

        // Manual close makes the hook reachable again.
        resolver.close_circuit(&o);
        assert!(!resolver.circuit_open(&o));
    }

    #[tokio::test]
    async fn manual_circuit_control() {
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), None);
        let o = org("acme");
        resolver.open_circuit(&o);
        assert!(resolver.circuit_open(&o));
        assert!(resolver
            .metrics_snapshot(5)
            .open_circuits
            .contains(&"acme".to_owned()));
        resolver.close_circuit(&o);
        assert!(!resolver.circuit_open(&o));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_hook_url_never_reaches_the_cache() {
        let hook = Arc::new(StaticHook("redis://not-a-database/{org}".to_owned()));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook));
        let resolved = resolver.resolve_org(&org("acme")).await;
        assert_eq!(resolved.source, UrlSource::Template);
        assert_eq!(resolved.url, "postgresql://h/acme");
        assert_eq!(resolver.metrics_snapshot(5).resolver_failures, 1);
    }

    #[tokio::test]
    async fn emergency_fallback_when_template_is_unusable() {
        // A base URL with no path segment cannot derive a per-org name.
        let resolver = OrgUrlResolver::new(options("postgresql://host-only"), None);
        let resolved = resolver.resolve_org(&org("acme")).await;
        assert_eq!(resolved.source, UrlSource::Emergency);
        assert_eq!(resolved.url, "postgresql://localhost:5432/acme_database");
        // Emergency URLs are never cached.
        assert_eq!(resolver.cache_size(), 0);
    }

    #[tokio::test]
    async fn cache_never_exceeds_the_bound() {
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), None);
        for i in 0..(MAX_CACHE_SIZE + 50) {
            let o = org(&format!("org{i}"));
            let _ = resolver.resolve_org(&o).await;
            assert!(resolver.cache_size() <= MAX_CACHE_SIZE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_entries_expire_quickly() {
        let hook = Arc::new(FlakyHook::new(MAX_ATTEMPTS, "postgresql://dyn/db"));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook));
        let o = org("acme");

        let first = resolver.resolve_org(&o).await;
        assert_eq!(first.source, UrlSource::Template);

        // Within the short TTL the fallback is served from cache.
        let cached = resolver.resolve_org(&o).await;
        assert_eq!(cached.source, UrlSource::Template);

        // After the fallback TTL the hook (now healthy) is probed again.
        tokio::time::advance(FALLBACK_TTL + Duration::from_secs(1)).await;
        let recovered = resolver.resolve_org(&o).await;
        assert_eq!(recovered.source, UrlSource::Resolver);
        assert_eq!(recovered.url, "postgresql://dyn/db");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_failures_are_purged() {
        let hook = Arc::new(FlakyHook::new(u32::MAX, "unused"));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook));
        let o = org("flaky");
        let _ = resolver.resolve_org(&o).await;
        assert_eq!(resolver.metrics_snapshot(5).resolver_failures, 1);

        tokio::time::advance(FAILURE_RECORD_TTL + Duration::from_secs(1)).await;
        resolver.purge_stale_failures();
        assert!(!resolver.circuit_open(&o));
        // Manually opened circuits survive the sweep.
        resolver.open_circuit(&o);
        tokio::time::advance(FAILURE_RECORD_TTL + Duration::from_secs(1)).await;
        resolver.purge_stale_failures();
        assert!(resolver.circuit_open(&o));
    }

    #[tokio::test]
    async fn list_orgs_merges_cache_and_hook() {
        let hook = Arc::new(StaticHook("postgresql://dyn/{org}".to_owned()));
        let resolver = OrgUrlResolver::new(options("postgresql://h/{org}"), Some(hook));
        let _ = resolver.resolve_org(&org("cached")).await;
        let orgs = resolver.list_orgs().await;
        assert!(orgs.contains(&org("cached")));
        assert!(orgs.contains(&org("listed")));
    }
}
