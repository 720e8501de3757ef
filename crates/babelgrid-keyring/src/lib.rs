//! Credential rotation for the babelgrid dispatch fabric.
//!
//! The [`Keyring`] hands out API credentials subject to per-credential
//! request-per-minute, request-per-day, and token-per-minute limits, all
//! accounted in the shared coordination store so that every instance in the
//! cluster sees the same budget. Limiting is **reactive**: the increment
//! that reaches a limit disables the credential until the window rolls over,
//! rather than reserving budget up front. Failed credentials (quota or auth
//! rejections from the provider) back off exponentially.
//!
//! Counter reads fail open by design. If the store is unreachable the
//! keyring keeps rotating on default scores instead of starving the workers;
//! only the store's own `key_failed`/`key_disabled_until` records are
//! authoritative across instances, and the in-process failed set is a mere
//! hint that is reconciled against the store on every selection.

mod config;
mod credentials;
mod error;
mod score;

pub use config::{KeyringConfig, KeyringConfigBuilder};
pub use credentials::{load_credentials, Credential, RateLimits};
pub use error::KeyringError;

use babelgrid_store::{Store, StoreError};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use score::{compute_score, UsageSnapshot, DEFAULT_SCORE};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86400);

/// The three limit dimensions a credential can be disabled for.
const LIMIT_DIMENSIONS: [&str; 3] = ["RPM", "RPD", "TPM"];

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn rpm_key(id: &str, minute: u64) -> String {
    format!("key_rpm:{id}:{minute}")
}

fn rpd_key(id: &str, day: u64) -> String {
    format!("key_rpd:{id}:{day}")
}

fn tpm_key(id: &str, minute: u64) -> String {
    format!("key_tpm:{id}:{minute}")
}

fn success_key(id: &str) -> String {
    format!("key_success:{id}")
}

fn errors_key(id: &str) -> String {
    format!("key_errors:{id}")
}

fn failed_key(id: &str) -> String {
    format!("key_failed:{id}")
}

fn failures_key(id: &str) -> String {
    format!("key_failures:{id}")
}

fn disabled_key(id: &str, dimension: &str) -> String {
    format!("key_disabled_until:{id}:{dimension}")
}

/// Exponential backoff for a credential that failed `failures` times:
/// `base * 3^(failures - 1)`, capped.
fn failure_backoff(base: Duration, failures: u32, cap: Duration) -> Duration {
    let exp = failures.saturating_sub(1).min(12);
    let mult = 3u32.checked_pow(exp).unwrap_or(u32::MAX);
    base.checked_mul(mult).unwrap_or(cap).min(cap)
}

fn pick_weighted<R: Rng>(scored: &[(usize, f64)], rng: &mut R) -> usize {
    if scored.len() == 1 {
        return 0;
    }
    // Jitter keeps a slightly-worse key in rotation instead of hammering the
    // single best one.
    let weights: Vec<f64> = scored
        .iter()
        .map(|(_, score)| score + rng.gen_range(0.1..0.3))
        .collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0,
    }
}

/// Per-key status snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub id: String,
    pub score: f64,
    pub available: bool,
    pub disabled: bool,
    pub failed: bool,
}

/// Aggregate keyring status.
#[derive(Debug, Clone, Serialize)]
pub struct KeyringStats {
    pub total_keys: usize,
    pub failed_keys: usize,
    pub keys: Vec<KeyStatus>,
}

/// Cluster-facing view of remaining rotation capacity, used by the scaler.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RotationCapacity {
    /// Credentials that are neither failed nor disabled on any dimension.
    pub available_keys: u64,
    /// Sum of the per-minute request limits of the available credentials.
    pub total_rpm: u64,
}

/// Selects credentials by score, accounts usage, and disables reactively.
pub struct Keyring {
    store: Arc<dyn Store>,
    keys: Vec<Credential>,
    failed: Mutex<HashSet<String>>,
    config: KeyringConfig,
}

impl Keyring {
    pub fn new(store: Arc<dyn Store>, keys: Vec<Credential>, config: KeyringConfig) -> Self {
        if keys.is_empty() {
            tracing::warn!("keyring constructed with no credentials");
        }
        Self {
            store,
            keys,
            failed: Mutex::new(HashSet::new()),
            config,
        }
    }

    /// Loads credentials from a YAML file and builds the keyring.
    pub fn from_file(
        store: Arc<dyn Store>,
        path: &Path,
        config: KeyringConfig,
    ) -> Result<Self, KeyringError> {
        let keys = load_credentials(path, config.default_limits())?;
        Ok(Self::new(store, keys, config))
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Picks an available credential, best scores first.
    ///
    /// Returns `None` when every credential is failed or disabled; callers
    /// treat that as "no capacity right now" rather than an error.
    pub async fn select(&self) -> Option<Credential> {
        if self.keys.is_empty() {
            tracing::error!("no API keys configured");
            return None;
        }

        self.reconcile_failed().await;

        let failed = self.failed.lock().unwrap().clone();
        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (index, cred) in self.keys.iter().enumerate() {
            if failed.contains(&cred.id) {
                continue;
            }
            if self.is_disabled(&cred.id).await {
                continue;
            }
            let score = match self.usage_snapshot(&cred.id).await {
                Ok(usage) => compute_score(usage, cred.limits),
                Err(err) => {
                    tracing::debug!(key = %cred.id, error = %err, "counter read failed, scoring with default");
                    DEFAULT_SCORE
                }
            };
            scored.push((index, score));
        }

        if scored.is_empty() {
            tracing::warn!("all API keys are failed or disabled");
            return None;
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.selection_pool);

        let mut rng = rand::thread_rng();
        let picked = pick_weighted(&scored, &mut rng);
        let (index, score) = scored[picked];
        tracing::debug!(key = %self.keys[index].id, score, "selected credential");
        Some(self.keys[index].clone())
    }

    /// Records one request (and `tokens_used` tokens) against `cred`, then
    /// disables it for any window whose limit the increment reached.
    ///
    /// Returns `false` iff this call disabled the credential. Store failures
    /// leave the credential available.
    pub async fn record_usage(&self, cred: &Credential, tokens_used: u64) -> bool {
        let now = now_unix();
        let minute = now / 60;
        let day = now / 86400;

        let outcome: Result<bool, StoreError> = async {
            self.store.incr(&rpm_key(&cred.id, minute), Some(MINUTE)).await?;
            self.store.incr(&rpd_key(&cred.id, day), Some(DAY)).await?;
            if tokens_used > 0 {
                let tpm = tpm_key(&cred.id, minute);
                self.store.incr_by(&tpm, tokens_used as i64).await?;
                self.store.expire(&tpm, MINUTE).await?;
            }

            // Reread after the increment: the disable is reactive, so the
            // call that reached the limit is the one that trips it.
            let counters = self
                .store
                .mget(&[
                    rpm_key(&cred.id, minute),
                    rpd_key(&cred.id, day),
                    tpm_key(&cred.id, minute),
                ])
                .await?;
            let parse = |value: Option<&String>| -> u64 {
                value.and_then(|s| s.parse().ok()).unwrap_or(0)
            };
            let rpm_count = parse(counters.first().and_then(|v| v.as_ref()));
            let rpd_count = parse(counters.get(1).and_then(|v| v.as_ref()));
            let tpm_count = parse(counters.get(2).and_then(|v| v.as_ref()));

            let mut disabled = false;
            if rpm_count >= cred.limits.requests_per_minute as u64 {
                self.disable_until(&cred.id, "RPM", (minute + 1) * 60).await;
                tracing::warn!(
                    key = %cred.id,
                    used = rpm_count,
                    limit = cred.limits.requests_per_minute,
                    "key disabled until next minute: RPM limit reached"
                );
                disabled = true;
            }
            if rpd_count >= cred.limits.requests_per_day as u64 {
                self.disable_until(&cred.id, "RPD", (day + 1) * 86400).await;
                tracing::warn!(
                    key = %cred.id,
                    used = rpd_count,
                    limit = cred.limits.requests_per_day,
                    "key disabled until next day: RPD limit reached"
                );
                disabled = true;
            }
            if tokens_used > 0 && tpm_count >= cred.limits.tokens_per_minute {
                self.disable_until(&cred.id, "TPM", (minute + 1) * 60).await;
                tracing::warn!(
                    key = %cred.id,
                    used = tpm_count,
                    limit = cred.limits.tokens_per_minute,
                    "key disabled until next minute: TPM limit reached"
                );
                disabled = true;
            }

            let _ = self
                .store
                .incr(&success_key(&cred.id), Some(self.config.metrics_window))
                .await;
            Ok(disabled)
        }
        .await;

        match outcome {
            Ok(disabled) => !disabled,
            Err(err) => {
                tracing::warn!(key = %cred.id, error = %err, "usage accounting failed, keeping key available");
                let _ = self
                    .store
                    .incr(&errors_key(&cred.id), Some(self.config.metrics_window))
                    .await;
                true
            }
        }
    }

    /// Marks `cred` failed with exponential backoff starting at `base`.
    ///
    /// The provider adapter passes 600s for quota/rate rejections and 3600s
    /// for auth rejections.
    pub async fn mark_failed(&self, cred: &Credential, base: Duration) {
        self.failed.lock().unwrap().insert(cred.id.clone());

        let failures = self
            .store
            .get(&failures_key(&cred.id))
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0)
            .saturating_add(1);
        let backoff = failure_backoff(base, failures, self.config.failure_backoff_cap);

        let _ = self
            .store
            .set(&failed_key(&cred.id), &failures.to_string(), Some(backoff))
            .await;
        let _ = self
            .store
            .set(
                &failures_key(&cred.id),
                &failures.to_string(),
                Some(self.config.failure_window),
            )
            .await;
        let _ = self
            .store
            .incr(&errors_key(&cred.id), Some(self.config.metrics_window))
            .await;

        tracing::warn!(
            key = %cred.id,
            attempt = failures,
            backoff_s = backoff.as_secs(),
            "key marked failed"
        );
    }

    /// Remaining rotation capacity for the cluster scaler. Store errors fall
    /// open: an unreadable key is counted as available so a flaky store does
    /// not scale the cluster to zero.
    pub async fn capacity(&self) -> RotationCapacity {
        let mut available_keys = 0u64;
        let mut total_rpm = 0u64;
        for cred in &self.keys {
            if self
                .store
                .exists(&failed_key(&cred.id))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            if self.is_disabled(&cred.id).await {
                continue;
            }
            available_keys += 1;
            total_rpm += cred.limits.requests_per_minute as u64;
        }
        RotationCapacity {
            available_keys,
            total_rpm,
        }
    }

    /// Per-key status for monitoring.
    pub async fn stats(&self) -> KeyringStats {
        let failed = self.failed.lock().unwrap().clone();
        let mut keys = Vec::with_capacity(self.keys.len());
        for cred in &self.keys {
            let disabled = self.is_disabled(&cred.id).await;
            let is_failed = failed.contains(&cred.id)
                || self
                    .store
                    .exists(&failed_key(&cred.id))
                    .await
                    .unwrap_or(false);
            let score = match self.usage_snapshot(&cred.id).await {
                Ok(usage) => compute_score(usage, cred.limits),
                Err(_) => DEFAULT_SCORE,
            };
            keys.push(KeyStatus {
                id: cred.id.clone(),
                score: (score * 1000.0).round() / 1000.0,
                available: !disabled && !is_failed,
                disabled,
                failed: is_failed,
            });
        }
        KeyringStats {
            total_keys: self.keys.len(),
            failed_keys: keys.iter().filter(|k| k.failed).count(),
            keys,
        }
    }

    /// Drops entries from the in-memory failed set whose store-side backoff
    /// has expired. The store record is authoritative; the local set only
    /// saves a read per selection.
    async fn reconcile_failed(&self) {
        let snapshot: Vec<String> = self.failed.lock().unwrap().iter().cloned().collect();
        if snapshot.is_empty() {
            return;
        }
        let mut recovered = Vec::new();
        for id in snapshot {
            let still_failed = self.store.exists(&failed_key(&id)).await.unwrap_or(false);
            if !still_failed {
                recovered.push(id);
            }
        }
        if !recovered.is_empty() {
            let mut failed = self.failed.lock().unwrap();
            for id in &recovered {
                failed.remove(id);
            }
            tracing::info!(keys = ?recovered, "keys recovered from failure backoff");
        }
    }

    async fn is_disabled(&self, id: &str) -> bool {
        let keys: Vec<String> = LIMIT_DIMENSIONS
            .iter()
            .map(|dim| disabled_key(id, dim))
            .collect();
        match self.store.mget(&keys).await {
            Ok(values) => {
                let now = now_unix();
                values
                    .iter()
                    .flatten()
                    .any(|v| v.parse::<u64>().map_or(false, |until| now < until))
            }
            Err(err) => {
                tracing::debug!(key = %id, error = %err, "disable check failed, treating key as enabled");
                false
            }
        }
    }

    async fn usage_snapshot(&self, id: &str) -> Result<UsageSnapshot, StoreError> {
        let now = now_unix();
        let minute = now / 60;
        let day = now / 86400;
        let values = self
            .store
            .mget(&[
                rpm_key(id, minute),
                rpd_key(id, day),
                tpm_key(id, minute),
                success_key(id),
                errors_key(id),
            ])
            .await?;
        let parse = |value: Option<&Option<String>>| -> u64 {
            value
                .and_then(|v| v.as_deref())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };
        Ok(UsageSnapshot {
            rpm_used: parse(values.first()),
            rpd_used: parse(values.get(1)),
            tpm_used: parse(values.get(2)),
            success: parse(values.get(3)),
            errors: parse(values.get(4)),
        })
    }

    async fn disable_until(&self, id: &str, dimension: &str, until: u64) {
        let ttl = until.saturating_sub(now_unix());
        if ttl == 0 {
            return;
        }
        if let Err(err) = self
            .store
            .set(
                &disabled_key(id, dimension),
                &until.to_string(),
                Some(Duration::from_secs(ttl)),
            )
            .await
        {
            tracing::error!(key = %id, dimension, error = %err, "failed to persist key disable");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use babelgrid_store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn limits(rpm: u32, rpd: u32, tpm: u64) -> RateLimits {
        RateLimits {
            requests_per_minute: rpm,
            requests_per_day: rpd,
            tokens_per_minute: tpm,
        }
    }

    fn credential(id: &str, l: RateLimits) -> Credential {
        Credential {
            id: id.to_string(),
            api_key: format!("secret-{id}"),
            limits: l,
        }
    }

    fn keyring(keys: Vec<Credential>) -> Keyring {
        Keyring::new(
            Arc::new(MemoryStore::new()),
            keys,
            KeyringConfig::default(),
        )
    }

    #[test]
    fn test_failure_backoff_grows_then_caps() {
        let base = Duration::from_secs(600);
        let cap = Duration::from_secs(7200);
        assert_eq!(failure_backoff(base, 1, cap), Duration::from_secs(600));
        assert_eq!(failure_backoff(base, 2, cap), Duration::from_secs(1800));
        assert_eq!(failure_backoff(base, 3, cap), Duration::from_secs(5400));
        assert_eq!(failure_backoff(base, 4, cap), cap);
        assert_eq!(failure_backoff(base, 40, cap), cap);
    }

    #[test]
    fn test_pick_weighted_single_candidate() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_weighted(&[(4, 0.9)], &mut rng), 0);
    }

    #[test]
    fn test_pick_weighted_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let scored = vec![(0, 0.9), (1, 0.5), (2, 0.1)];
        for _ in 0..100 {
            assert!(pick_weighted(&scored, &mut rng) < scored.len());
        }
    }

    #[tokio::test]
    async fn test_select_with_no_keys_is_none() {
        let ring = keyring(Vec::new());
        assert!(ring.select().await.is_none());
    }

    #[tokio::test]
    async fn test_select_returns_a_configured_key() {
        let ring = keyring(vec![
            credential("a", limits(10, 100, 1000)),
            credential("b", limits(10, 100, 1000)),
        ]);
        let picked = ring.select().await.unwrap();
        assert!(picked.id == "a" || picked.id == "b");
    }

    #[tokio::test]
    async fn test_record_usage_disables_at_rpm_limit() {
        let ring = keyring(vec![credential("a", limits(2, 100, 1000))]);
        let cred = ring.select().await.unwrap();

        assert!(ring.record_usage(&cred, 0).await);
        // The increment that reaches the limit disables reactively.
        assert!(!ring.record_usage(&cred, 0).await);
        assert!(ring.select().await.is_none());
    }

    #[tokio::test]
    async fn test_record_usage_disables_at_token_limit() {
        let ring = keyring(vec![credential("a", limits(100, 1000, 50))]);
        let cred = ring.select().await.unwrap();

        assert!(ring.record_usage(&cred, 30).await);
        assert!(!ring.record_usage(&cred, 30).await);
        assert!(ring.select().await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_key_skipped_but_others_selectable() {
        let ring = keyring(vec![
            credential("tiny", limits(1, 100, 1000)),
            credential("big", limits(100, 1000, 100_000)),
        ]);
        let tiny = credential("tiny", limits(1, 100, 1000));
        assert!(!ring.record_usage(&tiny, 0).await);

        for _ in 0..10 {
            let picked = ring.select().await.unwrap();
            assert_eq!(picked.id, "big");
        }
    }

    #[tokio::test]
    async fn test_mark_failed_excludes_key_until_backoff_expires() {
        let ring = keyring(vec![credential("a", limits(10, 100, 1000))]);
        let cred = ring.select().await.unwrap();

        ring.mark_failed(&cred, Duration::from_millis(40)).await;
        assert!(ring.select().await.is_none());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(ring.select().await.is_some());
    }

    #[tokio::test]
    async fn test_capacity_excludes_failed_and_disabled() {
        let ring = keyring(vec![
            credential("a", limits(10, 100, 1000)),
            credential("b", limits(20, 100, 1000)),
            credential("c", limits(1, 100, 1000)),
        ]);
        let all = ring.capacity().await;
        assert_eq!(all.available_keys, 3);
        assert_eq!(all.total_rpm, 31);

        ring.mark_failed(&credential("a", limits(10, 100, 1000)), Duration::from_secs(60))
            .await;
        let _ = ring
            .record_usage(&credential("c", limits(1, 100, 1000)), 0)
            .await;

        let remaining = ring.capacity().await;
        assert_eq!(remaining.available_keys, 1);
        assert_eq!(remaining.total_rpm, 20);
    }

    #[tokio::test]
    async fn test_stats_reports_every_key() {
        let ring = keyring(vec![
            credential("a", limits(10, 100, 1000)),
            credential("b", limits(10, 100, 1000)),
        ]);
        ring.mark_failed(&credential("b", limits(10, 100, 1000)), Duration::from_secs(60))
            .await;

        let stats = ring.stats().await;
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.failed_keys, 1);
        let a = stats.keys.iter().find(|k| k.id == "a").unwrap();
        assert!(a.available && !a.failed && !a.disabled);
        let b = stats.keys.iter().find(|k| k.id == "b").unwrap();
        assert!(!b.available && b.failed);
    }
}
