use crate::RateLimits;

/// Score a candidate falls back to when its counters cannot be read.
pub(crate) const DEFAULT_SCORE: f64 = 0.5;

/// Counter values for one credential, read in a single batched fetch.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UsageSnapshot {
    pub rpm_used: u64,
    pub rpd_used: u64,
    pub tpm_used: u64,
    pub success: u64,
    pub errors: u64,
}

/// Combines remaining capacity and observed performance into a selection
/// score in `[0, 1]`.
///
/// Capacity weights RPM and TPM over RPD because the minute windows are the
/// ones that actually gate a burst; performance rewards success rate and
/// penalizes the error share with a dampened denominator so a single early
/// error does not crater a fresh key.
pub(crate) fn compute_score(usage: UsageSnapshot, limits: RateLimits) -> f64 {
    let cap = |used: u64, limit: u64| -> f64 {
        let limit = limit.max(1) as f64;
        ((limit - used as f64) / limit).max(0.0)
    };

    let rpm_cap = cap(usage.rpm_used, limits.requests_per_minute as u64);
    let rpd_cap = cap(usage.rpd_used, limits.requests_per_day as u64);
    let tpm_cap = cap(usage.tpm_used, limits.tokens_per_minute);
    let capacity = rpm_cap * 0.4 + rpd_cap * 0.2 + tpm_cap * 0.4;

    let total = usage.success + usage.errors;
    let success_rate = usage.success as f64 / (total.max(1)) as f64;
    let error_penalty = usage.errors as f64 / (total + 10) as f64;
    let performance = success_rate * 0.7 - error_penalty * 0.3;

    (capacity * 0.6 + performance * 0.4).clamp(0.0, 1.0)
}
