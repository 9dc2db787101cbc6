use postwatch_core::QuotaState;
use std::time::Duration;

/// Items per page at which the low-yield penalty reaches one full unit.
const PENALTY_SCALE: f64 = 100.0;

/// Inter-page delay: share of the remaining quota window per active loop,
/// plus a penalty for pages that produced little.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayPolicy {
    pub min_spacing: Duration,
    pub low_yield_penalty: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(1500),
            low_yield_penalty: Duration::from_secs(15),
        }
    }
}

impl DelayPolicy {
    pub fn next_delay(
        &self,
        quota: &QuotaState,
        active_loops: usize,
        page_size: u32,
        emitted: usize,
    ) -> Duration {
        let remaining = quota.remaining.max(1.0);
        let loops = active_loops.max(1) as f64;
        let quota_share = (quota.reset_seconds as f64 / remaining / loops).max(0.0);

        let shortfall = (page_size as usize).saturating_sub(emitted) as f64 / PENALTY_SCALE;
        let penalty = shortfall * self.low_yield_penalty.as_secs_f64();

        let total = quota_share + penalty;
        if !total.is_finite() {
            return self.min_spacing;
        }
        Duration::from_secs_f64(total).max(self.min_spacing)
    }
}
