//! Max-min fair-share controller for shared CPU binding.
//!
//! Active child units request integer vCPU counts; shares are computed
//! by water-filling over the node's total capacity and applied as CPU
//! quota percentages. Recomputation happens on every admission and
//! every completion.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use crate::Result;

/// Water-filling level λ for integer requests against capacity `c`.
///
/// Walks the sorted requests; at step k with `remaining` unsatisfied
/// units, `λ = (c - prefix) / remaining`. The first λ not exceeding the
/// current request is the level; otherwise every request is satisfied
/// and the largest request is returned.
pub fn waterfill_lambda(requests: &[f64], c: f64) -> f64 {
    let c = c.max(0.0);
    let mut sorted: Vec<f64> = requests.iter().map(|r| r.max(0.0)).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let mut prefix = 0.0;
    for (k, req) in sorted.iter().enumerate() {
        let remaining = (n - k) as f64;
        let lambda = (c - prefix) / remaining;
        if lambda <= *req {
            return lambda.max(0.0);
        }
        prefix += req;
    }
    sorted[n - 1]
}

/// Per-unit shares `s_i = min(r_i, λ)` over `units` and capacity `c`.
pub fn compute_shares(units: &BTreeMap<String, u32>, c: f64) -> BTreeMap<String, f64> {
    if units.is_empty() {
        return BTreeMap::new();
    }
    let requests: Vec<f64> = units.values().map(|r| *r as f64).collect();
    let lambda = waterfill_lambda(&requests, c);
    units
        .iter()
        .map(|(name, r)| (name.clone(), (*r as f64).min(lambda).max(0.0)))
        .collect()
}

/// Quota percent for a share, floored at 1%.
pub fn quota_percent(share: f64) -> u32 {
    ((share * 100.0).round() as i64).max(1) as u32
}

/// Applies a CPU quota to a named resource-scope unit.
///
/// A trait seam so tests can observe applied quotas without an init
/// system present.
#[async_trait]
pub trait QuotaApplier: Send + Sync {
    async fn apply(&self, unit: &str, quota_percent: u32) -> Result<()>;
}

/// Production applier: `systemctl set-property <unit> CPUQuota=<pct>%`.
///
/// Failures are logged and swallowed; a host without the quota
/// mechanism degrades to weight-only sharing.
pub struct SystemdQuotaApplier;

#[async_trait]
impl QuotaApplier for SystemdQuotaApplier {
    async fn apply(&self, unit: &str, quota_percent: u32) -> Result<()> {
        let result = tokio::process::Command::new("systemctl")
            .arg("set-property")
            .arg(unit)
            .arg(format!("CPUQuota={quota_percent}%"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!("quota apply skipped for {unit}: {e}");
        }
        Ok(())
    }
}

/// Shared-mode controller over the node's active child units.
pub struct FairShareController {
    capacity: f64,
    active: Mutex<BTreeMap<String, u32>>,
    applier: Arc<dyn QuotaApplier>,
}

impl FairShareController {
    pub fn new(capacity_vcpus: f64, applier: Arc<dyn QuotaApplier>) -> Self {
        Self {
            capacity: capacity_vcpus,
            active: Mutex::new(BTreeMap::new()),
            applier,
        }
    }

    /// Admit a unit requesting `requested` vCPUs.
    ///
    /// Recomputes shares including the new unit, applies updated quotas
    /// to the existing units, registers the unit as active, and returns
    /// the initial quota percent to pass to the new child's environment.
    pub async fn admit(&self, unit: &str, requested: u32) -> Result<u32> {
        let mut active = self.active.lock().await;
        let mut projected = active.clone();
        projected.insert(unit.to_string(), requested.max(1));
        let shares = compute_shares(&projected, self.capacity);
        for (name, share) in &shares {
            if name != unit {
                self.applier.apply(name, quota_percent(*share)).await?;
            }
        }
        active.insert(unit.to_string(), requested.max(1));
        let own = shares.get(unit).copied().unwrap_or(requested.max(1) as f64);
        Ok(quota_percent(own))
    }

    /// Remove a completed unit and re-apply quotas to the remainder.
    pub async fn release(&self, unit: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        active.remove(unit);
        if active.is_empty() {
            return Ok(());
        }
        let shares = compute_shares(&active, self.capacity);
        for (name, share) in &shares {
            self.applier.apply(name, quota_percent(*share)).await?;
        }
        Ok(())
    }

    /// Number of currently active units.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs
            .iter()
            .map(|(n, r)| (n.to_string(), *r))
            .collect()
    }

    #[test]
    fn test_waterfill_all_satisfied() {
        // Capacity exceeds every request: everyone gets their demand.
        let lambda = waterfill_lambda(&[1.0, 2.0], 8.0);
        assert_eq!(lambda, 2.0);
    }

    #[test]
    fn test_waterfill_two_units() {
        // {1, 3} over C=2: λ = 2/2 = 1 at the first step.
        let lambda = waterfill_lambda(&[1.0, 3.0], 2.0);
        assert!((lambda - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_waterfill_three_units() {
        // {1, 3, 4} over C=2: λ = 2/3.
        let lambda = waterfill_lambda(&[1.0, 3.0, 4.0], 2.0);
        assert!((lambda - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_shares_respect_requests_and_capacity() {
        let shares = compute_shares(&units(&[("u1", 1), ("u2", 3)]), 2.0);
        assert!((shares["u1"] - 1.0).abs() < 1e-9);
        assert!((shares["u2"] - 1.0).abs() < 1e-9);
        let total: f64 = shares.values().sum();
        assert!(total <= 2.0 + 1e-9);
    }

    #[test]
    fn test_quota_percent_floor() {
        assert_eq!(quota_percent(0.0), 1);
        assert_eq!(quota_percent(0.667), 67);
        assert_eq!(quota_percent(1.0), 100);
    }

    struct RecordingApplier {
        applied: std::sync::Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl QuotaApplier for RecordingApplier {
        async fn apply(&self, unit: &str, quota_percent: u32) -> Result<()> {
            self.applied
                .lock()
                .unwrap()
                .push((unit.to_string(), quota_percent));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_admission_recomputes_existing_units() {
        let applier = Arc::new(RecordingApplier {
            applied: std::sync::Mutex::new(Vec::new()),
        });
        let controller = FairShareController::new(2.0, applier.clone());

        let q1 = controller.admit("u1", 1).await.unwrap();
        assert_eq!(q1, 100);
        let q2 = controller.admit("u2", 3).await.unwrap();
        assert_eq!(q2, 100);

        // Admitting u3 (r=4) drives λ to 2/3; existing units get 67%.
        let q3 = controller.admit("u3", 4).await.unwrap();
        assert_eq!(q3, 67);
        let applied = applier.applied.lock().unwrap().clone();
        assert!(applied.contains(&("u1".to_string(), 67)));
        assert!(applied.contains(&("u2".to_string(), 67)));
    }

    #[tokio::test]
    async fn test_release_reapplies_remaining() {
        let applier = Arc::new(RecordingApplier {
            applied: std::sync::Mutex::new(Vec::new()),
        });
        let controller = FairShareController::new(2.0, applier.clone());
        controller.admit("u1", 1).await.unwrap();
        controller.admit("u2", 3).await.unwrap();
        controller.admit("u3", 4).await.unwrap();
        applier.applied.lock().unwrap().clear();

        controller.release("u3").await.unwrap();
        assert_eq!(controller.active_count().await, 2);
        let applied = applier.applied.lock().unwrap().clone();
        // {1, 3} over C=2 gives both units a full vCPU again.
        assert!(applied.contains(&("u1".to_string(), 100)));
        assert!(applied.contains(&("u2".to_string(), 100)));
    }
}
