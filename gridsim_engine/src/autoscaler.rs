//! Autoscaling decisions for the resource pool.
//!
//! ## Table of Contents
//! - **ScalingSnapshot**: pool state fed to the autoscaler
//! - **ScalingDecision**: result of an evaluation
//! - **Autoscaler**: threshold policy with a cooldown between actions
//!
//! The autoscaler only decides. The resource pool applies the decision and
//! calls [`Autoscaler::record_action`] when something actually changed, so
//! a scale-down that finds nothing removable does not start a cooldown.

use crate::config::ScalingPolicy;
use crate::error::Result;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Pool state at evaluation time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingSnapshot {
    /// Load plus queued work over capacity of non-offline resources
    pub utilization: f64,

    /// Non-offline resources, including ones still provisioning
    pub active: usize,

    pub now: Duration,
}

/// Scaling decision result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDecision {
    NoChange,
    /// Add one elastic resource
    ScaleUp,
    /// Remove the least-loaded idle elastic resource
    ScaleDown,
}

impl ScalingDecision {
    pub fn is_scaling(&self) -> bool {
        !matches!(self, Self::NoChange)
    }
}

/// Threshold autoscaler with hysteresis.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    policy: ScalingPolicy,
    last_action: Option<Duration>,
}

impl Autoscaler {
    pub fn new(policy: ScalingPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            last_action: None,
        })
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.policy
    }

    /// Time of the last applied action.
    pub fn last_action(&self) -> Option<Duration> {
        self.last_action
    }

    /// True once the cooldown since the last action has elapsed.
    pub fn can_scale(&self, now: Duration) -> bool {
        match self.last_action {
            Some(t) => now.saturating_sub(t) >= self.policy.cooldown(),
            None => true,
        }
    }

    /// Evaluates the snapshot against the thresholds and bounds.
    pub fn evaluate(&self, snapshot: &ScalingSnapshot) -> ScalingDecision {
        if !self.can_scale(snapshot.now) {
            debug!(utilization = snapshot.utilization, "Scaling blocked by cooldown");
            return ScalingDecision::NoChange;
        }

        if snapshot.utilization > self.policy.scale_up_threshold && snapshot.active < self.policy.max_resources {
            ScalingDecision::ScaleUp
        } else if snapshot.utilization < self.policy.scale_down_threshold
            && snapshot.active > self.policy.min_resources
        {
            ScalingDecision::ScaleDown
        } else {
            ScalingDecision::NoChange
        }
    }

    /// Starts the cooldown.
    pub fn record_action(&mut self, now: Duration) {
        self.last_action = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(utilization: f64, active: usize, secs: u64) -> ScalingSnapshot {
        ScalingSnapshot {
            utilization,
            active,
            now: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_thresholds() {
        let scaler = Autoscaler::new(ScalingPolicy::default()).unwrap();

        assert_eq!(scaler.evaluate(&snapshot(0.9, 4, 0)), ScalingDecision::ScaleUp);
        assert_eq!(scaler.evaluate(&snapshot(0.1, 4, 0)), ScalingDecision::ScaleDown);
        assert_eq!(scaler.evaluate(&snapshot(0.5, 4, 0)), ScalingDecision::NoChange);
        // exactly on a threshold does nothing
        assert_eq!(scaler.evaluate(&snapshot(0.8, 4, 0)), ScalingDecision::NoChange);
    }

    #[test]
    fn test_bounds() {
        let scaler = Autoscaler::new(ScalingPolicy::default()).unwrap();

        assert_eq!(scaler.evaluate(&snapshot(1.0, 10, 0)), ScalingDecision::NoChange);
        assert_eq!(scaler.evaluate(&snapshot(0.0, 2, 0)), ScalingDecision::NoChange);
    }

    #[test]
    fn test_cooldown() {
        let mut scaler = Autoscaler::new(ScalingPolicy::default()).unwrap();
        scaler.record_action(Duration::from_secs(100));

        assert!(!scaler.can_scale(Duration::from_secs(159)));
        assert_eq!(scaler.evaluate(&snapshot(0.95, 3, 159)), ScalingDecision::NoChange);
        assert!(scaler.can_scale(Duration::from_secs(160)));
        assert_eq!(scaler.evaluate(&snapshot(0.95, 3, 160)), ScalingDecision::ScaleUp);
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let policy = ScalingPolicy {
            scale_down_threshold: 0.9,
            ..Default::default()
        };
        assert!(Autoscaler::new(policy).is_err());
    }
}
