//! Plasticity Rules - Hebbian policies for synapse updates
//!
//! "Fire together, wire together." A rule decides:
//! - The weight a new edge starts at (co-activation or growth wiring)
//! - How much a repeated co-activation strengthens an edge
//! - How much an idle edge decays per maintenance pass
//! - When an edge is weak enough to be removed
//!
//! Weights live in `[0, 1]`. An edge that drops below `prune_threshold` is
//! removed from the graph rather than kept at zero.

use serde::{Deserialize, Serialize};

/// Hebbian rule governing synapse updates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HebbianRule {
    /// Update policy
    pub policy: UpdatePolicy,

    /// Weight of an edge created by co-activation
    pub initial_weight: f32,

    /// Weak weight used when wiring a freshly grown neuron
    pub wiring_weight: f32,

    /// Strengthening step per co-activation
    pub increment: f32,

    /// Multiplicative decay applied to idle edges
    pub decay_factor: f32,

    /// Minimum weight to keep (remove below this)
    pub prune_threshold: f32,
}

/// How a strengthening step is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdatePolicy {
    /// `w + increment`, clamped at 1.0
    Additive,

    /// `w + increment·(1 - w)`: steps shrink as the edge saturates
    SoftBound,
}

impl Default for HebbianRule {
    fn default() -> Self {
        Self::standard()
    }
}

impl HebbianRule {
    /// Balanced rule (default)
    pub fn standard() -> Self {
        Self {
            policy: UpdatePolicy::Additive,
            initial_weight: 0.1,
            wiring_weight: 0.05,
            increment: 0.05,
            decay_factor: 0.9,
            prune_threshold: 0.01,
        }
    }

    /// Slow to wire, slow to forget
    pub fn conservative() -> Self {
        Self {
            policy: UpdatePolicy::SoftBound,
            initial_weight: 0.05,
            wiring_weight: 0.03,
            increment: 0.03,
            decay_factor: 0.95,
            prune_threshold: 0.005,
        }
    }

    /// Fast wiring and fast forgetting
    pub fn aggressive() -> Self {
        Self {
            policy: UpdatePolicy::Additive,
            initial_weight: 0.2,
            wiring_weight: 0.1,
            increment: 0.1,
            decay_factor: 0.8,
            prune_threshold: 0.02,
        }
    }

    /// Weight after one co-activation of an existing edge
    pub fn strengthen(&self, current: f32) -> f32 {
        let current = sanitize_weight(current);
        let next = match self.policy {
            UpdatePolicy::Additive => current + self.increment,
            UpdatePolicy::SoftBound => current + self.increment * (1.0 - current),
        };
        sanitize_weight(next)
    }

    /// Weight after `steps` decay applications
    pub fn decay(&self, current: f32, steps: u32) -> f32 {
        let factor = self.decay_factor.clamp(0.0, 1.0).powi(steps.min(i32::MAX as u32) as i32);
        sanitize_weight(current * factor)
    }

    /// Should an edge with this weight be removed?
    pub fn should_prune(&self, weight: f32) -> bool {
        !weight.is_finite() || weight < self.prune_threshold
    }
}

/// Clamp into `[0, 1]`, mapping NaN/Infinity to 0
pub fn sanitize_weight(w: f32) -> f32 {
    if w.is_finite() {
        w.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strengthen_increases_until_bound() {
        for rule in [HebbianRule::standard(), HebbianRule::conservative(), HebbianRule::aggressive()] {
            let mut w = rule.initial_weight;
            for _ in 0..5 {
                let next = rule.strengthen(w);
                assert!(next > w, "{:?}: {} -> {}", rule.policy, w, next);
                w = next;
            }
            for _ in 0..1000 {
                w = rule.strengthen(w);
            }
            assert!(w <= 1.0);
        }
    }

    #[test]
    fn test_decay_strictly_decreases() {
        let rule = HebbianRule::standard();
        let w = 0.5;
        let once = rule.decay(w, 1);
        let twice = rule.decay(w, 2);
        assert!(once < w);
        assert!(twice < once);
        assert!((once - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_prune_decision() {
        let rule = HebbianRule::standard();
        assert!(rule.should_prune(0.005));
        assert!(rule.should_prune(f32::NAN));
        assert!(!rule.should_prune(0.5));
    }

    #[test]
    fn test_sanitize_weight() {
        assert_eq!(sanitize_weight(f32::INFINITY), 0.0);
        assert_eq!(sanitize_weight(-0.3), 0.0);
        assert_eq!(sanitize_weight(1.7), 1.0);
    }

    #[test]
    fn test_wiring_weight_survives_pruning() {
        for rule in [HebbianRule::standard(), HebbianRule::conservative(), HebbianRule::aggressive()] {
            assert!(!rule.should_prune(rule.wiring_weight));
            assert!(!rule.should_prune(rule.initial_weight));
        }
    }
}
