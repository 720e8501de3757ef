use std::collections::HashMap;

/// Inputs to one cluster-wide scaling decision.
#[derive(Debug, Clone, Copy)]
pub struct ScaleInput {
    /// Pending + processing tasks across the cluster.
    pub queue_pressure: u64,
    /// Workers currently registered across the cluster.
    pub current_workers: u64,
    /// Upper bound derived from credential capacity and configuration.
    pub max_capacity: u64,
    /// Consecutive low-pressure readings before this one.
    pub consecutive_low: u64,
    /// Floor the cluster never scales below.
    pub min_workers: u64,
}

/// What to do with the shared low-pressure streak counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowStreak {
    Increment,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    pub target: u64,
    pub low_streak: LowStreak,
}

/// Computes the cluster-wide worker target from queue pressure.
///
/// Scale-up is graduated; scale-down requires three consecutive low
/// readings (hysteresis) and removes at most `min(10, workers/4)` at a time.
/// The result is clamped to `[min_workers, max_capacity]`.
pub fn plan_cluster_target(input: ScaleInput) -> ScalePlan {
    let ScaleInput {
        queue_pressure,
        current_workers,
        max_capacity,
        consecutive_low,
        min_workers,
    } = input;

    let (raw_target, low_streak) = if queue_pressure > 500 {
        (current_workers + 50, LowStreak::Clear)
    } else if queue_pressure > 200 {
        (current_workers + 25, LowStreak::Clear)
    } else if queue_pressure > 100 {
        (current_workers + 15, LowStreak::Clear)
    } else if queue_pressure > 50 {
        (current_workers + 5, LowStreak::Clear)
    } else if queue_pressure < 10 {
        // This reading counts toward the streak; the third consecutive low
        // reading triggers the step down and resets the streak.
        if consecutive_low + 1 >= 3 {
            let step = 10.min(current_workers / 4);
            (current_workers.saturating_sub(step), LowStreak::Clear)
        } else {
            (current_workers, LowStreak::Increment)
        }
    } else {
        (current_workers, LowStreak::Clear)
    };

    ScalePlan {
        target: raw_target.min(max_capacity).max(min_workers),
        low_streak,
    }
}

/// This instance's slice of a cluster-wide worker target.
///
/// Targets divide evenly across the sorted instance ids; the first
/// `target % n` instances carry one extra worker. An instance missing from
/// the membership list (e.g. its TTL lapsed mid-cycle) takes the base share.
pub fn instance_share(target: u64, instances: &[String], instance_id: &str) -> u64 {
    if instances.is_empty() {
        return 0;
    }
    let mut sorted: Vec<&str> = instances.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let n = sorted.len() as u64;
    let base = target / n;
    let remainder = target % n;
    match sorted.iter().position(|id| *id == instance_id) {
        Some(position) if (position as u64) < remainder => base + 1,
        _ => base,
    }
}

/// The leader's decision, published as a store hash for followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingDecision {
    pub timestamp: String,
    pub target_cluster_workers: u64,
    pub base_target_per_instance: u64,
    pub remainder: u64,
    pub leader_instance: String,
    pub queue_pressure: u64,
}

impl ScalingDecision {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("timestamp".into(), self.timestamp.clone()),
            (
                "target_cluster_workers".into(),
                self.target_cluster_workers.to_string(),
            ),
            (
                "base_target_per_instance".into(),
                self.base_target_per_instance.to_string(),
            ),
            ("remainder".into(), self.remainder.to_string()),
            ("leader_instance".into(), self.leader_instance.clone()),
            ("queue_pressure".into(), self.queue_pressure.to_string()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let parse = |name: &str| fields.get(name).and_then(|v| v.parse::<u64>().ok());
        Some(Self {
            timestamp: fields.get("timestamp")?.clone(),
            target_cluster_workers: parse("target_cluster_workers")?,
            base_target_per_instance: parse("base_target_per_instance")?,
            remainder: parse("remainder")?,
            leader_instance: fields.get("leader_instance")?.clone(),
            queue_pressure: parse("queue_pressure")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn input(pressure: u64, current: u64) -> ScaleInput {
        ScaleInput {
            queue_pressure: pressure,
            current_workers: current,
            max_capacity: 1000,
            consecutive_low: 0,
            min_workers: 1,
        }
    }

    #[test]
    fn test_scale_up_table() {
        assert_eq!(plan_cluster_target(input(501, 10)).target, 60);
        assert_eq!(plan_cluster_target(input(300, 10)).target, 35);
        assert_eq!(plan_cluster_target(input(150, 10)).target, 25);
        assert_eq!(plan_cluster_target(input(60, 10)).target, 15);
        assert_eq!(plan_cluster_target(input(30, 10)).target, 10);
    }

    #[test]
    fn test_scale_up_bounded_by_capacity() {
        let plan = plan_cluster_target(ScaleInput {
            queue_pressure: 600,
            current_workers: 10,
            max_capacity: 20,
            consecutive_low: 0,
            min_workers: 1,
        });
        assert_eq!(plan.target, 20);
    }

    #[test]
    fn test_scale_down_needs_three_consecutive_lows() {
        for observed in [0, 1] {
            let plan = plan_cluster_target(ScaleInput {
                queue_pressure: 0,
                current_workers: 40,
                max_capacity: 1000,
                consecutive_low: observed,
                min_workers: 1,
            });
            assert_eq!(plan.target, 40);
            assert_eq!(plan.low_streak, LowStreak::Increment);
        }

        let third = plan_cluster_target(ScaleInput {
            queue_pressure: 0,
            current_workers: 40,
            max_capacity: 1000,
            consecutive_low: 2,
            min_workers: 1,
        });
        assert_eq!(third.target, 30);
        assert_eq!(third.low_streak, LowStreak::Clear);
    }

    #[test]
    fn test_scale_down_step_is_quarter_capped_at_ten() {
        let small = plan_cluster_target(ScaleInput {
            queue_pressure: 0,
            current_workers: 8,
            max_capacity: 1000,
            consecutive_low: 2,
            min_workers: 1,
        });
        assert_eq!(small.target, 6); // 8/4 = 2

        let large = plan_cluster_target(ScaleInput {
            queue_pressure: 0,
            current_workers: 100,
            max_capacity: 1000,
            consecutive_low: 2,
            min_workers: 1,
        });
        assert_eq!(large.target, 90); // capped at 10
    }

    #[test]
    fn test_moderate_pressure_clears_streak_without_scaling() {
        let plan = plan_cluster_target(ScaleInput {
            queue_pressure: 20,
            current_workers: 10,
            max_capacity: 1000,
            consecutive_low: 2,
            min_workers: 1,
        });
        assert_eq!(plan.target, 10);
        assert_eq!(plan.low_streak, LowStreak::Clear);
    }

    #[test]
    fn test_share_distribution() {
        let instances = vec![
            "instance-b".to_string(),
            "instance-a".to_string(),
            "instance-c".to_string(),
        ];
        // 25 across 3: base 8, remainder 1 goes to the first sorted id.
        assert_eq!(instance_share(25, &instances, "instance-a"), 9);
        assert_eq!(instance_share(25, &instances, "instance-b"), 8);
        assert_eq!(instance_share(25, &instances, "instance-c"), 8);
        // Unknown instance takes the base share.
        assert_eq!(instance_share(25, &instances, "instance-x"), 8);
        assert_eq!(instance_share(25, &[], "instance-a"), 0);
    }

    #[test]
    fn test_decision_fields_roundtrip() {
        let decision = ScalingDecision {
            timestamp: "2024-01-01T00:00:00Z".into(),
            target_cluster_workers: 25,
            base_target_per_instance: 12,
            remainder: 1,
            leader_instance: "instance-a".into(),
            queue_pressure: 300,
        };
        let fields: HashMap<String, String> = decision.to_fields().into_iter().collect();
        assert_eq!(ScalingDecision::from_fields(&fields), Some(decision));
        assert_eq!(ScalingDecision::from_fields(&HashMap::new()), None);
    }

    proptest! {
        #[test]
        fn prop_target_respects_bounds(
            pressure in 0u64..1000,
            current in 0u64..200,
            capacity in 1u64..200,
            low in 0u64..5,
        ) {
            let plan = plan_cluster_target(ScaleInput {
                queue_pressure: pressure,
                current_workers: current,
                max_capacity: capacity,
                consecutive_low: low,
                min_workers: 1,
            });
            prop_assert!(plan.target <= capacity.max(1));
            prop_assert!(plan.target >= 1);
        }

        #[test]
        fn prop_shares_sum_to_target(target in 0u64..500, n in 1usize..9) {
            let instances: Vec<String> = (0..n).map(|i| format!("instance-{i}")).collect();
            let sum: u64 = instances.iter().map(|id| instance_share(target, &instances, id)).sum();
            prop_assert_eq!(sum, target);
        }
    }
}
