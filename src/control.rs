//! Behavior controllers wired around the fuzzy decision units: formation
//! keeping, collision avoidance, and the fusion arbiter that weighs the
//! two against each other.

use crate::fuzzy::{DecisionUnit, RuleBase, RuleBaseError};
use crate::lidar::{average_distance, leader_scan_angle, DirectionalDistances};

/// Velocity command published once per control cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    /// Forward speed, m/s.
    pub linear: f32,
    /// Yaw rate, rad/s; positive is counter-clockwise.
    pub angular: f32,
}

impl VelocityCommand {
    /// The safe-state command: full stop.
    pub const STOP: Self = Self {
        linear: 0.0,
        angular: 0.0,
    };
}

/// Output of one behavior unit before blending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehaviorCommand {
    pub velocity: f32,
    pub angular: f32,
}

/// Formation output, carrying the distance error so the fusion step reuses
/// the exact value this decision saw instead of recomputing it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormationDecision {
    pub velocity: f32,
    pub angular: f32,
    pub distance_error: f32,
}

/// Blend coefficients from the fusion unit. Not normalized; the consumer
/// applies them as-is to both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub formation: f32,
    pub collision: f32,
}

impl BlendWeights {
    /// Weighted sum of the two behavior outputs, same weights on both axes.
    pub fn blend(&self, formation: &FormationDecision, avoidance: &BehaviorCommand) -> VelocityCommand {
        VelocityCommand {
            linear: formation.velocity * self.formation + avoidance.velocity * self.collision,
            angular: formation.angular * self.formation + avoidance.angular * self.collision,
        }
    }
}

/// Keeps the follower in formation behind the leader.
pub struct FormationController {
    unit: DecisionUnit,
    desired_distance: f32,
    half_window: i32,
}

impl FormationController {
    pub fn new(
        base: RuleBase,
        desired_distance: f32,
        half_window: i32,
    ) -> Result<Self, RuleBaseError> {
        let unit = DecisionUnit::new(base)?;
        unit.expect_signature(2, 2)?;
        Ok(Self {
            unit,
            desired_distance,
            half_window,
        })
    }

    /// Decide the formation command, or `None` when the bearing or the
    /// leader-relative distance estimate is not available yet.
    pub fn decide(&self, scan: Option<&[f32]>, bearing_deg: Option<f32>) -> Option<FormationDecision> {
        let bearing = bearing_deg?;
        let measured = average_distance(scan, leader_scan_angle(bearing), self.half_window)?;
        let distance_error = self.desired_distance - measured;

        let out = self.unit.evaluate(&[bearing, distance_error]);
        Some(FormationDecision {
            velocity: out[0],
            angular: out[1],
            distance_error,
        })
    }
}

/// Steers away from whatever the lidar sees to the left, right and front.
pub struct AvoidanceController {
    unit: DecisionUnit,
}

impl AvoidanceController {
    pub fn new(base: RuleBase) -> Result<Self, RuleBaseError> {
        let unit = DecisionUnit::new(base)?;
        unit.expect_signature(3, 2)?;
        Ok(Self { unit })
    }

    /// Decide the avoidance command, or `None` before the first scan of
    /// the cycle has been processed.
    pub fn decide(&self, distances: Option<&DirectionalDistances>) -> Option<BehaviorCommand> {
        let d = distances?;
        let out = self.unit.evaluate(&[d.left, d.right, d.front]);
        Some(BehaviorCommand {
            velocity: out[0],
            angular: out[1],
        })
    }
}

/// Arbitrates between formation keeping and collision avoidance. Only runs
/// after both behavior decisions succeeded.
pub struct FusionController {
    unit: DecisionUnit,
}

impl FusionController {
    pub fn new(base: RuleBase) -> Result<Self, RuleBaseError> {
        let unit = DecisionUnit::new(base)?;
        unit.expect_signature(2, 2)?;
        Ok(Self { unit })
    }

    pub fn blend_weights(&self, position_error: f32, closest_obstacle: f32) -> BlendWeights {
        let out = self.unit.evaluate(&[position_error, closest_obstacle]);
        BlendWeights {
            formation: out[0],
            collision: out[1],
        }
    }
}
