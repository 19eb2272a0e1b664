//! Built-in rule bases for the three decision units. Deployments can
//! replace any of them through `ControllerRules` TOML without rebuilding;
//! the thresholds below are tuned for a 0.75 m following distance and the
//! +infinity "nothing detected" encoding used by the lidar preprocessing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::fuzzy::{Rule, RuleBase, Term, Variable};

/// The rule bases for one follower, in the order the loop runs them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerRules {
    pub formation: RuleBase,
    pub avoidance: RuleBase,
    pub fusion: RuleBase,
}

impl Default for ControllerRules {
    fn default() -> Self {
        Self {
            formation: formation_rules(),
            avoidance: avoidance_rules(),
            fusion: fusion_rules(),
        }
    }
}

impl ControllerRules {
    /// Load rule bases from a TOML file; any base the file omits stays at
    /// its built-in default.
    pub fn load(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading rule file {path}"))?;
        toml::from_str(&text).with_context(|| format!("parsing {path}"))
    }
}

fn term(name: &str, shape: &[f32]) -> Term {
    Term {
        name: name.to_string(),
        shape: shape.to_vec(),
    }
}

fn var(name: &str, min: f32, max: f32, terms: Vec<Term>) -> Variable {
    Variable {
        name: name.to_string(),
        min,
        max,
        terms,
    }
}

fn rule(when: &[(&str, &str)], then: &[(&str, &str)]) -> Rule {
    let pairs = |clauses: &[(&str, &str)]| {
        clauses
            .iter()
            .map(|&(v, t)| (v.to_string(), t.to_string()))
            .collect()
    };
    Rule {
        when: pairs(when),
        then: pairs(then),
    }
}

fn rotation_variable() -> Variable {
    var(
        "Rotation",
        -1.0,
        1.0,
        vec![
            term("clockwise", &[-1.0, -1.0, -0.5, -0.1]),
            term("straight", &[-0.2, 0.0, 0.2]),
            term("counter", &[0.1, 0.5, 1.0, 1.0]),
        ],
    )
}

fn velocity_variable() -> Variable {
    var(
        "Velocity",
        -0.05,
        0.3,
        vec![
            term("halt", &[-0.04, 0.0, 0.04]),
            term("creep", &[0.02, 0.08, 0.14]),
            term("cruise", &[0.12, 0.2, 0.3, 0.3]),
        ],
    )
}

/// Steer toward the leader: (bearing offset, distance error) ->
/// (velocity, rotation). A negative distance error means the follower has
/// fallen behind the setpoint.
pub fn formation_rules() -> RuleBase {
    RuleBase {
        name: "formation".to_string(),
        inputs: vec![
            var(
                "Angle",
                -180.0,
                180.0,
                vec![
                    term("right", &[-180.0, -180.0, -45.0, -10.0]),
                    term("ahead", &[-20.0, 0.0, 20.0]),
                    term("left", &[10.0, 45.0, 180.0, 180.0]),
                ],
            ),
            var(
                "Distance",
                -3.0,
                3.0,
                vec![
                    term("far", &[-3.0, -3.0, -0.5, -0.1]),
                    term("aligned", &[-0.2, 0.0, 0.2]),
                    term("close", &[0.1, 0.5, 3.0, 3.0]),
                ],
            ),
        ],
        outputs: vec![velocity_variable(), rotation_variable()],
        rules: vec![
            rule(
                &[("Angle", "ahead"), ("Distance", "far")],
                &[("Velocity", "cruise"), ("Rotation", "straight")],
            ),
            rule(
                &[("Angle", "ahead"), ("Distance", "aligned")],
                &[("Velocity", "halt"), ("Rotation", "straight")],
            ),
            rule(
                &[("Angle", "ahead"), ("Distance", "close")],
                &[("Velocity", "halt"), ("Rotation", "straight")],
            ),
            rule(
                &[("Angle", "left"), ("Distance", "far")],
                &[("Velocity", "creep"), ("Rotation", "counter")],
            ),
            rule(
                &[("Angle", "left"), ("Distance", "aligned")],
                &[("Velocity", "halt"), ("Rotation", "counter")],
            ),
            rule(
                &[("Angle", "left"), ("Distance", "close")],
                &[("Velocity", "halt"), ("Rotation", "counter")],
            ),
            rule(
                &[("Angle", "right"), ("Distance", "far")],
                &[("Velocity", "creep"), ("Rotation", "clockwise")],
            ),
            rule(
                &[("Angle", "right"), ("Distance", "aligned")],
                &[("Velocity", "halt"), ("Rotation", "clockwise")],
            ),
            rule(
                &[("Angle", "right"), ("Distance", "close")],
                &[("Velocity", "halt"), ("Rotation", "clockwise")],
            ),
        ],
    }
}

/// Steer away from obstacles: (left, right, front distances) ->
/// (velocity, rotation). Inputs of +infinity clamp to the far edge of the
/// universe, so "nothing detected" reads as clear.
pub fn avoidance_rules() -> RuleBase {
    let laser = |name| {
        var(
            name,
            0.0,
            4.0,
            vec![
                term("near", &[0.0, 0.0, 0.3, 0.6]),
                term("far", &[0.4, 1.0, 4.0, 4.0]),
            ],
        )
    };
    RuleBase {
        name: "avoidance".to_string(),
        inputs: vec![laser("Left_Laser"), laser("Right_Laser"), laser("Front_Laser")],
        outputs: vec![velocity_variable(), rotation_variable()],
        rules: vec![
            rule(
                &[
                    ("Front_Laser", "far"),
                    ("Left_Laser", "far"),
                    ("Right_Laser", "far"),
                ],
                &[("Velocity", "cruise"), ("Rotation", "straight")],
            ),
            rule(
                &[
                    ("Front_Laser", "far"),
                    ("Left_Laser", "near"),
                    ("Right_Laser", "far"),
                ],
                &[("Velocity", "cruise"), ("Rotation", "clockwise")],
            ),
            rule(
                &[
                    ("Front_Laser", "far"),
                    ("Left_Laser", "far"),
                    ("Right_Laser", "near"),
                ],
                &[("Velocity", "cruise"), ("Rotation", "counter")],
            ),
            rule(
                &[
                    ("Front_Laser", "far"),
                    ("Left_Laser", "near"),
                    ("Right_Laser", "near"),
                ],
                &[("Velocity", "creep"), ("Rotation", "straight")],
            ),
            rule(
                &[
                    ("Front_Laser", "near"),
                    ("Left_Laser", "far"),
                    ("Right_Laser", "far"),
                ],
                &[("Velocity", "halt"), ("Rotation", "counter")],
            ),
            rule(
                &[
                    ("Front_Laser", "near"),
                    ("Left_Laser", "near"),
                    ("Right_Laser", "far"),
                ],
                &[("Velocity", "halt"), ("Rotation", "clockwise")],
            ),
            rule(
                &[
                    ("Front_Laser", "near"),
                    ("Left_Laser", "far"),
                    ("Right_Laser", "near"),
                ],
                &[("Velocity", "halt"), ("Rotation", "counter")],
            ),
            rule(
                &[
                    ("Front_Laser", "near"),
                    ("Left_Laser", "near"),
                    ("Right_Laser", "near"),
                ],
                &[("Velocity", "halt"), ("Rotation", "counter")],
            ),
        ],
    }
}

/// Arbitrate between the two behaviors: (|distance error|, closest
/// obstacle) -> (formation weight, collision weight). The weights are
/// applied as linear coefficients and are not required to sum to one.
pub fn fusion_rules() -> RuleBase {
    let weight = |name| {
        var(
            name,
            0.0,
            1.0,
            vec![
                term("low", &[0.0, 0.0, 0.15, 0.35]),
                term("mid", &[0.3, 0.45, 0.55, 0.7]),
                term("high", &[0.65, 0.85, 1.0, 1.0]),
            ],
        )
    };
    RuleBase {
        name: "fusion".to_string(),
        inputs: vec![
            var(
                "Position_Measure",
                0.0,
                3.0,
                vec![
                    term("small", &[0.0, 0.0, 0.1, 0.3]),
                    term("large", &[0.2, 0.6, 3.0, 3.0]),
                ],
            ),
            var(
                "Min_Laser",
                0.0,
                4.0,
                vec![
                    term("near", &[0.0, 0.0, 0.3, 0.6]),
                    term("far", &[0.4, 1.0, 4.0, 4.0]),
                ],
            ),
        ],
        outputs: vec![weight("Formation_Weight"), weight("Collision_Weight")],
        rules: vec![
            rule(
                &[("Position_Measure", "small"), ("Min_Laser", "near")],
                &[("Formation_Weight", "low"), ("Collision_Weight", "high")],
            ),
            rule(
                &[("Position_Measure", "large"), ("Min_Laser", "near")],
                &[("Formation_Weight", "mid"), ("Collision_Weight", "high")],
            ),
            rule(
                &[("Position_Measure", "small"), ("Min_Laser", "far")],
                &[("Formation_Weight", "high"), ("Collision_Weight", "low")],
            ),
            rule(
                &[("Position_Measure", "large"), ("Min_Laser", "far")],
                &[("Formation_Weight", "high"), ("Collision_Weight", "low")],
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fuzzy::DecisionUnit;

    #[test]
    fn builtin_rule_bases_compile() {
        let rules = ControllerRules::default();
        let formation = DecisionUnit::new(rules.formation).unwrap();
        let avoidance = DecisionUnit::new(rules.avoidance).unwrap();
        let fusion = DecisionUnit::new(rules.fusion).unwrap();
        assert!(formation.expect_signature(2, 2).is_ok());
        assert!(avoidance.expect_signature(3, 2).is_ok());
        assert!(fusion.expect_signature(2, 2).is_ok());
    }

    #[test]
    fn partial_rule_toml_keeps_builtin_defaults() {
        let rules: ControllerRules = toml::from_str(
            r#"
            [fusion]
            name = "fusion"

            [[fusion.inputs]]
            name = "Position_Measure"
            min = 0.0
            max = 3.0
            terms = [{ name = "any", shape = [0.0, 0.0, 3.0, 3.0] }]

            [[fusion.inputs]]
            name = "Min_Laser"
            min = 0.0
            max = 4.0
            terms = [{ name = "any", shape = [0.0, 0.0, 4.0, 4.0] }]

            [[fusion.outputs]]
            name = "Formation_Weight"
            min = 0.0
            max = 1.0
            terms = [{ name = "even", shape = [0.4, 0.5, 0.6] }]

            [[fusion.outputs]]
            name = "Collision_Weight"
            min = 0.0
            max = 1.0
            terms = [{ name = "even", shape = [0.4, 0.5, 0.6] }]

            [[fusion.rules]]
            when = [["Position_Measure", "any"]]
            then = [["Formation_Weight", "even"], ["Collision_Weight", "even"]]
            "#,
        )
        .unwrap();
        // The two omitted bases fall back to the built-ins.
        assert_eq!(rules.formation.rules.len(), formation_rules().rules.len());
        assert_eq!(rules.avoidance.rules.len(), avoidance_rules().rules.len());
        assert_eq!(rules.fusion.rules.len(), 1);
        assert!(DecisionUnit::new(rules.fusion).is_ok());
    }

    #[test]
    fn clear_surroundings_produce_straight_cruise() {
        let unit = DecisionUnit::new(avoidance_rules()).unwrap();
        let out = unit.evaluate(&[f32::INFINITY, f32::INFINITY, f32::INFINITY]);
        assert!(out[0] > 0.1, "velocity was {}", out[0]);
        assert!(out[1].abs() < 1e-3, "rotation was {}", out[1]);
    }

    #[test]
    fn blocked_front_halts_and_turns() {
        let unit = DecisionUnit::new(avoidance_rules()).unwrap();
        let out = unit.evaluate(&[2.0, 2.0, 0.1]);
        assert!(out[0].abs() < 0.05, "velocity was {}", out[0]);
        assert!(out[1] > 0.2, "rotation was {}", out[1]);
    }

    #[test]
    fn near_obstacle_shifts_weight_to_collision() {
        let unit = DecisionUnit::new(fusion_rules()).unwrap();
        let out = unit.evaluate(&[0.05, 0.1]);
        assert!(out[0] < 0.4, "formation weight was {}", out[0]);
        assert!(out[1] > 0.6, "collision weight was {}", out[1]);
    }

    #[test]
    fn clear_path_shifts_weight_to_formation() {
        let unit = DecisionUnit::new(fusion_rules()).unwrap();
        let out = unit.evaluate(&[1.0, f32::INFINITY]);
        assert!(out[0] > 0.6, "formation weight was {}", out[0]);
        assert!(out[1] < 0.4, "collision weight was {}", out[1]);
    }
}
