//! Generic fuzzy decision unit: named input/output variables plus a rule
//! base, compiled from configuration and evaluated with Mamdani inference
//! (min activation, clipped max aggregation, centroid defuzzification).
//!
//! All three behavior controllers share this one abstraction; they differ
//! only in the rule base they are built from.

use serde::Deserialize;
use thiserror::Error;

/// Sample points used to discretize an output universe for the centroid.
const CENTROID_RESOLUTION: usize = 200;

/// A membership term: 3 breakpoints for a triangle, 4 for a trapezoid.
#[derive(Debug, Clone, Deserialize)]
pub struct Term {
    pub name: String,
    pub shape: Vec<f32>,
}

/// A linguistic variable with its universe of discourse.
#[derive(Debug, Clone, Deserialize)]
pub struct Variable {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub terms: Vec<Term>,
}

/// One rule: all `when` clauses AND-ed, every `then` clause applied.
/// Clauses are (variable, term) name pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub when: Vec<(String, String)>,
    pub then: Vec<(String, String)>,
}

/// Declarative rule-base configuration for one decision unit.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleBase {
    pub name: String,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Error)]
pub enum RuleBaseError {
    #[error("rule base `{base}` declares no {kind} variables")]
    NoVariables { base: String, kind: &'static str },

    #[error("variable `{var}` has an invalid universe [{min}, {max}]")]
    BadUniverse { var: String, min: f32, max: f32 },

    #[error("variable `{var}` has no terms")]
    NoTerms { var: String },

    #[error("term `{term}` of `{var}` must have 3 or 4 non-decreasing breakpoints")]
    BadShape { var: String, term: String },

    #[error("rule {index} of `{base}` references unknown variable `{var}`")]
    UnknownVariable {
        base: String,
        index: usize,
        var: String,
    },

    #[error("rule {index} of `{base}` references unknown term `{term}` of `{var}`")]
    UnknownTerm {
        base: String,
        index: usize,
        var: String,
        term: String,
    },

    #[error("rule {index} of `{base}` has an empty antecedent")]
    EmptyAntecedent { base: String, index: usize },

    #[error("rule base `{base}` must map {inputs} inputs to {outputs} outputs")]
    Signature {
        base: String,
        inputs: usize,
        outputs: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct CompiledTerm {
    // Trapezoid breakpoints; triangles repeat the apex.
    points: [f32; 4],
}

impl CompiledTerm {
    fn membership(&self, x: f32) -> f32 {
        let [a, b, c, d] = self.points;
        if x < a || x > d {
            0.0
        } else if x < b {
            (x - a) / (b - a)
        } else if x <= c {
            1.0
        } else {
            (d - x) / (d - c)
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledVariable {
    min: f32,
    max: f32,
    terms: Vec<CompiledTerm>,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    when: Vec<(usize, usize)>,
    then: Vec<(usize, usize)>,
}

/// A compiled, ready-to-evaluate fuzzy decision unit.
#[derive(Debug, Clone)]
pub struct DecisionUnit {
    name: String,
    inputs: Vec<CompiledVariable>,
    outputs: Vec<CompiledVariable>,
    rules: Vec<CompiledRule>,
}

impl DecisionUnit {
    /// Validate a rule-base configuration and compile names to indices.
    pub fn new(base: RuleBase) -> Result<Self, RuleBaseError> {
        if base.inputs.is_empty() {
            return Err(RuleBaseError::NoVariables {
                base: base.name,
                kind: "input",
            });
        }
        if base.outputs.is_empty() {
            return Err(RuleBaseError::NoVariables {
                base: base.name,
                kind: "output",
            });
        }

        let inputs = compile_variables(&base.inputs)?;
        let outputs = compile_variables(&base.outputs)?;

        let mut rules = Vec::with_capacity(base.rules.len());
        for (index, rule) in base.rules.iter().enumerate() {
            if rule.when.is_empty() {
                return Err(RuleBaseError::EmptyAntecedent {
                    base: base.name,
                    index,
                });
            }
            let when = resolve_clauses(&base.name, index, &rule.when, &base.inputs)?;
            let then = resolve_clauses(&base.name, index, &rule.then, &base.outputs)?;
            rules.push(CompiledRule { when, then });
        }

        Ok(Self {
            name: base.name,
            inputs,
            outputs,
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check the unit against the input/output arity a caller wires up.
    pub fn expect_signature(&self, inputs: usize, outputs: usize) -> Result<(), RuleBaseError> {
        if self.inputs.len() != inputs || self.outputs.len() != outputs {
            return Err(RuleBaseError::Signature {
                base: self.name.clone(),
                inputs,
                outputs,
            });
        }
        Ok(())
    }

    /// Run one inference pass. `crisp` holds one value per declared input,
    /// in declaration order; the result holds one value per declared
    /// output. Inputs outside a variable's universe are clamped to its
    /// edge, so `f32::INFINITY` reads as the far end of the range. Every
    /// output is defined; if no rule fires for an output the universe
    /// midpoint is returned.
    pub fn evaluate(&self, crisp: &[f32]) -> Vec<f32> {
        debug_assert_eq!(crisp.len(), self.inputs.len());

        let activations: Vec<f32> = self
            .rules
            .iter()
            .map(|rule| {
                rule.when
                    .iter()
                    .map(|&(v, t)| {
                        let var = &self.inputs[v];
                        var.terms[t].membership(crisp[v].clamp(var.min, var.max))
                    })
                    .fold(1.0, f32::min)
            })
            .collect();

        (0..self.outputs.len())
            .map(|o| self.centroid(o, &activations))
            .collect()
    }

    fn centroid(&self, output: usize, activations: &[f32]) -> f32 {
        let var = &self.outputs[output];
        let step = (var.max - var.min) / CENTROID_RESOLUTION as f32;

        let mut weighted = 0.0;
        let mut mass = 0.0;
        for i in 0..=CENTROID_RESOLUTION {
            let x = var.min + step * i as f32;
            let mut mu: f32 = 0.0;
            for (rule, &activation) in self.rules.iter().zip(activations) {
                if activation <= 0.0 {
                    continue;
                }
                for &(o, t) in &rule.then {
                    if o == output {
                        mu = mu.max(activation.min(var.terms[t].membership(x)));
                    }
                }
            }
            weighted += x * mu;
            mass += mu;
        }

        if mass > 0.0 {
            weighted / mass
        } else {
            (var.min + var.max) / 2.0
        }
    }
}

fn compile_variables(vars: &[Variable]) -> Result<Vec<CompiledVariable>, RuleBaseError> {
    vars.iter()
        .map(|var| {
            if !(var.min < var.max) || !var.min.is_finite() || !var.max.is_finite() {
                return Err(RuleBaseError::BadUniverse {
                    var: var.name.clone(),
                    min: var.min,
                    max: var.max,
                });
            }
            if var.terms.is_empty() {
                return Err(RuleBaseError::NoTerms {
                    var: var.name.clone(),
                });
            }
            let terms = var
                .terms
                .iter()
                .map(|term| compile_term(&var.name, term))
                .collect::<Result<_, _>>()?;
            Ok(CompiledVariable {
                min: var.min,
                max: var.max,
                terms,
            })
        })
        .collect()
}

fn compile_term(var: &str, term: &Term) -> Result<CompiledTerm, RuleBaseError> {
    let bad = || RuleBaseError::BadShape {
        var: var.to_string(),
        term: term.name.clone(),
    };
    let points = match term.shape[..] {
        [a, b, c] => [a, b, b, c],
        [a, b, c, d] => [a, b, c, d],
        _ => return Err(bad()),
    };
    if points.windows(2).any(|w| w[0] > w[1]) || points.iter().any(|p| !p.is_finite()) {
        return Err(bad());
    }
    Ok(CompiledTerm { points })
}

fn resolve_clauses(
    base: &str,
    index: usize,
    clauses: &[(String, String)],
    vars: &[Variable],
) -> Result<Vec<(usize, usize)>, RuleBaseError> {
    clauses
        .iter()
        .map(|(var_name, term_name)| {
            let v = vars
                .iter()
                .position(|v| &v.name == var_name)
                .ok_or_else(|| RuleBaseError::UnknownVariable {
                    base: base.to_string(),
                    index,
                    var: var_name.clone(),
                })?;
            let t = vars[v]
                .terms
                .iter()
                .position(|t| &t.name == term_name)
                .ok_or_else(|| RuleBaseError::UnknownTerm {
                    base: base.to_string(),
                    index,
                    var: var_name.clone(),
                    term: term_name.clone(),
                })?;
            Ok((v, t))
        })
        .collect()
}
