use crate::error::GppError;
use crate::scenario::ScenarioDraw;
use crate::slate::Slate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Comparison operator of a linear membership constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintOp {
    Le,
    Ge,
    Eq,
}

/// Linear inequality over driver-indicator variables:
/// sum(coeffs[d] * x_d) op rhs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearConstraint {
    pub label: String,
    pub coeffs: Vec<f64>,
    pub op: ConstraintOp,
    pub rhs: f64,
}

/// Closed interval bound on a per-driver outcome attribute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttrBounds {
    pub lo: f64,
    pub hi: f64,
}

impl Default for AttrBounds {
    fn default() -> Self {
        AttrBounds { lo: 0.0, hi: 1.0 }
    }
}

/// What the external ontology hands us before compilation. The compiled
/// artifact is [`ConstraintSpec`]; a changed source produces a new spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSource {
    /// Scheduled green-flag laps. Conservation budget for laps led.
    pub race_length: u32,
    /// Cap on drivers flagged as dominators in one scenario.
    pub max_dominators: u32,
    /// Laps led at or above this mark flags a dominator.
    pub dominator_lap_threshold: u32,
    /// Bounds applied to the four archetype attributes, in
    /// (skill, aggression, shadow_risk, realpolitik_pos) order.
    pub attr_bounds: [AttrBounds; 4],
    /// Extra membership constraints from the ontology, if any.
    pub extra_linear: Vec<LinearConstraint>,
}

impl Default for ConstraintSource {
    fn default() -> Self {
        ConstraintSource {
            race_length: 267,
            max_dominators: 3,
            dominator_lap_threshold: 267 / 8,
            attr_bounds: [AttrBounds::default(); 4],
            extra_linear: Vec::new(),
        }
    }
}

pub const ATTR_NAMES: [&str; 4] = ["skill", "aggression", "shadow_risk", "realpolitik_pos"];

/// Compiled, immutable feasibility rules: veto predicates over scenarios,
/// per-driver attribute bounds, and linear constraints over membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub race_length: u32,
    pub max_dominators: u32,
    pub dominator_lap_threshold: u32,
    pub attr_bounds: [AttrBounds; 4],
    linear: Vec<LinearConstraint>,
    spec_hash: String,
}

impl ConstraintSpec {
    /// Compile the ontology source against a slate. Contradictions fail
    /// with `SpecCompile`; the artifact is immutable afterwards.
    pub fn compile(source: &ConstraintSource, slate: &Slate) -> Result<ConstraintSpec, GppError> {
        let fail = |reason: String| GppError::SpecCompile { reason };

        if source.race_length == 0 {
            return Err(fail("race_length must be positive".into()));
        }
        if source.max_dominators == 0 {
            return Err(fail("max_dominators must be positive".into()));
        }
        if source.dominator_lap_threshold > source.race_length {
            return Err(fail(format!(
                "dominator_lap_threshold {} exceeds race_length {}",
                source.dominator_lap_threshold, source.race_length
            )));
        }
        for (i, b) in source.attr_bounds.iter().enumerate() {
            if !(0.0..=1.0).contains(&b.lo) || !(0.0..=1.0).contains(&b.hi) || b.lo > b.hi {
                return Err(fail(format!(
                    "attribute bound {} [{}, {}] is not a sub-interval of [0,1]",
                    ATTR_NAMES[i], b.lo, b.hi
                )));
            }
        }

        let rules = &slate.rules;
        if rules.min_stack < 0 || rules.max_stack < rules.min_stack.max(1) {
            return Err(fail(format!(
                "stacking bounds [{}, {}] are contradictory",
                rules.min_stack, rules.max_stack
            )));
        }
        // The roster must be partitionable into used teams, each holding
        // between min_stack and max_stack drivers.
        let teams = slate.team_index();
        let n_teams = teams.len() as i32;
        let feasible_k = (1..=n_teams).any(|k| {
            k * rules.min_stack.max(1) <= rules.roster_size && rules.roster_size <= k * rules.max_stack
        });
        if !feasible_k {
            return Err(fail(format!(
                "no team partition fits roster_size {} with stacks [{}, {}] over {} teams",
                rules.roster_size, rules.min_stack, rules.max_stack, n_teams
            )));
        }
        for c in &source.extra_linear {
            if c.coeffs.len() != slate.len() {
                return Err(fail(format!(
                    "extra constraint '{}' has {} coefficients for {} drivers",
                    c.label,
                    c.coeffs.len(),
                    slate.len()
                )));
            }
        }

        let mut linear = vec![
            LinearConstraint {
                label: "roster_size".into(),
                coeffs: vec![1.0; slate.len()],
                op: ConstraintOp::Eq,
                rhs: rules.roster_size as f64,
            },
            LinearConstraint {
                label: "salary_cap".into(),
                coeffs: slate.drivers.iter().map(|d| d.salary as f64).collect(),
                op: ConstraintOp::Le,
                rhs: rules.salary_cap as f64,
            },
        ];
        linear.extend(source.extra_linear.iter().cloned());

        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}|{}|{}",
                source.race_length, source.max_dominators, source.dominator_lap_threshold
            )
            .as_bytes(),
        );
        for b in &source.attr_bounds {
            hasher.update(format!("{:.6}|{:.6}", b.lo, b.hi).as_bytes());
        }
        for c in &source.extra_linear {
            hasher.update(c.label.as_bytes());
            hasher.update(format!("{:?}{:.6}", c.op, c.rhs).as_bytes());
            for v in &c.coeffs {
                hasher.update(v.to_bits().to_le_bytes());
            }
        }

        Ok(ConstraintSpec {
            race_length: source.race_length,
            max_dominators: source.max_dominators,
            dominator_lap_threshold: source.dominator_lap_threshold,
            attr_bounds: source.attr_bounds,
            linear,
            spec_hash: format!("{:x}", hasher.finalize()),
        })
    }

    /// Hash of the compiled source, folded into the slate fingerprint.
    pub fn spec_hash(&self) -> &str {
        &self.spec_hash
    }

    /// Linear membership constraints for the optimizer (roster size,
    /// salary cap, plus any ontology extras).
    pub fn linear_constraints(&self) -> &[LinearConstraint] {
        &self.linear
    }

    /// Interval bounds for one driver's archetype attributes.
    pub fn driver_bounds(&self) -> [AttrBounds; 4] {
        self.attr_bounds
    }

    /// Test a candidate scenario against the hard rules. Returns the name
    /// of the first failing predicate, or None if the draw is feasible.
    pub fn veto(&self, draw: &ScenarioDraw) -> Option<&'static str> {
        let total_laps: u64 = draw.laps_led.iter().map(|&l| l as u64).sum();
        if total_laps > self.race_length as u64 {
            return Some("laps_led_budget");
        }
        let dominators = draw.dominator.iter().filter(|&&d| d).count() as u32;
        if dominators > self.max_dominators {
            return Some("max_dominators");
        }
        for (led, fastest) in draw.laps_led.iter().zip(draw.fastest_laps.iter()) {
            if fastest > led {
                return Some("fastest_laps_bound");
            }
        }
        None
    }

    /// Static attribute-bound check for a slate's drivers.
    pub fn check_driver_bounds(&self, slate: &Slate) -> Result<(), GppError> {
        for d in &slate.drivers {
            for (i, v) in d.attrs.as_array().iter().enumerate() {
                let b = self.attr_bounds[i];
                if *v < b.lo || *v > b.hi {
                    return Err(GppError::SpecCompile {
                        reason: format!(
                            "driver {} attribute {} = {} outside [{}, {}]",
                            d.driver_id, ATTR_NAMES[i], v, b.lo, b.hi
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
