use std::cell::RefCell;

use argmin::core::{
    CostFunction, Error, Executor, Gradient, State, TerminationReason, TerminationStatus,
};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use finitediff::FiniteDiff;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::engine::{asset_shortfall, roll_forward_assets};
use super::errors::{ModelError, ModelResult};
use super::objective::TrajectoryObjective;
use super::scenario::Scenario;

pub(crate) type Param = Vec<f64>;
type Lbfgs = LBFGS<MoreThuenteLineSearch<Param, Param, f64>, Param, Param, f64>;

// Bounds on ln(C) so a wild line-search trial cannot overflow exp.
const LOG_CONSUMPTION_BOUND: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MinimizerSettings {
    /// Starting consumption for every free age.
    pub initial_consumption: f64,
    /// Per penalty stage.
    pub max_iterations: u64,
    pub lbfgs_memory: usize,
    pub gradient_tolerance: f64,
    pub cost_tolerance: f64,
    /// Weights on the squared negative-asset penalty; each stage warm-starts
    /// from the previous one.
    pub penalty_schedule: Vec<f64>,
    /// Largest accepted total shortfall (sum of negative assets).
    pub feasibility_tolerance: f64,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            initial_consumption: 10.0,
            max_iterations: 500,
            lbfgs_memory: 7,
            gradient_tolerance: 1e-10,
            cost_tolerance: 1e-14,
            penalty_schedule: vec![1.0, 1e3, 1e6],
            feasibility_tolerance: 1e-6,
        }
    }
}

impl MinimizerSettings {
    pub(crate) fn validate(&self) -> ModelResult<()> {
        if !self.initial_consumption.is_finite() || self.initial_consumption <= 0.0 {
            return Err(ModelError::invalid("initial_consumption", "must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(ModelError::invalid("max_iterations", "must be > 0"));
        }
        if self.lbfgs_memory == 0 {
            return Err(ModelError::invalid("lbfgs_memory", "must be > 0"));
        }
        if !(self.gradient_tolerance.is_finite() && self.gradient_tolerance >= 0.0) {
            return Err(ModelError::invalid("gradient_tolerance", "must be >= 0"));
        }
        if !(self.cost_tolerance.is_finite() && self.cost_tolerance >= 0.0) {
            return Err(ModelError::invalid("cost_tolerance", "must be >= 0"));
        }
        if self.penalty_schedule.is_empty() {
            return Err(ModelError::invalid("penalty_schedule", "must not be empty"));
        }
        if self
            .penalty_schedule
            .iter()
            .any(|mu| !mu.is_finite() || *mu < 0.0)
        {
            return Err(ModelError::invalid(
                "penalty_schedule",
                "weights must be finite and >= 0",
            ));
        }
        if !(self.feasibility_tolerance.is_finite() && self.feasibility_tolerance >= 0.0) {
            return Err(ModelError::invalid("feasibility_tolerance", "must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinimizedTrajectory {
    pub consumption: Vec<f64>,
    pub assets: Vec<f64>,
    pub score: f64,
    pub converged: bool,
    pub feasible: bool,
    pub iterations: u64,
    pub message: String,
}

/// Outcome of one argmin run.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LbfgsOutcome {
    pub param: Param,
    pub cost: f64,
    pub iterations: u64,
    pub converged: bool,
    pub status: String,
}

/// Runs L-BFGS with More-Thuente line search from `x0`.
///
/// Errors raised by the problem itself come back as `Err`; an argmin-internal
/// failure (for instance a line search that cannot make progress) ends the
/// run at `x0` with `converged = false`.
pub(crate) fn run_lbfgs<P>(
    problem: P,
    x0: Param,
    settings: &MinimizerSettings,
) -> ModelResult<LbfgsOutcome>
where
    P: CostFunction<Param = Param, Output = f64> + Gradient<Param = Param, Gradient = Param>,
{
    let solver: Lbfgs = LBFGS::new(MoreThuenteLineSearch::new(), settings.lbfgs_memory)
        .with_tolerance_grad(settings.gradient_tolerance)?
        .with_tolerance_cost(settings.cost_tolerance)?;

    let start = x0.clone();
    let run = Executor::new(problem, solver)
        .configure(|state| state.param(x0).max_iters(settings.max_iterations))
        .run();

    let result = match run {
        Ok(result) => result,
        Err(err) => {
            return match err.downcast::<ModelError>() {
                Ok(model_err) => Err(model_err),
                Err(other) => {
                    warn!("L-BFGS run aborted: {other}");
                    Ok(LbfgsOutcome {
                        param: start,
                        cost: f64::NAN,
                        iterations: 0,
                        converged: false,
                        status: other.to_string(),
                    })
                }
            };
        }
    };

    let state = result.state();
    let termination = state.get_termination_status().clone();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    );
    Ok(LbfgsOutcome {
        param: state.get_best_param().cloned().unwrap_or(start),
        cost: state.get_best_cost(),
        iterations: state.get_iter(),
        converged,
        status: format!("{termination:?}"),
    })
}

/// Central-difference gradient of `cost`, surfacing the first error any
/// evaluation raised.
pub(crate) fn central_gradient<F>(x: &Param, cost: F) -> Result<Param, Error>
where
    F: Fn(&Param) -> Result<f64, Error>,
{
    let closure_err: RefCell<Option<Error>> = RefCell::new(None);
    let cost_func = |x: &Param| -> f64 {
        match cost(x) {
            Ok(value) => value,
            Err(e) => {
                let mut slot = closure_err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e);
                }
                f64::NAN
            }
        }
    };
    let gradient = x.central_diff(&cost_func);
    if let Some(err) = closure_err.take() {
        return Err(err);
    }
    Ok(gradient)
}

/// Negated objective over ln(C) for the free ages, plus a quadratic penalty
/// on negative assets. Ages before the free block keep their fixed values.
struct ConsumptionProblem<'a, O: ?Sized> {
    scenario: &'a Scenario,
    objective: &'a O,
    prefix: &'a [f64],
    scale: f64,
    penalty: f64,
    asset_unit: f64,
}

impl<O: TrajectoryObjective + ?Sized> ConsumptionProblem<'_, O> {
    fn evaluate(&self, x: &[f64]) -> ModelResult<f64> {
        let consumption = full_consumption(self.prefix, x);
        let assets = roll_forward_assets(self.scenario, &consumption)?;
        let score = self.objective.score(self.scenario, &consumption, &assets);
        let violation: f64 = assets
            .iter()
            .map(|a| (a.min(0.0) / self.asset_unit).powi(2))
            .sum();
        let cost = -score / self.scale + self.penalty * violation;
        if cost.is_finite() {
            Ok(cost)
        } else {
            Err(ModelError::NonFiniteCost { value: cost })
        }
    }
}

impl<O: TrajectoryObjective + ?Sized> CostFunction for ConsumptionProblem<'_, O> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(x)?)
    }
}

impl<O: TrajectoryObjective + ?Sized> Gradient for ConsumptionProblem<'_, O> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, Error> {
        central_gradient(x, |x| self.cost(x))
    }
}

fn to_consumption(x: f64) -> f64 {
    x.clamp(-LOG_CONSUMPTION_BOUND, LOG_CONSUMPTION_BOUND).exp()
}

fn full_consumption(prefix: &[f64], x: &[f64]) -> Vec<f64> {
    prefix
        .iter()
        .copied()
        .chain(x.iter().copied().map(to_consumption))
        .collect()
}

/// Maximizes `objective` over the whole consumption vector, starting every
/// age at the configured initial consumption.
pub fn minimize_trajectory<O>(
    scenario: &Scenario,
    objective: &O,
    settings: &MinimizerSettings,
) -> ModelResult<MinimizedTrajectory>
where
    O: TrajectoryObjective + ?Sized,
{
    let initial = vec![settings.initial_consumption; scenario.lifespan_len()];
    minimize_suffix(scenario, objective, &[], &initial, settings)
}

/// Maximizes `objective` over the ages after `prefix`, holding the prefix
/// consumption fixed. `initial_suffix` is the starting point for the free
/// ages and fixes their count.
pub fn minimize_suffix<O>(
    scenario: &Scenario,
    objective: &O,
    prefix: &[f64],
    initial_suffix: &[f64],
    settings: &MinimizerSettings,
) -> ModelResult<MinimizedTrajectory>
where
    O: TrajectoryObjective + ?Sized,
{
    settings.validate()?;
    let expected = scenario.lifespan_len();
    if prefix.len() + initial_suffix.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            actual: prefix.len() + initial_suffix.len(),
        });
    }
    if let Some(bad) = initial_suffix.iter().find(|c| !c.is_finite() || **c <= 0.0) {
        return Err(ModelError::invalid(
            "initial_consumption",
            format!("starting consumption must be finite and > 0, got {bad}"),
        ));
    }

    let mut x: Param = initial_suffix.iter().map(|c| c.ln()).collect();
    let initial_consumption = full_consumption(prefix, &x);
    let initial_assets = roll_forward_assets(scenario, &initial_consumption)?;
    let initial_score = objective.score(scenario, &initial_consumption, &initial_assets);
    if !initial_score.is_finite() {
        return Err(ModelError::NonFiniteCost {
            value: initial_score,
        });
    }
    let scale = if initial_score.abs() > f64::MIN_POSITIVE {
        initial_score.abs()
    } else {
        1.0
    };
    let asset_unit = scenario.params().initial_assets.abs().max(1.0);

    let mut iterations = 0;
    let mut converged = true;
    let mut status = String::new();
    for &penalty in &settings.penalty_schedule {
        let problem = ConsumptionProblem {
            scenario,
            objective,
            prefix,
            scale,
            penalty,
            asset_unit,
        };
        let outcome = run_lbfgs(problem, x, settings)?;
        debug!(
            "{} penalty {penalty:e}: cost {:.6e} after {} iterations ({})",
            objective.name(),
            outcome.cost,
            outcome.iterations,
            outcome.status
        );
        iterations += outcome.iterations;
        converged = outcome.converged;
        status = outcome.status;
        x = outcome.param;
    }

    let consumption = full_consumption(prefix, &x);
    let assets = roll_forward_assets(scenario, &consumption)?;
    let score = objective.score(scenario, &consumption, &assets);
    let shortfall = asset_shortfall(&assets);
    let feasible = shortfall >= -settings.feasibility_tolerance;

    let message = match (converged, feasible) {
        (true, true) => format!("Optimization converged ({status})."),
        (false, true) => format!("Optimizer stopped before convergence ({status})."),
        (_, false) => format!(
            "Result violates the non-negative asset constraint (shortfall {shortfall:.3e})."
        ),
    };
    if !converged || !feasible {
        warn!("{}: {message}", objective.name());
    }

    Ok(MinimizedTrajectory {
        consumption,
        assets,
        score,
        converged,
        feasible,
        iterations,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::objective::{ExpectedUtility, SimpleSum};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    struct Quadratic {
        target: Vec<f64>,
    }

    impl CostFunction for Quadratic {
        type Param = Param;
        type Output = f64;

        fn cost(&self, x: &Param) -> Result<f64, Error> {
            Ok(x.iter().zip(&self.target).map(|(a, b)| (a - b).powi(2)).sum())
        }
    }

    impl Gradient for Quadratic {
        type Param = Param;
        type Gradient = Param;

        fn gradient(&self, x: &Param) -> Result<Param, Error> {
            central_gradient(x, |x| self.cost(x))
        }
    }

    #[test]
    fn run_lbfgs_finds_quadratic_minimum() {
        let problem = Quadratic {
            target: vec![1.0, -2.0, 3.5],
        };
        let outcome =
            run_lbfgs(problem, vec![0.0; 3], &MinimizerSettings::default()).expect("must run");
        assert!(outcome.converged, "{}", outcome.status);
        assert_close(outcome.param[0], 1.0, 1e-5);
        assert_close(outcome.param[1], -2.0, 1e-5);
        assert_close(outcome.param[2], 3.5, 1e-5);
    }

    #[test]
    fn central_gradient_surfaces_closure_errors() {
        let err = central_gradient(&vec![1.0, 2.0], |_| {
            Err(ModelError::NonFiniteCost { value: f64::NAN }.into())
        })
        .expect_err("closure error must surface");
        assert!(matches!(
            ModelError::from(err),
            ModelError::NonFiniteCost { .. }
        ));
    }

    #[test]
    fn settings_validation_rejects_bad_values() {
        let bad = [
            MinimizerSettings {
                initial_consumption: 0.0,
                ..MinimizerSettings::default()
            },
            MinimizerSettings {
                penalty_schedule: vec![],
                ..MinimizerSettings::default()
            },
            MinimizerSettings {
                penalty_schedule: vec![1.0, f64::INFINITY],
                ..MinimizerSettings::default()
            },
            MinimizerSettings {
                lbfgs_memory: 0,
                ..MinimizerSettings::default()
            },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
        assert!(MinimizerSettings::default().validate().is_ok());
    }

    #[test]
    fn suffix_length_must_complete_the_lifespan() {
        let scenario = Scenario::standard();
        let err = minimize_suffix(
            &scenario,
            &SimpleSum,
            &[10.0; 3],
            &[10.0; 3],
            &MinimizerSettings::default(),
        )
        .expect_err("wrong length");
        assert_eq!(
            err,
            ModelError::DimensionMismatch {
                expected: 64,
                actual: 6
            }
        );
    }

    #[test]
    fn minimized_trajectory_beats_starting_point_and_stays_solvent() {
        let scenario = Scenario::standard();
        let settings = MinimizerSettings::default();
        let objective = ExpectedUtility {
            reference_age: scenario.initial_age(),
        };
        let start = vec![settings.initial_consumption; scenario.lifespan_len()];
        let start_assets = roll_forward_assets(&scenario, &start).expect("valid length");
        let start_score = objective.score(&scenario, &start, &start_assets);

        let result = minimize_trajectory(&scenario, &objective, &settings).expect("must optimize");
        assert_eq!(result.consumption.len(), 64);
        assert_eq!(result.assets.len(), 65);
        assert!(result.score > start_score);
        assert!(result.feasible, "{}", result.message);
        assert!(result.consumption.iter().all(|c| *c > 0.0));
    }

    #[test]
    fn overspending_without_penalty_is_flagged_infeasible() {
        let scenario = Scenario::standard();
        let settings = MinimizerSettings {
            initial_consumption: 1000.0,
            max_iterations: 1,
            penalty_schedule: vec![0.0],
            ..MinimizerSettings::default()
        };
        let result = minimize_trajectory(&scenario, &SimpleSum, &settings)
            .expect("infeasibility is reported, not raised");
        assert!(!result.feasible);
        assert!(!result.converged);
        assert!(asset_shortfall(&result.assets) < -settings.feasibility_tolerance);
        assert!(result.message.contains("non-negative asset constraint"));
    }

    #[test]
    fn iteration_cap_is_flagged_not_converged() {
        let scenario = Scenario::standard();
        let settings = MinimizerSettings {
            max_iterations: 1,
            penalty_schedule: vec![1e6],
            ..MinimizerSettings::default()
        };
        let objective = ExpectedUtility {
            reference_age: scenario.initial_age(),
        };
        let result = minimize_trajectory(&scenario, &objective, &settings)
            .expect("early stop is reported, not raised");
        assert!(!result.converged);
        assert!(result.feasible, "{}", result.message);
        assert!(result.iterations <= 1);
        assert!(result.message.contains("stopped before convergence"));
    }

    #[test]
    fn fixed_prefix_is_left_untouched() {
        let scenario = Scenario::standard();
        let prefix = vec![120.0; 10];
        let suffix = vec![10.0; scenario.lifespan_len() - prefix.len()];
        let objective = ExpectedUtility { reference_age: 32 };
        let result = minimize_suffix(
            &scenario,
            &objective,
            &prefix,
            &suffix,
            &MinimizerSettings::default(),
        )
        .expect("must optimize");
        assert_eq!(&result.consumption[..10], prefix.as_slice());
    }
}
