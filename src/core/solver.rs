use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::engine::{PathRecursion, boundary_mismatch, run_path_recursion};
use super::errors::{ModelError, ModelResult};
use super::scenario::{Scenario, figure_catalogue};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoundarySolveConfig {
    /// Accepted |mismatch| at the root.
    pub tolerance: f64,
    pub max_iterations: u32,
    /// Central-difference step, relative to the current guess.
    pub derivative_step: f64,
    pub max_halvings: u32,
}

impl Default for BoundarySolveConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iterations: 50,
            derivative_step: 1e-6,
            max_halvings: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundarySolveIteration {
    pub iteration: u32,
    pub terminal_assets: f64,
    pub mismatch: f64,
    pub derivative: f64,
    pub damping: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundarySolveResult {
    pub initial_guess: f64,
    pub terminal_assets: f64,
    pub mismatch: f64,
    pub iterations: Vec<BoundarySolveIteration>,
    pub converged: bool,
    pub message: String,
    pub path: PathRecursion,
}

/// Shoots on the terminal asset A_{T+1} until the backward and forward
/// phases agree on retirement-age assets. The initial asset seeds the search.
pub fn solve_terminal_assets(
    scenario: &Scenario,
    config: BoundarySolveConfig,
) -> ModelResult<BoundarySolveResult> {
    validate_config(config)?;

    let initial_guess = scenario.params().initial_assets;
    let search = damped_newton(|x| boundary_mismatch(scenario, x), initial_guess, config)?;

    if search.converged {
        info!(
            "boundary solved: A_T+1 = {:.6} after {} iterations (mismatch {:.3e})",
            search.root,
            search.iterations.len(),
            search.mismatch
        );
    } else {
        warn!("boundary solver did not converge: {}", search.message);
    }

    let path = run_path_recursion(scenario, search.root)?;
    Ok(BoundarySolveResult {
        initial_guess,
        terminal_assets: search.root,
        mismatch: path.mismatch,
        iterations: search.iterations,
        converged: search.converged,
        message: search.message,
        path,
    })
}

struct NewtonSearch {
    root: f64,
    mismatch: f64,
    iterations: Vec<BoundarySolveIteration>,
    converged: bool,
    message: String,
}

// Newton on a scalar residual with central-difference slope and step
// halving. Only a failure at the starting point is an error; later failures
// end the search with `converged = false`.
fn damped_newton<F>(
    mismatch: F,
    initial_guess: f64,
    config: BoundarySolveConfig,
) -> ModelResult<NewtonSearch>
where
    F: Fn(f64) -> ModelResult<f64>,
{
    let mut x = initial_guess;
    let mut fx = mismatch(x)?;
    let mut iterations = Vec::with_capacity(config.max_iterations.min(64) as usize);
    let mut converged = fx.abs() <= config.tolerance;
    let mut message = if converged {
        "Initial guess already satisfies the boundary condition.".to_string()
    } else {
        String::new()
    };

    let mut it = 0;
    while !converged && it < config.max_iterations {
        it += 1;
        let h = config.derivative_step * x.abs().max(1.0);
        let derivative = match (mismatch(x + h), mismatch(x - h)) {
            (Ok(up), Ok(down)) => (up - down) / (2.0 * h),
            _ => f64::NAN,
        };
        if !derivative.is_finite() || derivative == 0.0 {
            message = format!("Mismatch derivative is degenerate at A_T+1 = {x}.");
            break;
        }

        let step = fx / derivative;
        let mut damping = 1.0;
        let mut accepted = None;
        for _ in 0..=config.max_halvings {
            let candidate = x - damping * step;
            if let Ok(value) = mismatch(candidate)
                && value.abs() < fx.abs()
            {
                accepted = Some((candidate, value));
                break;
            }
            damping *= 0.5;
        }

        let Some((next_x, next_fx)) = accepted else {
            message = format!("Step halving failed to reduce the mismatch at A_T+1 = {x}.");
            break;
        };

        iterations.push(BoundarySolveIteration {
            iteration: it,
            terminal_assets: next_x,
            mismatch: next_fx,
            derivative,
            damping,
        });
        debug!(
            "boundary iteration {it}: A_T+1 = {next_x:.9}, mismatch = {next_fx:.3e}, damping = {damping}"
        );

        let moved = (next_x - x).abs();
        x = next_x;
        fx = next_fx;
        if fx.abs() <= config.tolerance {
            converged = true;
            message = "Boundary condition satisfied.".to_string();
        } else if moved <= f64::EPSILON * x.abs().max(1.0) {
            converged = true;
            message = "Step fell below machine precision; mismatch is at its numerical floor."
                .to_string();
        }
    }

    if !converged && message.is_empty() {
        message = "Reached max iterations before tolerance was met; returning best estimate."
            .to_string();
    }

    Ok(NewtonSearch {
        root: x,
        mismatch: fx,
        iterations,
        converged,
        message,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FigureSolution {
    pub name: &'static str,
    pub description: &'static str,
    pub scenario: Scenario,
    pub result: BoundarySolveResult,
}

/// Resolves one named textbook figure with the boundary solver.
pub fn solve_figure(name: &str, config: BoundarySolveConfig) -> ModelResult<FigureSolution> {
    let figure = figure_catalogue()
        .into_iter()
        .find(|figure| figure.name == name)
        .ok_or_else(|| ModelError::invalid("figure", format!("unknown figure `{name}`")))?;
    let scenario = Scenario::new(&figure.spec)?;
    let result = solve_terminal_assets(&scenario, config)?;
    Ok(FigureSolution {
        name: figure.name,
        description: figure.description,
        scenario,
        result,
    })
}

fn validate_config(config: BoundarySolveConfig) -> ModelResult<()> {
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(ModelError::invalid("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(ModelError::invalid("max_iterations", "must be > 0"));
    }
    if !config.derivative_step.is_finite() || config.derivative_step <= 0.0 {
        return Err(ModelError::invalid("derivative_step", "must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{next_assets, roll_forward_assets};
    use crate::core::types::{LifespanCase, ParameterName, ScenarioSpec};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn solve(spec: &ScenarioSpec) -> BoundarySolveResult {
        let scenario = Scenario::new(spec).expect("valid scenario");
        solve_terminal_assets(&scenario, BoundarySolveConfig::default()).expect("must solve")
    }

    #[test]
    fn standard_scenario_converges_near_reference_value() {
        let result = solve(&ScenarioSpec::standard());
        assert!(result.converged, "{}", result.message);
        assert_close(result.terminal_assets, 141.0, 141.0 * 0.01);
        assert_close(result.terminal_assets, 141.1929, 1e-3);
        assert!(result.mismatch.abs() < 1e-6);
        assert_eq!(result.initial_guess, 200.0);
        assert!(!result.iterations.is_empty());
        assert!(result.iterations.len() <= 10);
    }

    #[test]
    fn converged_path_satisfies_budget_round_trip() {
        let scenario = Scenario::standard();
        let result =
            solve_terminal_assets(&scenario, BoundarySolveConfig::default()).expect("must solve");
        let consumption = result.path.consumption();
        let engine_assets = result.path.assets();
        let rolled = roll_forward_assets(&scenario, &consumption).expect("matching length");

        assert_eq!(rolled.len(), engine_assets.len());
        for (r, e) in rolled.iter().zip(&engine_assets) {
            assert_close(*r, *e, 1e-6 * e.abs().max(1.0));
        }
        assert_close(
            next_assets(&scenario, 85, engine_assets[63], consumption[63]),
            result.terminal_assets,
            1e-6,
        );
    }

    #[test]
    fn override_round_trip_reproduces_standard_path_exactly() {
        let standard = solve(&ScenarioSpec::standard());

        let mut spec = ScenarioSpec::standard().with_alternative(ParameterName::InterestRate);
        let alternative = solve(&spec);
        assert!(alternative.terminal_assets != standard.terminal_assets);

        spec.overrides.interest_rate = Some(0.04);
        let restored = solve(&spec);
        assert_eq!(restored.terminal_assets, standard.terminal_assets);
        assert_eq!(restored.path, standard.path);
    }

    #[test]
    fn figure_scenarios_converge_to_their_shooting_roots() {
        let expected = [
            ("4-1", 141.193),
            ("4-2", 174.780),
            ("4-3", 158.800),
            ("4-4", 126.219),
            ("4-5", 145.534),
            ("4-6", 137.886),
            ("4-7", 115.677),
            ("4-8", 155.176),
            ("4-9", 758.834),
            ("4-10", 120.842),
        ];
        let figures = figure_catalogue();
        for (name, root) in expected {
            let figure = figures
                .iter()
                .find(|f| f.name == name)
                .unwrap_or_else(|| panic!("figure {name} missing"));
            let result = solve(&figure.spec);
            assert!(result.converged, "figure {name}: {}", result.message);
            assert_close(result.terminal_assets, root, 1e-2);
        }
    }

    #[test]
    fn solve_figure_resolves_by_name() {
        let figure = solve_figure("4-9", BoundarySolveConfig::default()).expect("known figure");
        assert_eq!(figure.description, "case II, alternative bequest weight");
        assert_eq!(figure.scenario.terminal_age(), 90);
        assert_close(figure.result.terminal_assets, 758.834, 1e-2);

        let err = solve_figure("4-11", BoundarySolveConfig::default()).expect_err("unknown");
        assert!(err.to_string().contains("4-11"));
    }

    #[test]
    fn case_two_path_has_longer_retirement() {
        let result = solve(&ScenarioSpec::standard().with_lifespan(LifespanCase::CaseII));
        assert_eq!(result.path.backward.len(), 25);
        assert_eq!(result.path.trajectory().terminal_age(), 90);
    }

    #[test]
    fn max_iterations_exhaustion_is_reported_not_raised() {
        let scenario = Scenario::standard();
        let config = BoundarySolveConfig {
            max_iterations: 1,
            tolerance: 1e-14,
            ..BoundarySolveConfig::default()
        };
        let result = solve_terminal_assets(&scenario, config).expect("must return result");
        assert_eq!(result.iterations.len(), 1);
        assert!(!result.converged);
        assert!(result.message.contains("max iterations"));
        assert!(result.mismatch.abs() > 1e-3);
    }

    #[test]
    fn flat_mismatch_reports_degenerate_derivative() {
        let search = damped_newton(|_| Ok(1.0), 200.0, BoundarySolveConfig::default())
            .expect("starting point is finite");
        assert!(!search.converged);
        assert!(search.iterations.is_empty());
        assert!(search.message.contains("derivative is degenerate"));
        assert_eq!(search.root, 200.0);
    }

    #[test]
    fn failing_slope_evaluation_reports_degenerate_derivative() {
        let mismatch = |x: f64| {
            if x == 200.0 {
                Ok(5.0)
            } else {
                Err(ModelError::NonFiniteValue {
                    stage: "backward",
                    quantity: "consumption",
                    age: 85,
                    value: f64::NAN,
                })
            }
        };
        let search = damped_newton(mismatch, 200.0, BoundarySolveConfig::default())
            .expect("starting point is finite");
        assert!(!search.converged);
        assert!(search.message.contains("derivative is degenerate"));
    }

    #[test]
    fn rejected_steps_report_halving_failure() {
        // Finite only in a narrow window around the start, so every damped
        // Newton candidate lands outside it.
        let mismatch = |x: f64| {
            if (x - 200.0).abs() <= 1e-3 {
                Ok(1.0 + (x - 200.0))
            } else {
                Err(ModelError::NonFiniteValue {
                    stage: "forward",
                    quantity: "assets",
                    age: 64,
                    value: f64::NAN,
                })
            }
        };
        let config = BoundarySolveConfig {
            max_halvings: 5,
            ..BoundarySolveConfig::default()
        };
        let search = damped_newton(mismatch, 200.0, config).expect("starting point is finite");
        assert!(!search.converged);
        assert!(search.iterations.is_empty());
        assert!(search.message.contains("Step halving failed"));
        assert_eq!(search.root, 200.0);
    }

    #[test]
    fn non_finite_starting_point_is_an_error() {
        let scenario = Scenario::standard();
        let err = damped_newton(
            |x| boundary_mismatch(&scenario, x),
            -500.0,
            BoundarySolveConfig::default(),
        );
        assert!(matches!(err, Err(ModelError::NonFiniteValue { .. })));
    }

    #[test]
    fn rejects_invalid_config() {
        let scenario = Scenario::standard();
        for config in [
            BoundarySolveConfig {
                tolerance: 0.0,
                ..BoundarySolveConfig::default()
            },
            BoundarySolveConfig {
                max_iterations: 0,
                ..BoundarySolveConfig::default()
            },
            BoundarySolveConfig {
                derivative_step: f64::NAN,
                ..BoundarySolveConfig::default()
            },
        ] {
            let err = solve_terminal_assets(&scenario, config).expect_err("invalid config");
            assert!(matches!(err, ModelError::InvalidParameter { .. }));
        }
    }
}
