use log::info;
use serde::{Deserialize, Serialize};

use super::engine::{
    asset_shortfall, bequest_utility, death_probability, period_utility, roll_forward_assets,
};
use super::errors::{ModelError, ModelResult};
use super::optimizer::{MinimizerSettings, minimize_suffix, minimize_trajectory};
use super::scenario::Scenario;
use super::solver::{BoundarySolveConfig, solve_terminal_assets};
use super::types::Trajectory;

/// Scores a full consumption path; higher is better.
///
/// `assets` is the rolled-forward asset path for `consumption` and has one
/// more entry, so `assets[i + 1]` is what the household leaves at age
/// `initial_age + i`.
pub trait TrajectoryObjective {
    fn name(&self) -> &'static str;

    fn score(&self, scenario: &Scenario, consumption: &[f64], assets: &[f64]) -> f64;
}

// (U(C), α·W(A)) for one age; the bequest term only exists once the hazard
// is positive.
fn age_terms(scenario: &Scenario, age: u32, consumption: f64, bequest_assets: f64) -> (f64, f64) {
    let hazard = death_probability(scenario, age);
    let alive = period_utility(scenario, consumption);
    let bequest = if hazard > 0.0 {
        bequest_utility(scenario, bequest_assets) * scenario.impatience()
    } else {
        0.0
    };
    (alive, bequest)
}

/// Σ (1 − P_t)·U(C_t) + P_t·W(A_{t+1})·α, without discounting across ages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleSum;

impl TrajectoryObjective for SimpleSum {
    fn name(&self) -> &'static str {
        "simple-sum"
    }

    fn score(&self, scenario: &Scenario, consumption: &[f64], assets: &[f64]) -> f64 {
        scenario
            .ages()
            .zip(consumption)
            .zip(assets.iter().skip(1))
            .map(|((age, &c), &a)| {
                let hazard = death_probability(scenario, age);
                let (alive, bequest) = age_terms(scenario, age, c, a);
                (1.0 - hazard) * alive + hazard * bequest
            })
            .sum()
    }
}

/// Expected discounted utility as seen from `reference_age`; ages before it
/// do not contribute.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedUtility {
    pub reference_age: u32,
}

impl TrajectoryObjective for ExpectedUtility {
    fn name(&self) -> &'static str {
        "expected-utility"
    }

    fn score(&self, scenario: &Scenario, consumption: &[f64], assets: &[f64]) -> f64 {
        let initial = scenario.initial_age();
        let alpha = scenario.impatience();
        let mut survival = 1.0;
        let mut discount = 1.0;
        let mut total = 0.0;
        for age in self.reference_age.max(initial)..=scenario.terminal_age() {
            let idx = (age - initial) as usize;
            let (Some(&c), Some(&a)) = (consumption.get(idx), assets.get(idx + 1)) else {
                break;
            };
            let hazard = death_probability(scenario, age);
            survival *= 1.0 - hazard;
            let (alive, bequest) = age_terms(scenario, age, c, a);
            total += survival * (alive + hazard / (1.0 - hazard) * bequest) * discount;
            discount *= alpha;
        }
        total
    }
}

/// V_t = (1 − P_t)·U(C_t) + P_t·W(A_{t+1})·α + (1 − P_t)·α·V_{t+1}, V_{T+1} = 0;
/// scores V at the initial age.
#[derive(Debug, Clone, Copy, Default)]
pub struct BellmanValue;

impl TrajectoryObjective for BellmanValue {
    fn name(&self) -> &'static str {
        "bellman"
    }

    fn score(&self, scenario: &Scenario, consumption: &[f64], assets: &[f64]) -> f64 {
        let alpha = scenario.impatience();
        scenario
            .ages()
            .zip(consumption)
            .zip(assets.iter().skip(1))
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .fold(0.0, |value, ((age, &c), &a)| {
                let hazard = death_probability(scenario, age);
                let (alive, bequest) = age_terms(scenario, age, c, a);
                (1.0 - hazard) * alive + hazard * bequest + (1.0 - hazard) * alpha * value
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ScoringStrategy {
    ClosedForm,
    SimpleSum,
    #[serde(rename_all = "camelCase")]
    ExpectedUtility {
        reference_age: u32,
    },
    Bellman,
    SequentialReplanning,
}

impl ScoringStrategy {
    pub fn all(scenario: &Scenario) -> [ScoringStrategy; 5] {
        [
            ScoringStrategy::ClosedForm,
            ScoringStrategy::SimpleSum,
            ScoringStrategy::ExpectedUtility {
                reference_age: scenario.initial_age(),
            },
            ScoringStrategy::Bellman,
            ScoringStrategy::SequentialReplanning,
        ]
    }

    pub fn label(&self) -> String {
        match self {
            ScoringStrategy::ClosedForm => "closed-form".to_string(),
            ScoringStrategy::SimpleSum => "simple-sum".to_string(),
            ScoringStrategy::ExpectedUtility { reference_age } => {
                format!("expected-utility@{reference_age}")
            }
            ScoringStrategy::Bellman => "bellman".to_string(),
            ScoringStrategy::SequentialReplanning => "sequential-replanning".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SolveSettings {
    pub boundary: BoundarySolveConfig,
    pub minimizer: MinimizerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrajectorySolution {
    pub strategy: ScoringStrategy,
    pub trajectory: Trajectory,
    /// Expected utility from the initial age, comparable across strategies.
    pub lifetime_utility: f64,
    pub converged: bool,
    pub feasible: bool,
    pub iterations: u64,
    pub message: String,
    /// Shooting root, only for the closed-form strategy.
    pub terminal_assets: Option<f64>,
}

pub fn solve_trajectory(
    scenario: &Scenario,
    strategy: ScoringStrategy,
    settings: &SolveSettings,
) -> ModelResult<TrajectorySolution> {
    let initial_age = scenario.initial_age();
    let solution = match strategy {
        ScoringStrategy::ClosedForm => {
            let result = solve_terminal_assets(scenario, settings.boundary)?;
            let trajectory = result.path.trajectory();
            let feasible =
                asset_shortfall(&trajectory.assets) >= -settings.minimizer.feasibility_tolerance;
            TrajectorySolution {
                strategy,
                lifetime_utility: lifetime_utility(scenario, &trajectory),
                trajectory,
                converged: result.converged,
                feasible,
                iterations: result.iterations.len() as u64,
                message: result.message,
                terminal_assets: Some(result.terminal_assets),
            }
        }
        ScoringStrategy::SimpleSum => {
            minimized_solution(scenario, strategy, &SimpleSum, &settings.minimizer)?
        }
        ScoringStrategy::ExpectedUtility { reference_age } => {
            if reference_age < initial_age || reference_age > scenario.terminal_age() {
                return Err(ModelError::invalid(
                    "reference_age",
                    format!(
                        "must be between {initial_age} and {}",
                        scenario.terminal_age()
                    ),
                ));
            }
            minimized_solution(
                scenario,
                strategy,
                &ExpectedUtility { reference_age },
                &settings.minimizer,
            )?
        }
        ScoringStrategy::Bellman => {
            minimized_solution(scenario, strategy, &BellmanValue, &settings.minimizer)?
        }
        ScoringStrategy::SequentialReplanning => {
            replan_sequentially(scenario, &settings.minimizer)?
        }
    };

    info!(
        "{} solved: lifetime utility {:.6e}, converged = {}",
        strategy.label(),
        solution.lifetime_utility,
        solution.converged
    );
    Ok(solution)
}

fn lifetime_utility(scenario: &Scenario, trajectory: &Trajectory) -> f64 {
    ExpectedUtility {
        reference_age: scenario.initial_age(),
    }
    .score(scenario, &trajectory.consumption, &trajectory.assets)
}

fn minimized_solution(
    scenario: &Scenario,
    strategy: ScoringStrategy,
    objective: &dyn TrajectoryObjective,
    settings: &MinimizerSettings,
) -> ModelResult<TrajectorySolution> {
    let result = minimize_trajectory(scenario, objective, settings)?;
    let trajectory = Trajectory {
        initial_age: scenario.initial_age(),
        consumption: result.consumption,
        assets: result.assets,
    };
    Ok(TrajectorySolution {
        strategy,
        lifetime_utility: lifetime_utility(scenario, &trajectory),
        trajectory,
        converged: result.converged,
        feasible: result.feasible,
        iterations: result.iterations,
        message: result.message,
        terminal_assets: None,
    })
}

/// Re-optimizes expected utility at every age, keeping only that age's
/// consumption. Each stage starts from the previous stage's plan for the
/// remaining ages.
pub fn replan_sequentially(
    scenario: &Scenario,
    settings: &MinimizerSettings,
) -> ModelResult<TrajectorySolution> {
    settings.validate()?;
    let mut committed: Vec<f64> = Vec::with_capacity(scenario.lifespan_len());
    let mut plan = vec![settings.initial_consumption; scenario.lifespan_len()];
    let mut converged = true;
    let mut feasible = true;
    let mut iterations = 0;

    for age in scenario.ages() {
        let objective = ExpectedUtility { reference_age: age };
        let stage = minimize_suffix(scenario, &objective, &committed, &plan, settings)?;
        converged &= stage.converged;
        feasible &= stage.feasible;
        iterations += stage.iterations;

        let idx = committed.len();
        committed.push(stage.consumption[idx]);
        plan = stage.consumption[idx + 1..].to_vec();
    }

    let assets = roll_forward_assets(scenario, &committed)?;
    let feasible = feasible && asset_shortfall(&assets) >= -settings.feasibility_tolerance;
    let trajectory = Trajectory {
        initial_age: scenario.initial_age(),
        consumption: committed,
        assets,
    };
    let message = if converged && feasible {
        "Every re-planning stage converged.".to_string()
    } else if !feasible {
        "Re-planned path violates the non-negative asset constraint.".to_string()
    } else {
        "At least one re-planning stage stopped before convergence.".to_string()
    };

    Ok(TrajectorySolution {
        strategy: ScoringStrategy::SequentialReplanning,
        lifetime_utility: lifetime_utility(scenario, &trajectory),
        trajectory,
        converged,
        feasible,
        iterations,
        message,
        terminal_assets: None,
    })
}
