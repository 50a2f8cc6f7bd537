use serde::Serialize;

use super::errors::{ModelError, ModelResult};
use super::objective::{ScoringStrategy, SolveSettings, TrajectorySolution, solve_trajectory};
use super::scenario::Scenario;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairwiseDifference {
    pub left: String,
    pub right: String,
    pub sum_squared_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub solutions: Vec<TrajectorySolution>,
    /// SSD of each solution's consumption against the closed form, in
    /// `solutions` order.
    pub against_closed_form: Vec<f64>,
    pub pairwise: Vec<PairwiseDifference>,
}

pub fn sum_squared_difference(left: &[f64], right: &[f64]) -> ModelResult<f64> {
    if left.len() != right.len() {
        return Err(ModelError::DimensionMismatch {
            expected: left.len(),
            actual: right.len(),
        });
    }
    Ok(left.iter().zip(right).map(|(a, b)| (a - b).powi(2)).sum())
}

/// Solves `strategies` on one scenario; the closed form is always included
/// (first) as the reference.
pub fn compare_strategies(
    scenario: &Scenario,
    strategies: &[ScoringStrategy],
    settings: &SolveSettings,
) -> ModelResult<ComparisonReport> {
    let mut ordered = vec![ScoringStrategy::ClosedForm];
    ordered.extend(
        strategies
            .iter()
            .copied()
            .filter(|s| *s != ScoringStrategy::ClosedForm),
    );

    let solutions = ordered
        .into_iter()
        .map(|strategy| solve_trajectory(scenario, strategy, settings))
        .collect::<ModelResult<Vec<_>>>()?;

    let reference = &solutions[0].trajectory.consumption;
    let against_closed_form = solutions
        .iter()
        .map(|s| sum_squared_difference(reference, &s.trajectory.consumption))
        .collect::<ModelResult<Vec<_>>>()?;

    let mut pairwise = Vec::new();
    for (i, left) in solutions.iter().enumerate() {
        for right in &solutions[i + 1..] {
            pairwise.push(PairwiseDifference {
                left: left.strategy.label(),
                right: right.strategy.label(),
                sum_squared_difference: sum_squared_difference(
                    &left.trajectory.consumption,
                    &right.trajectory.consumption,
                )?,
            });
        }
    }

    Ok(ComparisonReport {
        solutions,
        against_closed_form,
        pairwise,
    })
}
