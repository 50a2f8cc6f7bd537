use serde::Serialize;

use super::errors::{ModelError, ModelResult, ensure_finite};
use super::scenario::Scenario;
use super::types::Trajectory;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgeStep {
    pub age: u32,
    pub consumption: f64,
    /// Assets held entering `age`.
    pub assets: f64,
}

/// Result of one shooting pass for a given terminal-asset guess.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRecursion {
    pub terminal_assets: f64,
    /// Ages `initial..retirement`, ascending.
    pub forward: Vec<AgeStep>,
    /// Retirement age, computed by the backward pass only.
    pub retirement: AgeStep,
    /// Ages `retirement+1..=terminal`, ascending.
    pub backward: Vec<AgeStep>,
    /// Retirement-age assets reached by rolling the forward phase.
    pub forward_retirement_assets: f64,
    pub mismatch: f64,
}

impl PathRecursion {
    fn steps(&self) -> impl Iterator<Item = &AgeStep> {
        self.forward
            .iter()
            .chain(std::iter::once(&self.retirement))
            .chain(self.backward.iter())
    }

    pub fn consumption(&self) -> Vec<f64> {
        self.steps().map(|step| step.consumption).collect()
    }

    pub fn assets(&self) -> Vec<f64> {
        self.steps()
            .map(|step| step.assets)
            .chain(std::iter::once(self.terminal_assets))
            .collect()
    }

    pub fn trajectory(&self) -> Trajectory {
        let initial_age = self
            .forward
            .first()
            .map(|step| step.age)
            .unwrap_or(self.retirement.age);
        Trajectory {
            initial_age,
            consumption: self.consumption(),
            assets: self.assets(),
        }
    }
}

/// P(t): probability of dying at `age`; zero before retirement.
pub fn death_probability(scenario: &Scenario, age: u32) -> f64 {
    let retirement = scenario.retirement_age();
    if age < retirement {
        return 0.0;
    }
    1.0 - (1.0 + scenario.mortality()).powf(retirement as f64 - age as f64)
}

/// Φ(from, to) = Π (1 - P(t)) for t in from..=to.
pub fn survival_probability(scenario: &Scenario, from: u32, to: u32) -> f64 {
    (from..=to)
        .map(|age| 1.0 - death_probability(scenario, age))
        .product()
}

pub fn period_utility(scenario: &Scenario, consumption: f64) -> f64 {
    let gamma = scenario.params().risk_aversion;
    consumption.powf(1.0 - gamma) / (1.0 - gamma)
}

pub fn bequest_utility(scenario: &Scenario, assets: f64) -> f64 {
    let params = scenario.params();
    let gamma = params.risk_aversion;
    params.bequest_weight * assets.powf(1.0 - gamma) / (1.0 - gamma)
}

/// Budget identity: assets entering `age + 1`.
pub fn next_assets(scenario: &Scenario, age: u32, assets: f64, consumption: f64) -> f64 {
    (assets + scenario.disposable_income(age) - consumption) * scenario.gross_rate()
}

/// Rolls assets forward from the initial asset through every age of
/// `consumption`; the result has one more entry than the input.
pub fn roll_forward_assets(scenario: &Scenario, consumption: &[f64]) -> ModelResult<Vec<f64>> {
    let expected = scenario.lifespan_len();
    if consumption.len() != expected {
        return Err(ModelError::DimensionMismatch {
            expected,
            actual: consumption.len(),
        });
    }

    let mut assets = Vec::with_capacity(expected + 1);
    let mut current = scenario.params().initial_assets;
    assets.push(current);
    for (age, &spent) in scenario.ages().zip(consumption) {
        current = next_assets(scenario, age, current, spent);
        assets.push(current);
    }
    Ok(assets)
}

/// Sum of the negative entries; zero when no asset goes below zero.
pub fn asset_shortfall(assets: &[f64]) -> f64 {
    assets.iter().filter(|&&a| a < 0.0).sum()
}

pub fn boundary_mismatch(scenario: &Scenario, terminal_assets: f64) -> ModelResult<f64> {
    run_path_recursion(scenario, terminal_assets).map(|path| path.mismatch)
}

pub fn run_path_recursion(scenario: &Scenario, terminal_assets: f64) -> ModelResult<PathRecursion> {
    let terminal_assets = ensure_finite(
        "backward",
        "terminal assets",
        scenario.terminal_age(),
        terminal_assets,
    )?;
    let (retirement, backward) = backward_phase(scenario, terminal_assets)?;
    let after_retirement_assets = backward
        .first()
        .map(|step| step.assets)
        .unwrap_or(terminal_assets);
    let (forward, forward_retirement_assets) = forward_phase(scenario, after_retirement_assets)?;

    Ok(PathRecursion {
        terminal_assets,
        forward,
        retirement,
        backward,
        forward_retirement_assets,
        mismatch: retirement.assets - forward_retirement_assets,
    })
}

fn backward_phase(scenario: &Scenario, terminal_assets: f64) -> ModelResult<(AgeStep, Vec<AgeStep>)> {
    let params = scenario.params();
    let gamma = params.risk_aversion;
    let rho = scenario.gross_rate();
    let alpha = scenario.impatience();
    let odds_base = 1.0 + scenario.mortality();
    let retirement = scenario.retirement_age();
    let terminal = scenario.terminal_age();
    let years_retired = |age: u32| age as f64 - retirement as f64;

    let mut steps = Vec::with_capacity((terminal - retirement) as usize);

    let consumption = ensure_finite(
        "backward",
        "consumption",
        terminal,
        (rho * alpha * params.bequest_weight * (odds_base.powf(years_retired(terminal)) - 1.0))
            .powf(-1.0 / gamma)
            * terminal_assets,
    )?;
    let assets = ensure_finite(
        "backward",
        "assets",
        terminal,
        terminal_assets / rho + consumption - params.income_floor,
    )?;
    let mut next = AgeStep {
        age: terminal,
        consumption,
        assets,
    };
    steps.push(next);

    for age in (retirement + 1..terminal).rev() {
        let continuation = odds_base.powf(-years_retired(age) - 1.0) * next.consumption.powf(-gamma);
        let bequest = (odds_base.powf(years_retired(age)) - 1.0)
            * params.bequest_weight
            * next.assets.powf(-gamma);
        let consumption = ensure_finite(
            "backward",
            "consumption",
            age,
            ((continuation + bequest) * rho * alpha).powf(-1.0 / gamma),
        )?;
        let assets = ensure_finite(
            "backward",
            "assets",
            age,
            next.assets / rho + consumption - params.income_floor,
        )?;
        next = AgeStep {
            age,
            consumption,
            assets,
        };
        steps.push(next);
    }

    let consumption = ensure_finite(
        "backward",
        "consumption",
        retirement,
        (rho * alpha / odds_base * next.consumption.powf(-gamma)).powf(-1.0 / gamma),
    )?;
    let assets = ensure_finite(
        "backward",
        "assets",
        retirement,
        next.assets / rho + consumption - scenario.disposable_income(retirement),
    )?;
    let retirement_step = AgeStep {
        age: retirement,
        consumption,
        assets,
    };

    steps.reverse();
    Ok((retirement_step, steps))
}

fn forward_phase(scenario: &Scenario, after_retirement_assets: f64) -> ModelResult<(Vec<AgeStep>, f64)> {
    let params = scenario.params();
    let gamma = params.risk_aversion;
    let rho = scenario.gross_rate();
    let alpha = scenario.impatience();
    let retirement = scenario.retirement_age();

    let tilted = rho.powf(1.0 - gamma) * alpha;
    let growth = tilted.powf(1.0 / gamma);
    let risk_adjustment = 1.0 + 0.5 * gamma * (gamma + 1.0) * scenario.income_variance();

    let mut steps = Vec::with_capacity((retirement - scenario.initial_age()) as usize);
    let mut assets = params.initial_assets;
    for age in scenario.initial_age()..retirement {
        let remaining = retirement - age;
        let human_wealth: f64 = (0..=remaining)
            .map(|i| scenario.income(age + i) * rho.powi(-(i as i32)))
            .sum();
        let resources = assets + (1.0 - params.tax_rate) * human_wealth
            - after_retirement_assets * rho.powf(age as f64 - retirement as f64 - 1.0);
        let annuity = (1.0 - growth.powi(remaining as i32)) / (1.0 - growth);
        let consumption = ensure_finite(
            "forward",
            "consumption",
            age,
            resources / (1.0 + (tilted * annuity.powf(gamma) * risk_adjustment).powf(1.0 / gamma)),
        )?;
        steps.push(AgeStep {
            age,
            consumption,
            assets,
        });
        assets = ensure_finite(
            "forward",
            "assets",
            age + 1,
            next_assets(scenario, age, assets, consumption),
        )?;
    }
    Ok((steps, assets))
}
