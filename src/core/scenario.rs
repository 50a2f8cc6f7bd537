use serde::Serialize;

use super::errors::{ModelError, ModelResult};
use super::types::{
    BaseParameters, INCOME_TABLE, INCOME_VARIANCE, INITIAL_AGE, LifespanCase, ParameterName,
    RETIREMENT_AGE, ScenarioSpec,
};

/// Oldest accepted terminal age; bounds every per-age allocation.
pub const MAX_TERMINAL_AGE: u32 = 150;

/// Fully derived, immutable model configuration.
///
/// The only way to obtain one is through [`Scenario::new`] (or the
/// `standard` shortcut), so the derived rates and the retirement-age income
/// always agree with the base parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    params: BaseParameters,
    terminal_age: u32,
    mortality: f64,
    gross_rate: f64,
    impatience: f64,
    income: Vec<f64>,
}

impl Scenario {
    pub fn new(spec: &ScenarioSpec) -> ModelResult<Self> {
        let mut params = BaseParameters::STANDARD;
        for &name in &spec.alternatives {
            params = params.with(name, BaseParameters::ALTERNATIVE.get(name));
        }
        for name in ParameterName::ALL {
            if let Some(value) = spec.overrides.value(name) {
                params = params.with(name, value);
            }
        }
        let terminal_age = spec
            .overrides
            .terminal_age
            .unwrap_or_else(|| spec.lifespan.terminal_age());
        let mortality = spec
            .overrides
            .mortality
            .unwrap_or_else(|| spec.lifespan.mortality());

        validate(&params, terminal_age, mortality)?;
        Ok(derive(params, terminal_age, mortality))
    }

    pub fn standard() -> Self {
        let lifespan = LifespanCase::CaseI;
        derive(
            BaseParameters::STANDARD,
            lifespan.terminal_age(),
            lifespan.mortality(),
        )
    }

    pub fn params(&self) -> &BaseParameters {
        &self.params
    }

    pub fn initial_age(&self) -> u32 {
        INITIAL_AGE
    }

    pub fn retirement_age(&self) -> u32 {
        RETIREMENT_AGE
    }

    pub fn terminal_age(&self) -> u32 {
        self.terminal_age
    }

    pub fn mortality(&self) -> f64 {
        self.mortality
    }

    pub fn income_variance(&self) -> f64 {
        INCOME_VARIANCE
    }

    /// ρ = 1 + r
    pub fn gross_rate(&self) -> f64 {
        self.gross_rate
    }

    /// α = 1 / (1 + θ)
    pub fn impatience(&self) -> f64 {
        self.impatience
    }

    /// Number of ages from initial to terminal, inclusive.
    pub fn lifespan_len(&self) -> usize {
        (self.terminal_age - INITIAL_AGE + 1) as usize
    }

    pub fn ages(&self) -> impl Iterator<Item = u32> {
        INITIAL_AGE..=self.terminal_age
    }

    /// Pre-tax labour income for ages up to retirement, zero afterwards.
    pub fn income(&self, age: u32) -> f64 {
        age.checked_sub(INITIAL_AGE)
            .and_then(|idx| self.income.get(idx as usize).copied())
            .unwrap_or(0.0)
    }

    /// Resources available in `age` before consumption: after-tax income up to
    /// and including retirement, the income floor afterwards.
    pub fn disposable_income(&self, age: u32) -> f64 {
        if age <= RETIREMENT_AGE {
            (1.0 - self.params.tax_rate) * self.income(age)
        } else {
            self.params.income_floor
        }
    }
}

fn derive(params: BaseParameters, terminal_age: u32, mortality: f64) -> Scenario {
    let mut income = INCOME_TABLE.to_vec();
    if let Some(last) = income.last_mut() {
        *last += params.retirement_lump_sum;
    }
    Scenario {
        params,
        terminal_age,
        mortality,
        gross_rate: 1.0 + params.interest_rate,
        impatience: 1.0 / (1.0 + params.discount_rate),
        income,
    }
}

fn validate(params: &BaseParameters, terminal_age: u32, mortality: f64) -> ModelResult<()> {
    for name in ParameterName::ALL {
        if !params.get(name).is_finite() {
            return Err(ModelError::invalid(name.as_str(), "must be finite"));
        }
    }
    if params.risk_aversion <= 0.0 || (params.risk_aversion - 1.0).abs() < 1e-12 {
        return Err(ModelError::invalid(
            "risk_aversion",
            "must be > 0 and different from 1",
        ));
    }
    if params.interest_rate <= -1.0 {
        return Err(ModelError::invalid("interest_rate", "must be > -1"));
    }
    if params.discount_rate <= -1.0 {
        return Err(ModelError::invalid("discount_rate", "must be > -1"));
    }
    if !(0.0..1.0).contains(&params.tax_rate) {
        return Err(ModelError::invalid("tax_rate", "must be in [0, 1)"));
    }
    if params.bequest_weight <= 0.0 {
        return Err(ModelError::invalid("bequest_weight", "must be > 0"));
    }
    if params.income_floor < 0.0 {
        return Err(ModelError::invalid("income_floor", "must be >= 0"));
    }
    if terminal_age <= RETIREMENT_AGE || terminal_age > MAX_TERMINAL_AGE {
        return Err(ModelError::invalid(
            "terminal_age",
            format!("must be > retirement age {RETIREMENT_AGE} and <= {MAX_TERMINAL_AGE}"),
        ));
    }
    if !mortality.is_finite() || mortality <= 0.0 {
        return Err(ModelError::invalid("mortality", "must be finite and > 0"));
    }

    // The forward rule divides by 1 - g with g = (ρ^(1-γ)·α)^(1/γ).
    let gross_rate = 1.0 + params.interest_rate;
    let impatience = 1.0 / (1.0 + params.discount_rate);
    let growth = (gross_rate.powf(1.0 - params.risk_aversion) * impatience)
        .powf(1.0 / params.risk_aversion);
    if (1.0 - growth).abs() < 1e-12 {
        return Err(ModelError::invalid(
            "discount_rate",
            "consumption growth factor must differ from 1",
        ));
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FigureSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub spec: ScenarioSpec,
}

/// Scenario variants behind figures 4-1 through 4-10 (pp.77-86).
pub fn figure_catalogue() -> Vec<FigureSpec> {
    let standard = ScenarioSpec::standard();
    let case_two = ScenarioSpec::standard().with_lifespan(LifespanCase::CaseII);
    vec![
        FigureSpec {
            name: "4-1",
            description: "standard scenario, case I",
            spec: standard.clone(),
        },
        FigureSpec {
            name: "4-2",
            description: "alternative interest rate",
            spec: standard.clone().with_alternative(ParameterName::InterestRate),
        },
        FigureSpec {
            name: "4-3",
            description: "alternative tax rate",
            spec: standard.clone().with_alternative(ParameterName::TaxRate),
        },
        FigureSpec {
            name: "4-4",
            description: "alternative discount rate",
            spec: standard.clone().with_alternative(ParameterName::DiscountRate),
        },
        FigureSpec {
            name: "4-5",
            description: "retirement lump sum",
            spec: standard
                .clone()
                .with_alternative(ParameterName::RetirementLumpSum),
        },
        FigureSpec {
            name: "4-6",
            description: "alternative income floor",
            spec: standard.with_alternative(ParameterName::IncomeFloor),
        },
        FigureSpec {
            name: "4-7",
            description: "standard scenario, case II",
            spec: case_two.clone(),
        },
        FigureSpec {
            name: "4-8",
            description: "case II, alternative risk aversion",
            spec: case_two.clone().with_alternative(ParameterName::RiskAversion),
        },
        FigureSpec {
            name: "4-9",
            description: "case II, alternative bequest weight",
            spec: case_two.clone().with_alternative(ParameterName::BequestWeight),
        },
        FigureSpec {
            name: "4-10",
            description: "case II, alternative initial assets",
            spec: case_two.with_alternative(ParameterName::InitialAssets),
        },
    ]
}
