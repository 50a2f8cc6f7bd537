use serde::{Deserialize, Serialize};

pub const INITIAL_AGE: u32 = 22;
pub const RETIREMENT_AGE: u32 = 65;

// Variance of the income shock, p.74.
pub const INCOME_VARIANCE: f64 = 0.1625567;

// Average income by age, ages 22..=65 (p.75).
pub(crate) const INCOME_TABLE: [f64; (RETIREMENT_AGE - INITIAL_AGE + 1) as usize] = [
    154.7, 162.0, 168.4, 175.0, 182.4, 191.9, 201.0, 209.0, 217.3, 226.2, 235.4, // 22-32
    243.1, 251.0, 258.2, 267.1, 275.7, 284.0, 291.2, 298.9, 304.4, 310.5, 316.0, // 33-43
    319.7, 322.4, 325.4, 328.1, 326.6, 325.1, 323.8, 322.2, 321.7, 315.8, 308.4, // 44-54
    301.1, 292.1, 281.0, 267.0, 254.0, 243.5, 234.8, 228.5, 221.0, 214.9, 210.0, // 55-65
];

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseParameters {
    pub risk_aversion: f64,
    pub interest_rate: f64,
    pub discount_rate: f64,
    pub tax_rate: f64,
    pub bequest_weight: f64,
    pub initial_assets: f64,
    pub income_floor: f64,
    pub retirement_lump_sum: f64,
}

impl BaseParameters {
    pub const STANDARD: Self = Self {
        risk_aversion: 3.0,
        interest_rate: 0.04,
        discount_rate: 0.01,
        tax_rate: 0.3,
        bequest_weight: 0.5,
        initial_assets: 200.0,
        income_floor: 100.0,
        retirement_lump_sum: 0.0,
    };

    pub const ALTERNATIVE: Self = Self {
        risk_aversion: 4.0,
        interest_rate: 0.05,
        discount_rate: 0.02,
        tax_rate: 0.2,
        bequest_weight: 50.0,
        initial_assets: 400.0,
        income_floor: 70.0,
        retirement_lump_sum: 1000.0,
    };

    pub fn get(&self, name: ParameterName) -> f64 {
        match name {
            ParameterName::RiskAversion => self.risk_aversion,
            ParameterName::InterestRate => self.interest_rate,
            ParameterName::DiscountRate => self.discount_rate,
            ParameterName::TaxRate => self.tax_rate,
            ParameterName::BequestWeight => self.bequest_weight,
            ParameterName::InitialAssets => self.initial_assets,
            ParameterName::IncomeFloor => self.income_floor,
            ParameterName::RetirementLumpSum => self.retirement_lump_sum,
        }
    }

    pub fn with(mut self, name: ParameterName, value: f64) -> Self {
        match name {
            ParameterName::RiskAversion => self.risk_aversion = value,
            ParameterName::InterestRate => self.interest_rate = value,
            ParameterName::DiscountRate => self.discount_rate = value,
            ParameterName::TaxRate => self.tax_rate = value,
            ParameterName::BequestWeight => self.bequest_weight = value,
            ParameterName::InitialAssets => self.initial_assets = value,
            ParameterName::IncomeFloor => self.income_floor = value,
            ParameterName::RetirementLumpSum => self.retirement_lump_sum = value,
        }
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterName {
    #[serde(alias = "gamma", alias = "riskAversion")]
    RiskAversion,
    #[serde(alias = "r", alias = "interestRate")]
    InterestRate,
    #[serde(alias = "theta", alias = "discountRate")]
    DiscountRate,
    #[serde(alias = "tau", alias = "taxRate")]
    TaxRate,
    #[serde(alias = "k", alias = "bequestWeight")]
    BequestWeight,
    #[serde(alias = "A22", alias = "initialAssets")]
    InitialAssets,
    #[serde(alias = "z", alias = "incomeFloor")]
    IncomeFloor,
    #[serde(alias = "F65", alias = "retirementLumpSum")]
    RetirementLumpSum,
}

impl ParameterName {
    pub const ALL: [ParameterName; 8] = [
        ParameterName::RiskAversion,
        ParameterName::InterestRate,
        ParameterName::DiscountRate,
        ParameterName::TaxRate,
        ParameterName::BequestWeight,
        ParameterName::InitialAssets,
        ParameterName::IncomeFloor,
        ParameterName::RetirementLumpSum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParameterName::RiskAversion => "risk_aversion",
            ParameterName::InterestRate => "interest_rate",
            ParameterName::DiscountRate => "discount_rate",
            ParameterName::TaxRate => "tax_rate",
            ParameterName::BequestWeight => "bequest_weight",
            ParameterName::InitialAssets => "initial_assets",
            ParameterName::IncomeFloor => "income_floor",
            ParameterName::RetirementLumpSum => "retirement_lump_sum",
        }
    }
}

/// Lifespan cases from p.76: terminal age and mortality-curve parameter.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum LifespanCase {
    #[default]
    #[serde(rename = "case-1", alias = "I", alias = "caseI")]
    CaseI,
    #[serde(rename = "case-2", alias = "II", alias = "caseII")]
    CaseII,
}

impl LifespanCase {
    pub fn terminal_age(self) -> u32 {
        match self {
            LifespanCase::CaseI => 85,
            LifespanCase::CaseII => 90,
        }
    }

    pub fn mortality(self) -> f64 {
        match self {
            LifespanCase::CaseI => 0.00652,
            LifespanCase::CaseII => 0.00838,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParameterOverrides {
    pub risk_aversion: Option<f64>,
    pub interest_rate: Option<f64>,
    pub discount_rate: Option<f64>,
    pub tax_rate: Option<f64>,
    pub bequest_weight: Option<f64>,
    pub initial_assets: Option<f64>,
    pub income_floor: Option<f64>,
    pub retirement_lump_sum: Option<f64>,
    pub terminal_age: Option<u32>,
    pub mortality: Option<f64>,
}

impl ParameterOverrides {
    pub fn value(&self, name: ParameterName) -> Option<f64> {
        match name {
            ParameterName::RiskAversion => self.risk_aversion,
            ParameterName::InterestRate => self.interest_rate,
            ParameterName::DiscountRate => self.discount_rate,
            ParameterName::TaxRate => self.tax_rate,
            ParameterName::BequestWeight => self.bequest_weight,
            ParameterName::InitialAssets => self.initial_assets,
            ParameterName::IncomeFloor => self.income_floor,
            ParameterName::RetirementLumpSum => self.retirement_lump_sum,
        }
    }
}

/// Everything needed to build a [`Scenario`](super::Scenario).
///
/// Resolution order: standard parameters, then every name listed in
/// `alternatives` takes its alternative value, then explicit `overrides`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub lifespan: LifespanCase,
    pub alternatives: Vec<ParameterName>,
    pub overrides: ParameterOverrides,
}

impl ScenarioSpec {
    pub fn standard() -> Self {
        Self::default()
    }

    pub fn with_lifespan(mut self, lifespan: LifespanCase) -> Self {
        self.lifespan = lifespan;
        self
    }

    pub fn with_alternative(mut self, name: ParameterName) -> Self {
        if !self.alternatives.contains(&name) {
            self.alternatives.push(name);
        }
        self
    }
}

/// Consumption for ages `initial_age..=terminal_age` and assets held entering
/// each of those ages plus the trailing terminal asset.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trajectory {
    pub initial_age: u32,
    pub consumption: Vec<f64>,
    pub assets: Vec<f64>,
}

impl Trajectory {
    pub fn terminal_age(&self) -> u32 {
        self.initial_age + self.consumption.len() as u32 - 1
    }

    pub fn consumption_at(&self, age: u32) -> Option<f64> {
        age.checked_sub(self.initial_age)
            .and_then(|idx| self.consumption.get(idx as usize).copied())
    }

    pub fn assets_at(&self, age: u32) -> Option<f64> {
        age.checked_sub(self.initial_age)
            .and_then(|idx| self.assets.get(idx as usize).copied())
    }
}
