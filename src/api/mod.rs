use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use crate::core::{
    ComparisonReport, FigureSolution, INITIAL_AGE, LifespanCase, ModelError, ModelResult,
    ParameterName, Scenario, ScenarioSpec, ScoringStrategy, SolveSettings, StabilizationParameters,
    StabilizationSettings, StabilizationSolution, TrajectorySolution, compare_strategies,
    figure_catalogue, optimize_policy, solve_figure, solve_trajectory,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLifespan {
    #[value(name = "case-1", alias = "i")]
    CaseI,
    #[value(name = "case-2", alias = "ii")]
    CaseII,
}

impl From<CliLifespan> for LifespanCase {
    fn from(value: CliLifespan) -> Self {
        match value {
            CliLifespan::CaseI => LifespanCase::CaseI,
            CliLifespan::CaseII => LifespanCase::CaseII,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliParameter {
    #[value(alias = "gamma")]
    RiskAversion,
    #[value(alias = "r")]
    InterestRate,
    #[value(alias = "theta")]
    DiscountRate,
    #[value(alias = "tau")]
    TaxRate,
    #[value(alias = "k")]
    BequestWeight,
    #[value(alias = "a22")]
    InitialAssets,
    #[value(alias = "z")]
    IncomeFloor,
    #[value(alias = "f65")]
    RetirementLumpSum,
}

impl From<CliParameter> for ParameterName {
    fn from(value: CliParameter) -> Self {
        match value {
            CliParameter::RiskAversion => ParameterName::RiskAversion,
            CliParameter::InterestRate => ParameterName::InterestRate,
            CliParameter::DiscountRate => ParameterName::DiscountRate,
            CliParameter::TaxRate => ParameterName::TaxRate,
            CliParameter::BequestWeight => ParameterName::BequestWeight,
            CliParameter::InitialAssets => ParameterName::InitialAssets,
            CliParameter::IncomeFloor => ParameterName::IncomeFloor,
            CliParameter::RetirementLumpSum => ParameterName::RetirementLumpSum,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliStrategy {
    ClosedForm,
    SimpleSum,
    ExpectedUtility,
    Bellman,
    SequentialReplanning,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiStrategy {
    #[serde(alias = "closedForm", alias = "closed_form")]
    ClosedForm,
    #[serde(alias = "simpleSum", alias = "simple_sum")]
    SimpleSum,
    #[serde(alias = "expectedUtility", alias = "expected_utility")]
    ExpectedUtility,
    Bellman,
    #[serde(alias = "sequentialReplanning", alias = "sequential_replanning")]
    SequentialReplanning,
}

impl From<ApiStrategy> for CliStrategy {
    fn from(value: ApiStrategy) -> Self {
        match value {
            ApiStrategy::ClosedForm => CliStrategy::ClosedForm,
            ApiStrategy::SimpleSum => CliStrategy::SimpleSum,
            ApiStrategy::ExpectedUtility => CliStrategy::ExpectedUtility,
            ApiStrategy::Bellman => CliStrategy::Bellman,
            ApiStrategy::SequentialReplanning => CliStrategy::SequentialReplanning,
        }
    }
}

/// Flat request shape shared by the query string and JSON body of
/// `/api/solve` and `/api/compare`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SolvePayload {
    lifespan: Option<LifespanCase>,
    /// Comma-separated parameter names, textbook symbols accepted.
    alternatives: Option<String>,

    risk_aversion: Option<f64>,
    interest_rate: Option<f64>,
    discount_rate: Option<f64>,
    tax_rate: Option<f64>,
    bequest_weight: Option<f64>,
    initial_assets: Option<f64>,
    income_floor: Option<f64>,
    retirement_lump_sum: Option<f64>,
    terminal_age: Option<u32>,
    mortality: Option<f64>,

    strategy: Option<ApiStrategy>,
    reference_age: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FiguresPayload {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StabilizationPayload {
    saving_rate: Option<f64>,
    accelerator: Option<f64>,
    adjustment_speed: Option<f64>,
    policy_cost: Option<f64>,
    initial_output: Option<f64>,
    steps: Option<usize>,
    step_size: Option<f64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "lifecycle",
    about = "Life-cycle consumption model: shooting solution of the closed form and numerical cross-checks"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve one scenario with one scoring strategy
    Solve {
        #[command(flatten)]
        scenario: ScenarioArgs,
        #[arg(long, value_enum, default_value_t = CliStrategy::ClosedForm)]
        strategy: CliStrategy,
        #[arg(
            long,
            help = "Reference age for the expected-utility strategy; defaults to the initial age"
        )]
        reference_age: Option<u32>,
    },
    /// Run every strategy on one scenario and report squared differences
    Compare {
        #[command(flatten)]
        scenario: ScenarioArgs,
    },
    /// Solve the textbook figure scenarios (all, or one by name)
    Figures {
        #[arg(long)]
        name: Option<String>,
    },
    /// Eigen-analysis and brute-force policy path of the stabilization model
    Stabilization(StabilizationArgs),
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct ScenarioArgs {
    #[arg(
        long,
        help = "JSON scenario file (lifespan, alternatives, overrides); flags are applied on top"
    )]
    spec_file: Option<PathBuf>,
    #[arg(long, value_enum, ignore_case = true)]
    lifespan: Option<CliLifespan>,
    #[arg(
        long = "alternative",
        value_enum,
        ignore_case = true,
        help = "Switch one parameter to its alternative value; repeatable"
    )]
    alternatives: Vec<CliParameter>,
    #[arg(long)]
    risk_aversion: Option<f64>,
    #[arg(long)]
    interest_rate: Option<f64>,
    #[arg(long)]
    discount_rate: Option<f64>,
    #[arg(long)]
    tax_rate: Option<f64>,
    #[arg(long)]
    bequest_weight: Option<f64>,
    #[arg(long)]
    initial_assets: Option<f64>,
    #[arg(long)]
    income_floor: Option<f64>,
    #[arg(long)]
    retirement_lump_sum: Option<f64>,
    #[arg(long)]
    terminal_age: Option<u32>,
    #[arg(long)]
    mortality: Option<f64>,
}

#[derive(Args, Debug, Clone, Default)]
struct StabilizationArgs {
    #[arg(long)]
    saving_rate: Option<f64>,
    #[arg(long)]
    accelerator: Option<f64>,
    #[arg(long)]
    adjustment_speed: Option<f64>,
    #[arg(long)]
    policy_cost: Option<f64>,
    #[arg(long)]
    initial_output: Option<f64>,
    #[arg(long)]
    steps: Option<usize>,
    #[arg(long)]
    step_size: Option<f64>,
}

#[derive(Debug)]
struct SolveRequest {
    spec: ScenarioSpec,
    strategy: ScoringStrategy,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SolveResponse {
    scenario: Scenario,
    solution: TrajectorySolution,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    scenario: Scenario,
    report: ComparisonReport,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_spec(args: ScenarioArgs) -> Result<ScenarioSpec, String> {
    let mut spec = match &args.spec_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("--spec-file {}: {e}", path.display()))?;
            serde_json::from_str::<ScenarioSpec>(&raw)
                .map_err(|e| format!("--spec-file {}: invalid scenario JSON: {e}", path.display()))?
        }
        None => ScenarioSpec::standard(),
    };

    if let Some(lifespan) = args.lifespan {
        spec.lifespan = lifespan.into();
    }
    for name in args.alternatives {
        spec = spec.with_alternative(name.into());
    }

    let overrides = &mut spec.overrides;
    let numeric = [
        (&mut overrides.risk_aversion, args.risk_aversion),
        (&mut overrides.interest_rate, args.interest_rate),
        (&mut overrides.discount_rate, args.discount_rate),
        (&mut overrides.tax_rate, args.tax_rate),
        (&mut overrides.bequest_weight, args.bequest_weight),
        (&mut overrides.initial_assets, args.initial_assets),
        (&mut overrides.income_floor, args.income_floor),
        (&mut overrides.retirement_lump_sum, args.retirement_lump_sum),
        (&mut overrides.mortality, args.mortality),
    ];
    for (slot, value) in numeric {
        if value.is_some() {
            *slot = value;
        }
    }
    if args.terminal_age.is_some() {
        overrides.terminal_age = args.terminal_age;
    }
    Ok(spec)
}

fn build_strategy(kind: CliStrategy, reference_age: Option<u32>) -> Result<ScoringStrategy, String> {
    if reference_age.is_some() && kind != CliStrategy::ExpectedUtility {
        return Err("--reference-age only applies to the expected-utility strategy".to_string());
    }
    Ok(match kind {
        CliStrategy::ClosedForm => ScoringStrategy::ClosedForm,
        CliStrategy::SimpleSum => ScoringStrategy::SimpleSum,
        CliStrategy::ExpectedUtility => ScoringStrategy::ExpectedUtility {
            reference_age: reference_age.unwrap_or(INITIAL_AGE),
        },
        CliStrategy::Bellman => ScoringStrategy::Bellman,
        CliStrategy::SequentialReplanning => ScoringStrategy::SequentialReplanning,
    })
}

fn build_stabilization(args: StabilizationArgs) -> (StabilizationParameters, StabilizationSettings) {
    let defaults = StabilizationParameters::default();
    let params = StabilizationParameters {
        saving_rate: args.saving_rate.unwrap_or(defaults.saving_rate),
        accelerator: args.accelerator.unwrap_or(defaults.accelerator),
        adjustment_speed: args.adjustment_speed.unwrap_or(defaults.adjustment_speed),
        policy_cost: args.policy_cost.unwrap_or(defaults.policy_cost),
    };
    let defaults = StabilizationSettings::default();
    let settings = StabilizationSettings {
        initial_output: args.initial_output.unwrap_or(defaults.initial_output),
        steps: args.steps.unwrap_or(defaults.steps),
        step_size: args.step_size.unwrap_or(defaults.step_size),
        minimizer: defaults.minimizer,
    };
    (params, settings)
}

fn execute_solve(request: SolveRequest) -> ModelResult<SolveResponse> {
    let scenario = Scenario::new(&request.spec)?;
    let solution = solve_trajectory(&scenario, request.strategy, &SolveSettings::default())?;
    Ok(SolveResponse { scenario, solution })
}

fn execute_compare(spec: ScenarioSpec) -> ModelResult<CompareResponse> {
    let scenario = Scenario::new(&spec)?;
    let report = compare_strategies(
        &scenario,
        &ScoringStrategy::all(&scenario),
        &SolveSettings::default(),
    )?;
    Ok(CompareResponse { scenario, report })
}

fn execute_figures(name: Option<String>) -> ModelResult<Vec<FigureSolution>> {
    let settings = SolveSettings::default();
    match name {
        Some(name) => Ok(vec![solve_figure(&name, settings.boundary)?]),
        None => figure_catalogue()
            .iter()
            .map(|figure| solve_figure(figure.name, settings.boundary))
            .collect(),
    }
}

fn execute_stabilization(args: StabilizationArgs) -> ModelResult<StabilizationSolution> {
    let (params, settings) = build_stabilization(args);
    optimize_policy(&params, &settings)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("Serialization failed: {e}"))?;
    println!("{text}");
    Ok(())
}

pub async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Solve {
            scenario,
            strategy,
            reference_age,
        } => {
            let request = SolveRequest {
                spec: build_spec(scenario)?,
                strategy: build_strategy(strategy, reference_age)?,
            };
            let response = execute_solve(request).map_err(|e| e.to_string())?;
            print_json(&response)
        }
        Command::Compare { scenario } => {
            let response = execute_compare(build_spec(scenario)?).map_err(|e| e.to_string())?;
            print_json(&response)
        }
        Command::Figures { name } => {
            let figures = execute_figures(name).map_err(|e| e.to_string())?;
            print_json(&figures)
        }
        Command::Stabilization(args) => {
            let solution = execute_stabilization(args).map_err(|e| e.to_string())?;
            print_json(&solution)
        }
        Command::Serve { port } => run_http_server(port)
            .await
            .map_err(|e| format!("Server error: {e}")),
    }
}

fn router() -> Router {
    Router::new()
        .route("/api/solve", get(solve_get_handler).post(solve_post_handler))
        .route("/api/compare", post(compare_handler))
        .route("/api/figures", get(figures_handler))
        .route("/api/stabilization", get(stabilization_handler))
        .fallback(not_found_handler)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    println!("Life-cycle HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/solve");

    axum::serve(listener, router()).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn solve_get_handler(Query(payload): Query<SolvePayload>) -> Response {
    solve_handler_impl(payload).await
}

async fn solve_post_handler(Json(payload): Json<SolvePayload>) -> Response {
    solve_handler_impl(payload).await
}

async fn solve_handler_impl(payload: SolvePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    info!(
        "solve request: {} on {:?}",
        request.strategy.label(),
        request.spec
    );
    run_blocking(move || execute_solve(request)).await
}

async fn compare_handler(Json(payload): Json<SolvePayload>) -> Response {
    if payload.strategy.is_some() || payload.reference_age.is_some() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "compare runs every strategy; strategy and referenceAge are not accepted",
        );
    }
    let spec = match spec_from_payload(&payload) {
        Ok(spec) => spec,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    run_blocking(move || execute_compare(spec)).await
}

async fn figures_handler(Query(payload): Query<FiguresPayload>) -> Response {
    run_blocking(move || execute_figures(payload.name)).await
}

async fn stabilization_handler(Query(payload): Query<StabilizationPayload>) -> Response {
    let args = StabilizationArgs {
        saving_rate: payload.saving_rate,
        accelerator: payload.accelerator,
        adjustment_speed: payload.adjustment_speed,
        policy_cost: payload.policy_cost,
        initial_output: payload.initial_output,
        steps: payload.steps,
        step_size: payload.step_size,
    };
    run_blocking(move || execute_stabilization(args)).await
}

async fn run_blocking<T, F>(job: F) -> Response
where
    F: FnOnce() -> ModelResult<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(err)) => error_response(status_for(&err), &err.to_string()),
        Err(join_err) => {
            error!("model worker failed: {join_err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Model worker failed")
        }
    }
}

fn status_for(err: &ModelError) -> StatusCode {
    match err {
        ModelError::InvalidParameter { .. } | ModelError::DimensionMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        ModelError::NonFiniteValue { .. } | ModelError::NonFiniteCost { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ModelError::Optimizer(_) | ModelError::Decomposition(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<SolveRequest, String> {
    let payload = serde_json::from_str::<SolvePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: SolvePayload) -> Result<SolveRequest, String> {
    let spec = spec_from_payload(&payload)?;
    let kind = payload
        .strategy
        .map(CliStrategy::from)
        .unwrap_or(CliStrategy::ClosedForm);
    let strategy = build_strategy(kind, payload.reference_age)
        .map_err(|msg| msg.replace("--reference-age", "referenceAge"))?;
    Ok(SolveRequest { spec, strategy })
}

fn spec_from_payload(payload: &SolvePayload) -> Result<ScenarioSpec, String> {
    let mut spec = ScenarioSpec::standard();
    if let Some(lifespan) = payload.lifespan {
        spec.lifespan = lifespan;
    }
    if let Some(list) = &payload.alternatives {
        for token in list.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let name: ParameterName =
                serde_json::from_value(serde_json::Value::String(token.to_string()))
                    .map_err(|_| format!("Unknown alternative parameter `{token}`"))?;
            spec = spec.with_alternative(name);
        }
    }

    let overrides = &mut spec.overrides;
    overrides.risk_aversion = payload.risk_aversion;
    overrides.interest_rate = payload.interest_rate;
    overrides.discount_rate = payload.discount_rate;
    overrides.tax_rate = payload.tax_rate;
    overrides.bequest_weight = payload.bequest_weight;
    overrides.initial_assets = payload.initial_assets;
    overrides.income_floor = payload.income_floor;
    overrides.retirement_lump_sum = payload.retirement_lump_sum;
    overrides.terminal_age = payload.terminal_age;
    overrides.mortality = payload.mortality;
    Ok(spec)
}
