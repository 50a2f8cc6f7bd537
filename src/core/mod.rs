mod compare;
mod engine;
mod errors;
mod objective;
mod optimizer;
mod scenario;
mod solver;
mod stabilization;
mod types;

pub use compare::{
    ComparisonReport, PairwiseDifference, compare_strategies, sum_squared_difference,
};
pub use engine::{
    AgeStep, PathRecursion, asset_shortfall, bequest_utility, boundary_mismatch,
    death_probability, next_assets, period_utility, roll_forward_assets, run_path_recursion,
    survival_probability,
};
pub use errors::{ModelError, ModelResult};
pub use objective::{
    BellmanValue, ExpectedUtility, ScoringStrategy, SimpleSum, SolveSettings, TrajectoryObjective,
    TrajectorySolution, replan_sequentially, solve_trajectory,
};
pub use optimizer::{MinimizedTrajectory, MinimizerSettings, minimize_suffix, minimize_trajectory};
pub use scenario::{FigureSpec, MAX_TERMINAL_AGE, Scenario, figure_catalogue};
pub use solver::{
    BoundarySolveConfig, BoundarySolveIteration, BoundarySolveResult, FigureSolution,
    solve_figure, solve_terminal_assets,
};
pub use stabilization::{
    ComplexNumber, EigenAnalysis, EigenPair, MAX_POLICY_STEPS, StabilizationParameters,
    StabilizationSettings, StabilizationSolution, eigen_analysis, optimize_policy, output_path,
    quadratic_loss,
};
pub use types::{
    BaseParameters, INCOME_VARIANCE, INITIAL_AGE, LifespanCase, ParameterName,
    ParameterOverrides, RETIREMENT_AGE, ScenarioSpec, Trajectory,
};
