use lifecycle::core::{
    BoundarySolveConfig, LifespanCase, ParameterName, Scenario, ScenarioSpec, ScoringStrategy,
    SolveSettings, StabilizationParameters, StabilizationSettings, compare_strategies,
    figure_catalogue, optimize_policy, roll_forward_assets, solve_figure, solve_terminal_assets,
    solve_trajectory,
};

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual}, tolerance {tol}"
    );
}

#[test]
fn standard_closed_form_end_to_end() {
    let scenario = Scenario::new(&ScenarioSpec::standard()).expect("valid scenario");
    let solution = solve_trajectory(
        &scenario,
        ScoringStrategy::ClosedForm,
        &SolveSettings::default(),
    )
    .expect("must solve");

    assert!(solution.converged, "{}", solution.message);
    assert!(solution.feasible);
    assert_close(solution.terminal_assets.expect("root"), 141.1929, 1e-3);

    let trajectory = &solution.trajectory;
    assert_eq!(trajectory.initial_age, 22);
    assert_eq!(trajectory.terminal_age(), 85);
    assert_eq!(trajectory.consumption.len(), 64);

    let rolled = roll_forward_assets(&scenario, &trajectory.consumption).expect("same length");
    for (r, a) in rolled.iter().zip(&trajectory.assets) {
        assert_close(*r, *a, 1e-6 * a.abs().max(1.0));
    }
}

#[test]
fn boundary_solver_handles_every_figure() {
    for figure in figure_catalogue() {
        let solved = solve_figure(figure.name, BoundarySolveConfig::default())
            .unwrap_or_else(|e| panic!("figure {}: {e}", figure.name));
        assert!(solved.result.converged, "figure {}", figure.name);
        assert!(solved.result.mismatch.abs() < 1e-6);
    }
}

#[test]
fn case_two_with_alternative_gamma_matches_figure() {
    let spec = ScenarioSpec::standard()
        .with_lifespan(LifespanCase::CaseII)
        .with_alternative(ParameterName::RiskAversion);
    let scenario = Scenario::new(&spec).expect("valid scenario");
    let result =
        solve_terminal_assets(&scenario, BoundarySolveConfig::default()).expect("must solve");
    assert_close(result.terminal_assets, 155.176, 1e-2);
}

#[test]
fn expected_utility_optimum_scores_at_least_closed_form() {
    let scenario = Scenario::standard();
    let settings = SolveSettings::default();
    let closed = solve_trajectory(&scenario, ScoringStrategy::ClosedForm, &settings)
        .expect("closed form");
    let optimum = solve_trajectory(
        &scenario,
        ScoringStrategy::ExpectedUtility { reference_age: 22 },
        &settings,
    )
    .expect("expected utility");

    assert!(optimum.feasible);
    assert!(optimum.lifetime_utility >= closed.lifetime_utility);
}

#[test]
fn comparison_reports_every_strategy() {
    let scenario = Scenario::standard();
    let report = compare_strategies(
        &scenario,
        &ScoringStrategy::all(&scenario),
        &SolveSettings::default(),
    )
    .expect("must compare");

    assert_eq!(report.solutions.len(), 5);
    assert_eq!(report.against_closed_form.len(), 5);
    assert_eq!(report.pairwise.len(), 10);
    assert!(report.against_closed_form.iter().all(|ssd| *ssd >= 0.0));
}

#[test]
fn stabilization_policy_reduces_loss() {
    let solution = optimize_policy(
        &StabilizationParameters::default(),
        &StabilizationSettings::default(),
    )
    .expect("must optimize");
    assert!(solution.analysis.saddle);
    assert!(solution.loss < solution.passive_loss);
}
