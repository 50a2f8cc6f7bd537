//! Stabilization policy in an investment-accelerator economy.
//!
//! Output gap `y` and policy `g` follow
//! `d/dt [y, g] = [[-s·w, w], [w/φ, s·w]] · [y, g]` with `w = ρ / (1 - ν·ρ)`.
//! Besides the eigen-structure of that system, the policy path can be found
//! by brute force: minimize `Σ y² + φ·Σ g²` over an Euler-discretized path.

use std::cmp::Ordering;

use argmin::core::{CostFunction, Error, Gradient};
use log::info;
use nalgebra::linalg::SVD;
use nalgebra::{Complex, DMatrix};
use serde::{Deserialize, Serialize};

use super::errors::{ModelError, ModelResult};
use super::optimizer::{MinimizerSettings, Param, central_gradient, run_lbfgs};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StabilizationParameters {
    /// s
    pub saving_rate: f64,
    /// ν
    pub accelerator: f64,
    /// ρ
    pub adjustment_speed: f64,
    /// φ
    pub policy_cost: f64,
}

impl Default for StabilizationParameters {
    fn default() -> Self {
        Self {
            saving_rate: 0.3,
            accelerator: 4.0,
            adjustment_speed: 0.1,
            policy_cost: 2.0,
        }
    }
}

impl StabilizationParameters {
    pub fn validate(&self) -> ModelResult<()> {
        let finite = [
            ("saving_rate", self.saving_rate),
            ("accelerator", self.accelerator),
            ("adjustment_speed", self.adjustment_speed),
            ("policy_cost", self.policy_cost),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(ModelError::invalid(name, "must be finite"));
            }
        }
        if self.policy_cost <= 0.0 {
            return Err(ModelError::invalid("policy_cost", "must be > 0"));
        }
        if (1.0 - self.accelerator * self.adjustment_speed).abs() < 1e-12 {
            return Err(ModelError::invalid(
                "accelerator",
                "accelerator times adjustment speed must differ from 1",
            ));
        }
        Ok(())
    }

    /// w = ρ / (1 − ν·ρ)
    pub fn coupling(&self) -> f64 {
        self.adjustment_speed / (1.0 - self.accelerator * self.adjustment_speed)
    }

    pub fn system_matrix(&self) -> [[f64; 2]; 2] {
        let w = self.coupling();
        let s = self.saving_rate;
        [[-s * w, w], [w / self.policy_cost, s * w]]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Eigenvalue with its unit-norm `[y, g]` eigenvector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EigenPair {
    pub value: ComplexNumber,
    pub vector: Vec<ComplexNumber>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EigenAnalysis {
    pub matrix: [[f64; 2]; 2],
    pub trace: f64,
    pub determinant: f64,
    /// Sorted by descending real part, then imaginary part.
    pub eigenpairs: Vec<EigenPair>,
    /// Real eigenvalues of opposite sign.
    pub saddle: bool,
}

// Imaginary parts below this are treated as a real eigenvalue.
const REAL_EIGENVALUE_TOLERANCE: f64 = 1e-12;

pub fn eigen_analysis(params: &StabilizationParameters) -> ModelResult<EigenAnalysis> {
    params.validate()?;
    analyze_matrix(params.system_matrix())
}

fn analyze_matrix(matrix: [[f64; 2]; 2]) -> ModelResult<EigenAnalysis> {
    let [[a, b], [c, d]] = matrix;
    let mut eigenpairs = compute_eigenpairs(&DMatrix::from_row_slice(2, 2, &[a, b, c, d]))?;
    eigenpairs.sort_by(|l, r| {
        let by_real = if (l.value.re - r.value.re).abs() <= REAL_EIGENVALUE_TOLERANCE {
            Ordering::Equal
        } else {
            r.value.re.total_cmp(&l.value.re)
        };
        by_real.then(r.value.im.total_cmp(&l.value.im))
    });

    let real: Vec<f64> = eigenpairs
        .iter()
        .filter(|pair| pair.value.im.abs() <= REAL_EIGENVALUE_TOLERANCE)
        .map(|pair| pair.value.re)
        .collect();
    let saddle = real.iter().any(|v| *v > 0.0) && real.iter().any(|v| *v < 0.0);

    Ok(EigenAnalysis {
        matrix,
        trace: a + d,
        determinant: a * d - b * c,
        eigenpairs,
        saddle,
    })
}

// Each eigenvector spans the null space of A - λI: the right singular vector
// of the smallest singular value.
fn compute_eigenpairs(matrix: &DMatrix<f64>) -> ModelResult<Vec<EigenPair>> {
    let dim = matrix.nrows();
    let eigenvalues = matrix.complex_eigenvalues();
    let complex_matrix = matrix.map(|v| Complex::new(v, 0.0));

    let mut pairs = Vec::with_capacity(dim);
    for idx in 0..dim {
        let lambda = eigenvalues[idx];

        let mut shifted = complex_matrix.clone();
        for i in 0..dim {
            shifted[(i, i)] -= lambda;
        }

        let svd = SVD::new(shifted, true, true);
        let v_t = svd.v_t.ok_or_else(|| {
            ModelError::Decomposition(format!("no eigenvector for eigenvalue {lambda}"))
        })?;
        let row = v_t.row(v_t.nrows().saturating_sub(1));
        let mut vector: Vec<Complex<f64>> = row.iter().map(|c| c.conj()).collect();
        normalize_complex_vector(&mut vector);

        pairs.push(EigenPair {
            value: ComplexNumber::from(lambda),
            vector: vector.into_iter().map(ComplexNumber::from).collect(),
        });
    }
    Ok(pairs)
}

// Unit norm, with the largest component rotated onto the positive real axis
// so real eigenvalues get real eigenvectors.
fn normalize_complex_vector(vec: &mut [Complex<f64>]) {
    let norm = vec.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    let pivot = vec
        .iter()
        .copied()
        .max_by(|l, r| l.norm_sqr().total_cmp(&r.norm_sqr()));
    if norm > 0.0
        && let Some(pivot) = pivot
    {
        let phase = pivot.conj() / pivot.norm();
        for entry in vec {
            *entry *= phase / norm;
        }
    }
}

/// Euler path of the output gap. Entry `n + 1` uses policy `n`; the path has
/// as many entries as `policy`.
pub fn output_path(
    params: &StabilizationParameters,
    initial_output: f64,
    policy: &[f64],
    dt: f64,
) -> Vec<f64> {
    let w = params.coupling();
    let s = params.saving_rate;
    let mut path = Vec::with_capacity(policy.len());
    let mut y = initial_output;
    for g in policy {
        path.push(y);
        y += (w * g - s * w * y) * dt;
    }
    path
}

pub fn quadratic_loss(
    params: &StabilizationParameters,
    initial_output: f64,
    policy: &[f64],
    dt: f64,
) -> f64 {
    let output = output_path(params, initial_output, policy, dt);
    output.iter().map(|y| y * y).sum::<f64>()
        + params.policy_cost * policy.iter().map(|g| g * g).sum::<f64>()
}

/// Longest accepted policy path; each gradient costs `steps²` loss terms.
pub const MAX_POLICY_STEPS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StabilizationSettings {
    pub initial_output: f64,
    pub steps: usize,
    pub step_size: f64,
    pub minimizer: MinimizerSettings,
}

impl Default for StabilizationSettings {
    fn default() -> Self {
        Self {
            initial_output: -1.0,
            steps: 100,
            step_size: 0.1,
            minimizer: MinimizerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilizationSolution {
    pub analysis: EigenAnalysis,
    pub policy: Vec<f64>,
    pub output: Vec<f64>,
    pub loss: f64,
    /// Loss of leaving policy at zero, for reference.
    pub passive_loss: f64,
    pub converged: bool,
    pub iterations: u64,
    pub message: String,
}

struct PolicyProblem<'a> {
    params: &'a StabilizationParameters,
    settings: &'a StabilizationSettings,
}

impl CostFunction for PolicyProblem<'_> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, policy: &Param) -> Result<f64, Error> {
        let loss = quadratic_loss(
            self.params,
            self.settings.initial_output,
            policy,
            self.settings.step_size,
        );
        if loss.is_finite() {
            Ok(loss)
        } else {
            Err(ModelError::NonFiniteCost { value: loss }.into())
        }
    }
}

impl Gradient for PolicyProblem<'_> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, policy: &Param) -> Result<Param, Error> {
        central_gradient(policy, |g| self.cost(g))
    }
}

/// Minimizes the discrete loss over the policy path, starting from zero
/// policy.
pub fn optimize_policy(
    params: &StabilizationParameters,
    settings: &StabilizationSettings,
) -> ModelResult<StabilizationSolution> {
    let analysis = eigen_analysis(params)?;
    settings.minimizer.validate()?;
    if settings.steps == 0 || settings.steps > MAX_POLICY_STEPS {
        return Err(ModelError::invalid(
            "steps",
            format!("must be in 1..={MAX_POLICY_STEPS}"),
        ));
    }
    if !settings.step_size.is_finite() || settings.step_size <= 0.0 {
        return Err(ModelError::invalid("step_size", "must be > 0"));
    }
    if !settings.initial_output.is_finite() {
        return Err(ModelError::invalid("initial_output", "must be finite"));
    }

    let start = vec![0.0; settings.steps];
    let passive_loss = quadratic_loss(params, settings.initial_output, &start, settings.step_size);
    let outcome = run_lbfgs(PolicyProblem { params, settings }, start, &settings.minimizer)?;
    let policy = outcome.param;
    let output = output_path(params, settings.initial_output, &policy, settings.step_size);
    let loss = quadratic_loss(params, settings.initial_output, &policy, settings.step_size);

    let message = if outcome.converged {
        format!("Policy optimization converged ({}).", outcome.status)
    } else {
        format!("Policy optimization stopped early ({}).", outcome.status)
    };
    info!("stabilization loss {loss:.6} (passive {passive_loss:.6}): {message}");

    Ok(StabilizationSolution {
        analysis,
        policy,
        output,
        loss,
        passive_loss,
        converged: outcome.converged,
        iterations: outcome.iterations,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn as_complex(value: &ComplexNumber) -> Complex<f64> {
        Complex::new(value.re, value.im)
    }

    // A·v = λ·v and |v| = 1 for every pair.
    fn assert_eigenpairs_hold(analysis: &EigenAnalysis) {
        let [[a, b], [c, d]] = analysis.matrix;
        for pair in &analysis.eigenpairs {
            let lambda = as_complex(&pair.value);
            let v: Vec<Complex<f64>> = pair.vector.iter().map(as_complex).collect();
            let av = [v[0] * a + v[1] * b, v[0] * c + v[1] * d];
            for (lhs, rhs) in av.iter().zip(&v) {
                assert!((lhs - lambda * rhs).norm() <= EPS, "A·v != λ·v for {lambda}");
            }
            let norm = v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
            assert_approx(norm, 1.0);
        }
    }

    #[test]
    fn default_system_is_a_saddle() {
        let analysis = eigen_analysis(&StabilizationParameters::default()).expect("valid");
        assert_approx(analysis.trace, 0.0);
        assert_approx(analysis.determinant, -0.0163889);
        assert!(analysis.saddle);
        assert_eq!(analysis.eigenpairs.len(), 2);
        assert_approx(analysis.eigenpairs[0].value.re, 0.1280191);
        assert_approx(analysis.eigenpairs[1].value.re, -0.1280191);
        for pair in &analysis.eigenpairs {
            assert_approx(pair.value.im, 0.0);
            for entry in &pair.vector {
                assert_approx(entry.im, 0.0);
            }
        }
        assert_eigenpairs_hold(&analysis);
    }

    #[test]
    fn rotation_matrix_has_complex_pair_with_eigenvectors() {
        let analysis = analyze_matrix([[0.0, 1.0], [-1.0, 0.0]]).expect("decomposes");
        assert!(!analysis.saddle);
        assert_eq!(analysis.eigenpairs.len(), 2);
        assert_approx(analysis.eigenpairs[0].value.re, 0.0);
        assert_approx(analysis.eigenpairs[0].value.im, 1.0);
        assert_approx(analysis.eigenpairs[1].value.im, -1.0);
        assert_eigenpairs_hold(&analysis);
    }

    #[test]
    fn stable_node_is_not_a_saddle() {
        let analysis = analyze_matrix([[-2.0, 0.0], [0.0, -0.5]]).expect("decomposes");
        assert!(!analysis.saddle);
        assert_approx(analysis.eigenpairs[0].value.re, -0.5);
        assert_approx(analysis.eigenpairs[1].value.re, -2.0);
        assert_eigenpairs_hold(&analysis);
    }

    #[test]
    fn rejects_non_positive_policy_cost() {
        let params = StabilizationParameters {
            policy_cost: 0.0,
            ..StabilizationParameters::default()
        };
        assert!(eigen_analysis(&params).is_err());
    }

    #[test]
    fn output_path_matches_policy_length_and_starts_at_initial_output() {
        let params = StabilizationParameters::default();
        let path = output_path(&params, -1.0, &[0.0; 5], 0.1);
        assert_eq!(path.len(), 5);
        assert_eq!(path[0], -1.0);
        let decay = 1.0 - 0.3 * params.coupling() * 0.1;
        assert_approx(path[4], -decay.powi(4));
    }

    #[test]
    fn loss_weights_policy_by_its_cost() {
        let params = StabilizationParameters::default();
        let loss = quadratic_loss(&params, 0.0, &[1.0], 0.1);
        assert_approx(loss, 2.0);
    }

    #[test]
    fn rejects_singular_accelerator() {
        let params = StabilizationParameters {
            accelerator: 10.0,
            adjustment_speed: 0.1,
            ..StabilizationParameters::default()
        };
        assert!(eigen_analysis(&params).is_err());
    }

    #[test]
    fn rejects_policy_paths_beyond_step_limit() {
        let params = StabilizationParameters::default();
        for steps in [0, MAX_POLICY_STEPS + 1, usize::MAX] {
            let settings = StabilizationSettings {
                steps,
                ..StabilizationSettings::default()
            };
            let err = optimize_policy(&params, &settings).expect_err("must reject step count");
            assert!(matches!(
                err,
                ModelError::InvalidParameter { name: "steps", .. }
            ));
        }
    }

    #[test]
    fn optimized_policy_beats_passive_policy() {
        let params = StabilizationParameters::default();
        let settings = StabilizationSettings::default();
        let solution = optimize_policy(&params, &settings).expect("must optimize");
        assert_eq!(solution.policy.len(), 100);
        assert_eq!(solution.output.len(), 100);
        assert!(solution.loss < solution.passive_loss);
        // stimulus while output is below trend
        assert!(solution.policy[0] > 0.0);
    }
}
