use thiserror::Error;

use tregion_core::{Model, OptimizationProblem, Snapshot};

/// One sampled objective value together with the model call behind it.
#[derive(Debug, Clone)]
pub struct Evaluation<I, O, const N: usize> {
    pub x: [f64; N],

    /// The objective, which may be `NaN` or infinite.
    pub objective: f64,

    pub snapshot: Snapshot<I, O>,
}

impl<I, O, const N: usize> Evaluation<I, O, N> {
    /// Whether the objective is usable as a model value.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.objective.is_finite()
    }
}

/// Errors that can occur when evaluating an optimization problem.
///
/// The failing stage is kept apart so callers can tell a bad mapping from
/// `x` apart from a bad objective extraction.
#[derive(Debug, Error)]
pub enum EvalError<ME, PE> {
    /// The problem could not map `x` to a model input.
    #[error("input mapping failed")]
    Input(#[source] PE),

    /// The model call failed.
    #[error("model call failed")]
    Model(#[source] ME),

    /// The problem could not extract an objective from the model call.
    #[error("objective extraction failed")]
    Objective(#[source] PE),
}

/// Type alias for the result of [`evaluate`].
pub type EvaluateResult<M, P, const N: usize> = Result<
    Evaluation<<M as Model>::Input, <M as Model>::Output, N>,
    EvalError<<M as Model>::Error, <P as OptimizationProblem<N>>::Error>,
>;

/// Samples the objective at `x`: maps it to a model input, calls the model
/// once, and extracts the objective.
///
/// Non-finite objectives are returned as values, not errors.
///
/// # Errors
///
/// Returns the stage that failed.
pub fn evaluate<M, P, const N: usize>(
    model: &M,
    problem: &P,
    x: [f64; N],
) -> EvaluateResult<M, P, N>
where
    M: Model,
    P: OptimizationProblem<N, Input = M::Input, Output = M::Output>,
{
    let input = problem.input(&x).map_err(EvalError::Input)?;
    let output = model.call(&input).map_err(EvalError::Model)?;
    let objective = problem
        .objective(&input, &output)
        .map_err(EvalError::Objective)?;

    Ok(Evaluation {
        x,
        objective,
        snapshot: Snapshot::new(input, output),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use approx::assert_relative_eq;

    struct Norm;

    impl Model for Norm {
        type Input = [f64; 2];
        type Output = f64;
        type Error = Infallible;

        fn call(&self, x: &[f64; 2]) -> Result<f64, Self::Error> {
            Ok(x[0].hypot(x[1]))
        }
    }

    #[derive(Debug, Error)]
    #[error("negative coordinate")]
    struct NegativeCoordinate;

    struct PositiveQuadrant;

    impl OptimizationProblem<2> for PositiveQuadrant {
        type Input = [f64; 2];
        type Output = f64;
        type Error = NegativeCoordinate;

        fn input(&self, x: &[f64; 2]) -> Result<[f64; 2], Self::Error> {
            if x.iter().any(|v| *v < 0.0) {
                Err(NegativeCoordinate)
            } else {
                Ok(*x)
            }
        }

        fn objective(&self, _input: &[f64; 2], output: &f64) -> Result<f64, Self::Error> {
            Ok(*output)
        }
    }

    #[test]
    fn evaluation_captures_snapshot() {
        let eval = evaluate(&Norm, &PositiveQuadrant, [3.0, 4.0]).unwrap();

        assert_relative_eq!(eval.objective, 5.0);
        assert_eq!(eval.snapshot.input, [3.0, 4.0]);
    }

    #[test]
    fn problem_error_is_reported() {
        let result = evaluate(&Norm, &PositiveQuadrant, [-1.0, 4.0]);

        assert!(matches!(result, Err(EvalError::Input(NegativeCoordinate))));
    }

    struct Reciprocal;

    impl OptimizationProblem<2> for Reciprocal {
        type Input = [f64; 2];
        type Output = f64;
        type Error = Infallible;

        fn input(&self, x: &[f64; 2]) -> Result<[f64; 2], Self::Error> {
            Ok(*x)
        }

        fn objective(&self, _input: &[f64; 2], output: &f64) -> Result<f64, Self::Error> {
            Ok(1.0 / output)
        }
    }

    #[test]
    fn non_finite_objective_is_a_value() {
        let eval = evaluate(&Norm, &Reciprocal, [0.0, 0.0]).unwrap();

        assert!(!eval.is_finite());
        assert_eq!(eval.objective, f64::INFINITY);
    }
}
