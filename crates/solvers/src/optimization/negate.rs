use tregion_core::OptimizationProblem;

/// Wraps a problem so that minimizing it maximizes the original objective.
///
/// Inputs and model outputs pass through untouched. Non-finite objectives
/// keep their non-finiteness, so `NaN` stays `NaN` and `+∞` becomes `−∞`.
/// The wrapped problem may be borrowed: `NegateObjective(&problem)`.
#[derive(Debug, Clone, Copy)]
pub struct NegateObjective<P>(pub P);

impl<const N: usize, P> OptimizationProblem<N> for NegateObjective<P>
where
    P: OptimizationProblem<N>,
{
    type Input = P::Input;
    type Output = P::Output;
    type Error = P::Error;

    fn input(&self, x: &[f64; N]) -> Result<Self::Input, Self::Error> {
        self.0.input(x)
    }

    fn objective(&self, input: &Self::Input, output: &Self::Output) -> Result<f64, Self::Error> {
        self.0.objective(input, output).map(|v| -v)
    }
}
