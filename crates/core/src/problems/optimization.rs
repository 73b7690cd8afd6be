/// Defines an optimization problem to be solved.
///
/// An optimization problem maps solver variables to a model input,
/// then computes an objective value from the model input and output.
/// Solvers search for the input that minimizes (or maximizes) the objective.
///
/// The const generic `N` is the number of solver variables.
/// For example, `N = 2` represents a problem in the plane.
///
/// Objective values may be non-finite. Solvers decide how to treat such
/// values; derivative-free solvers typically record them and steer away.
pub trait OptimizationProblem<const N: usize> {
    type Input;
    type Output;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Maps solver variables (`x`) into a model input.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the input cannot be constructed from `x`.
    fn input(&self, x: &[f64; N]) -> Result<Self::Input, Self::Error>;

    /// Computes an objective value from model input/output.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the objective cannot be computed.
    fn objective(&self, input: &Self::Input, output: &Self::Output) -> Result<f64, Self::Error>;
}

impl<const N: usize, P> OptimizationProblem<N> for &P
where
    P: OptimizationProblem<N> + ?Sized,
{
    type Input = P::Input;
    type Output = P::Output;
    type Error = P::Error;

    fn input(&self, x: &[f64; N]) -> Result<Self::Input, Self::Error> {
        (**self).input(x)
    }

    fn objective(&self, input: &Self::Input, output: &Self::Output) -> Result<f64, Self::Error> {
        (**self).objective(input, output)
    }
}
