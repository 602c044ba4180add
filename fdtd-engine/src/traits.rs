use crate::{
    error::Error,
    field::FieldView,
};

/// Something that advances the fields in steps.
///
/// Implemented by the threaded [`Engine`](crate::Engine) and the
/// [`SequentialEngine`](crate::SequentialEngine), so drivers can use either.
pub trait Stepper {
    /// Advances the fields by `steps` full steps.
    fn run_steps(&mut self, steps: u64) -> Result<(), Error>;

    /// Zeroes all fields and the step counter.
    fn reset(&mut self) -> Result<(), Error>;

    /// Number of completed steps since construction or the last reset.
    fn step(&self) -> u64;

    fn volt(&self) -> FieldView<'_>;

    fn curr(&self) -> FieldView<'_>;
}
