use nalgebra::Point3;

use crate::{
    error::ConfigurationError,
    strider::{
        Axis,
        Strider,
    },
};

/// A soft voltage source.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExcitationSource {
    /// Voltage component the source adds to.
    pub component: Axis,
    pub point: Point3<usize>,
    /// Delay in steps before the signal starts.
    pub delay: u64,
    pub amplitude: f64,
}

/// Sampled excitation signal and the sources driven by it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Excitation {
    signal: Vec<f64>,
    sources: Vec<ExcitationSource>,
}

impl Excitation {
    pub fn new(signal: Vec<f64>, sources: Vec<ExcitationSource>) -> Self {
        Self { signal, sources }
    }

    pub fn signal(&self) -> &[f64] {
        &self.signal
    }

    pub fn sources(&self) -> &[ExcitationSource] {
        &self.sources
    }

    /// Value added by `source` at global step `step`.
    ///
    /// This is `amplitude * signal[step - delay]` for
    /// `0 < step - delay < signal.len()` and zero otherwise. Note that the
    /// first signal sample is never injected.
    pub fn amplitude(&self, source: &ExcitationSource, step: u64) -> f64 {
        self.signal_position(source, step)
            .map_or(0.0, |position| source.amplitude * self.signal[position])
    }

    fn signal_position(&self, source: &ExcitationSource, step: u64) -> Option<usize> {
        let position = usize::try_from(step.checked_sub(source.delay)?).ok()?;
        (position > 0 && position < self.signal.len()).then_some(position)
    }

    pub(crate) fn check_bounds(&self, strider: &Strider) -> Result<(), ConfigurationError> {
        for (source_index, source) in self.sources.iter().enumerate() {
            if !strider.is_inside(&source.point) {
                return Err(ConfigurationError::SourceOutOfBounds {
                    source_index,
                    component: source.component,
                    point: source.point,
                    size: *strider.size(),
                });
            }
        }
        Ok(())
    }
}
