//! Sampled excitation signals.
//!
//! All times are measured in steps.

use std::f64::consts::TAU;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum Waveform {
    /// Samples given verbatim.
    Samples { samples: Vec<f64> },
    /// `exp(-((t - center) / duration)^2)`
    GaussianPulse {
        center: f64,
        duration: f64,
        length: usize,
    },
    /// Gaussian pulse modulated with a cosine of the given period.
    ModulatedGaussianPulse {
        center: f64,
        duration: f64,
        period: f64,
        length: usize,
    },
    Sinusoid { period: f64, length: usize },
    /// Constant 1 after the first sample.
    Step { length: usize },
}

impl Waveform {
    /// A gaussian pulse that starts and ends at roughly zero.
    ///
    /// The pulse is centered at 3 durations so the first sample, which is
    /// never injected, is negligible.
    pub fn gaussian_pulse(duration: f64) -> Self {
        let center = 3.0 * duration;
        Self::GaussianPulse {
            center,
            duration,
            length: (2.0 * center).ceil() as usize + 1,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Waveform::Samples { samples } => samples.len(),
            Waveform::GaussianPulse { length, .. }
            | Waveform::ModulatedGaussianPulse { length, .. }
            | Waveform::Sinusoid { length, .. }
            | Waveform::Step { length } => *length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample(&self) -> Vec<f64> {
        match self {
            Waveform::Samples { samples } => samples.clone(),
            Waveform::GaussianPulse {
                center,
                duration,
                length,
            } => {
                (0..*length)
                    .map(|t| gaussian(t as f64, *center, *duration))
                    .collect()
            }
            Waveform::ModulatedGaussianPulse {
                center,
                duration,
                period,
                length,
            } => {
                (0..*length)
                    .map(|t| {
                        let t = t as f64;
                        gaussian(t, *center, *duration) * (TAU * (t - center) / period).cos()
                    })
                    .collect()
            }
            Waveform::Sinusoid { period, length } => {
                (0..*length)
                    .map(|t| (TAU * t as f64 / period).sin())
                    .collect()
            }
            Waveform::Step { length } => {
                (0..*length)
                    .map(|t| if t == 0 { 0.0 } else { 1.0 })
                    .collect()
            }
        }
    }
}

fn gaussian(t: f64, center: f64, duration: f64) -> f64 {
    (-((t - center) / duration).powi(2)).exp()
}
