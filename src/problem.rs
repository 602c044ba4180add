use std::path::Path;

use color_eyre::eyre::{
    Error,
    bail,
};
use fdtd_engine::{
    Axis,
    CellCoefficients,
    Coefficients,
    EngineConfig,
    Excitation,
    ExcitationSource,
    Operator,
    Strider,
    Waveform,
};
use nalgebra::{
    Point3,
    Vector3,
};
use serde::{
    Deserialize,
    Serialize,
};

/// A problem file: grid, material, excitation and what to record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub size: Vector3<usize>,

    #[serde(default = "default_steps")]
    pub steps: u64,

    #[serde(default = "default_batch")]
    pub batch: u64,

    /// Same update coefficients in every cell.
    pub coefficients: CellCoefficients,

    pub waveform: Waveform,

    #[serde(default)]
    pub sources: Vec<ExcitationSource>,

    #[serde(default)]
    pub probes: Vec<Probe>,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_steps() -> u64 {
    100
}

fn default_batch() -> u64 {
    10
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub field: FieldKind,
    pub component: Axis,
    pub point: Point3<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Volt,
    Curr,
}

impl Problem {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let toml = std::fs::read_to_string(path)?;
        let problem: Problem = toml::from_str(&toml)?;
        tracing::debug!(path = %path.display(), size = ?problem.size, "loaded problem");
        Ok(problem)
    }

    /// A z-directed dipole in the middle of a small vacuum-like grid.
    pub fn example() -> Self {
        let size = Vector3::new(32, 32, 32);
        let center = Point3::from(size / 2);

        Self {
            size,
            steps: default_steps(),
            batch: default_batch(),
            coefficients: CellCoefficients {
                vv: 1.0,
                vi: 0.5,
                ii: 1.0,
                iv: 0.5,
            },
            waveform: Waveform::gaussian_pulse(8.0),
            sources: vec![ExcitationSource {
                component: Axis::Z,
                point: center,
                delay: 0,
                amplitude: 1.0,
            }],
            probes: vec![
                Probe {
                    name: "feed".to_owned(),
                    field: FieldKind::Volt,
                    component: Axis::Z,
                    point: center,
                },
                Probe {
                    name: "far".to_owned(),
                    field: FieldKind::Volt,
                    component: Axis::Z,
                    point: center + Vector3::new(8, 0, 0),
                },
            ],
            engine: Default::default(),
        }
    }

    pub fn operator(&self) -> Result<Operator, Error> {
        let strider = Strider::new(&self.size);

        for probe in &self.probes {
            if !strider.is_inside(&probe.point) {
                bail!(
                    "probe {} at {:?} is outside the grid {:?}",
                    probe.name,
                    probe.point,
                    self.size
                );
            }
        }

        let coefficients = Coefficients::uniform(&strider, self.coefficients);
        let excitation = Excitation::new(self.waveform.sample(), self.sources.clone());
        Ok(Operator::new(self.size, coefficients, excitation)?)
    }
}

#[cfg(test)]
mod tests {
    use fdtd_engine::{
        Axis,
        ConfigurationError,
    };
    use nalgebra::Point3;

    use crate::problem::{
        FieldKind,
        Problem,
    };

    #[test]
    fn it_parses_the_demo_problem() {
        let problem: Problem = toml::from_str(include_str!("../demos/dipole.toml")).unwrap();
        assert_eq!(problem.sources.len(), 1);
        assert_eq!(problem.probes[0].field, FieldKind::Volt);
        assert_eq!(problem.probes[0].component, Axis::Z);

        let operator = problem.operator().unwrap();
        assert_eq!(operator.size(), &problem.size);
        assert_eq!(operator.excitation().signal().len(), problem.waveform.len());
    }

    #[test]
    fn it_roundtrips_the_example_problem() {
        let toml = toml::to_string_pretty(&Problem::example()).unwrap();
        let problem: Problem = toml::from_str(&toml).unwrap();
        assert_eq!(problem.size, Problem::example().size);
        assert_eq!(problem.engine, Default::default());
        problem.operator().unwrap();
    }

    #[test]
    fn it_rejects_probes_outside_the_grid() {
        let mut problem = Problem::example();
        problem.probes[0].point = Point3::new(0, 0, 32);
        assert!(problem.operator().is_err());
    }

    #[test]
    fn it_rejects_sources_outside_the_grid() {
        let mut problem = Problem::example();
        problem.sources[0].point = Point3::new(40, 0, 0);
        let error = problem.operator().unwrap_err();
        assert!(matches!(
            error.downcast_ref::<ConfigurationError>(),
            Some(ConfigurationError::SourceOutOfBounds { .. })
        ));
    }
}
