use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    error::ConfigurationError,
    excitation::Excitation,
    field::FieldStorage,
    strider::{
        Axis,
        Strider,
    },
};

/// Update coefficients of a single sample.
///
/// `vv` and `ii` are the decay multipliers for voltage and current, `vi` and
/// `iv` multiply the curl of the other field.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellCoefficients {
    pub vv: f64,
    pub vi: f64,
    pub ii: f64,
    pub iv: f64,
}

/// Per-sample coefficient tables, laid out like the field buffers (see
/// [`Strider`]).
#[derive(Clone, derive_more::Debug)]
pub struct Coefficients {
    #[debug(ignore)]
    pub(crate) vv: Box<[f64]>,
    #[debug(ignore)]
    pub(crate) vi: Box<[f64]>,
    #[debug(ignore)]
    pub(crate) ii: Box<[f64]>,
    #[debug(ignore)]
    pub(crate) iv: Box<[f64]>,
}

impl Coefficients {
    /// Takes ownership of tables produced by an operator builder. The shape is
    /// checked when the [`Operator`] is assembled.
    pub fn from_tables(
        vv: impl Into<Box<[f64]>>,
        vi: impl Into<Box<[f64]>>,
        ii: impl Into<Box<[f64]>>,
        iv: impl Into<Box<[f64]>>,
    ) -> Self {
        Self {
            vv: vv.into(),
            vi: vi.into(),
            ii: ii.into(),
            iv: iv.into(),
        }
    }

    pub fn from_fn(
        strider: &Strider,
        mut init: impl FnMut(Axis, Point3<usize>) -> CellCoefficients,
    ) -> Self {
        let len = strider.len();
        let mut vv = Vec::with_capacity(len);
        let mut vi = Vec::with_capacity(len);
        let mut ii = Vec::with_capacity(len);
        let mut iv = Vec::with_capacity(len);

        for index in 0..len {
            let (component, point) = strider.point_unchecked(index);
            let cell = init(component, point);
            vv.push(cell.vv);
            vi.push(cell.vi);
            ii.push(cell.ii);
            iv.push(cell.iv);
        }

        Self::from_tables(vv, vi, ii, iv)
    }

    pub fn uniform(strider: &Strider, cell: CellCoefficients) -> Self {
        Self::from_fn(strider, |_, _| cell)
    }

    pub fn at(
        &self,
        strider: &Strider,
        component: Axis,
        point: &Point3<usize>,
    ) -> Option<CellCoefficients> {
        let index = strider.index(component, point)?;
        Some(CellCoefficients {
            vv: self.vv[index],
            vi: self.vi[index],
            ii: self.ii[index],
            iv: self.iv[index],
        })
    }

    fn check_shape(&self, strider: &Strider) -> Result<(), ConfigurationError> {
        let expected = strider.len();
        for (table, samples) in [
            ("vv", &self.vv),
            ("vi", &self.vi),
            ("ii", &self.ii),
            ("iv", &self.iv),
        ] {
            if samples.len() != expected {
                return Err(ConfigurationError::ShapeMismatch {
                    table,
                    expected,
                    actual: samples.len(),
                });
            }
        }
        Ok(())
    }
}

/// Everything the engine consumes from the operator builder: grid size,
/// coefficient tables and the excitation table.
///
/// Immutable once assembled. Engines share it through an `Arc`.
#[derive(Clone, Debug)]
pub struct Operator {
    strider: Strider,
    coefficients: Coefficients,
    excitation: Excitation,
}

impl Operator {
    pub fn new(
        size: Vector3<usize>,
        coefficients: Coefficients,
        excitation: Excitation,
    ) -> Result<Self, ConfigurationError> {
        if size.iter().any(|n| *n == 0) {
            return Err(ConfigurationError::ZeroDimension { size });
        }

        let strider = Strider::new(&size);
        coefficients.check_shape(&strider)?;
        excitation.check_bounds(&strider)?;

        Ok(Self {
            strider,
            coefficients,
            excitation,
        })
    }

    pub fn size(&self) -> &Vector3<usize> {
        self.strider.size()
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    pub fn excitation(&self) -> &Excitation {
        &self.excitation
    }

    /// Bytes needed for the coefficient tables and the fields of an engine
    /// running this operator.
    pub fn memory_required(&self) -> usize {
        4 * self.strider.len() * size_of::<f64>() + FieldStorage::memory_required(&self.strider)
    }
}
