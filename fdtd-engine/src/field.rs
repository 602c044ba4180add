use std::{
    cell::UnsafeCell,
    ops::Range,
};

use nalgebra::Point3;

use crate::strider::{
    Axis,
    Strider,
};

/// Flat buffer of samples for all 3 components of a field.
///
/// Worker threads share this buffer and access it concurrently. The buffer
/// itself doesn't synchronize anything: callers of the unsafe accessors must
/// guarantee that no two threads touch the same sample unless both only read.
/// The engine does this with disjoint slabs and phase barriers.
pub struct FieldBuffer {
    data: Box<[UnsafeCell<f64>]>,
}

// SAFETY: all access to the samples goes through the unsafe methods below,
// whose callers guarantee exclusive writes.
unsafe impl Sync for FieldBuffer {}

impl FieldBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            data: (0..len).map(|_| UnsafeCell::new(0.0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice_mut(&mut self) -> &mut [f64] {
        // SAFETY: we hold the only reference to the buffer
        unsafe { self.slice_mut_unchecked(0..self.data.len()) }
    }

    pub fn as_slice(&self) -> &[f64] {
        // SAFETY: writes through a shared reference only happen in the unsafe
        // methods, whose callers guarantee that no slice is alive meanwhile.
        unsafe { self.slice_unchecked() }
    }

    /// # Safety
    ///
    /// No thread may write to the buffer while the returned slice is alive.
    pub unsafe fn slice_unchecked(&self) -> &[f64] {
        // note: UnsafeCell<f64> has the same in-memory representation as f64
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<f64>(), self.data.len()) }
    }

    /// # Safety
    ///
    /// No other thread may read or write `range` while the returned slice is
    /// alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut_unchecked(&self, range: Range<usize>) -> &mut [f64] {
        let cells = &self.data[range];
        unsafe { std::slice::from_raw_parts_mut(UnsafeCell::raw_get(cells.as_ptr()), cells.len()) }
    }
}

impl std::fmt::Debug for FieldBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldBuffer")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Voltage and current samples of the whole grid.
#[derive(Debug)]
pub struct FieldStorage {
    strider: Strider,
    pub(crate) volt: FieldBuffer,
    pub(crate) curr: FieldBuffer,
}

impl FieldStorage {
    pub fn new(strider: &Strider) -> Self {
        Self {
            strider: *strider,
            volt: FieldBuffer::zeroed(strider.len()),
            curr: FieldBuffer::zeroed(strider.len()),
        }
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    /// Bytes needed for the field samples of a grid.
    pub fn memory_required(strider: &Strider) -> usize {
        2 * strider.len() * size_of::<f64>()
    }

    pub fn volt(&self) -> FieldView<'_> {
        FieldView {
            strider: &self.strider,
            data: self.volt.as_slice(),
        }
    }

    pub fn curr(&self) -> FieldView<'_> {
        FieldView {
            strider: &self.strider,
            data: self.curr.as_slice(),
        }
    }

    pub fn reset(&mut self) {
        clear(self.volt.as_slice_mut());
        clear(self.curr.as_slice_mut());
    }

    /// # Safety
    ///
    /// No other thread may access the samples while this runs.
    pub(crate) unsafe fn reset_unchecked(&self) {
        unsafe {
            clear(self.volt.slice_mut_unchecked(0..self.volt.len()));
            clear(self.curr.slice_mut_unchecked(0..self.curr.len()));
        }
    }
}

#[cfg(not(feature = "rayon"))]
fn clear(samples: &mut [f64]) {
    samples.fill(0.0);
}

#[cfg(feature = "rayon")]
fn clear(samples: &mut [f64]) {
    use rayon::{
        iter::ParallelIterator as _,
        slice::ParallelSliceMut as _,
    };

    samples
        .par_chunks_mut(1 << 16)
        .for_each(|chunk| chunk.fill(0.0));
}

/// Read-only view of one field (all 3 components).
#[derive(Clone, Copy, Debug)]
pub struct FieldView<'a> {
    strider: &'a Strider,
    data: &'a [f64],
}

impl<'a> FieldView<'a> {
    pub fn strider(&self) -> &'a Strider {
        self.strider
    }

    pub fn get(&self, component: Axis, point: &Point3<usize>) -> Option<f64> {
        let index = self.strider.index(component, point)?;
        Some(self.data[index])
    }

    /// Samples in the buffer layout described by [`Strider`].
    pub fn as_slice(&self) -> &'a [f64] {
        self.data
    }

    /// Samples of one component.
    pub fn component(&self, component: Axis) -> &'a [f64] {
        let n = self.strider.num_cells();
        let start = component.vector_index() * n;
        &self.data[start..start + n]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, Point3<usize>, f64)> + 'a {
        let strider = self.strider;
        self.data.iter().enumerate().map(move |(index, value)| {
            let (component, point) = strider.point_unchecked(index);
            (component, point, *value)
        })
    }

    /// Whether no sample is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    pub fn norm_squared(&self) -> f64 {
        self.data.iter().map(|x| x * x).sum()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        field::FieldStorage,
        strider::{
            Axis,
            Strider,
        },
    };

    #[test]
    fn it_starts_zeroed() {
        let strider = Strider::new(&Vector3::new(2, 3, 4));
        let fields = FieldStorage::new(&strider);
        assert_eq!(fields.volt().as_slice().len(), strider.len());
        assert!(fields.volt().as_slice().iter().all(|x| *x == 0.0));
        assert_eq!(fields.curr().norm_squared(), 0.0);
    }

    #[test]
    fn it_resets_samples() {
        let strider = Strider::new(&Vector3::new(2, 3, 4));
        let mut fields = FieldStorage::new(&strider);

        let index = strider.index_unchecked(Axis::Y, &Point3::new(1, 2, 3));
        fields.volt.as_slice_mut()[index] = 3.0;
        fields.curr.as_slice_mut()[0] = -1.0;
        assert_eq!(fields.volt().get(Axis::Y, &Point3::new(1, 2, 3)), Some(3.0));
        assert_eq!(fields.curr().norm_squared(), 1.0);

        fields.reset();
        assert_eq!(fields.volt().norm_squared(), 0.0);
        assert_eq!(fields.curr().norm_squared(), 0.0);
    }

    #[test]
    fn it_views_components_and_points() {
        let strider = Strider::new(&Vector3::new(2, 2, 2));
        let mut fields = FieldStorage::new(&strider);
        let index = strider.index_unchecked(Axis::Z, &Point3::new(1, 0, 1));
        fields.volt.as_slice_mut()[index] = f64::NAN;

        let volt = fields.volt();
        assert!(!volt.is_finite());
        assert!(volt.component(Axis::Z)[5].is_nan());
        assert_eq!(volt.component(Axis::X).len(), 8);
        assert!(volt.get(Axis::Z, &Point3::new(2, 0, 0)).is_none());

        let (component, point, _) = volt.iter().find(|(_, _, x)| x.is_nan()).unwrap();
        assert_eq!(component, Axis::Z);
        assert_eq!(point, Point3::new(1, 0, 1));
    }
}
