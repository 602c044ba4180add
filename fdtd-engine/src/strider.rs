use std::ops::Range;

use nalgebra::{
    Point3,
    Vector3,
    Vector4,
};

/// Maps `(component, point)` pairs to indices into a flat field buffer.
///
/// The layout is component-major, then `x`, `y` and `z` (fastest). With this
/// ordering every slab along the x axis is one contiguous block per component,
/// which is what lets slab workers borrow disjoint parts of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strider {
    /// strides for x, y, z and the component. the component stride is the
    /// number of cells.
    strides: Vector4<usize>,
    size: Vector3<usize>,
}

impl Strider {
    pub fn new(size: &Vector3<usize>) -> Self {
        Self {
            strides: strides_for_size(size),
            size: *size,
        }
    }

    pub fn size(&self) -> &Vector3<usize> {
        &self.size
    }

    pub fn strides(&self) -> &Vector4<usize> {
        &self.strides
    }

    /// Number of cells per component.
    pub fn num_cells(&self) -> usize {
        self.strides.w
    }

    /// Length of a buffer holding all 3 components.
    pub fn len(&self) -> usize {
        3 * self.strides.w
    }

    pub fn is_empty(&self) -> bool {
        self.strides.w == 0
    }

    #[inline(always)]
    pub fn index_unchecked(&self, component: Axis, point: &Point3<usize>) -> usize {
        component.vector_index() * self.strides.w + point.coords.dot(&self.strides.xyz())
    }

    pub fn index(&self, component: Axis, point: &Point3<usize>) -> Option<usize> {
        self.is_inside(point)
            .then(|| self.index_unchecked(component, point))
    }

    pub fn point(&self, index: usize) -> Option<(Axis, Point3<usize>)> {
        (index < self.len()).then(|| self.point_unchecked(index))
    }

    pub fn point_unchecked(&self, mut index: usize) -> (Axis, Point3<usize>) {
        let component = Axis::from_index(index / self.strides.w);
        index %= self.strides.w;
        let x = index / self.strides.x;
        index %= self.strides.x;
        let y = index / self.strides.y;
        index %= self.strides.y;
        let z = index / self.strides.z;
        (component, Point3::new(x, y, z))
    }

    pub fn is_inside(&self, point: &Point3<usize>) -> bool {
        point.x < self.size.x && point.y < self.size.y && point.z < self.size.z
    }

    /// Index of the backward neighbor of `index` along `axis`.
    ///
    /// On the lower boundary the neighbor is clamped to the cell itself, so a
    /// backward difference there evaluates to zero.
    #[inline(always)]
    pub fn backward(&self, index: usize, point: &Point3<usize>, axis: Axis) -> usize {
        if point[axis.vector_index()] == 0 {
            index
        }
        else {
            index - self.strides[axis.vector_index()]
        }
    }

    /// Index of the forward neighbor of `index` along `axis`.
    ///
    /// The caller must make sure the neighbor is inside the grid.
    #[inline(always)]
    pub fn forward(&self, index: usize, axis: Axis) -> usize {
        index + self.strides[axis.vector_index()]
    }

    /// Index range of one component restricted to the x lines in `lines`.
    pub fn slab_index_range(&self, component: Axis, lines: &Range<usize>) -> Range<usize> {
        let base = component.vector_index() * self.strides.w;
        let start = base + lines.start * self.strides.x;
        let end = base + lines.end.max(lines.start) * self.strides.x;
        start..end
    }
}

pub fn strides_for_size(size: &Vector3<usize>) -> Vector4<usize> {
    let mut strides = Vector4::zeros();
    strides.z = 1;
    strides.y = strides.z * size.z;
    strides.x = strides.y * size.y;
    strides.w = strides.x * size.x;
    strides
}

/// Field component or grid axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    pub fn vector_index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// # Panics
    ///
    /// Panics if `index > 2`
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Axis::X,
            1 => Axis::Y,
            2 => Axis::Z,
            _ => panic!("invalid axis index: {index}"),
        }
    }

    /// The two other axes, in cyclic order.
    ///
    /// For `X` this is `(Y, Z)`, for `Y` it's `(Z, X)` and for `Z` it's
    /// `(X, Y)`. The curl of a component is built from these.
    pub fn others(&self) -> (Self, Self) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::Z, Axis::X),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }

    pub fn vector_component<'a, T>(&self, vector: &'a Vector3<T>) -> &'a T {
        &vector[self.vector_index()]
    }
}
