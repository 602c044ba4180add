//! Stencil updates of the leapfrog scheme.
//!
//! The functions here don't synchronize anything. They only touch the samples
//! they are handed, so callers decide how the grid is split up and when each
//! phase runs.

use std::ops::Range;

use nalgebra::Point3;

use crate::{
    excitation::Excitation,
    operator::Coefficients,
    strider::{
        Axis,
        Strider,
    },
};

/// Mutable access to the samples of one slab (a range of x lines) of a field.
///
/// Holds one contiguous chunk per component.
#[derive(Debug)]
pub struct SlabMut<'a> {
    components: [&'a mut [f64]; 3],
    /// offset of the slab's first sample within each component
    offset: usize,
    lines: Range<usize>,
}

impl<'a> SlabMut<'a> {
    /// # Panics
    ///
    /// Panics if the chunks don't have the length of the slab.
    pub fn from_components(
        strider: &Strider,
        lines: Range<usize>,
        components: [&'a mut [f64]; 3],
    ) -> Self {
        let expected = strider.slab_index_range(Axis::X, &lines).len();
        assert!(
            components.iter().all(|chunk| chunk.len() == expected),
            "slab chunks don't match lines {lines:?}"
        );

        Self {
            components,
            offset: lines.start * strider.strides().x,
            lines,
        }
    }

    /// Borrows the slab `lines` from a buffer holding a whole field.
    pub fn from_buffer(strider: &Strider, lines: Range<usize>, samples: &'a mut [f64]) -> Self {
        let n = strider.num_cells();
        let (x, rest) = samples.split_at_mut(n);
        let (y, z) = rest.split_at_mut(n);

        let range = strider.slab_index_range(Axis::X, &lines);
        let components = [x, y, z].map(|component| &mut component[range.clone()]);

        Self::from_components(strider, lines, components)
    }

    #[inline(always)]
    fn sample_mut(&mut self, component: Axis, cell: usize) -> &mut f64 {
        &mut self.components[component.vector_index()][cell - self.offset]
    }
}

/// Voltage update of all cells in the slab.
///
/// Reads currents one line below the slab, so the neighboring slab's current
/// update must be complete.
pub fn update_voltages(
    strider: &Strider,
    coefficients: &Coefficients,
    volt: &mut SlabMut,
    curr: &[f64],
) {
    let size = strider.size();
    let strides = strider.strides().xyz();
    let n = strider.num_cells();

    for x in volt.lines.clone() {
        for y in 0..size.y {
            for z in 0..size.z {
                let point = Point3::new(x, y, z);
                let cell = point.coords.dot(&strides);

                for component in Axis::ALL {
                    let (a, b) = component.others();
                    let index = component.vector_index() * n + cell;
                    let index_a = a.vector_index() * n + cell;
                    let index_b = b.vector_index() * n + cell;

                    let curl = curr[index_b] - curr[strider.backward(index_b, &point, a)]
                        - curr[index_a]
                        + curr[strider.backward(index_a, &point, b)];

                    let sample = volt.sample_mut(component, cell);
                    *sample = *sample * coefficients.vv[index] + coefficients.vi[index] * curl;
                }
            }
        }
    }
}

/// Current update of all cells in the slab.
///
/// Currents on the last line of each axis are not defined and stay untouched.
/// Reads voltages one line above the slab.
pub fn update_currents(
    strider: &Strider,
    coefficients: &Coefficients,
    curr: &mut SlabMut,
    volt: &[f64],
) {
    let size = strider.size();
    let strides = strider.strides().xyz();
    let n = strider.num_cells();

    let lines = curr.lines.start..curr.lines.end.min(size.x.saturating_sub(1));

    for x in lines {
        for y in 0..size.y.saturating_sub(1) {
            for z in 0..size.z.saturating_sub(1) {
                let cell = Point3::new(x, y, z).coords.dot(&strides);

                for component in Axis::ALL {
                    let (a, b) = component.others();
                    let index = component.vector_index() * n + cell;
                    let index_a = a.vector_index() * n + cell;
                    let index_b = b.vector_index() * n + cell;

                    let curl = volt[index_b] - volt[strider.forward(index_b, a)] - volt[index_a]
                        + volt[strider.forward(index_a, b)];

                    let sample = curr.sample_mut(component, cell);
                    *sample = *sample * coefficients.ii[index] + coefficients.iv[index] * curl;
                }
            }
        }
    }
}

/// Adds the soft sources active at `step` to the voltages.
///
/// Sources may address any cell, so this needs the whole voltage buffer.
pub fn apply_excitation(strider: &Strider, excitation: &Excitation, volt: &mut [f64], step: u64) {
    for source in excitation.sources() {
        let amplitude = excitation.amplitude(source, step);
        if amplitude != 0.0 {
            volt[strider.index_unchecked(source.component, &source.point)] += amplitude;
        }
    }
}
