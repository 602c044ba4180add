use std::ops::Range;

/// Splits `0..num_lines` into `num_slabs` ordered, contiguous slabs.
///
/// Every slab has `ceil(num_lines / num_slabs)` lines, except the last
/// non-empty one, which is clipped at `num_lines`. If there are more slabs
/// than that size allows, the trailing slabs are empty.
///
/// # Panics
///
/// Panics if `num_slabs` is 0.
pub fn partition(num_lines: usize, num_slabs: usize) -> Vec<Range<usize>> {
    assert!(num_slabs > 0, "can't partition into 0 slabs");

    let lines_per_slab = num_lines.div_ceil(num_slabs);

    (0..num_slabs)
        .map(|n| {
            let start = (n * lines_per_slab).min(num_lines);
            let end = ((n + 1) * lines_per_slab).min(num_lines);
            start..end
        })
        .collect()
}
