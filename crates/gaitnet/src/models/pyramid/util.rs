//! # Pyramid Backbone Utilities
use bimm_contracts::{ShapeContract, shape_contract};

/// Get the output resolution for a given input resolution and stride.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in=height_out*stride, width_in=width_out*stride]``.
///
/// # Returns
///
/// ``[height_out, width_out]``
///
/// # Panics
///
/// If the input resolution is not a multiple of the stride.
#[inline(always)]
pub fn stride_div_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    static RESOLUTION_CONTRACT: ShapeContract = shape_contract![
        "height_in" = "height_out" * "stride",
        "width_in" = "width_out" * "stride"
    ];
    RESOLUTION_CONTRACT.unpack_shape(
        &input_resolution,
        &["height_out", "width_out"],
        &[("stride", stride)],
    )
}

/// Count the half-scale alignment steps for each pyramid level.
///
/// The last level is the alignment target; every other level is halved
/// once for each stride-2 stage that follows it.
///
/// For the reference strides ``[1, 2, 2, 1]`` this yields ``[2, 1, 0, 0]``.
pub fn pyramid_halving_steps(strides: [usize; 4]) -> [usize; 4] {
    let mut steps = [0; 4];
    let mut pending = 0;
    for level in (0..4).rev() {
        steps[level] = pending;
        if strides[level] == 2 {
            pending += 1;
        }
    }
    steps
}
