use num_traits::{Float, Num};
use std::fmt::Debug;

/// Make sure bounds are ordered correctly, eg the lower bound is not above the upper one.
///
pub fn rearrange<N>(lower: N, upper: N) -> (N, N)
where
    N: Num + Debug + PartialOrd,
{
    if lower > upper {
        (upper, lower)
    } else {
        (lower, upper)
    }
}

/// Clamp a fraction into the closed unit interval. NaN is treated as 0.
///
pub fn clamp_unit<F>(fraction: F) -> F
where
    F: Float,
{
    if fraction.is_nan() || fraction < F::zero() {
        F::zero()
    } else if fraction > F::one() {
        F::one()
    } else {
        fraction
    }
}

/// Number of blocks of nominal size `size` along an axis of length `length`.
///
/// Rounds half away from zero, so the last block may be somewhat larger or smaller than `size`.
/// Never returns less than 1.
///
pub fn block_count(length: usize, size: usize) -> usize {
    let blocks = (length as f64 / size as f64).round() as usize;

    blocks.max(1)
}
