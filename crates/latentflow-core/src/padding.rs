//! Rounding sequence lengths up to a length unit.
//!
//! Flows that squeeze pairs of positions between levels only accept lengths
//! divisible by a power of two. Targets are either padded inside the prior
//! (and trimmed afterwards) or padded at the dataset level with a filler token
//! prepended to the sequence.

/// Rounds `n` up to the nearest multiple of `unit`.
///
/// # Example
///
/// ```
/// use latentflow_core::padding::round_up_to_unit;
///
/// assert_eq!(round_up_to_unit(6, 4), 8);
/// assert_eq!(round_up_to_unit(8, 4), 8);
/// assert_eq!(round_up_to_unit(0, 4), 0);
/// ```
pub fn round_up_to_unit(n: usize, unit: usize) -> usize {
    if unit <= 1 || n % unit == 0 {
        n
    } else {
        n + unit - n % unit
    }
}

/// Maps every size to its padded size.
pub fn padded_sizes(sizes: &[usize], unit: usize) -> Vec<usize> {
    sizes.iter().map(|&n| round_up_to_unit(n, unit)).collect()
}

/// Prepends `pad` tokens until the sequence length is a multiple of `unit`.
///
/// # Example
///
/// ```
/// use latentflow_core::padding::pad_front;
///
/// assert_eq!(pad_front(&[7, 8, 9], 1, 4), vec![1, 7, 8, 9]);
/// ```
pub fn pad_front<T: Copy>(tokens: &[T], pad: T, unit: usize) -> Vec<T> {
    let target = round_up_to_unit(tokens.len(), unit);
    let mut out = Vec::with_capacity(target);
    out.resize(target - tokens.len(), pad);
    out.extend_from_slice(tokens);
    out
}
