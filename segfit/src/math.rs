use num_traits::{Float, FromPrimitive};

/// `n` evenly spaced values from `start` to `end`, inclusive.
///
/// Yields nothing for `n == 0` and only `start` for `n == 1`.
pub fn linspace<T>(start: T, end: T, n: usize) -> impl Iterator<Item = T>
where
    T: Float + FromPrimitive,
{
    let step = if n > 1 {
        T::from_usize(n - 1).map_or(T::zero(), |intervals| (end - start) / intervals)
    } else {
        T::zero()
    };
    (0..n).map(move |i| start + T::from_usize(i).unwrap_or_else(T::zero) * step)
}
