use std::iter::Sum;

use num_traits::{Float, ToPrimitive};

/// Create an evenly spaced grid from `start` up to, but not including, `end`.
pub fn gridspace<T: Float + ToPrimitive>(start: T, end: T, step: T) -> Vec<T> {
    let distance = end - start;
    let steps = (distance / step).round().to_usize().unwrap_or_default();
    let mut result = Vec::with_capacity(steps);
    for i in 0..steps {
        match T::from(i) {
            Some(i) => result.push(start + i * step),
            None => break,
        }
    }
    result
}

/// Trapezoid rule integration of `y` over `x`.
///
/// The sign follows the direction of `x`, so a descending axis yields a negative area.
pub fn trapz<T: Float + Sum>(x: &[T], y: &[T]) -> T {
    let n = x.len().min(y.len());
    if n < 2 {
        return T::zero();
    }
    let half = T::from(0.5).unwrap_or_else(T::zero);
    (0..n - 1)
        .map(|i| {
            let delta = x[i + 1] - x[i];
            delta * half * (y[i + 1] + y[i])
        })
        .sum()
}
