use num_traits::Float;

/// Additive identity of log-domain multiplication, i.e. log(0).
pub const LOG0: f64 = f64::NEG_INFINITY;

/// Computes `log(exp(a) + exp(b))` without leaving the log domain.
///
/// Either argument may be `-inf` (an impossible path); the other argument
/// is returned unchanged in that case.
pub fn log_add<T: Float>(a: T, b: T) -> T {
    if a == T::neg_infinity() {
        return b;
    }
    if b == T::neg_infinity() {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Log-sum-exp over a slice. Empty slices and all-`-inf` slices sum to
/// `-inf`.
pub fn log_sum<T: Float + std::iter::Sum>(xs: &[T]) -> T {
    let max = xs
        .iter()
        .copied()
        .fold(T::neg_infinity(), |acc, x| acc.max(x));
    if max == T::neg_infinity() {
        return T::neg_infinity();
    }
    let sum: T = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}
