/// Dense weight vector plus the optional training-side accumulators.
///
/// The length is fixed at construction; the inference core only reads the
/// weights, while optimizers mutate them between sequences through the
/// `*_mut` accessors. Update rules live outside this crate; the store only
/// keeps the running sums they need (a presentation-counted weight
/// accumulator for parameter averaging and a per-weight squared-gradient
/// accumulator).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamStore {
    lambda: Vec<f64>,
    lambda_acc: Option<Vec<f64>>,
    presentations: u64,
    grad_sqr_acc: Option<Vec<f64>>,
}

impl ParamStore {
    /// Zero-initialized weights of the given length.
    pub fn new(len: usize) -> Self {
        ParamStore {
            lambda: vec![0.0; len],
            lambda_acc: None,
            presentations: 0,
            grad_sqr_acc: None,
        }
    }

    pub fn from_weights(lambda: Vec<f64>) -> Self {
        ParamStore {
            lambda,
            lambda_acc: None,
            presentations: 0,
            grad_sqr_acc: None,
        }
    }

    pub fn len(&self) -> usize {
        self.lambda.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lambda.is_empty()
    }

    pub fn lambda(&self) -> &[f64] {
        &self.lambda
    }

    pub fn lambda_mut(&mut self) -> &mut [f64] {
        &mut self.lambda
    }

    /// Allocates the averaging accumulator (idempotent).
    pub fn enable_averaging(&mut self) {
        if self.lambda_acc.is_none() {
            self.lambda_acc = Some(vec![0.0; self.lambda.len()]);
        }
    }

    /// Adds the current weights into the averaging accumulator and counts
    /// one presentation.
    ///
    /// # Panics
    /// If averaging was not enabled.
    pub fn accumulate_average(&mut self) {
        let acc = self
            .lambda_acc
            .as_mut()
            .expect("averaging accumulator not enabled");
        for (a, &w) in acc.iter_mut().zip(&self.lambda) {
            *a += w;
        }
        self.presentations += 1;
    }

    pub fn presentations(&self) -> u64 {
        self.presentations
    }

    /// Average of the accumulated weights, or `None` before the first
    /// presentation.
    pub fn averaged(&self) -> Option<Vec<f64>> {
        let acc = self.lambda_acc.as_ref()?;
        if self.presentations == 0 {
            return None;
        }
        let inv = 1.0 / self.presentations as f64;
        Some(acc.iter().map(|&a| a * inv).collect())
    }

    /// Allocates the squared-gradient accumulator (idempotent).
    pub fn enable_grad_sqr(&mut self) {
        if self.grad_sqr_acc.is_none() {
            self.grad_sqr_acc = Some(vec![0.0; self.lambda.len()]);
        }
    }

    /// Adds `grad[k]^2` into the squared-gradient accumulator.
    ///
    /// # Panics
    /// If the accumulator was not enabled or `grad` has the wrong length.
    pub fn accumulate_grad_sqr(&mut self, grad: &[f64]) {
        let acc = self
            .grad_sqr_acc
            .as_mut()
            .expect("squared-gradient accumulator not enabled");
        assert_eq!(grad.len(), acc.len(), "gradient length mismatch");
        for (a, &g) in acc.iter_mut().zip(grad) {
            *a += g * g;
        }
    }

    pub fn grad_sqr(&self) -> Option<&[f64]> {
        self.grad_sqr_acc.as_deref()
    }

    pub fn grad_sqr_mut(&mut self) -> Option<&mut [f64]> {
        self.grad_sqr_acc.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_length_zero_init() {
        let store = ParamStore::new(5);
        assert_eq!(store.len(), 5);
        assert!(store.lambda().iter().all(|&w| w == 0.0));
        assert!(store.averaged().is_none());
        assert!(store.grad_sqr().is_none());
    }

    #[test]
    fn test_averaging_counts_presentations() {
        let mut store = ParamStore::from_weights(vec![1.0, -2.0]);
        store.enable_averaging();
        assert!(store.averaged().is_none());
        store.accumulate_average();
        store.lambda_mut()[0] = 3.0;
        store.accumulate_average();
        assert_eq!(store.presentations(), 2);
        let avg = store.averaged().unwrap();
        assert_relative_eq!(avg[0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(avg[1], -2.0, max_relative = 1e-12);
    }

    #[test]
    fn test_grad_sqr_accumulates_squares() {
        let mut store = ParamStore::new(3);
        store.enable_grad_sqr();
        store.accumulate_grad_sqr(&[1.0, -2.0, 0.5]);
        store.accumulate_grad_sqr(&[1.0, 0.0, 0.5]);
        let acc = store.grad_sqr().unwrap();
        assert_relative_eq!(acc[0], 2.0, max_relative = 1e-12);
        assert_relative_eq!(acc[1], 4.0, max_relative = 1e-12);
        assert_relative_eq!(acc[2], 0.5, max_relative = 1e-12);
    }

    #[test]
    #[should_panic(expected = "not enabled")]
    fn test_accumulate_average_requires_enable() {
        let mut store = ParamStore::new(2);
        store.accumulate_average();
    }
}
