use std::collections::VecDeque;

/// Rolling window of recent velocities for one content item.
#[derive(Debug, Clone)]
pub struct Baseline {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Baseline {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, velocity: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(velocity);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Population standard deviation, floored at `min_std`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn std(&self, min_std: f64) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self
            .samples
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        Some(variance.sqrt().max(min_std))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_latest_samples() {
        let mut baseline = Baseline::new(3);
        for v in [100.0, 1.0, 2.0, 3.0] {
            baseline.push(v);
        }
        assert_eq!(baseline.len(), 3);
        assert!((baseline.mean().unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn std_is_floored() {
        let mut baseline = Baseline::new(4);
        baseline.push(5.0);
        baseline.push(5.0);
        assert!((baseline.std(0.01).unwrap() - 0.01).abs() < 1e-12);

        baseline.push(7.0);
        baseline.push(3.0);
        assert!((baseline.std(0.01).unwrap() - 2.0_f64.sqrt()).abs() < 1e-12);
        assert!(Baseline::new(2).std(0.01).is_none());
    }
}
