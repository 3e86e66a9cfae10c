//! JitterSource 実装

use std::sync::Mutex;

use rand::Rng;

use crate::ports::JitterSource;

/// 本番用: thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..1.0)
    }
}

/// テスト用: 常に同じ値
///
/// `FixedJitter(0.5)` yields no jitter at all: the offset is
/// `delay * factor * (2r - 1)`.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// テスト用: 与えた値を順番に返す（最後の値を繰り返す）
#[derive(Debug)]
pub struct SequenceJitter {
    values: Mutex<Vec<f64>>,
}

impl SequenceJitter {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        let mut values: Vec<f64> = values.into_iter().collect();
        values.reverse();
        Self {
            values: Mutex::new(values),
        }
    }
}

impl JitterSource for SequenceJitter {
    fn sample(&self) -> f64 {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let v = if values.len() > 1 {
            values.pop().unwrap_or(0.5)
        } else {
            values.last().copied().unwrap_or(0.5)
        };
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_rng_samples_are_in_range() {
        let jitter = ThreadRngJitter;
        for _ in 0..1000 {
            let v = jitter.sample();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn sequence_repeats_last_value() {
        let jitter = SequenceJitter::new([0.1, 0.9]);
        assert_eq!(jitter.sample(), 0.1);
        assert_eq!(jitter.sample(), 0.9);
        assert_eq!(jitter.sample(), 0.9);
    }
}
