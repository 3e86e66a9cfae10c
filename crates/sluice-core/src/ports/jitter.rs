//! JitterSource port - バックオフの乱数源
//!
//! Retry delays are randomized to avoid synchronized retry storms. The
//! random source is injected so tests can pin it.

/// A source of uniformly distributed samples in `[0.0, 1.0)`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}
