use serde::{Deserialize, Serialize};

/// Point-in-time copy of the admission counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub active_requests: usize,
    pub queued_requests: usize,
    pub total_processed: u64,
    pub total_errors: u64,
    pub average_processing_ms: f64,
}

impl QueueStats {
    /// Fraction of processed operations that failed (0 when nothing ran yet).
    pub fn error_rate(&self) -> f64 {
        if self.total_processed == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_processed as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_handles_empty_history() {
        assert_eq!(QueueStats::default().error_rate(), 0.0);

        let stats = QueueStats {
            total_processed: 4,
            total_errors: 1,
            ..QueueStats::default()
        };
        assert_eq!(stats.error_rate(), 0.25);
    }
}
