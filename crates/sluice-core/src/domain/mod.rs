//! Domain model (faults, canonical errors, attempt history).
//!
//! 外部サービスや queue の実装には依存しない純粋な型だけを置きます。

pub mod attempt;
pub mod errors;
pub mod fault;

pub use attempt::{RetryAttempt, RetryResult};
pub use errors::{ApiError, ErrorCode, ErrorContext, FailureReason, InternalError, Severity};
pub use fault::Fault;
