//! Queue module: admission control in front of the external service.

mod admission;
mod error;

pub use admission::AdmissionQueue;
pub use error::QueueError;
