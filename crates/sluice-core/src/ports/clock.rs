//! Clock port - 時刻の抽象化
//!
//! Error contexts carry a wall-clock timestamp. Tests use `FixedClock`.

use chrono::{DateTime, Utc};

/// Clock は現在時刻を提供
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
