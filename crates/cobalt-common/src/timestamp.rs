//! Unix epoch seconds as a floating-point timestamp.
//!
//! All wire/storage formats in the design use float epoch seconds rather
//! than an integer or a `chrono::DateTime`, so this newtype is the single
//! conversion point between that wire representation and `chrono` for
//! anything that needs calendar arithmetic (TTL expiry, rotation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    pub fn now() -> Self {
        Self(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_secs_f64(),
        )
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0.trunc() as i64, (self.0.fract() * 1e9) as u32)
            .unwrap_or_else(Utc::now)
    }

    pub fn elapsed_since(self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }
}

impl From<f64> for Timestamp {
    fn from(v: f64) -> Self {
        Timestamp(v)
    }
}

impl From<Timestamp> for f64 {
    fn from(ts: Timestamp) -> f64 {
        ts.0
    }
}
