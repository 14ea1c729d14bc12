//! Wall clock
//!
//! Heartbeat freshness, ready deadlines and the Start broadcast timestamp
//! are all expressed in unix seconds.

use chrono::Utc;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}
