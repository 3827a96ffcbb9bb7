//! Temporal value classification.

use chrono::{NaiveDateTime, Timelike};

/// Check whether a date-time carries a time of day.
///
/// A value whose hour, minute, second and sub-second fields are all zero is
/// midnight and is treated as a plain date.
pub fn has_time_component(value: &NaiveDateTime) -> bool {
    value.hour() != 0 || value.minute() != 0 || value.second() != 0 || value.nanosecond() != 0
}
