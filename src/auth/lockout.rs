/// Failed-login lockout policy
///
/// Pure decision table evaluated after a failed password check. Lockouts
/// escalate with the cumulative attempt count and always expire.

use chrono::{DateTime, Duration, Utc};

pub const LOCKOUT_THRESHOLD: i32 = 3;

pub fn should_lock(failed_attempts: i32) -> bool {
    failed_attempts >= LOCKOUT_THRESHOLD
}

/// `None` below the threshold; 15 minutes, 1 hour, then 24 hours.
pub fn lockout_duration(failed_attempts: i32) -> Option<Duration> {
    match failed_attempts {
        n if n < LOCKOUT_THRESHOLD => None,
        3..=4 => Some(Duration::minutes(15)),
        5..=9 => Some(Duration::hours(1)),
        _ => Some(Duration::hours(24)),
    }
}

/// When a lockout triggered at `now` ends, if one applies.
pub fn locked_until(failed_attempts: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !should_lock(failed_attempts) {
        return None;
    }
    lockout_duration(failed_attempts).map(|d| now + d)
}

pub fn is_locked(locked_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match locked_until {
        None => false,
        Some(until) => now < until,
    }
}
