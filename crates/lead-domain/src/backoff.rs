//! The retry/backoff policy applied by the outbox worker: a fixed stepped
//! schedule plus the max-attempts cutoff into a terminal failure.

use chrono::Duration;

pub const MAX_ATTEMPTS: i32 = 10;
pub const LAST_ERROR_MAX_LEN: usize = 900;

/// The stepped backoff schedule. `attempt` is 1-based (the attempt number
/// about to be retried, i.e. `job.attempts + 1`).
pub fn backoff_for_attempt(attempt: i32) -> Duration {
    match attempt {
        1 => Duration::minutes(1),
        2 => Duration::minutes(5),
        3 => Duration::minutes(15),
        4 => Duration::hours(1),
        5 => Duration::hours(6),
        _ => Duration::hours(24),
    }
}

/// The outcome of a failed send, used by the worker to decide the next
/// state transition for a job.
pub enum RetryDecision {
    Retry {
        attempts: i32,
        backoff: Duration,
    },
    GiveUp {
        attempts: i32,
    },
}

/// Decides whether a job that just failed (currently at `current_attempts`)
/// should be retried or permanently failed.
pub fn decide_retry(current_attempts: i32) -> RetryDecision {
    let attempt = current_attempts + 1;
    if attempt >= MAX_ATTEMPTS {
        RetryDecision::GiveUp { attempts: attempt }
    } else {
        RetryDecision::Retry {
            attempts: attempt,
            backoff: backoff_for_attempt(attempt),
        }
    }
}

/// Truncates an error message to the last_error column's byte budget,
/// respecting UTF-8 character boundaries.
pub fn truncate_error(msg: &str) -> String {
    if msg.len() <= LAST_ERROR_MAX_LEN {
        return msg.to_string();
    }
    let mut end = LAST_ERROR_MAX_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    msg[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matches_spec_table() {
        assert_eq!(backoff_for_attempt(1), Duration::minutes(1));
        assert_eq!(backoff_for_attempt(2), Duration::minutes(5));
        assert_eq!(backoff_for_attempt(3), Duration::minutes(15));
        assert_eq!(backoff_for_attempt(4), Duration::hours(1));
        assert_eq!(backoff_for_attempt(5), Duration::hours(6));
        assert_eq!(backoff_for_attempt(6), Duration::hours(24));
        assert_eq!(backoff_for_attempt(42), Duration::hours(24));
    }

    #[test]
    fn gives_up_at_max_attempts() {
        match decide_retry(MAX_ATTEMPTS - 1) {
            RetryDecision::GiveUp { attempts } => assert_eq!(attempts, MAX_ATTEMPTS),
            _ => panic!("expected GiveUp"),
        }
    }

    #[test]
    fn retries_below_max_attempts() {
        match decide_retry(0) {
            RetryDecision::Retry { attempts, backoff } => {
                assert_eq!(attempts, 1);
                assert_eq!(backoff, Duration::minutes(1));
            }
            _ => panic!("expected Retry"),
        }
    }

    #[test]
    fn truncates_long_messages() {
        let long = "x".repeat(2000);
        let truncated = truncate_error(&long);
        assert_eq!(truncated.len(), LAST_ERROR_MAX_LEN);
    }

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(truncate_error("boom"), "boom");
    }
}
