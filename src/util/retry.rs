use crate::error::GBError;
use backoff::{retry_notify, ExponentialBackoff};
use log::warn;
use std::cell::Cell;
use std::time::Duration;

/// The wait between two attempts grows up to this multiple of the first wait.
const MAX_BACKOFF_FACTOR: u32 = 1024;

/// Runs `operation`, retrying transient failures with exponential backoff.
///
/// `retries` bounds the number of extra attempts. Non-transient errors and the last transient
/// error are returned as they are.
pub fn retry_with_backoff<T, F>(
    what: &str,
    retries: u32,
    initial_backoff: Duration,
    mut operation: F,
) -> Result<T, GBError>
where
    F: FnMut() -> Result<T, GBError>,
{
    let backoff = ExponentialBackoff {
        current_interval: initial_backoff,
        initial_interval: initial_backoff,
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: initial_backoff.saturating_mul(MAX_BACKOFF_FACTOR),
        max_elapsed_time: None,
        ..Default::default()
    };
    let attempt = Cell::new(0);
    let result = retry_notify(
        backoff,
        || {
            operation().map_err(|e| {
                if e.is_transient() && attempt.get() < retries {
                    attempt.set(attempt.get() + 1);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        },
        |e: GBError, wait: Duration| {
            warn!("{} failed ({}), retry {}/{} in {:?}", what, e, attempt.get(), retries, wait);
        },
    );
    result.map_err(|e| match e {
        backoff::Error::Permanent(e) | backoff::Error::Transient { err: e, .. } => e,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::GBError;
    use crate::util::retry::retry_with_backoff;
    use std::time::Duration;

    #[test]
    fn recovers_from_transient_errors() {
        let mut calls = 0;
        let result = retry_with_backoff("flaky", 3, Duration::from_millis(1), || {
            calls += 1;
            if calls < 3 {
                Err(GBError::CoordinationUnavailable("down".to_owned()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn gives_up_after_retries() {
        let mut calls = 0;
        let result: Result<(), GBError> =
            retry_with_backoff("down", 2, Duration::from_millis(1), || {
                calls += 1;
                Err(GBError::CoordinationUnavailable("down".to_owned()))
            });
        assert!(matches!(result, Err(GBError::CoordinationUnavailable(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), GBError> =
            retry_with_backoff("bad", 5, Duration::from_millis(1), || {
                calls += 1;
                Err(GBError::Coordination("corrupt entry".to_owned()))
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn many_retries_do_not_overflow_the_backoff() {
        let mut calls = 0;
        let result = retry_with_backoff("flaky", 200, Duration::from_nanos(1), || {
            calls += 1;
            if calls < 80 {
                Err(GBError::CoordinationUnavailable("down".to_owned()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(80));
    }
}
