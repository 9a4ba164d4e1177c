use super::*;
use std::cell::Cell;

#[test]
fn backoff_doubles_per_attempt() {
    let base = Duration::from_millis(100);
    assert_eq!(backoff_delay(1, base), Duration::from_millis(100));
    assert_eq!(backoff_delay(2, base), Duration::from_millis(200));
    assert_eq!(backoff_delay(3, base), Duration::from_millis(400));
}

#[test]
fn server_errors_are_retryable() {
    assert!(is_retryable(&ureq::Error::StatusCode(503)));
    assert!(is_retryable(&ureq::Error::ConnectionFailed));
    assert!(!is_retryable(&ureq::Error::StatusCode(404)));
}

#[test]
fn retries_until_success() {
    let calls = Cell::new(0);
    let result = request_with_retry("test", 3, Duration::ZERO, None, || {
        calls.set(calls.get() + 1);
        if calls.get() < 3 {
            Err(ureq::Error::StatusCode(500))
        } else {
            Ok("ok".to_string())
        }
    });

    assert_eq!(result.expect("third attempt succeeds"), "ok");
    assert_eq!(calls.get(), 3);
}

#[test]
fn client_errors_are_not_retried() {
    let calls = Cell::new(0);
    let result = request_with_retry("test", 5, Duration::ZERO, None, || {
        calls.set(calls.get() + 1);
        Err(ureq::Error::StatusCode(404))
    });

    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
}

#[test]
fn gives_up_after_attempts() {
    let calls = Cell::new(0);
    let result = request_with_retry("test", 2, Duration::ZERO, None, || {
        calls.set(calls.get() + 1);
        Err(ureq::Error::ConnectionFailed)
    });

    assert!(result.is_err());
    assert_eq!(calls.get(), 2);
}

#[test]
fn stops_retrying_at_the_deadline() {
    let calls = Cell::new(0);
    let started = Instant::now();
    let result = request_with_retry(
        "test",
        3,
        Duration::from_secs(5),
        Some(started + Duration::from_millis(200)),
        || {
            calls.set(calls.get() + 1);
            Err(ureq::Error::StatusCode(503))
        },
    );

    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn passed_deadline_still_makes_one_attempt() {
    let calls = Cell::new(0);
    let result = request_with_retry("test", 3, Duration::ZERO, Some(Instant::now()), || {
        calls.set(calls.get() + 1);
        Err(ureq::Error::ConnectionFailed)
    });

    assert!(result.is_err());
    assert_eq!(calls.get(), 1);
}
