use std::time::{Duration, Instant};

use async_runner::utils::timer::{delay, sleep, with_timeout, TimeoutError, MAX_TIMEOUT};
use futures::executor::block_on;
use pretty_assertions::assert_eq;

#[test]
fn with_timeout_returns_ok_for_result() {
    let value = block_on(with_timeout(
        || async {
            sleep(Duration::from_millis(5)).await;
            Ok::<u32, TimeoutError>(7)
        },
        Duration::from_millis(50),
    ));
    assert_eq!(value, Ok(Ok(7)));
}

#[test]
fn with_timeout_flattens_into_caller_error() {
    #[derive(Debug, PartialEq)]
    enum FetchError {
        Timeout(Duration),
    }

    impl From<TimeoutError> for FetchError {
        fn from(e: TimeoutError) -> Self {
            Self::Timeout(e.timeout())
        }
    }

    async fn fetch() -> Result<u32, FetchError> {
        let value = with_timeout(
            || async {
                sleep(Duration::from_millis(50)).await;
                7
            },
            Duration::from_millis(10),
        )
        .await?;
        Ok(value)
    }

    assert_eq!(
        block_on(fetch()),
        Err(FetchError::Timeout(Duration::from_millis(10)))
    );
}

#[test]
fn producer_is_called_once() {
    let mut calls = 0;
    let value = block_on(with_timeout(
        || {
            calls += 1;
            async { "done" }
        },
        MAX_TIMEOUT,
    ));
    assert_eq!(value, Ok("done"));
    assert_eq!(calls, 1);
}

#[test]
fn delay_then_timeout() {
    let start = Instant::now();
    let result = block_on(with_timeout(
        || delay(None),
        Duration::from_millis(20),
    ));
    assert_eq!(result.unwrap_err().to_string(), "Rejected by timeout 20 ms");
    assert!(start.elapsed() >= Duration::from_millis(20));
}
