use crate::error::{MachineError, MachineResult};
use std::future::Future;
use tokio::time::{sleep, Duration, Instant};

/// Call `check` every `interval` until it yields a value. Errors from `check`
/// end the loop right away; running past `timeout` yields `Timeout`.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    what: &str,
    mut check: F,
) -> MachineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MachineResult<Option<T>>>,
{
    let started = Instant::now();
    loop {
        if let Some(done) = check().await? {
            return Ok(done);
        }
        if started.elapsed() >= timeout {
            return Err(MachineError::Timeout {
                what: what.to_string(),
                waited: timeout,
            });
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let mut calls = 0;
        let got = poll_until(Duration::from_millis(10), Duration::from_secs(1), "x", || {
            calls += 1;
            let n = calls;
            async move { Ok(if n >= 3 { Some(n) } else { None }) }
        })
        .await
        .unwrap();
        assert_eq!(got, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let err = poll_until::<(), _, _>(
            Duration::from_millis(100),
            Duration::from_millis(350),
            "volume vol-1 to leave creating",
            || async { Ok(None) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MachineError::Timeout { .. }));
        assert!(err.to_string().contains("vol-1"));
    }
}
