use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure of one external call made during a turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("{call} timed out after {secs}s")]
    Timeout { call: &'static str, secs: u64 },
    #[error("{call} failed: {message}")]
    Failed { call: &'static str, message: String },
}

impl CallError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn call(&self) -> &'static str {
        match self {
            Self::Timeout { call, .. } | Self::Failed { call, .. } => call,
        }
    }
}

/// Awaits `future` for at most `limit`.
pub async fn bounded<T, E, F>(call: &'static str, limit: Duration, future: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(CallError::Failed { call, message: error.to_string() }),
        Err(_) => Err(CallError::Timeout { call, secs: limit.as_secs() }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{bounded, CallError};

    #[tokio::test]
    async fn slow_calls_time_out() {
        let result: Result<(), CallError> = bounded("llm.complete", Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        })
        .await;

        let error = result.expect_err("must time out");
        assert!(error.is_timeout());
        assert_eq!(error.call(), "llm.complete");
    }

    #[tokio::test]
    async fn inner_errors_keep_their_message() {
        let result: Result<(), CallError> =
            bounded("billing.unblock", Duration::from_secs(1), async {
                Err::<(), _>("contract locked".to_owned())
            })
            .await;

        assert_eq!(
            result,
            Err(CallError::Failed { call: "billing.unblock", message: "contract locked".to_owned() })
        );
    }
}
