//! Cancellation helpers for outbound calls made from sessions.
//!
//! A call raced against a fired token is dropped mid-flight, which also
//! abandons any retry loop inside it.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::AppError;

/// Run `fut` unless `token` fires first, in which case `AppError::Cancelled`
pub async fn with_cancel<F, T>(token: &CancellationToken, fut: F) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

/// Sleep that returns early with `AppError::Cancelled`
pub async fn sleep(token: &CancellationToken, duration: Duration) -> Result<(), AppError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(AppError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), AppError> =
            with_cancel(&token, std::future::pending::<Result<(), AppError>>()).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(matches!(
            sleep(&token, Duration::from_secs(3600)).await,
            Err(AppError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_completes_when_not_cancelled() {
        let token = CancellationToken::new();
        let value = with_cancel(&token, async { Ok::<_, AppError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
