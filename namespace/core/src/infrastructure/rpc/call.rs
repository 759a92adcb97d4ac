// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cancellable method dispatch.

use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The caller's context was cancelled before the call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("call cancelled")]
pub struct Cancelled;

/// Run `method` under `ctx`.
///
/// Resolves to the method's result, or to `Cancelled` if `ctx` fires first.
/// A context that is already cancelled never starts the method.
pub async fn call<F, T, E>(ctx: &CancellationToken, method: &'static str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Cancelled>,
{
    if ctx.is_cancelled() {
        return Err(Cancelled.into());
    }

    let span = tracing::debug_span!("rpc", method);
    tokio::select! {
        biased;
        _ = ctx.cancelled() => {
            tracing::debug!(method, "Call cancelled");
            Err(Cancelled.into())
        }
        res = fut.instrument(span) => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Cancelled,
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    #[tokio::test]
    async fn test_call_completes() {
        let ctx = CancellationToken::new();
        let res: Result<u32, TestError> = call(&ctx, "test", async { Ok(7) }).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn test_precancelled_call_never_runs() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut ran = false;
        let res: Result<u32, TestError> = call(&ctx, "test", async {
            ran = true;
            Ok(0)
        })
        .await;
        assert_eq!(res, Err(TestError::Cancelled));
        assert!(!ran, "method must not run");
    }

    #[tokio::test]
    async fn test_cancel_during_call() {
        let ctx = CancellationToken::new();
        let trigger = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let res: Result<u32, TestError> = call(&ctx, "test", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(1)
        })
        .await;
        assert_eq!(res, Err(TestError::Cancelled));
    }
}
