//! Cancellation context: an external cancel signal plus an optional deadline.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;

/// Passed down every call that may block on the network. Cloning shares the same
/// signal; [`Ctx::with_timeout`] derives a child that can be cancelled on its own.
#[derive(Debug, Clone)]
pub struct Ctx {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Ctx {
    /// Root context: no deadline, cancelled only by an explicit [`Ctx::cancel`].
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Child context that also expires after `timeout`. The earlier of the parent's
    /// deadline and `now + timeout` wins; cancelling the parent cancels the child.
    /// A timeout too large to represent adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(parent), Some(ours)) => Some(parent.min(ours)),
            (parent, None) => parent,
            (None, ours) => ours,
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolves when the context ends, with the reason.
    pub async fn done(&self) -> FetchError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => FetchError::Cancelled,
                () = tokio::time::sleep_until(deadline) => FetchError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                FetchError::Cancelled
            }
        }
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ends_within(ctx: &Ctx, limit: Duration) -> Option<FetchError> {
        tokio::time::timeout(limit, ctx.done()).await.ok()
    }

    #[tokio::test]
    async fn deadline_fires() {
        let ctx = Ctx::background().with_timeout(Duration::from_millis(5));
        assert!(matches!(ctx.done().await, FetchError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = Ctx::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        assert!(ends_within(&child, Duration::from_millis(10)).await.is_none());
        parent.cancel();
        assert!(matches!(child.done().await, FetchError::Cancelled));
    }

    #[tokio::test]
    async fn child_cancel_leaves_parent() {
        let parent = Ctx::background();
        let child = parent.with_timeout(Duration::from_secs(60));
        child.cancel();
        assert!(matches!(child.done().await, FetchError::Cancelled));
        assert!(ends_within(&parent, Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn earlier_parent_deadline_wins() {
        let parent = Ctx::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert!(matches!(
            ends_within(&child, Duration::from_secs(5)).await,
            Some(FetchError::DeadlineExceeded)
        ));
    }

    #[tokio::test]
    async fn unrepresentable_timeout_keeps_parent_deadline() {
        let unbounded = Ctx::background().with_timeout(Duration::MAX);
        assert!(ends_within(&unbounded, Duration::from_millis(10)).await.is_none());
        let unbounded = Ctx::background().with_timeout(Duration::from_secs(u64::MAX));
        assert!(ends_within(&unbounded, Duration::from_millis(10)).await.is_none());

        let parent = Ctx::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::MAX);
        assert!(matches!(
            ends_within(&child, Duration::from_secs(5)).await,
            Some(FetchError::DeadlineExceeded)
        ));
    }
}
