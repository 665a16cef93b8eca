//! Cooperative cancellation of long-running operations
//!
//! A canceller is created on its own and then passed to as many operations
//! as the caller wants. Cancelling is sticky: an operation started with an
//! already cancelled canceller fails right away.

use crate::handle::{borrow_from_handle, register_handle, release_handle_of_kind, Handle, HandleItem, HandleKind};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("No operation is bound to this canceller")]
    NotBound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

crate::handle::impl_from_handle_error!(NotBound: CancelError);

/// Errors able to report that their operation was cancelled
pub trait Cancellable {
    fn cancelled() -> Self;
}

#[derive(Debug)]
pub(crate) struct Canceller {
    cancelled: watch::Sender<bool>,
    /// Operations currently running with this canceller
    bound: AtomicUsize,
}

impl Canceller {
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            cancelled,
            bound: AtomicUsize::new(0),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire) > 0
    }

    pub async fn wait_cancelled(&self) {
        let mut cancelled_rx = self.cancelled.subscribe();
        loop {
            if *cancelled_rx.borrow_and_update() {
                return;
            }
            if cancelled_rx.changed().await.is_err() {
                // The sender lives as long as `self`
                std::future::pending::<()>().await;
            }
        }
    }

    fn bind(&self) -> BoundGuard<'_> {
        self.bound.fetch_add(1, Ordering::AcqRel);
        BoundGuard { canceller: self }
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

struct BoundGuard<'a> {
    canceller: &'a Canceller,
}

impl Drop for BoundGuard<'_> {
    fn drop(&mut self) {
        self.canceller.bound.fetch_sub(1, Ordering::AcqRel);
    }
}

pub fn new_canceller() -> Handle {
    register_handle(HandleItem::Canceller(Arc::new(Canceller::new())))
}

/// Cancel every operation bound to `canceller`, now and in the future
///
/// Fails with `NotBound` when no operation is running with it, the
/// cancellation is still recorded.
pub fn cancel(canceller: Handle) -> Result<(), CancelError> {
    let canceller = get_canceller(canceller)?;
    canceller.cancel();
    if canceller.is_bound() {
        tracing::debug!("Operation cancelled");
        Ok(())
    } else {
        Err(CancelError::NotBound)
    }
}

/// Forget a canceller, operations still bound to it keep observing it
pub fn release_canceller(canceller: Handle) -> Result<(), CancelError> {
    release_handle_of_kind(canceller, HandleKind::Canceller)?;
    Ok(())
}

pub(crate) fn get_canceller(canceller: Handle) -> Result<Arc<Canceller>, crate::handle::HandleError> {
    borrow_from_handle(canceller, HandleKind::Canceller, |item| match item {
        HandleItem::Canceller(canceller) => Some(canceller.clone()),
        _ => None,
    })
}

/// Run `fut` until it completes or either canceller fires
///
/// `fut` is dropped at its current suspension point when cancelled.
pub(crate) async fn run_cancellable<T, E, Fut>(canceller: &Canceller, abort: Option<&Canceller>, fut: Fut) -> Result<T, E>
where
    E: Cancellable,
    Fut: Future<Output = Result<T, E>>,
{
    let _bound = canceller.bind();
    if canceller.is_cancelled() || abort.is_some_and(Canceller::is_cancelled) {
        return Err(E::cancelled());
    }
    let aborted = async {
        match abort {
            Some(abort) => abort.wait_cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        () = canceller.wait_cancelled() => Err(E::cancelled()),
        () = aborted => Err(E::cancelled()),
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum OpError {
        Cancelled,
        BadHandle,
    }

    impl Cancellable for OpError {
        fn cancelled() -> Self {
            Self::Cancelled
        }
    }

    impl From<crate::handle::HandleError> for OpError {
        fn from(_: crate::handle::HandleError) -> Self {
            Self::BadHandle
        }
    }

    async fn with_canceller<T>(
        canceller: Handle,
        fut: impl Future<Output = Result<T, OpError>>,
    ) -> Result<T, OpError> {
        let canceller = get_canceller(canceller)?;
        run_cancellable(&canceller, None, fut).await
    }

    #[tokio::test]
    async fn test_cancel_before_operation_is_not_lost() {
        let canceller = new_canceller();
        assert_matches!(cancel(canceller), Err(CancelError::NotBound));

        let res: Result<(), OpError> = with_canceller(canceller, async { Ok(()) }).await;
        assert_eq!(res, Err(OpError::Cancelled));
        assert!(release_canceller(canceller).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_operation() {
        let canceller = new_canceller();
        let op = tokio::spawn(with_canceller(canceller, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, OpError>(42)
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_matches!(cancel(canceller), Ok(()));
        assert_matches!(op.await, Ok(Err(OpError::Cancelled)));
        // Nothing is bound anymore
        assert_matches!(cancel(canceller), Err(CancelError::NotBound));
        assert!(release_canceller(canceller).is_ok());
    }

    #[tokio::test]
    async fn test_completed_operation_is_not_affected() {
        let canceller = new_canceller();
        let res: Result<u32, OpError> = with_canceller(canceller, async { Ok(1) }).await;
        assert_eq!(res, Ok(1));
        assert!(release_canceller(canceller).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_canceller() {
        let canceller = new_canceller();
        assert!(release_canceller(canceller).is_ok());

        assert_matches!(cancel(canceller), Err(CancelError::NotBound));
        let res: Result<(), OpError> = with_canceller(canceller, async { Ok(()) }).await;
        assert_eq!(res, Err(OpError::BadHandle));
    }
}
