//! Forward-only, cancellable stream of reply fragments

use futures::stream::{FusedStream, Stream};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::base::{ProviderError, ProviderResult};

/// Text fragments of a streamed reply.
///
/// The stream is finite and cannot be replayed: after it yields `None` or
/// an error it stays terminated. Cancelling its token makes the next poll
/// yield `ProviderError::Cancelled`.
pub struct FragmentStream {
    inner: Pin<Box<dyn Stream<Item = ProviderResult<String>> + Send>>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    done: bool,
}

impl FragmentStream {
    pub fn new<S>(inner: S, cancel: CancellationToken) -> Self
    where
        S: Stream<Item = ProviderResult<String>> + Send + 'static,
    {
        Self {
            inner: Box::pin(inner),
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            done: false,
        }
    }

    /// A stream over already known fragments
    pub fn from_fragments(fragments: Vec<String>, cancel: CancellationToken) -> Self {
        Self::new(futures::stream::iter(fragments.into_iter().map(Ok)), cancel)
    }

    /// Token that aborts this stream when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for FragmentStream {
    type Item = ProviderResult<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(Some(Err(ProviderError::Cancelled)));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

impl FusedStream for FragmentStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream")
            .field("done", &self.done)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_yields_fragments_then_stays_terminated() {
        let mut stream = FragmentStream::from_fragments(
            vec!["a".to_string(), "b".to_string()],
            CancellationToken::new(),
        );

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
        assert!(stream.next().await.is_none());
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_error_terminates_stream() {
        let items = vec![
            Ok("a".to_string()),
            Err(ProviderError::InvalidResponse("boom".to_string())),
            Ok("never".to_string()),
        ];
        let mut stream = FragmentStream::new(futures::stream::iter(items), CancellationToken::new());

        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(ProviderError::InvalidResponse(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_poll() {
        let token = CancellationToken::new();
        let mut stream = FragmentStream::from_fragments(vec!["a".to_string()], token.clone());
        token.cancel();

        assert!(matches!(stream.next().await, Some(Err(ProviderError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_stream() {
        let token = CancellationToken::new();
        let mut stream = FragmentStream::new(
            futures::stream::pending::<ProviderResult<String>>(),
            token.clone(),
        );

        let canceller = stream.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let item = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("cancellation should wake the stream");
        assert!(matches!(item, Some(Err(ProviderError::Cancelled))));
        assert!(token.is_cancelled());
    }
}
