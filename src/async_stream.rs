// A Stream driven by a producer closure, in the style of a generator:
// the closure gets a Sender and the stream yields whatever is sent into
// it, then finishes with the closure's result. Used to stream multistatus
// bodies while they are being generated.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::mpsc;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, Stream, StreamExt};

pub(crate) struct Sender<I>(mpsc::Sender<I>);

impl<I> Sender<I> {
    /// Hand one item to the stream. Completes when the consumer took it.
    pub async fn send(&mut self, item: I) {
        let _ = self.0.send(item).await;
    }
}

pub(crate) struct AsyncStream<I, E> {
    rx: mpsc::Receiver<I>,
    fut: Option<BoxFuture<'static, Result<(), E>>>,
}

impl<I, E> AsyncStream<I, E>
where
    I: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, R>(f: F) -> AsyncStream<I, E>
    where
        F: FnOnce(Sender<I>) -> R,
        R: Future<Output = Result<(), E>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(0);
        AsyncStream {
            rx,
            fut: Some(Box::pin(f(Sender(tx)))),
        }
    }
}

impl<I, E> Stream for AsyncStream<I, E>
where
    I: Send + 'static,
    E: Send + 'static,
{
    type Item = Result<I, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = Pin::into_inner(self);
        loop {
            match this.rx.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(Ok(item))),
                Poll::Ready(None) => {
                    // producer is gone; surface its result.
                    let Some(mut fut) = this.fut.take() else {
                        return Poll::Ready(None);
                    };
                    return match fut.as_mut().poll(cx) {
                        Poll::Ready(Ok(())) => Poll::Ready(None),
                        Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
                        Poll::Pending => {
                            this.fut = Some(fut);
                            Poll::Pending
                        }
                    };
                }
                Poll::Pending => {
                    let Some(fut) = this.fut.as_mut() else {
                        return Poll::Pending;
                    };
                    match fut.as_mut().poll(cx) {
                        // producer finished; loop to drain the channel.
                        Poll::Ready(Ok(())) => {
                            this.fut = None;
                            continue;
                        }
                        Poll::Ready(Err(e)) => {
                            this.fut = None;
                            return Poll::Ready(Some(Err(e)));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
            }
        }
    }
}

impl From<AsyncStream<bytes::Bytes, std::io::Error>> for crate::body::Body {
    fn from(strm: AsyncStream<bytes::Bytes, std::io::Error>) -> Self {
        crate::body::Body::stream(strm)
    }
}
