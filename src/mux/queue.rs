//! Outbound byte queue with write-then-flush serialization.
//!
//! Buffers are written strictly in push order with at most one write and
//! one flush in flight. A pushed buffer can carry a completion that fires
//! once its write-all has returned (before the flush), which is how the
//! mux loops pace their reads.

use std::io;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

struct Elem {
    buf: Bytes,
    done: Option<oneshot::Sender<io::Result<()>>>,
}

pub(crate) struct OutputQueue {
    // the lock makes multi-buffer pushes atomic with respect to other
    // pushers; the writer task drains in FIFO order.
    tx: Mutex<mpsc::UnboundedSender<Elem>>,
}

impl OutputQueue {
    pub fn new<W>(mut output: W, cancel: CancellationToken) -> OutputQueue
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Elem>();
        tokio::spawn(async move {
            loop {
                let elem = tokio::select! {
                    _ = cancel.cancelled() => break,
                    e = rx.recv() => match e {
                        Some(e) => e,
                        None => break,
                    },
                };
                match output.write_all(&elem.buf).await {
                    Ok(()) => {
                        if let Some(done) = elem.done {
                            let _ = done.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        warn!("write error: {}", e);
                        if let Some(done) = elem.done {
                            let _ = done.send(Err(e));
                        }
                        break;
                    }
                }
                if let Err(e) = output.flush().await {
                    warn!("flush error: {}", e);
                    break;
                }
            }
            // unwritten completions resolve as broken pipe when the
            // queue dies.
            rx.close();
            while let Ok(elem) = rx.try_recv() {
                if let Some(done) = elem.done {
                    let _ = done.send(Err(io::ErrorKind::BrokenPipe.into()));
                }
            }
        });
        OutputQueue { tx: Mutex::new(tx) }
    }

    /// Queue one buffer, fire and forget.
    pub fn push(&self, buf: Bytes) {
        let _ = self.tx.lock().send(Elem { buf, done: None });
    }

    /// Queue one buffer; the receiver resolves after its write-all.
    pub fn push_notify(&self, buf: Bytes) -> oneshot::Receiver<io::Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let _ = self.tx.lock().send(Elem {
            buf,
            done: Some(done_tx),
        });
        done_rx
    }

    /// Queue a whole frame (id, size, payload) without other pushers
    /// interleaving; the receiver resolves after the payload write.
    pub fn push_frame(&self, bufs: [Bytes; 3]) -> oneshot::Receiver<io::Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let tx = self.tx.lock();
        let [id, size, payload] = bufs;
        let _ = tx.send(Elem {
            buf: id,
            done: None,
        });
        let _ = tx.send(Elem {
            buf: size,
            done: None,
        });
        let _ = tx.send(Elem {
            buf: payload,
            done: Some(done_tx),
        });
        done_rx
    }
}
