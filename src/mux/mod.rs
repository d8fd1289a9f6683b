//! Byte-stream multiplexer.
//!
//! Frames multiple concurrent TCP sessions over one duplex byte channel
//! (a virtio serial port between guest and host, in the shipped setup).
//! The guest side accepts local TCP connections and muxes them onto the
//! transport; the host side demuxes frames back into per-session TCP
//! connections to the local WebDAV server.
//!
//! Frame format, little-endian, unaligned:
//!
//! ```text
//! client_id: u64 | size: u16 | payload: size bytes
//! ```
//!
//! A frame with `size == 0` means half-close: the receiver drops the
//! session belonging to `client_id`. Transport reads are strictly
//! serialized, and so are the per-client TCP reads: a new read is only
//! issued once the previous payload has been written out on the other
//! side's queue.

pub(crate) mod queue;

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use queue::OutputQueue;

/// Largest payload one frame can carry.
pub const MAX_PAYLOAD: usize = 65535;

const HEADER_LEN: usize = 10;

/// Shared state of one multiplexer endpoint: the live client table and
/// the id counter. Ids are assigned from a plain counter, so they are
/// unique for the lifetime of the process.
#[derive(Clone)]
pub struct MuxContext {
    clients: Arc<Mutex<HashMap<u64, Arc<OutputQueue>>>>,
    next_id: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl MuxContext {
    fn new(cancel: CancellationToken) -> MuxContext {
        MuxContext {
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            cancel,
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn queue_for(&self, id: u64) -> Option<Arc<OutputQueue>> {
        self.clients.lock().get(&id).cloned()
    }

    fn remove(&self, id: u64) {
        debug!("remove client {}", id);
        self.clients.lock().remove(&id);
    }

    /// Number of live client sessions.
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }
}

fn frame_header(id: u64, size: u16) -> (Bytes, Bytes) {
    (
        Bytes::copy_from_slice(&id.to_le_bytes()),
        Bytes::copy_from_slice(&size.to_le_bytes()),
    )
}

// Pump one TCP session onto the transport queue. Reads are paced: the
// next read starts only after the previous payload has been written to
// the transport.
fn spawn_client(ctx: &MuxContext, id: u64, sock: TcpStream, mux_queue: Arc<OutputQueue>) {
    let (mut rd, wr) = sock.into_split();
    let queue = Arc::new(OutputQueue::new(wr, ctx.cancel.clone()));
    ctx.clients.lock().insert(id, queue);

    let ctx = ctx.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_PAYLOAD];
        loop {
            let n = tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                r = rd.read(&mut buf) => match r {
                    Ok(n) => n,
                    Err(e) => {
                        debug!("client {} read error: {}", id, e);
                        ctx.remove(id);
                        break;
                    }
                },
            };
            trace!("client {} read {}", id, n);
            let (hdr_id, hdr_size) = frame_header(id, n as u16);
            let done = mux_queue.push_frame([hdr_id, hdr_size, Bytes::copy_from_slice(&buf[..n])]);
            match done.await {
                Ok(Ok(())) => {}
                _ => {
                    // transport gone; everything is being torn down.
                    ctx.remove(id);
                    break;
                }
            }
            if n == 0 {
                // EOF: the zero-length frame above told the peer.
                ctx.remove(id);
                break;
            }
        }
    });
}

// The single demux read loop. `connect` is set on the host side: frames
// for unknown ids open a new TCP session there.
async fn demux_loop<R>(
    mut rd: R,
    ctx: MuxContext,
    mux_queue: Arc<OutputQueue>,
    connect: Option<SocketAddr>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut payload = vec![0u8; MAX_PAYLOAD];
    loop {
        let mut hdr = [0u8; HEADER_LEN];
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            r = rd.read_exact(&mut hdr) => { r?; }
        }
        let id = u64::from_le_bytes(hdr[..8].try_into().unwrap());
        let size = u16::from_le_bytes(hdr[8..].try_into().unwrap()) as usize;
        rd.read_exact(&mut payload[..size]).await?;

        if size == 0 {
            debug!("peer closed client {}", id);
            ctx.remove(id);
            continue;
        }

        let queue = match ctx.queue_for(id) {
            Some(q) => Some(q),
            None => match connect {
                Some(addr) => match TcpStream::connect(addr).await {
                    Ok(sock) => {
                        debug!("new session {} -> {}", id, addr);
                        spawn_client(&ctx, id, sock, mux_queue.clone());
                        ctx.queue_for(id)
                    }
                    Err(e) => {
                        warn!("connect for client {} failed: {}", id, e);
                        None
                    }
                },
                // guest side: the session is already gone, drop the data.
                None => None,
            },
        };

        if let Some(queue) = queue {
            // hand off before the next transport read.
            let _ = queue.push_notify(Bytes::copy_from_slice(&payload[..size])).await;
        }
    }
}

/// Guest side: accept TCP clients on `listener` and multiplex them over
/// `transport`. Runs until cancelled; a transport read error is fatal
/// and returned to the caller.
pub async fn run_guest<T>(
    transport: T,
    listener: TcpListener,
    cancel: CancellationToken,
) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (rd, wr) = tokio::io::split(transport);
    let ctx = MuxContext::new(cancel.clone());
    let mux_queue = Arc::new(OutputQueue::new(wr, cancel.clone()));

    let accept_ctx = ctx.clone();
    let accept_queue = mux_queue.clone();
    let accept = async move {
        loop {
            let (sock, _) = tokio::select! {
                _ = accept_ctx.cancel.cancelled() => return Ok(()),
                r = listener.accept() => r?,
            };
            debug!("new client");
            let id = accept_ctx.alloc_id();
            spawn_client(&accept_ctx, id, sock, accept_queue.clone());
        }
    };

    let res = tokio::select! {
        r = accept => r,
        r = demux_loop(rd, ctx, mux_queue, None) => r,
    };
    cancel.cancel();
    res
}

/// Host side: demultiplex `transport`, dialing `connect` for every new
/// client id. Runs until cancelled; transport errors are fatal.
pub async fn run_host<T>(
    transport: T,
    connect: SocketAddr,
    cancel: CancellationToken,
) -> io::Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (rd, wr) = tokio::io::split(transport);
    let ctx = MuxContext::new(cancel.clone());
    let mux_queue = Arc::new(OutputQueue::new(wr, cancel.clone()));

    let res = demux_loop(rd, ctx, mux_queue, Some(connect)).await;
    cancel.cancel();
    res
}
