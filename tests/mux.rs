//! Multiplexer framing and end-to-end session tests. The transport is a
//! tokio duplex pipe standing in for the serial channel.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use chezdav::mux;

// Read one frame (id, payload) off the transport.
async fn read_frame<R: AsyncReadExt + Unpin>(rd: &mut R) -> (u64, Vec<u8>) {
    let mut hdr = [0u8; 10];
    rd.read_exact(&mut hdr).await.unwrap();
    let id = u64::from_le_bytes(hdr[..8].try_into().unwrap());
    let size = u16::from_le_bytes(hdr[8..].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; size];
    rd.read_exact(&mut payload).await.unwrap();
    (id, payload)
}

fn write_frame(buf: &mut BytesMut, id: u64, payload: &[u8]) {
    buf.put_u64_le(id);
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
}

// An echo server on an ephemeral port.
async fn spawn_echo() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = sock.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn guest_frames_tcp_data() {
    let (transport, mut peer) = tokio::io::duplex(512 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(mux::run_guest(transport, listener, cancel.clone()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello mux").await.unwrap();

    // the kernel may segment the write; collect until it is all there
    let mut collected = Vec::new();
    let mut id = None;
    while collected.len() < 9 {
        let (fid, payload) = read_frame(&mut peer).await;
        assert_eq!(*id.get_or_insert(fid), fid);
        collected.extend_from_slice(&payload);
    }
    assert_eq!(collected, b"hello mux");

    // half-close: the peer is told with a zero-length frame
    client.shutdown().await.unwrap();
    let (id2, payload) = read_frame(&mut peer).await;
    assert_eq!(Some(id2), id);
    assert!(payload.is_empty());

    cancel.cancel();
}

#[tokio::test]
async fn large_writes_split_into_frames() {
    let (transport, mut peer) = tokio::io::duplex(1024 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(mux::run_guest(transport, listener, cancel.clone()));

    let mut client = TcpStream::connect(addr).await.unwrap();
    let data: Vec<u8> = (0..65536u32).map(|i| i as u8).collect();
    let writer = tokio::spawn(async move {
        client.write_all(&data).await.unwrap();
        client
    });

    // 65536 bytes do not fit one frame: at least two, none oversized,
    // byte-for-byte in order.
    let mut collected = Vec::new();
    let mut frames = 0;
    while collected.len() < 65536 {
        let (_, payload) = read_frame(&mut peer).await;
        assert!(payload.len() <= 65535);
        assert!(!payload.is_empty());
        collected.extend_from_slice(&payload);
        frames += 1;
    }
    assert!(frames >= 2);
    let expected: Vec<u8> = (0..65536u32).map(|i| i as u8).collect();
    assert_eq!(collected, expected);

    let _ = writer.await.unwrap();
    cancel.cancel();
}

#[tokio::test]
async fn host_demuxes_to_tcp_sessions() {
    let echo = spawn_echo().await;
    let (transport, mut peer) = tokio::io::duplex(512 * 1024);
    let cancel = CancellationToken::new();
    tokio::spawn(mux::run_host(transport, echo, cancel.clone()));

    // a frame for a fresh id opens a session; the echo comes back as
    // frames with the same id.
    let mut buf = BytesMut::new();
    write_frame(&mut buf, 7, b"ping");
    peer.write_all(&buf).await.unwrap();

    let mut collected = Vec::new();
    while collected.len() < 4 {
        let (id, payload) = read_frame(&mut peer).await;
        assert_eq!(id, 7);
        collected.extend_from_slice(&payload);
    }
    assert_eq!(collected, b"ping");

    // a second interleaved session
    let mut buf = BytesMut::new();
    write_frame(&mut buf, 9, b"other");
    write_frame(&mut buf, 7, b"again");
    peer.write_all(&buf).await.unwrap();

    let mut seen: std::collections::HashMap<u64, Vec<u8>> = std::collections::HashMap::new();
    while seen.get(&7).map(|v| v.len()).unwrap_or(0) < 5
        || seen.get(&9).map(|v| v.len()).unwrap_or(0) < 5
    {
        let (id, payload) = read_frame(&mut peer).await;
        seen.entry(id).or_default().extend_from_slice(&payload);
    }
    assert_eq!(seen[&9], b"other");
    assert_eq!(seen[&7], b"again");

    // zero-length frame closes the session
    let mut buf = BytesMut::new();
    write_frame(&mut buf, 7, b"");
    peer.write_all(&buf).await.unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn max_payload_roundtrips() {
    let echo = spawn_echo().await;
    let (transport, mut peer) = tokio::io::duplex(1024 * 1024);
    let cancel = CancellationToken::new();
    tokio::spawn(mux::run_host(transport, echo, cancel.clone()));

    let payload: Vec<u8> = (0..65535u32).map(|i| (i % 251) as u8).collect();
    let mut buf = BytesMut::new();
    write_frame(&mut buf, 1, &payload);
    peer.write_all(&buf).await.unwrap();

    let mut collected = Vec::new();
    while collected.len() < payload.len() {
        let (id, chunk) = read_frame(&mut peer).await;
        assert_eq!(id, 1);
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, payload);

    cancel.cancel();
}

#[tokio::test]
async fn guest_to_host_end_to_end() {
    let echo = spawn_echo().await;
    let (guest_side, host_side) = tokio::io::duplex(1024 * 1024);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(mux::run_guest(guest_side, listener, cancel.clone()));
    tokio::spawn(mux::run_host(host_side, echo, cancel.clone()));

    // several concurrent sessions, each with its own byte pattern
    let mut tasks = Vec::new();
    for i in 1u8..=4 {
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let data = vec![i; 100_000];
            let (mut rd, mut wr) = client.split();
            let write = async {
                wr.write_all(&data).await.unwrap();
            };
            let read = async {
                let mut back = vec![0u8; data.len()];
                rd.read_exact(&mut back).await.unwrap();
                back
            };
            let (_, back) = tokio::join!(write, read);
            assert!(back.iter().all(|&b| b == i));
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    cancel.cancel();
}
