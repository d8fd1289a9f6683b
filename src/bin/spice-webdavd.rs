//! spice-webdavd - WebDAV session multiplexing daemon.
//!
//! Listens on a local TCP port for incoming clients, multiplexes their
//! input into the virtio serial channel, and demultiplexes the channel
//! back to the respective clients. Exits 0 on SIGTERM/SIGINT and 1 on a
//! fatal startup or transport error.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::exit;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use chezdav::mux;

#[cfg(unix)]
const MUX_PATH: &str = "/dev/virtio-ports/org.spice-space.webdav.0";
#[cfg(windows)]
const MUX_PATH: &str = "\\\\.\\Global\\org.spice-space.webdav.0";

#[derive(Parser)]
#[command(name = "spice-webdavd", version, about = "WebDAV multiplexing daemon")]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: u16,

    /// Don't run as a service (Windows)
    #[arg(long)]
    no_service: bool,
}

fn fatal(msg: String) -> ! {
    eprintln!("spice-webdavd: {msg}");
    exit(1);
}

fn main() {
    let args = Args::parse();
    env_logger::init();

    if args.port == 0 {
        fatal("please specify a valid port".to_string());
    }

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => fatal(format!("runtime setup failed: {e}")),
    };
    rt.block_on(run(args));
}

async fn run(args: Args) {
    let transport = match tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(MUX_PATH)
        .await
    {
        Ok(f) => f,
        Err(e) => fatal(format!("{MUX_PATH}: {e}")),
    };

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), args.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => fatal(format!("listen on {addr} failed: {e}")),
    };

    info!("multiplexing {} on {}", MUX_PATH, addr);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, leaving");
        signal.cancel();
    });

    let was_cancelled = cancel.clone();
    match mux::run_guest(transport, listener, cancel).await {
        Ok(()) => {}
        Err(e) if was_cancelled.is_cancelled() => {
            // teardown races the in-flight reads; not an error.
            log::debug!("shutdown: {e}");
        }
        Err(e) => fatal(format!("transport error: {e}")),
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return std::future::pending().await,
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
