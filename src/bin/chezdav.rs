//! chezdav - simple WebDAV server.
//!
//! Serves a directory tree over WebDAV, optionally read-only and behind
//! HTTP Digest credentials from an htdigest file.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::Parser;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use chezdav::{DavHandler, Fs};

#[derive(Parser)]
#[command(name = "chezdav", version, about = "- simple WebDAV server")]
struct Args {
    /// Be verbose
    #[arg(short, long)]
    verbose: bool,

    /// Port to listen to
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Listen on loopback only
    #[arg(long, conflicts_with = "public")]
    local: bool,

    /// Listen on all interfaces (the default)
    #[arg(long)]
    public: bool,

    /// Path to export
    #[arg(short = 'P', long)]
    path: Option<PathBuf>,

    /// Path to htdigest file
    #[arg(short = 'd', long)]
    htdigest: Option<PathBuf>,

    /// DIGEST realm
    #[arg(long)]
    realm: Option<String>,

    /// Read-only access
    #[arg(short, long)]
    readonly: bool,

    /// Skip mDNS service announcement
    #[arg(long)]
    no_mdns: bool,
}

fn my_error(msg: String) -> ! {
    eprintln!("chezdav: {msg}");
    exit(1);
}

// "user:realm:ha1" lines; returns the ha1 for the given user.
fn htdigest_lookup(contents: &str, username: &str) -> Option<String> {
    for line in contents.lines() {
        let mut fields = line.splitn(3, ':');
        match (fields.next(), fields.next(), fields.next()) {
            (Some(user), Some(_realm), Some(ha1)) => {
                if user == username {
                    return Some(ha1.to_string());
                }
            }
            _ => warn!("malformed htdigest line"),
        }
    }
    None
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => my_error(format!("runtime setup failed: {e}")),
    };
    rt.block_on(run(args));
}

async fn run(args: Args) {
    let path = args
        .path
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| my_error("no path given and no home directory".to_string()));

    let mut builder = DavHandler::builder(Fs::local(&path, args.public)).read_only(args.readonly);

    if let Some(ref htdigest) = args.htdigest {
        let contents = match std::fs::read_to_string(htdigest) {
            Ok(c) => c,
            Err(e) => my_error(format!("failed to open htdigest: {e}")),
        };
        let _realm = args
            .realm
            .unwrap_or_else(|| format!("{}'s public share", whoami()));
        builder = builder.digest_auth(Arc::new(move |user| htdigest_lookup(&contents, user)));
    }

    if args.no_mdns {
        debug!("mDNS announcement disabled");
    }

    let dav_server = builder.build();

    let ip = if args.local {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    let addr = SocketAddr::new(ip, args.port);

    let make_service = hyper::service::make_service_fn(move |_| {
        let dav_server = dav_server.clone();
        async move {
            let func = move |req| {
                let dav_server = dav_server.clone();
                async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
            };
            Ok::<_, Infallible>(hyper::service::service_fn(func))
        }
    });

    let server = match hyper::Server::try_bind(&addr) {
        Ok(b) => b,
        Err(e) => my_error(format!("listen failed: {e}")),
    };

    info!("serving {} on {}", path.display(), addr);

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, leaving");
        signal.cancel();
    });

    let res = server
        .serve(make_service)
        .with_graceful_shutdown(cancel.cancelled())
        .await;
    if let Err(e) = res {
        my_error(format!("server error: {e}"));
    }

    info!("Bye");
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "nobody".to_string())
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
