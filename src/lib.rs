//! ## WebDAV server library, virtual directory tree, and multiplexing daemon
//!
//! This crate implements the server side of [`Webdav`] (RFC 4918):
//! HTTP (GET/HEAD/PUT/DELETE) plus the authoring extension methods
//! (PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK), mapped onto a
//! local filesystem subtree. Linux, Windows and macOS can all mount it
//! as a network drive.
//!
//! A `handler` is a piece of code that takes a `http::Request`, processes
//! it, and generates a `http::Response`. The [`DavHandler`] in this
//! library is such a handler, built on the standard `http` / `http_body`
//! types, so it plugs straight into [hyper].
//!
//! On top of the plain-directory case, the [`fs::virtualfs`] module
//! provides an in-memory directory tree: arbitrary real directories can
//! be made to appear at arbitrary URL positions under the server root
//! (sharing `C:\fileA` and `D:\fileB` next to each other, say).
//!
//! The [`mux`] module carries the WebDAV TCP sessions over a single
//! duplex byte channel, for setups where the server sits behind a
//! constrained transport such as a virtio serial port between a VM guest
//! and its host. The two bundled binaries tie it all together:
//!
//! - `chezdav` serves a directory over WebDAV;
//! - `spice-webdavd` is the multiplexing daemon for the serial channel.
//!
//! ## Example
//!
//! Serve `/tmp` read/write on port 4918 with [hyper]:
//!
//! ```no_run
//! use std::convert::Infallible;
//! use chezdav::{DavHandler, Fs};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let addr = ([127, 0, 0, 1], 4918).into();
//!     let dav_server = DavHandler::builder(Fs::local("/tmp", false)).build();
//!
//!     let make_service = hyper::service::make_service_fn(move |_| {
//!         let dav_server = dav_server.clone();
//!         async move {
//!             let func = move |req| {
//!                 let dav_server = dav_server.clone();
//!                 async move { Ok::<_, Infallible>(dav_server.handle(req).await) }
//!             };
//!             Ok::<_, Infallible>(hyper::service::service_fn(func))
//!         }
//!     });
//!
//!     let _ = hyper::Server::bind(&addr).serve(make_service).await;
//! }
//! ```
//!
//! [`Webdav`]: https://tools.ietf.org/html/rfc4918
//! [hyper]: https://hyper.rs/

#[macro_use]
extern crate log;

mod async_stream;
mod conditional;
mod davhandler;
mod davheaders;
mod errors;
mod multistatus;
mod util;
mod xmltree_ext;

pub mod body;
pub mod davpath;
pub mod fs;
pub mod ls;
pub mod mux;

use crate::errors::{DavError, DavResult};

pub use crate::davhandler::{AuthLookup, DavBuilder, DavHandler};
pub use crate::fs::virtualfs::VirtualDir;
pub use crate::fs::Fs;
pub use crate::util::{DavMethod, DavMethodSet};
