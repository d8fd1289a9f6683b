//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::buf::Buf;
use futures_util::stream::Stream;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::Fs;
use crate::ls::LockManager;
use crate::util::{dav_method, DavMethod, DavMethodSet};
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_get;
pub mod handle_lock;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// the most a non-streaming request body may carry.
const MAX_BODY_SIZE: usize = 65536;

/// Looks up the HA1 digest hash for a username. The handler only carries
/// this hook; HTTP Digest bookkeeping itself lives with the server
/// front-end.
pub type AuthLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling requests.
    prefix: String,
    /// Filesystem to serve.
    fs: Fs,
    /// Set of allowed methods (defaults to all methods).
    allow: DavMethodSet,
    /// Refuse every mutating method up front.
    read_only: bool,
    /// Digest credential lookup, queried by username.
    auth: Option<AuthLookup>,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(fs: Fs) -> DavBuilder {
        Self {
            prefix: String::new(),
            fs,
            allow: DavMethodSet::WEBDAV_RW,
            read_only: false,
            auth: None,
        }
    }

    /// Build the handler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix to be stripped off before translating the rest of
    /// the request path to a filesystem path.
    pub fn strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(mut self, allow: DavMethodSet) -> Self {
        self.allow = allow;
        self
    }

    /// Serve read-only: `PROPPATCH, MKCOL, DELETE, MOVE, COPY, LOCK`
    /// answer `403 Forbidden` before any other work, and `PUT` is
    /// removed from the allowed method set.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        if read_only {
            self.allow &= !DavMethodSet::PUT;
        }
        self
    }

    /// Install the digest credential lookup callback.
    pub fn digest_auth(mut self, auth: AuthLookup) -> Self {
        self.auth = Some(auth);
        self
    }
}

/// The webdav handler.
///
/// Cheap to clone; handed a `http::Request`, it produces the
/// `http::Response` for any WebDAV class 1/2 method.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) fs: Fs,
    pub(crate) ls: LockManager,
    pub(crate) allow: DavMethodSet,
    pub(crate) read_only: bool,
    auth: Option<AuthLookup>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        Self {
            prefix: Arc::new(cfg.prefix),
            fs: cfg.fs,
            ls: LockManager::new(),
            allow: cfg.allow,
            read_only: cfg.read_only,
            auth: cfg.auth,
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(fs: Fs) -> DavBuilder {
        DavBuilder::new(fs)
    }

    /// The digest credential hook, queried by username.
    pub fn ha1_for_user(&self, username: &str) -> Option<String> {
        self.auth.as_ref().and_then(|f| f(username))
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a request whose body is a `Stream` instead of an
    /// `http_body::Body`.
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavPath {
        // This never fails (has been checked before)
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix).unwrap()
    }

    // scheme+authority (plus the stripped prefix) to prepend to
    // multistatus hrefs.
    pub(crate) fn base_uri(&self, req: &Request<()>) -> Option<String> {
        let host = req.headers().get("host").and_then(|h| h.to_str().ok());
        match (host, self.prefix.is_empty()) {
            (Some(h), _) => Some(format!("http://{}{}", h, self.prefix)),
            (None, false) => Some(self.prefix.to_string()),
            (None, true) => None,
        }
    }

    // drain the request body into memory.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut resp = match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                let mut resp = Response::builder()
                    .header("Content-Length", "0")
                    .status(err.statuscode());
                if err.must_close() {
                    resp = resp.header("connection", "close");
                }
                resp.body(Body::empty()).unwrap()
            }
        };
        // every reply defaults to an XML content type.
        if !resp.headers().contains_key("content-type") {
            resp.headers_mut().insert(
                "content-type",
                "text/xml; charset=utf-8".parse().unwrap(),
            );
        }
        resp
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // debug when running the webdav litmus tests.
        if let Some(t) = req.headers().get("x-litmus").and_then(|v| v.to_str().ok()) {
            debug!("X-Litmus: {}", t);
        }

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if the method is allowed.
        if !self.allow.contains_method(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // in read-only mode mutating methods are refused before any
        // other work.
        if self.read_only && DavMethodSet::WEBDAV_WRITE.contains_method(method) {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        // make sure the request path is valid.
        let path = DavPath::from_uri_and_prefix(req.uri(), &self.prefix)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expect no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = match method {
            DavMethod::Put => (Some(body), Vec::new()),
            _ => (None, self.read_request(body, MAX_BODY_SIZE).await?),
        };

        // not all methods accept a body.
        if !DavMethodSet::WEBDAV_BODY.contains_method(method) && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match method {
            DavMethod::Options => self.handle_options(&req).await,
            DavMethod::PropFind => self.handle_propfind(&req, &body_data).await,
            DavMethod::PropPatch => self.handle_proppatch(&req, &body_data).await,
            DavMethod::MkCol => self.handle_mkcol(&req).await,
            DavMethod::Delete => self.handle_delete(&req).await,
            DavMethod::Lock => self.handle_lock(&req, &body_data).await,
            DavMethod::Unlock => self.handle_unlock(&req).await,
            DavMethod::Head | DavMethod::Get => self.handle_get(&req).await,
            DavMethod::Copy | DavMethod::Move => self.handle_copymove(&req, method).await,
            DavMethod::Put => self.handle_put(&req, body_strm.unwrap()).await,
        }
    }
}
