use std::error::Error as StdError;
use std::io;

use bytes::buf::Buf;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::Body;
use crate::conditional::check_if;
use crate::fs::DavFile;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let path = self.path(req);

        let ifres = check_if(&self.fs, &self.ls, req.headers(), false, &path).await;
        if ifres.status != StatusCode::OK {
            return Err(DavError::Status(ifres.status));
        }

        // noted, but not honored.
        for hdr in ["if-match", "if-none-match", "expect"] {
            if req.headers().contains_key(hdr) {
                debug!("PUT: ignoring {} header", hdr);
            }
        }

        // only real files can be written.
        let DavFile::Real(real) = self.fs.resolve(&path) else {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        };

        // contents go to a temp file, renamed over the target at the end.
        let mut replace = match real.replace().await {
            Ok(r) => r,
            Err(e) => {
                warn!("PUT: replace failed: {}", e);
                return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };
        let created = !replace.existed;

        pin_utils::pin_mut!(body);
        while let Some(chunk) = body.data().await {
            let mut chunk = match chunk {
                Ok(c) => c,
                Err(_) => {
                    replace.abort().await;
                    return Err(DavError::IoError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "UnexpectedEof",
                    )));
                }
            };
            while chunk.has_remaining() {
                let b = chunk.chunk();
                let n = b.len();
                if let Err(e) = replace.write_chunk(b).await {
                    warn!("PUT: write failed: {}", e);
                    replace.abort().await;
                    return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
                }
                chunk.advance(n);
            }
        }

        if let Err(e) = replace.commit().await {
            warn!("PUT: commit failed: {}", e);
            return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        res.headers_mut()
            .insert("content-length", "0".parse().unwrap());
        Ok(res)
    }
}
