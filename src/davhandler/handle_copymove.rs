use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::check_if;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::fs::{localfs, DavFile, FsError};
use crate::util::DavMethod;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let is_copy = method == DavMethod::Copy;

        // the Destination header names the target, as a full URI or an
        // absolute path.
        let Some(davheaders::Destination(dest)) = req.headers().typed_get() else {
            return Err(DavError::Status(StatusCode::NOT_FOUND));
        };
        let dest = if dest.starts_with('/') {
            dest
        } else {
            match url::Url::parse(&dest) {
                Ok(u) => u.path().to_string(),
                Err(_) => return Err(DavError::Status(StatusCode::BAD_REQUEST)),
            }
        };
        let dest_path = DavPath::from_str_and_prefix(&dest, &self.prefix)?;

        // a COPY source may be locked by someone else; the destination
        // may not.
        let ifres = check_if(&self.fs, &self.ls, req.headers(), is_copy, &path).await;
        if ifres.status != StatusCode::OK {
            return Err(DavError::Status(ifres.status));
        }
        if self.ls.has_other_locks(dest_path.as_str(), &ifres.submitted) {
            return Err(DavError::Status(StatusCode::LOCKED));
        }

        let depth_infinity = match req.headers().typed_get::<davheaders::Depth>() {
            Some(davheaders::Depth::Infinity) | None => true,
            Some(davheaders::Depth::Zero) => false,
            Some(davheaders::Depth::One) => {
                return Err(DavError::Status(StatusCode::BAD_REQUEST))
            }
        };
        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .map(|o| o.0)
            .unwrap_or(true);

        // virtual directories cannot be moved or copied, nor be targets.
        let (DavFile::Real(src), DavFile::Real(dst)) =
            (self.fs.resolve(&path), self.fs.resolve(&dest_path))
        else {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        };

        match localfs::move_copy(&src, &dst, is_copy, overwrite, depth_infinity).await {
            Ok(dest_existed) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = if dest_existed {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::CREATED
                };
                Ok(res)
            }
            Err(FsError::Exists) => Err(DavError::Status(StatusCode::PRECONDITION_FAILED)),
            Err(FsError::NotFound) => Err(DavError::Status(StatusCode::CONFLICT)),
            Err(e) => Err(DavError::FsError(e)),
        }
    }
}
