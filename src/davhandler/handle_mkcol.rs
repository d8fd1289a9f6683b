use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::check_if;
use crate::fs::FsError;
use crate::{DavError, DavResult};

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        // check the If header; this also refuses targets locked by
        // someone else.
        let ifres = check_if(&self.fs, &self.ls, req.headers(), false, &path).await;
        if ifres.status != StatusCode::OK {
            return Err(DavError::Status(ifres.status));
        }

        match self.fs.resolve(&path).make_directory().await {
            // RFC 4918 9.3.1 MKCOL Status Codes.
            Err(FsError::Exists) => Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED)),
            Err(FsError::NotFound) => Err(DavError::Status(StatusCode::CONFLICT)),
            Err(e) => Err(DavError::FsError(e)),
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::CREATED;
                Ok(res)
            }
        }
    }
}
