use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::conditional::check_if;
use crate::fs::FsError;
use crate::multistatus::MultiStatus;
use crate::{DavError, DavResult};

// per-resource delete failures: missing is 404, everything else 403.
fn delete_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::FORBIDDEN,
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let ifres = check_if(&self.fs, &self.ls, req.headers(), false, &path).await;
        if ifres.status != StatusCode::OK {
            return Err(DavError::Status(ifres.status));
        }

        let file = self.fs.resolve(&path);
        if file.is_virtual() {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        let mut failures = Vec::new();
        match file.delete_recursive(path.as_str(), &mut failures).await {
            Ok(()) => {
                // the target went away; leftover per-child failures (a
                // racing writer, say) become a multistatus.
                if failures.is_empty() {
                    let mut res = Response::new(Body::empty());
                    *res.status_mut() = StatusCode::NO_CONTENT;
                    Ok(res)
                } else {
                    let mut ms = MultiStatus::new(self.base_uri(req));
                    for (p, e) in failures {
                        ms.insert_status(&p, delete_status(e));
                    }
                    let (status, body) = ms.into_response()?;
                    let mut res = Response::new(body);
                    *res.status_mut() = status;
                    res.headers_mut()
                        .insert("content-type", "application/xml".parse().unwrap());
                    Ok(res)
                }
            }
            Err(e) => Err(DavError::Status(delete_status(e))),
        }
    }
}
