use headers::HeaderMapExt;
use http::{Request, Response};

use crate::body::Body;
use crate::DavResult;

const ALLOW: &str = "GET, HEAD, PUT, PROPFIND, PROPPATCH, MKCOL, DELETE, MOVE, COPY, LOCK, UNLOCK";

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, _req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());
        let h = res.headers_mut();

        h.insert("DAV", "1,2".parse().unwrap());
        // expected by the Windows mini-redirector.
        h.insert("MS-Author-Via", "DAV".parse().unwrap());
        h.insert("Allow", ALLOW.parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        Ok(res)
    }
}
