use bytes::BytesMut;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use tokio::io::AsyncReadExt;

use crate::body::Body;
use crate::fs::{DavFile, FsError};
use crate::{DavError, DavResult};

pub(crate) const READ_BUF_SIZE: usize = 65536;

impl crate::DavHandler {
    pub(crate) async fn handle_get(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let head = req.method() == http::Method::HEAD;

        let file = self.fs.resolve(&path);
        let info = match file.query_info().await {
            Ok(info) => info,
            Err(FsError::NotFound) => return Err(DavError::Status(StatusCode::NOT_FOUND)),
            Err(e) => return Err(DavError::FsError(e)),
        };

        let mut res = Response::new(Body::empty());

        if info.is_dir() {
            let listing = directory_listing(&file, &info.name).await?;
            res.headers_mut().insert(
                "content-type",
                "text/html; charset=utf-8".parse().unwrap(),
            );
            res.headers_mut()
                .typed_insert(headers::ContentLength(listing.len() as u64));
            if !head {
                *res.body_mut() = Body::from(listing);
            }
            return Ok(res);
        }

        if let Some(ref etag) = info.etag {
            res.headers_mut()
                .insert("etag", format!("\"{etag}\"").parse().unwrap());
        }
        let ctype = mime_guess::from_path(&info.name).first_or_octet_stream();
        res.headers_mut()
            .insert("content-type", ctype.as_ref().parse().unwrap());
        res.headers_mut()
            .typed_insert(headers::ContentLength(info.len));

        if head {
            return Ok(res);
        }

        let DavFile::Real(real) = file else {
            return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
        };
        let mut fh = match real.open_read().await {
            Ok(fh) => fh,
            Err(e) => {
                warn!("open for GET failed: {}", e);
                return Err(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR));
            }
        };

        *res.body_mut() = Body::stream(async_stream::try_stream! {
            loop {
                let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
                let n = fh.read_buf(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield buf.freeze();
            }
        });
        Ok(res)
    }
}

// A minimal HTML index: entries sorted by byte-wise name comparison,
// directories suffixed with a slash.
async fn directory_listing(file: &crate::fs::DavFile, name: &str) -> DavResult<String> {
    let children = file.enumerate_children().await.map_err(DavError::FsError)?;

    let mut entries = Vec::new();
    for (name, child) in children {
        let is_dir = match child.query_info().await {
            Ok(info) => info.is_dir(),
            Err(_) => continue,
        };
        let mut entry = htmlescape::encode_minimal(&name);
        if is_dir {
            entry.push('/');
        }
        entries.push(entry);
    }
    entries.sort();

    let title = htmlescape::encode_minimal(name);
    let mut listing = String::from("<html>\r\n");
    listing.push_str(&format!("<head><title>Index of {title}</title></head>\r\n"));
    listing.push_str(&format!("<body><h1>Index of {title}</h1>\r\n<p>\r\n"));
    for entry in &entries {
        listing.push_str(&format!("<a href=\"{entry}\">{entry}</a><br/>\r\n"));
    }
    listing.push_str("</p></body>\r\n</html>\r\n");
    Ok(listing)
}
