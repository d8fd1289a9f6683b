//! End-to-end handler tests: requests go in as plain `http::Request`
//! values, no network involved.

use futures_util::StreamExt;
use http::{Response, StatusCode};

use chezdav::body::Body;
use chezdav::{DavHandler, Fs};

struct TestServer {
    handler: DavHandler,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn new() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let handler = DavHandler::builder(Fs::local(dir.path(), false)).build();
        TestServer { handler, _dir: dir }
    }

    fn read_only() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let handler = DavHandler::builder(Fs::local(dir.path(), false))
            .read_only(true)
            .build();
        TestServer { handler, _dir: dir }
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Response<Body> {
        let mut builder = http::Request::builder().method(method).uri(path);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let req = builder.body(Body::from(body.to_vec())).unwrap();
        self.handler.handle(req).await
    }
}

async fn body_string(res: Response<Body>) -> String {
    let mut body = res.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8(out).unwrap()
}

fn lock_token(res: &Response<Body>) -> String {
    let raw = res.headers()["lock-token"].to_str().unwrap();
    raw.trim_matches(|c| c == '<' || c == '>').to_string()
}

const LOCKINFO_EXCLUSIVE: &[u8] = br#"<?xml version="1.0" encoding="utf-8"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
  <D:owner>me</D:owner>
</D:lockinfo>"#;

#[tokio::test]
async fn put_then_get_roundtrip() {
    let srv = TestServer::new();

    let res = srv.request("PUT", "/a.txt", &[], b"hello").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = srv.request("GET", "/a.txt", &[], b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().contains_key("etag"));
    assert_eq!(body_string(res).await, "hello");

    // replacing reports 200, not 201
    let res = srv.request("PUT", "/a.txt", &[], b"world").await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv.request("GET", "/a.txt", &[], b"").await;
    assert_eq!(body_string(res).await, "world");
}

#[tokio::test]
async fn get_missing_is_404() {
    let srv = TestServer::new();
    let res = srv.request("GET", "/nope", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_directory_lists_children_sorted() {
    let srv = TestServer::new();
    srv.request("PUT", "/zz.txt", &[], b"z").await;
    srv.request("PUT", "/aa.txt", &[], b"a").await;
    srv.request("MKCOL", "/sub", &[], b"").await;

    let res = srv.request("GET", "/", &[], b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["content-type"],
        "text/html; charset=utf-8"
    );
    let body = body_string(res).await;
    let aa = body.find("aa.txt").unwrap();
    let sub = body.find("sub/").unwrap();
    let zz = body.find("zz.txt").unwrap();
    assert!(aa < sub && sub < zz);
}

#[tokio::test]
async fn mkcol_status_codes() {
    let srv = TestServer::new();

    let res = srv.request("MKCOL", "/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // existing target
    let res = srv.request("MKCOL", "/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    // missing parent
    let res = srv.request("MKCOL", "/d/e/f", &[], b"").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // a request body is not acceptable
    let res = srv.request("MKCOL", "/g", &[], b"<foo/>").await;
    assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let res = srv
        .request("PROPFIND", "/", &[("Depth", "1")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_string(res).await;
    assert!(body.contains("<D:href>/d</D:href>"));
}

#[tokio::test]
async fn propfind_depth_zero_returns_one_response() {
    let srv = TestServer::new();
    srv.request("MKCOL", "/d", &[], b"").await;
    let res = srv
        .request("PROPFIND", "/d", &[("Depth", "0")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_string(res).await;
    assert_eq!(body.matches("<D:response>").count(), 1);
    assert!(body.contains("<D:href>/d</D:href>"));
    assert!(body.contains("<D:collection"));
}

#[tokio::test]
async fn propfind_infinity_is_refused() {
    let srv = TestServer::new();
    let res = srv
        .request("PROPFIND", "/", &[("Depth", "infinity")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_string(res).await.contains("propfind-finite-depth"));

    // no Depth header means infinity
    let res = srv.request("PROPFIND", "/", &[], b"").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn propfind_empty_body_is_allprop() {
    let srv = TestServer::new();
    srv.request("PUT", "/f.txt", &[], b"hello").await;
    let res = srv
        .request("PROPFIND", "/f.txt", &[("Depth", "0")], b"")
        .await;
    let body = body_string(res).await;
    assert!(body.contains("<D:getcontentlength>5</D:getcontentlength>"));
    assert!(body.contains("<D:resourcetype>"));
    assert!(body.contains("<D:supportedlock>"));
    assert!(body.contains("executable"));
}

#[tokio::test]
async fn propfind_named_props() {
    let srv = TestServer::new();
    srv.request("PUT", "/f.txt", &[], b"hello").await;
    let req = br#"<?xml version="1.0"?>
<D:propfind xmlns:D="DAV:">
  <D:prop><D:getcontentlength/><D:getetag/><D:nosuchprop/></D:prop>
</D:propfind>"#;
    let res = srv
        .request("PROPFIND", "/f.txt", &[("Depth", "0")], req)
        .await;
    let body = body_string(res).await;
    assert!(body.contains("<D:getcontentlength>5</D:getcontentlength>"));
    assert!(body.contains("<D:getetag>\""));
    // the unknown property comes back empty under a 404 propstat
    assert!(body.contains("HTTP/1.1 404 Not Found"));
    assert!(body.contains("nosuchprop"));
}

#[tokio::test]
async fn lock_unlock_lifecycle() {
    let srv = TestServer::new();

    // locking a missing file creates it
    let res = srv
        .request(
            "LOCK",
            "/x",
            &[("Timeout", "Second-60")],
            LOCKINFO_EXCLUSIVE,
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let token = lock_token(&res);
    assert_eq!(token.len(), 45);
    assert!(token.starts_with("urn:uuid:"));
    let body = body_string(res).await;
    assert!(body.contains("<D:lockdiscovery>"));
    assert!(body.contains("<D:exclusive"));
    assert!(body.contains("me"));
    assert!(body.contains("Second-"));

    // writes without the token are refused
    let res = srv.request("PUT", "/x", &[], b"data").await;
    assert_eq!(res.status(), StatusCode::LOCKED);

    // with the token they go through
    let ifhdr = format!("(<{token}>)");
    let res = srv
        .request("PUT", "/x", &[("If", &ifhdr)], b"data")
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // refresh: empty body, If: (<token>)
    let res = srv
        .request(
            "LOCK",
            "/x",
            &[("If", &ifhdr), ("Timeout", "Second-120")],
            b"",
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_string(res).await.contains("<D:activelock>"));

    let lt = format!("<{token}>");
    let res = srv
        .request("UNLOCK", "/x", &[("Lock-Token", &lt)], b"")
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // a second unlock conflicts
    let res = srv
        .request("UNLOCK", "/x", &[("Lock-Token", &lt)], b"")
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn lock_depth_one_is_bad_request() {
    let srv = TestServer::new();
    let res = srv
        .request("LOCK", "/x", &[("Depth", "1")], LOCKINFO_EXCLUSIVE)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unlock_without_token_is_bad_request() {
    let srv = TestServer::new();
    let res = srv.request("UNLOCK", "/x", &[], b"").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = srv
        .request("UNLOCK", "/x", &[("Lock-Token", "garbage")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn exclusive_lock_excludes_all_writes() {
    let srv = TestServer::new();
    srv.request("MKCOL", "/a", &[], b"").await;
    srv.request("PUT", "/out.txt", &[], b"x").await;

    let res = srv.request("LOCK", "/a", &[], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(res.status(), StatusCode::OK);
    let token = lock_token(&res);

    // every write method under /a is refused without the token
    let res = srv.request("PUT", "/a/f.txt", &[], b"data").await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = srv.request("MKCOL", "/a/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = srv.request("DELETE", "/a", &[], b"").await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = srv
        .request(
            "PROPPATCH",
            "/a",
            &[],
            br#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:"><D:set><D:prop><x>1</x></D:prop></D:set></D:propertyupdate>"#,
        )
        .await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    // the destination is locked, even though the COPY source is fine
    let res = srv
        .request("COPY", "/out.txt", &[("Destination", "/a/c.txt")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::LOCKED);

    // with the token bound to the lock root, the write goes through
    let ifhdr = format!("</a> (<{token}>)");
    let res = srv
        .request("PUT", "/a/f.txt", &[("If", &ifhdr)], b"data")
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn shared_locks_coexist() {
    let srv = TestServer::new();
    let shared = br#"<?xml version="1.0"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:shared/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;

    let res = srv.request("LOCK", "/s", &[], shared).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.request("LOCK", "/s", &[], shared).await;
    assert_eq!(res.status(), StatusCode::OK);
    // but an exclusive lock is refused now
    let res = srv.request("LOCK", "/s", &[], LOCKINFO_EXCLUSIVE).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn copy_overwrite_semantics() {
    let srv = TestServer::new();
    srv.request("PUT", "/a.txt", &[], b"hello").await;

    let res = srv
        .request(
            "COPY",
            "/a.txt",
            &[("Destination", "/b.txt"), ("Overwrite", "F")],
            b"",
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // repeating with Overwrite: F fails and does not touch /b.txt
    srv.request("PUT", "/a.txt", &[], b"changed").await;
    let res = srv
        .request(
            "COPY",
            "/a.txt",
            &[("Destination", "/b.txt"), ("Overwrite", "F")],
            b"",
        )
        .await;
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);
    let res = srv.request("GET", "/b.txt", &[], b"").await;
    assert_eq!(body_string(res).await, "hello");

    let res = srv
        .request(
            "COPY",
            "/a.txt",
            &[("Destination", "/b.txt"), ("Overwrite", "T")],
            b"",
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = srv.request("GET", "/b.txt", &[], b"").await;
    assert_eq!(body_string(res).await, "changed");
}

#[tokio::test]
async fn copy_full_destination_uri() {
    let srv = TestServer::new();
    srv.request("PUT", "/a.txt", &[], b"x").await;
    let res = srv
        .request(
            "COPY",
            "/a.txt",
            &[("Destination", "http://example.com/sub%20dir.txt")],
            b"",
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.request("GET", "/sub%20dir.txt", &[], b"").await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn move_directory() {
    let srv = TestServer::new();
    srv.request("MKCOL", "/d", &[], b"").await;
    srv.request("PUT", "/d/f.txt", &[], b"inner").await;

    let res = srv
        .request("MOVE", "/d", &[("Destination", "/e")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = srv.request("GET", "/e/f.txt", &[], b"").await;
    assert_eq!(body_string(res).await, "inner");
    let res = srv.request("GET", "/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn copymove_missing_source_is_conflict() {
    let srv = TestServer::new();
    let res = srv
        .request("COPY", "/gone.txt", &[("Destination", "/dst.txt")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn delete_recursive() {
    let srv = TestServer::new();
    srv.request("MKCOL", "/d", &[], b"").await;
    srv.request("MKCOL", "/d/sub", &[], b"").await;
    srv.request("PUT", "/d/sub/f.txt", &[], b"x").await;

    let res = srv.request("DELETE", "/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let res = srv.request("GET", "/d", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.request("DELETE", "/gone", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proppatch_roundtrip() {
    let srv = TestServer::new();
    srv.request("PUT", "/p.txt", &[], b"x").await;

    let update = br#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:X="u:">
  <D:set><D:prop><X:tag>v</X:tag></D:prop></D:set>
</D:propertyupdate>"#;
    let res = srv.request("PROPPATCH", "/p.txt", &[], update).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_string(res).await;
    assert!(body.contains("tag"));
    if !body.contains("HTTP/1.1 200 OK") {
        // filesystem without user xattr support; nothing more to check
        return;
    }

    let read = br#"<?xml version="1.0"?>
<D:propfind xmlns:D="DAV:" xmlns:X="u:">
  <D:prop><X:tag/></D:prop>
</D:propfind>"#;
    let res = srv
        .request("PROPFIND", "/p.txt", &[("Depth", "0")], read)
        .await;
    let body = body_string(res).await;
    assert!(body.contains(">v<"));
    assert!(body.contains("HTTP/1.1 200 OK"));

    // removal turns the lookup into a 404 propstat
    let remove = br#"<?xml version="1.0"?>
<D:propertyupdate xmlns:D="DAV:" xmlns:X="u:">
  <D:remove><D:prop><X:tag/></D:prop></D:remove>
</D:propertyupdate>"#;
    let res = srv.request("PROPPATCH", "/p.txt", &[], remove).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let res = srv
        .request("PROPFIND", "/p.txt", &[("Depth", "0")], read)
        .await;
    let body = body_string(res).await;
    assert!(body.contains("HTTP/1.1 404 Not Found"));
}

#[tokio::test]
async fn options_advertises_dav_class_2() {
    let srv = TestServer::new();
    let res = srv.request("OPTIONS", "/", &[], b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["dav"], "1,2");
    assert_eq!(res.headers()["ms-author-via"], "DAV");
    let allow = res.headers()["allow"].to_str().unwrap();
    for m in ["PROPFIND", "LOCK", "UNLOCK", "MKCOL", "COPY", "MOVE"] {
        assert!(allow.contains(m));
    }
}

#[tokio::test]
async fn unknown_method_is_not_implemented() {
    let srv = TestServer::new();
    let res = srv.request("BREW", "/", &[], b"").await;
    assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn bad_paths_are_refused() {
    let srv = TestServer::new();
    let res = srv.request("GET", "/a/../b", &[], b"").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let res = srv.request("GET", "/C:/windows", &[], b"").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_only_mode_refuses_writes() {
    let srv = TestServer::read_only();

    for (method, hdrs) in [
        ("MKCOL", vec![]),
        ("DELETE", vec![]),
        ("PROPPATCH", vec![]),
        ("LOCK", vec![]),
        ("MOVE", vec![("Destination", "/y")]),
        ("COPY", vec![("Destination", "/y")]),
    ] {
        let res = srv.request(method, "/x", &hdrs, b"").await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN, "method {method}");
    }

    // PUT is not in the allowed method set at all
    let res = srv.request("PUT", "/x", &[], b"data").await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    // reads still work
    let res = srv.request("OPTIONS", "/", &[], b"").await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = srv
        .request("PROPFIND", "/", &[("Depth", "0")], b"")
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
}

#[tokio::test]
async fn href_is_absolute_with_host_header() {
    let srv = TestServer::new();
    srv.request("PUT", "/f.txt", &[], b"x").await;
    let res = srv
        .request(
            "PROPFIND",
            "/f.txt",
            &[("Depth", "0"), ("Host", "dav.example:8080")],
            b"",
        )
        .await;
    let body = body_string(res).await;
    assert!(body.contains("<D:href>http://dav.example:8080/f.txt</D:href>"));
}
