//! Virtual directory tree, served end-to-end through the handler.

use futures_util::StreamExt;
use http::{Response, StatusCode};

use chezdav::body::Body;
use chezdav::{DavHandler, Fs, VirtualDir};

struct VirtualServer {
    handler: DavHandler,
    _shared: tempfile::TempDir,
    _grafted: tempfile::TempDir,
}

// Mirrors the shipped setup: the root is grafted over a real directory
// containing test.txt, and a virtual /virtual dir carries a real
// directory child at /virtual/real.
fn setup() -> VirtualServer {
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("test.txt"), b"contents").unwrap();

    let grafted = tempfile::tempdir().unwrap();
    std::fs::write(grafted.path().join("inner.txt"), b"inner").unwrap();

    let root = VirtualDir::new_root();
    root.root_set_real(Some(shared.path().to_path_buf()));
    let virt = VirtualDir::new_dir(&root, "/virtual").unwrap();
    // the real dir appears under the base name of its path
    let real_child = grafted.path().join("real");
    std::fs::create_dir(&real_child).unwrap();
    std::fs::write(real_child.join("file.txt"), b"deep").unwrap();
    assert!(virt.attach_real_child(real_child));

    let handler = DavHandler::builder(Fs::virtual_root(root)).build();
    VirtualServer {
        handler,
        _shared: shared,
        _grafted: grafted,
    }
}

async fn request(
    srv: &VirtualServer,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = http::Request::builder().method(method).uri(path);
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }
    let req = builder.body(Body::empty()).unwrap();
    srv.handler.handle(req).await
}

async fn body_string(res: Response<Body>) -> String {
    let mut body = res.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn get_resolves_virtual_and_real_paths() {
    let srv = setup();

    for path in ["/", "/virtual", "/virtual/real"] {
        let res = request(&srv, "GET", path, &[]).await;
        assert_eq!(res.status(), StatusCode::OK, "path {path}");
    }
    let res = request(&srv, "GET", "/test.txt", &[]).await;
    assert_eq!(body_string(res).await, "contents");
    let res = request(&srv, "GET", "/virtual/real/file.txt", &[]).await;
    assert_eq!(body_string(res).await, "deep");

    let res = request(&srv, "GET", "/nope", &[]).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let res = request(&srv, "GET", "/virtual/nope", &[]).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_merges_virtual_and_real_entries() {
    let srv = setup();
    let res = request(&srv, "GET", "/", &[]).await;
    let body = body_string(res).await;
    assert!(body.contains("virtual/"));
    assert!(body.contains("test.txt"));
}

#[tokio::test]
async fn mkcol_only_below_real_mappings() {
    let srv = setup();

    // under the grafted real root
    let res = request(&srv, "MKCOL", "/A", &[]).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // inside the virtual tree: refused
    let res = request(&srv, "MKCOL", "/virtual/B", &[]).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // below the real child of a virtual dir: fine
    let res = request(&srv, "MKCOL", "/virtual/real/B", &[]).await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn copy_into_virtual_tree_is_forbidden() {
    let srv = setup();

    let res = request(
        &srv,
        "COPY",
        "/test.txt",
        &[("Destination", "/virtual/test-copy.txt")],
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = request(
        &srv,
        "COPY",
        "/test.txt",
        &[("Destination", "/virtual/real/test-copy.txt")],
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn delete_virtual_dir_is_forbidden() {
    let srv = setup();

    let res = request(&srv, "DELETE", "/virtual", &[]).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    request(&srv, "MKCOL", "/A", &[]).await;
    let res = request(&srv, "DELETE", "/A", &[]).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind_and_lock_work_on_virtual_dirs() {
    let srv = setup();

    let res = request(&srv, "PROPFIND", "/virtual", &[("Depth", "0")]).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let body = body_string(res).await;
    assert!(body.contains("<D:collection"));
    assert!(body.contains("<D:href>/virtual</D:href>"));

    let lockinfo = br#"<?xml version="1.0"?>
<D:lockinfo xmlns:D="DAV:">
  <D:lockscope><D:exclusive/></D:lockscope>
  <D:locktype><D:write/></D:locktype>
</D:lockinfo>"#;
    let req = http::Request::builder()
        .method("LOCK")
        .uri("/virtual")
        .body(Body::from(lockinfo.to_vec()))
        .unwrap();
    let res = srv.handler.handle(req).await;
    // the dir exists, so no lock-null file is created
    assert_eq!(res.status(), StatusCode::OK);
    let token = res.headers()["lock-token"]
        .to_str()
        .unwrap()
        .trim_matches(|c| c == '<' || c == '>')
        .to_string();

    let lt = format!("<{token}>");
    let res = request(&srv, "UNLOCK", "/virtual", &[("Lock-Token", &lt)]).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn propfind_depth_one_on_root_lists_both_worlds() {
    let srv = setup();
    let res = request(&srv, "PROPFIND", "/", &[("Depth", "1")]).await;
    let body = body_string(res).await;
    assert!(body.contains("<D:href>/virtual</D:href>"));
    assert!(body.contains("<D:href>/test.txt</D:href>"));
}
