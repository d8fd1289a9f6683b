use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xmltree::Element;

use crate::body::Body;
use crate::davheaders;
use crate::davpath::encode_path;
use crate::fs::FsError;
use crate::ls::{generate_token, DavLock, LockScope};
use crate::xmltree_ext::{davdoc_parse, element_to_string, ElementExt};
use crate::{DavError, DavResult};

// <D:activelock> for one lock, used in LOCK replies and lockdiscovery.
pub(crate) fn activelock_node(lock: &DavLock) -> Element {
    let mut active = Element::new2("D:activelock");

    let mut elem = Element::new2("D:locktype");
    elem.push(Element::new2("D:write"));
    active.push(elem);

    let mut elem = Element::new2("D:lockscope");
    elem.push(match lock.scope {
        LockScope::Exclusive => Element::new2("D:exclusive"),
        LockScope::Shared => Element::new2("D:shared"),
    });
    active.push(elem);

    active.push(Element::new2("D:depth").text(if lock.deep { "infinity" } else { "0" }));

    if let Some(ref owner) = lock.owner {
        active.push(owner.clone());
    }

    let mut token = Element::new2("D:locktoken");
    token.push(Element::new2("D:href").text(lock.token.clone()));
    active.push(token);

    let mut root = Element::new2("D:lockroot");
    root.push(Element::new2("D:href").text(encode_path(&lock.path)));
    active.push(root);

    if let Some(secs) = lock.remaining_secs() {
        active.push(Element::new2("D:timeout").text(format!("Second-{secs}")));
    }

    active
}

pub(crate) fn supportedlock_node() -> Element {
    let mut elem = Element::new2("D:supportedlock");
    for scope in ["D:exclusive", "D:shared"] {
        let mut entry = Element::new2("D:lockentry");
        let mut s = Element::new2("D:lockscope");
        s.push(Element::new2(scope));
        entry.push(s);
        let mut t = Element::new2("D:locktype");
        t.push(Element::new2("D:write"));
        entry.push(t);
        elem.push(entry);
    }
    elem
}

// <D:prop><D:lockdiscovery><D:activelock>, the LOCK response body.
fn lock_prop_body(lock: &DavLock) -> Element {
    let mut ldis = Element::new2("D:lockdiscovery");
    ldis.push(activelock_node(lock));
    let mut prop = Element::new2("D:prop");
    prop.push(ldis);
    prop
}

fn xml_response(status: StatusCode, elem: &Element) -> DavResult<Response<Body>> {
    let mut res = Response::new(Body::from(element_to_string(elem)?));
    *res.status_mut() = status;
    res.headers_mut()
        .insert("content-type", "application/xml".parse().unwrap());
    Ok(res)
}

impl crate::DavHandler {
    pub(crate) async fn handle_lock(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let deep = match req.headers().typed_get::<davheaders::Depth>() {
            Some(davheaders::Depth::Infinity) | None => true,
            Some(davheaders::Depth::Zero) => false,
            Some(davheaders::Depth::One) => {
                return Err(DavError::Status(StatusCode::BAD_REQUEST))
            }
        };
        let timeout = req
            .headers()
            .typed_get::<davheaders::Timeout>()
            .map(|t| t.seconds())
            .unwrap_or(0);

        // an empty body means refresh; the If header must be exactly
        // "(<token>)".
        if xmldata.is_empty() {
            let Some(davheaders::If(hif)) = req.headers().typed_get() else {
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            };
            let token = hif
                .strip_prefix("(<")
                .and_then(|s| s.strip_suffix(">)"))
                .filter(|s| !s.is_empty())
                .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;

            debug!("refresh token {}", token);
            let Some(lock) = self.ls.refresh(path.as_str(), token, timeout) else {
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            };
            return xml_response(StatusCode::OK, &lock_prop_body(&lock));
        }

        let root = davdoc_parse(xmldata, "lockinfo")?;
        let mut scope: Option<LockScope> = None;
        let mut write_type = false;
        let mut owner: Option<Element> = None;

        for elem in root.child_elems() {
            if elem.has_dav_name("lockscope") {
                scope = match elem.child_elems().first().map(|e| e.name.as_str()) {
                    Some("exclusive") => Some(LockScope::Exclusive),
                    Some("shared") => Some(LockScope::Shared),
                    _ => return Err(DavError::XmlParseError),
                };
            } else if elem.has_dav_name("locktype") {
                match elem.child_elems().first().map(|e| e.name.as_str()) {
                    Some("write") => write_type = true,
                    _ => return Err(DavError::XmlParseError),
                }
            } else if elem.has_dav_name("owner") {
                owner = Some((*elem).clone());
            }
        }
        let Some(scope) = scope else {
            return Err(DavError::XmlParseError);
        };
        if !write_type {
            return Err(DavError::XmlParseError);
        }

        let token = generate_token();
        debug!(
            "lock deep:{} scope:{:?} timeout:{} on {}",
            deep, scope, timeout, path
        );
        let lock = self
            .ls
            .new_lock(path.as_str(), &token, scope, deep, owner, timeout)
            .ok_or(DavError::Status(StatusCode::INTERNAL_SERVER_ERROR))?;
        let lock = match self.ls.try_add_lock(lock) {
            Ok(l) => l,
            Err(()) => {
                debug!("lock failed");
                return Err(DavError::Status(StatusCode::LOCKED));
            }
        };

        // lock-null compatibility: a missing target is created empty.
        let file = self.fs.resolve(&path);
        let created = match file.query_info().await {
            Ok(_) => false,
            Err(FsError::NotFound) => match file.create_empty().await {
                Ok(created) => created,
                Err(e) => {
                    self.ls.unlock(path.as_str(), &token).ok();
                    return Err(DavError::FsError(e));
                }
            },
            Err(e) => {
                self.ls.unlock(path.as_str(), &token).ok();
                return Err(DavError::FsError(e));
            }
        };

        let status = if created {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        let mut res = xml_response(status, &lock_prop_body(&lock))?;
        res.headers_mut().typed_insert(davheaders::LockToken(format!("<{token}>")));
        Ok(res)
    }

    pub(crate) async fn handle_unlock(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let token = req
            .headers()
            .typed_get::<davheaders::LockToken>()
            .and_then(|t| t.token().map(|s| s.to_string()))
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;

        match self.ls.unlock(path.as_str(), &token) {
            Ok(()) => {
                let mut res = Response::new(Body::empty());
                *res.status_mut() = StatusCode::NO_CONTENT;
                Ok(res)
            }
            Err(()) => Err(DavError::Status(StatusCode::CONFLICT)),
        }
    }
}
