use std::collections::HashMap;
use std::io;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xmltree::Element;

use crate::async_stream::{AsyncStream, Sender};
use crate::body::Body;
use crate::conditional::check_if;
use crate::davheaders;
use crate::davhandler::handle_lock::{activelock_node, supportedlock_node};
use crate::davpath::DavPath;
use crate::fs::{DavFile, FileInfo};
use crate::multistatus::{write_response, MsResponse, PropElement};
use crate::util::{dav_xml_error, systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::xmltree_ext::{
    children_to_string, davdoc_parse, emitter, prop_to_xattr_name, xattr_name_to_prop, ElementExt,
    NS_APACHE_URI, NS_DAV_URI, XATTR_PREFIX,
};
use crate::{DavError, DavResult};

// live properties, in response order. "executable" is in the Apache
// namespace, everything else is DAV:.
const LIVE_PROPS: &[&str] = &[
    "resourcetype",
    "creationdate",
    "getlastmodified",
    "getcontentlength",
    "getcontenttype",
    "displayname",
    "getetag",
    "executable",
    "supportedlock",
    "lockdiscovery",
    "quota-available-bytes",
    "quota-used-bytes",
];

// measuring disk usage walks the whole tree; it is skipped for allprop.
const SLOW_PROPS: &[&str] = &["quota-used-bytes"];

enum PropFind {
    AllProp,
    PropName,
    Prop(Vec<Element>),
}

fn parse_propfind(root: &Element) -> Option<PropFind> {
    for elem in root.child_elems() {
        if elem.has_dav_name("allprop") {
            return Some(PropFind::AllProp);
        } else if elem.has_dav_name("propname") {
            return Some(PropFind::PropName);
        } else if elem.has_dav_name("prop") {
            let props = elem.child_elems().into_iter().cloned().collect();
            return Some(PropFind::Prop(props));
        }
    }
    None
}

// the requested element, name and namespace only.
fn shallow_clone(elem: &Element) -> Element {
    Element {
        prefix: elem.prefix.clone(),
        namespace: elem.namespace.clone(),
        namespaces: None,
        name: elem.name.clone(),
        attributes: HashMap::new(),
        children: Vec::new(),
    }
}

fn daverr(e: DavError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

// Streams the multistatus document while resources are still being
// visited.
struct PropWriter {
    emitter: EventWriter<MemBuffer>,
    tx: Sender<Bytes>,
    base: Option<String>,
}

impl PropWriter {
    fn new(base: Option<String>, tx: Sender<Bytes>) -> Result<PropWriter, io::Error> {
        let mut em = emitter(MemBuffer::new()).map_err(daverr)?;
        em.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))
            .map_err(|e| daverr(e.into()))?;
        Ok(PropWriter {
            emitter: em,
            tx,
            base,
        })
    }

    fn write_resource(&mut self, path: &str, props: Vec<PropElement>) -> Result<(), io::Error> {
        write_response(
            &mut self.emitter,
            self.base.as_deref(),
            path,
            &MsResponse::Props(props),
        )
        .map_err(daverr)
    }

    async fn flush(&mut self) {
        let buf = self.emitter.inner_mut().take();
        if !buf.is_empty() {
            self.tx.send(buf).await;
        }
    }

    async fn close(mut self) -> Result<(), io::Error> {
        self.emitter
            .write(XmlWEvent::end_element())
            .map_err(|e| daverr(e.into()))?;
        self.flush().await;
        Ok(())
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        // only depth 0 and 1 are served; infinity (the default) is
        // refused outright.
        let depth = match req.headers().typed_get::<davheaders::Depth>() {
            Some(davheaders::Depth::Zero) => 0,
            Some(davheaders::Depth::One) => 1,
            Some(davheaders::Depth::Infinity) | None => {
                let mut res = Response::new(dav_xml_error("<D:propfind-finite-depth/>"));
                *res.status_mut() = StatusCode::FORBIDDEN;
                res.headers_mut()
                    .insert("content-type", "application/xml; charset=utf-8".parse().unwrap());
                return Ok(res);
            }
        };

        // an empty body means allprop (the Windows client relies on it).
        let pf = if xmldata.is_empty() {
            PropFind::AllProp
        } else {
            let root = davdoc_parse(xmldata, "propfind")?;
            parse_propfind(&root).ok_or(DavError::XmlParseError)?
        };

        let path = self.path(req);
        let file = self.fs.resolve(&path);
        let info = file.query_info().await.map_err(|e| match e {
            crate::fs::FsError::NotFound => DavError::Status(StatusCode::NOT_FOUND),
            e => DavError::FsError(e),
        })?;

        let this = self.clone();
        let base = self.base_uri(req);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut()
            .insert("content-type", "application/xml".parse().unwrap());

        *res.body_mut() = Body::from(AsyncStream::new(move |tx| async move {
            let mut pw = PropWriter::new(base, tx)?;

            let props = this.propfind_populate(&pf, &path, &file, &info).await;
            pw.write_resource(path.as_str(), props)?;
            pw.flush().await;

            if depth == 1 && info.is_dir() {
                match file.enumerate_children().await {
                    Ok(children) => {
                        for (name, child) in children {
                            let Ok(cinfo) = child.query_info().await else {
                                continue;
                            };
                            let cpath = path.join(&name);
                            let props = this.propfind_populate(&pf, &cpath, &child, &cinfo).await;
                            pw.write_resource(cpath.as_str(), props)?;
                            pw.flush().await;
                        }
                    }
                    Err(e) => debug!("propfind enumeration: {}", e),
                }
            }

            pw.close().await
        }));
        Ok(res)
    }

    // property nodes for one resource, each stamped with its status.
    async fn propfind_populate(
        &self,
        pf: &PropFind,
        path: &DavPath,
        file: &DavFile,
        info: &FileInfo,
    ) -> Vec<PropElement> {
        let mut out = Vec::new();
        match pf {
            PropFind::AllProp | PropFind::PropName => {
                let docontent = matches!(pf, PropFind::AllProp);
                for name in LIVE_PROPS {
                    if docontent && SLOW_PROPS.contains(name) {
                        continue;
                    }
                    if let Some(p) = self.build_live_prop(name, path, info, docontent).await {
                        out.push(p);
                    }
                }
                // dead properties are listed by name only.
                if let Ok(attrs) = file.list_xattrs().await {
                    for attr in attrs {
                        out.push(PropElement {
                            element: xattr_name_to_prop(&attr),
                            status: StatusCode::OK,
                        });
                    }
                }
            }
            PropFind::Prop(requested) => {
                for elem in requested {
                    let is_live = match elem.namespace.as_deref() {
                        Some(NS_DAV_URI) => true,
                        Some(NS_APACHE_URI) => elem.name == "executable",
                        _ => false,
                    };
                    if is_live {
                        if let Some(p) = self.build_live_prop(&elem.name, path, info, true).await {
                            out.push(p);
                            continue;
                        }
                    }
                    out.push(self.build_dead_prop(elem, file).await);
                }
            }
        }
        out
    }

    async fn build_live_prop(
        &self,
        name: &str,
        path: &DavPath,
        info: &FileInfo,
        docontent: bool,
    ) -> Option<PropElement> {
        let ok = |element| {
            Some(PropElement {
                element,
                status: StatusCode::OK,
            })
        };
        let missing = |element| {
            Some(PropElement {
                element,
                status: StatusCode::NOT_FOUND,
            })
        };

        match name {
            "resourcetype" => {
                let mut elem = Element::new2("D:resourcetype");
                if docontent && info.is_dir() {
                    elem.push(Element::new2("D:collection"));
                }
                ok(elem)
            }
            "creationdate" => {
                let elem = Element::new2("D:creationdate");
                if !docontent {
                    return ok(elem);
                }
                // windows insists on a creation date; fall back to the
                // modification time like apache does.
                match info.created.or(info.modified) {
                    Some(t) => ok(elem.text(systemtime_to_httpdate(t))),
                    None => missing(elem),
                }
            }
            "getlastmodified" => {
                let elem = Element::new2("D:getlastmodified");
                if !docontent {
                    return ok(elem);
                }
                match info.modified {
                    Some(t) => ok(elem.text(systemtime_to_rfc3339(t))),
                    None => missing(elem),
                }
            }
            "getcontentlength" => {
                let elem = Element::new2("D:getcontentlength");
                if !docontent {
                    return ok(elem);
                }
                ok(elem.text(info.len.to_string()))
            }
            "getcontenttype" => {
                let elem = Element::new2("D:getcontenttype");
                if !docontent {
                    return ok(elem);
                }
                let ctype = if info.is_dir() {
                    "inode/directory".to_string()
                } else {
                    mime_guess::from_path(&info.name)
                        .first_or_octet_stream()
                        .to_string()
                };
                ok(elem.text(ctype))
            }
            "displayname" => {
                let elem = Element::new2("D:displayname");
                if !docontent {
                    return ok(elem);
                }
                ok(elem.text(info.name.clone()))
            }
            "getetag" => {
                let elem = Element::new2("D:getetag");
                if !docontent {
                    return ok(elem);
                }
                match info.etag {
                    Some(ref etag) => ok(elem.text(format!("\"{etag}\""))),
                    None => missing(elem),
                }
            }
            "executable" => {
                let elem = Element::new2("executable").ns("A", NS_APACHE_URI);
                if !docontent {
                    return ok(elem);
                }
                // directories always report F.
                let exec = info.executable && !info.is_dir();
                ok(elem.text(if exec { "T" } else { "F" }))
            }
            "supportedlock" => {
                if !docontent {
                    return ok(Element::new2("D:supportedlock"));
                }
                ok(supportedlock_node())
            }
            "lockdiscovery" => {
                let mut elem = Element::new2("D:lockdiscovery");
                if docontent {
                    for lock in self.ls.locks_along(path.as_str()) {
                        elem.push(activelock_node(&lock));
                    }
                }
                ok(elem)
            }
            "quota-available-bytes" => {
                let elem = Element::new2("D:quota-available-bytes");
                if !docontent {
                    return ok(elem);
                }
                match self.root_file().query_filesystem_info().await {
                    Ok(fsinfo) => ok(elem.text(fsinfo.free_bytes.to_string())),
                    Err(e) => {
                        warn!("filesystem info error: {}", e);
                        Some(PropElement {
                            element: elem,
                            status: StatusCode::INTERNAL_SERVER_ERROR,
                        })
                    }
                }
            }
            "quota-used-bytes" => {
                let elem = Element::new2("D:quota-used-bytes");
                if !docontent {
                    return ok(elem);
                }
                match self.root_file().measure_disk_usage().await {
                    Ok(used) => ok(elem.text(used.to_string())),
                    Err(e) => {
                        warn!("disk usage error: {}", e);
                        Some(PropElement {
                            element: elem,
                            status: StatusCode::INTERNAL_SERVER_ERROR,
                        })
                    }
                }
            }
            _ => None,
        }
    }

    async fn build_dead_prop(&self, elem: &Element, file: &DavFile) -> PropElement {
        let name = prop_to_xattr_name(elem, XATTR_PREFIX);
        let out = shallow_clone(elem);
        match file.get_xattr(&name).await {
            Ok(Some(value)) => PropElement {
                element: out.text(value),
                status: StatusCode::OK,
            },
            _ => PropElement {
                element: out,
                status: StatusCode::NOT_FOUND,
            },
        }
    }

    fn root_file(&self) -> DavFile {
        // quota properties report on the served root, not the resource.
        self.fs.resolve(&DavPath::new("/").expect("root path"))
    }

    pub(crate) async fn handle_proppatch(
        &self,
        req: &Request<()>,
        xmldata: &[u8],
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);

        let root = davdoc_parse(xmldata, "propertyupdate")?;

        let ifres = check_if(&self.fs, &self.ls, req.headers(), false, &path).await;
        if ifres.status != StatusCode::OK {
            return Err(DavError::Status(ifres.status));
        }

        trace!(
            "proppatch input:\n{}",
            String::from_utf8_lossy(xmldata)
        );

        let file = self.fs.resolve(&path);
        let mut props = Vec::new();

        for elem in root.child_elems() {
            let remove = if elem.has_dav_name("set") {
                false
            } else if elem.has_dav_name("remove") {
                true
            } else {
                continue;
            };
            for prop in elem.child_elems().into_iter().filter(|e| e.has_dav_name("prop")) {
                let Some(attr) = prop.child_elems().first().copied() else {
                    continue;
                };
                let name = prop_to_xattr_name(attr, XATTR_PREFIX);
                let status = if remove {
                    // a missing attribute is not an error on removal.
                    let _ = file.remove_xattr(&name).await;
                    StatusCode::OK
                } else {
                    let value = children_to_string(attr)?;
                    match file.set_xattr(&name, &value).await {
                        Ok(()) => StatusCode::OK,
                        Err(e) => {
                            warn!("failed to set property: {}", e);
                            StatusCode::NOT_FOUND
                        }
                    }
                };
                props.push(PropElement {
                    element: shallow_clone(attr),
                    status,
                });
            }
        }

        let mut ms = crate::multistatus::MultiStatus::new(self.base_uri(req));
        ms.insert_props(path.as_str(), props);
        let (status, body) = ms.into_response()?;
        let mut res = Response::new(body);
        *res.status_mut() = status;
        res.headers_mut()
            .insert("content-type", "application/xml".parse().unwrap());
        Ok(res)
    }
}
