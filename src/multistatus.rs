//! Building `207 Multi-Status` response bodies.
//!
//! A multistatus maps resource paths to either a bare status or a list
//! of property nodes, each stamped with its own status. Nodes of equal
//! status coalesce into a single `<propstat>` block.

use std::collections::BTreeMap;
use std::io::Write;

use http::StatusCode;
use xml::writer::{EventWriter, XmlEvent as XmlWEvent};
use xmltree::Element;

use crate::body::Body;
use crate::davpath::encode_path;
use crate::errors::DavError;
use crate::xmltree_ext::{emitter, ElementExt, NS_DAV_URI};

/// One property node with its per-property status.
pub(crate) struct PropElement {
    pub element: Element,
    pub status: StatusCode,
}

pub(crate) enum MsResponse {
    Props(Vec<PropElement>),
    Status(StatusCode),
}

/// The `{path -> response}` map. BTreeMap keeps the output deterministic.
pub(crate) struct MultiStatus {
    responses: BTreeMap<String, MsResponse>,
    base: Option<String>,
}

fn status_line(status: StatusCode) -> String {
    format!(
        "HTTP/1.1 {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
}

/// Serialize one `<response>` element.
pub(crate) fn write_response<W: Write>(
    em: &mut EventWriter<W>,
    base: Option<&str>,
    path: &str,
    resp: &MsResponse,
) -> Result<(), DavError> {
    em.write(XmlWEvent::start_element("D:response"))?;

    let href = format!("{}{}", base.unwrap_or(""), encode_path(path));
    Element::new2("D:href").text(href).write_ev(em)?;

    match resp {
        MsResponse::Status(status) => {
            Element::new2("D:status")
                .text(status_line(*status))
                .write_ev(em)?;
        }
        MsResponse::Props(props) => {
            let mut sorted: Vec<&PropElement> = props.iter().collect();
            sorted.sort_by_key(|p| p.status.as_u16());

            let mut cur: Option<StatusCode> = None;
            for p in sorted {
                if cur != Some(p.status) {
                    if cur.is_some() {
                        em.write(XmlWEvent::end_element())?; // prop
                        Element::new2("D:status")
                            .text(status_line(cur.unwrap()))
                            .write_ev(em)?;
                        em.write(XmlWEvent::end_element())?; // propstat
                    }
                    em.write(XmlWEvent::start_element("D:propstat"))?;
                    em.write(XmlWEvent::start_element("D:prop"))?;
                    cur = Some(p.status);
                }
                p.element.write_ev(em)?;
            }
            if let Some(status) = cur {
                em.write(XmlWEvent::end_element())?; // prop
                Element::new2("D:status")
                    .text(status_line(status))
                    .write_ev(em)?;
                em.write(XmlWEvent::end_element())?; // propstat
            }
        }
    }

    em.write(XmlWEvent::end_element())?; // response
    Ok(())
}

impl MultiStatus {
    /// `base` is prepended to each href to form an absolute URI
    /// (scheme + authority, e.g. `http://host:8080`).
    pub fn new(base: Option<String>) -> MultiStatus {
        MultiStatus {
            responses: BTreeMap::new(),
            base,
        }
    }

    pub fn insert_status(&mut self, path: &str, status: StatusCode) {
        self.responses
            .insert(path.to_string(), MsResponse::Status(status));
    }

    pub fn insert_props(&mut self, path: &str, props: Vec<PropElement>) {
        self.responses
            .insert(path.to_string(), MsResponse::Props(props));
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn into_response(self) -> Result<(StatusCode, Body), DavError> {
        let mut buf = Vec::new();
        {
            let mut em = emitter(&mut buf)?;
            em.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV_URI))?;
            for (path, resp) in &self.responses {
                write_response(&mut em, self.base.as_deref(), path, resp)?;
            }
            em.write(XmlWEvent::end_element())?;
        }
        Ok((StatusCode::MULTI_STATUS, Body::from(buf)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(ms: MultiStatus) -> String {
        use futures_util::StreamExt;
        let (status, mut body) = ms.into_response().unwrap();
        assert_eq!(status, StatusCode::MULTI_STATUS);
        let mut s = String::new();
        while let Some(chunk) = body.next().await {
            s.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
        s
    }

    #[tokio::test]
    async fn bare_status_entry() {
        let mut ms = MultiStatus::new(None);
        ms.insert_status("/a b", StatusCode::FORBIDDEN);
        let out = render(ms).await;
        assert!(out.contains("<D:href>/a%20b</D:href>"));
        assert!(out.contains("<D:status>HTTP/1.1 403 Forbidden</D:status>"));
    }

    #[tokio::test]
    async fn props_coalesce_by_status() {
        let mut ms = MultiStatus::new(Some("http://host".to_string()));
        ms.insert_props(
            "/f",
            vec![
                PropElement {
                    element: Element::new2("D:getetag"),
                    status: StatusCode::OK,
                },
                PropElement {
                    element: Element::new2("D:quota-used-bytes"),
                    status: StatusCode::NOT_FOUND,
                },
                PropElement {
                    element: Element::new2("D:getcontentlength"),
                    status: StatusCode::OK,
                },
            ],
        );
        let out = render(ms).await;
        assert!(out.contains("<D:href>http://host/f</D:href>"));
        // two propstat blocks, the two 200s grouped together first
        assert_eq!(out.matches("<D:propstat>").count(), 2);
        let ok_block = out.split("HTTP/1.1 200 OK").next().unwrap();
        assert!(ok_block.contains("D:getetag"));
        assert!(ok_block.contains("D:getcontentlength"));
    }
}
