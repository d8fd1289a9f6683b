//! URL path handling.
//!
//! A [`DavPath`] is the normalized form of a request path: percent-decoded,
//! slashes collapsed, no trailing slash (except for the root itself). Whether
//! the original path ended in a slash is remembered separately, since WebDAV
//! clients use that to address collections.

use std::path::PathBuf;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;

// Characters that are escaped in the path segments we generate.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A normalized WebDAV request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DavPath {
    // normalized: starts with '/', no trailing '/' unless root.
    path: String,
    // did the original path carry a trailing slash?
    collection: bool,
    prefix: String,
}

impl std::fmt::Display for DavPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)?;
        if self.collection && self.path != "/" {
            write!(f, "/")?;
        }
        Ok(())
    }
}

impl DavPath {
    /// Parse and normalize a raw (still percent-encoded) path.
    pub fn new(src: &str) -> Result<DavPath, DavError> {
        DavPath::from_str_and_prefix(src, "")
    }

    /// Like [`DavPath::new`], stripping `prefix` off the front first.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, DavError> {
        if src.contains('#') {
            return Err(DavError::InvalidPath);
        }
        let src = match src.find('?') {
            Some(pos) => &src[..pos],
            None => src,
        };
        if !src.starts_with('/') {
            return Err(DavError::InvalidPath);
        }
        let src = match prefix {
            "" | "/" => src,
            p => {
                let stripped = src.strip_prefix(p).ok_or(DavError::InvalidPath)?;
                if stripped.is_empty() {
                    "/"
                } else if stripped.starts_with('/') {
                    stripped
                } else {
                    return Err(DavError::InvalidPath);
                }
            }
        };

        let decoded = percent_decode_str(src)
            .decode_utf8()
            .map_err(|_| DavError::InvalidPath)?;

        let mut segs = Vec::new();
        for (idx, seg) in decoded.split('/').enumerate() {
            match seg {
                "" | "." => continue,
                ".." => return Err(DavError::InvalidPath),
                s => {
                    // refuse rooted-looking first segments ("C:", "\\host\..").
                    if s.contains('\\') || (idx <= 1 && s.ends_with(':')) {
                        return Err(DavError::InvalidPath);
                    }
                    segs.push(s);
                }
            }
        }

        let path = if segs.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", segs.join("/"))
        };

        Ok(DavPath {
            collection: decoded.ends_with('/') || path == "/",
            path,
            prefix: prefix.to_string(),
        })
    }

    /// Build from a request URI, stripping the configured prefix.
    pub fn from_uri_and_prefix(uri: &http::Uri, prefix: &str) -> Result<DavPath, DavError> {
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Was the resource addressed as a collection (trailing slash)?
    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Mark the path as addressing a collection.
    pub fn add_slash(&mut self) {
        self.collection = true;
    }

    /// The normalized path, as used as key in the path registry.
    pub fn as_str(&self) -> &str {
        &self.path
    }

    /// Final path segment, or "/" for the root.
    pub fn file_name(&self) -> &str {
        match self.path.rfind('/') {
            Some(pos) if self.path.len() > 1 => &self.path[pos + 1..],
            _ => "/",
        }
    }

    /// Parent path; the parent of the root is the root.
    pub fn parent(&self) -> DavPath {
        let parent = match self.path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(pos) => self.path[..pos].to_string(),
        };
        DavPath {
            path: parent,
            collection: true,
            prefix: self.prefix.clone(),
        }
    }

    /// Append one (decoded) segment.
    pub fn push_segment(&mut self, seg: &str) {
        if !self.path.ends_with('/') {
            self.path.push('/');
        }
        self.path.push_str(seg);
        self.collection = false;
    }

    /// Child path with one more segment.
    pub fn join(&self, seg: &str) -> DavPath {
        let mut p = self.clone();
        p.push_segment(seg);
        p
    }

    /// Percent-encoded URL string including the prefix.
    pub fn as_url_string(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.prefix);
        for seg in self.path.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(&utf8_percent_encode(seg, PATH_ENCODE_SET).to_string());
        }
        if out.is_empty() || (self.collection && !out.ends_with('/')) {
            out.push('/');
        }
        out
    }

    /// The path relative to a filesystem root directory.
    pub fn as_rel_ospath(&self) -> PathBuf {
        PathBuf::from(self.path.trim_start_matches('/'))
    }

    /// The path relative to the root as a string (no leading slash).
    pub fn as_rel_str(&self) -> &str {
        self.path.trim_start_matches('/')
    }
}

/// Percent-encode an already-decoded absolute path for use in an href.
pub(crate) fn encode_path(path: &str) -> String {
    let mut out = String::new();
    for seg in path.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(&utf8_percent_encode(seg, PATH_ENCODE_SET).to_string());
    }
    if out.is_empty() {
        out.push('/');
    } else if path.ends_with('/') {
        out.push('/');
    }
    out
}
