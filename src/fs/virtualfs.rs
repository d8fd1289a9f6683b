//! In-memory virtual directory tree.
//!
//! A [`VirtualDir`] presents itself as a directory without corresponding
//! to any filesystem path. Real directories and files can be attached as
//! children, at which point resolution hands over to the real filesystem.
//! The root node can additionally be grafted over a real directory, whose
//! entries then appear alongside the virtual children.
//!
//! Parent links are weak: dropping the last strong reference to the root
//! tears down the tree, and any node that survives through an outside
//! reference turns into a dummy that answers `NotFound`.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::localfs::RealFile;
use super::{DavFile, FileInfo, FileKind, FsError, FsInfo, FsResult};

#[derive(Debug)]
pub struct VirtualDir {
    // absolute virtual path; the root is "/".
    path: String,
    parent: Weak<VirtualDir>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    dummy: bool,
    children: Vec<Child>,
    // only meaningful on the root node.
    real_root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
enum Child {
    Dir(Arc<VirtualDir>),
    Real(PathBuf),
}

impl Child {
    fn base_name(&self) -> String {
        match self {
            Child::Dir(d) => d.base_name(),
            Child::Real(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

impl VirtualDir {
    /// The ancestor of all virtual directories, with path `/`.
    pub fn new_root() -> Arc<VirtualDir> {
        Arc::new(VirtualDir {
            path: "/".to_string(),
            parent: Weak::new(),
            state: Mutex::new(State::default()),
        })
    }

    /// Merge a real directory's entries into the root's listing. Virtual
    /// children take precedence during resolution; no conflict detection
    /// is done.
    pub fn root_set_real(self: &Arc<Self>, real_root_path: Option<PathBuf>) {
        debug_assert!(self.is_root());
        self.state.lock().real_root = real_root_path;
    }

    /// Create a virtual directory at `path`. Parent directories are not
    /// created implicitly.
    pub fn new_dir(root: &Arc<VirtualDir>, path: &str) -> FsResult<Arc<VirtualDir>> {
        let path = path.trim_end_matches('/');
        let (dir, base) = match path.rsplit_once('/') {
            Some((d, b)) if !b.is_empty() => (d, b),
            _ => return Err(FsError::NotFound),
        };

        let parent = match resolve(root, dir.trim_start_matches('/')) {
            DavFile::Virtual(v) if !v.is_dummy() => v,
            DavFile::Virtual(_) | DavFile::Dummy => return Err(FsError::NotFound),
            // a real child cannot act as parent to a virtual dir.
            DavFile::Real(_) => return Err(FsError::GeneralFailure),
        };

        let mut state = parent.state.lock();
        if state.children.iter().any(|c| c.base_name() == base) {
            return Err(FsError::Exists);
        }
        let node = Arc::new(VirtualDir {
            path: path.to_string(),
            parent: Arc::downgrade(&parent),
            state: Mutex::new(State::default()),
        });
        state.children.push(Child::Dir(node.clone()));
        Ok(node)
    }

    /// Link a real file or directory as a child of `parent`. The link is
    /// unidirectional; the real entry does not learn about its parent.
    pub fn attach_real_child(self: &Arc<Self>, child: PathBuf) -> bool {
        let base = match child.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => return false,
        };
        let mut state = self.state.lock();
        if state.children.iter().any(|c| c.base_name() == base) {
            return false;
        }
        state.children.push(Child::Real(child));
        true
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn base_name(&self) -> String {
        match self.path.rsplit_once('/') {
            Some((_, b)) if !b.is_empty() => b.to_string(),
            _ => "/".to_string(),
        }
    }

    /// A node is a dummy when explicitly orphaned or when its parent has
    /// been torn down under it.
    pub fn is_dummy(&self) -> bool {
        if self.state.lock().dummy {
            return true;
        }
        !self.is_root() && self.parent.upgrade().is_none()
    }

    /// The real directory grafted at this node (root only).
    pub(crate) fn real_path(&self) -> Option<PathBuf> {
        self.state.lock().real_root.clone()
    }

    pub fn get_parent(self: &Arc<Self>) -> Option<Arc<VirtualDir>> {
        if self.is_root() {
            return None;
        }
        self.parent.upgrade()
    }

    fn find_direct_child(&self, name: &str) -> Option<Child> {
        self.state
            .lock()
            .children
            .iter()
            .find(|c| c.base_name() == name)
            .cloned()
    }

    pub(crate) async fn query_info(&self) -> FsResult<FileInfo> {
        if self.is_dummy() {
            return Err(FsError::NotFound);
        }
        if let Some(real) = self.real_path() {
            return RealFile::from_path(real).query_info().await;
        }
        Ok(FileInfo {
            kind: FileKind::Directory,
            len: 0,
            created: None,
            modified: None,
            executable: false,
            etag: None,
            name: self.base_name(),
        })
    }

    pub(crate) async fn query_filesystem_info(&self) -> FsResult<FsInfo> {
        if self.is_dummy() {
            return Err(FsError::NotFound);
        }
        if let Some(real) = self.real_path() {
            return RealFile::from_path(real).query_filesystem_info().await;
        }
        Ok(FsInfo { free_bytes: 0 })
    }

    pub(crate) async fn enumerate_children(&self) -> FsResult<Vec<(String, DavFile)>> {
        if self.is_dummy() {
            return Err(FsError::NotFound);
        }
        let (children, real_root) = {
            let state = self.state.lock();
            (state.children.clone(), state.real_root.clone())
        };
        let mut out: Vec<(String, DavFile)> = children
            .into_iter()
            .map(|c| match c {
                Child::Dir(d) => (d.base_name(), DavFile::Virtual(d)),
                Child::Real(p) => {
                    let name = p
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    (name, DavFile::Real(RealFile::from_path(p)))
                }
            })
            .collect();
        if let Some(real) = real_root {
            match RealFile::from_path(real).enumerate_children().await {
                Ok(mut real_children) => out.append(&mut real_children),
                Err(e) => debug!("real root enumeration error: {}", e),
            }
        }
        Ok(out)
    }
}

/// Resolve a relative path against a virtual directory. Matching hands
/// over to the real filesystem as soon as a non-virtual child is hit;
/// paths that leave the tree resolve to [`DavFile::Dummy`].
pub(crate) fn resolve(root: &Arc<VirtualDir>, rel: &str) -> DavFile {
    if rel.is_empty() {
        return DavFile::Virtual(root.clone());
    }

    let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
    let mut current = DavFile::Virtual(root.clone());
    let mut common_segment = false;

    for (i, seg) in segments.iter().enumerate() {
        let vdir = match &current {
            DavFile::Virtual(v) => v.clone(),
            DavFile::Real(f) => {
                // remaining segments belong to the real filesystem.
                let mut p = f.path.clone();
                for s in &segments[i..] {
                    p.push(s);
                }
                return DavFile::Real(RealFile::from_path(p));
            }
            DavFile::Dummy => return DavFile::Dummy,
        };
        match vdir.find_direct_child(seg) {
            Some(Child::Dir(d)) => {
                common_segment = true;
                current = DavFile::Virtual(d);
            }
            Some(Child::Real(p)) => {
                common_segment = true;
                current = DavFile::Real(RealFile::from_path(p));
            }
            None => {
                if common_segment {
                    return DavFile::Dummy;
                }
                if let Some(real) = root.real_path() {
                    return DavFile::Real(RealFile::from_path(real.join(rel)));
                }
                return DavFile::Dummy;
            }
        }
    }
    current
}
