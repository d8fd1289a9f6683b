//! The abstract "file" the method handlers operate on.
//!
//! A resolved request path is one of three things: a real filesystem
//! entry, a node of the in-memory virtual directory tree, or a dummy
//! (the virtual tree's way of saying "not found"). All three offer the
//! same capability set; dispatch is a plain `match`.

pub mod localfs;
pub mod virtualfs;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use crate::davpath::DavPath;
use virtualfs::VirtualDir;

pub(crate) type FsResult<T> = Result<T, FsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    Forbidden,
    Exists,
    NotSupported,
    InsufficientStorage,
    /// Destination is a directory (single-call move/copy refused).
    IsDirectory,
    /// Moving a directory over a non-empty directory.
    WouldMerge,
    /// Copying a directory needs explicit recursion.
    WouldRecurse,
    /// A non-directory where a directory was expected.
    NotADirectory,
    GeneralFailure,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FsError::NotFound => "not found",
            FsError::Forbidden => "forbidden",
            FsError::Exists => "already exists",
            FsError::NotSupported => "operation not supported",
            FsError::InsufficientStorage => "insufficient storage",
            FsError::IsDirectory => "is a directory",
            FsError::WouldMerge => "would merge directories",
            FsError::WouldRecurse => "would recurse",
            FsError::NotADirectory => "not a directory",
            FsError::GeneralFailure => "general failure",
        };
        f.write_str(s)
    }
}

impl std::error::Error for FsError {}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::PermissionDenied => FsError::Forbidden,
            io::ErrorKind::AlreadyExists => FsError::Exists,
            _ => match e.raw_os_error() {
                #[cfg(unix)]
                Some(libc::EISDIR) => FsError::IsDirectory,
                #[cfg(unix)]
                Some(libc::ENOTDIR) => FsError::NotADirectory,
                #[cfg(unix)]
                Some(libc::ENOTEMPTY) | Some(libc::EEXIST) => FsError::WouldMerge,
                #[cfg(unix)]
                Some(libc::ENOSPC) => FsError::InsufficientStorage,
                _ => FsError::GeneralFailure,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
}

/// Metadata snapshot of one resource, the input of the property engine.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub kind: FileKind,
    pub len: u64,
    pub created: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub executable: bool,
    /// Filesystem-reported entity tag, unquoted.
    pub etag: Option<String>,
    /// Display name (final path segment).
    pub name: String,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

/// Filesystem-level information, for the quota properties.
#[derive(Debug, Clone, Copy)]
pub struct FsInfo {
    pub free_bytes: u64,
}

/// A resolved resource.
#[derive(Debug, Clone)]
pub enum DavFile {
    Real(localfs::RealFile),
    Virtual(Arc<VirtualDir>),
    Dummy,
}

impl DavFile {
    pub(crate) fn is_virtual(&self) -> bool {
        matches!(self, DavFile::Virtual(_))
    }

    pub(crate) async fn query_info(&self) -> FsResult<FileInfo> {
        match self {
            DavFile::Real(f) => f.query_info().await,
            DavFile::Virtual(v) => v.query_info().await,
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }

    pub(crate) async fn query_filesystem_info(&self) -> FsResult<FsInfo> {
        match self {
            DavFile::Real(f) => f.query_filesystem_info().await,
            DavFile::Virtual(v) => v.query_filesystem_info().await,
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }

    /// Children as `(name, handle)` pairs. Virtual children come first,
    /// then the grafted real root's entries; like-named real entries are
    /// not filtered out.
    pub(crate) async fn enumerate_children(&self) -> FsResult<Vec<(String, DavFile)>> {
        match self {
            DavFile::Real(f) => f.enumerate_children().await,
            DavFile::Virtual(v) => v.enumerate_children().await,
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }

    pub(crate) async fn make_directory(&self) -> FsResult<()> {
        match self {
            DavFile::Real(f) => f.make_directory().await,
            // mutating a virtual node, or a path that fell off the
            // virtual tree, is not supported.
            DavFile::Virtual(_) | DavFile::Dummy => Err(FsError::NotSupported),
        }
    }

    /// Create the file empty if it does not exist (LOCK on a missing
    /// target). Returns whether it was created.
    pub(crate) async fn create_empty(&self) -> FsResult<bool> {
        match self {
            DavFile::Real(f) => f.create_empty().await,
            DavFile::Virtual(_) | DavFile::Dummy => Err(FsError::NotSupported),
        }
    }

    /// Recursive pre-order delete. Per-path failures are pushed onto
    /// `failures`; the returned result reflects the top-level delete.
    pub(crate) async fn delete_recursive(
        &self,
        report_path: &str,
        failures: &mut Vec<(String, FsError)>,
    ) -> FsResult<()> {
        match self {
            DavFile::Real(f) => localfs::delete_recursive(&f.path, report_path, failures).await,
            DavFile::Virtual(_) | DavFile::Dummy => Err(FsError::NotSupported),
        }
    }

    pub(crate) async fn set_xattr(&self, name: &str, value: &str) -> FsResult<()> {
        match self {
            DavFile::Real(f) => f.set_xattr(name, value).await,
            DavFile::Virtual(v) => match v.real_path() {
                Some(p) => localfs::RealFile::from_path(p).set_xattr(name, value).await,
                None => Err(FsError::NotSupported),
            },
            DavFile::Dummy => Err(FsError::NotSupported),
        }
    }

    pub(crate) async fn remove_xattr(&self, name: &str) -> FsResult<()> {
        match self {
            DavFile::Real(f) => f.remove_xattr(name).await,
            DavFile::Virtual(v) => match v.real_path() {
                Some(p) => localfs::RealFile::from_path(p).remove_xattr(name).await,
                None => Err(FsError::NotSupported),
            },
            DavFile::Dummy => Err(FsError::NotSupported),
        }
    }

    pub(crate) async fn get_xattr(&self, name: &str) -> FsResult<Option<String>> {
        match self {
            DavFile::Real(f) => f.get_xattr(name).await,
            DavFile::Virtual(v) => match v.real_path() {
                Some(p) => localfs::RealFile::from_path(p).get_xattr(name).await,
                None => Ok(None),
            },
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }

    /// Names of all stored dead properties (storage prefix stripped).
    pub(crate) async fn list_xattrs(&self) -> FsResult<Vec<String>> {
        match self {
            DavFile::Real(f) => f.list_xattrs().await,
            DavFile::Virtual(v) => match v.real_path() {
                Some(p) => localfs::RealFile::from_path(p).list_xattrs().await,
                None => Ok(Vec::new()),
            },
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }

    pub(crate) async fn measure_disk_usage(&self) -> FsResult<u64> {
        match self {
            DavFile::Real(f) => f.measure_disk_usage().await,
            DavFile::Virtual(v) => match v.real_path() {
                Some(p) => localfs::RealFile::from_path(p).measure_disk_usage().await,
                None => Err(FsError::NotSupported),
            },
            DavFile::Dummy => Err(FsError::NotFound),
        }
    }
}

/// The filesystem a handler serves: a real directory, or a virtual
/// directory tree (optionally grafted over a real one).
#[derive(Debug, Clone)]
pub struct Fs {
    root: Root,
    public: bool,
}

#[derive(Debug, Clone)]
enum Root {
    Real(PathBuf),
    Virtual(Arc<VirtualDir>),
}

impl Fs {
    /// Serve the real directory `base`.
    ///
    /// With `public` set, created files are world-readable (644/755),
    /// otherwise private (600/700). Umask still applies.
    pub fn local(base: impl Into<PathBuf>, public: bool) -> Fs {
        Fs {
            root: Root::Real(base.into()),
            public,
        }
    }

    /// Serve a virtual directory tree.
    pub fn virtual_root(root: Arc<VirtualDir>) -> Fs {
        Fs {
            root: Root::Virtual(root),
            public: false,
        }
    }

    /// Resolve a request path to a file handle. Never fails: paths that
    /// fall off the virtual tree resolve to [`DavFile::Dummy`].
    pub(crate) fn resolve(&self, path: &DavPath) -> DavFile {
        match &self.root {
            Root::Real(base) => DavFile::Real(localfs::RealFile::new(
                base.join(path.as_rel_ospath()),
                self.public,
            )),
            Root::Virtual(root) => virtualfs::resolve(root, path.as_rel_str()),
        }
    }
}
