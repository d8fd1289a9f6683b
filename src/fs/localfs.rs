//! Real filesystem access, built on tokio::fs.
//!
//! A [`RealFile`] is just a resolved absolute path plus the file-mode
//! policy; every operation goes to the filesystem, nothing is cached.

use std::io;
#[cfg(unix)]
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{FileInfo, FileKind, FsError, FsInfo, FsResult};
use crate::fs::DavFile;

#[derive(Debug, Clone)]
pub struct RealFile {
    pub(crate) path: PathBuf,
    public: bool,
}

impl RealFile {
    pub(crate) fn new(path: PathBuf, public: bool) -> RealFile {
        RealFile { path, public }
    }

    pub(crate) fn from_path(path: PathBuf) -> RealFile {
        RealFile {
            path,
            public: false,
        }
    }

    fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_string())
    }

    pub(crate) async fn query_info(&self) -> FsResult<FileInfo> {
        let meta = tokio::fs::metadata(&self.path).await?;
        Ok(info_from_metadata(&meta, self.display_name()))
    }

    pub(crate) async fn enumerate_children(&self) -> FsResult<Vec<(String, DavFile)>> {
        let mut rd = tokio::fs::read_dir(&self.path).await?;
        let mut out = Vec::new();
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let child = RealFile::new(entry.path(), self.public);
            out.push((name, DavFile::Real(child)));
        }
        Ok(out)
    }

    pub(crate) async fn make_directory(&self) -> FsResult<()> {
        trace!("FS: make_directory {:?}", self.path);
        let mut b = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        b.mode(if self.public { 0o755 } else { 0o700 });
        Ok(b.create(&self.path).await?)
    }

    // Create the file if missing; Ok(false) when it already existed.
    pub(crate) async fn create_empty(&self) -> FsResult<bool> {
        let mut oo = tokio::fs::OpenOptions::new();
        oo.write(true).create_new(true);
        #[cfg(unix)]
        oo.mode(if self.public { 0o644 } else { 0o600 });
        match oo.open(&self.path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) async fn open_read(&self) -> FsResult<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }

    /// Start an atomic replace: contents are streamed into a hidden
    /// sibling temp file and renamed over the target on commit.
    pub(crate) async fn replace(&self) -> FsResult<Replace> {
        let existed = tokio::fs::metadata(&self.path).await.is_ok();
        let dir = self.path.parent().ok_or(FsError::NotFound)?;
        let tmp_path = dir.join(format!(
            ".{}.{}",
            self.display_name(),
            Uuid::new_v4().simple()
        ));
        let mut oo = tokio::fs::OpenOptions::new();
        oo.write(true).create_new(true);
        #[cfg(unix)]
        oo.mode(if self.public { 0o644 } else { 0o600 });
        let tmp = oo.open(&tmp_path).await?;
        Ok(Replace {
            tmp,
            tmp_path,
            dest: self.path.clone(),
            existed,
        })
    }

    pub(crate) async fn query_filesystem_info(&self) -> FsResult<FsInfo> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || match fs2::available_space(&path) {
            Ok(free) => Ok(FsInfo { free_bytes: free }),
            Err(e) => Err(FsError::from(e)),
        })
        .await
        .map_err(|_| FsError::GeneralFailure)?
    }

    pub(crate) async fn measure_disk_usage(&self) -> FsResult<u64> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for entry in walkdir::WalkDir::new(&path) {
                let entry = entry.map_err(|e| {
                    warn!("disk usage measurement error: {}", e);
                    FsError::GeneralFailure
                })?;
                if entry.file_type().is_file() {
                    if let Ok(meta) = entry.metadata() {
                        total += meta.len();
                    }
                }
            }
            Ok(total)
        })
        .await
        .map_err(|_| FsError::GeneralFailure)?
    }

    #[cfg(unix)]
    pub(crate) async fn set_xattr(&self, name: &str, value: &str) -> FsResult<()> {
        let (path, name, value) = (self.path.clone(), name.to_string(), value.to_string());
        tokio::task::spawn_blocking(move || {
            xattr::set(&path, &name, value.as_bytes()).map_err(FsError::from)
        })
        .await
        .map_err(|_| FsError::GeneralFailure)?
    }

    #[cfg(unix)]
    pub(crate) async fn remove_xattr(&self, name: &str) -> FsResult<()> {
        let (path, name) = (self.path.clone(), name.to_string());
        tokio::task::spawn_blocking(move || xattr::remove(&path, &name).map_err(FsError::from))
            .await
            .map_err(|_| FsError::GeneralFailure)?
    }

    #[cfg(unix)]
    pub(crate) async fn get_xattr(&self, name: &str) -> FsResult<Option<String>> {
        let (path, name) = (self.path.clone(), name.to_string());
        tokio::task::spawn_blocking(move || match xattr::get(&path, &name) {
            Ok(Some(v)) => Ok(Some(String::from_utf8_lossy(&v).into_owned())),
            Ok(None) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FsError::NotFound),
            Err(e) => Err(FsError::from(e)),
        })
        .await
        .map_err(|_| FsError::GeneralFailure)?
    }

    /// Dead-property attribute names, with the `user.` storage prefix
    /// already stripped.
    #[cfg(unix)]
    pub(crate) async fn list_xattrs(&self) -> FsResult<Vec<String>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let names = xattr::list(&path).map_err(FsError::from)?;
            Ok(names
                .filter_map(|n| {
                    n.to_str()
                        .and_then(|s| s.strip_prefix(crate::xmltree_ext::XATTR_PREFIX))
                        .map(|s| s.to_string())
                })
                .collect())
        })
        .await
        .map_err(|_| FsError::GeneralFailure)?
    }

    #[cfg(not(unix))]
    pub(crate) async fn set_xattr(&self, _name: &str, _value: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    #[cfg(not(unix))]
    pub(crate) async fn remove_xattr(&self, _name: &str) -> FsResult<()> {
        Err(FsError::NotSupported)
    }

    #[cfg(not(unix))]
    pub(crate) async fn get_xattr(&self, _name: &str) -> FsResult<Option<String>> {
        Ok(None)
    }

    #[cfg(not(unix))]
    pub(crate) async fn list_xattrs(&self) -> FsResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// In-flight atomic replacement of a file's contents.
pub(crate) struct Replace {
    tmp: tokio::fs::File,
    tmp_path: PathBuf,
    dest: PathBuf,
    pub(crate) existed: bool,
}

impl Replace {
    pub(crate) async fn write_chunk(&mut self, buf: &[u8]) -> io::Result<()> {
        self.tmp.write_all(buf).await
    }

    pub(crate) async fn commit(mut self) -> io::Result<()> {
        self.tmp.flush().await?;
        self.tmp.sync_all().await?;
        drop(self.tmp);
        tokio::fs::rename(&self.tmp_path, &self.dest).await
    }

    pub(crate) async fn abort(self) {
        drop(self.tmp);
        let _ = tokio::fs::remove_file(&self.tmp_path).await;
    }
}

pub(crate) fn info_from_metadata(meta: &std::fs::Metadata, name: String) -> FileInfo {
    FileInfo {
        kind: if meta.is_dir() {
            FileKind::Directory
        } else {
            FileKind::Regular
        },
        len: meta.len(),
        created: meta.created().ok(),
        modified: meta.modified().ok(),
        executable: executable(meta),
        etag: etag(meta),
        name,
    }
}

#[cfg(unix)]
fn executable(meta: &std::fs::Metadata) -> bool {
    meta.is_file() && (meta.permissions().mode() & 0o100) > 0
}

#[cfg(not(unix))]
fn executable(_meta: &std::fs::Metadata) -> bool {
    false
}

// same as the default apache etag.
#[cfg(unix)]
fn etag(meta: &std::fs::Metadata) -> Option<String> {
    let modified = meta.modified().ok()?;
    let t = modified.duration_since(UNIX_EPOCH).ok()?;
    let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
    if meta.is_file() {
        Some(format!("{:x}-{:x}-{:x}", meta.ino(), meta.len(), t))
    } else {
        Some(format!("{:x}-{:x}", meta.ino(), t))
    }
}

#[cfg(not(unix))]
fn etag(meta: &std::fs::Metadata) -> Option<String> {
    let modified = meta.modified().ok()?;
    let t = modified.duration_since(UNIX_EPOCH).ok()?;
    let t = t.as_secs() * 1000000 + t.subsec_nanos() as u64 / 1000;
    if meta.is_file() {
        Some(format!("{:x}-{:x}", meta.len(), t))
    } else {
        Some(format!("{:x}", t))
    }
}

/// Recursive pre-order delete: children first, then the entry itself.
/// Every failed removal is recorded as `(report_path, error)`.
pub(crate) fn delete_recursive<'a>(
    file: &'a Path,
    report_path: &'a str,
    failures: &'a mut Vec<(String, FsError)>,
) -> BoxFuture<'a, FsResult<()>> {
    async move {
        if let Ok(mut rd) = tokio::fs::read_dir(file).await {
            loop {
                let entry = match rd.next_entry().await {
                    Ok(Some(e)) => e,
                    Ok(None) => break,
                    Err(e) => {
                        debug!("ignored delete enumeration error: {}", e);
                        break;
                    }
                };
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_path = format!("{}/{}", report_path.trim_end_matches('/'), name);
                let child = entry.path();
                let _ = delete_recursive(&child, &child_path, failures).await;
            }
        }

        let res = match tokio::fs::symlink_metadata(file).await {
            Ok(m) if m.is_dir() => tokio::fs::remove_dir(file).await,
            Ok(_) => tokio::fs::remove_file(file).await,
            Err(e) => Err(e),
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!("delete failed for {:?}: {}", file, e);
                let fe = FsError::from(e);
                failures.push((report_path.to_string(), fe));
                Err(fe)
            }
        }
    }
    .boxed()
}

// One single-call move or copy attempt.
async fn single_call(src: &Path, dst: &Path, copy: bool) -> FsResult<()> {
    if copy {
        let meta = tokio::fs::metadata(src).await?;
        if meta.is_dir() {
            return Err(FsError::WouldRecurse);
        }
        tokio::fs::copy(src, dst).await?;
        Ok(())
    } else {
        Ok(tokio::fs::rename(src, dst).await?)
    }
}

fn copy_recursive<'a>(src: &'a Path, dst: &'a Path, overwrite: bool) -> BoxFuture<'a, FsResult<()>> {
    async move {
        tokio::fs::create_dir_all(dst).await?;
        let mut rd = tokio::fs::read_dir(src).await?;
        while let Some(entry) = rd.next_entry().await? {
            let s = entry.path();
            let d = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_recursive(&s, &d, overwrite).await?;
            } else {
                if !overwrite && tokio::fs::metadata(&d).await.is_ok() {
                    return Err(FsError::Exists);
                }
                tokio::fs::copy(&s, &d).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

/// The MOVE/COPY ladder. Returns whether the destination existed before,
/// which decides between `201 Created` and `204 No Content`.
pub(crate) async fn move_copy(
    src: &RealFile,
    dst: &RealFile,
    copy: bool,
    overwrite: bool,
    depth_infinity: bool,
) -> FsResult<bool> {
    trace!(
        "FS: {} {:?} -> {:?}",
        if copy { "copy" } else { "move" },
        src.path,
        dst.path
    );
    let existed = tokio::fs::metadata(&dst.path).await.is_ok();
    if existed && !overwrite {
        return Err(FsError::Exists);
    }

    let mut retried = false;
    loop {
        match single_call(&src.path, &dst.path, copy).await {
            Ok(()) => return Ok(existed),
            Err(FsError::IsDirectory | FsError::WouldMerge | FsError::NotADirectory)
                if overwrite && !retried =>
            {
                // replace the conflicting destination and try again, once.
                let mut scratch = Vec::new();
                delete_recursive(&dst.path, "/", &mut scratch).await?;
                retried = true;
            }
            Err(FsError::WouldRecurse) if copy => {
                if depth_infinity {
                    copy_recursive(&src.path, &dst.path, overwrite).await?;
                } else {
                    tokio::fs::create_dir_all(&dst.path).await?;
                }
                return Ok(existed);
            }
            Err(e) => return Err(e),
        }
    }
}
