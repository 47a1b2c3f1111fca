//! Zip export of files and directory subtrees.
//!
//! The zip is produced as a stream: entries are compressed as they are read
//! from storage and flushed to the async writer chunk by chunk, so neither
//! the archive nor a whole entry is ever held in memory and the writer does
//! not need to seek.

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{Seek, Write};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::constants::COPY_BUFFER_SIZE;
use crate::engine::Vfs;
use crate::error::{ResultExt, VfsError, VfsResult};
use crate::index::IteratorOptions;
use crate::model::name::parent_path;
use crate::model::{DirOrFile, FileDoc, content_disposition};

/// Content type of archive downloads.
pub const CONTENT_TYPE: &str = "application/zip";

/// A set of files and directories to export as one zip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    /// Archive name, without the `.zip` extension; also the root folder of
    /// every entry.
    pub name: String,
    /// Explicit file identifiers.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Paths of files or directories; directories are included recursively.
    #[serde(default)]
    pub files: Vec<String>,
    /// Set when the archive is registered in a download store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Compressed bytes waiting to be flushed to the async writer.
#[derive(Clone, Default)]
struct Spool(Arc<Mutex<Vec<u8>>>);

impl Spool {
    async fn flush_into<W: AsyncWrite + Unpin>(&self, out: &mut W) -> VfsResult<()> {
        let chunk = std::mem::take(&mut *self.0.lock());
        if !chunk.is_empty() {
            out.write_all(&chunk).await?;
        }
        Ok(())
    }
}

impl Write for Spool {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Archive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ids: Vec::new(),
            files: Vec::new(),
            expires_at: None,
        }
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }

    /// `Content-Disposition` header for serving this archive.
    pub fn content_disposition(&self) -> String {
        content_disposition("attachment", &format!("{}.zip", self.name))
    }

    /// Stream the archive into `out` and return it.
    ///
    /// Runs under the tenant read lock. Every identifier and path is
    /// resolved before the first byte is written, so an unknown or
    /// still-uploading one fails with `NotFound` and an empty output.
    /// Entries are then written as they are discovered, named
    /// `<name>/<path relative to the selected item's parent>`. An error
    /// after that point leaves a truncated stream behind.
    pub async fn write_zip<W>(&self, vfs: &Vfs, mut out: W) -> VfsResult<W>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let _guard = vfs.read_lock().await?;
        let selected = self.resolve(vfs).await?;

        let spool = Spool::default();
        let mut zip = ZipWriter::new_stream(spool.clone());
        let mut entries = 0usize;
        for item in selected {
            let base = parent_path(item.fullpath()).to_string();
            match item {
                DirOrFile::File(file) => {
                    self.write_file(vfs, &mut zip, &spool, &mut out, &base, &file).await?;
                    entries += 1;
                }
                DirOrFile::Directory(dir) => {
                    zip.add_directory(self.entry_name(&base, &dir.fullpath, true), dir_options(dir.updated_at))?;
                    entries += 1;
                    let mut stack = vec![vfs.index().dir_iterator(&dir, IteratorOptions::default())];
                    while let Some(iter) = stack.last_mut() {
                        match iter.next().await? {
                            Some(DirOrFile::Directory(child)) => {
                                zip.add_directory(
                                    self.entry_name(&base, &child.fullpath, true),
                                    dir_options(child.updated_at),
                                )?;
                                entries += 1;
                                stack.push(vfs.index().dir_iterator(&child, IteratorOptions::default()));
                            }
                            Some(DirOrFile::File(file)) => {
                                if !file.pending {
                                    self.write_file(vfs, &mut zip, &spool, &mut out, &base, &file).await?;
                                    entries += 1;
                                }
                            }
                            None => {
                                stack.pop();
                            }
                        }
                    }
                    spool.flush_into(&mut out).await?;
                }
            }
        }
        zip.finish()?;
        spool.flush_into(&mut out).await?;
        out.flush().await?;
        debug!(name = %self.name, entries, "archive written");
        Ok(out)
    }

    async fn resolve(&self, vfs: &Vfs) -> VfsResult<Vec<DirOrFile>> {
        let mut selected = Vec::with_capacity(self.ids.len() + self.files.len());
        for id in &self.ids {
            let file = vfs.file_by_id(id).await?;
            if file.pending {
                return Err(VfsError::not_found(file.fullpath));
            }
            selected.push(DirOrFile::File(file));
        }
        for path in &self.files {
            let item = vfs
                .dir_or_file_by_path(path)
                .await
                .context(|| format!("archiving {path}"))?;
            if let DirOrFile::File(file) = &item {
                if file.pending {
                    return Err(VfsError::not_found(path.as_str()));
                }
            }
            selected.push(item);
        }
        Ok(selected)
    }

    fn entry_name(&self, base: &str, fullpath: &str, is_dir: bool) -> String {
        let rel = fullpath
            .strip_prefix(base)
            .unwrap_or(fullpath)
            .trim_start_matches('/');
        if is_dir {
            format!("{}/{}/", self.name, rel)
        } else {
            format!("{}/{}", self.name, rel)
        }
    }

    async fn write_file<S, W>(
        &self,
        vfs: &Vfs,
        zip: &mut ZipWriter<S>,
        spool: &Spool,
        out: &mut W,
        base: &str,
        file: &FileDoc,
    ) -> VfsResult<()>
    where
        S: Write + Seek,
        W: AsyncWrite + Unpin,
    {
        let mut reader = vfs.open_file(file).await?;
        let mut options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip_time(file.updated_at));
        if file.executable {
            options = options.unix_permissions(0o755);
        }
        zip.start_file(self.entry_name(base, &file.fullpath, false), options)?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            zip.write_all(&buf[..n])?;
            spool.flush_into(out).await?;
        }
        Ok(())
    }
}

fn dir_options(at: DateTime<Utc>) -> SimpleFileOptions {
    SimpleFileOptions::default().last_modified_time(zip_time(at))
}

fn zip_time(at: DateTime<Utc>) -> zip::DateTime {
    let year = u16::try_from(at.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition() {
        let archive = Archive::new("test");
        assert_eq!(archive.content_disposition(), r#"attachment; filename="test.zip""#);
    }

    #[test]
    fn test_entry_names() {
        let archive = Archive::new("test");
        assert_eq!(archive.entry_name("/archive", "/archive/bar", true), "test/bar/");
        assert_eq!(
            archive.entry_name("/archive", "/archive/bar/baz/one.png", false),
            "test/bar/baz/one.png"
        );
        assert_eq!(archive.entry_name("/", "/top.txt", false), "test/top.txt");
    }

    #[test]
    fn test_zip_time_clamps() {
        let old = DateTime::parse_from_rfc3339("1970-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(zip_time(old).year(), 1980);
    }
}
