//! Consistency checker.
//!
//! Two passes, selectable independently:
//!
//! - **index integrity** checks the tree held by the document index alone:
//!   reserved directories, parent links, full paths, cycles, duplicates
//! - **files consistency** compares the index with the storage backend:
//!   missing content, orphaned content, size and checksum mismatches, and
//!   uploads abandoned for longer than [`FsckOptions::stale_after`]
//!
//! Findings are handed to a sink as they are found. Only the directory map
//! is held in memory; files and stored objects are streamed page by page.
//! Nothing is repaired.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::info;

use crate::constants::{
    INDEX_PAGE_SIZE, OBJECT_PAGE_SIZE, ROOT_DIR_ID, STALE_UPLOAD_AGE, TRASH_DIR_ID, TRASH_DIR_PATH,
};
use crate::engine::Vfs;
use crate::error::{VfsError, VfsResult};
use crate::index::{FindRequest, Selector};
use crate::model::name::join_path;
use crate::model::{DirDoc, DirOrFile, FileDoc};
use crate::storage::StoredObject;

/// Which passes to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsckOptions {
    pub index_integrity: bool,
    pub files_consistency: bool,
    /// Stop at the first finding.
    pub fail_fast: bool,
    /// Pending uploads and staged bytes older than this are reported.
    pub stale_after: Duration,
}

impl Default for FsckOptions {
    fn default() -> Self {
        Self {
            index_integrity: true,
            files_consistency: true,
            fail_fast: false,
            stale_after: STALE_UPLOAD_AGE,
        }
    }
}

impl FsckOptions {
    /// Build from command-line style flags; selecting no pass runs both.
    pub fn from_flags(index_integrity: bool, files_consistency: bool, fail_fast: bool) -> Self {
        let both = !index_integrity && !files_consistency;
        Self {
            index_integrity: index_integrity || both,
            files_consistency: files_consistency || both,
            fail_fast,
            stale_after: STALE_UPLOAD_AGE,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Kind of divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FsckKind {
    IndexMissingRoot,
    IndexMissingTrash,
    /// Parent does not exist; reported once per orphaned subtree.
    IndexOrphanTree,
    /// Parent exists but is not a directory.
    IndexBadParent,
    IndexBadFullpath,
    IndexCycle,
    IndexDuplicatePath,
    /// Indexed file without content.
    FileMissing,
    /// Content without an indexed file.
    IndexMissing,
    /// Content size or checksum differs from the index.
    ContentMismatch,
    /// A file still pending long after its upload started.
    StalePending,
    /// Upload bytes staged by the backend and never published nor discarded.
    StagingLeftover,
}

/// One finding, serialized as a single JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FsckLog {
    #[serde(rename = "type")]
    pub kind: FsckKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<DirOrFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<StoredObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl FsckLog {
    fn new(kind: FsckKind) -> Self {
        Self {
            kind,
            doc: None,
            content: None,
            detail: None,
        }
    }

    fn with_doc(mut self, doc: impl Into<DirOrFile>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    fn with_content(mut self, content: StoredObject) -> Self {
        self.content = Some(content);
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Totals of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsckSummary {
    pub findings: usize,
    pub documents: usize,
    pub objects: usize,
    /// Fail-fast cut the run short.
    pub stopped_early: bool,
}

impl FsckSummary {
    /// `Err(InconsistentState)` when anything was found.
    pub fn into_result(self) -> VfsResult<Self> {
        if self.findings > 0 {
            Err(VfsError::InconsistentState {
                findings: self.findings,
            })
        } else {
            Ok(self)
        }
    }
}

struct Reporter<F> {
    sink: F,
    fail_fast: bool,
    summary: FsckSummary,
}

impl<F: FnMut(FsckLog)> Reporter<F> {
    fn report(&mut self, log: FsckLog) -> ControlFlow<()> {
        self.summary.findings += 1;
        (self.sink)(log);
        if self.fail_fast {
            self.summary.stopped_early = true;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }
}

macro_rules! report {
    ($reporter:expr, $log:expr) => {
        if $reporter.report($log).is_break() {
            return Ok(ControlFlow::Break(()));
        }
    };
}

/// State of a directory's parent chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chain {
    Sound,
    Broken,
}

/// Run the selected passes, feeding every finding to `sink`.
///
/// Runs without the tenant lock against whatever the index and storage
/// show at the time, and never mutates either.
pub async fn fsck<F>(vfs: &Vfs, opts: FsckOptions, sink: F) -> VfsResult<FsckSummary>
where
    F: FnMut(FsckLog) + Send,
{
    let mut reporter = Reporter {
        sink,
        fail_fast: opts.fail_fast,
        summary: FsckSummary::default(),
    };
    if opts.index_integrity && check_index_integrity(vfs, &mut reporter).await?.is_break() {
        return Ok(reporter.summary);
    }
    if opts.files_consistency {
        check_files_consistency(vfs, opts.stale_after, &mut reporter).await?;
    }
    let summary = reporter.summary;
    info!(
        domain = %vfs.domain(),
        findings = summary.findings,
        documents = summary.documents,
        objects = summary.objects,
        "fsck finished"
    );
    Ok(summary)
}

async fn check_index_integrity<F: FnMut(FsckLog) + Send>(
    vfs: &Vfs,
    reporter: &mut Reporter<F>,
) -> VfsResult<ControlFlow<()>> {
    let docs = vfs.index().documents();

    let mut dirs: HashMap<String, DirDoc> = HashMap::new();
    let mut skip = 0;
    loop {
        let page = docs.all_docs(skip, INDEX_PAGE_SIZE).await?;
        skip += page.len();
        let done = page.len() < INDEX_PAGE_SIZE;
        for doc in page {
            if let DirOrFile::Directory(d) = doc {
                dirs.insert(d.id.clone(), d);
            }
        }
        if done {
            break;
        }
    }
    reporter.summary.documents = skip;

    match dirs.get(ROOT_DIR_ID) {
        Some(root) if root.fullpath == "/" => {}
        Some(root) => {
            report!(
                reporter,
                FsckLog::new(FsckKind::IndexMissingRoot)
                    .with_doc(root.clone())
                    .with_detail("root directory does not sit at /")
            );
        }
        None => report!(reporter, FsckLog::new(FsckKind::IndexMissingRoot)),
    }
    match dirs.get(TRASH_DIR_ID) {
        Some(trash) if trash.fullpath == TRASH_DIR_PATH && trash.dir_id == ROOT_DIR_ID => {}
        Some(trash) => {
            report!(
                reporter,
                FsckLog::new(FsckKind::IndexMissingTrash)
                    .with_doc(trash.clone())
                    .with_detail(format!("trash directory does not sit at {TRASH_DIR_PATH}"))
            );
        }
        None => report!(reporter, FsckLog::new(FsckKind::IndexMissingTrash)),
    }

    // Resolve every directory's parent chain once. A broken link is reported
    // where it breaks; everything below it is skipped.
    let mut chains: HashMap<String, Chain> = HashMap::new();
    if dirs.contains_key(ROOT_DIR_ID) {
        chains.insert(ROOT_DIR_ID.to_string(), Chain::Sound);
    }
    let mut ids: Vec<&String> = dirs.keys().collect();
    ids.sort_by(|a, b| dirs[*a].fullpath.cmp(&dirs[*b].fullpath).then(a.cmp(b)));
    for id in ids {
        if chains.contains_key(id.as_str()) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut current = id.as_str();
        let verdict = loop {
            if let Some(known) = chains.get(current) {
                break *known;
            }
            if !on_path.insert(current) {
                if let Some(dir) = dirs.get(current) {
                    report!(reporter, FsckLog::new(FsckKind::IndexCycle).with_doc(dir.clone()));
                }
                break Chain::Broken;
            }
            path.push(current);
            let Some(dir) = dirs.get(current) else {
                break Chain::Broken;
            };
            if dirs.contains_key(dir.dir_id.as_str()) {
                current = dir.dir_id.as_str();
                continue;
            }
            let kind = match docs.get(&dir.dir_id).await? {
                Some(_) => FsckKind::IndexBadParent,
                None => FsckKind::IndexOrphanTree,
            };
            report!(reporter, FsckLog::new(kind).with_doc(dir.clone()));
            break Chain::Broken;
        };
        for id in path {
            chains.insert(id.to_string(), verdict);
        }
    }

    // Full paths and duplicates of directories with a sound chain.
    let mut sound: Vec<&DirDoc> = dirs
        .values()
        .filter(|d| !d.is_root() && chains.get(d.id.as_str()) == Some(&Chain::Sound))
        .collect();
    sound.sort_by(|a, b| a.fullpath.cmp(&b.fullpath).then(a.id.cmp(&b.id)));
    for dir in sound {
        let parent = &dirs[dir.dir_id.as_str()];
        let expected = join_path(&parent.fullpath, &dir.name);
        if dir.fullpath != expected {
            report!(
                reporter,
                FsckLog::new(FsckKind::IndexBadFullpath)
                    .with_doc(dir.clone())
                    .with_detail(format!("expected {expected}"))
            );
        }
        if let ControlFlow::Break(()) = check_duplicate(vfs, reporter, &dir.id, &dir.fullpath, dir.clone().into()).await? {
            return Ok(ControlFlow::Break(()));
        }
    }

    // Files, streamed.
    let mut skip = 0;
    loop {
        let page = docs.all_docs(skip, INDEX_PAGE_SIZE).await?;
        skip += page.len();
        let done = page.len() < INDEX_PAGE_SIZE;
        for doc in page {
            let DirOrFile::File(file) = doc else {
                continue;
            };
            match chains.get(file.dir_id.as_str()) {
                Some(Chain::Sound) => {}
                Some(Chain::Broken) => continue,
                None => {
                    let kind = match docs.get(&file.dir_id).await? {
                        Some(_) => FsckKind::IndexBadParent,
                        None => FsckKind::IndexOrphanTree,
                    };
                    report!(reporter, FsckLog::new(kind).with_doc(file));
                    continue;
                }
            }
            let parent = &dirs[file.dir_id.as_str()];
            let expected = join_path(&parent.fullpath, &file.name);
            if file.fullpath != expected {
                report!(
                    reporter,
                    FsckLog::new(FsckKind::IndexBadFullpath)
                        .with_doc(file.clone())
                        .with_detail(format!("expected {expected}"))
                );
            }
            let id = file.id.clone();
            let path = file.fullpath.clone();
            if let ControlFlow::Break(()) = check_duplicate(vfs, reporter, &id, &path, file.into()).await? {
                return Ok(ControlFlow::Break(()));
            }
        }
        if done {
            break;
        }
    }
    Ok(ControlFlow::Continue(()))
}

/// Report `doc` when another document holds the same full path and sorts
/// before it, so each clash is reported once.
async fn check_duplicate<F: FnMut(FsckLog) + Send>(
    vfs: &Vfs,
    reporter: &mut Reporter<F>,
    id: &str,
    fullpath: &str,
    doc: DirOrFile,
) -> VfsResult<ControlFlow<()>> {
    let same = vfs
        .index()
        .documents()
        .find(&FindRequest::new(Selector::Fullpath(fullpath.to_string())).page(0, 2))
        .await?;
    if same.len() > 1 && same[0].id() != id {
        report!(
            reporter,
            FsckLog::new(FsckKind::IndexDuplicatePath)
                .with_doc(doc)
                .with_detail(format!("same path as {}", same[0].id()))
        );
    }
    Ok(ControlFlow::Continue(()))
}

async fn check_files_consistency<F: FnMut(FsckLog) + Send>(
    vfs: &Vfs,
    stale_after: Duration,
    reporter: &mut Reporter<F>,
) -> VfsResult<ControlFlow<()>> {
    let docs = vfs.index().documents();
    let storage = vfs.storage();
    let now = Utc::now();

    let mut skip = 0;
    loop {
        let page = docs.all_docs(skip, INDEX_PAGE_SIZE).await?;
        skip += page.len();
        let done = page.len() < INDEX_PAGE_SIZE;
        for doc in page {
            let DirOrFile::File(file) = doc else {
                continue;
            };
            if file.pending {
                if is_stale(now, file.updated_at, stale_after) {
                    report!(
                        reporter,
                        FsckLog::new(FsckKind::StalePending)
                            .with_detail(format!("pending since {}", file.updated_at.to_rfc3339()))
                            .with_doc(file)
                    );
                }
                continue;
            }
            match storage.stat(&file).await? {
                None => report!(reporter, FsckLog::new(FsckKind::FileMissing).with_doc(file)),
                Some(obj) => {
                    if let Some(detail) = content_mismatch(&file, &obj) {
                        report!(
                            reporter,
                            FsckLog::new(FsckKind::ContentMismatch)
                                .with_doc(file)
                                .with_content(obj)
                                .with_detail(detail)
                        );
                    }
                }
            }
        }
        if done {
            break;
        }
    }
    reporter.summary.documents = reporter.summary.documents.max(skip);

    let mut after: Option<String> = None;
    loop {
        let page = storage.list_objects_page(after.as_deref(), OBJECT_PAGE_SIZE).await?;
        let done = page.len() < OBJECT_PAGE_SIZE;
        after = page.last().map(|o| o.key.clone());
        reporter.summary.objects += page.len();
        for obj in page {
            let owner = match obj.doc_id.as_deref() {
                Some(id) => docs.get(id).await?.and_then(DirOrFile::into_file),
                None => None,
            };
            let referenced = owner.is_some_and(|f| storage.object_key(&f) == obj.key);
            if !referenced {
                report!(reporter, FsckLog::new(FsckKind::IndexMissing).with_content(obj));
            }
        }
        if done {
            break;
        }
    }

    for staged in storage.list_staged().await? {
        if is_stale(now, staged.modified, stale_after) {
            report!(
                reporter,
                FsckLog::new(FsckKind::StagingLeftover).with_detail(format!(
                    "{} ({} bytes, last written {})",
                    staged.name,
                    staged.size,
                    staged.modified.to_rfc3339()
                ))
            );
        }
    }
    Ok(ControlFlow::Continue(()))
}

fn is_stale(now: DateTime<Utc>, since: DateTime<Utc>, stale_after: Duration) -> bool {
    now.signed_duration_since(since).to_std().unwrap_or_default() >= stale_after
}

fn content_mismatch(file: &FileDoc, obj: &StoredObject) -> Option<String> {
    if file.size != Some(obj.size) {
        return Some(format!("size {:?} in index, {} stored", file.size, obj.size));
    }
    match &file.checksum {
        Some(sum) if *sum != obj.checksum => {
            Some(format!("checksum {sum} in index, {} stored", obj.checksum))
        }
        _ => None,
    }
}
