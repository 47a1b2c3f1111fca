//! SQLite persistence for a tenant's document index.
//!
//! One row per document. The serialized document lives in `body`; the
//! columns next to it exist only to back the selector indexes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Transaction, params, params_from_iter};
use std::path::Path;

use super::{DocumentIndex, FindRequest, Selector, new_doc_id};
use crate::error::{VfsError, VfsResult};
use crate::model::DirOrFile;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS docs (
    id TEXT PRIMARY KEY,
    rev INTEGER NOT NULL,
    is_dir INTEGER NOT NULL,
    dir_id TEXT NOT NULL,
    name TEXT NOT NULL,
    fullpath TEXT NOT NULL,
    size INTEGER,
    trashed INTEGER NOT NULL DEFAULT 0,
    pending INTEGER NOT NULL DEFAULT 0,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_docs_parent ON docs(dir_id, is_dir DESC, name);
CREATE INDEX IF NOT EXISTS idx_docs_path ON docs(fullpath);
"#;

/// SQLite-backed document index.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex").finish_non_exhaustive()
    }
}

impl SqliteIndex {
    /// Open or create an index database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> VfsResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> VfsResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn stored_rev(tx: &Transaction<'_>, id: &str) -> VfsResult<Option<u64>> {
        let rev: Option<i64> = tx
            .query_row("SELECT rev FROM docs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(rev.map(|r| r as u64))
    }

    fn check_rev(tx: &Transaction<'_>, doc: &DirOrFile) -> VfsResult<()> {
        match Self::stored_rev(tx, doc.id())? {
            None => Err(VfsError::not_found(doc.id())),
            Some(stored) if Some(stored) != doc.rev() => Err(VfsError::conflict(format!(
                "{}: stored rev {}, got {:?}",
                doc.id(),
                stored,
                doc.rev()
            ))),
            Some(_) => Ok(()),
        }
    }

    fn write_row(tx: &Transaction<'_>, doc: &DirOrFile, insert: bool) -> VfsResult<()> {
        let body = serde_json::to_string(doc)?;
        let (size, trashed, pending) = match doc {
            DirOrFile::Directory(_) => (None, false, false),
            DirOrFile::File(f) => (f.size.map(|s| s as i64), f.trashed, f.pending),
        };
        let sql = if insert {
            "INSERT INTO docs (id, rev, is_dir, dir_id, name, fullpath, size, trashed, pending, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        } else {
            "UPDATE docs SET rev = ?2, is_dir = ?3, dir_id = ?4, name = ?5, fullpath = ?6,
                size = ?7, trashed = ?8, pending = ?9, body = ?10
             WHERE id = ?1"
        };
        tx.execute(
            sql,
            params![
                doc.id(),
                doc.rev().unwrap_or(0) as i64,
                doc.is_dir(),
                doc.dir_id(),
                doc.name(),
                doc.fullpath(),
                size,
                trashed,
                pending,
                body,
            ],
        )?;
        Ok(())
    }

    fn query_bodies(conn: &Connection, sql: &str, values: Vec<Value>) -> VfsResult<Vec<DirOrFile>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;
        let mut docs = Vec::new();
        for body in rows {
            docs.push(serde_json::from_str(&body?)?);
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentIndex for SqliteIndex {
    fn name(&self) -> &'static str {
        "sqlite-index"
    }

    async fn create(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        if doc.id().is_empty() {
            doc.set_id(new_doc_id());
        }
        let previous = doc.rev();
        doc.set_rev(1);
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let res = Self::write_row(&tx, doc, true).and_then(|_| tx.commit().map_err(Into::into));
        if let Err(e) = res {
            match previous {
                Some(r) => doc.set_rev(r),
                None => clear_rev(doc),
            }
            return Err(e);
        }
        Ok(())
    }

    async fn update(&self, doc: &mut DirOrFile) -> VfsResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::check_rev(&tx, doc)?;
        let mut next = doc.clone();
        next.set_rev(doc.rev().unwrap_or(0) + 1);
        Self::write_row(&tx, &next, false)?;
        tx.commit()?;
        *doc = next;
        Ok(())
    }

    async fn bulk_update(&self, docs: &mut [DirOrFile]) -> VfsResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut next = Vec::with_capacity(docs.len());
        for doc in docs.iter() {
            Self::check_rev(&tx, doc)?;
            let mut bumped = doc.clone();
            bumped.set_rev(doc.rev().unwrap_or(0) + 1);
            Self::write_row(&tx, &bumped, false)?;
            next.push(bumped);
        }
        tx.commit()?;
        for (doc, bumped) in docs.iter_mut().zip(next) {
            *doc = bumped;
        }
        Ok(())
    }

    async fn delete(&self, doc: &DirOrFile) -> VfsResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::check_rev(&tx, doc)?;
        tx.execute("DELETE FROM docs WHERE id = ?1", params![doc.id()])?;
        tx.commit()?;
        Ok(())
    }

    async fn get(&self, id: &str) -> VfsResult<Option<DirOrFile>> {
        let conn = self.conn.lock();
        let body: Option<String> = conn
            .query_row("SELECT body FROM docs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(Into::into))
            .transpose()
    }

    async fn find(&self, req: &FindRequest) -> VfsResult<Vec<DirOrFile>> {
        let (filter, order, mut values) = match &req.selector {
            Selector::Fullpath(path) => (
                "fullpath = ?",
                "fullpath, id",
                vec![Value::Text(path.clone())],
            ),
            Selector::Child { dir_id, name } => (
                "dir_id = ? AND name = ?",
                "id",
                vec![Value::Text(dir_id.clone()), Value::Text(name.clone())],
            ),
            Selector::Children(dir_id) => (
                "dir_id = ? AND id != ?",
                "is_dir DESC, name, id",
                vec![Value::Text(dir_id.clone()), Value::Text(dir_id.clone())],
            ),
            Selector::Descendants(path) => {
                let prefix = Selector::descendants_prefix(path);
                (
                    "substr(fullpath, 1, length(?)) = ? AND fullpath != ?",
                    "fullpath, id",
                    vec![
                        Value::Text(prefix.clone()),
                        Value::Text(prefix),
                        Value::Text(path.clone()),
                    ],
                )
            }
        };
        let sql = format!("SELECT body FROM docs WHERE {filter} ORDER BY {order} LIMIT ? OFFSET ?");
        values.push(Value::Integer(req.limit.map(|l| l as i64).unwrap_or(-1)));
        values.push(Value::Integer(req.skip as i64));

        let conn = self.conn.lock();
        Self::query_bodies(&conn, &sql, values)
    }

    async fn all_docs(&self, skip: usize, limit: usize) -> VfsResult<Vec<DirOrFile>> {
        let conn = self.conn.lock();
        Self::query_bodies(
            &conn,
            "SELECT body FROM docs ORDER BY id LIMIT ? OFFSET ?",
            vec![Value::Integer(limit as i64), Value::Integer(skip as i64)],
        )
    }

    async fn disk_usage(&self) -> VfsResult<u64> {
        let conn = self.conn.lock();
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM docs
             WHERE is_dir = 0 AND trashed = 0 AND pending = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(used as u64)
    }
}

fn clear_rev(doc: &mut DirOrFile) {
    match doc {
        DirOrFile::Directory(d) => d.rev = None,
        DirOrFile::File(f) => f.rev = None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ROOT_DIR_ID;
    use crate::model::{DirDoc, FileDoc};

    fn dir(name: &str, parent: &str, path: &str) -> DirOrFile {
        let mut d = DirDoc::new(name, parent).unwrap();
        d.fullpath = path.into();
        d.into()
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut root: DirOrFile = DirDoc::root().into();
        index.create(&mut root).await.unwrap();

        let mut a = dir("a", ROOT_DIR_ID, "/a");
        index.create(&mut a).await.unwrap();
        assert_eq!(a.rev(), Some(1));

        let fetched = index.get(a.id()).await.unwrap().unwrap();
        assert_eq!(fetched, a);

        let mut dup = root.clone();
        let err = index.create(&mut dup).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::AlreadyExists);

        index.delete(&a).await.unwrap();
        assert!(index.get(a.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revision_conflict() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut a = dir("a", ROOT_DIR_ID, "/a");
        index.create(&mut a).await.unwrap();
        let mut stale = a.clone();
        index.update(&mut a).await.unwrap();
        assert_eq!(a.rev(), Some(2));
        let err = index.update(&mut stale).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Conflict);
        assert_eq!(stale.rev(), Some(1));
    }

    #[tokio::test]
    async fn test_selectors() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut a = dir("a", ROOT_DIR_ID, "/a");
        index.create(&mut a).await.unwrap();
        let mut ab = dir("b", a.id(), "/a/b");
        index.create(&mut ab).await.unwrap();
        let mut other = dir("ab", ROOT_DIR_ID, "/ab");
        index.create(&mut other).await.unwrap();
        let mut f = FileDoc::new("z.txt", a.id()).unwrap().with_size(4);
        f.fullpath = "/a/z.txt".into();
        let mut f = DirOrFile::from(f);
        index.create(&mut f).await.unwrap();

        let found = index
            .find(&FindRequest::new(Selector::Fullpath("/a/b".into())))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), ab.id());

        let children = index
            .find(&FindRequest::new(Selector::Children(a.id().to_string())))
            .await
            .unwrap();
        let names: Vec<_> = children.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["b", "z.txt"]);

        let below = index
            .find(&FindRequest::new(Selector::Descendants("/a".into())))
            .await
            .unwrap();
        let paths: Vec<_> = below.iter().map(|d| d.fullpath()).collect();
        assert_eq!(paths, vec!["/a/b", "/a/z.txt"]);

        assert_eq!(index.disk_usage().await.unwrap(), 4);
        assert_eq!(index.all_docs(0, 10).await.unwrap().len(), 4);
        assert_eq!(index.all_docs(3, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_update_rolls_back() {
        let index = SqliteIndex::in_memory().unwrap();
        let mut a = dir("a", ROOT_DIR_ID, "/a");
        let mut b = dir("b", ROOT_DIR_ID, "/b");
        index.create(&mut a).await.unwrap();
        index.create(&mut b).await.unwrap();
        let stale_b = b.clone();
        index.update(&mut b).await.unwrap();

        let mut batch = vec![a.clone(), stale_b];
        assert!(index.bulk_update(&mut batch).await.is_err());
        assert_eq!(index.get(a.id()).await.unwrap().unwrap().rev(), Some(1));
    }
}
