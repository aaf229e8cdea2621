//! Snapshot persistence.
//!
//! Each session is one pretty-printed JSON file in the data root, named by
//! its session code, holding the complete state. The root is also a git
//! repository ([`History`]), so every save that changed a file leaves a
//! commit behind.
//!
//! Everything here is synchronous; async callers wrap calls in
//! `tokio::task::spawn_blocking`.

mod history;

pub use history::{History, HistoryEntry};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use git2::Oid;
use thiserror::Error;

use crate::model::Model;
use crate::session::SessionCode;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt snapshot at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot serialize snapshot for {code}: {source}")]
    Encode {
        code: SessionCode,
        #[source]
        source: serde_json::Error,
    },

    #[error("session {code} already exists")]
    Exists { code: SessionCode },

    #[error(transparent)]
    Git(#[from] git2::Error),
}

/// Snapshot files plus their change history, rooted at one directory.
pub struct Store {
    root: PathBuf,
    history: History,
}

impl Store {
    /// Prepare a directory as a data root. Idempotent.
    pub fn init(root: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(root).map_err(|source| StoreError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        History::init(root)?;
        Ok(())
    }

    /// Open an initialized data root.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let history = History::open(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            history,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the session's snapshot file lives. The code is the file name,
    /// with no extension.
    pub fn snapshot_path(&self, code: &SessionCode) -> PathBuf {
        self.root.join(code.as_str())
    }

    /// Read and deserialize a session's snapshot.
    ///
    /// A missing file is an error; sessions are provisioned explicitly
    /// with [`Store::create`], never on first connect.
    pub fn load<M: Model>(&self, code: &SessionCode) -> Result<M, StoreError> {
        let path = self.snapshot_path(code);
        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let snapshot: M::Snapshot =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { path, source })?;
        Ok(M::load(snapshot))
    }

    /// Write already-rendered snapshot contents and version them.
    ///
    /// The file is written unconditionally. If its content ended up
    /// identical to the committed version no commit is made and the
    /// existing latest id is reused; otherwise the change is committed
    /// with `message`.
    pub fn save(
        &self,
        code: &SessionCode,
        contents: &str,
        message: &str,
    ) -> Result<Oid, StoreError> {
        let path = self.snapshot_path(code);
        fs::write(&path, contents).map_err(|source| StoreError::Io { path, source })?;

        if self.history.is_clean(code)? {
            let id = self.history.refresh_latest()?;
            // A clean tracked file implies at least one commit.
            id.ok_or_else(|| StoreError::Git(git2::Error::from_str("clean file with no history")))
        } else {
            Ok(self.history.record(code, message)?)
        }
    }

    /// Serialize a model's current state and [`save`](Store::save) it.
    pub fn save_state<M: Model>(
        &self,
        code: &SessionCode,
        state: &M,
        message: &str,
    ) -> Result<Oid, StoreError> {
        let contents = render_snapshot(state).map_err(|source| StoreError::Encode {
            code: code.clone(),
            source,
        })?;
        self.save(code, &contents, message)
    }

    /// Provision a new session with the model's initial state.
    pub fn create<M: Model>(&self, code: &SessionCode) -> Result<Oid, StoreError> {
        if self.snapshot_path(code).exists() {
            return Err(StoreError::Exists { code: code.clone() });
        }
        self.save_state(code, &M::init(), &format!("create {code}"))
    }

    /// Id of the most recent commit across the whole data root.
    pub fn latest(&self) -> Option<Oid> {
        self.history.latest()
    }

    /// Commits that changed this session, newest first.
    pub fn entries(
        &self,
        code: &SessionCode,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        Ok(self.history.entries(code, limit)?)
    }
}

/// On-disk form of a snapshot: pretty-printed, two-space indented JSON
/// with no trailing newline, so diffs between commits stay readable.
pub fn render_snapshot<M: Model>(state: &M) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&state.save())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Document, DocumentMutation};
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::init(dir.path()).unwrap();
        Store::open(dir.path()).unwrap()
    }

    fn code(s: &str) -> SessionCode {
        s.parse().unwrap()
    }

    #[test]
    fn test_create_then_load() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("fresh");

        store.create::<Document>(&code).unwrap();
        let doc: Document = store.load(&code).unwrap();
        assert!(doc.is_empty());

        assert!(matches!(
            store.create::<Document>(&code),
            Err(StoreError::Exists { .. })
        ));
    }

    #[test]
    fn test_load_missing_session_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.load::<Document>(&code("nope")),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_load_corrupt_snapshot_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("broken");
        fs::write(store.snapshot_path(&code), "{not json").unwrap();
        assert!(matches!(
            store.load::<Document>(&code),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_snapshot_file_is_pretty_printed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("pretty");

        let mut doc = Document::init();
        doc.apply(&DocumentMutation::Set {
            key: "count".into(),
            value: json!(1),
        });
        store.save_state(&code, &doc, "set\n\n[\"count\",1]").unwrap();

        let on_disk = fs::read_to_string(store.snapshot_path(&code)).unwrap();
        assert_eq!(on_disk, "{\n  \"count\": 1\n}");
    }

    #[test]
    fn test_changed_saves_commit_and_unchanged_saves_reuse() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("doc");

        let first = store.create::<Document>(&code).unwrap();
        assert_eq!(store.latest(), Some(first));
        assert_eq!(store.entries(&code, 10).unwrap().len(), 1);

        let mut doc = Document::init();
        doc.apply(&DocumentMutation::Set {
            key: "k".into(),
            value: json!("v"),
        });
        let second = store.save_state(&code, &doc, "set\n\n[\"k\",\"v\"]").unwrap();
        assert_ne!(second, first);
        assert_eq!(store.latest(), Some(second));
        assert_eq!(store.entries(&code, 10).unwrap().len(), 2);

        // Same state again: no new commit, same id handed back.
        let third = store.save_state(&code, &doc, "set\n\n[\"k\",\"v\"]").unwrap();
        assert_eq!(third, second);
        assert_eq!(store.latest(), Some(second));
        assert_eq!(store.entries(&code, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_commit_message_records_mutation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("msg");

        store.create::<Document>(&code).unwrap();
        let mut doc = Document::init();
        doc.apply(&DocumentMutation::Set {
            key: "count".into(),
            value: json!(2),
        });
        store
            .save_state(&code, &doc, "set\n\n[\"count\",2]")
            .unwrap();

        let entries = store.entries(&code, 10).unwrap();
        assert_eq!(entries[0].message, "set\n\n[\"count\",2]");
        assert_eq!(entries[1].message, format!("create {code}"));
    }

    #[test]
    fn test_entries_are_scoped_to_one_session() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = code("a");
        let b = code("b");

        store.create::<Document>(&a).unwrap();
        store.create::<Document>(&b).unwrap();

        let mut doc = Document::init();
        doc.apply(&DocumentMutation::Set {
            key: "only-b".into(),
            value: json!(true),
        });
        store.save_state(&b, &doc, "set\n\n[\"only-b\",true]").unwrap();

        assert_eq!(store.entries(&a, 10).unwrap().len(), 1);
        assert_eq!(store.entries(&b, 10).unwrap().len(), 2);
    }

    #[test]
    fn test_entries_respects_limit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let code = code("capped");

        store.create::<Document>(&code).unwrap();
        let mut doc = Document::init();
        for i in 0..3 {
            doc.apply(&DocumentMutation::Set {
                key: "k".into(),
                value: json!(i),
            });
            store
                .save_state(&code, &doc, &format!("set\n\n[\"k\",{i}]"))
                .unwrap();
        }

        assert_eq!(store.entries(&code, 2).unwrap().len(), 2);
        assert_eq!(store.entries(&code, 100).unwrap().len(), 4);
        assert!(store.entries(&code, 0).unwrap().is_empty());
    }

    #[test]
    fn test_open_without_init_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Store::open(dir.path()).is_err());
    }
}
