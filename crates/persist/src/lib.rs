//! Steward persistence: observed state snapshots per resource in SQLite.
//! Only the latest three snapshots per resource are kept.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use steward_core::{FlatModel, LocalId};
use tracing::debug;

const KEEP: usize = 3;

/// One observed state of a resource instance. `key` identifies the instance
/// across runs: its local id, or the generate-name prefix before the store
/// has picked a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub kind: String,
    pub key: String,
    pub id: Option<LocalId>,
    pub rv: String,
    pub ts: i64,
    pub model: FlatModel,
}

pub trait StateStore {
    fn put_state(&self, rec: &StateRecord) -> Result<()>;
    /// Newest first.
    fn history(&self, kind: &str, key: &str, limit: Option<usize>) -> Result<Vec<StateRecord>>;
    fn remove(&self, kind: &str, key: &str) -> Result<usize>;

    fn latest(&self, kind: &str, key: &str) -> Result<Option<StateRecord>> {
        Ok(self.history(kind, key, Some(1))?.into_iter().next())
    }
}

/// SQLite-backed store. Simple, synchronous; the CLI is not latency sensitive.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("STEWARD_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS resource_state (
                kind  TEXT NOT NULL,
                key   TEXT NOT NULL,
                id    TEXT,
                rv    TEXT NOT NULL,
                ts    INTEGER NOT NULL,
                model BLOB NOT NULL
            )",
            [],
        )
        .context("creating resource_state table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_resource_state_key_ts ON resource_state(kind, key, ts DESC)",
            [],
        )
        .ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "state db open");
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("state db lock poisoned"))
    }
}

impl StateStore for SqliteStore {
    fn put_state(&self, rec: &StateRecord) -> Result<()> {
        let started = std::time::Instant::now();
        let model = serde_json::to_string(&rec.model).context("encoding model")?;
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO resource_state(kind, key, id, rv, ts, model) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (&rec.kind, &rec.key, rec.id.as_ref().map(|i| i.to_string()), &rec.rv, rec.ts, maybe_compress(&model)),
        )?;
        tx.execute(
            "DELETE FROM resource_state
             WHERE kind = ?1 AND key = ?2
               AND rowid NOT IN (
                   SELECT rowid FROM resource_state WHERE kind = ?1 AND key = ?2
                   ORDER BY ts DESC, rowid DESC LIMIT ?3
               )",
            (&rec.kind, &rec.key, KEEP as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn history(&self, kind: &str, key: &str, limit: Option<usize>) -> Result<Vec<StateRecord>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(KEEP);
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, rv, ts, model FROM resource_state WHERE kind = ?1 AND key = ?2
             ORDER BY ts DESC, rowid DESC LIMIT ?3",
        )?;
        let mut rows = stmt.query((kind, key, cap as i64))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: Option<String> = row.get(0)?;
            let blob: Vec<u8> = row.get(3)?;
            let model: FlatModel =
                serde_json::from_str(&maybe_decompress(&blob)).context("decoding stored model")?;
            out.push(StateRecord {
                kind: kind.to_string(),
                key: key.to_string(),
                id: id.map(|s| s.parse::<LocalId>()).transpose().context("decoding stored id")?,
                rv: row.get(1)?,
                ts: row.get(2)?,
                model,
            });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn remove(&self, kind: &str, key: &str) -> Result<usize> {
        let db = self.conn()?;
        let n = db.execute("DELETE FROM resource_state WHERE kind = ?1 AND key = ?2", (kind, key))?;
        counter!("persist_remove_total", 1u64);
        Ok(n)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".steward");
        let _ = std::fs::create_dir_all(&p);
        p.push("state.db");
        return p.to_string_lossy().to_string();
    }
    "steward.db".to_string()
}

pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

pub fn maybe_compress(text: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("STEWARD_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        if let Ok(packed) = zstd::encode_all(text.as_bytes(), lvl) {
            return packed;
        }
    }
    text.as_bytes().to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(tag: &str) -> String {
        let dir = std::env::temp_dir();
        let f = format!("steward-test-{tag}-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn rec(key: &str, i: i64) -> StateRecord {
        StateRecord {
            kind: "priority_class".into(),
            key: key.into(),
            id: Some(LocalId::cluster(key)),
            rv: format!("rv-{i}"),
            ts: i,
            model: FlatModel::new().with("value", i),
        }
    }

    #[test]
    fn put_history_rotate() {
        let s = SqliteStore::open(&temp_db("rotate")).unwrap();
        for i in 0..5 {
            s.put_state(&rec("high", i)).unwrap();
        }
        s.put_state(&rec("low", 9)).unwrap();
        let rows = s.history("priority_class", "high", None).unwrap();
        let rvs: Vec<_> = rows.iter().map(|r| r.rv.as_str()).collect();
        assert_eq!(rvs, vec!["rv-4", "rv-3", "rv-2"]);
        assert_eq!(rows[0].model.get_int("value").unwrap(), Some(4));
        assert_eq!(rows[0].id, Some(LocalId::cluster("high")));
    }

    #[test]
    fn remove_forgets_only_that_resource() {
        let s = SqliteStore::open(&temp_db("remove")).unwrap();
        s.put_state(&rec("high", 1)).unwrap();
        s.put_state(&rec("low", 1)).unwrap();
        assert_eq!(s.remove("priority_class", "high").unwrap(), 1);
        assert!(s.latest("priority_class", "high").unwrap().is_none());
        assert_eq!(s.latest("priority_class", "low").unwrap().map(|r| r.rv), Some("rv-1".to_string()));
    }
}
