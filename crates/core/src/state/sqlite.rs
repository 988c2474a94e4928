use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection};

use super::{ItemState, StateError, StatePersistence};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS item_states (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_item_states_status ON item_states(status);
"#;

/// SQLite-backed item state persistence (one row per item).
pub struct SqlitePersistence {
    conn: Mutex<Connection>,
}

impl SqlitePersistence {
    /// Open (or create) the database file and its table.
    pub fn new(path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(path).map_err(|e| StateError::Persistence(e.to_string()))?;
        Self::init(conn)
    }

    /// In-memory database (useful for testing).
    pub fn in_memory() -> Result<Self, StateError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StateError::Persistence(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StateError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StateError::Persistence(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StatePersistence for SqlitePersistence {
    fn load(&self) -> Result<Vec<ItemState>, StateError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        let mut stmt = conn
            .prepare("SELECT data FROM item_states ORDER BY id")
            .map_err(|e| StateError::Persistence(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| StateError::Persistence(e.to_string()))?;

        let mut states = Vec::new();
        for row in rows {
            let data = row.map_err(|e| StateError::Persistence(e.to_string()))?;
            let state: ItemState = serde_json::from_str(&data)
                .map_err(|e| StateError::Persistence(format!("corrupt item row: {}", e)))?;
            states.push(state);
        }
        Ok(states)
    }

    fn persist(
        &self,
        changed: &[&ItemState],
        _all: &BTreeMap<String, ItemState>,
    ) -> Result<(), StateError> {
        if changed.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction()
            .map_err(|e| StateError::Persistence(e.to_string()))?;

        for state in changed {
            let data = serde_json::to_string(state)
                .map_err(|e| StateError::Persistence(e.to_string()))?;
            tx.execute(
                "INSERT INTO item_states (id, status, updated_at, data) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status,
                     updated_at = excluded.updated_at, data = excluded.data",
                params![
                    state.id,
                    state.status.as_str(),
                    state.updated_at.to_rfc3339(),
                    data
                ],
            )
            .map_err(|e| StateError::Persistence(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| StateError::Persistence(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
