//! In-memory SQL store.
//!
//! A [`MemoryStore`] is the shared database that pooled connections talk to.
//! Statements run either directly against the shared state or against a
//! private [`Snapshot`], whose changed tables are installed in one step at
//! commit unless another connection changed them first.

mod error;
mod eval;
mod executor;
mod result;
mod table;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::sql::Statement;

pub use error::{ExecuteError, ExecuteResult};
pub use executor::StoreState;
pub use result::{QueryResult, ResultSet, Row};
pub use table::{Column, Table};

/// A private copy of the store, and the table versions it started from.
///
/// Work done on a snapshot is invisible to everyone else until
/// [`MemoryStore::commit`] installs it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    base: BTreeMap<String, u64>,
    state: StoreState,
    mutations: usize,
}

impl Snapshot {
    /// Execute a statement against the private copy.
    pub fn execute(&mut self, stmt: &Statement, params: &[Value]) -> ExecuteResult<QueryResult> {
        let result = self.state.execute(stmt, params)?;
        if stmt.is_mutation() {
            self.mutations += 1;
        }
        Ok(result)
    }

    /// Number of mutating statements executed so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    /// The private copy.
    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// Tables whose contents differ from the state the snapshot was taken of.
    pub fn changed_tables(&self) -> Vec<String> {
        self.state
            .versions()
            .iter()
            .filter(|(name, version)| self.base.get(*name) != Some(*version))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

struct StoreInner {
    state: RwLock<StoreState>,
    user: String,
    password: String,
}

/// Shared in-memory database guarded by owner credentials.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store owned by the given credentials.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(StoreState::new()),
                user: user.into(),
                password: password.into(),
            }),
        }
    }

    /// Check credentials presented by a connecting client.
    pub fn authenticate(&self, user: &str, password: &str) -> bool {
        self.inner.user == user && self.inner.password == password
    }

    /// Execute a statement directly against the shared state.
    pub fn execute(&self, stmt: &Statement, params: &[Value]) -> ExecuteResult<QueryResult> {
        if stmt.is_mutation() {
            self.inner.state.write().execute(stmt, params)
        } else {
            self.inner.state.read().query(stmt, params)
        }
    }

    /// Take a private copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.read().clone();
        Snapshot {
            base: state.versions().clone(),
            state,
            mutations: 0,
        }
    }

    /// Install the tables a snapshot changed, as one atomic step.
    ///
    /// Fails with [`ExecuteError::Conflict`], installing nothing, if any of
    /// those tables was changed on the store after the snapshot was taken.
    /// Returns the number of tables installed.
    pub fn commit(&self, snapshot: &Snapshot) -> ExecuteResult<usize> {
        let changed = snapshot.changed_tables();
        if changed.is_empty() {
            return Ok(0);
        }

        let mut state = self.inner.state.write();
        let conflicts: Vec<String> = changed
            .iter()
            .filter(|name| state.version(name) != snapshot.base.get(*name).copied())
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(ExecuteError::Conflict { tables: conflicts });
        }

        for name in &changed {
            state.install(name, &snapshot.state);
        }
        debug!(tables = ?changed, "installed snapshot");
        Ok(changed.len())
    }

    /// Names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        self.inner.state.read().table_names()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("user", &self.inner.user)
            .field("tables", &self.table_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Parser;
    use serde_json::json;

    fn exec(snapshot: &mut Snapshot, sql: &str) -> usize {
        snapshot
            .execute(&Parser::parse(sql).unwrap(), &[])
            .unwrap()
            .rows_affected()
    }

    fn exec_live(store: &MemoryStore, sql: &str) -> usize {
        store.execute(&Parser::parse(sql).unwrap(), &[]).unwrap().rows_affected()
    }

    fn setup() -> MemoryStore {
        let store = MemoryStore::new("admin", "secret");
        for stmt in Parser::parse_script(
            "CREATE TABLE accounts (id SERIAL PRIMARY KEY, owner TEXT NOT NULL UNIQUE);",
        )
        .unwrap()
        {
            store.execute(&stmt, &[]).unwrap();
        }
        store
    }

    fn count(store: &MemoryStore) -> usize {
        store
            .execute(&Parser::parse("SELECT * FROM accounts").unwrap(), &[])
            .unwrap()
            .into_result_set()
            .len()
    }

    #[test]
    fn test_authenticate() {
        let store = MemoryStore::new("admin", "secret");
        assert!(store.authenticate("admin", "secret"));
        assert!(!store.authenticate("admin", "wrong"));
        assert!(!store.authenticate("guest", "secret"));
    }

    #[test]
    fn test_commit_installs_snapshot() {
        let store = setup();
        let mut snapshot = store.snapshot();
        exec(&mut snapshot, "INSERT INTO accounts (owner) VALUES ('a')");
        exec(&mut snapshot, "INSERT INTO accounts (owner) VALUES ('b')");
        assert_eq!(snapshot.mutations(), 2);
        assert_eq!(snapshot.changed_tables(), vec!["accounts".to_string()]);

        assert_eq!(store.commit(&snapshot).unwrap(), 1);
        assert_eq!(count(&store), 2);

        // Ids are the ones the snapshot handed out
        let ids: Vec<Value> = store
            .execute(&Parser::parse("SELECT id FROM accounts ORDER BY id").unwrap(), &[])
            .unwrap()
            .into_result_set()
            .into_iter()
            .map(|row| row["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_commit_rejects_concurrent_change() {
        let store = setup();
        let mut snapshot = store.snapshot();
        assert_eq!(exec(&mut snapshot, "DELETE FROM accounts WHERE owner = 'a'"), 0);
        exec(&mut snapshot, "INSERT INTO accounts (owner) VALUES ('b')");

        exec_live(&store, "INSERT INTO accounts (owner) VALUES ('a')");

        let err = store.commit(&snapshot).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "concurrent modification of accounts");
        // The concurrent insert survives and nothing of the snapshot landed
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn test_commit_ignores_changes_to_other_tables() {
        let store = setup();
        exec_live(&store, "CREATE TABLE audit (id SERIAL PRIMARY KEY, note TEXT)");

        let mut snapshot = store.snapshot();
        exec(&mut snapshot, "INSERT INTO accounts (owner) VALUES ('a')");
        exec_live(&store, "INSERT INTO audit (note) VALUES ('elsewhere')");

        store.commit(&snapshot).unwrap();
        assert_eq!(count(&store), 1);
        assert_eq!(exec_live(&store, "DELETE FROM audit"), 1);
    }

    #[test]
    fn test_read_only_snapshot_commits_nothing() {
        let store = setup();
        let mut snapshot = store.snapshot();
        exec(&mut snapshot, "SELECT * FROM accounts");
        exec(&mut snapshot, "DELETE FROM accounts");
        exec_live(&store, "INSERT INTO accounts (owner) VALUES ('a')");

        assert_eq!(store.commit(&snapshot).unwrap(), 0);
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let store = setup();
        let mut snapshot = store.snapshot();
        snapshot
            .execute(&Parser::parse("INSERT INTO accounts (owner) VALUES ('a')").unwrap(), &[])
            .unwrap();
        assert_eq!(count(&store), 0);
    }
}
