//! Bounded connection pool over a [`MemoryStore`].

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::{ConnectionError, ConnectionResult};
use super::provider::{Connection, ConnectionProvider};
use crate::config::{ConfigResult, DataSourceConfig};
use crate::sql::{Parser, Statement};
use crate::store::{ExecuteError, MemoryStore, QueryResult, ResultSet, Snapshot};
use crate::transaction::StatementResult;

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<usize>,
    created: usize,
    active: usize,
}

struct PoolInner {
    config: DataSourceConfig,
    store: MemoryStore,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl PoolInner {
    fn release(&self, id: usize) {
        let mut state = self.state.lock();
        state.idle.push(id);
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }
}

/// Pool occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Physical connections created so far.
    pub total: usize,
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Connections currently leased.
    pub active: usize,
}

/// A pooled data source: the connection provider used by the runner.
#[derive(Clone)]
pub struct DataSource {
    inner: Arc<PoolInner>,
}

impl DataSource {
    /// Create a data source over a fresh store owned by the configured user.
    pub fn new(config: DataSourceConfig) -> ConfigResult<Self> {
        let store = MemoryStore::new(&config.user, &config.password);
        Self::with_store(config, store)
    }

    /// Create a data source over an existing store.
    pub fn with_store(config: DataSourceConfig, store: MemoryStore) -> ConfigResult<Self> {
        config.validate()?;
        debug!(
            url = %config.url,
            max_pool_size = config.max_pool_size,
            "data source created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                store,
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
            }),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &DataSourceConfig {
        &self.inner.config
    }

    /// Get the underlying store.
    pub fn store(&self) -> &MemoryStore {
        &self.inner.store
    }

    /// Current pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats {
            total: state.created,
            idle: state.idle.len(),
            active: state.active,
        }
    }

    /// Get a connection, waiting up to the configured timeout for a free slot.
    pub fn get_connection(&self) -> ConnectionResult<PooledConnection> {
        let config = &self.inner.config;
        if !self.inner.store.authenticate(&config.user, &config.password) {
            return Err(ConnectionError::AuthenticationFailed(config.user.clone()));
        }

        let started = Instant::now();
        let deadline = started + config.acquire_timeout();
        let mut state = self.inner.state.lock();
        let id = loop {
            if let Some(id) = state.idle.pop() {
                break id;
            }
            if state.created < config.max_pool_size {
                state.created += 1;
                debug!(connection = state.created, "opened new physical connection");
                break state.created;
            }
            if self.inner.released.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
            {
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(waited_ms, "connection pool exhausted");
                return Err(ConnectionError::PoolExhausted { waited_ms });
            }
        };
        state.active += 1;
        drop(state);

        debug!(connection = id, "connection leased");
        Ok(PooledConnection {
            id,
            pool: Arc::clone(&self.inner),
            auto_commit: true,
            pending: None,
            leased_at: Instant::now(),
            closed: false,
        })
    }
}

impl ConnectionProvider for DataSource {
    type Connection = PooledConnection;

    fn acquire(&self) -> ConnectionResult<PooledConnection> {
        self.get_connection()
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("url", &self.inner.config.url)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection leased from a [`DataSource`].
///
/// With autocommit on, every statement applies to the store immediately.
/// With autocommit off, statements run against a private snapshot taken at
/// the first statement. Commit installs the tables it changed in one step,
/// and fails if another connection committed to any of them meanwhile.
pub struct PooledConnection {
    id: usize,
    pool: Arc<PoolInner>,
    auto_commit: bool,
    pending: Option<Snapshot>,
    leased_at: Instant,
    closed: bool,
}

impl PooledConnection {
    /// Execute a statement, returning the number of rows affected.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> StatementResult<usize> {
        Ok(self.run(sql, params)?.rows_affected())
    }

    /// Execute a query, returning its rows.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> StatementResult<ResultSet> {
        Ok(self.run(sql, params)?.into_result_set())
    }

    /// Execute every statement of a script, without parameters.
    pub fn execute_script(&mut self, script: &str) -> StatementResult<()> {
        self.ensure_open()?;
        let statements = Parser::parse_script(script).map_err(ExecuteError::from)?;
        for stmt in statements {
            self.run_statement(stmt, &[])?;
        }
        Ok(())
    }

    /// Number of mutations waiting for commit.
    pub fn pending_statements(&self) -> usize {
        self.pending.as_ref().map_or(0, Snapshot::mutations)
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> StatementResult<QueryResult> {
        self.ensure_open()?;
        debug!(connection = self.id, sql, "executing statement");
        let stmt = Parser::parse(sql).map_err(ExecuteError::from)?;
        self.run_statement(stmt, params)
    }

    fn run_statement(&mut self, stmt: Statement, params: &[Value]) -> StatementResult<QueryResult> {
        if self.auto_commit {
            return Ok(self.pool.store.execute(&stmt, params)?);
        }

        let store = &self.pool.store;
        let snapshot = self.pending.get_or_insert_with(|| store.snapshot());
        Ok(snapshot.execute(&stmt, params)?)
    }

    fn ensure_open(&self) -> ConnectionResult<()> {
        if self.closed {
            return Err(ConnectionError::Closed(self.id));
        }
        Ok(())
    }

    fn commit_pending(&mut self) -> ConnectionResult<()> {
        if let Some(snapshot) = self.pending.take() {
            let tables = self
                .pool
                .store
                .commit(&snapshot)
                .map_err(ConnectionError::CommitFailed)?;
            debug!(
                connection = self.id,
                statements = snapshot.mutations(),
                tables,
                "committed"
            );
        }
        Ok(())
    }
}

impl Connection for PooledConnection {
    fn id(&self) -> usize {
        self.id
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> ConnectionResult<()> {
        self.ensure_open()?;
        if enabled && !self.auto_commit {
            // Switching back on commits whatever is pending
            self.commit_pending()?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> ConnectionResult<()> {
        self.ensure_open()?;
        if self.auto_commit {
            return Err(ConnectionError::NotInTransaction);
        }
        self.commit_pending()
    }

    fn rollback(&mut self) -> ConnectionResult<()> {
        self.ensure_open()?;
        if self.auto_commit {
            return Err(ConnectionError::NotInTransaction);
        }
        if let Some(snapshot) = self.pending.take() {
            debug!(connection = self.id, statements = snapshot.mutations(), "rolled back");
        }
        Ok(())
    }

    fn close(&mut self) -> ConnectionResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Some(snapshot) = self.pending.take() {
            debug!(
                connection = self.id,
                statements = snapshot.mutations(),
                "discarding uncommitted work on close"
            );
        }
        self.auto_commit = true;
        self.closed = true;

        let held = self.leased_at.elapsed();
        let threshold = self.pool.config.leak_threshold();
        if !threshold.is_zero() && held > threshold {
            warn!(
                connection = self.id,
                held_ms = held.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "connection leak detection triggered"
            );
        }

        self.pool.release(self.id);
        debug!(connection = self.id, "connection returned to pool");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(connection = self.id, error = %e, "failed to close dropped connection");
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("auto_commit", &self.auto_commit)
            .field("pending", &self.pending_statements())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::StatementError;
    use serde_json::json;
    use std::time::Duration;

    fn data_source(max_pool_size: usize) -> DataSource {
        let config = DataSourceConfig::new("mem:test", "sa", "secret")
            .max_pool_size(max_pool_size)
            .connection_timeout(Duration::from_millis(50));
        let ds = DataSource::new(config).unwrap();
        ds.get_connection()
            .unwrap()
            .execute_script("CREATE TABLE users (id SERIAL PRIMARY KEY, username TEXT NOT NULL UNIQUE);")
            .unwrap();
        ds
    }

    fn count(ds: &DataSource) -> usize {
        ds.get_connection()
            .unwrap()
            .query("SELECT * FROM users", &[])
            .unwrap()
            .len()
    }

    #[test]
    fn test_pool_reuse() {
        let ds = data_source(5);
        assert_eq!(ds.stats(), PoolStats { total: 1, idle: 1, active: 0 });

        {
            let _a = ds.get_connection().unwrap();
            let _b = ds.get_connection().unwrap();
            assert_eq!(ds.stats(), PoolStats { total: 2, idle: 0, active: 2 });
        }

        assert_eq!(ds.stats(), PoolStats { total: 2, idle: 2, active: 0 });
    }

    #[test]
    fn test_pool_exhausted() {
        let ds = data_source(1);
        let _held = ds.get_connection().unwrap();

        let err = ds.get_connection().unwrap_err();
        assert!(matches!(err, ConnectionError::PoolExhausted { waited_ms } if waited_ms >= 50));
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let config = DataSourceConfig::new("mem:test", "sa", "")
            .max_pool_size(1)
            .connection_timeout(Duration::from_secs(5));
        let ds = DataSource::new(config).unwrap();
        let mut held = ds.get_connection().unwrap();
        let held_id = held.id();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| ds.get_connection().map(|c| c.id()));
            std::thread::sleep(Duration::from_millis(30));
            held.close().unwrap();
            assert_eq!(waiter.join().unwrap().unwrap(), held_id);
        });
    }

    #[test]
    fn test_bad_credentials() {
        let store = MemoryStore::new("owner", "right");
        let ds = DataSource::with_store(DataSourceConfig::new("mem:x", "owner", "wrong"), store)
            .unwrap();
        assert!(matches!(
            ds.get_connection().unwrap_err(),
            ConnectionError::AuthenticationFailed(u) if u == "owner"
        ));
        assert_eq!(ds.stats().total, 0);
    }

    #[test]
    fn test_uncommitted_work_is_private() {
        let ds = data_source(2);
        let mut conn = ds.get_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO users (username) VALUES (?)", &[json!("alice")])
            .unwrap();

        // Visible to its own connection, not to others
        assert_eq!(conn.query("SELECT * FROM users", &[]).unwrap().len(), 1);
        assert_eq!(count(&ds), 0);

        conn.commit().unwrap();
        assert_eq!(count(&ds), 1);
    }

    #[test]
    fn test_rollback_discards() {
        let ds = data_source(2);
        let mut conn = ds.get_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();
        assert_eq!(conn.pending_statements(), 1);

        conn.rollback().unwrap();
        assert_eq!(conn.pending_statements(), 0);
        conn.set_auto_commit(true).unwrap();
        assert_eq!(count(&ds), 0);
    }

    #[test]
    fn test_enabling_autocommit_commits_pending() {
        let ds = data_source(2);
        let mut conn = ds.get_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();
        conn.set_auto_commit(true).unwrap();
        assert_eq!(count(&ds), 1);
    }

    #[test]
    fn test_close_discards_pending_and_restores_autocommit() {
        let ds = data_source(1);
        let mut conn = ds.get_connection().unwrap();
        conn.set_auto_commit(false).unwrap();
        conn.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert!(conn.is_closed());
        assert!(conn.auto_commit());
        drop(conn);

        let next = ds.get_connection().unwrap();
        assert!(next.auto_commit());
        drop(next);
        assert_eq!(count(&ds), 0);
    }

    #[test]
    fn test_conflicting_commit_fails_atomically() {
        let ds = data_source(2);
        let mut first = ds.get_connection().unwrap();
        let mut second = ds.get_connection().unwrap();
        first.set_auto_commit(false).unwrap();
        second.set_auto_commit(false).unwrap();

        first.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();
        second.execute("INSERT INTO users (username) VALUES ('bob')", &[]).unwrap();
        second.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, ConnectionError::CommitFailed(ref e) if e.is_conflict()));
        assert!(err.is_retryable());

        drop(first);
        drop(second);
        assert_eq!(count(&ds), 1);
    }

    #[test]
    fn test_commit_never_touches_rows_the_transaction_did_not_see() {
        let ds = data_source(2);
        let mut tx = ds.get_connection().unwrap();
        let mut other = ds.get_connection().unwrap();
        tx.set_auto_commit(false).unwrap();

        assert_eq!(tx.execute("DELETE FROM users", &[]).unwrap(), 0);
        other.execute("INSERT INTO users (username) VALUES ('bob')", &[]).unwrap();

        // Nothing was deleted in the transaction, so nothing is deleted now
        tx.commit().unwrap();
        assert_eq!(count(&ds), 1);

        assert_eq!(tx.execute("DELETE FROM users", &[]).unwrap(), 1);
        other.execute("INSERT INTO users (username) VALUES ('carol')", &[]).unwrap();
        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::CommitFailed(ExecuteError::Conflict { ref tables }) if tables == &["users"]
        ));
        assert_eq!(count(&ds), 2);
    }

    #[test]
    fn test_commit_keeps_serial_ids_seen_in_transaction() {
        let ds = data_source(2);
        let mut tx = ds.get_connection().unwrap();
        tx.set_auto_commit(false).unwrap();
        tx.execute("INSERT INTO users (username) VALUES ('alice')", &[]).unwrap();
        let seen = tx.query("SELECT id FROM users", &[]).unwrap();
        tx.commit().unwrap();
        tx.set_auto_commit(true).unwrap();

        let committed = tx.query("SELECT id FROM users", &[]).unwrap();
        assert_eq!(seen, committed);
    }

    #[test]
    fn test_commit_requires_transaction() {
        let ds = data_source(1);
        let mut conn = ds.get_connection().unwrap();
        assert!(matches!(conn.commit(), Err(ConnectionError::NotInTransaction)));
        assert!(matches!(conn.rollback(), Err(ConnectionError::NotInTransaction)));
    }

    #[test]
    fn test_closed_connection_rejects_statements() {
        let ds = data_source(1);
        let mut conn = ds.get_connection().unwrap();
        conn.close().unwrap();

        let err = conn.query("SELECT * FROM users", &[]).unwrap_err();
        assert!(matches!(err, StatementError::Connection(ConnectionError::Closed(_))));
        assert!(matches!(conn.set_auto_commit(false), Err(ConnectionError::Closed(_))));
    }
}
