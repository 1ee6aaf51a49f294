//! Statements over the user directory table.
//!
//! Each function is a unit of work: pass the connection from `run`, or a
//! transaction handle (it dereferences to the connection).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::pool::PooledConnection;
use crate::transaction::{StatementError, StatementResult};

const INSERT_USER: &str = "INSERT INTO users_directory.users (username, email) VALUES (?, ?)";
const UPDATE_EMAIL: &str = "UPDATE users_directory.users SET email = ? WHERE username = ?";
const SELECT_USERS: &str = "SELECT id, username, email FROM users_directory.users";
const TRUNCATE_USERS: &str = "TRUNCATE TABLE users_directory.users";

/// A row of the user directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// Add a user.
pub fn insert_user(conn: &mut PooledConnection, username: &str, email: &str) -> StatementResult<usize> {
    conn.execute(INSERT_USER, &[json!(username), json!(email)])
}

/// Change a user's email, returning the number of rows updated.
pub fn update_email(conn: &mut PooledConnection, username: &str, email: &str) -> StatementResult<usize> {
    conn.execute(UPDATE_EMAIL, &[json!(email), json!(username)])
}

/// All users in insertion order.
pub fn select_users(conn: &mut PooledConnection) -> StatementResult<Vec<User>> {
    conn.query(SELECT_USERS, &[])?
        .into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row.into_iter().collect()))
                .map_err(|e| StatementError::msg(format!("malformed user row: {}", e)))
        })
        .collect()
}

/// Number of users.
pub fn count_users(conn: &mut PooledConnection) -> StatementResult<usize> {
    Ok(conn.query(SELECT_USERS, &[])?.len())
}

/// Remove every user, returning how many were removed.
pub fn truncate_users(conn: &mut PooledConnection) -> StatementResult<usize> {
    conn.execute(TRUNCATE_USERS, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSourceConfig;
    use crate::pool::{ConnectionError, DataSource};
    use crate::schema::{initialize_database, SchemaInitializer};
    use crate::store::ExecuteError;
    use crate::transaction::{TransactionContext, TransactionRunner};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn setup() -> TransactionRunner<DataSource> {
        let config = DataSourceConfig::new("mem:users_test", "sa", "secret")
            .max_pool_size(4)
            .connection_timeout(Duration::from_millis(100));
        initialize_database(config, &SchemaInitializer::bundled()).unwrap()
    }

    fn usernames(runner: &TransactionRunner<DataSource>) -> Vec<String> {
        runner
            .run(select_users)
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect()
    }

    fn assert_pool_idle(runner: &TransactionRunner<DataSource>) {
        assert_eq!(runner.provider().stats().active, 0);
    }

    #[test]
    fn test_transaction_inserts_both() {
        let runner = setup();
        runner
            .run_in_transaction(|tx| {
                insert_user(tx, "john_doe", "john.doe@example.com")?;
                insert_user(tx, "jane_doe", "jane.doe@example.com")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(usernames(&runner), vec!["john_doe", "jane_doe"]);
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_failure_after_inserts_keeps_neither() {
        let runner = setup();
        let err = runner
            .run_in_transaction(|tx| {
                insert_user(tx, "john_doe", "john.doe@example.com")?;
                insert_user(tx, "jane_doe", "jane.doe@example.com")?;
                Err(StatementError::msg("Simulated exception during statement execution"))
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "error during statement execution");
        assert!(usernames(&runner).is_empty());
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_nested_transaction_commits_all_three() {
        let runner = setup();
        runner
            .run_in_transaction(|outer| {
                insert_user(outer, "john_doe", "john.doe@example.com")?;
                outer.run_in_transaction(|inner| {
                    insert_user(inner, "jane_doe", "jane.doe@example.com")?;
                    Ok(())
                })?;
                insert_user(outer, "jake_doe", "jake.doe@example.com")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(usernames(&runner), vec!["john_doe", "jane_doe", "jake_doe"]);
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_nested_failure_discards_every_level() {
        let runner = setup();
        let mut reached_outer_tail = false;
        let err = runner
            .run_in_transaction(|outer| {
                insert_user(outer, "john_doe", "john.doe@example.com")?;
                outer.run_in_transaction(|inner| {
                    insert_user(inner, "jane_doe", "jane.doe@example.com")?;
                    Err(StatementError::msg("inner failure"))
                })?;
                reached_outer_tail = true;
                insert_user(outer, "jake_doe", "jake.doe@example.com")?;
                Ok(())
            })
            .unwrap_err();

        assert!(err.is_statement());
        assert!(!reached_outer_tail);
        assert!(usernames(&runner).is_empty());
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_update_count_visible_only_after_return() {
        let runner = setup();
        runner
            .run_in_transaction(|tx| {
                insert_user(tx, "john_doe", "john.doe@example.com")?;
                insert_user(tx, "jane_doe", "jane.doe@example.com")?;
                insert_user(tx, "jake_doe", "jake.doe@example.com")?;
                Ok(())
            })
            .unwrap();

        let observer = runner.provider().clone();
        let updated = runner
            .run_in_transaction_with_result(|tx| {
                let mut count = update_email(tx, "john_doe", "john.doe@gmail.com")?;
                count += update_email(tx, "jane_doe", "jane.doe@gmail.com")?;

                // Another connection still sees the old emails
                let mut other = observer.get_connection()?;
                let outside = select_users(&mut other)?;
                assert!(outside.iter().all(|u| u.email.ends_with("@example.com")));
                Ok(count)
            })
            .unwrap();

        assert_eq!(updated, 2);
        let users = runner.run(select_users).unwrap();
        assert_eq!(users[0].email, "john.doe@gmail.com");
        assert_eq!(users[1].email, "jane.doe@gmail.com");
        assert_eq!(users[2].email, "jake.doe@example.com");
    }

    #[test]
    fn test_constraint_violation_rolls_back_earlier_inserts() {
        let runner = setup();
        let err = runner
            .run_in_transaction(|tx| {
                insert_user(tx, "john_doe", "john.doe@example.com")?;
                insert_user(tx, "john_doe", "again@example.com")?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err.as_statement(),
            Some(StatementError::Execute(ExecuteError::DuplicateKey { .. }))
        ));
        assert_eq!(runner.run(count_users).unwrap(), 0);
    }

    #[test]
    fn test_swallowed_nested_failure_rolls_back() {
        let runner = setup();
        let err = runner
            .run_in_transaction(|outer| {
                insert_user(outer, "john_doe", "john.doe@example.com")?;
                let _ = outer.run_in_transaction(|inner| {
                    insert_user(inner, "jane_doe", "jane.doe@example.com")?;
                    Err(StatementError::msg("ignored by caller"))
                });
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err.as_statement(), Some(StatementError::RollbackOnly)));
        assert!(usernames(&runner).is_empty());
    }

    #[test]
    fn test_panic_in_nested_work_rolls_back() {
        let runner = setup();
        let mut ctx = TransactionContext::new();

        let result = catch_unwind(AssertUnwindSafe(|| {
            runner.run_in_context(&mut ctx, |outer| {
                insert_user(outer, "john_doe", "john.doe@example.com")?;
                outer.run_in_transaction(|inner| {
                    insert_user(inner, "jane_doe", "jane.doe@example.com")?;
                    panic!("unexpected state");
                })?;
                Ok(())
            })
        }));

        assert!(result.is_err());
        assert_eq!(ctx.depth(), -1);
        assert!(ctx.connection().is_none());
        assert!(usernames(&runner).is_empty());
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_run_applies_each_statement_immediately() {
        let runner = setup();
        let err = runner
            .run(|conn| {
                insert_user(conn, "john_doe", "john.doe@example.com")?;
                Err::<(), _>(StatementError::msg("no transaction to undo the insert"))
            })
            .unwrap_err();

        assert!(err.is_statement());
        assert_eq!(usernames(&runner), vec!["john_doe"]);
        assert_eq!(runner.run(truncate_users).unwrap(), 1);
        assert_eq!(runner.run(count_users).unwrap(), 0);
    }

    #[test]
    fn test_pool_exhausted_is_connection_error() {
        let runner = setup();
        let held: Vec<_> = (0..4)
            .map(|_| runner.provider().get_connection().unwrap())
            .collect();

        let err = runner.run_in_transaction(|_| Ok(())).unwrap_err();
        assert!(matches!(err.as_connection(), Some(ConnectionError::PoolExhausted { .. })));

        drop(held);
        runner.run_in_transaction(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_bad_credentials_is_connection_error() {
        let runner = setup();
        let wrong = DataSourceConfig::new("mem:users_test", "sa", "not-the-password");
        let intruder = TransactionRunner::new(
            DataSource::with_store(wrong, runner.provider().store().clone()).unwrap(),
        );

        let mut ran = false;
        let err = intruder
            .run_in_transaction(|_| {
                ran = true;
                Ok(())
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "error during database connection");
        assert!(!ran);
    }

    #[test]
    fn test_concurrent_transactions_are_all_or_nothing() {
        let runner = setup();
        let committed = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for worker in 0..4 {
                let runner = &runner;
                let committed = &committed;
                s.spawn(move || {
                    for i in 0..5 {
                        let result = runner.run_in_transaction(|tx| {
                            insert_user(tx, &format!("user_{}_{}", worker, i), "u@example.com")?;
                            tx.run_in_transaction(|inner| {
                                if i % 2 == 1 {
                                    return Err(StatementError::msg("odd rounds fail"));
                                }
                                insert_user(inner, &format!("extra_{}_{}", worker, i), "e@example.com")?;
                                Ok(())
                            })?;
                            Ok(())
                        });
                        match result {
                            Ok(()) => {
                                assert_eq!(i % 2, 0);
                                committed.fetch_add(1, Ordering::SeqCst);
                            }
                            // Lost the race to another worker's commit
                            Err(e) if e.is_connection() => {
                                assert!(e.as_connection().is_some_and(ConnectionError::is_retryable));
                            }
                            Err(e) => assert_eq!(i % 2, 1, "unexpected failure: {:?}", e),
                        }
                    }
                });
            }
        });

        // Every committed transaction landed both of its users, nothing else did
        let committed = committed.load(Ordering::SeqCst);
        assert!(committed >= 1);
        assert_eq!(runner.run(count_users).unwrap(), committed * 2);
        assert_pool_idle(&runner);
    }

    #[test]
    fn test_losing_commit_leaves_winner_intact() {
        let runner = setup();
        let rival = runner.provider().clone();

        let err = runner
            .run_in_transaction(|tx| {
                insert_user(tx, "john_doe", "john.doe@example.com")?;
                let mut other = rival.get_connection()?;
                insert_user(&mut other, "jane_doe", "jane.doe@example.com")?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err.as_connection(),
            Some(ConnectionError::CommitFailed(e)) if e.is_conflict()
        ));
        assert_eq!(usernames(&runner), vec!["jane_doe"]);
        assert_pool_idle(&runner);
    }
}
