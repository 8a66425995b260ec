//! The ballot store: all the persisted rows of the election, in one SQLite file.
//!
//! Every operation opens its own connection, does its unit of work and closes it
//! again. Writers are serialized by SQLite: submissions run inside a
//! `BEGIN IMMEDIATE` transaction, and the `participants` / `used_tokens` primary
//! keys reject a second ballot for the same voter or code.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use snafu::prelude::*;

use crate::config::Voter;
use crate::schema::{self, SchemaStatus};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    #[snafu(display("Ballot store unavailable during {operation}: {source}"))]
    StoreUnavailable {
        source: rusqlite::Error,
        operation: &'static str,
    },
    #[snafu(display("Constraint violated during {operation}: {source}"))]
    ConstraintViolation {
        source: rusqlite::Error,
        operation: &'static str,
    },
    #[snafu(display(
        "Table {table} is missing the columns {missing:?}. Refusing to start; run `init --repair-schema` to drop it"
    ))]
    SchemaMismatch { table: String, missing: Vec<String> },
    #[snafu(display("Schema version {found} is newer than the supported version {supported}"))]
    UnsupportedVersion { found: i64, supported: i64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Sorts a failed write into the taxonomy above.
fn classify(source: rusqlite::Error, operation: &'static str) -> StoreError {
    let constraint = matches!(
        &source,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    );
    if constraint {
        StoreError::ConstraintViolation { source, operation }
    } else {
        StoreError::StoreUnavailable { source, operation }
    }
}

/// Outcome of `cast_ballot`.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum CastOutcome {
    Recorded { created_at: i64 },
    AlreadyVoted,
    TokenAlreadyUsed,
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct BallotStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl BallotStore {
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Points at the database file. Nothing is opened until the first operation.
    pub fn new(path: impl AsRef<Path>) -> BallotStore {
        BallotStore {
            path: path.as_ref().to_path_buf(),
            busy_timeout: BallotStore::DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(self, busy_timeout: Duration) -> BallotStore {
        BallotStore {
            path: self.path,
            busy_timeout,
        }
    }

    /// Points at the database file and brings its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<(BallotStore, SchemaStatus)> {
        let store = BallotStore::new(path);
        let status = store.initialize()?;
        Ok((store, status))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path).context(StoreUnavailableSnafu {
            operation: "open",
        })?;
        conn.busy_timeout(self.busy_timeout)
            .context(StoreUnavailableSnafu { operation: "open" })?;
        Ok(conn)
    }

    /// Creates the tables, or migrates an older layout in place.
    ///
    /// Never drops rows: a table with the wrong shape is a `SchemaMismatch` error.
    pub fn initialize(&self) -> StoreResult<SchemaStatus> {
        let mut conn = self.connect()?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .context(StoreUnavailableSnafu {
                operation: "set journal mode",
            })?;
        debug!("initialize: {} journal mode {}", self.path.display(), mode);
        let status = schema::migrate(&mut conn)?;
        info!("Ballot store {}: {:?}", self.path.display(), status);
        Ok(status)
    }

    /// Like `initialize`, but a table with the wrong shape is dropped and
    /// recreated. All the rows it held are lost.
    pub fn repair_schema(&self) -> StoreResult<SchemaStatus> {
        let mut conn = self.connect()?;
        schema::repair(&mut conn)
    }

    /// True if at least one vote row exists for this voter.
    pub fn has_voted(&self, voter: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        voter_has_voted(&conn, voter).context(StoreUnavailableSnafu {
            operation: "has_voted",
        })
    }

    pub fn token_used(&self, token: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        token_is_used(&conn, token).context(StoreUnavailableSnafu {
            operation: "token_used",
        })
    }

    /// Inserts one row per candidate, all with the same timestamp, as one unit.
    pub fn record_votes(&self, voter: &Voter, candidates: &[String]) -> StoreResult<i64> {
        let created_at = now_secs();
        if candidates.is_empty() {
            return Ok(created_at);
        }
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(StoreUnavailableSnafu {
                operation: "record_votes",
            })?;
        insert_votes(&tx, voter, candidates, created_at)
            .map_err(|e| classify(e, "record_votes"))?;
        tx.commit().map_err(|e| classify(e, "record_votes"))?;
        Ok(created_at)
    }

    /// Fails with `ConstraintViolation` if the token was already consumed.
    pub fn mark_token_consumed(&self, token: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO used_tokens (token, used_at) VALUES (?1, ?2)",
            params![token, now_secs()],
        )
        .map_err(|e| classify(e, "mark_token_consumed"))?;
        Ok(())
    }

    /// Checks eligibility, records the votes and consumes the voter's identity in
    /// a single transaction.
    ///
    /// Losing a race against a concurrent ballot for the same voter shows up as
    /// `AlreadyVoted` / `TokenAlreadyUsed`, never as a second ballot.
    pub fn cast_ballot(&self, voter: &Voter, candidates: &[String]) -> StoreResult<CastOutcome> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(StoreUnavailableSnafu {
                operation: "cast_ballot",
            })?;

        let (taken, refused) = match voter {
            Voter::Named(name) => (
                voter_has_voted(&tx, name).context(StoreUnavailableSnafu {
                    operation: "cast_ballot",
                })?,
                CastOutcome::AlreadyVoted,
            ),
            Voter::Token(code) => (
                token_is_used(&tx, code).context(StoreUnavailableSnafu {
                    operation: "cast_ballot",
                })?,
                CastOutcome::TokenAlreadyUsed,
            ),
        };
        if taken {
            debug!("cast_ballot: {} already took part", voter);
            return Ok(refused);
        }

        let created_at = now_secs();
        insert_votes(&tx, voter, candidates, created_at)
            .map_err(|e| classify(e, "cast_ballot"))?;
        let anchor = match voter {
            Voter::Named(name) => tx.execute(
                "INSERT INTO participants (voter, voted_at) VALUES (?1, ?2)",
                params![name, created_at],
            ),
            Voter::Token(code) => tx.execute(
                "INSERT INTO used_tokens (token, used_at) VALUES (?1, ?2)",
                params![code, created_at],
            ),
        };
        match anchor.map_err(|e| classify(e, "cast_ballot")) {
            Ok(_) => {}
            // Dropping the transaction rolls back the vote rows.
            Err(StoreError::ConstraintViolation { .. }) => return Ok(refused),
            Err(e) => return Err(e),
        }
        tx.commit().map_err(|e| classify(e, "cast_ballot"))?;
        Ok(CastOutcome::Recorded { created_at })
    }

    /// Vote counts per candidate, most votes first, ties by name. At most `n` rows.
    pub fn top(&self, n: u32) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT candidate, COUNT(*) AS cnt
                 FROM votes
                 GROUP BY candidate
                 ORDER BY cnt DESC, candidate ASC
                 LIMIT ?1",
            )
            .context(StoreUnavailableSnafu { operation: "top" })?;
        let rows = stmt
            .query_map(params![n as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })
            .context(StoreUnavailableSnafu { operation: "top" })?;
        rows.collect::<Result<Vec<_>, _>>()
            .context(StoreUnavailableSnafu { operation: "top" })
    }

    /// The members of `roster` without a vote row, sorted.
    pub fn non_voters(&self, roster: &[String]) -> StoreResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT voter FROM votes WHERE voter IS NOT NULL")
            .context(StoreUnavailableSnafu {
                operation: "non_voters",
            })?;
        let voted = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context(StoreUnavailableSnafu {
                operation: "non_voters",
            })?
            .collect::<Result<std::collections::HashSet<String>, _>>()
            .context(StoreUnavailableSnafu {
                operation: "non_voters",
            })?;
        let mut res: Vec<String> = roster
            .iter()
            .filter(|name| !voted.contains(*name))
            .cloned()
            .collect();
        res.sort();
        Ok(res)
    }

    /// Deletes every ballot and every consumed token. Returns the number of vote
    /// rows removed.
    pub fn reset(&self) -> StoreResult<u64> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context(StoreUnavailableSnafu { operation: "reset" })?;
        let removed = tx
            .execute("DELETE FROM votes", [])
            .context(StoreUnavailableSnafu { operation: "reset" })?;
        tx.execute_batch("DELETE FROM participants; DELETE FROM used_tokens;")
            .context(StoreUnavailableSnafu { operation: "reset" })?;
        tx.commit()
            .context(StoreUnavailableSnafu { operation: "reset" })?;
        info!("Reset: removed {} vote rows", removed);
        Ok(removed as u64)
    }
}

fn voter_has_voted(conn: &Connection, voter: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM votes WHERE voter = ?1 LIMIT 1",
        params![voter],
        |_| Ok(()),
    )
    .optional()
    .map(|x| x.is_some())
}

fn token_is_used(conn: &Connection, token: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM used_tokens WHERE token = ?1",
        params![token],
        |_| Ok(()),
    )
    .optional()
    .map(|x| x.is_some())
}

fn insert_votes(
    tx: &Transaction,
    voter: &Voter,
    candidates: &[String],
    created_at: i64,
) -> rusqlite::Result<()> {
    let (voter_col, token_col) = match voter {
        Voter::Named(name) => (Some(name.as_str()), None),
        Voter::Token(code) => (None, Some(code.as_str())),
    };
    let mut stmt = tx.prepare(
        "INSERT INTO votes (voter, token, candidate, created_at) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for name in candidates {
        stmt.execute(params![voter_col, token_col, name, created_at])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fresh_store() -> (TempDir, BallotStore) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let (store, status) = BallotStore::open(dir.path().join("votes.db")).unwrap();
        assert_eq!(status, SchemaStatus::Created);
        (dir, store)
    }

    fn names(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn initialize_twice_is_a_no_op() {
        let (_dir, store) = fresh_store();
        assert_eq!(store.initialize().unwrap(), SchemaStatus::UpToDate);
    }

    #[test]
    fn has_voted_after_record_votes() {
        let (_dir, store) = fresh_store();
        let ann = Voter::Named("Ann".to_string());
        assert!(!store.has_voted("Ann").unwrap());
        store.record_votes(&ann, &names(&["Bob", "Cid"])).unwrap();
        assert!(store.has_voted("Ann").unwrap());
        assert!(!store.has_voted("Bob").unwrap());
    }

    #[test]
    fn record_votes_with_no_candidates_writes_nothing() {
        let (_dir, store) = fresh_store();
        let ann = Voter::Named("Ann".to_string());
        store.record_votes(&ann, &[]).unwrap();
        assert!(!store.has_voted("Ann").unwrap());
        assert!(store.top(5).unwrap().is_empty());
    }

    #[test]
    fn mark_token_consumed_twice_is_a_constraint_violation() {
        let (_dir, store) = fresh_store();
        assert!(!store.token_used("T1").unwrap());
        store.mark_token_consumed("T1").unwrap();
        assert!(store.token_used("T1").unwrap());
        assert!(matches!(
            store.mark_token_consumed("T1"),
            Err(StoreError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn cast_ballot_refuses_second_ballot() {
        let (_dir, store) = fresh_store();
        let ann = Voter::Named("Ann".to_string());
        assert!(matches!(
            store.cast_ballot(&ann, &names(&["Bob"])).unwrap(),
            CastOutcome::Recorded { .. }
        ));
        assert_eq!(
            store.cast_ballot(&ann, &names(&["Cid"])).unwrap(),
            CastOutcome::AlreadyVoted
        );
        assert_eq!(store.top(5).unwrap(), vec![("Bob".to_string(), 1)]);
    }

    #[test]
    fn cast_ballot_with_token_consumes_it() {
        let (_dir, store) = fresh_store();
        let t1 = Voter::Token("T1".to_string());
        assert!(matches!(
            store.cast_ballot(&t1, &names(&["Bob"])).unwrap(),
            CastOutcome::Recorded { .. }
        ));
        assert!(store.token_used("T1").unwrap());
        assert_eq!(
            store.cast_ballot(&t1, &names(&["Bob"])).unwrap(),
            CastOutcome::TokenAlreadyUsed
        );
        assert_eq!(store.top(5).unwrap(), vec![("Bob".to_string(), 1)]);
    }

    #[test]
    fn anchor_conflict_rolls_back_the_votes() {
        let (_dir, store) = fresh_store();
        // A participant row with no votes, as left by a hand edit.
        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            "INSERT INTO participants (voter, voted_at) VALUES ('Ann', 1)",
            [],
        )
        .unwrap();
        drop(conn);

        let ann = Voter::Named("Ann".to_string());
        assert_eq!(
            store.cast_ballot(&ann, &names(&["Bob"])).unwrap(),
            CastOutcome::AlreadyVoted
        );
        assert!(store.top(5).unwrap().is_empty());
    }

    #[test]
    fn top_orders_by_count_then_name() {
        let (_dir, store) = fresh_store();
        let ballots: [(&str, &[&str]); 4] = [
            ("Ann", &["Dan", "Bob"]),
            ("Bob", &["Dan", "Cid"]),
            ("Cid", &["Bob", "Eve"]),
            ("Dan", &["Ann"]),
        ];
        for (voter, picks) in ballots {
            store
                .cast_ballot(&Voter::Named(voter.to_string()), &names(picks))
                .unwrap();
        }
        assert_eq!(
            store.top(3).unwrap(),
            vec![
                ("Bob".to_string(), 2),
                ("Dan".to_string(), 2),
                ("Ann".to_string(), 1)
            ]
        );
        assert_eq!(store.top(10).unwrap().len(), 5);
        assert!(store.top(0).unwrap().is_empty());
    }

    #[test]
    fn non_voters_are_sorted() {
        let (_dir, store) = fresh_store();
        let roster = names(&["Eve", "Bob", "Ann", "Cid"]);
        store
            .cast_ballot(&Voter::Named("Bob".to_string()), &names(&["Ann"]))
            .unwrap();
        assert_eq!(store.non_voters(&roster).unwrap(), names(&["Ann", "Cid", "Eve"]));
    }

    #[test]
    fn reset_clears_everything() {
        let (_dir, store) = fresh_store();
        store
            .cast_ballot(&Voter::Named("Ann".to_string()), &names(&["Bob", "Cid"]))
            .unwrap();
        store
            .cast_ballot(&Voter::Token("T1".to_string()), &names(&["Bob"]))
            .unwrap();

        assert_eq!(store.reset().unwrap(), 3);
        assert!(store.top(5).unwrap().is_empty());
        assert!(!store.has_voted("Ann").unwrap());
        assert!(!store.token_used("T1").unwrap());
        assert!(matches!(
            store
                .cast_ballot(&Voter::Named("Ann".to_string()), &names(&["Bob"]))
                .unwrap(),
            CastOutcome::Recorded { .. }
        ));
    }

    #[test]
    fn missing_directory_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = BallotStore::new(dir.path().join("no/such/dir/votes.db"));
        assert!(matches!(
            store.initialize(),
            Err(StoreError::StoreUnavailable { .. })
        ));
    }
}
