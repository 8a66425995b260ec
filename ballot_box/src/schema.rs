//! Table layout and the versioned migrations of the ballot store.
//!
//! The version is tracked with `PRAGMA user_version`:
//! - 0: an empty file, or a legacy layout `votes(id, voter, candidate, created_at)`,
//!   where token elections store `token` in place of `voter`
//! - 1: the current layout below

use log::{debug, info, warn};
use rusqlite::{params, Connection, TransactionBehavior};
use snafu::prelude::*;

use crate::store::{StoreError, StoreResult, StoreUnavailableSnafu};

pub const SCHEMA_VERSION: i64 = 1;

/// Columns that any `votes` table must carry to be migrated in place.
const LEGACY_VOTE_COLUMNS: [&str; 3] = ["id", "candidate", "created_at"];

/// A legacy `votes` table identifies the ballot by one of these, or both.
const VOTER_COLUMNS: [&str; 2] = ["voter", "token"];

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS votes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    voter       TEXT,
    candidate   TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    token       TEXT
);

-- One row per named voter who cast a ballot.
CREATE TABLE IF NOT EXISTS participants (
    voter       TEXT PRIMARY KEY,
    voted_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS used_tokens (
    token       TEXT PRIMARY KEY,
    used_at     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_votes_voter ON votes(voter);
CREATE INDEX IF NOT EXISTS idx_votes_candidate ON votes(candidate);
"#;

/// What `initialize` found and did.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum SchemaStatus {
    UpToDate,
    Created,
    Migrated { from: i64 },
    /// The operator asked for a repair and the old rows were dropped.
    /// `discarded_tokens` codes were marked as used and are valid again.
    RepairedWithDataLoss {
        discarded_rows: u64,
        discarded_tokens: u64,
    },
}

pub(crate) fn user_version(conn: &Connection) -> StoreResult<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .context(StoreUnavailableSnafu {
            operation: "read schema version",
        })
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .context(StoreUnavailableSnafu {
            operation: "inspect schema",
        })?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .context(StoreUnavailableSnafu {
            operation: "inspect schema",
        })?;
    let rows = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .context(StoreUnavailableSnafu {
            operation: "inspect schema",
        })?;
    rows.collect::<Result<Vec<String>, _>>()
        .context(StoreUnavailableSnafu {
            operation: "inspect schema",
        })
}

fn missing_vote_columns(conn: &Connection) -> StoreResult<Vec<String>> {
    let present = table_columns(conn, "votes")?;
    let has = |col: &str| present.iter().any(|p| p == col);
    let mut missing: Vec<String> = Vec::new();
    for col in LEGACY_VOTE_COLUMNS {
        if !has(col) {
            missing.push(col.to_string());
        }
        // Reported in the position of the historical layout.
        if col == "id" && !VOTER_COLUMNS.iter().any(|c| has(*c)) {
            missing.push("voter".to_string());
        }
    }
    Ok(missing)
}

fn count_rows(conn: &Connection, table: &str) -> StoreResult<u64> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let count: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .context(StoreUnavailableSnafu {
            operation: "count rows",
        })?;
    Ok(count.max(0) as u64)
}

/// Brings the database to `SCHEMA_VERSION`.
///
/// Changes are additive only. A `votes` table that cannot be migrated in place is
/// reported as `SchemaMismatch` and left untouched.
pub(crate) fn migrate(conn: &mut Connection) -> StoreResult<SchemaStatus> {
    let version = user_version(conn)?;
    debug!("migrate: found schema version {}", version);
    ensure!(
        version <= SCHEMA_VERSION,
        crate::store::UnsupportedVersionSnafu {
            found: version,
            supported: SCHEMA_VERSION,
        }
    );

    let had_votes = table_exists(conn, "votes")?;
    if version == SCHEMA_VERSION {
        // Tables dropped by hand are recreated empty.
        conn.execute_batch(SCHEMA).context(StoreUnavailableSnafu {
            operation: "verify schema",
        })?;
        return Ok(SchemaStatus::UpToDate);
    }

    if had_votes {
        let missing = missing_vote_columns(conn)?;
        ensure!(
            missing.is_empty(),
            crate::store::SchemaMismatchSnafu {
                table: "votes",
                missing,
            }
        );
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context(StoreUnavailableSnafu {
            operation: "migrate",
        })?;
    if had_votes {
        let present = table_columns(&tx, "votes")?;
        for col in VOTER_COLUMNS {
            if !present.iter().any(|c| c == col) {
                tx.execute_batch(&format!("ALTER TABLE votes ADD COLUMN {} TEXT", col))
                    .context(StoreUnavailableSnafu {
                        operation: "migrate",
                    })?;
            }
        }
    }
    tx.execute_batch(SCHEMA).context(StoreUnavailableSnafu {
        operation: "migrate",
    })?;
    let backfilled = tx
        .execute(
            "INSERT OR IGNORE INTO participants (voter, voted_at)
             SELECT voter, MIN(created_at) FROM votes WHERE voter IS NOT NULL GROUP BY voter",
            [],
        )
        .context(StoreUnavailableSnafu {
            operation: "migrate",
        })?;
    let backfilled_tokens = tx
        .execute(
            "INSERT OR IGNORE INTO used_tokens (token, used_at)
             SELECT token, MIN(created_at) FROM votes WHERE token IS NOT NULL GROUP BY token",
            [],
        )
        .context(StoreUnavailableSnafu {
            operation: "migrate",
        })?;
    tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .context(StoreUnavailableSnafu {
            operation: "migrate",
        })?;
    tx.commit().context(StoreUnavailableSnafu {
        operation: "migrate",
    })?;

    if had_votes {
        info!(
            "Migrated ballot store from version {} to {} ({} voters and {} tokens carried over)",
            version, SCHEMA_VERSION, backfilled, backfilled_tokens
        );
        Ok(SchemaStatus::Migrated { from: version })
    } else {
        info!("Created ballot store schema version {}", SCHEMA_VERSION);
        Ok(SchemaStatus::Created)
    }
}

/// Drops every table and starts over with an empty schema.
///
/// This throws away all the recorded ballots. It only runs when the normal
/// migration refuses the file.
pub(crate) fn repair(conn: &mut Connection) -> StoreResult<SchemaStatus> {
    match migrate(conn) {
        Err(StoreError::SchemaMismatch { table, missing }) => {
            let discarded_rows = count_rows(conn, "votes")?;
            let discarded_tokens = count_rows(conn, "used_tokens")?;
            warn!(
                "Schema repair: table {} lacks columns {:?}, dropping it with {} rows; \
                 {} used tokens are forgotten and can vote again",
                table, missing, discarded_rows, discarded_tokens
            );
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context(StoreUnavailableSnafu {
                    operation: "repair schema",
                })?;
            tx.execute_batch(
                "DROP TABLE IF EXISTS votes;
                 DROP TABLE IF EXISTS participants;
                 DROP TABLE IF EXISTS used_tokens;",
            )
            .context(StoreUnavailableSnafu {
                operation: "repair schema",
            })?;
            tx.execute_batch(SCHEMA).context(StoreUnavailableSnafu {
                operation: "repair schema",
            })?;
            tx.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
                .context(StoreUnavailableSnafu {
                    operation: "repair schema",
                })?;
            tx.commit().context(StoreUnavailableSnafu {
                operation: "repair schema",
            })?;
            Ok(SchemaStatus::RepairedWithDataLoss {
                discarded_rows,
                discarded_tokens,
            })
        }
        other => other,
    }
}
