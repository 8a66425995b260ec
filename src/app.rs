use log::{info, warn};

use ballot_box::admin::{Access, AdminGate};
use ballot_box::builder::{Builder, ConfigError};
use ballot_box::schema::SchemaStatus;
use ballot_box::store::{BallotStore, StoreError};
use ballot_box::*;
use snafu::prelude::*;

use std::path::Path;

use serde_json::json;
use serde_json::Value as JSValue;

use crate::app::config_reader::*;
use crate::args::{Args, Command};

pub mod config_reader;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("Error opening configuration file {path}: {source}"))]
    OpeningConfig {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing configuration file {path}: {source}"))]
    ParsingConfig {
        source: serde_json::Error,
        path: String,
    },
    #[snafu(display("Invalid election settings: {source}"))]
    InvalidElection { source: ConfigError },
    #[snafu(display("{source}"))]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    Submit { source: SubmitError },
    #[snafu(display("The HR password is required for this command"))]
    PasswordRequired,
    #[snafu(display("Wrong password"))]
    AccessDenied,
    #[snafu(display("Pass --confirm to delete all the votes"))]
    ResetNotConfirmed,
    #[snafu(display("Error writing the summary: {source}"))]
    WritingJson { source: serde_json::Error },
}

pub type AppResult<T> = Result<T, AppError>;

fn build_election(config: &ElectionConfig, store: BallotStore) -> AppResult<Election> {
    let mut builder = Builder::new(&config.rules())
        .context(InvalidElectionSnafu)?
        .roster(&config.roster)
        .context(InvalidElectionSnafu)?;
    if let Some(tokens) = &config.tokens {
        builder = builder.tokens(tokens).context(InvalidElectionSnafu)?;
    }
    builder.build(store).context(InvalidElectionSnafu)
}

fn check_password(gate: &AdminGate, password: &str) -> AppResult<()> {
    match gate.check(password) {
        Access::Granted => Ok(()),
        Access::NoAttempt => PasswordRequiredSnafu.fail(),
        Access::Denied => AccessDeniedSnafu.fail(),
    }
}

pub fn render_options(election: &Election, voter: &Voter) -> String {
    let mut out = format!(
        "Select up to {} people. Each person votes once.\n",
        election.rules().max_choices
    );
    if let Some(forbidden) = &election.rules().forbidden_candidate {
        out.push_str(&format!("Voting for {} is not allowed.\n", forbidden));
    }
    for name in election.candidate_options(voter) {
        out.push_str(&format!("  {}\n", name));
    }
    out
}

pub fn render_results(
    title: &str,
    top_n: u32,
    standings: &[Standing],
    non_voters: &[String],
) -> String {
    let mut out = format!("{}\n\nTop {} candidates\n", title, top_n);
    if standings.is_empty() {
        out.push_str("No votes yet\n");
    }
    for s in standings {
        out.push_str(&format!("#{} {} - {} votes\n", s.rank, s.candidate, s.votes));
    }
    out.push_str("\nNot voted yet\n");
    if non_voters.is_empty() {
        out.push_str("Everyone has voted\n");
    }
    for name in non_voters {
        out.push_str(&format!("- {}\n", name));
    }
    out
}

pub fn build_summary_js(
    title: &str,
    top_n: u32,
    standings: &[Standing],
    non_voters: &[String],
) -> JSValue {
    let results: Vec<JSValue> = standings
        .iter()
        .map(|s| json!({"rank": s.rank, "candidate": s.candidate, "votes": s.votes}))
        .collect();
    json!({
        "title": title,
        "topN": top_n,
        "results": results,
        "nonVoters": non_voters,
    })
}

fn run_init(store: &BallotStore, repair_schema: bool) -> AppResult<String> {
    let status = if repair_schema {
        store.repair_schema()
    } else {
        store.initialize()
    }
    .context(StoreSnafu)?;
    let msg = match status {
        SchemaStatus::UpToDate => "Database is up to date".to_string(),
        SchemaStatus::Created => format!("Created database {}", store.path().display()),
        SchemaStatus::Migrated { from } => {
            format!("Migrated database from schema version {}", from)
        }
        SchemaStatus::RepairedWithDataLoss {
            discarded_rows,
            discarded_tokens,
        } => {
            warn!(
                "Schema repaired, {} vote rows and {} used tokens were discarded",
                discarded_rows, discarded_tokens
            );
            format!(
                "Database repaired. {} previously recorded votes were discarded, \
                 {} used voting codes are valid again",
                discarded_rows, discarded_tokens
            )
        }
    };
    Ok(msg)
}

/// Runs one command and returns what should be printed.
pub fn run_command(config_path: &str, command: &Command) -> AppResult<String> {
    let config = read_config(config_path)?;
    let db_path = config.database_path(Path::new(config_path));
    info!("Using database {}", db_path.display());

    let open_election = || -> AppResult<Election> {
        let (store, _) = BallotStore::open(&db_path).context(StoreSnafu)?;
        build_election(&config, store)
    };
    let gate = AdminGate::new(&config.admin_secret);

    match command {
        Command::Init { repair_schema } => {
            run_init(&BallotStore::new(&db_path), *repair_schema)
        }
        Command::Options { voter } => {
            let voter = Voter::Named(voter.clone().unwrap_or_default());
            Ok(render_options(&open_election()?, &voter))
        }
        Command::Vote {
            voter,
            token,
            candidates,
        } => {
            let voter = match (voter, token) {
                (Some(name), _) => Voter::Named(name.trim().to_string()),
                (None, Some(code)) => Voter::Token(code.trim().to_string()),
                // clap requires one of the two
                (None, None) => Voter::Named(String::new()),
            };
            let ballot = Ballot {
                voter,
                candidates: candidates.clone(),
            };
            let receipt = open_election()?.submit(&ballot).context(SubmitSnafu)?;
            Ok(format!(
                "Your vote for {} has been recorded. Thank you!",
                receipt.candidates.join(", ")
            ))
        }
        Command::Results { password, json } => {
            check_password(&gate, password)?;
            let election = open_election()?;
            let standings = election.results().context(StoreSnafu)?;
            let non_voters = election.non_voters().context(StoreSnafu)?;
            let top_n = election.rules().show_top_n;
            if *json {
                let js = build_summary_js(&config.title(), top_n, &standings, &non_voters);
                serde_json::to_string_pretty(&js).context(WritingJsonSnafu)
            } else {
                Ok(render_results(
                    &config.title(),
                    top_n,
                    &standings,
                    &non_voters,
                ))
            }
        }
        Command::Reset { password, confirm } => {
            check_password(&gate, password)?;
            ensure!(*confirm, ResetNotConfirmedSnafu);
            let removed = open_election()?.reset().context(StoreSnafu)?;
            Ok(format!("All votes have been deleted ({} rows)", removed))
        }
    }
}

pub fn run(args: &Args) -> AppResult<()> {
    let out = run_command(&args.config, &args.command)?;
    println!("{}", out);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONFIG: &str = r#"{
        "title": "Who do you want to work with?",
        "adminSecret": "22",
        "roster": ["Ann", "Bob", "Cid", "Dan"],
        "maxChoices": 3,
        "showTopN": 2,
        "forbiddenCandidate": "Dan",
        "excludeSelf": true
    }"#;

    fn setup(config: &str) -> (TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("election.json");
        fs::write(&path, config).unwrap();
        let path = path.to_str().unwrap().to_string();
        run_command(
            &path,
            &Command::Init {
                repair_schema: false,
            },
        )
        .unwrap();
        (dir, path)
    }

    fn vote(path: &str, voter: &str, candidates: &[&str]) -> AppResult<String> {
        run_command(
            path,
            &Command::Vote {
                voter: Some(voter.to_string()),
                token: None,
                candidates: candidates.iter().map(|s| s.to_string()).collect(),
            },
        )
    }

    fn results(path: &str, password: &str) -> AppResult<String> {
        run_command(
            path,
            &Command::Results {
                password: password.to_string(),
                json: true,
            },
        )
    }

    #[test]
    fn vote_then_read_results() {
        let (_dir, path) = setup(CONFIG);
        vote(&path, "Ann", &["Bob", "Cid"]).unwrap();
        vote(&path, "Bob", &["Cid"]).unwrap();
        let err = vote(&path, "Ann", &["Cid"]).unwrap_err();
        assert_eq!(err.to_string(), "You have already voted");

        let js: JSValue = serde_json::from_str(&results(&path, "22").unwrap()).unwrap();
        assert_eq!(js["topN"], json!(2));
        assert_eq!(
            js["results"],
            json!([
                {"rank": 1, "candidate": "Cid", "votes": 2},
                {"rank": 2, "candidate": "Bob", "votes": 1},
            ])
        );
        assert_eq!(js["nonVoters"], json!(["Cid", "Dan"]));
    }

    #[test]
    fn voter_name_is_trimmed_like_a_token() {
        let (_dir, path) = setup(CONFIG);
        vote(&path, "Ann ", &["Bob"]).unwrap();
        let err = vote(&path, " Ann", &["Cid"]).unwrap_err();
        assert_eq!(err.to_string(), "You have already voted");
    }

    #[test]
    fn results_need_the_password() {
        let (_dir, path) = setup(CONFIG);
        assert!(matches!(
            results(&path, ""),
            Err(AppError::PasswordRequired)
        ));
        assert!(matches!(results(&path, "21"), Err(AppError::AccessDenied)));
    }

    #[test]
    fn reset_needs_confirmation() {
        let (_dir, path) = setup(CONFIG);
        vote(&path, "Ann", &["Bob"]).unwrap();
        let reset = |confirm: bool| {
            run_command(
                &path,
                &Command::Reset {
                    password: "22".to_string(),
                    confirm,
                },
            )
        };
        assert!(matches!(reset(false), Err(AppError::ResetNotConfirmed)));
        assert!(reset(true).is_ok());
        let js: JSValue = serde_json::from_str(&results(&path, "22").unwrap()).unwrap();
        assert_eq!(js["results"], json!([]));
        vote(&path, "Ann", &["Bob"]).unwrap();
    }

    #[test]
    fn token_election_from_config() {
        let (_dir, path) = setup(
            r#"{"adminSecret": "22", "roster": ["Ann", "Bob"], "tokens": ["K1", "K2"]}"#,
        );
        let by_token = |code: &str| {
            run_command(
                &path,
                &Command::Vote {
                    voter: None,
                    token: Some(code.to_string()),
                    candidates: vec!["Bob".to_string()],
                },
            )
        };
        assert!(by_token(" K1 ").is_ok());
        match by_token("K1") {
            Err(AppError::Submit { source }) => {
                assert_eq!(source.rejection(), Some(&Rejection::TokenAlreadyUsed))
            }
            x => panic!("unexpected {:?}", x),
        }
        match by_token("K9") {
            Err(AppError::Submit { source }) => {
                assert_eq!(source.rejection(), Some(&Rejection::InvalidToken))
            }
            x => panic!("unexpected {:?}", x),
        }
    }

    #[test]
    fn invalid_settings_are_reported() {
        let (_dir, path) = setup(r#"{"adminSecret": "22", "roster": ["Ann", "Ann"]}"#);
        assert!(matches!(
            vote(&path, "Ann", &["Ann"]),
            Err(AppError::InvalidElection { .. })
        ));
    }

    #[test]
    fn options_hide_self_and_forbidden() {
        let (_dir, path) = setup(CONFIG);
        let out = run_command(
            &path,
            &Command::Options {
                voter: Some("Ann".to_string()),
            },
        )
        .unwrap();
        assert!(out.contains("Select up to 3 people"));
        assert!(out.contains("  Bob\n"));
        assert!(out.contains("  Cid\n"));
        assert!(!out.contains("  Ann\n"));
        assert!(!out.contains("  Dan\n"));
    }

    #[test]
    fn init_refuses_then_repairs_a_broken_table() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("election.json");
        fs::write(&config_path, CONFIG).unwrap();
        let path = config_path.to_str().unwrap();

        // A file left behind by a tool that used another votes layout.
        let conn = rusqlite::Connection::open(dir.path().join("votes.db")).unwrap();
        conn.execute_batch(
            "CREATE TABLE votes (id INTEGER PRIMARY KEY, candidate TEXT);
             INSERT INTO votes (candidate) VALUES ('Bob');",
        )
        .unwrap();
        drop(conn);

        assert!(matches!(
            run_command(
                path,
                &Command::Init {
                    repair_schema: false
                }
            ),
            Err(AppError::Store {
                source: StoreError::SchemaMismatch { .. }
            })
        ));
        let out = run_command(
            path,
            &Command::Init {
                repair_schema: true,
            },
        )
        .unwrap();
        assert!(out.contains("1 previously recorded votes were discarded"));
        assert!(out.contains("0 used voting codes are valid again"));
        vote(path, "Ann", &["Bob"]).unwrap();
    }

    #[test]
    fn render_results_text() {
        let standings = vec![Standing {
            rank: 1,
            candidate: "Bob".to_string(),
            votes: 3,
        }];
        let out = render_results("Vote", 5, &standings, &[]);
        assert!(out.contains("Top 5 candidates"));
        assert!(out.contains("#1 Bob - 3 votes"));
        assert!(out.contains("Everyone has voted"));

        let out = render_results("Vote", 5, &[], &["Ann".to_string()]);
        assert!(out.contains("No votes yet"));
        assert!(out.contains("- Ann"));
    }
}
