use std::collections::{BTreeSet, HashSet};

use log::warn;
use snafu::prelude::*;

pub use crate::config::*;
use crate::store::BallotStore;
use crate::Election;

/// Problems with the election settings, found before the first ballot.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("The roster is empty"))]
    EmptyRoster,
    #[snafu(display("{name} appears more than once in the roster"))]
    DuplicateRosterName { name: String },
    #[snafu(display("The maximum number of choices must be at least 1"))]
    ZeroMaxChoices,
    #[snafu(display("The number of results to show must be at least 1"))]
    ZeroTopN,
    #[snafu(display("Token mode needs at least one voting code"))]
    EmptyTokenSet,
    #[snafu(display("A voting code appears more than once"))]
    DuplicateToken,
}

/// Assembles an [`Election`] from its rules, its roster and, for token elections,
/// the list of voting codes.
///
/// ```
/// use ballot_box::builder::Builder;
/// use ballot_box::store::BallotStore;
/// use ballot_box::{Ballot, ElectionRules};
///
/// let dir = tempfile::tempdir()?;
/// let (store, _) = BallotStore::open(dir.path().join("votes.db"))?;
/// let election = Builder::new(&ElectionRules::DEFAULT_RULES)?
///     .roster(&["Anna".to_string(), "Bob".to_string()])?
///     .build(store)?;
///
/// election.submit(&Ballot::named("Anna", &["Bob"]))?;
/// assert_eq!(election.top(1)?, vec![("Bob".to_string(), 1)]);
///
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Builder {
    pub(crate) _rules: ElectionRules,
    pub(crate) _roster: Vec<String>,
    pub(crate) _mode: VotingMode,
}

impl Builder {
    pub fn new(rules: &ElectionRules) -> Result<Builder, ConfigError> {
        ensure!(rules.max_choices > 0, ZeroMaxChoicesSnafu);
        ensure!(rules.show_top_n > 0, ZeroTopNSnafu);
        Ok(Builder {
            _rules: rules.clone(),
            _roster: Vec::new(),
            _mode: VotingMode::Identity,
        })
    }

    /// The people who can vote and be voted for, in display order.
    pub fn roster(self, names: &[String]) -> Result<Builder, ConfigError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for name in names {
            ensure!(
                seen.insert(name.as_str()),
                DuplicateRosterNameSnafu { name: name.clone() }
            );
        }
        Ok(Builder {
            _roster: names.to_vec(),
            ..self
        })
    }

    /// Switches the election to token mode with these single-use codes.
    pub fn tokens(self, codes: &[String]) -> Result<Builder, ConfigError> {
        ensure!(!codes.is_empty(), EmptyTokenSetSnafu);
        let set: BTreeSet<String> = codes.iter().cloned().collect();
        ensure!(set.len() == codes.len(), DuplicateTokenSnafu);
        Ok(Builder {
            _mode: VotingMode::Token(set),
            ..self
        })
    }

    pub fn build(self, store: BallotStore) -> Result<Election, ConfigError> {
        ensure!(!self._roster.is_empty(), EmptyRosterSnafu);
        if let Some(forbidden) = &self._rules.forbidden_candidate {
            if !self._roster.contains(forbidden) {
                warn!(
                    "Forbidden candidate {:?} is not on the roster, the rule has no effect",
                    forbidden
                );
            }
        }
        if self._rules.exclude_self && matches!(self._mode, VotingMode::Token(_)) {
            warn!("Self exclusion does not apply to anonymous token ballots");
        }
        Ok(Election {
            rules: self._rules,
            roster: self._roster,
            mode: self._mode,
            store,
        })
    }
}
