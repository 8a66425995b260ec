//! One preference vote among coworkers.
//!
//! Everyone on the roster casts a single ballot naming up to `max_choices`
//! coworkers. An administrator reads the tally and can start over. The rules are
//! checked by [`Election::submit`] and the rows live in a [`store::BallotStore`].

pub mod admin;
pub mod builder;
mod config;
pub mod manual;
pub mod schema;
pub mod store;

use std::collections::HashSet;

use log::{debug, info, warn};
use snafu::prelude::*;

pub use crate::config::*;
use crate::store::{BallotStore, CastOutcome, StoreError, StoreResult};

/// Why `submit` did not record a ballot.
#[derive(Debug, Snafu)]
pub enum SubmitError {
    /// The ballot breaks one of the election rules. Shown to the voter as is.
    #[snafu(display("{reason}"))]
    Rejected { reason: Rejection },
    /// The ballot was fine but could not be written. The voter may try again.
    #[snafu(display("The vote could not be saved: {source}"))]
    Store { source: StoreError },
}

impl SubmitError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            SubmitError::Rejected { reason } => Some(reason),
            SubmitError::Store { .. } => None,
        }
    }
}

fn reject<T>(ballot: &Ballot, reason: Rejection) -> Result<T, SubmitError> {
    warn!("Ballot from {} rejected: {:?}", ballot.voter, reason);
    RejectedSnafu { reason }.fail()
}

/// A running election: its fixed settings and the store holding the ballots.
///
/// Built with [`builder::Builder`]. Nothing in here changes after construction, so
/// one value can be shared by every caller.
#[derive(Debug)]
pub struct Election {
    pub(crate) rules: ElectionRules,
    pub(crate) roster: Vec<String>,
    pub(crate) mode: VotingMode,
    pub(crate) store: BallotStore,
}

impl Election {
    pub fn rules(&self) -> &ElectionRules {
        &self.rules
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn mode(&self) -> &VotingMode {
        &self.mode
    }

    pub fn store(&self) -> &BallotStore {
        &self.store
    }

    /// The names a voter can pick from, in roster order.
    pub fn candidate_options(&self, voter: &Voter) -> Vec<String> {
        self.roster
            .iter()
            .filter(|name| self.rules.forbidden_candidate.as_ref() != Some(*name))
            .filter(|name| match voter {
                Voter::Named(me) if self.rules.exclude_self => *name != me,
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Validates a ballot and records it.
    ///
    /// The checks run in a fixed order and only the first failure is reported:
    /// the selection itself, then the candidates, then the voter identity, then
    /// whether this voter or code already took part.
    pub fn submit(&self, ballot: &Ballot) -> Result<Receipt, SubmitError> {
        debug!("submit: {} -> {:?}", ballot.voter, ballot.candidates);
        self.check_selection(ballot)?;
        self.check_voter(ballot)?;

        let outcome = self
            .store
            .cast_ballot(&ballot.voter, &ballot.candidates)
            .context(StoreSnafu)?;
        match outcome {
            CastOutcome::Recorded { created_at } => {
                info!(
                    "Recorded ballot from {} with {} choices",
                    ballot.voter,
                    ballot.candidates.len()
                );
                Ok(Receipt {
                    voter: ballot.voter.clone(),
                    candidates: ballot.candidates.clone(),
                    created_at,
                })
            }
            CastOutcome::AlreadyVoted => reject(ballot, Rejection::AlreadyVoted),
            CastOutcome::TokenAlreadyUsed => reject(ballot, Rejection::TokenAlreadyUsed),
        }
    }

    fn check_selection(&self, ballot: &Ballot) -> Result<(), SubmitError> {
        let picks = &ballot.candidates;
        if picks.is_empty() {
            return reject(ballot, Rejection::EmptySelection);
        }
        if picks.len() > self.rules.max_choices as usize {
            return reject(
                ballot,
                Rejection::TooManyChoices {
                    max: self.rules.max_choices,
                    got: picks.len() as u32,
                },
            );
        }
        let mut seen: HashSet<&str> = HashSet::new();
        if let Some(dup) = picks.iter().find(|c| !seen.insert(c.as_str())) {
            return reject(ballot, Rejection::DuplicateCandidate(dup.clone()));
        }
        if let Some(unknown) = picks.iter().find(|c| !self.roster.contains(c)) {
            return reject(ballot, Rejection::UnknownCandidate(unknown.clone()));
        }
        if let Some(forbidden) = &self.rules.forbidden_candidate {
            if picks.contains(forbidden) {
                return reject(ballot, Rejection::ForbiddenCandidate(forbidden.clone()));
            }
        }
        if let Voter::Named(me) = &ballot.voter {
            if self.rules.exclude_self && picks.contains(me) {
                return reject(ballot, Rejection::SelfVote);
            }
        }
        Ok(())
    }

    fn check_voter(&self, ballot: &Ballot) -> Result<(), SubmitError> {
        match (&self.mode, &ballot.voter) {
            (VotingMode::Identity, Voter::Named(name)) => {
                if !self.roster.contains(name) {
                    return reject(ballot, Rejection::UnknownVoter(name.clone()));
                }
                if self.store.has_voted(name).context(StoreSnafu)? {
                    return reject(ballot, Rejection::AlreadyVoted);
                }
            }
            (VotingMode::Token(valid), Voter::Token(code)) => {
                if !valid.contains(code) {
                    return reject(ballot, Rejection::InvalidToken);
                }
                if self.store.token_used(code).context(StoreSnafu)? {
                    return reject(ballot, Rejection::TokenAlreadyUsed);
                }
            }
            _ => return reject(ballot, Rejection::WrongVoterKind),
        }
        Ok(())
    }

    pub fn has_voted(&self, voter: &Voter) -> StoreResult<bool> {
        match voter {
            Voter::Named(name) => self.store.has_voted(name),
            Voter::Token(code) => self.store.token_used(code),
        }
    }

    /// Vote counts, most votes first, ties by name. At most `n` rows.
    pub fn top(&self, n: u32) -> StoreResult<Vec<(String, u64)>> {
        self.store.top(n)
    }

    /// The top `show_top_n` candidates, ranked from 1.
    pub fn results(&self) -> StoreResult<Vec<Standing>> {
        let rows = self.store.top(self.rules.show_top_n)?;
        Ok(rows
            .into_iter()
            .enumerate()
            .map(|(idx, (candidate, votes))| Standing {
                rank: idx as u32 + 1,
                candidate,
                votes,
            })
            .collect())
    }

    /// Roster members who have not voted yet, sorted by name.
    pub fn non_voters(&self) -> StoreResult<Vec<String>> {
        self.store.non_voters(&self.roster)
    }

    /// Throws away every ballot and every consumed code.
    pub fn reset(&self) -> StoreResult<u64> {
        self.store.reset()
    }
}
