// ********* Input data structures ***********

use std::collections::BTreeSet;
use std::fmt::Display;

/// Who is casting a ballot.
///
/// A named voter is a member of the roster. A token is a single-use code handed out
/// to voters in elections that run in token mode, and carries no name.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum Voter {
    Named(String),
    Token(String),
}

impl Display for Voter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Voter::Named(name) => write!(f, "{}", name),
            // Tokens are credentials, only a prefix goes to the logs.
            Voter::Token(code) => {
                let prefix: String = code.chars().take(2).collect();
                write!(f, "token {}***", prefix)
            }
        }
    }
}

/// A ballot: the candidates picked by one voter, in the order they were picked.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Ballot {
    pub voter: Voter,
    pub candidates: Vec<String>,
}

impl Ballot {
    pub fn named(voter: &str, candidates: &[&str]) -> Ballot {
        Ballot {
            voter: Voter::Named(voter.to_string()),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn token(code: &str, candidates: &[&str]) -> Ballot {
        Ballot {
            voter: Voter::Token(code.to_string()),
            candidates: candidates.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ******** Output data structures *********

/// Returned after a ballot has been recorded.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Receipt {
    pub voter: Voter,
    pub candidates: Vec<String>,
    /// Seconds since the epoch, shared by all the rows of the ballot.
    pub created_at: i64,
}

/// One line of the results table.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Standing {
    /// 1-based
    pub rank: u32,
    pub candidate: String,
    pub votes: u64,
}

/// The reasons a ballot can be turned down.
///
/// Only the first violated rule is reported. The checks run in the order of the
/// variants below.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Rejection {
    EmptySelection,
    TooManyChoices { max: u32, got: u32 },
    DuplicateCandidate(String),
    UnknownCandidate(String),
    ForbiddenCandidate(String),
    SelfVote,
    /// A named voter who is not on the roster.
    UnknownVoter(String),
    /// A named voter in a token election, or a token in a named election.
    WrongVoterKind,
    AlreadyVoted,
    InvalidToken,
    TokenAlreadyUsed,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::EmptySelection => write!(f, "Please select at least one person"),
            Rejection::TooManyChoices { max, got } => {
                write!(f, "At most {} people can be selected ({} given)", max, got)
            }
            Rejection::DuplicateCandidate(name) => {
                write!(f, "{} was selected more than once", name)
            }
            Rejection::UnknownCandidate(name) => write!(f, "{} is not on the roster", name),
            Rejection::ForbiddenCandidate(name) => {
                write!(f, "Voting for {} is not allowed", name)
            }
            Rejection::SelfVote => write!(f, "You cannot vote for yourself"),
            Rejection::UnknownVoter(name) => write!(f, "{} is not on the roster", name),
            Rejection::WrongVoterKind => {
                write!(f, "This election does not accept this kind of voter identity")
            }
            Rejection::AlreadyVoted => write!(f, "You have already voted"),
            Rejection::InvalidToken => write!(f, "This voting code is not valid"),
            Rejection::TokenAlreadyUsed => write!(f, "This voting code has already been used"),
        }
    }
}

// ********* Configuration **********

/// The rules of the election, fixed at startup.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ElectionRules {
    /// Maximum number of candidates on one ballot.
    pub max_choices: u32,
    /// Number of rows in the results view.
    pub show_top_n: u32,
    /// A roster member nobody may vote for.
    pub forbidden_candidate: Option<String>,
    /// When set, a named voter may not pick themselves.
    pub exclude_self: bool,
}

impl ElectionRules {
    pub const DEFAULT_RULES: ElectionRules = ElectionRules {
        max_choices: 3,
        show_top_n: 5,
        forbidden_candidate: None,
        exclude_self: false,
    };
}

/// How voters identify themselves.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum VotingMode {
    /// Voters pick their own name from the roster.
    Identity,
    /// Voters present one of these single-use codes.
    Token(BTreeSet<String>),
}
