use clap::{ArgGroup, Parser, Subcommand};

/// Command line front end for a one-off coworker vote.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The JSON file describing the election: roster, rules, admin secret
    /// and database location. See the manual of the ballot_box crate for the format.
    #[clap(short, long, value_parser, default_value = "election.json")]
    pub config: String,

    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Creates the database, or migrates an existing one.
    Init {
        /// Drops a votes table with the wrong columns instead of refusing to start.
        /// All the votes it holds are lost.
        #[clap(long, takes_value = false)]
        repair_schema: bool,
    },
    /// Lists the names a voter can pick from.
    Options {
        #[clap(long, value_parser)]
        voter: Option<String>,
    },
    /// Casts a ballot.
    #[clap(group(ArgGroup::new("identity").required(true).args(&["voter", "token"])))]
    Vote {
        /// (name) Your own name, as written in the roster.
        #[clap(long, value_parser)]
        voter: Option<String>,
        /// (code) A single-use voting code, for token elections.
        #[clap(long, value_parser)]
        token: Option<String>,
        /// The people you want to work with, most preferred first.
        #[clap(value_parser)]
        candidates: Vec<String>,
    },
    /// Shows the top candidates and who has not voted yet.
    Results {
        #[clap(long, value_parser, default_value = "")]
        password: String,
        /// Prints a JSON summary instead of text.
        #[clap(long, takes_value = false)]
        json: bool,
    },
    /// Deletes every ballot.
    Reset {
        #[clap(long, value_parser, default_value = "")]
        password: String,
        /// Required: confirms that all the votes should be deleted.
        #[clap(long, takes_value = false)]
        confirm: bool,
    },
}
