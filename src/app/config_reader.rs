use std::fs;
use std::path::{Path, PathBuf};

use ballot_box::ElectionRules;
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::app::*;

pub const DEFAULT_TITLE: &str = "Vote: Who do you want to work with the most?";
pub const DEFAULT_DATABASE: &str = "votes.db";

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    pub title: Option<String>,
    pub database: Option<String>,
    #[serde(rename = "adminSecret")]
    pub admin_secret: String,
    pub roster: Vec<String>,
    #[serde(rename = "maxChoices")]
    pub max_choices: Option<u32>,
    #[serde(rename = "showTopN")]
    pub show_top_n: Option<u32>,
    #[serde(rename = "forbiddenCandidate")]
    pub forbidden_candidate: Option<String>,
    #[serde(rename = "excludeSelf")]
    pub exclude_self: Option<bool>,
    pub tokens: Option<Vec<String>>,
}

impl ElectionConfig {
    pub fn title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    pub fn rules(&self) -> ElectionRules {
        let defaults = ElectionRules::DEFAULT_RULES;
        ElectionRules {
            max_choices: self.max_choices.unwrap_or(defaults.max_choices),
            show_top_n: self.show_top_n.unwrap_or(defaults.show_top_n),
            forbidden_candidate: match self.forbidden_candidate.clone() {
                Some(x) if x.is_empty() => None,
                x => x,
            },
            exclude_self: self.exclude_self.unwrap_or(defaults.exclude_self),
        }
    }

    /// The database file, relative to the directory of the configuration file.
    pub fn database_path(&self, config_path: &Path) -> PathBuf {
        let db = PathBuf::from(
            self.database
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
        );
        match config_path.parent() {
            Some(dir) if db.is_relative() => dir.join(db),
            _ => db,
        }
    }
}

pub fn read_config(path: &str) -> AppResult<ElectionConfig> {
    let contents = fs::read_to_string(path).context(OpeningConfigSnafu { path })?;
    let config: ElectionConfig =
        serde_json::from_str(contents.as_str()).context(ParsingConfigSnafu { path })?;
    debug!(
        "read config: {} names on the roster, token mode: {}",
        config.roster.len(),
        config.tokens.is_some()
    );
    Ok(config)
}
