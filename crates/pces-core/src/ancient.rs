use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The ordering key a stream uses to decide which events are ancient.
///
/// A stream uses exactly one mode at a time. Both modes may coexist in the
/// same directory tree since their file names use different bound prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AncientMode {
    Generation,
    BirthRound,
}

impl AncientMode {
    pub(crate) fn lower_bound_prefix(self) -> &'static str {
        match self {
            AncientMode::Generation => "ming",
            AncientMode::BirthRound => "minr",
        }
    }

    pub(crate) fn upper_bound_prefix(self) -> &'static str {
        match self {
            AncientMode::Generation => "maxg",
            AncientMode::BirthRound => "maxr",
        }
    }

    /// Identify the mode from the prefix of a lower bound token.
    pub(crate) fn from_lower_bound_token(token: &str) -> Option<(Self, &str)> {
        [AncientMode::Generation, AncientMode::BirthRound]
            .into_iter()
            .find_map(|mode| {
                token
                    .strip_prefix(mode.lower_bound_prefix())
                    .map(|value| (mode, value))
            })
    }
}

impl fmt::Display for AncientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AncientMode::Generation => f.write_str("generation"),
            AncientMode::BirthRound => f.write_str("birth-round"),
        }
    }
}

impl FromStr for AncientMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(AncientMode::Generation),
            "birth-round" | "birth_round" | "birthround" => Ok(AncientMode::BirthRound),
            other => Err(format!("unknown ancient mode: {other}")),
        }
    }
}
