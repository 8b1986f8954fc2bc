use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// Administrative level of a territorial unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Department,
    Municipality,
    Township,
    UrbanCenter,
}

impl Level {
    pub const ALL: [Level; 4] = [
        Level::Department,
        Level::Municipality,
        Level::Township,
        Level::UrbanCenter,
    ];

    /// Levels that nest under a municipality and carry a parent name.
    pub fn is_parent_qualified(self) -> bool {
        matches!(self, Level::Township | Level::UrbanCenter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Department => "department",
            Level::Municipality => "municipality",
            Level::Township => "township",
            Level::UrbanCenter => "urban_center",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigError;

    /// Accepts the English names and the labels used in the source datasets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "department" | "departamento" => Ok(Level::Department),
            "municipality" | "municipio" => Ok(Level::Municipality),
            "township" | "vereda" => Ok(Level::Township),
            "urban_center" | "urban-center" | "cabecera" => Ok(Level::UrbanCenter),
            _ => Err(ConfigError::UnknownLevel(s.to_string())),
        }
    }
}

/// One row of the reference dataset, as stored (names not yet normalized).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerritorialRecord {
    pub level: Level,
    pub name: Option<String>,
    pub code: Option<String>,
    pub parent_name: Option<String>,
}

impl TerritorialRecord {
    /// Drops `parent_name` for levels that do not nest under a municipality.
    pub fn new(
        level: Level,
        name: Option<String>,
        code: Option<String>,
        parent_name: Option<String>,
    ) -> Self {
        let parent_name = if level.is_parent_qualified() {
            parent_name
        } else {
            None
        };
        Self {
            level,
            name,
            code,
            parent_name,
        }
    }
}

/// Which step of the lookup chain produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Context,
    Exact,
    Fuzzy,
    Sentinel,
    Unresolved,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Context => "context",
            Outcome::Exact => "exact",
            Outcome::Fuzzy => "fuzzy",
            Outcome::Sentinel => "sentinel",
            Outcome::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single `resolve` call. `code` is `None` only for `Unresolved`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub code: Option<String>,
    pub outcome: Outcome,
}

impl Resolution {
    pub fn matched(code: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            code: Some(code.into()),
            outcome,
        }
    }

    pub fn unresolved() -> Self {
        Self {
            code: None,
            outcome: Outcome::Unresolved,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.code.is_some()
    }
}
