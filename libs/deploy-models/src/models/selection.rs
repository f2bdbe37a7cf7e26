//! Source selection configuration

use serde::{Deserialize, Serialize};

use crate::models::ids::RecordId;

/// How the id list of a [`Selection`] is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectMode {
    All,
    #[default]
    None,
    Include,
    Exclude,
}

/// Which source records of one kind a package should carry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub select: SelectMode,
    #[serde(default)]
    pub ids: Vec<RecordId>,
}

impl Selection {
    pub fn all() -> Self {
        Self {
            select: SelectMode::All,
            ids: Vec::new(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn include(ids: Vec<RecordId>) -> Self {
        Self {
            select: SelectMode::Include,
            ids,
        }
    }

    pub fn exclude(ids: Vec<RecordId>) -> Self {
        Self {
            select: SelectMode::Exclude,
            ids,
        }
    }

    /// True when the selection can never yield a record, so no query is needed
    pub fn selects_nothing(&self) -> bool {
        match self.select {
            SelectMode::None => true,
            SelectMode::Include => self.ids.is_empty(),
            SelectMode::All | SelectMode::Exclude => false,
        }
    }

    /// Whether a record with this id belongs to the selection
    pub fn admits(&self, id: &RecordId) -> bool {
        match self.select {
            SelectMode::All => true,
            SelectMode::None => false,
            SelectMode::Include => self.ids.contains(id),
            SelectMode::Exclude => !self.ids.contains(id),
        }
    }
}
