//! Top-level error aggregation at the process boundary.
//!
//! Module-level errors (`RecipeDbError`, `ProtocolError`, ...) stay local and
//! are handled close to where they occur — this enum only exists for the
//! handful of call sites (startup, top-level dispatch) that need one
//! umbrella type, the way `persistence::Database`'s `rusqlite::Result`
//! bubbles into `game/mod.rs`.

use std::fmt;

use crate::net::message::TransportError;
use crate::recipe::RecipeDbError;
use crate::topology::TopologyError;

#[derive(Debug)]
pub enum CoordinatorError {
    RecipeDb(RecipeDbError),
    Topology(TopologyError),
    Transport(TransportError),
    Io(std::io::Error),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecipeDb(e) => write!(f, "recipe database: {e}"),
            Self::Topology(e) => write!(f, "topology: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {}

impl From<RecipeDbError> for CoordinatorError {
    fn from(e: RecipeDbError) -> Self {
        Self::RecipeDb(e)
    }
}

impl From<TopologyError> for CoordinatorError {
    fn from(e: TopologyError) -> Self {
        Self::Topology(e)
    }
}

impl From<TransportError> for CoordinatorError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
