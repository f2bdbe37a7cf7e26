//! Package models

pub mod ids;
pub mod kind;
pub mod package;
pub mod selection;
pub mod unit;
