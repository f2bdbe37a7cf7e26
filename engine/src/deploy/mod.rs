//! Package planning and deployment

pub mod plan;
pub mod runner;
pub mod stage;
