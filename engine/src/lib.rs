//! envshift library
//!
//! Moves configuration and schema entities between tenant environments:
//! builds deployment packages, matches source records to target
//! counterparts, validates and commits writes, and restores backups.

pub mod backup;
pub mod contract;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod handlers;
pub mod logs;
pub mod storage;
pub mod utils;
