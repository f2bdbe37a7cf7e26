//! Local storage for settings, backups and logs

pub mod layout;
pub mod settings;
