//! Entity kinds

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of entity kinds a package can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Account,
    App,
    Config,
    Notification,
    Object,
    Policy,
    Role,
    Script,
    ServiceAccount,
    Sms,
    Template,
    View,
}

impl Kind {
    pub const ALL: [Kind; 12] = [
        Kind::Account,
        Kind::App,
        Kind::Config,
        Kind::Notification,
        Kind::Object,
        Kind::Policy,
        Kind::Role,
        Kind::Script,
        Kind::ServiceAccount,
        Kind::Sms,
        Kind::Template,
        Kind::View,
    ];

    /// Order in which kinds are written; referenced kinds come first.
    pub const DEPLOY_ORDER: [Kind; 12] = [
        Kind::Account,
        Kind::Role,
        Kind::ServiceAccount,
        Kind::App,
        Kind::Sms,
        Kind::Config,
        Kind::Template,
        Kind::Notification,
        Kind::Policy,
        Kind::Object,
        Kind::Script,
        Kind::View,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Account => "account",
            Kind::App => "app",
            Kind::Config => "config",
            Kind::Notification => "notification",
            Kind::Object => "object",
            Kind::Policy => "policy",
            Kind::Role => "role",
            Kind::Script => "script",
            Kind::ServiceAccount => "service_account",
            Kind::Sms => "sms",
            Kind::Template => "template",
            Kind::View => "view",
        }
    }

    /// Position in [`Kind::DEPLOY_ORDER`]
    pub fn deploy_rank(&self) -> usize {
        Self::DEPLOY_ORDER
            .iter()
            .position(|k| k == self)
            .unwrap_or(Self::DEPLOY_ORDER.len())
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .find(|k| k.as_str() == s.to_lowercase())
            .copied()
            .ok_or_else(|| format!("Invalid kind: {}", s))
    }
}
