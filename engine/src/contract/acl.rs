//! Access-control entries and their remapping into the target environment

use deploy_models::{Dependency, Kind, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::builtins::is_builtin_principal;
use crate::contract::resolve::Resolver;
use crate::errors::MigrationError;

/// Principal type of an entry, stored as 1, 2 or 3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTargetType {
    Account,
    Reserved,
    Role,
}

impl AccessTargetType {
    pub fn code(&self) -> u8 {
        match self {
            AccessTargetType::Account => 1,
            AccessTargetType::Reserved => 2,
            AccessTargetType::Role => 3,
        }
    }
}

impl TryFrom<u8> for AccessTargetType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(AccessTargetType::Account),
            2 => Ok(AccessTargetType::Reserved),
            3 => Ok(AccessTargetType::Role),
            _ => Err(format!("Invalid access target type: {}", code)),
        }
    }
}

impl Serialize for AccessTargetType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for AccessTargetType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        AccessTargetType::try_from(code).map_err(serde::de::Error::custom)
    }
}

/// A principal id or an access level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AclValue {
    Level(i64),
    Id(RecordId),
}

impl AclValue {
    /// The id when it has identifier shape
    pub fn as_id(&self) -> Option<&RecordId> {
        match self {
            AclValue::Id(id) if RecordId::looks_like_id(id.as_str()) => Some(id),
            _ => None,
        }
    }
}

/// One access-control entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    #[serde(rename = "type")]
    pub target_type: AccessTargetType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AclValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<AclValue>,
}

/// Parse an ACL list; a missing or null value reads as empty
pub fn parse_acl(value: Option<&Value>) -> Result<Vec<AclEntry>, MigrationError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

pub fn acl_to_value(entries: &[AclEntry]) -> Value {
    serde_json::to_value(entries).unwrap_or(Value::Array(Vec::new()))
}

/// Rewrite entries for the target environment.
///
/// Built-in principals and integer targets pass through. Account and role
/// principals are resolved through the package; entries whose principal or
/// role-valued `allow` cannot be resolved are dropped. Create ACLs carry no
/// `allow`.
pub fn map_acl_to_target(resolver: &Resolver<'_>, entries: &[AclEntry], for_create: bool) -> Vec<AclEntry> {
    entries
        .iter()
        .filter_map(|entry| map_entry(resolver, entry, for_create))
        .collect()
}

fn map_entry(resolver: &Resolver<'_>, entry: &AclEntry, for_create: bool) -> Option<AclEntry> {
    let allow = if for_create {
        None
    } else {
        match &entry.allow {
            Some(value) => match value.as_id() {
                Some(role) if is_builtin_principal(role.as_str()) => Some(value.clone()),
                Some(role) => Some(AclValue::Id(resolver.role(role)?)),
                None => Some(value.clone()),
            },
            None => None,
        }
    };

    let target = match entry.target.as_ref().map(|t| (t, t.as_id())) {
        Some((_, Some(id))) if is_builtin_principal(id.as_str()) => Some(AclValue::Id(id.clone())),
        Some((_, Some(id))) => {
            let resolved = match entry.target_type {
                AccessTargetType::Account => resolver.account(id),
                AccessTargetType::Role => resolver.role(id),
                AccessTargetType::Reserved => None,
            };
            Some(AclValue::Id(resolved?))
        }
        Some((value, None)) => Some(value.clone()),
        None => None,
    };

    Some(AclEntry {
        target_type: entry.target_type,
        target,
        allow,
    })
}

/// Remap a plain role list; built-ins pass, unresolved roles are dropped
pub fn map_roles_to_target(resolver: &Resolver<'_>, roles: &[RecordId]) -> Vec<RecordId> {
    roles
        .iter()
        .filter_map(|role| {
            if is_builtin_principal(role.as_str()) {
                Some(role.clone())
            } else {
                resolver.role(role)
            }
        })
        .collect()
}

/// Accounts and roles an ACL list refers to
pub fn acl_dependencies(entries: &[AclEntry]) -> Vec<Dependency> {
    let mut dependencies = Vec::new();
    for entry in entries {
        if let Some(id) = entry.target.as_ref().and_then(AclValue::as_id) {
            let kind = match entry.target_type {
                AccessTargetType::Account => Some(Kind::Account),
                AccessTargetType::Role => Some(Kind::Role),
                AccessTargetType::Reserved => None,
            };
            if let Some(kind) = kind.filter(|_| !is_builtin_principal(id.as_str())) {
                dependencies.push(Dependency::new(id.clone(), kind));
            }
        }
        if let Some(role) = entry.allow.as_ref().and_then(AclValue::as_id) {
            if !is_builtin_principal(role.as_str()) {
                dependencies.push(Dependency::new(role.clone(), Kind::Role));
            }
        }
    }
    dependencies
}

/// Role dependencies of a plain role list
pub fn role_dependencies(roles: &[RecordId]) -> Vec<Dependency> {
    roles
        .iter()
        .filter(|r| !is_builtin_principal(r.as_str()))
        .map(|r| Dependency::new(r.clone(), Kind::Role))
        .collect()
}
