//! Built-in principals, roles and object definitions shared by every environment

use deploy_models::RecordId;

pub const ANONYMOUS: &str = "000000000000000000000001";
pub const PUBLIC: &str = "000000000000000000000003";

pub const ADMINISTRATOR_ROLE: &str = "000000000000000000000004";
pub const PROVIDER_ROLE: &str = "000000000000000000000005";
pub const SUPPORT_ROLE: &str = "000000000000000000000006";
pub const DEVELOPER_ROLE: &str = "000000000000000000000007";

pub const BUILTIN_ROLES: [&str; 4] = [ADMINISTRATOR_ROLE, PROVIDER_ROLE, SUPPORT_ROLE, DEVELOPER_ROLE];

/// Native object definitions as `(name, label, lookup)`
pub const BUILTIN_OBJECTS: [(&str, &str, &str); 2] = [
    ("account", "Account", "000000000000000000000a01"),
    ("org", "Org", "000000000000000000000a02"),
];

pub fn is_builtin_role(id: &str) -> bool {
    BUILTIN_ROLES.contains(&id)
}

/// Built-in accounts and built-in roles
pub fn is_builtin_principal(id: &str) -> bool {
    id == ANONYMOUS || id == PUBLIC || is_builtin_role(id)
}

pub fn is_builtin_object(lookup: &str) -> bool {
    BUILTIN_OBJECTS.iter().any(|(_, _, id)| *id == lookup)
}

pub fn anonymous() -> RecordId {
    RecordId::from(ANONYMOUS)
}
