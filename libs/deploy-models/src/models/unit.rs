//! Migration units

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::ids::RecordId;
use crate::models::kind::Kind;

/// A cross-reference one unit requires to exist in the same package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub id: RecordId,
    pub kind: Kind,
}

impl Dependency {
    pub fn new(id: RecordId, kind: Kind) -> Self {
        Self { id, kind }
    }
}

/// The heuristic that produced a target candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    Identifier,
    Name,
    Label,
    Configuration,
    #[serde(rename = "Configuration & Label")]
    ConfigurationAndLabel,
    Duplicate,
    Number,
    Email,
    Mobile,
    #[serde(rename = "Matching Administrator Role")]
    MatchingAdministratorRole,
    #[serde(rename = "Matching Developer Role")]
    MatchingDeveloperRole,
    #[serde(rename = "Administrator Role")]
    AdministratorRole,
    #[serde(rename = "Developer Role")]
    DeveloperRole,
}

/// A plausible existing counterpart of a source record in the target environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCandidate {
    #[serde(rename = "_id")]
    pub id: RecordId,

    #[serde(rename = "matchType")]
    pub match_type: MatchType,

    /// Descriptive fields shown next to the candidate
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TargetCandidate {
    pub fn new(id: RecordId, match_type: MatchType, fields: Map<String, Value>) -> Self {
        Self {
            id,
            match_type,
            fields,
        }
    }
}

/// One entity being moved from the source to the target environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// Source-environment identifier
    #[serde(rename = "_id")]
    pub id: RecordId,

    #[serde(rename = "type")]
    pub kind: Kind,

    /// Explicitly selected, as opposed to pulled in as a dependency
    #[serde(default)]
    pub selected: bool,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Compact display and matching snapshot of the source record
    #[serde(default)]
    pub source: Map<String, Value>,

    /// Full deployable snapshot, filled right before a write
    #[serde(skip)]
    pub payload: Option<Value>,

    #[serde(default)]
    pub targets: Vec<TargetCandidate>,

    /// Chosen target id or the create-new sentinel; `None` until chosen
    #[serde(default)]
    pub target: Option<RecordId>,
}

impl MigrationUnit {
    pub fn new(id: RecordId, kind: Kind) -> Self {
        Self {
            id,
            kind,
            selected: false,
            dependencies: Vec::new(),
            source: Map::new(),
            payload: None,
            targets: Vec::new(),
            target: None,
        }
    }

    /// Display label: the source label, else its name, else the id
    pub fn label(&self) -> String {
        ["label", "name"]
            .iter()
            .filter_map(|key| self.source.get(*key).and_then(Value::as_str))
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Placeholder sources (built-ins) are not concrete
    pub fn is_concrete(&self) -> bool {
        self.source
            .get("concrete")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    pub fn is_create(&self) -> bool {
        self.target.as_ref().is_some_and(RecordId::is_empty_sentinel)
    }

    /// Append a candidate unless one with the same target id is already present
    pub fn add_target(&mut self, candidate: TargetCandidate) {
        if !self.targets.iter().any(|t| t.id == candidate.id) {
            self.targets.push(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_never_serialized() {
        let mut unit = MigrationUnit::new(RecordId::from("a1"), Kind::Role);
        unit.payload = Some(json!({"secret": "x"}));
        let value = serde_json::to_value(&unit).unwrap();
        assert!(value.get("payload").is_none());
        assert_eq!(value["type"], "role");
    }

    #[test]
    fn test_add_target_dedupes_by_id() {
        let mut unit = MigrationUnit::new(RecordId::from("a1"), Kind::Role);
        unit.add_target(TargetCandidate::new(RecordId::from("t1"), MatchType::Identifier, Map::new()));
        unit.add_target(TargetCandidate::new(RecordId::from("t1"), MatchType::Name, Map::new()));
        assert_eq!(unit.targets.len(), 1);
        assert_eq!(unit.targets[0].match_type, MatchType::Identifier);
    }

    #[test]
    fn test_label_falls_back_to_name_then_id() {
        let mut unit = MigrationUnit::new(RecordId::from("a1"), Kind::Role);
        assert_eq!(unit.label(), "a1");
        unit.source.insert("name".into(), json!("c_role"));
        assert_eq!(unit.label(), "c_role");
        unit.source.insert("label".into(), json!("Role"));
        assert_eq!(unit.label(), "Role");
    }

    #[test]
    fn test_match_type_wire_names() {
        let value = serde_json::to_value(MatchType::ConfigurationAndLabel).unwrap();
        assert_eq!(value, json!("Configuration & Label"));
    }
}
