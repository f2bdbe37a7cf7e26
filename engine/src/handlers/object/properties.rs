//! Second-pass schema writes: properties, set documents, object types and
//! feed definitions, merged into a loaded target object record

use deploy_models::RecordId;
use record_store::{Document, Filter, Patch, RecordStore};
use serde_json::Value;

use crate::contract::acl::{acl_to_value, map_acl_to_target, map_roles_to_target, parse_acl};
use crate::contract::did::{DeploymentIds, DID_FIELD};
use crate::contract::resolve::Resolver;
use crate::contract::{id_list, org, pick, str_field};
use crate::errors::MigrationError;
use crate::handlers::id_of;

const SEGMENT_FIELDS: [&str; 4] = ["label", "name", "minRequired", "maxAllowed"];
const FEED_FIELDS: [&str; 17] = [
    "label",
    "contextReadAccess",
    "contextCreateAccess",
    "active",
    "postType",
    "minItems",
    "maxItems",
    "allowComments",
    "minCommentItems",
    "maxCommentItems",
    "notifications",
    "trackViews",
    "editable",
    "deletable",
    "contextReadAcl",
    "postCreateAcl",
    "postInstanceAcl",
];
const FEED_ACLS: [&str; 3] = ["contextReadAcl", "postCreateAcl", "postInstanceAcl"];
const FEED_SEGMENTS: [&str; 2] = ["body", "comments"];
const FILE_INTERNALS: [&str; 3] = ["location", "storageId", "skipVirusScan"];

/// One step into a nested definition array: the array field and the element id
pub type PathStep = (&'static str, RecordId);

/// A source element id and the target element it was written to
#[derive(Debug, Clone, PartialEq)]
pub struct LocaleMapping {
    pub source: RecordId,
    pub target: RecordId,
}

/// A property value applied once every object in the run exists
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredWrite {
    pub lookup: RecordId,
    pub path: Vec<PathStep>,
    pub key: &'static str,
    pub value: Value,
    /// Reference values go before List values
    pub precedence: u8,
}

fn precedence(property_type: &str) -> u8 {
    match property_type {
        "Reference" => 0,
        "List" => 1,
        _ => 2,
    }
}

/// Clone the object elements of an array field
pub fn docs_of(record: &Document, field: &str) -> Vec<Document> {
    match record.get(field) {
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_object().cloned()).collect(),
        _ => Vec::new(),
    }
}

fn take_docs(container: &mut Document, field: &str) -> Vec<Document> {
    match container.remove(field) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(doc) => Some(doc),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn put_docs(container: &mut Document, field: &str, docs: Vec<Document>) {
    container.insert(field.to_string(), Value::Array(docs.into_iter().map(Value::Object).collect()));
}

/// The element already standing for `source`: by deployment-identifier set, then by `key`
fn find_element(items: &[Document], source: &Document, key: &str) -> Option<usize> {
    if let Some(source_id) = id_of(source) {
        if let Some(index) = items.iter().position(|item| DeploymentIds::read(item).contains(&source_id)) {
            return Some(index);
        }
    }
    let wanted = source.get(key).filter(|v| !v.is_null())?;
    items.iter().position(|item| item.get(key) == Some(wanted))
}

/// Merge `payload` into the found element or append a new one, and add the
/// source id to its deployment-identifier set. Returns the index and element id.
fn place_element(
    items: &mut Vec<Document>,
    index: Option<usize>,
    source: &Document,
    payload: Document,
) -> (usize, RecordId) {
    let index = match index {
        Some(index) => {
            for (key, value) in payload {
                items[index].insert(key, value);
            }
            index
        }
        None => {
            let mut element = payload;
            element.insert(DID_FIELD.to_string(), Value::Array(Vec::new()));
            items.push(element);
            items.len() - 1
        }
    };

    let element = &mut items[index];
    let id = match id_of(element) {
        Some(id) => id,
        None => {
            let id = RecordId::generate();
            element.insert("_id".to_string(), id.to_value());
            id
        }
    };
    if let Some(source_id) = id_of(source) {
        DeploymentIds::stamp(element, &source_id);
    }
    (index, id)
}

/// Remove every `_id` key, at any depth
fn strip_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("_id");
            map.values_mut().for_each(strip_ids);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_ids),
        _ => {}
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn reference_hash(value: Option<&Value>) -> String {
    let mut pairs: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                let part = |key: &str| v.get(key).map(|s| s.to_string()).unwrap_or_default();
                format!("{}:{}", part("source"), part("target"))
            })
            .collect(),
        _ => Vec::new(),
    };
    pairs.sort();
    pairs.join(",")
}

/// Accumulates schema writes for one target object
pub struct PropertyWriter<'r> {
    resolver: Resolver<'r>,
    label: String,
    lookup: RecordId,
    pub deferred: Vec<DeferredWrite>,
}

impl<'r> PropertyWriter<'r> {
    pub fn new(resolver: Resolver<'r>, label: String, lookup: RecordId) -> Self {
        Self {
            resolver,
            label,
            lookup,
            deferred: Vec::new(),
        }
    }

    fn remap_acl(&self, doc: &mut Document, key: &str, for_create: bool) -> Result<(), MigrationError> {
        let entries = match doc.get(key) {
            Some(value) => parse_acl(Some(value))?,
            None => return Ok(()),
        };
        let mapped = map_acl_to_target(&self.resolver, &entries, for_create);
        doc.insert(key.to_string(), acl_to_value(&mapped));
        Ok(())
    }

    fn remap_roles(&self, doc: &mut Document) {
        if doc.contains_key("roles") {
            let roles = map_roles_to_target(&self.resolver, &id_list(doc.get("roles")));
            doc.insert("roles".to_string(), Value::Array(roles.iter().map(RecordId::to_value).collect()));
        }
    }

    fn mismatch(&self, what: &str, property: &Document) -> MigrationError {
        MigrationError::InvalidArgument(format!(
            "{} mismatch: {} - {}",
            what,
            self.label,
            str_field(property, "name")
        ))
    }

    /// An existing property can only be updated in place when its shape agrees
    fn check_compatible(&self, existing: &Document, source: &Document) -> Result<(), MigrationError> {
        let differs = |key: &str| existing.get(key) != source.get(key);
        let flag = |doc: &Document, key: &str| doc.get(key).and_then(Value::as_bool).unwrap_or(false);

        if differs("name") {
            return Err(self.mismatch("Property name", existing));
        }
        if differs("type") {
            return Err(self.mismatch("Property type", existing));
        }
        if flag(existing, "array") != flag(source, "array") {
            return Err(self.mismatch("Property array", existing));
        }

        let property_type = str_field(existing, "type");
        match property_type.as_str() {
            "Reference" | "ObjectId" | "List" if differs("sourceObject") => {
                Err(self.mismatch(&format!("{} property sourceObject", property_type), existing))
            }
            "List" => {
                let linked = existing.get("linkedProperty").filter(|v| is_filled(v));
                if linked.is_some() && linked != source.get("linkedProperty") {
                    return Err(self.mismatch("List property linkedProperty", existing));
                }
                if reference_hash(existing.get("linkedReferences")) != reference_hash(source.get("linkedReferences")) {
                    return Err(self.mismatch("List property linkedReferences", existing));
                }
                Ok(())
            }
            "Geometry" if differs("geoType") => Err(self.mismatch("Geometry property geoType", existing)),
            _ => Ok(()),
        }
    }

    /// Writable payload of a property plus the values held back for later
    fn property_payload(&self, source: &Document) -> Result<(Document, Vec<(&'static str, Value)>), MigrationError> {
        let mut payload = source.clone();
        for key in ["properties", "documents", DID_FIELD] {
            payload.remove(key);
        }
        let mut stripped = Value::Object(payload);
        strip_ids(&mut stripped);
        let mut payload = match stripped {
            Value::Object(map) => map,
            _ => Document::new(),
        };

        self.remap_acl(&mut payload, "acl", false)?;
        let mut deferred = Vec::new();
        match str_field(source, "type").as_str() {
            "Reference" => {
                self.remap_acl(&mut payload, "pacl", false)?;
                self.remap_acl(&mut payload, "defaultAcl", false)?;
                self.remap_roles(&mut payload);
                if let Some(paths) = payload.get("paths").filter(|v| is_filled(v)).cloned() {
                    deferred.push(("paths", paths));
                    payload.insert("paths".to_string(), Value::Array(Vec::new()));
                }
            }
            "List" => {
                self.remap_acl(&mut payload, "defaultAcl", false)?;
                self.remap_acl(&mut payload, "createAcl", true)?;
                self.remap_roles(&mut payload);
                for (key, empty) in [
                    ("linkedProperty", Value::String(String::new())),
                    ("linkedReferences", Value::Array(Vec::new())),
                    ("where", Value::String(String::new())),
                ] {
                    if let Some(value) = payload.get(key).filter(|v| is_filled(v)).cloned() {
                        deferred.push((key, value));
                        payload.insert(key.to_string(), empty);
                    }
                }
            }
            "String" => {
                if let Some(Value::Object(localization)) = payload.get_mut("localization") {
                    self.remap_acl(localization, "acl", false)?;
                }
            }
            "File" => {
                if let Some(Value::Array(processors)) = payload.get_mut("processors") {
                    for processor in processors.iter_mut().filter_map(Value::as_object_mut) {
                        for key in FILE_INTERNALS {
                            processor.remove(key);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok((payload, deferred))
    }

    /// Write `sources` into the `properties` array of `container`, recursing
    /// into document properties and set documents
    pub fn write_properties(
        &mut self,
        sources: &[Document],
        container: &mut Document,
        path: &[PathStep],
        mut locales: Option<&mut Vec<LocaleMapping>>,
    ) -> Result<(), MigrationError> {
        let mut properties = take_docs(container, "properties");

        for source in sources {
            let index = find_element(&properties, source, "name");
            if let Some(index) = index {
                self.check_compatible(&properties[index], source)?;
            }
            let (payload, deferred) = self.property_payload(source)?;
            let (index, property_id) = place_element(&mut properties, index, source, payload);

            if let (Some(maps), Some(source_id)) = (locales.as_deref_mut(), id_of(source)) {
                maps.push(LocaleMapping {
                    source: source_id,
                    target: property_id.clone(),
                });
            }

            let mut property_path = path.to_vec();
            property_path.push(("properties", property_id));
            let property_type = str_field(source, "type");
            for (key, value) in deferred {
                self.deferred.push(DeferredWrite {
                    lookup: self.lookup.clone(),
                    path: property_path.clone(),
                    key,
                    value,
                    precedence: precedence(&property_type),
                });
            }

            match property_type.as_str() {
                "Document" => {
                    let children = docs_of(source, "properties");
                    self.write_properties(&children, &mut properties[index], &property_path, locales.as_deref_mut())?;
                }
                "Set" => {
                    self.write_set_documents(source, &mut properties[index], &property_path, locales.as_deref_mut())?;
                }
                _ => {}
            }
        }

        put_docs(container, "properties", properties);
        Ok(())
    }

    fn write_set_documents(
        &mut self,
        source: &Document,
        property: &mut Document,
        path: &[PathStep],
        mut locales: Option<&mut Vec<LocaleMapping>>,
    ) -> Result<(), MigrationError> {
        let mut documents = take_docs(property, "documents");
        for set_doc in docs_of(source, "documents") {
            let index = find_element(&documents, &set_doc, "name");
            let (index, doc_id) = place_element(&mut documents, index, &set_doc, pick(&set_doc, &SEGMENT_FIELDS));
            if let (Some(maps), Some(source_id)) = (locales.as_deref_mut(), id_of(&set_doc)) {
                maps.push(LocaleMapping {
                    source: source_id,
                    target: doc_id.clone(),
                });
            }
            let mut doc_path = path.to_vec();
            doc_path.push(("documents", doc_id));
            let children = docs_of(&set_doc, "properties");
            self.write_properties(&children, &mut documents[index], &doc_path, locales.as_deref_mut())?;
        }
        put_docs(property, "documents", documents);
        Ok(())
    }

    pub fn write_object_types(
        &mut self,
        payload: &Document,
        object: &mut Document,
        locales: &mut Vec<LocaleMapping>,
    ) -> Result<(), MigrationError> {
        let mut types = take_docs(object, "objectTypes");
        for source in docs_of(payload, "objectTypes") {
            let index = find_element(&types, &source, "name");
            let (index, type_id) = place_element(&mut types, index, &source, pick(&source, &["label", "name"]));
            if let Some(source_id) = id_of(&source) {
                locales.push(LocaleMapping {
                    source: source_id,
                    target: type_id.clone(),
                });
            }
            let children = docs_of(&source, "properties");
            let path = [("objectTypes", type_id)];
            self.write_properties(&children, &mut types[index], &path, Some(&mut *locales))?;
        }
        put_docs(object, "objectTypes", types);
        Ok(())
    }

    pub fn write_feed_definitions(&mut self, payload: &Document, object: &mut Document) -> Result<(), MigrationError> {
        let mut feeds = take_docs(object, "feedDefinition");
        for source in docs_of(payload, "feedDefinition") {
            let index = find_element(&feeds, &source, "postType");
            let mut feed_payload = pick(&source, &FEED_FIELDS);
            for key in FEED_ACLS {
                self.remap_acl(&mut feed_payload, key, false)?;
            }
            let (index, feed_id) = place_element(&mut feeds, index, &source, feed_payload);

            for field in FEED_SEGMENTS {
                let mut segments = take_docs(&mut feeds[index], field);
                for segment in docs_of(&source, field) {
                    let found = find_element(&segments, &segment, "name");
                    let (at, segment_id) = place_element(&mut segments, found, &segment, pick(&segment, &SEGMENT_FIELDS));
                    let path = [("feedDefinition", feed_id.clone()), (field, segment_id)];
                    let children = docs_of(&segment, "properties");
                    self.write_properties(&children, &mut segments[at], &path, None)?;
                }
                put_docs(&mut feeds[index], field, segments);
            }
        }
        put_docs(object, "feedDefinition", feeds);
        Ok(())
    }
}

/// Point locale entries at the target element ids; entries holding a value
/// lose their id
pub fn remap_locale_ids(value: &mut Value, mappings: &[LocaleMapping]) {
    match value {
        Value::Array(items) => items.iter_mut().for_each(|item| remap_locale_entry(item, mappings)),
        Value::Object(map) => map.values_mut().for_each(|item| remap_locale_entry(item, mappings)),
        _ => {}
    }
}

fn remap_locale_entry(item: &mut Value, mappings: &[LocaleMapping]) {
    match item {
        Value::Array(items) => items.iter_mut().for_each(|child| remap_locale_entry(child, mappings)),
        Value::Object(entry) => {
            let mapped = entry
                .get("_id")
                .and_then(Value::as_str)
                .and_then(|id| mappings.iter().find(|m| m.source.as_str() == id));
            if let Some(mapping) = mapped {
                let target = mapping.target.to_value();
                entry.insert("_id".to_string(), target);
            }
            if entry.get("value").is_some_and(is_filled) {
                entry.remove("_id");
            } else {
                entry.values_mut().for_each(|child| remap_locale_entry(child, mappings));
            }
        }
        _ => {}
    }
}

/// Drop ids from the object-level label and description locale entries
pub fn strip_top_level_locale_ids(locales: &mut Value) {
    for key in ["label", "description"] {
        if let Some(Value::Array(entries)) = locales.get_mut(key) {
            for entry in entries.iter_mut().filter_map(Value::as_object_mut) {
                entry.remove("_id");
            }
        }
    }
}

fn locate_mut<'d>(record: &'d mut Document, path: &[PathStep]) -> Option<&'d mut Document> {
    let mut current = record;
    for (field, id) in path {
        current = current
            .get_mut(*field)?
            .as_array_mut()?
            .iter_mut()
            .filter_map(Value::as_object_mut)
            .find(|doc| doc.get("_id").and_then(Value::as_str) == Some(id.as_str()))?;
    }
    Some(current)
}

/// Apply held-back values, Reference properties before List properties
pub async fn apply_deferred(store: &dyn RecordStore, mut deferred: Vec<DeferredWrite>) -> Result<(), MigrationError> {
    deferred.sort_by_key(|write| write.precedence);

    for write in deferred {
        let filter = Filter::eq("lookup", write.lookup.to_value());
        let mut object = store.find_one(org::OBJECTS, &filter).await?.ok_or_else(|| {
            MigrationError::NotFound(format!("Missing mapping target object: {}", write.lookup))
        })?;
        let property = locate_mut(&mut object, &write.path).ok_or_else(|| {
            MigrationError::NotFound(format!(
                "Missing deferred property for {} on object {}",
                write.key, write.lookup
            ))
        })?;
        property.insert(write.key.to_string(), write.value);

        let Some((field, _)) = write.path.first() else {
            continue;
        };
        let value = object.get(*field).cloned().unwrap_or(Value::Null);
        store.update_one(org::OBJECTS, &filter, &Patch::new().set(*field, value)).await?;
    }
    Ok(())
}
