use deploy_models::{Kind, PackageStage, RecordId, Selection};
use envshift::contract::org;
use envshift::deploy::plan::TargetPolicy;
use record_store::{Document, Filter, RecordStore};
use serde_json::{json, Value};
use tokio_test::assert_ok;

use crate::support::{planned, selecting, store_with};

const CASE_LOOKUP: &str = "a000000000000000000000c1";
const NOTE_LOOKUP: &str = "a000000000000000000000c2";

fn property<'a>(object: &'a Document, name: &str) -> &'a Value {
    object["properties"]
        .as_array()
        .and_then(|props| props.iter().find(|p| p["name"] == json!(name)))
        .unwrap()
}

#[tokio::test]
async fn test_linked_objects_deploy_with_deferred_links() {
    let source = store_with(json!({
        "objects": [
            {
                "_id": "a000000000000000000000e1",
                "lookup": CASE_LOOKUP,
                "name": "c_case",
                "label": "Case",
                "properties": [{
                    "_id": "a000000000000000000000f1",
                    "name": "c_note",
                    "label": "Note",
                    "type": "Reference",
                    "sourceObject": "c_note",
                    "paths": ["c_title"]
                }]
            },
            {
                "_id": "a000000000000000000000e2",
                "lookup": NOTE_LOOKUP,
                "name": "c_note",
                "label": "Note",
                "properties": [
                    {
                        "_id": "a000000000000000000000f2",
                        "name": "c_title",
                        "label": "Title",
                        "type": "String"
                    },
                    {
                        "_id": "a000000000000000000000f3",
                        "name": "c_cases",
                        "label": "Cases",
                        "type": "List",
                        "sourceObject": "c_case",
                        "linkedProperty": "c_note"
                    }
                ]
            }
        ]
    }));
    let target = store_with(json!({"objects": []}));

    let configuration = selecting(&[(Kind::Object, Selection::include(vec![RecordId::from(CASE_LOOKUP)]))]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;

    let note_unit = runner
        .package()
        .find_unit(&RecordId::from(NOTE_LOOKUP), Kind::Object)
        .unwrap();
    assert!(!note_unit.selected);
    assert!(note_unit.is_create());
    assert!(runner.package().selection(Kind::Object).admits(&RecordId::from(NOTE_LOOKUP)));

    assert_ok!(runner.run(&target, true, false).await);
    assert_eq!(runner.stage(), &PackageStage::Deployed);

    let objects = target.find(org::OBJECTS, &Filter::All, &[]).await.unwrap();
    assert_eq!(objects.len(), 2);

    let case = target
        .find_one(org::OBJECTS, &Filter::eq("name", json!("c_case")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(case["did"], json!([CASE_LOOKUP]));
    assert_ne!(case["lookup"], json!(CASE_LOOKUP));
    let case_unit = runner
        .package()
        .find_unit(&RecordId::from(CASE_LOOKUP), Kind::Object)
        .unwrap();
    assert_eq!(case_unit.target.as_ref().map(RecordId::to_value), Some(case["lookup"].clone()));

    let reference = property(&case, "c_note");
    assert_eq!(reference["paths"], json!(["c_title"]));
    assert_eq!(reference["did"], json!(["a000000000000000000000f1"]));
    assert_ne!(reference["_id"], json!("a000000000000000000000f1"));

    let note = target
        .find_one(org::OBJECTS, &Filter::eq("name", json!("c_note")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note["did"], json!([NOTE_LOOKUP]));
    assert_eq!(property(&note, "c_cases")["linkedProperty"], json!("c_note"));
    assert_eq!(property(&note, "c_title")["type"], json!("String"));
}

#[tokio::test]
async fn test_type_change_on_existing_property_fails() {
    let source = store_with(json!({
        "objects": [{
            "_id": "a000000000000000000000e1",
            "lookup": CASE_LOOKUP,
            "name": "c_case",
            "properties": [{"_id": "a000000000000000000000f1", "name": "c_count", "type": "Number"}]
        }]
    }));
    let target = store_with(json!({
        "objects": [{
            "_id": "b000000000000000000000e1",
            "lookup": "b000000000000000000000c1",
            "name": "c_case",
            "did": [],
            "properties": [{"_id": "b000000000000000000000f1", "name": "c_count", "type": "String"}]
        }]
    }));

    let configuration = selecting(&[(Kind::Object, Selection::all())]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    let unit = runner
        .package()
        .find_unit(&RecordId::from(CASE_LOOKUP), Kind::Object)
        .unwrap();
    assert_eq!(unit.target, Some(RecordId::from("b000000000000000000000c1")));

    let err = runner.validate(&target).await.unwrap_err();
    assert_eq!(err.code(), "invalid_argument");
    assert!(err.to_string().contains("Property type mismatch"));
}
