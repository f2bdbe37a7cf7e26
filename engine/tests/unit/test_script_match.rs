use deploy_models::{Kind, MatchType, PackageStage, RecordId, Selection};
use envshift::contract::org;
use envshift::deploy::plan::{check_choice, TargetPolicy};
use record_store::{Filter, RecordStore};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use crate::support::{planned, selecting, store_with};

const TRIGGER: &str = "a000000000000000000000e1";
const ROUTE: &str = "a000000000000000000000e2";

fn source() -> record_store::MemoryStore {
    store_with(json!({
        "scripts": [
            {
                "_id": TRIGGER,
                "type": "trigger",
                "label": "Notify",
                "script": "return;",
                "configuration": {"object": "c_case", "event": "create.after"}
            },
            {
                "_id": ROUTE,
                "type": "route",
                "label": "Status",
                "script": "return 'ok';",
                "configuration": {"path": "/status", "method": "get"}
            }
        ]
    }))
}

fn target() -> record_store::MemoryStore {
    store_with(json!({
        "scripts": [
            {
                "_id": "b000000000000000000000e1",
                "type": "trigger",
                "label": "Notify",
                "configuration": {"object": "c_case", "event": "create.after"}
            },
            {
                "_id": "b000000000000000000000e2",
                "type": "trigger",
                "label": "Audit",
                "configuration": {"object": "c_case", "event": "create.after"}
            },
            {
                "_id": "b000000000000000000000e3",
                "type": "route",
                "label": "Health",
                "configuration": {"path": "/status", "method": "get"}
            }
        ]
    }))
}

#[tokio::test]
async fn test_trigger_candidates_are_ranked() {
    let source = source();
    let target = target();
    let configuration = selecting(&[(Kind::Script, Selection::all())]);
    let runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;

    let trigger = runner
        .package()
        .find_unit(&RecordId::from(TRIGGER), Kind::Script)
        .unwrap();
    let ranked: Vec<(String, MatchType)> = trigger
        .targets
        .iter()
        .map(|t| (t.id.to_string(), t.match_type))
        .collect();
    assert_eq!(
        ranked,
        vec![
            ("b000000000000000000000e1".to_string(), MatchType::ConfigurationAndLabel),
            (RecordId::empty().to_string(), MatchType::Duplicate),
            ("b000000000000000000000e2".to_string(), MatchType::Configuration),
        ]
    );
    assert_eq!(trigger.target, Some(RecordId::from("b000000000000000000000e1")));
    assert_ok!(check_choice(trigger, &RecordId::empty()));

    let route = runner
        .package()
        .find_unit(&RecordId::from(ROUTE), Kind::Script)
        .unwrap();
    assert_eq!(route.targets.len(), 1);
    assert_eq!(route.targets[0].match_type, MatchType::Configuration);
    assert_err!(check_choice(route, &RecordId::empty()));
}

#[tokio::test]
async fn test_duplicate_trigger_is_created() {
    let source = source();
    let target = target();
    let configuration = selecting(&[(Kind::Script, Selection::include(vec![RecordId::from(TRIGGER)]))]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    assert_eq!(runner.stage(), &PackageStage::Deployment);

    runner
        .choose_target(Kind::Script, &RecordId::from(TRIGGER), RecordId::empty())
        .unwrap();
    assert_ok!(runner.run(&target, true, false).await);

    let triggers = target
        .find(org::SCRIPTS, &Filter::eq("type", json!("trigger")), &[])
        .await
        .unwrap();
    assert_eq!(triggers.len(), 3);
    let created = triggers
        .iter()
        .find(|t| t.get("did") == Some(&json!([TRIGGER])))
        .unwrap();
    assert_eq!(created["configuration"], json!({"object": "c_case", "event": "create.after"}));
    assert_eq!(created["label"], json!("Notify"));
}
