use deploy_models::{Kind, MatchType, PackageStage, Selection};
use envshift::contract::org;
use envshift::deploy::plan::TargetPolicy;
use envshift::handlers::config;
use record_store::MemoryStore;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use crate::support::{planned, selecting, store_with};

fn source() -> MemoryStore {
    store_with(json!({
        "org": [{
            "_id": "a000000000000000000000f0",
            "roles": [{"_id": "a000000000000000000000d1", "name": "Auditors", "code": "c_auditors", "include": []}],
            "apps": [{
                "_id": "a000000000000000000000d2",
                "name": "c_portal",
                "label": "Portal",
                "clients": [{"_id": "a000000000000000000000d3", "key": "source-key"}]
            }]
        }],
        "config": [{"_id": "c_limit", "value": 5, "isPublic": false}]
    }))
}

async fn deploy_once(source: &MemoryStore, target: &MemoryStore) -> Vec<MatchType> {
    let configuration = selecting(&[
        (Kind::Role, Selection::all()),
        (Kind::App, Selection::all()),
        (Kind::Config, Selection::all()),
    ]);
    let mut runner = planned(source, target, configuration, TargetPolicy::FirstCandidate).await;
    let matches = runner
        .package()
        .units
        .iter()
        .map(|u| u.targets.first().map(|t| t.match_type).unwrap_or(MatchType::Duplicate))
        .collect();
    assert_ok!(runner.run(target, true, false).await);
    assert_eq!(runner.stage(), &PackageStage::Deployed);
    matches
}

#[tokio::test]
async fn test_second_run_updates_in_place() {
    let source = source();
    let target = store_with(json!({"org": [{"_id": "b000000000000000000000f0"}]}));

    deploy_once(&source, &target).await;
    let apps: Vec<Value> = org::load_array(&target, org::APPS).await.unwrap();
    let client_id = apps[0]["clients"][0]["_id"].clone();
    let client_key = apps[0]["clients"][0]["key"].clone();
    assert_ne!(client_key, json!("source-key"));

    let matches = deploy_once(&source, &target).await;
    assert_eq!(matches, vec![MatchType::Identifier; 3]);

    let roles: Vec<Value> = org::load_array(&target, org::ROLES).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0]["did"], json!(["a000000000000000000000d1"]));

    let apps: Vec<Value> = org::load_array(&target, org::APPS).await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0]["clients"][0]["_id"], client_id);
    assert_eq!(apps[0]["clients"][0]["key"], client_key);

    let entries = config::entries(&target).await.unwrap();
    assert_eq!(entries.len(), 1);
}
