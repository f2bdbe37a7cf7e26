use deploy_models::{Kind, PackageStage, RecordId, Selection};
use envshift::contract::org;
use envshift::deploy::plan::TargetPolicy;
use envshift::handlers::config;
use record_store::{Filter, RecordStore};
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use crate::support::{planned, selecting, store_with};

fn pairs(entries: &[(&str, i64)]) -> Vec<(RecordId, Value)> {
    entries
        .iter()
        .map(|(key, value)| (RecordId::from(*key), json!(value)))
        .collect()
}

#[tokio::test]
async fn test_config_rollback_restores_exact_key_set() {
    let source = store_with(json!({
        "config": [
            {"_id": "a", "value": 3, "isPublic": false},
            {"_id": "c", "value": 4, "isPublic": true}
        ]
    }));
    let target = store_with(json!({
        "config": [
            {"_id": "a", "value": 1, "isPublic": false},
            {"_id": "b", "value": 2, "isPublic": false}
        ]
    }));

    let configuration = selecting(&[(Kind::Config, Selection::all())]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    let key_a = runner.package().find_unit(&RecordId::from("a"), Kind::Config).unwrap();
    assert_eq!(key_a.target, Some(RecordId::from("a")));

    let backup = assert_ok!(runner.run(&target, false, false).await);
    assert_eq!(runner.stage(), &PackageStage::Deployed);
    assert_eq!(
        config::entries(&target).await.unwrap(),
        pairs(&[("a", 3), ("b", 2), ("c", 4)])
    );

    assert_ok!(runner.rollback(&target, &backup).await);
    assert_eq!(config::entries(&target).await.unwrap(), pairs(&[("a", 1), ("b", 2)]));
    assert_eq!(runner.stage(), &PackageStage::RolledBack);
}

#[tokio::test]
async fn test_created_key_keeps_source_key() {
    let source = store_with(json!({
        "config": [{"_id": "c_feature", "value": {"enabled": true}, "isPublic": true}]
    }));
    let target = store_with(json!({}));

    let configuration = selecting(&[(Kind::Config, Selection::all())]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    assert_ok!(runner.run(&target, true, false).await);

    let entries = config::entries(&target).await.unwrap();
    assert_eq!(entries, vec![(RecordId::from("c_feature"), json!({"enabled": true}))]);
    let unit = runner.package().find_unit(&RecordId::from("c_feature"), Kind::Config).unwrap();
    assert_eq!(unit.target, Some(RecordId::from("c_feature")));
}

#[tokio::test]
async fn test_vanished_target_key_is_not_recreated() {
    let source = store_with(json!({
        "config": [{"_id": "c_gone", "value": 5, "isPublic": false}]
    }));
    let target = store_with(json!({
        "config": [
            {"_id": "c_gone", "value": 1, "isPublic": false},
            {"_id": "c_other", "value": 1, "isPublic": false}
        ]
    }));

    let configuration = selecting(&[(Kind::Config, Selection::all())]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    let unit = runner.package().find_unit(&RecordId::from("c_gone"), Kind::Config).unwrap();
    assert_eq!(unit.target, Some(RecordId::from("c_gone")));

    // Removed from the target between matching and deployment
    target
        .delete_many(org::CONFIG, &Filter::by_id("c_gone"))
        .await
        .unwrap();

    let err = assert_err!(runner.run(&target, false, false).await);
    assert_eq!(err.code(), "not_found");
    assert_eq!(runner.stage(), &PackageStage::Failed);
    assert_eq!(config::entries(&target).await.unwrap(), pairs(&[("c_other", 1)]));
}
