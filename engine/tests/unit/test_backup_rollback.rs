//! Whole-package backups restore the target exactly

use deploy_models::{Kind, PackageStage, RecordId, Selection};
use envshift::backup::archive::{self, PackageBackup};
use envshift::contract::org;
use envshift::deploy::plan::TargetPolicy;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};

use crate::support::{planned, selecting, store_with};

fn populated_target() -> record_store::MemoryStore {
    store_with(json!({
        "org": [{
            "_id": "b000000000000000000000f0",
            "roles": [{"_id": "b000000000000000000000b1", "name": "Ops", "code": "c_ops", "include": []}],
            "serviceAccounts": [{"_id": "b000000000000000000000b2", "name": "c_bot", "label": "Bot", "roles": []}],
            "apps": [{"_id": "b000000000000000000000b3", "name": "c_portal", "clients": [{"_id": "b000000000000000000000b4"}]}],
            "policies": [{"_id": "b000000000000000000000b5", "name": "c_gate", "appWhitelist": []}],
            "configuration": {
                "maxApps": 4,
                "notifications": [{"_id": "b000000000000000000000b6", "name": "c_welcome", "endpoints": []}],
                "sms": {"numbers": [{"_id": "b000000000000000000000b7", "number": "+15550100", "isDefault": true}]}
            }
        }],
        "objects": [{"_id": "b000000000000000000000b8", "lookup": "b000000000000000000000b9", "name": "c_case", "properties": []}],
        "scripts": [{"_id": "b000000000000000000000c1", "type": "library", "name": "c_util", "configuration": {"export": "util"}}],
        "views": [{"_id": "b000000000000000000000c2", "name": "c_open_cases", "label": "Open"}],
        "templates": [{"_id": "b000000000000000000000c3", "type": "email", "name": "welcome"}],
        "config": [{"_id": "c_limit", "value": 5, "isPublic": false}]
    }))
}

#[tokio::test]
async fn test_backup_then_rollback_is_exact() {
    let target = populated_target();
    let before = target.snapshot().await;

    let backup = archive::create_backup(&target).await.unwrap();
    let decoded = PackageBackup::decode(&backup.encode().unwrap()).unwrap();
    assert_ok!(archive::rollback(&target, &decoded).await);

    assert_eq!(target.snapshot().await, before);
}

#[tokio::test]
async fn test_backup_skips_accounts() {
    let target = populated_target();
    let backup = archive::create_backup(&target).await.unwrap();
    assert!(!backup.kinds.contains_key(&Kind::Account));
    assert_eq!(backup.kinds.len(), 11);
}

#[tokio::test]
async fn test_failed_deploy_rolls_back_when_asked() {
    let source = store_with(json!({
        "org": [{
            "_id": "a000000000000000000000f0",
            "roles": [{"_id": "a000000000000000000000d1", "name": "Auditors", "code": "c_auditors"}],
            "apps": [{"_id": "a000000000000000000000d2", "name": "c_portal", "label": "Portal", "clients": [{"sessions": true}]}]
        }]
    }));
    let target = store_with(json!({
        "org": [{
            "_id": "b000000000000000000000f0",
            "apps": [{"_id": "b000000000000000000000d2", "name": "c_portal", "clients": [{"_id": "b000000000000000000000d3", "sessions": true}]}]
        }]
    }));
    let configuration = selecting(&[(Kind::Role, Selection::all()), (Kind::App, Selection::all())]);
    let mut runner = planned(&source, &target, configuration, TargetPolicy::FirstCandidate).await;
    let app = runner
        .package()
        .find_unit(&RecordId::from("a000000000000000000000d2"), Kind::App)
        .unwrap();
    assert_eq!(app.target, Some(RecordId::from("b000000000000000000000d2")));

    // The chosen app disappears between planning and deploying
    org::save_array::<Value>(&target, org::APPS, &[]).await.unwrap();

    let err = assert_err!(runner.run(&target, false, true).await);
    assert_eq!(err.code(), "not_found");
    assert_eq!(runner.stage(), &PackageStage::RolledBack);

    let org_record = org::load_org(&target).await.unwrap();
    assert!(org_record.get("roles").is_none());
}
