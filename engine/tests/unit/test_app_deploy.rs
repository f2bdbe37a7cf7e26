//! App migration: a new app whose client principal maps onto an existing account

use deploy_models::{Kind, MatchType, PackageStage, RecordId, Selection};
use envshift::contract::org;
use envshift::deploy::plan::TargetPolicy;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use crate::support::{planned, selecting, store_with};

const SOURCE_APP: &str = "a000000000000000000000a1";
const SOURCE_CLIENT: &str = "a000000000000000000000a2";
const SOURCE_ACCOUNT: &str = "a000000000000000000000a3";
const TARGET_ACCOUNT: &str = "b000000000000000000000a3";

fn source() -> record_store::MemoryStore {
    store_with(json!({
        "org": [{
            "_id": "a000000000000000000000f0",
            "apps": [{
                "_id": SOURCE_APP,
                "name": "c_portal",
                "label": "Portal",
                "APNs": {"cert": "pem"},
                "clients": [{
                    "_id": SOURCE_CLIENT,
                    "label": "web",
                    "sessions": true,
                    "principalId": SOURCE_ACCOUNT,
                    "key": "source-key",
                    "secret": "source-secret"
                }]
            }]
        }],
        "accounts": [{"_id": SOURCE_ACCOUNT, "email": "ops@example.com", "name": {"first": "Ada", "last": "Ops"}}]
    }))
}

fn target() -> record_store::MemoryStore {
    store_with(json!({
        "org": [{"_id": "b000000000000000000000f0", "apps": []}],
        "accounts": [{"_id": TARGET_ACCOUNT, "email": "ops@example.com"}]
    }))
}

#[tokio::test]
async fn test_new_app_client_maps_to_existing_account() {
    let source = source();
    let target = target();
    let mut runner = planned(&source, &target, selecting(&[(Kind::App, Selection::all())]), TargetPolicy::FirstCandidate).await;

    let package = runner.package();
    assert_eq!(package.units.len(), 2);
    assert_eq!(package.units[0].kind, Kind::Account);
    assert!(!package.units[0].selected);
    assert_eq!(package.units[0].targets[0].match_type, MatchType::Email);
    assert_eq!(package.units[0].target, Some(RecordId::from(TARGET_ACCOUNT)));
    assert!(package.units[1].is_create());

    assert_ok!(runner.run(&target, true, false).await);
    assert_eq!(runner.stage(), &PackageStage::Deployed);

    let apps = org::load_array::<Value>(&target, org::APPS).await.unwrap();
    assert_eq!(apps.len(), 1);
    let app = &apps[0];
    assert_ne!(app["_id"], json!(SOURCE_APP));
    assert_eq!(app["did"], json!([SOURCE_APP]));
    assert!(app.get("APNs").is_none());

    let clients = app["clients"].as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["principalId"], json!(TARGET_ACCOUNT));
    assert_eq!(clients[0]["label"], json!("web"));
    assert_ne!(clients[0]["_id"], json!(SOURCE_CLIENT));
    assert_ne!(clients[0]["key"], json!("source-key"));
    assert!(clients[0].get("secret").is_none());

    let app_unit = runner.package().find_unit(&RecordId::from(SOURCE_APP), Kind::App).unwrap();
    assert_eq!(app_unit.target.as_ref().map(|t| t.to_value()), Some(app["_id"].clone()));
}

#[tokio::test]
async fn test_account_cannot_be_created() {
    let source = source();
    let target = store_with(json!({"org": [{"_id": "b000000000000000000000f0"}]}));
    let runner = planned(&source, &target, selecting(&[(Kind::App, Selection::all())]), TargetPolicy::FirstCandidate).await;

    let err = runner.validate(&target).await.unwrap_err();
    assert_eq!(err.code(), "invalid_argument");
    assert!(err.to_string().contains("Accounts cannot be created"));
    assert!(org::load_array::<Value>(&target, org::APPS).await.unwrap().is_empty());
}
