//! Package enumeration, dependency closure and target choice

use deploy_models::{Kind, PackageOptions, PackageStage, RecordId, SelectMode, Selection};
use envshift::deploy::runner::PackageRunner;
use serde_json::json;
use tokio_test::assert_err;

use crate::support::{selecting, store_with, PRINCIPAL};

const POLICY: &str = "a000000000000000000000a1";
const APP: &str = "a000000000000000000000a2";
const ACCOUNT: &str = "a000000000000000000000a3";

fn source() -> record_store::MemoryStore {
    store_with(json!({
        "org": [{
            "_id": "a000000000000000000000f0",
            "policies": [{"_id": POLICY, "name": "c_gate", "label": "Gate", "appWhitelist": [APP]}],
            "apps": [{
                "_id": APP,
                "name": "c_portal",
                "label": "Portal",
                "clients": [{"_id": "a000000000000000000000a4", "principalId": ACCOUNT}]
            }]
        }],
        "accounts": [{"_id": ACCOUNT, "email": "ops@example.com", "name": {"first": "Ada"}}]
    }))
}

async fn build(source: &record_store::MemoryStore, kinds: &[(Kind, Selection)]) -> Result<PackageRunner, envshift::errors::MigrationError> {
    PackageRunner::build_package(
        source,
        selecting(kinds),
        PackageOptions::default(),
        RecordId::from(PRINCIPAL),
    )
    .await
}

#[tokio::test]
async fn test_dependencies_are_pulled_in_unselected() {
    let source = source();
    let runner = build(&source, &[(Kind::Policy, Selection::include(vec![RecordId::from(POLICY)]))])
        .await
        .unwrap();
    let package = runner.package();

    let kinds: Vec<Kind> = package.units.iter().map(|u| u.kind).collect();
    assert_eq!(kinds, vec![Kind::Account, Kind::App, Kind::Policy]);

    let policy = package.find_unit(&RecordId::from(POLICY), Kind::Policy).unwrap();
    assert!(policy.selected);
    assert_eq!(policy.label(), "Gate");

    for (id, kind) in [(APP, Kind::App), (ACCOUNT, Kind::Account)] {
        let unit = package.find_unit(&RecordId::from(id), kind).unwrap();
        assert!(!unit.selected);
        let selection = package.selection(kind);
        assert_eq!(selection.select, SelectMode::Include);
        assert!(selection.admits(&RecordId::from(id)));
    }
    assert_eq!(runner.stage(), &PackageStage::SourceMappings);
}

#[tokio::test]
async fn test_selecting_nothing_builds_an_empty_package() {
    let source = source();
    let runner = build(&source, &[]).await.unwrap();
    assert!(runner.package().units.is_empty());
}

#[tokio::test]
async fn test_script_with_unknown_export_still_builds() {
    let source = store_with(json!({
        "scripts": [{
            "_id": "a000000000000000000000a5",
            "type": "job",
            "label": "Nightly",
            "script": "return;",
            "requires": ["c_missing_lib"]
        }]
    }));
    let runner = build(&source, &[(Kind::Script, Selection::all())]).await.unwrap();
    let units = &runner.package().units;
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].label(), "Nightly");
    assert!(units[0].dependencies.is_empty());
}

#[tokio::test]
async fn test_missing_library_export_fails_the_build() {
    let source = store_with(json!({
        "org": [{
            "_id": "a000000000000000000000f0",
            "policies": [{
                "_id": POLICY,
                "name": "c_gate",
                "script": {"script": "return true", "requires": ["c_missing_util"]}
            }]
        }]
    }));
    let result = build(&source, &[(Kind::Policy, Selection::all())]).await;
    let err = assert_err!(result);
    assert_eq!(err.code(), "invalid_argument");
    assert!(err.to_string().contains("Missing dependency c_missing_util (script)"));
}

#[tokio::test]
async fn test_targets_follow_the_stage() {
    let source = source();
    let target = store_with(json!({
        "org": [{
            "_id": "b000000000000000000000f0",
            "apps": [{"_id": "b000000000000000000000a2", "name": "c_portal", "clients": [{"_id": "b000000000000000000000a4"}]}]
        }],
        "accounts": [{"_id": "b000000000000000000000a3", "email": "ops@example.com"}]
    }));
    let mut runner = build(&source, &[(Kind::Policy, Selection::all())]).await.unwrap();

    let early = runner.choose_target(Kind::App, &RecordId::from(APP), RecordId::from("b000000000000000000000a2"));
    assert_eq!(assert_err!(early).code(), "stage");

    runner.match_targets(&target).await.unwrap();
    assert_eq!(runner.stage(), &PackageStage::TargetMappings);

    // An app with a matching candidate cannot be created anew
    let create = runner.choose_target(Kind::App, &RecordId::from(APP), RecordId::empty());
    assert_eq!(assert_err!(create).code(), "invalid_argument");

    runner
        .choose_target(Kind::App, &RecordId::from(APP), RecordId::from("b000000000000000000000a2"))
        .unwrap();
    runner
        .choose_target(Kind::Account, &RecordId::from(ACCOUNT), RecordId::from("b000000000000000000000a3"))
        .unwrap();
    assert_eq!(runner.stage(), &PackageStage::TargetMappings);

    runner
        .choose_target(Kind::Policy, &RecordId::from(POLICY), RecordId::empty())
        .unwrap();
    assert_eq!(runner.stage(), &PackageStage::Deployment);
}
