use deploy_models::{DeploymentPackage, Kind, MigrationUnit, PackageOptions, RecordId};
use envshift::contract::{org, KindHandler, WriteContext, WriteMode};
use envshift::deploy::runner::PackageRunner;
use envshift::handlers::handler_for;
use serde_json::{json, Map, Value};
use tokio_test::assert_ok;

use crate::support::{store_with, PRINCIPAL};

const POLICY: &str = "a000000000000000000000a1";
const APP: &str = "a000000000000000000000a2";

fn unit(id: &str, kind: Kind, target: RecordId, payload: Value) -> MigrationUnit {
    let mut unit = MigrationUnit::new(RecordId::from(id), kind);
    unit.selected = true;
    unit.target = Some(target);
    if let Value::Object(source) = &payload {
        let mut snapshot = Map::new();
        for key in ["name", "label"] {
            if let Some(value) = source.get(key) {
                snapshot.insert(key.to_string(), value.clone());
            }
        }
        unit.source = snapshot;
    }
    unit.payload = Some(payload);
    unit
}

fn gate_policy() -> MigrationUnit {
    unit(
        POLICY,
        Kind::Policy,
        RecordId::empty(),
        json!({"_id": POLICY, "name": "c_gate", "label": "Gate", "appWhitelist": [APP]}),
    )
}

fn target() -> record_store::MemoryStore {
    store_with(json!({"org": [{"_id": "b000000000000000000000f0", "policies": []}]}))
}

#[tokio::test]
async fn test_unmapped_app_reference_fails_validation() {
    let target = target();
    let before = target.snapshot().await;

    let mut package = DeploymentPackage::new(Default::default(), PackageOptions::default());
    package.units.push(gate_policy());
    let runner = PackageRunner::new(package, RecordId::from(PRINCIPAL));

    let err = runner.validate(&target).await.unwrap_err();
    assert_eq!(err.code(), "not_found");
    assert!(err.to_string().contains("Missing mapping source app for policy Gate"));

    // Validation works on a scratch copy
    assert_eq!(target.snapshot().await, before);
}

#[tokio::test]
async fn test_app_created_later_is_skipped_while_validating() {
    let target = target();
    let units = vec![
        unit(
            APP,
            Kind::App,
            RecordId::empty(),
            json!({"_id": APP, "name": "c_portal", "clients": [{}]}),
        ),
        gate_policy(),
    ];
    let options = PackageOptions::default();
    let principal = RecordId::from(PRINCIPAL);
    let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Validating);

    assert_ok!(handler_for(Kind::Policy).validate_for_target(&mut ctx).await);

    let policies: Vec<Value> = org::load_array(&target, org::POLICIES).await.unwrap();
    assert_eq!(policies.len(), 1);
    assert_eq!(policies[0]["appWhitelist"], json!([]));
    assert_eq!(policies[0]["did"], json!([POLICY]));
}

#[tokio::test]
async fn test_resolved_app_reference_is_rewritten() {
    let target = target();
    let units = vec![
        unit(
            APP,
            Kind::App,
            RecordId::from("b000000000000000000000a2"),
            json!({"_id": APP, "name": "c_portal", "clients": [{}]}),
        ),
        gate_policy(),
    ];
    let options = PackageOptions::default();
    let principal = RecordId::from(PRINCIPAL);
    let mut ctx = WriteContext::new(&target, &units, &options, &principal, WriteMode::Deploying);

    assert_ok!(handler_for(Kind::Policy).deploy(&mut ctx).await);

    let policies: Vec<Value> = org::load_array(&target, org::POLICIES).await.unwrap();
    assert_eq!(policies[0]["appWhitelist"], json!(["b000000000000000000000a2"]));
    let written = ctx.resolutions.get(Kind::Policy, &RecordId::from(POLICY)).cloned();
    assert_eq!(written.map(|id| id.to_value()), Some(policies[0]["_id"].clone()));
}
