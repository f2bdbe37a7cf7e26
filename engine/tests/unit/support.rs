//! Shared fixtures

use std::collections::BTreeMap;

use deploy_models::{Kind, PackageOptions, RecordId, Selection};
use envshift::deploy::plan::TargetPolicy;
use envshift::deploy::runner::PackageRunner;
use record_store::{Document, MemoryStore, StoreSnapshot};
use serde_json::{json, Value};

pub const PRINCIPAL: &str = "c000000000000000000000c0";

pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => panic!("not an object"),
    }
}

/// A store holding the given collections, e.g. `{"org": [...], "scripts": [...]}`
pub fn store_with(collections: Value) -> MemoryStore {
    let snapshot: StoreSnapshot = serde_json::from_value(json!({ "collections": collections })).unwrap();
    MemoryStore::from_snapshot(snapshot)
}

pub fn selecting(kinds: &[(Kind, Selection)]) -> BTreeMap<Kind, Selection> {
    kinds.iter().cloned().collect()
}

/// Build, match and resolve targets by policy, then load payloads
pub async fn planned(
    source: &MemoryStore,
    target: &MemoryStore,
    configuration: BTreeMap<Kind, Selection>,
    policy: TargetPolicy,
) -> PackageRunner {
    let mut runner = PackageRunner::build_package(
        source,
        configuration,
        PackageOptions::default(),
        RecordId::from(PRINCIPAL),
    )
    .await
    .unwrap();
    runner.match_targets(target).await.unwrap();
    runner.apply_policy(policy).unwrap();
    runner.load_payloads(source).await.unwrap();
    runner
}
