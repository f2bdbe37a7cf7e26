//! Stamps the envshift binary with its commit and build time.
//! `ENVSHIFT_GIT_HASH` overrides the commit for builds outside a checkout.

use std::env;
use std::process::Command;

use chrono::Utc;

fn commit() -> String {
    if let Ok(hash) = env::var("ENVSHIFT_GIT_HASH") {
        return hash;
    }
    Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", commit());
    println!("cargo:rustc-env=BUILD_TIME={}", Utc::now().to_rfc3339());

    println!("cargo:rerun-if-env-changed=ENVSHIFT_GIT_HASH");
    println!("cargo:rerun-if-changed=../.git/HEAD");
}
