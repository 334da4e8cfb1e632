//! Tests for manifest discovery from directories and static sources.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use unit_core::units::manifest::content_digest;
use unit_core::units::{DirectorySource, DiscoveryError, ManifestSource, RawManifest, StaticSource, UnitDiscovery};
use unit_core::version::Version;

fn write(dir: &Path, name: &str, content: &str) {
    fs::write(dir.join(name), content).unwrap();
}

const AUTH_JSON: &str = r#"{
    "identifier": "auth",
    "display_name": "Authentication",
    "version": "1.2.0",
    "versions": ["1.3.0", "2.0.0"],
    "capabilities": ["login"],
    "config": {"ttl": 30},
    "description": "Session handling"
}"#;

const BILLING_TOML: &str = r#"
identifier = "billing"
display_name = "Billing"
version = "0.4.1"
dependencies = ["auth"]
"#;

#[test]
fn test_directory_scan_reads_json_and_toml() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "auth.json", AUTH_JSON);
    write(dir.path(), "billing.toml", BILLING_TOML);
    write(dir.path(), "README.md", "not a manifest");

    let descriptors = UnitDiscovery::from_dir(dir.path()).discover().unwrap();
    assert_eq!(descriptors.len(), 2);

    let auth = &descriptors[0];
    assert_eq!(auth.id(), "auth");
    assert_eq!(auth.display_name(), "Authentication");
    assert_eq!(auth.version(), &Version::new(1, 2, 0));
    assert!(auth.offers(&Version::new(2, 0, 0)));
    assert!(auth.offers(&Version::new(1, 2, 0)));
    assert!(!auth.offers(&Version::new(1, 4, 0)));
    assert!(auth.capabilities().contains("login"));
    assert_eq!(auth.default_config()["ttl"], 30);
    assert_eq!(auth.description(), Some("Session handling"));
    assert_eq!(auth.digest(), content_digest(AUTH_JSON));

    let billing = &descriptors[1];
    assert_eq!(billing.id(), "billing");
    assert!(billing.depends_on("auth"));
    assert!(billing.origin().ends_with("billing.toml"));
}

#[test]
fn test_subdirectories_one_level_deep() {
    let dir = tempfile::tempdir().unwrap();
    let auth_dir = dir.path().join("auth");
    let nested = auth_dir.join("deeper");
    fs::create_dir_all(&nested).unwrap();
    write(&auth_dir, "unit.json", AUTH_JSON);
    write(&nested, "billing.toml", BILLING_TOML);

    let descriptors = UnitDiscovery::from_dir(dir.path()).discover().unwrap();
    let ids: Vec<&str> = descriptors.iter().map(|d| d.id()).collect();
    assert_eq!(ids, vec!["auth"]);
}

#[test]
fn test_scan_collects_every_problem() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "auth.json", AUTH_JSON);
    write(dir.path(), "broken.json", r#"{"identifier": "broken", "version": "#);
    write(
        dir.path(),
        "badver.toml",
        "identifier = \"badver\"\ndisplay_name = \"Bad\"\nversion = \"1.0\"\n",
    );

    let report = UnitDiscovery::from_dir(dir.path()).scan().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.ids(), vec!["auth"]);
    assert_eq!(report.errors.len(), 2);
    assert!(report
        .errors
        .iter()
        .any(|e| matches!(e, DiscoveryError::MalformedManifest { id, .. } if id == "badver")));
}

#[test]
fn test_discover_fails_on_first_bad_manifest() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "auth.json", AUTH_JSON);
    write(
        dir.path(),
        "nameless.json",
        r#"{"identifier": "nameless", "display_name": "  ", "version": "1.0.0"}"#,
    );
    let err = UnitDiscovery::from_dir(dir.path()).discover().unwrap_err();
    assert!(matches!(err, DiscoveryError::MalformedManifest { ref id, .. } if id == "nameless"));
}

#[test]
fn test_duplicate_identifier_excludes_all_copies() {
    let source = StaticSource::new()
        .with(RawManifest::json("one.json", AUTH_JSON))
        .with(RawManifest::toml(
            "two.toml",
            "identifier = \"auth\"\ndisplay_name = \"Auth again\"\nversion = \"9.0.0\"\n",
        ))
        .with(RawManifest::toml("billing.toml", BILLING_TOML));

    let report = UnitDiscovery::new(Arc::new(source)).scan().unwrap();
    assert_eq!(report.ids(), vec!["billing"]);
    assert_eq!(report.errors, vec![DiscoveryError::DuplicateIdentifier("auth".into())]);
}

#[test]
fn test_invalid_identifiers_rejected() {
    for id in ["", "has space", "../escape", "-leading"] {
        let content = format!(
            r#"{{"identifier": "{}", "display_name": "X", "version": "1.0.0"}}"#,
            id
        );
        let source = StaticSource::new().with(RawManifest::json("x.json", content));
        let report = UnitDiscovery::new(Arc::new(source)).scan().unwrap();
        assert!(report.descriptors.is_empty(), "{:?} should be rejected", id);
    }
}

#[test]
fn test_missing_directory_is_source_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirectorySource::new(dir.path().join("absent"));
    assert!(source.name().starts_with("dir:"));
    let err = source.manifests().unwrap_err();
    assert!(matches!(err, DiscoveryError::Source { .. }));
    assert!(err.unit().is_none());
}

#[test]
fn test_empty_directory_yields_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let report = UnitDiscovery::from_dir(dir.path()).scan().unwrap();
    assert!(report.is_clean());
    assert!(report.descriptors.is_empty());
}
