//! Fuzz target for manifest parsing.
//!
//! Arbitrary text must never panic the JSON or TOML manifest parsers, and
//! anything accepted must carry a valid identifier and version.

#![no_main]

use libfuzzer_sys::fuzz_target;
use unit_core::units::manifest::{is_valid_identifier, ManifestFormat, UnitManifest};

fuzz_target!(|data: &str| {
    for format in [ManifestFormat::Json, ManifestFormat::Toml] {
        if let Ok(manifest) = UnitManifest::parse(data, format, "fuzz") {
            assert!(is_valid_identifier(&manifest.identifier));
            assert!(manifest.declared_version().is_ok());
            assert!(manifest.dependencies.iter().all(|d| is_valid_identifier(d)));
        }
    }
});
