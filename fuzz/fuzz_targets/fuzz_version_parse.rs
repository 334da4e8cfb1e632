//! Fuzz target for semantic version parsing.
//!
//! Parsing must never panic, and a parsed version must survive a
//! display/parse round trip unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use unit_core::version::Version;

fuzz_target!(|data: &str| {
    if let Ok(version) = Version::parse(data) {
        let reparsed = Version::parse(&version.to_string()).expect("displayed version parses");
        assert_eq!(reparsed, version);
        assert_eq!(reparsed.build(), version.build());
    }
});
