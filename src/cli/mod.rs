// Copyright 2024-2026 unit-core Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI module for unit-core commands.
//!
//! ## Usage
//!
//! ```bash
//! unit-core-cli discover units/         # List manifests and rejections
//! unit-core-cli plan units/             # Print the load order
//! unit-core-cli load units/             # Load everything the plan allows
//! unit-core-cli swap units/ auth 1.2.0  # Hot-swap one unit
//! ```

pub mod config_cmd;
pub mod units_cmd;

use std::path::Path;
use std::sync::Arc;

use crate::config;
use crate::units::PassiveUnitFactory;
use crate::Runtime;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Configuration or usage error.
pub const EXIT_USAGE: i32 = 2;

/// Runtime over `dir` (or `UNIT_CORE_MANIFEST_DIR`) with passive units.
pub fn build_runtime(dir: Option<&Path>) -> Runtime {
    let mut runtime_config = config::load().runtime_config();
    if let Some(dir) = dir {
        runtime_config.manifest_dir = dir.to_path_buf();
    }
    let runtime = Runtime::new(runtime_config);
    runtime.set_default_factory(Arc::new(PassiveUnitFactory));
    runtime
}
