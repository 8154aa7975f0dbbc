//! Build script for animpool.
//!
//! Emits build-time diagnostics for feature combinations that are easy to
//! get wrong when integrating the crate.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DEBUG");

    let debug_enabled = env::var("CARGO_FEATURE_DEBUG").is_ok();
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    if debug_enabled && profile == "release" {
        println!("cargo:warning=[animpool] 'debug' feature enabled in release build!");
        println!(
            "cargo:warning=[animpool]    Slot poisoning and per-frame pool verification will run; disable for production."
        );
    }
}
