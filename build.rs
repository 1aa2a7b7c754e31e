//! Build script for ocpp-central
//!
//! Emits build metadata for the `version` command using vergen

use vergen::EmitBuilder;

fn main() {
    if let Err(error) = EmitBuilder::builder()
        .all_build()
        .all_cargo()
        .all_git()
        .all_rustc()
        .emit()
    {
        eprintln!("Failed to generate build info: {}", error);
        std::process::exit(1);
    }
}
