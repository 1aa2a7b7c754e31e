// versionコマンドの実装

use crate::cli::commands::CommandResult;
use crate::common::types::ProtocolVersion;

pub async fn execute() -> CommandResult {
    println!("ocpp-central {}", env!("CARGO_PKG_VERSION"));
    println!("Build date: {}", env!("VERGEN_BUILD_DATE"));
    println!("Git commit: {}", env!("VERGEN_GIT_SHA"));
    println!("Rust version: {}", env!("VERGEN_RUSTC_SEMVER"));

    let versions: Vec<String> = ProtocolVersion::ALL
        .iter()
        .map(|version| match version.subprotocol() {
            Some(token) => format!("{} ({})", version, token),
            None => format!("{} (envelope)", version),
        })
        .collect();
    println!("OCPP versions: {}", versions.join(", "));

    Ok(())
}
