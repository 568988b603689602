use std::fmt;

use serde::Serialize;

/// Build information baked in at compile time by `build.rs`
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub repo_version: &'static str,
    pub build_profile: &'static str,
    pub build_timestamp: &'static str,
    pub build_target: &'static str,
    pub rust_version: &'static str,
}

pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        repo_version: env!("REPO_VERSION"),
        build_profile: env!("BUILD_PROFILE"),
        build_timestamp: env!("BUILD_TIMESTAMP"),
        build_target: env!("BUILD_TARGET"),
        rust_version: env!("RUST_VERSION"),
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "conveyor {} ({})", self.version, self.repo_version)?;
        writeln!(f, "profile: {}", self.build_profile)?;
        writeln!(f, "target: {}", self.build_target)?;
        writeln!(f, "built: {}", self.build_timestamp)?;
        write!(f, "rustc: {}", self.rust_version)
    }
}
