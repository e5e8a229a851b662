//! This crate reexports all onion request crates of the workspace.

pub use onion_binary_io as binary_io;
pub use onion_core as core;
pub use onion_crypto as crypto;
pub use onion_packet as packet;

pub use onion_core::config::OnionConfig;
pub use onion_core::context::OnionRoutingContext;
pub use onion_core::errors::OnionRequestError;
pub use onion_core::events::Event;
pub use onion_core::store::{DirectoryStore, MemoryStore};

/// The crate version string in the form "major.minor.patch" (e.g. "1.2.3")
pub fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// The crate version as `(major, minor, patch)`. Components that are not
/// numbers are reported as zero.
pub fn crate_version_parts() -> (u32, u32, u32) {
    let part = |part: &str| part.parse().unwrap_or(0);
    (
        part(env!("CARGO_PKG_VERSION_MAJOR")),
        part(env!("CARGO_PKG_VERSION_MINOR")),
        part(env!("CARGO_PKG_VERSION_PATCH")),
    )
}
