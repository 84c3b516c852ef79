#![forbid(unsafe_code)]

//! Process-level guards for the gateway binary.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Refuses to start under uid 0. The gateway only reads its asset root and
/// appends to its own log, so it never needs elevated rights.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::effective(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; start the gateway as an unprivileged user");
    }
    Ok(())
}
