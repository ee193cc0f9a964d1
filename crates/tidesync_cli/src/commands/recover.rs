//! Recover command implementation.

use super::open_states;
use std::path::Path;
use tracing::info;

/// Runs the recover command.
///
/// Jobs left RUNNING by a process that exited mid-sync are marked STOPPED
/// so the next restart resumes them.
pub fn run(path: &Path, syncs: &str) -> Result<(), Box<dyn std::error::Error>> {
    let states = open_states(path, syncs)?;
    let recovered = states.recover_interrupted()?;
    info!(recovered, "interrupted jobs recovered");
    println!("Recovered {recovered} interrupted job(s)");
    Ok(())
}
