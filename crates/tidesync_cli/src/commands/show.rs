//! Show command implementation.

use super::{open_states, parse_key};
use std::path::Path;

/// Runs the show command, printing the job record as JSON.
pub fn run(path: &Path, syncs: &str, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let states = open_states(path, syncs)?;
    let key = parse_key(job)?;
    let sync = states
        .get(&key)?
        .ok_or_else(|| format!("No job found with {key}"))?;
    println!("{}", serde_json::to_string_pretty(&sync)?);
    Ok(())
}
