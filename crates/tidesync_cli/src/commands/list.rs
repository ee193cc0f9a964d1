//! List command implementation.

use super::open_states;
use serde::Serialize;
use std::path::Path;
use tidesync_engine::{SyncResult, SyncState, SyncStateStore, SyncStatus};

/// One line of the job listing.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    /// Job id.
    pub id: i64,
    /// Job name, if any.
    pub name: Option<String>,
    /// "pull" or "push".
    pub sync_type: String,
    /// Local collection.
    pub collection: String,
    /// Status name.
    pub status: String,
    /// Progress percentage.
    pub progress: u8,
    /// Watermark, -1 if none.
    pub watermark: i64,
}

impl From<&SyncState> for JobSummary {
    fn from(sync: &SyncState) -> Self {
        Self {
            id: sync.id(),
            name: sync.name().map(str::to_string),
            sync_type: sync.sync_type().to_string(),
            collection: sync.collection_name().to_string(),
            status: sync.status().as_str().to_string(),
            progress: sync.progress(),
            watermark: sync.watermark(),
        }
    }
}

/// Collects the summaries of the jobs matching `status`.
pub fn summarize(
    states: &SyncStateStore,
    status: Option<SyncStatus>,
) -> SyncResult<Vec<JobSummary>> {
    let jobs = match status {
        Some(status) => states.with_status(status)?,
        None => states.all()?,
    };
    Ok(jobs.iter().map(JobSummary::from).collect())
}

/// Runs the list command.
pub fn run(
    path: &Path,
    syncs: &str,
    status: Option<SyncStatus>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let states = open_states(path, syncs)?;
    let jobs = summarize(&states, status)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        _ => print_text_output(&jobs),
    }
    Ok(())
}

fn print_text_output(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        println!("No jobs");
        return;
    }
    println!(
        "{:>6}  {:<4}  {:<20}  {:<20}  {:<8}  {:>4}  {:>14}",
        "ID", "TYPE", "NAME", "COLLECTION", "STATUS", "PCT", "WATERMARK"
    );
    for job in jobs {
        println!(
            "{:>6}  {:<4}  {:<20}  {:<20}  {:<8}  {:>3}%  {:>14}",
            job.id,
            job.sync_type,
            job.name.as_deref().unwrap_or("-"),
            job.collection,
            job.status,
            job.progress,
            job.watermark
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tidesync_engine::{SyncOptions, SyncType};
    use tidesync_store::MemoryStore;

    #[test]
    fn test_summarize_filters_by_status() {
        let states = SyncStateStore::new(Arc::new(MemoryStore::new()), "syncs");
        states.setup_collection().unwrap();
        states
            .create(
                SyncType::Pull,
                json!({"kind": "a"}),
                SyncOptions::overwrite(),
                "accounts",
                Some("down"),
            )
            .unwrap();
        states
            .create(
                SyncType::Push,
                json!({"kind": "a"}),
                SyncOptions::overwrite(),
                "accounts",
                None,
            )
            .unwrap();

        let all = summarize(&states, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sync_type, "pull");
        assert_eq!(all[0].name.as_deref(), Some("down"));
        assert_eq!(all[0].status, "NEW");

        assert_eq!(summarize(&states, Some(SyncStatus::New)).unwrap().len(), 2);
        let done = summarize(&states, Some(SyncStatus::Done)).unwrap();
        assert!(done.is_empty());
    }
}
