//! Scripted pull target.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tidesync_engine::{Page, PullTarget, SyncError, SyncResult, TargetRegistry};

type PageHook = Box<dyn Fn(usize) + Send + Sync>;
type ErrorFactory = Box<dyn Fn() -> SyncError + Send + Sync>;

/// A pull target serving a fixed list of pages.
///
/// Cursors are page indexes. Every fetch serves the script from the first
/// page, whatever the watermark; requested watermarks are recorded.
pub struct ScriptedPullTarget {
    kind: String,
    pages: Vec<Vec<Value>>,
    total_size: Option<i64>,
    ordered: bool,
    remote_ids: Mutex<HashSet<String>>,
    watermarks: Mutex<Vec<i64>>,
    failure: Option<(usize, ErrorFactory)>,
    hook: Option<PageHook>,
}

impl ScriptedPullTarget {
    /// Creates a target serving `pages` in order.
    ///
    /// The ids of all scripted records count as existing remotely.
    pub fn new(pages: Vec<Vec<Value>>) -> Self {
        let remote_ids = pages
            .iter()
            .flatten()
            .filter_map(|r| r.get("Id").and_then(Value::as_str).map(str::to_string))
            .collect();
        Self {
            kind: "scripted-pull".to_string(),
            pages,
            total_size: None,
            ordered: false,
            remote_ids: Mutex::new(remote_ids),
            watermarks: Mutex::new(Vec::new()),
            failure: None,
            hook: None,
        }
    }

    /// Sets the descriptor kind used to rebuild the target.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Reports `total_size` instead of the number of scripted records.
    pub fn with_total_size(mut self, total_size: i64) -> Self {
        self.total_size = Some(total_size);
        self
    }

    /// Declares pages ordered by modification time.
    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    /// Fails when page `index` is requested.
    pub fn failing_at_page<F>(mut self, index: usize, error: F) -> Self
    where
        F: Fn() -> SyncError + Send + Sync + 'static,
    {
        self.failure = Some((index, Box::new(error)));
        self
    }

    /// Calls `hook` with the page index before serving each page.
    pub fn with_page_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Wraps the target for sharing with the engine.
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Registers `target` under its kind so re-runs rebuild it.
    pub fn register(target: &Arc<Self>, registry: &TargetRegistry) {
        let shared = Arc::clone(target);
        registry.register_pull(target.kind.clone(), move |_| {
            Ok(Arc::clone(&shared) as Arc<dyn PullTarget>)
        });
    }

    /// Removes ids from the remote record set.
    pub fn delete_remote<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut remote = self.remote_ids.lock();
        for id in ids {
            remote.remove(id);
        }
    }

    /// Watermarks passed to `start_fetch`, in call order.
    pub fn requested_watermarks(&self) -> Vec<i64> {
        self.watermarks.lock().clone()
    }

    fn serve(&self, index: usize) -> SyncResult<Option<Page>> {
        if let Some(hook) = &self.hook {
            hook(index);
        }
        if let Some((failing, error)) = &self.failure {
            if *failing == index {
                return Err(error());
            }
        }
        let Some(records) = self.pages.get(index) else {
            return Ok(None);
        };
        let next = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        let total_size = self
            .total_size
            .unwrap_or_else(|| self.pages.iter().map(Vec::len).sum::<usize>() as i64);
        Ok(Some(Page::new(records.clone(), total_size, next)))
    }
}

impl PullTarget for ScriptedPullTarget {
    fn descriptor(&self) -> Value {
        json!({"kind": self.kind})
    }

    fn start_fetch(&self, watermark: i64) -> SyncResult<Page> {
        self.watermarks.lock().push(watermark);
        let first = self.serve(0)?;
        Ok(first.unwrap_or_else(|| Page::new(Vec::new(), 0, None)))
    }

    fn continue_fetch(&self, cursor: &str) -> SyncResult<Option<Page>> {
        let index = cursor
            .parse()
            .map_err(|_| SyncError::target(format!("invalid cursor: {cursor}")))?;
        self.serve(index)
    }

    fn is_page_order_guaranteed_by_mod_time(&self) -> bool {
        self.ordered
    }

    fn remote_ids(&self, ids: &[String]) -> SyncResult<HashSet<String>> {
        let remote = self.remote_ids.lock();
        Ok(ids
            .iter()
            .filter(|id| remote.contains(*id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::remote_record;
    use tidesync_engine::TargetFactory;

    #[test]
    fn test_pages_and_cursors() {
        let target = ScriptedPullTarget::new(vec![
            vec![remote_record("1", 10), remote_record("2", 20)],
            vec![remote_record("3", 30)],
        ]);

        let first = target.start_fetch(-1).unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.total_size, 3);
        assert_eq!(first.next.as_deref(), Some("1"));

        let second = target.continue_fetch("1").unwrap().unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next.is_none());
        assert!(target.continue_fetch("2").unwrap().is_none());
        assert_eq!(target.requested_watermarks(), vec![-1]);
    }

    #[test]
    fn test_empty_script() {
        let target = ScriptedPullTarget::new(Vec::new());
        let page = target.start_fetch(5).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total_size, 0);
    }

    #[test]
    fn test_failure_and_remote_ids() {
        let target = ScriptedPullTarget::new(vec![vec![remote_record("1", 10)], vec![]])
            .failing_at_page(1, || SyncError::transport_retryable("reset"));
        assert!(target.continue_fetch("1").unwrap_err().is_retryable());

        target.delete_remote(["1"]);
        let ids = target.remote_ids(&["1".to_string()]).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_register_rebuilds_same_target() {
        let target = ScriptedPullTarget::new(Vec::new())
            .with_kind("accounts")
            .shared();
        let registry = TargetRegistry::new();
        ScriptedPullTarget::register(&target, &registry);

        let rebuilt = registry.pull_target(&json!({"kind": "accounts"})).unwrap();
        rebuilt.start_fetch(7).unwrap();
        assert_eq!(target.requested_watermarks(), vec![7]);
    }
}
