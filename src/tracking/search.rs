//! Run search filters and result cursors.

use std::collections::{BTreeMap, HashMap};

use crate::error::TrackingError;

use super::run::{Run, RunStatus};

/// Filter criteria for searching runs within one experiment.
#[derive(Debug, Default, Clone)]
pub struct RunFilter {
    /// Equality filter on one tag key/value pair.
    pub tag: Option<(String, String)>,
    /// Restrict to runs in this status.
    pub status: Option<RunStatus>,
    /// Maximum number of results.
    pub limit: Option<i64>,
}

impl RunFilter {
    /// Creates a new empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `tags[key] == value`.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tag = Some((key.into(), value.into()));
        self
    }

    /// Sets the status filter.
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the result limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Ordering of search results.
///
/// `run_id` is always the secondary key, in the same direction as
/// `start_time`, so runs sharing a start time come back in a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    #[default]
    StartTimeDesc,
    StartTimeAsc,
}

impl RunOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            RunOrder::StartTimeDesc => "ORDER BY r.start_time DESC, r.run_id DESC",
            RunOrder::StartTimeAsc => "ORDER BY r.start_time ASC, r.run_id ASC",
        }
    }
}

/// Raw run columns as read from the store.
#[derive(Debug)]
pub(crate) struct RunRow {
    pub run_id: String,
    pub experiment_id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: String,
    pub artifact_uri_root: String,
}

impl RunRow {
    pub(crate) fn into_run(self, tags: BTreeMap<String, String>) -> Result<Run, TrackingError> {
        Ok(Run {
            status: self.status.parse()?,
            run_id: self.run_id,
            experiment_id: self.experiment_id,
            start_time: self.start_time,
            end_time: self.end_time,
            tags,
            artifact_uri_root: self.artifact_uri_root,
        })
    }
}

/// Search results captured from a single read snapshot.
///
/// Rows are decoded into [`Run`]s one at a time as the cursor advances.
/// The cursor is consumed by iteration; issue a new search to read again.
#[derive(Debug)]
pub struct RunCursor {
    rows: std::vec::IntoIter<RunRow>,
    tags: HashMap<String, BTreeMap<String, String>>,
}

impl RunCursor {
    pub(crate) fn new(rows: Vec<RunRow>, tags: HashMap<String, BTreeMap<String, String>>) -> Self {
        Self {
            rows: rows.into_iter(),
            tags,
        }
    }

    #[cfg(test)]
    pub(crate) fn loaded_tag_runs(&self) -> usize {
        self.tags.len()
    }

    /// Number of runs not yet yielded.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl Iterator for RunCursor {
    type Item = Result<Run, TrackingError>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        let tags = self.tags.remove(&row.run_id).unwrap_or_default();
        Some(row.into_run(tags))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
