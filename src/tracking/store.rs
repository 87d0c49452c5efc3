//! SQLite-backed run metadata store.
//!
//! Records experiments, runs and run tags. History is append-only: runs are
//! never deleted, and once a run leaves the `RUNNING` status its tags are
//! frozen.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::artifacts::ArtifactUri;
use crate::error::TrackingError;

use super::run::{millis_to_datetime, Experiment, Run, RunStatus};
use super::search::{RunCursor, RunFilter, RunOrder, RunRow};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS experiments (
    experiment_id   TEXT    PRIMARY KEY,
    name            TEXT    NOT NULL UNIQUE,
    created_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id              TEXT    PRIMARY KEY,
    experiment_id       TEXT    NOT NULL REFERENCES experiments(experiment_id),
    start_time          INTEGER NOT NULL,
    end_time            INTEGER,
    status              TEXT    NOT NULL DEFAULT 'RUNNING',
    artifact_uri_root   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS tags (
    run_id  TEXT NOT NULL REFERENCES runs(run_id),
    key     TEXT NOT NULL,
    value   TEXT NOT NULL,
    PRIMARY KEY (run_id, key)
);

CREATE INDEX IF NOT EXISTS idx_runs_experiment_start ON runs(experiment_id, start_time, run_id);
CREATE INDEX IF NOT EXISTS idx_tags_key_value ON tags(key, value);
"#;

/// Run ids bound per tag query, under SQLite's host parameter limit.
const TAG_QUERY_BATCH: usize = 500;

/// Handle to the run metadata store.
///
/// Cheap to clone; clones share one connection pool. Pass it explicitly to
/// every component that needs it.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
    artifact_root: ArtifactUri,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("artifact_root", &self.artifact_root.as_str())
            .finish()
    }
}

impl MetadataStore {
    /// Opens (creating if missing) the store at `path`.
    ///
    /// `artifact_root` is the base under which new runs get their
    /// artifact directory.
    pub async fn open(path: &Path, artifact_root: ArtifactUri) -> Result<Self, TrackingError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TrackingError::StoreUnavailable(format!(
                    "cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| TrackingError::StoreUnavailable(e.to_string()))?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = %path.display(), "Metadata store opened");
        Ok(Self {
            pool,
            artifact_root,
        })
    }

    pub fn artifact_root(&self) -> &ArtifactUri {
        &self.artifact_root
    }

    // =========================================================================
    // Experiments
    // =========================================================================

    pub async fn get_experiment_by_name(
        &self,
        name: &str,
    ) -> Result<Option<Experiment>, TrackingError> {
        let row = sqlx::query(
            "SELECT experiment_id, name, created_at FROM experiments WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| experiment_from_row(&r)))
    }

    pub async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment, TrackingError> {
        let row = sqlx::query(
            "SELECT experiment_id, name, created_at FROM experiments WHERE experiment_id = ?1",
        )
        .bind(experiment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| experiment_from_row(&r))
            .ok_or_else(|| TrackingError::ExperimentNotFound(experiment_id.to_string()))
    }

    /// Creates a new experiment. Fails if the name is already taken.
    pub async fn create_experiment(&self, name: &str) -> Result<Experiment, TrackingError> {
        let experiment = Experiment {
            experiment_id: Uuid::new_v4().simple().to_string(),
            name: name.to_string(),
            created_at: millis_to_datetime(Utc::now().timestamp_millis()),
        };

        let result = sqlx::query(
            "INSERT INTO experiments (experiment_id, name, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(&experiment.experiment_id)
        .bind(&experiment.name)
        .bind(experiment.created_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    experiment = name,
                    experiment_id = %experiment.experiment_id,
                    "Created experiment"
                );
                Ok(experiment)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(TrackingError::ExperimentExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the experiment named `name`, creating it if it does not exist.
    ///
    /// Safe against concurrent callers racing on the same name.
    pub async fn get_or_create_experiment(&self, name: &str) -> Result<Experiment, TrackingError> {
        if let Some(existing) = self.get_experiment_by_name(name).await? {
            return Ok(existing);
        }

        tracing::info!(experiment = name, "Creating new experiment");
        match self.create_experiment(name).await {
            Err(TrackingError::ExperimentExists(_)) => self
                .get_experiment_by_name(name)
                .await?
                .ok_or_else(|| TrackingError::ExperimentNotFound(name.to_string())),
            other => other,
        }
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Allocates a new `RUNNING` run in the experiment.
    ///
    /// Start times are strictly increasing across all runs in the store: a
    /// new run gets the current time in milliseconds, or one more than the
    /// latest start time already recorded, whichever is larger.
    pub async fn create_run(&self, experiment_id: &str) -> Result<Run, TrackingError> {
        self.get_experiment(experiment_id).await?;

        let run_id = Uuid::new_v4().simple().to_string();
        let artifact_uri_root = self
            .artifact_root
            .join(experiment_id)
            .join(&run_id)
            .join("artifacts");

        let row = sqlx::query(
            r#"
            INSERT INTO runs (run_id, experiment_id, start_time, status, artifact_uri_root)
            SELECT ?1, ?2, MAX(?3, COALESCE(MAX(start_time), 0) + 1), 'RUNNING', ?4 FROM runs
            RETURNING start_time
            "#,
        )
        .bind(&run_id)
        .bind(experiment_id)
        .bind(Utc::now().timestamp_millis())
        .bind(artifact_uri_root.as_str())
        .fetch_one(&self.pool)
        .await?;

        let start_time: i64 = row.get("start_time");

        tracing::info!(run_id = %run_id, experiment_id, start_time, "Created run");
        Ok(Run {
            run_id,
            experiment_id: experiment_id.to_string(),
            start_time,
            end_time: None,
            status: RunStatus::Running,
            tags: BTreeMap::new(),
            artifact_uri_root: artifact_uri_root.to_string(),
        })
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Run, TrackingError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT run_id, experiment_id, start_time, end_time, status, artifact_uri_root
            FROM runs
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| TrackingError::RunNotFound(run_id.to_string()))?;

        let tag_rows = sqlx::query("SELECT key, value FROM tags WHERE run_id = ?1")
            .bind(run_id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        let tags: BTreeMap<String, String> = tag_rows
            .iter()
            .map(|r| (r.get("key"), r.get("value")))
            .collect();
        run_row_from(&row).into_run(tags)
    }

    /// Attaches or overwrites tags on a running run.
    ///
    /// All entries are written in one transaction: either every tag lands or
    /// none does.
    pub async fn set_tags(
        &self,
        run_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), TrackingError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> = sqlx::query("SELECT status FROM runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| r.get("status"));

        let status: RunStatus = status
            .ok_or_else(|| TrackingError::RunNotFound(run_id.to_string()))?
            .parse()?;
        if status.is_terminal() {
            return Err(TrackingError::InvalidState {
                run_id: run_id.to_string(),
                status,
            });
        }

        for (key, value) in tags {
            sqlx::query(
                "INSERT INTO tags (run_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(run_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(run_id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(run_id, count = tags.len(), "Tags set");
        Ok(())
    }

    pub async fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        let mut tags = BTreeMap::new();
        tags.insert(key.to_string(), value.to_string());
        self.set_tags(run_id, &tags).await
    }

    /// Finalizes a run as `FINISHED`. Only finished runs are resolvable.
    pub async fn finish_run(&self, run_id: &str) -> Result<(), TrackingError> {
        self.end_run(run_id, RunStatus::Finished).await
    }

    /// Finalizes a run as `FAILED`, keeping its partial history.
    pub async fn fail_run(&self, run_id: &str) -> Result<(), TrackingError> {
        self.end_run(run_id, RunStatus::Failed).await
    }

    /// Finalizes a run as `KILLED` (interrupted before completing).
    pub async fn kill_run(&self, run_id: &str) -> Result<(), TrackingError> {
        self.end_run(run_id, RunStatus::Killed).await
    }

    async fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        let result = sqlx::query(
            "UPDATE runs SET status = ?2, end_time = ?3 WHERE run_id = ?1 AND status = 'RUNNING'",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get_run(run_id).await?;
            return Err(TrackingError::InvalidState {
                run_id: run_id.to_string(),
                status: current.status,
            });
        }

        tracing::info!(run_id, status = %status, "Run finalized");
        Ok(())
    }

    /// Searches runs of one experiment.
    ///
    /// Runs and their tags are read inside one transaction, so the cursor
    /// reflects a single consistent snapshot of the store.
    pub async fn search(
        &self,
        experiment_id: &str,
        filter: &RunFilter,
        order: RunOrder,
    ) -> Result<RunCursor, TrackingError> {
        let mut query = String::from(
            r#"
            SELECT r.run_id, r.experiment_id, r.start_time, r.end_time, r.status, r.artifact_uri_root
            FROM runs r
            WHERE r.experiment_id = ?
            "#,
        );

        if filter.tag.is_some() {
            query.push_str(
                " AND EXISTS (SELECT 1 FROM tags t WHERE t.run_id = r.run_id AND t.key = ? AND t.value = ?)",
            );
        }

        if filter.status.is_some() {
            query.push_str(" AND r.status = ?");
        }

        query.push(' ');
        query.push_str(order.sql());

        if filter.limit.is_some() {
            query.push_str(" LIMIT ?");
        }

        let mut sqlx_query = sqlx::query(&query).bind(experiment_id);

        if let Some((ref key, ref value)) = filter.tag {
            sqlx_query = sqlx_query.bind(key).bind(value);
        }

        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }

        if let Some(limit) = filter.limit {
            sqlx_query = sqlx_query.bind(limit);
        }

        let mut tx = self.pool.begin().await?;

        let rows = sqlx_query.fetch_all(&mut *tx).await?;
        let runs: Vec<RunRow> = rows.iter().map(run_row_from).collect();

        // Tags of the selected runs only, read in the same snapshot.
        let mut tags: HashMap<String, BTreeMap<String, String>> = HashMap::new();
        for batch in runs.chunks(TAG_QUERY_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let tag_query = format!(
                "SELECT run_id, key, value FROM tags WHERE run_id IN ({})",
                placeholders
            );
            let mut sqlx_query = sqlx::query(&tag_query);
            for run in batch {
                sqlx_query = sqlx_query.bind(run.run_id.as_str());
            }
            for row in sqlx_query.fetch_all(&mut *tx).await? {
                let run_id: String = row.get("run_id");
                tags.entry(run_id)
                    .or_default()
                    .insert(row.get("key"), row.get("value"));
            }
        }

        tx.commit().await?;

        Ok(RunCursor::new(runs, tags))
    }

    /// All runs of an experiment, oldest first.
    pub async fn list_runs(&self, experiment_id: &str) -> Result<Vec<Run>, TrackingError> {
        self.search(experiment_id, &RunFilter::new(), RunOrder::StartTimeAsc)
            .await?
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn experiment_from_row(row: &sqlx::sqlite::SqliteRow) -> Experiment {
    Experiment {
        experiment_id: row.get("experiment_id"),
        name: row.get("name"),
        created_at: millis_to_datetime(row.get("created_at")),
    }
}

fn run_row_from(row: &sqlx::sqlite::SqliteRow) -> RunRow {
    RunRow {
        run_id: row.get("run_id"),
        experiment_id: row.get("experiment_id"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: row.get("status"),
        artifact_uri_root: row.get("artifact_uri_root"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::tags;

    async fn open_store(dir: &tempfile::TempDir) -> MetadataStore {
        let root = ArtifactUri::from_path(dir.path().join("artifacts")).unwrap();
        MetadataStore::open(&dir.path().join("tracking.db"), root)
            .await
            .unwrap()
    }

    fn tag_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_get_or_create_experiment_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        assert!(store.get_experiment_by_name("iris").await.unwrap().is_none());

        let first = store.get_or_create_experiment("iris").await.unwrap();
        let second = store.get_or_create_experiment("iris").await.unwrap();
        assert_eq!(first.experiment_id, second.experiment_id);
        assert_eq!(first.name, "iris");

        let err = store.create_experiment("iris").await.unwrap_err();
        assert!(matches!(err, TrackingError::ExperimentExists(_)));
    }

    #[tokio::test]
    async fn test_create_run_requires_known_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        let err = store.create_run("missing").await.unwrap_err();
        assert!(matches!(err, TrackingError::ExperimentNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_times_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();

        let mut last = i64::MIN;
        for _ in 0..20 {
            let run = store.create_run(&exp.experiment_id).await.unwrap();
            assert!(run.start_time > last);
            assert_eq!(run.status, RunStatus::Running);
            last = run.start_time;
        }
    }

    #[tokio::test]
    async fn test_artifact_root_is_scoped_to_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();
        let run = store.create_run(&exp.experiment_id).await.unwrap();

        let root = ArtifactUri::parse(&run.artifact_uri_root).unwrap();
        assert_eq!(
            root.to_path().unwrap(),
            dir.path()
                .join("artifacts")
                .join(&exp.experiment_id)
                .join(&run.run_id)
                .join("artifacts")
        );
    }

    #[tokio::test]
    async fn test_set_tags_overwrites_and_is_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();
        let run = store.create_run(&exp.experiment_id).await.unwrap();

        store
            .set_tags(
                &run.run_id,
                &tag_map(&[(tags::ARTIFACT_NAME, "raw.csv"), (tags::ARTIFACT_TYPE, "raw_data")]),
            )
            .await
            .unwrap();
        store
            .set_tag(&run.run_id, tags::ARTIFACT_NAME, "iris.csv")
            .await
            .unwrap();

        let loaded = store.get_run(&run.run_id).await.unwrap();
        assert_eq!(loaded.artifact_name(), Some("iris.csv"));
        assert_eq!(loaded.tag(tags::ARTIFACT_TYPE), Some("raw_data"));
        assert_eq!(loaded.start_time, run.start_time);
    }

    #[tokio::test]
    async fn test_set_tags_rejects_unknown_and_finalized_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();
        let run = store.create_run(&exp.experiment_id).await.unwrap();

        let err = store.set_tag("nope", "k", "v").await.unwrap_err();
        assert!(matches!(err, TrackingError::RunNotFound(_)));

        store.finish_run(&run.run_id).await.unwrap();
        let err = store.set_tag(&run.run_id, "k", "v").await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::InvalidState {
                status: RunStatus::Finished,
                ..
            }
        ));

        let loaded = store.get_run(&run.run_id).await.unwrap();
        assert!(loaded.tags.is_empty());
        assert!(loaded.end_time.is_some());
    }

    #[tokio::test]
    async fn test_runs_cannot_be_finalized_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();
        let run = store.create_run(&exp.experiment_id).await.unwrap();

        store.fail_run(&run.run_id).await.unwrap();
        let err = store.finish_run(&run.run_id).await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::InvalidState {
                status: RunStatus::Failed,
                ..
            }
        ));

        let err = store.kill_run("nope").await.unwrap_err();
        assert!(matches!(err, TrackingError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_search_filters_by_tag_and_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();

        let mut iris_runs = Vec::new();
        for name in ["iris.csv", "other.csv", "iris.csv"] {
            let run = store.create_run(&exp.experiment_id).await.unwrap();
            store
                .set_tag(&run.run_id, tags::ARTIFACT_NAME, name)
                .await
                .unwrap();
            if name == "iris.csv" {
                iris_runs.push(run.run_id.clone());
            }
        }

        let filter = RunFilter::new().with_tag(tags::ARTIFACT_NAME, "iris.csv");
        let found: Vec<Run> = store
            .search(&exp.experiment_id, &filter, RunOrder::StartTimeDesc)
            .await
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let ids: Vec<&str> = found.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec![iris_runs[1].as_str(), iris_runs[0].as_str()]);
        assert!(found.iter().all(|r| r.artifact_name() == Some("iris.csv")));
    }

    #[tokio::test]
    async fn test_search_is_scoped_to_experiment_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp_a = store.get_or_create_experiment("a").await.unwrap();
        let exp_b = store.get_or_create_experiment("b").await.unwrap();

        let finished = store.create_run(&exp_a.experiment_id).await.unwrap();
        store.finish_run(&finished.run_id).await.unwrap();
        let _running = store.create_run(&exp_a.experiment_id).await.unwrap();
        let _elsewhere = store.create_run(&exp_b.experiment_id).await.unwrap();

        assert_eq!(store.list_runs(&exp_a.experiment_id).await.unwrap().len(), 2);
        assert_eq!(store.list_runs(&exp_b.experiment_id).await.unwrap().len(), 1);

        let filter = RunFilter::new().with_status(RunStatus::Finished);
        let mut cursor = store
            .search(&exp_a.experiment_id, &filter, RunOrder::StartTimeDesc)
            .await
            .unwrap();
        assert_eq!(cursor.remaining(), 1);
        assert_eq!(cursor.next().unwrap().unwrap().run_id, finished.run_id);
    }

    #[tokio::test]
    async fn test_search_breaks_start_time_ties_on_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.create_run(&exp.experiment_id).await.unwrap().run_id);
        }
        sqlx::query("UPDATE runs SET start_time = 42")
            .execute(store.pool())
            .await
            .unwrap();
        ids.sort();
        ids.reverse();

        for _ in 0..3 {
            let order: Vec<String> = store
                .search(&exp.experiment_id, &RunFilter::new(), RunOrder::StartTimeDesc)
                .await
                .unwrap()
                .map(|r| r.unwrap().run_id)
                .collect();
            assert_eq!(order, ids);
        }
    }

    #[tokio::test]
    async fn test_search_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.get_or_create_experiment("iris").await.unwrap();
        for _ in 0..5 {
            store.create_run(&exp.experiment_id).await.unwrap();
        }

        let cursor = store
            .search(
                &exp.experiment_id,
                &RunFilter::new().with_limit(2),
                RunOrder::StartTimeAsc,
            )
            .await
            .unwrap();
        assert_eq!(cursor.count(), 2);
    }

    #[tokio::test]
    async fn test_open_fails_when_location_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let root = ArtifactUri::from_path(dir.path().join("artifacts")).unwrap();
        let err = MetadataStore::open(&blocker.join("tracking.db"), root)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_search_loads_tags_of_selected_runs_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.create_experiment("iris").await.unwrap().experiment_id;

        let mut last = String::new();
        for i in 0..5 {
            let run = store.create_run(&exp).await.unwrap();
            store.set_tag(&run.run_id, tags::ARTIFACT_NAME, "iris.csv").await.unwrap();
            store.set_tag(&run.run_id, "index", &i.to_string()).await.unwrap();
            store.finish_run(&run.run_id).await.unwrap();
            last = run.run_id;
        }

        let filter = RunFilter::new()
            .with_tag(tags::ARTIFACT_NAME, "iris.csv")
            .with_limit(1);
        let cursor = store
            .search(&exp, &filter, RunOrder::StartTimeDesc)
            .await
            .unwrap();
        assert_eq!(cursor.loaded_tag_runs(), 1);

        let runs: Vec<Run> = cursor.collect::<Result<_, _>>().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, last);
        assert_eq!(runs[0].tag("index"), Some("4"));
    }

    #[tokio::test]
    async fn test_list_runs_spans_tag_query_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let exp = store.create_experiment("iris").await.unwrap().experiment_id;

        let total = TAG_QUERY_BATCH + 3;
        for i in 0..total {
            let run = store.create_run(&exp).await.unwrap();
            store.set_tag(&run.run_id, "index", &i.to_string()).await.unwrap();
        }

        let runs = store.list_runs(&exp).await.unwrap();
        assert_eq!(runs.len(), total);
        for (i, run) in runs.iter().enumerate() {
            assert_eq!(run.tag("index"), Some(i.to_string().as_str()));
        }
    }
}
