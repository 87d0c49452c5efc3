//! Run metadata tracking.
//!
//! Every pipeline stage invocation is recorded as a [`Run`] inside an
//! [`Experiment`]. Runs carry a mutable tag set while `RUNNING` and become
//! read-only once finalized. Downstream stages discover upstream outputs by
//! searching runs on the `artifactName` tag.
//!
//! # Usage
//!
//! ```rust,ignore
//! use runforge::tracking::{tags, MetadataStore, RunFilter, RunOrder};
//!
//! let store = MetadataStore::open(db_path, artifact_root).await?;
//! let exp = store.get_or_create_experiment("iris_pipeline").await?;
//!
//! let run = store.create_run(&exp.experiment_id).await?;
//! store.set_tag(&run.run_id, tags::ARTIFACT_NAME, "iris.csv").await?;
//! store.finish_run(&run.run_id).await?;
//!
//! let filter = RunFilter::new().with_tag(tags::ARTIFACT_NAME, "iris.csv");
//! let latest = store
//!     .search(&exp.experiment_id, &filter, RunOrder::StartTimeDesc)
//!     .await?
//!     .next();
//! ```

pub mod run;
pub mod search;
pub mod store;

pub use run::{tags, Experiment, Run, RunStatus};
pub use search::{RunCursor, RunFilter, RunOrder};
pub use store::MetadataStore;
