pub mod catalog;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod git_repo;
pub mod manifests;
pub mod observability;
pub mod orchestrator;
pub mod shared;
pub mod status;

pub use catalog::{CatalogClient, DynCatalogClient, HttpCatalogClient, IndexVersion};
pub use config::{ENV_GIT_MOUNT, EngineConfig};
pub use error::EngineError;
pub use git_repo::GitRepoSync;
pub use manifests::{ManifestReconciler, Scope};
pub use orchestrator::{ReconcileOrchestrator, ReconcileOutcome, SubReconciler};
pub use shared::SharedResourceLifecycle;
pub use status::StatusAggregator;
