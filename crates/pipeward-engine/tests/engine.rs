//! End-to-end reconcile passes against a real git fixture repository and the
//! in-memory store.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use git2::{Repository, Signature};
use tempfile::TempDir;

use pipeward_core::{
    ClusterRole, ClusterRoleBinding, ConditionStatus, DESCRIPTOR_FINALIZER, ImageStream,
    LABEL_OWNING_NAMESPACE, LABEL_SHARED_RESOURCE, ObjectMeta, PipelineDefinition,
    PipelineDescriptor, SecretRecord, SecurityPolicy, StoreObject, TaskDefinition,
};
use pipeward_engine::catalog::{CatalogClient, IndexVersion};
use pipeward_engine::{DynCatalogClient, EngineConfig, EngineError, ReconcileOrchestrator};
use pipeward_store::{DynStore, LabelSelector, MemoryStore, Store, StoreExt};

struct FixedCatalog;

#[async_trait]
impl CatalogClient for FixedCatalog {
    async fn index_versions(&self, _organization: &str) -> Result<Vec<IndexVersion>, EngineError> {
        Ok(vec![IndexVersion {
            version: "4.16".to_string(),
            end_of_life: None,
        }])
    }
}

fn write_manifest(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, contents).expect("write manifest");
}

/// Builds the manifest source repository with a single tagged release.
fn fixture_source_repo() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();

    for (file, name) in [
        ("manifests/pipelines/ci-pipeline.yml", "ci-pipeline"),
        ("manifests/pipelines/hosted-pipeline.yml", "hosted-pipeline"),
        ("manifests/pipelines/release-pipeline.yml", "release-pipeline"),
    ] {
        write_manifest(
            root,
            file,
            &format!("metadata:\n  name: {name}\nspec:\n  steps: 3\n"),
        );
    }
    for (file, name) in [
        ("manifests/tasks/build-task.yml", "build-task"),
        ("manifests/tasks/test-task.yml", "test-task"),
    ] {
        write_manifest(
            root,
            file,
            &format!("metadata:\n  name: {name}\nspec:\n  image: builder\n"),
        );
    }
    write_manifest(
        root,
        "manifests/cluster/pipeline-runner-role.yml",
        "metadata:\n  name: pipeline-runner\nrules: []\n",
    );
    write_manifest(
        root,
        "manifests/cluster/pipeline-runner-binding.yml",
        "metadata:\n  name: pipeline-runner\nsubjects:\n  - kind: ServiceAccount\n    name: pipeline-runner\nroleRef:\n  kind: ClusterRole\n  name: pipeline-runner\n",
    );
    write_manifest(
        root,
        "manifests/cluster/pipeline-security-policy.yml",
        "metadata:\n  name: pipeline-scc\nspec: {}\n",
    );

    let repo = Repository::init(root).expect("init");
    let sig = Signature::now("tester", "tester@pipeward.dev").expect("sig");
    let tree_id = {
        let mut index = repo.index().expect("index");
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .expect("add");
        index.write().expect("write index");
        index.write_tree().expect("tree")
    };
    let tree = repo.find_tree(tree_id).expect("find tree");
    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, "manifests", &tree, &[])
        .expect("commit");
    let commit = repo.find_commit(commit_id).expect("find commit");
    repo.tag_lightweight("v1.0.0", commit.as_object(), false)
        .expect("tag");
    dir
}

struct Harness {
    store: Arc<MemoryStore>,
    orchestrator: ReconcileOrchestrator,
    _source: TempDir,
    _mount: TempDir,
}

fn harness() -> Harness {
    let _ = dotenvy::dotenv();

    let source = fixture_source_repo();
    let mount = TempDir::new().expect("mount");
    let toml = format!(
        "[manifests]\nrepo_url = \"{}\"\n",
        source.path().display()
    );
    let config = Arc::new(
        EngineConfig::from_sources(
            Some(&toml),
            Some(mount.path().display().to_string()),
        )
        .expect("config"),
    );
    pipeward_engine::observability::init_from_config(&config.logging);

    let store = Arc::new(MemoryStore::new());
    let dyn_store: DynStore = store.clone();
    let catalog: DynCatalogClient = Arc::new(FixedCatalog);
    let orchestrator = ReconcileOrchestrator::new(dyn_store, config, catalog);
    Harness {
        store,
        orchestrator,
        _source: source,
        _mount: mount,
    }
}

async fn seed_secret(store: &MemoryStore, namespace: &str, name: &str, key: &str) {
    let mut secret = SecretRecord {
        metadata: ObjectMeta::namespaced(name, namespace),
        data: BTreeMap::from([(key.to_string(), "c2VjcmV0".to_string())]),
    };
    store.create_object(&mut secret).await.expect("create secret");
}

async fn seed_dependencies(store: &MemoryStore, namespace: &str) {
    seed_secret(store, namespace, "kubeconfig", "kubeconfig").await;
    seed_secret(store, namespace, "git-api-token", "GIT_TOKEN").await;
    seed_secret(store, namespace, "catalog-api-secret", "catalog_api_key").await;
    for stream in ["certified-index", "marketplace-index"] {
        let mut stream = ImageStream {
            metadata: ObjectMeta::namespaced(stream, namespace),
            ..Default::default()
        };
        store.create_object(&mut stream).await.expect("create stream");
    }
}

async fn seed_descriptor(store: &MemoryStore, namespace: &str, name: &str) -> PipelineDescriptor {
    let mut descriptor = PipelineDescriptor {
        metadata: ObjectMeta::namespaced(name, namespace),
        ..Default::default()
    };
    descriptor.spec.release = "v1.0.0".to_string();
    descriptor.spec.apply_ci_pipeline = true;
    store.create_object(&mut descriptor).await.expect("create descriptor");
    descriptor
}

#[tokio::test]
async fn test_happy_path_reconcile_settles_everything() {
    let h = harness();
    seed_dependencies(&h.store, "team-a").await;
    seed_descriptor(&h.store, "team-a", "pipeline").await;

    let outcome = h
        .orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("reconcile");
    assert!(!outcome.requeue);

    let descriptor: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");

    assert!(descriptor.metadata.has_finalizer(DESCRIPTOR_FINALIZER));
    assert!(descriptor.status.repo_hash.is_some());
    assert_eq!(descriptor.status.observed_generation, 1);
    assert_eq!(descriptor.status.conditions.len(), 12);
    for condition in &descriptor.status.conditions {
        assert_eq!(
            condition.status,
            ConditionStatus::True,
            "condition {} is not healthy: {}",
            condition.condition_type,
            condition.message
        );
    }
    assert_eq!(
        descriptor
            .condition("HostedPipelineReady")
            .expect("condition")
            .message,
        "not requested"
    );

    // The enabled pipeline and every task are applied and owned.
    let pipeline: PipelineDefinition = h
        .store
        .get_as(Some("team-a"), "ci-pipeline")
        .await
        .expect("get")
        .expect("applied");
    assert!(pipeline.metadata.has_owner(descriptor.metadata.uid.as_deref().unwrap()));
    for task in ["build-task", "test-task"] {
        let task: Option<TaskDefinition> =
            h.store.get_as(Some("team-a"), task).await.expect("get");
        assert!(task.is_some());
    }
    let disabled: Option<PipelineDefinition> = h
        .store
        .get_as(Some("team-a"), "hosted-pipeline")
        .await
        .expect("get");
    assert!(disabled.is_none());

    // Shared cluster resources carry the cleanup labels.
    let role: ClusterRole = h
        .store
        .get_as(None, "pipeline-runner")
        .await
        .expect("get")
        .expect("applied");
    assert_eq!(
        role.metadata.labels.get(LABEL_SHARED_RESOURCE).map(String::as_str),
        Some("true")
    );
    let binding: ClusterRoleBinding = h
        .store
        .get_as(None, "pipeline-runner-team-a")
        .await
        .expect("get")
        .expect("applied");
    assert_eq!(
        binding.metadata.labels.get(LABEL_OWNING_NAMESPACE).map(String::as_str),
        Some("team-a")
    );
    assert_eq!(binding.subjects[0]["namespace"], "team-a");
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let h = harness();
    seed_dependencies(&h.store, "team-a").await;
    seed_descriptor(&h.store, "team-a", "pipeline").await;

    h.orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("first pass");
    let writes = h.store.mutation_count();

    let outcome = h
        .orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("second pass");
    assert!(!outcome.requeue);
    assert_eq!(h.store.mutation_count(), writes, "second pass must not write");

    let descriptor: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(descriptor.status.conditions.len(), 12);
}

#[tokio::test]
async fn test_pipeline_toggle_round_trip() {
    let h = harness();
    seed_dependencies(&h.store, "team-a").await;
    seed_descriptor(&h.store, "team-a", "pipeline").await;

    h.orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("enable pass");
    let applied: Option<PipelineDefinition> = h
        .store
        .get_as(Some("team-a"), "ci-pipeline")
        .await
        .expect("get");
    assert!(applied.is_some());

    let mut descriptor: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");
    descriptor.spec.apply_ci_pipeline = false;
    h.store.update_object(&mut descriptor).await.expect("update");

    h.orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("disable pass");
    let removed: Option<PipelineDefinition> = h
        .store
        .get_as(Some("team-a"), "ci-pipeline")
        .await
        .expect("get");
    assert!(removed.is_none());

    let descriptor_after: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(
        descriptor_after.condition("CiPipelineReady").expect("condition").message,
        "not requested"
    );

    let mut descriptor = descriptor_after;
    descriptor.spec.apply_ci_pipeline = true;
    h.store.update_object(&mut descriptor).await.expect("update");
    h.orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .expect("re-enable pass");
    let recreated: Option<PipelineDefinition> = h
        .store
        .get_as(Some("team-a"), "ci-pipeline")
        .await
        .expect("get");
    assert!(recreated.is_some());
}

#[tokio::test]
async fn test_missing_secret_halts_and_reports_condition() {
    let h = harness();
    // Secrets deliberately absent.
    seed_descriptor(&h.store, "team-a", "pipeline").await;

    let err = h
        .orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MissingDependency { .. }));

    let descriptor: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");
    let condition = descriptor
        .condition("KubeconfigSecretReady")
        .expect("condition");
    assert_eq!(condition.status, ConditionStatus::False);
    assert_eq!(condition.reason, "NotFound");
    // The pass reported an error, so no finalizer yet.
    assert!(!descriptor.metadata.has_finalizer(DESCRIPTOR_FINALIZER));
}

#[tokio::test]
async fn test_deletion_reference_counting() {
    let h = harness();
    seed_dependencies(&h.store, "team-a").await;
    seed_descriptor(&h.store, "team-a", "pipeline-1").await;
    seed_descriptor(&h.store, "team-a", "pipeline-2").await;

    h.orchestrator
        .reconcile("team-a", "pipeline-1")
        .await
        .expect("reconcile 1");
    h.orchestrator
        .reconcile("team-a", "pipeline-2")
        .await
        .expect("reconcile 2");

    // Delete the first: a sibling remains, shared resources stay.
    h.store
        .delete(PipelineDescriptor::KIND, Some("team-a"), "pipeline-1")
        .await
        .expect("delete");
    h.orchestrator
        .reconcile("team-a", "pipeline-1")
        .await
        .expect("teardown 1");

    let gone: Option<PipelineDescriptor> = h
        .store
        .get_as(Some("team-a"), "pipeline-1")
        .await
        .expect("get");
    assert!(gone.is_none());
    let binding: Option<ClusterRoleBinding> = h
        .store
        .get_as(None, "pipeline-runner-team-a")
        .await
        .expect("get");
    assert!(binding.is_some());

    // Delete the last: everything shared goes.
    h.store
        .delete(PipelineDescriptor::KIND, Some("team-a"), "pipeline-2")
        .await
        .expect("delete");
    h.orchestrator
        .reconcile("team-a", "pipeline-2")
        .await
        .expect("teardown 2");

    let binding: Option<ClusterRoleBinding> = h
        .store
        .get_as(None, "pipeline-runner-team-a")
        .await
        .expect("get");
    let role: Option<ClusterRole> = h.store.get_as(None, "pipeline-runner").await.expect("get");
    let policy: Option<SecurityPolicy> = h.store.get_as(None, "pipeline-scc").await.expect("get");
    assert!(binding.is_none());
    assert!(role.is_none());
    assert!(policy.is_none());

    let shared = h
        .store
        .list(
            ClusterRole::KIND,
            None,
            &LabelSelector::any().with(LABEL_SHARED_RESOURCE, "true"),
        )
        .await
        .expect("list");
    assert!(shared.is_empty());
}

#[tokio::test]
async fn test_unknown_release_is_reported() {
    let h = harness();
    seed_dependencies(&h.store, "team-a").await;
    let mut descriptor = PipelineDescriptor {
        metadata: ObjectMeta::namespaced("pipeline", "team-a"),
        ..Default::default()
    };
    descriptor.spec.release = "v9.9.9".to_string();
    h.store.create_object(&mut descriptor).await.expect("create");

    let err = h
        .orchestrator
        .reconcile("team-a", "pipeline")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ReleaseNotFound { .. }));

    let descriptor: PipelineDescriptor = h
        .store
        .get_as(Some("team-a"), "pipeline")
        .await
        .expect("get")
        .expect("exists");
    let condition = descriptor.condition("GitRepoReady").expect("condition");
    assert_eq!(condition.status, ConditionStatus::False);
}
