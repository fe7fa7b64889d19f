//! Operation dispatch over the persisted graph.
//!
//! Every call is one load → apply → (save) cycle on a fresh snapshot.
//! Mutations hold the in-process lock and the advisory lock on the document
//! for the whole cycle, so no two writers (in this process or another) ever
//! start from the same snapshot. Reads take no lock and rely on the atomic
//! save to always see a complete document.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task;

use crate::config::Config;
use crate::error::{KgmemError, Result};
use crate::graph::{open_nodes, search_nodes, GraphStore};
use crate::ops::audit::log_operation;
use crate::ops::types::{Operation, OperationOutput, OperationRequest, OperationResponse};
use crate::persist::GraphFile;

/// Entry point for all graph operations. Cheap to clone; clones share the
/// in-process write lock.
#[derive(Debug, Clone)]
pub struct MemoryService {
    file: Arc<GraphFile>,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryService {
    pub fn new(file: GraphFile) -> Self {
        Self {
            file: Arc::new(file),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(GraphFile::new(config.file_path()).with_pretty(config.memory.pretty))
    }

    pub fn file(&self) -> &GraphFile {
        &self.file
    }

    /// Handle a request envelope. Errors are folded into the response.
    pub async fn handle(&self, request: OperationRequest) -> OperationResponse {
        let name = request.operation.clone();
        match self.call(&request.operation, request.parameters).await {
            Ok(result) => OperationResponse::Success { result },
            Err(e) => OperationResponse::failure(&e, Some(&name)),
        }
    }

    /// Validate `name` + `parameters` and run the operation.
    pub async fn call(&self, name: &str, parameters: Value) -> Result<OperationOutput> {
        let started = Instant::now();
        match Operation::parse(name, parameters) {
            Ok(operation) => self.execute(operation).await,
            Err(e) => {
                let outcome = Err(e);
                log_operation(name, false, &outcome, started.elapsed());
                outcome
            }
        }
    }

    /// Run an already-validated operation.
    ///
    /// Mutations take the in-process lock, then the document lock inside the
    /// blocking task. Both guards live in that task, so a caller that drops
    /// this future cannot let a second writer start before the save ends.
    pub async fn execute(&self, operation: Operation) -> Result<OperationOutput> {
        let started = Instant::now();
        let name = operation.name();
        let mutating = operation.is_mutating();

        let guard = if mutating {
            Some(Arc::clone(&self.write_lock).lock_owned().await)
        } else {
            None
        };
        let outcome = self.run_blocking(operation, guard).await;

        log_operation(name, mutating, &outcome, started.elapsed());
        outcome
    }

    async fn run_blocking(
        &self,
        operation: Operation,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> Result<OperationOutput> {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || -> Result<OperationOutput> {
            let document_lock = if guard.is_some() {
                Some(file.lock_exclusive()?)
            } else {
                None
            };
            let outcome = apply(&file, operation);
            drop(document_lock);
            drop(guard);
            outcome
        })
        .await
        .map_err(|e| {
            let reason = format!("storage task failed: {}", e);
            KgmemError::storage(self.file.path(), std::io::Error::new(ErrorKind::Other, reason))
        })?
    }
}

/// Load, apply, and save if anything changed.
fn apply(file: &GraphFile, operation: Operation) -> Result<OperationOutput> {
    let mut store = GraphStore::from_graph(file.load()?);

    let (output, changed) = match operation {
        Operation::CreateEntities { entities } => {
            let created = store.create_entities(entities);
            let changed = !created.is_empty();
            (OperationOutput::Entities(created), changed)
        }
        Operation::CreateRelations { relations } => {
            let created = store.create_relations(relations);
            let changed = !created.is_empty();
            (OperationOutput::Relations(created), changed)
        }
        Operation::AddObservations { observations } => {
            let results = store.add_observations(observations)?;
            let changed = results.iter().any(|r| !r.added_observations.is_empty());
            (OperationOutput::Observations(results), changed)
        }
        Operation::DeleteObservations { deletions } => {
            let deleted = store.delete_observations(deletions);
            (OperationOutput::Deleted { deleted }, deleted > 0)
        }
        Operation::DeleteRelations { relations } => {
            let deleted = store.delete_relations(relations);
            (OperationOutput::Deleted { deleted }, deleted > 0)
        }
        Operation::DeleteEntities { entity_names } => {
            let deleted = store.delete_entities(entity_names);
            (OperationOutput::Deleted { deleted }, deleted > 0)
        }
        Operation::ReadGraph => return Ok(OperationOutput::Graph(store.into_graph())),
        Operation::SearchNodes { query } => {
            return Ok(OperationOutput::Graph(search_nodes(&store.into_graph(), &query)));
        }
        Operation::OpenNodes { names } => {
            return Ok(OperationOutput::Graph(open_nodes(&store.into_graph(), &names)));
        }
    };

    if changed {
        file.save(&store.into_graph())?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::KnowledgeGraph;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (MemoryService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let service = MemoryService::new(GraphFile::new(temp_dir.path().join("memory.json")));
        (service, temp_dir)
    }

    fn graph(output: OperationOutput) -> KnowledgeGraph {
        match output {
            OperationOutput::Graph(g) => g,
            other => panic!("expected graph, got {:?}", other),
        }
    }

    async fn read(service: &MemoryService) -> KnowledgeGraph {
        graph(service.call("read_graph", Value::Null).await.unwrap())
    }

    async fn create(service: &MemoryService, name: &str) -> OperationOutput {
        let params = json!({"entities": [{"name": name, "entityType": "t"}]});
        service.call("create_entities", params).await.unwrap()
    }

    #[tokio::test]
    async fn test_scenario_create_search_delete() {
        let (service, _dir) = setup();

        service
            .call(
                "create_entities",
                json!({"entities": [
                    {
                        "name": "John_Smith",
                        "entityType": "person",
                        "observations": ["Speaks fluent Spanish"]
                    },
                    {"name": "Anthropic", "entityType": "organization"}
                ]}),
            )
            .await
            .unwrap();
        service
            .call(
                "create_relations",
                json!({"relations": [
                    {"from": "John_Smith", "to": "Anthropic", "relationType": "works_at"}
                ]}),
            )
            .await
            .unwrap();

        let full = read(&service).await;
        assert_eq!(full.entities.len(), 2);
        assert_eq!(full.relations.len(), 1);

        let found = graph(service.call("search_nodes", json!({"query": "spanish"})).await.unwrap());
        assert_eq!(found.entities.len(), 1);
        assert_eq!(found.entities[0].name, "John_Smith");
        assert!(found.relations.is_empty());

        service
            .call("delete_entities", json!({"entityNames": ["John_Smith"]}))
            .await
            .unwrap();
        let after = read(&service).await;
        assert_eq!(after.entities.len(), 1);
        assert_eq!(after.entities[0].name, "Anthropic");
        assert!(after.relations.is_empty());
    }

    #[tokio::test]
    async fn test_create_entities_twice_reports_nothing_new() {
        let (service, _dir) = setup();
        let params = json!({"entities": [{"name": "Alice", "entityType": "person"}]});

        let first = service.call("create_entities", params.clone()).await.unwrap();
        assert!(matches!(first, OperationOutput::Entities(ref e) if e.len() == 1));
        let second = service.call("create_entities", params).await.unwrap();
        assert_eq!(second, OperationOutput::Entities(vec![]));
        assert_eq!(read(&service).await.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_add_observations_twice() {
        let (service, _dir) = setup();
        create(&service, "Alice").await;
        let params = json!({"observations": [{"entityName": "Alice", "contents": ["likes tea"]}]});

        let first = service.call("add_observations", params.clone()).await.unwrap();
        let first = serde_json::to_value(first).unwrap();
        assert_eq!(first, json!([{"entityName": "Alice", "addedObservations": ["likes tea"]}]));
        let second = service.call("add_observations", params).await.unwrap();
        let second = serde_json::to_value(second).unwrap();
        assert_eq!(second, json!([{"entityName": "Alice", "addedObservations": []}]));

        let alice = read(&service).await.entity("Alice").cloned().unwrap();
        assert_eq!(alice.observations, vec!["likes tea"]);
    }

    #[tokio::test]
    async fn test_add_observations_missing_entity() {
        let (service, _dir) = setup();
        let params = json!({"observations": [{"entityName": "Ghost", "contents": ["boo"]}]});
        let err = service.call("add_observations", params).await.unwrap_err();
        assert_eq!(err.kind(), "EntityNotFoundError");
        assert!(err.to_string().contains("Ghost"));
    }

    #[tokio::test]
    async fn test_deletes_are_idempotent() {
        let (service, _dir) = setup();
        service
            .call(
                "create_entities",
                json!({"entities": [
                    {"name": "A", "entityType": "t", "observations": ["o1", "o2"]},
                    {"name": "B", "entityType": "t"}
                ]}),
            )
            .await
            .unwrap();
        let relation = json!({"relations": [{"from": "A", "to": "B", "relationType": "r"}]});
        service.call("create_relations", relation).await.unwrap();

        let del_obs = json!({"deletions": [{"entityName": "A", "observations": ["o1"]}]});
        assert_eq!(
            service.call("delete_observations", del_obs.clone()).await.unwrap(),
            OperationOutput::Deleted { deleted: 1 }
        );
        assert_eq!(
            service.call("delete_observations", del_obs).await.unwrap(),
            OperationOutput::Deleted { deleted: 0 }
        );

        let del_rel = json!({"relations": [{"from": "A", "to": "B", "relationType": "r"}]});
        assert_eq!(
            service.call("delete_relations", del_rel.clone()).await.unwrap(),
            OperationOutput::Deleted { deleted: 1 }
        );
        assert_eq!(
            service.call("delete_relations", del_rel).await.unwrap(),
            OperationOutput::Deleted { deleted: 0 }
        );

        let del_ent = json!({"entityNames": ["B", "Nobody"]});
        assert_eq!(
            service.call("delete_entities", del_ent.clone()).await.unwrap(),
            OperationOutput::Deleted { deleted: 1 }
        );
        assert_eq!(
            service.call("delete_entities", del_ent).await.unwrap(),
            OperationOutput::Deleted { deleted: 0 }
        );
    }

    #[tokio::test]
    async fn test_open_nodes() {
        let (service, _dir) = setup();
        service
            .call(
                "create_entities",
                json!({"entities": [
                    {"name": "A", "entityType": "t"},
                    {"name": "B", "entityType": "t"},
                    {"name": "C", "entityType": "t"}
                ]}),
            )
            .await
            .unwrap();
        service
            .call(
                "create_relations",
                json!({"relations": [
                    {"from": "A", "to": "B", "relationType": "r"},
                    {"from": "B", "to": "C", "relationType": "r"}
                ]}),
            )
            .await
            .unwrap();

        let params = json!({"names": ["A", "B", "Z"]});
        let opened = graph(service.call("open_nodes", params).await.unwrap());
        assert_eq!(opened.entities.len(), 2);
        assert_eq!(opened.relations.len(), 1);
        assert_eq!(opened.relations[0].to, "B");
    }

    #[tokio::test]
    async fn test_state_survives_new_service() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("memory.json");
        {
            let service = MemoryService::new(GraphFile::new(&path));
            service
                .call("create_entities", json!({"entities": [{"name": "A", "entityType": "t"}]}))
                .await
                .unwrap();
        }
        let restarted = MemoryService::new(GraphFile::new(&path));
        assert_eq!(read(&restarted).await.entities.len(), 1);
    }

    #[tokio::test]
    async fn test_reads_and_noops_do_not_write() {
        let (service, dir) = setup();
        read(&service).await;
        service
            .call("delete_entities", json!({"entityNames": ["Nobody"]}))
            .await
            .unwrap();
        assert!(!dir.path().join("memory.json").exists());
    }

    #[tokio::test]
    async fn test_handle_envelopes() {
        let (service, _dir) = setup();
        let request: OperationRequest = serde_json::from_value(json!({
            "operation": "frobnicate",
            "parameters": {}
        }))
        .unwrap();
        let response = serde_json::to_value(service.handle(request).await).unwrap();
        assert_eq!(response["error"]["kind"], "UnknownOperationError");
        assert_eq!(response["error"]["operation"], "frobnicate");

        let request: OperationRequest = serde_json::from_value(json!({
            "operation": "read_graph",
            "params": "{}"
        }))
        .unwrap();
        let response = serde_json::to_value(service.handle(request).await).unwrap();
        assert_eq!(response, json!({"result": {"entities": [], "relations": []}}));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported_not_overwritten() {
        let (service, dir) = setup();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = service
            .call("create_entities", json!({"entities": [{"name": "A", "entityType": "t"}]}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "StorageIOError");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_do_not_lose_updates() {
        let (service, _dir) = setup();
        service
            .call("create_entities", json!({"entities": [{"name": "Hub", "entityType": "t"}]}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("Node_{}", i);
                create(&service, &name).await;
                let seen = json!({"observations": [
                    {"entityName": "Hub", "contents": [format!("seen {}", i)]}
                ]});
                service.call("add_observations", seen).await.unwrap();
                // readers running alongside writers always see a parseable document
                service.call("read_graph", Value::Null).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let full = read(&service).await;
        assert_eq!(full.entities.len(), 33);
        assert_eq!(full.entity("Hub").unwrap().observations.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancelled_mutation_keeps_lock_until_saved() {
        let (service, _dir) = setup();

        for i in 0..20 {
            let params = json!({"entities": [{"name": format!("A_{}", i), "entityType": "t"}]});
            // the caller gives up at once; the mutation may still run to completion
            let _ = tokio::time::timeout(
                Duration::ZERO,
                service.call("create_entities", params),
            )
            .await;
            create(&service, &format!("B_{}", i)).await;
        }

        let full = read(&service).await;
        for i in 0..20 {
            assert!(full.entity(&format!("B_{}", i)).is_some(), "B_{} lost", i);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_services_on_one_document() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("memory.json");
        let first = MemoryService::new(GraphFile::new(&path));
        let second = MemoryService::new(GraphFile::new(&path));

        let mut handles = Vec::new();
        for i in 0..40 {
            let service = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move {
                create(&service, &format!("Node_{}", i)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(read(&first).await.entities.len(), 40);
        assert!(path.with_file_name("memory.json.lock").exists());
    }

    #[tokio::test]
    async fn test_missing_entity_type_defaults_to_unknown() {
        let (service, _dir) = setup();
        let created = service
            .call("create_entities", json!({"entities": [{"name": "X"}]}))
            .await
            .unwrap();
        let created = serde_json::to_value(created).unwrap();
        assert_eq!(created, json!([{"name": "X", "entityType": "unknown", "observations": []}]));
        assert_eq!(read(&service).await.entity("X").unwrap().entity_type, "unknown");
    }

    #[tokio::test]
    async fn test_lookup_keys_are_not_validated() {
        let (service, _dir) = setup();
        create(&service, "X").await;

        let opened = graph(service.call("open_nodes", json!({"names": ["", "X"]})).await.unwrap());
        assert_eq!(opened.entities.len(), 1);
        assert_eq!(opened.entities[0].name, "X");

        let deleted = service
            .call("delete_entities", json!({"entityNames": [""]}))
            .await
            .unwrap();
        assert_eq!(deleted, OperationOutput::Deleted { deleted: 0 });

        let params = json!({"deletions": [{"entityName": "", "observations": ["o"]}]});
        let deleted = service.call("delete_observations", params).await.unwrap();
        assert_eq!(deleted, OperationOutput::Deleted { deleted: 0 });

        let params = json!({"relations": [{"from": "", "to": "X", "relationType": "r"}]});
        let deleted = service.call("delete_relations", params).await.unwrap();
        assert_eq!(deleted, OperationOutput::Deleted { deleted: 0 });
        assert_eq!(read(&service).await.entities.len(), 1);
    }
}
