//! Knowledge graph module: data model, in-memory mutations and read queries.
//!
//! Entities are keyed by name; relations are directed, typed edges between
//! two existing entities. The document layout on disk is exactly
//! [`KnowledgeGraph`] serialized as JSON.

mod query;
mod store;

pub use query::{open_nodes, search_nodes};
pub use store::GraphStore;

use serde::{Deserialize, Serialize};

/// A named node with a type label and an ordered set of observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique name, e.g. `John_Smith`.
    pub name: String,
    /// Free-form category, e.g. `person`. `unknown` when omitted.
    #[serde(rename = "entityType", default = "default_entity_type")]
    pub entity_type: String,
    /// Facts about the entity; no duplicates, insertion order kept.
    #[serde(default)]
    pub observations: Vec<String>,
}

fn default_entity_type() -> String {
    "unknown".to_string()
}

/// A directed edge (from --relation_type--> to).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

/// Complete graph snapshot, also the persisted document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Observations to append to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationInput {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// Observations actually appended to one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationResult {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "addedObservations")]
    pub added_observations: Vec<String>,
}

/// Observations to remove from one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationDeletion {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub observations: Vec<String>,
}
