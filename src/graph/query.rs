//! Read-only views over a graph snapshot.

use std::collections::HashSet;

use crate::graph::{Entity, KnowledgeGraph};

/// Case-insensitive substring search over name, type and observations.
///
/// Both sides are normalized with `str::to_lowercase`, which applies the
/// full Unicode lowercase mapping (`É` matches `é`, `Σ` matches `σ`) but no
/// further folding: `ß` does not match `ss`, and composed vs decomposed
/// accents are different strings.
pub fn search_nodes(graph: &KnowledgeGraph, query: &str) -> KnowledgeGraph {
    let needle = query.to_lowercase();
    let matches = |entity: &Entity| {
        entity.name.to_lowercase().contains(&needle)
            || entity.entity_type.to_lowercase().contains(&needle)
            || entity
                .observations
                .iter()
                .any(|obs| obs.to_lowercase().contains(&needle))
    };

    let entities: Vec<Entity> = graph
        .entities
        .iter()
        .filter(|e| matches(*e))
        .cloned()
        .collect();
    induced_subgraph(graph, entities)
}

/// Exact-name lookup. Unknown names are omitted.
pub fn open_nodes(graph: &KnowledgeGraph, names: &[String]) -> KnowledgeGraph {
    let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
    let entities: Vec<Entity> = graph
        .entities
        .iter()
        .filter(|e| wanted.contains(e.name.as_str()))
        .cloned()
        .collect();
    induced_subgraph(graph, entities)
}

/// The given entities plus every relation with both endpoints among them.
fn induced_subgraph(graph: &KnowledgeGraph, entities: Vec<Entity>) -> KnowledgeGraph {
    let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
    let relations = graph
        .relations
        .iter()
        .filter(|r| names.contains(r.from.as_str()) && names.contains(r.to.as_str()))
        .cloned()
        .collect();
    KnowledgeGraph {
        entities,
        relations,
    }
}
