//! In-memory graph mutations.
//!
//! `GraphStore` owns one snapshot for the duration of a single operation.
//! Every method keeps two invariants: names and relation triples are unique,
//! and every relation's endpoints exist.

use std::collections::{HashMap, HashSet};

use crate::graph::{
    Entity, KnowledgeGraph, ObservationDeletion, ObservationInput, ObservationResult, Relation,
};
use crate::{KgmemError, Result};

#[derive(Debug, Default)]
pub struct GraphStore {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
    relations: Vec<Relation>,
    relation_set: HashSet<Relation>,
}

/// Drop repeated strings, keeping the first occurrence in place.
fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a loaded document, repairing anything that breaks
    /// the graph invariants (hand-edited or legacy files).
    pub fn from_graph(graph: KnowledgeGraph) -> Self {
        let mut store = Self::new();
        let mut dropped_entities = 0usize;
        let mut dropped_relations = 0usize;

        for mut entity in graph.entities {
            if store.index.contains_key(&entity.name) {
                dropped_entities += 1;
                continue;
            }
            entity.observations = dedup_in_order(entity.observations);
            store.insert_entity(entity);
        }

        for relation in graph.relations {
            if !store.try_insert_relation(relation) {
                dropped_relations += 1;
            }
        }

        if dropped_entities > 0 || dropped_relations > 0 {
            log::warn!(
                "Repaired graph on load: dropped {} duplicate entities, \
                 {} duplicate or dangling relations",
                dropped_entities,
                dropped_relations
            );
        }

        store
    }

    pub fn into_graph(self) -> KnowledgeGraph {
        KnowledgeGraph {
            entities: self.entities,
            relations: self.relations,
        }
    }

    /// Full snapshot, unfiltered.
    pub fn read_graph(&self) -> KnowledgeGraph {
        KnowledgeGraph {
            entities: self.entities.clone(),
            relations: self.relations.clone(),
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn contains_entity(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    fn insert_entity(&mut self, entity: Entity) {
        self.index.insert(entity.name.clone(), self.entities.len());
        self.entities.push(entity);
    }

    /// Inserts unless an endpoint is missing or the triple already exists.
    fn try_insert_relation(&mut self, relation: Relation) -> bool {
        if !self.index.contains_key(&relation.from) || !self.index.contains_key(&relation.to) {
            return false;
        }
        if !self.relation_set.insert(relation.clone()) {
            return false;
        }
        self.relations.push(relation);
        true
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
    }

    /// Insert entities whose name is not taken yet. Existing names are
    /// skipped without error. Returns only the inserted entities.
    pub fn create_entities(&mut self, new_entities: Vec<Entity>) -> Vec<Entity> {
        let mut created = Vec::new();
        for mut entity in new_entities {
            if self.index.contains_key(&entity.name) {
                log::debug!("Entity '{}' already exists, skipping", entity.name);
                continue;
            }
            entity.observations = dedup_in_order(entity.observations);
            created.push(entity.clone());
            self.insert_entity(entity);
        }
        created
    }

    /// Insert relations whose endpoints exist and whose triple is new.
    /// Returns only the inserted relations.
    pub fn create_relations(&mut self, new_relations: Vec<Relation>) -> Vec<Relation> {
        let mut created = Vec::new();
        for relation in new_relations {
            if self.try_insert_relation(relation.clone()) {
                created.push(relation);
            } else {
                log::debug!(
                    "Skipping relation '{}' -[{}]-> '{}': missing endpoint or duplicate",
                    relation.from,
                    relation.relation_type,
                    relation.to
                );
            }
        }
        created
    }

    /// Append observations not already present on each entity.
    ///
    /// Every target is checked before anything is written, so a missing
    /// entity fails the whole call and leaves the graph untouched.
    pub fn add_observations(
        &mut self,
        entries: Vec<ObservationInput>,
    ) -> Result<Vec<ObservationResult>> {
        if let Some(missing) = entries
            .iter()
            .find(|entry| !self.index.contains_key(&entry.entity_name))
        {
            return Err(KgmemError::EntityNotFound {
                entity: missing.entity_name.clone(),
            });
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let idx = self.index[&entry.entity_name];
            let observations = &mut self.entities[idx].observations;
            let mut present: HashSet<String> = observations.iter().cloned().collect();
            let mut added = Vec::new();
            for content in entry.contents {
                if present.insert(content.clone()) {
                    observations.push(content.clone());
                    added.push(content);
                }
            }
            results.push(ObservationResult {
                entity_name: entry.entity_name,
                added_observations: added,
            });
        }
        Ok(results)
    }

    /// Remove listed observations. Missing entities and strings are ignored.
    /// Returns the number of observation strings removed.
    pub fn delete_observations(&mut self, deletions: Vec<ObservationDeletion>) -> usize {
        let mut removed = 0;
        for deletion in deletions {
            let Some(&idx) = self.index.get(&deletion.entity_name) else {
                continue;
            };
            let doomed: HashSet<&String> = deletion.observations.iter().collect();
            let observations = &mut self.entities[idx].observations;
            let before = observations.len();
            observations.retain(|obs| !doomed.contains(obs));
            removed += before - observations.len();
        }
        removed
    }

    /// Remove exact triples. Unknown triples are ignored.
    /// Returns the number of relations removed.
    pub fn delete_relations(&mut self, relations: Vec<Relation>) -> usize {
        let doomed: HashSet<Relation> = relations
            .into_iter()
            .filter(|r| self.relation_set.remove(r))
            .collect();
        if !doomed.is_empty() {
            self.relations.retain(|r| !doomed.contains(r));
        }
        doomed.len()
    }

    /// Remove entities and every relation touching them.
    /// Returns the number of entities removed.
    pub fn delete_entities(&mut self, names: Vec<String>) -> usize {
        let doomed: HashSet<String> = names
            .into_iter()
            .filter(|name| self.index.contains_key(name))
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        self.entities.retain(|e| !doomed.contains(&e.name));
        self.rebuild_index();

        let relation_set = &mut self.relation_set;
        self.relations.retain(|r| {
            let keep = !doomed.contains(&r.from) && !doomed.contains(&r.to);
            if !keep {
                relation_set.remove(r);
            }
            keep
        });

        doomed.len()
    }
}
