use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KgmemError, Result};
use crate::graph::{
    Entity, KnowledgeGraph, ObservationDeletion, ObservationInput, ObservationResult, Relation,
};

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_OBSERVATION_LENGTH: usize = 4096;

/// Inbound call: operation name plus its parameter payload.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationRequest {
    pub operation: String,
    /// Object, JSON-encoded object string, or absent.
    #[serde(default, alias = "params")]
    pub parameters: Value,
}

/// A validated operation with strongly-typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateEntities { entities: Vec<Entity> },
    CreateRelations { relations: Vec<Relation> },
    /// All-or-nothing: every target entity is checked before anything is
    /// appended, and one missing entity fails the call with the graph
    /// unchanged.
    AddObservations { observations: Vec<ObservationInput> },
    ReadGraph,
    SearchNodes { query: String },
    OpenNodes { names: Vec<String> },
    DeleteObservations { deletions: Vec<ObservationDeletion> },
    DeleteRelations { relations: Vec<Relation> },
    DeleteEntities { entity_names: Vec<String> },
}

#[derive(Deserialize)]
struct CreateEntitiesParams {
    entities: Vec<Entity>,
}

#[derive(Deserialize)]
struct RelationsParams {
    relations: Vec<Relation>,
}

#[derive(Deserialize)]
struct AddObservationsParams {
    observations: Vec<ObservationInput>,
}

#[derive(Deserialize)]
struct SearchNodesParams {
    query: String,
}

#[derive(Deserialize)]
struct OpenNodesParams {
    names: Vec<String>,
}

#[derive(Deserialize)]
struct DeleteObservationsParams {
    deletions: Vec<ObservationDeletion>,
}

#[derive(Deserialize)]
struct DeleteEntitiesParams {
    #[serde(rename = "entityNames")]
    entity_names: Vec<String>,
}

fn decode<T: DeserializeOwned>(operation: &str, parameters: Value) -> Result<T> {
    serde_json::from_value(parameters)
        .map_err(|e| KgmemError::invalid_params(operation, e.to_string()))
}

/// Accept an object, a JSON string holding an object, or nothing.
fn normalize_parameters(operation: &str, parameters: Value) -> Result<Value> {
    match parameters {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(&s).map_err(|e| {
                let message = format!("parameters is not valid JSON: {}", e);
                KgmemError::invalid_params(operation, message)
            })?;
            normalize_parameters_object(operation, parsed)
        }
        other => normalize_parameters_object(operation, other),
    }
}

fn normalize_parameters_object(operation: &str, parameters: Value) -> Result<Value> {
    match parameters {
        Value::Object(_) => Ok(parameters),
        Value::Null => Ok(Value::Object(Default::default())),
        _ => Err(KgmemError::invalid_params(operation, "parameters must be a JSON object")),
    }
}

fn validate_name(operation: &str, field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(KgmemError::invalid_params(operation, format!("{} cannot be empty", field)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(KgmemError::invalid_params(
            operation,
            format!("{} too long (max {} bytes)", field, MAX_NAME_LENGTH),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(KgmemError::invalid_params(
            operation,
            format!("{} contains control characters", field),
        ));
    }
    Ok(())
}

fn validate_observation(operation: &str, field: &str, obs: &str) -> Result<()> {
    if obs.len() > MAX_OBSERVATION_LENGTH {
        return Err(KgmemError::invalid_params(
            operation,
            format!("{} too long (max {} bytes)", field, MAX_OBSERVATION_LENGTH),
        ));
    }
    if obs.contains('\0') {
        return Err(KgmemError::invalid_params(operation, format!("{} contains null bytes", field)));
    }
    Ok(())
}

fn validate_relation(operation: &str, field: &str, relation: &Relation) -> Result<()> {
    validate_name(operation, &format!("{}.from", field), &relation.from)?;
    validate_name(operation, &format!("{}.to", field), &relation.to)?;
    validate_name(operation, &format!("{}.relationType", field), &relation.relation_type)
}

impl Operation {
    /// Every operation name the router accepts.
    pub const NAMES: [&'static str; 9] = [
        "create_entities",
        "create_relations",
        "add_observations",
        "read_graph",
        "search_nodes",
        "open_nodes",
        "delete_observations",
        "delete_relations",
        "delete_entities",
    ];

    /// Decode and validate the payload for `name`.
    pub fn parse(name: &str, parameters: Value) -> Result<Self> {
        if !Self::NAMES.contains(&name) {
            return Err(KgmemError::UnknownOperation(name.to_string()));
        }
        let parameters = normalize_parameters(name, parameters)?;

        let operation = match name {
            "create_entities" => {
                let p: CreateEntitiesParams = decode(name, parameters)?;
                Operation::CreateEntities { entities: p.entities }
            }
            "create_relations" => {
                let p: RelationsParams = decode(name, parameters)?;
                Operation::CreateRelations { relations: p.relations }
            }
            "add_observations" => {
                let p: AddObservationsParams = decode(name, parameters)?;
                Operation::AddObservations { observations: p.observations }
            }
            "read_graph" => Operation::ReadGraph,
            "search_nodes" => {
                let p: SearchNodesParams = decode(name, parameters)?;
                Operation::SearchNodes { query: p.query }
            }
            "open_nodes" => {
                let p: OpenNodesParams = decode(name, parameters)?;
                Operation::OpenNodes { names: p.names }
            }
            "delete_observations" => {
                let p: DeleteObservationsParams = decode(name, parameters)?;
                Operation::DeleteObservations { deletions: p.deletions }
            }
            "delete_relations" => {
                let p: RelationsParams = decode(name, parameters)?;
                Operation::DeleteRelations { relations: p.relations }
            }
            "delete_entities" => {
                let p: DeleteEntitiesParams = decode(name, parameters)?;
                Operation::DeleteEntities { entity_names: p.entity_names }
            }
            other => return Err(KgmemError::UnknownOperation(other.to_string())),
        };

        operation.validate()?;
        Ok(operation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateEntities { .. } => "create_entities",
            Operation::CreateRelations { .. } => "create_relations",
            Operation::AddObservations { .. } => "add_observations",
            Operation::ReadGraph => "read_graph",
            Operation::SearchNodes { .. } => "search_nodes",
            Operation::OpenNodes { .. } => "open_nodes",
            Operation::DeleteObservations { .. } => "delete_observations",
            Operation::DeleteRelations { .. } => "delete_relations",
            Operation::DeleteEntities { .. } => "delete_entities",
        }
    }

    /// Mutating operations go through the document lock and a save.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Operation::ReadGraph | Operation::SearchNodes { .. } | Operation::OpenNodes { .. }
        )
    }

    /// Content checks on data about to be stored. Names used only to look
    /// something up (open, delete, add-to target) are not checked; a name
    /// that can never have been stored simply matches nothing.
    fn validate(&self) -> Result<()> {
        let op = self.name();
        match self {
            Operation::CreateEntities { entities } => {
                for (i, entity) in entities.iter().enumerate() {
                    let field = format!("entities[{}]", i);
                    validate_name(op, &format!("{}.name", field), &entity.name)?;
                    validate_name(op, &format!("{}.entityType", field), &entity.entity_type)?;
                    for (j, obs) in entity.observations.iter().enumerate() {
                        validate_observation(op, &format!("{}.observations[{}]", field, j), obs)?;
                    }
                }
            }
            Operation::CreateRelations { relations } => {
                for (i, relation) in relations.iter().enumerate() {
                    validate_relation(op, &format!("relations[{}]", i), relation)?;
                }
            }
            Operation::AddObservations { observations } => {
                for (i, input) in observations.iter().enumerate() {
                    for (j, obs) in input.contents.iter().enumerate() {
                        let field = format!("observations[{}].contents[{}]", i, j);
                        validate_observation(op, &field, obs)?;
                    }
                }
            }
            Operation::SearchNodes { query } => {
                if query.trim().is_empty() {
                    return Err(KgmemError::invalid_params(op, "query cannot be empty"));
                }
            }
            Operation::ReadGraph
            | Operation::OpenNodes { .. }
            | Operation::DeleteObservations { .. }
            | Operation::DeleteRelations { .. }
            | Operation::DeleteEntities { .. } => {}
        }
        Ok(())
    }
}

/// Operation-specific result payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    Entities(Vec<Entity>),
    Relations(Vec<Relation>),
    Observations(Vec<ObservationResult>),
    Graph(KnowledgeGraph),
    Deleted { deleted: usize },
}

/// Error payload sent back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Outbound envelope: `{"result": ...}` or `{"error": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationResponse {
    Success { result: OperationOutput },
    Failure { error: ErrorBody },
}

impl OperationResponse {
    pub fn failure(err: &KgmemError, operation: Option<&str>) -> Self {
        OperationResponse::Failure {
            error: ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
                operation: operation.map(String::from),
            },
        }
    }
}
