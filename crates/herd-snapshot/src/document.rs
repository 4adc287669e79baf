//! Building, merging, and reshaping exported agent documents.
//!
//! Each master serializes its owned agents grouped by type name; the
//! root gathers and merges the per-master parts into a single document
//! `{"agents": {<type-name>: [<agent>, …]}}`. `convert` reshapes an
//! exported document into the initial-population format so that a
//! snapshot can be re-imported through `init`.

use indexmap::IndexMap;

use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_agent::{marshal, AgentStore};

use crate::error::SnapshotError;
use crate::json;
use crate::population::{AgentEntry, PopulationFile, TypeEntry};
use crate::binary;

/// Serialize one master's owned agents, grouped by type name.
///
/// Every registered type appears, empty or not, so the merge step needs
/// no schema beyond the registry. Agents are listed in ascending local
/// id order.
pub fn agents_document(
    registry: &TypeRegistry,
    store: &AgentStore,
) -> Result<Value, SnapshotError> {
    let mut by_type: Vec<Vec<(u64, Value)>> =
        vec![Vec::new(); registry.agent_type_count() as usize];

    for agent in store.iter_owned() {
        let attributes = marshal::agent_to_object(registry, agent)?;
        let mut entry = IndexMap::new();
        entry.insert("id".to_string(), Value::U64(agent.local_id().0));
        entry.insert("attributes".to_string(), attributes);
        by_type[agent.ty().0 as usize].push((agent.local_id().0, Value::Object(entry)));
    }

    let mut map = IndexMap::new();
    for (idx, mut agents) in by_type.into_iter().enumerate() {
        agents.sort_by_key(|(id, _)| *id);
        let name = registry
            .agent_type(herd_core::id::AgentTypeId(idx as u32))
            .name
            .clone();
        map.insert(
            name,
            Value::Array(agents.into_iter().map(|(_, v)| v).collect()),
        );
    }
    Ok(Value::Object(map))
}

/// Merge per-master parts into the final export document.
///
/// Parts arrive in master rank order; within a type, rank order is
/// preserved, so the merged arrays are deterministic.
pub fn merge_documents(
    registry: &TypeRegistry,
    parts: &[Value],
) -> Result<Value, SnapshotError> {
    let mut merged: IndexMap<String, Value> = IndexMap::new();
    for idx in 0..registry.agent_type_count() {
        let name = registry
            .agent_type(herd_core::id::AgentTypeId(idx))
            .name
            .clone();
        let mut all = Vec::new();
        for part in parts {
            match part.field(&name) {
                Some(Value::Array(agents)) => all.extend(agents.iter().cloned()),
                Some(other) => {
                    return Err(SnapshotError::Malformed {
                        detail: format!("type '{name}' is not an array: {other:?}"),
                    })
                }
                None => {}
            }
        }
        merged.insert(name, Value::Array(all));
    }

    let mut doc = IndexMap::new();
    doc.insert("agents".to_string(), Value::Object(merged));
    Ok(Value::Object(doc))
}

/// Reshape an exported document into the initial-population format:
/// each type's array becomes `{"type": name, "number": N, "agents": [...]}`.
pub fn convert_document(doc: &Value) -> Result<PopulationFile, SnapshotError> {
    let agents = doc.field("agents").ok_or_else(|| SnapshotError::Malformed {
        detail: "document has no 'agents' member".into(),
    })?;
    let map = match agents {
        Value::Object(map) => map,
        other => {
            return Err(SnapshotError::Malformed {
                detail: format!("'agents' is not an object: {other:?}"),
            })
        }
    };

    let mut agent_types = Vec::with_capacity(map.len());
    for (type_name, array) in map {
        let items = match array {
            Value::Array(items) => items,
            other => {
                return Err(SnapshotError::Malformed {
                    detail: format!("type '{type_name}' is not an array: {other:?}"),
                })
            }
        };
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let id = item
                .field("id")
                .and_then(Value::as_i64)
                .ok_or_else(|| SnapshotError::Malformed {
                    detail: format!("agent of type '{type_name}' has no integer id"),
                })?;
            let attributes = match item.field("attributes") {
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(k, v)| (k.clone(), json::to_json(v)))
                    .collect(),
                _ => Default::default(),
            };
            entries.push(AgentEntry {
                id: id as u64,
                attributes,
            });
        }
        agent_types.push(TypeEntry {
            type_name: type_name.clone(),
            number: entries.len() as u64,
            default_values: Default::default(),
            agents: entries,
        });
    }
    Ok(PopulationFile { agent_types })
}

/// Write a document as pretty JSON text.
pub fn write_json(path: &str, doc: &Value) -> Result<(), SnapshotError> {
    let mut text = json::to_json_string_pretty(doc)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

/// Write a document in the binary container form.
pub fn write_binary(path: &str, doc: &Value) -> Result<(), SnapshotError> {
    std::fs::write(path, binary::to_bytes(doc))?;
    Ok(())
}

/// Write a population file as pretty JSON text.
pub fn write_population(path: &str, file: &PopulationFile) -> Result<(), SnapshotError> {
    let mut text = serde_json::to_string_pretty(file)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

/// Read a document from a file, accepting either container form.
pub fn read_document(path: &str) -> Result<Value, SnapshotError> {
    let bytes = std::fs::read(path)?;
    crate::population::read_document_bytes(&bytes)
}
