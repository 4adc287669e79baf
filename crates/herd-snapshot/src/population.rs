//! Initial-population files: parsing and agent materialization.
//!
//! A population document lists, per agent type, a count, baseline
//! attribute values, and per-id overrides:
//!
//! ```json
//! { "agent_types": [ { "type": "cell", "number": 2,
//!     "default_values": { "v": 1 },
//!     "agents": [ { "id": 1, "attributes": { "v": 5 } } ] } ] }
//! ```
//!
//! `number` agents materialize with the defaults as baseline; entries in
//! `agents` override specific ids (an entry whose id falls outside
//! `0..number` creates an additional agent, which is what re-importing a
//! converted snapshot of a population with id gaps produces).

use serde::{Deserialize, Serialize};

use herd_core::error::ConfigError;
use herd_core::id::{AgentLocalId, AgentTypeId};
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;

use crate::binary;
use crate::error::SnapshotError;
use crate::json;

/// The root of a population document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PopulationFile {
    /// One entry per agent type to materialize.
    pub agent_types: Vec<TypeEntry>,
}

/// One agent type's population.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeEntry {
    /// Registered type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Number of agents materialized with the baseline values.
    pub number: u64,
    /// Baseline attribute values; unspecified attributes are zero.
    #[serde(default)]
    pub default_values: serde_json::Map<String, serde_json::Value>,
    /// Per-id attribute overrides.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

/// One agent's override entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEntry {
    /// Local id of the agent.
    pub id: u64,
    /// Attribute values overriding the baseline.
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A materialized agent, ready to be shipped to its owner.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSeed {
    /// The agent's type.
    pub ty: AgentTypeId,
    /// The agent's local id.
    pub local_id: AgentLocalId,
    /// Packed payload bytes.
    pub payload: Vec<u8>,
}

impl PopulationFile {
    /// Interpret a parsed document as a population file.
    pub fn from_document(doc: &Value) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_value(json::to_json(doc))?)
    }
}

/// Parse a document from raw file bytes.
///
/// The binary form is tried first (its type markers reject JSON text
/// quickly); anything else must be JSON.
pub fn read_document_bytes(bytes: &[u8]) -> Result<Value, SnapshotError> {
    match binary::from_bytes(bytes) {
        Ok(doc) => Ok(doc),
        Err(_) => {
            let text = std::str::from_utf8(bytes).map_err(|_| SnapshotError::Malformed {
                detail: "document is neither a binary container nor UTF-8 JSON".into(),
            })?;
            json::from_json_str(text)
        }
    }
}

/// Load and parse a population document from a file.
pub fn load_population(path: &str) -> Result<PopulationFile, SnapshotError> {
    let bytes = std::fs::read(path)?;
    let doc = read_document_bytes(&bytes)?;
    PopulationFile::from_document(&doc)
}

fn apply_attributes(
    registry: &TypeRegistry,
    ty: AgentTypeId,
    payload: &mut [u8],
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ConfigError> {
    let def = registry.agent_type(ty);
    for (name, raw) in attributes {
        let attr = registry.attr_by_name(ty, name)?;
        let a = &def.attrs[attr.0 as usize];
        let value = json::from_json(raw);
        value.encode_into(
            &a.shape,
            &mut payload[a.offset as usize..(a.offset + a.size) as usize],
        )?;
    }
    Ok(())
}

/// Materialize the agents described by a population file.
///
/// Seeds come out grouped by type in file order, ids ascending.
pub fn materialize(
    registry: &TypeRegistry,
    file: &PopulationFile,
) -> Result<Vec<AgentSeed>, SnapshotError> {
    let mut seeds = Vec::new();
    for entry in &file.agent_types {
        let ty = registry.agent_type_by_name(&entry.type_name)?;

        let mut baseline = registry.default_payload(ty);
        apply_attributes(registry, ty, &mut baseline, &entry.default_values)?;

        let mut type_seeds: Vec<AgentSeed> = (0..entry.number)
            .map(|id| AgentSeed {
                ty,
                local_id: AgentLocalId(id),
                payload: baseline.clone(),
            })
            .collect();

        for agent in &entry.agents {
            let position = type_seeds
                .iter()
                .position(|s| s.local_id.0 == agent.id);
            let seed = match position {
                Some(i) => &mut type_seeds[i],
                None => {
                    type_seeds.push(AgentSeed {
                        ty,
                        local_id: AgentLocalId(agent.id),
                        payload: baseline.clone(),
                    });
                    type_seeds.last_mut().unwrap()
                }
            };
            apply_attributes(registry, ty, &mut seed.payload, &agent.attributes)?;
        }

        type_seeds.sort_by_key(|s| s.local_id);
        seeds.extend(type_seeds);
    }
    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::registry::{AgentTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};

    fn registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("cell").public("v", WireShape::Scalar(ScalarKind::I64)))
            .build()
            .unwrap()
    }

    const SAMPLE: &str = r#"{
        "agent_types": [ {
            "type": "cell", "number": 3,
            "default_values": { "v": 1 },
            "agents": [ { "id": 1, "attributes": { "v": 5 } } ]
        } ]
    }"#;

    #[test]
    fn defaults_then_overrides() {
        let reg = registry();
        let doc = json::from_json_str(SAMPLE).unwrap();
        let file = PopulationFile::from_document(&doc).unwrap();
        let seeds = materialize(&reg, &file).unwrap();
        assert_eq!(seeds.len(), 3);
        let values: Vec<i64> = seeds
            .iter()
            .map(|s| i64::from_le_bytes(s.payload.clone().try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1, 5, 1]);
    }

    #[test]
    fn override_beyond_number_creates_the_agent() {
        let reg = registry();
        let file = PopulationFile {
            agent_types: vec![TypeEntry {
                type_name: "cell".into(),
                number: 1,
                default_values: Default::default(),
                agents: vec![AgentEntry {
                    id: 5,
                    attributes: serde_json::from_str(r#"{"v": 9}"#).unwrap(),
                }],
            }],
        };
        let seeds = materialize(&reg, &file).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[1].local_id, AgentLocalId(5));
    }

    #[test]
    fn unknown_type_is_a_config_error() {
        let reg = registry();
        let file = PopulationFile {
            agent_types: vec![TypeEntry {
                type_name: "ghost".into(),
                number: 1,
                default_values: Default::default(),
                agents: vec![],
            }],
        };
        assert!(matches!(
            materialize(&reg, &file),
            Err(SnapshotError::Config(ConfigError::UnknownAgentType { .. }))
        ));
    }

    #[test]
    fn binary_and_json_bytes_both_parse() {
        let doc = json::from_json_str(SAMPLE).unwrap();
        let from_json_bytes = read_document_bytes(SAMPLE.as_bytes()).unwrap();
        let from_binary_bytes = read_document_bytes(&binary::to_bytes(&doc)).unwrap();
        // Shapes agree even though scalar widths may differ between paths.
        assert_eq!(
            PopulationFile::from_document(&from_json_bytes).unwrap().agent_types[0].number,
            PopulationFile::from_document(&from_binary_bytes).unwrap().agent_types[0].number,
        );
    }
}
