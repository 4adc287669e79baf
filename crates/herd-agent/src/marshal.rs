//! Conversions between packed payload bytes and the [`Value`] tree,
//! keyed by attribute name. Used when materializing populations, when
//! exporting snapshots, and when behaviors build interaction payloads.

use indexmap::IndexMap;

use herd_core::error::{CodecError, ConfigError};
use herd_core::id::{AgentTypeId, InteractionTypeId};
use herd_core::registry::TypeRegistry;
use herd_core::value::Value;
use herd_core::Interaction;

use crate::agent::Agent;

/// Build an agent payload from a name-keyed object. Attributes absent
/// from the object stay zero; keys that name no attribute are an error.
pub fn payload_from_object(
    registry: &TypeRegistry,
    ty: AgentTypeId,
    object: &Value,
) -> Result<Vec<u8>, ConfigError> {
    let def = registry.agent_type(ty);
    let mut payload = registry.default_payload(ty);
    let map = match object {
        Value::Object(map) => map,
        Value::Null => return Ok(payload),
        other => {
            return Err(ConfigError::ValueShapeMismatch {
                detail: format!("expected attribute object, got {other:?}"),
            })
        }
    };
    for (name, value) in map {
        let attr = registry.attr_by_name(ty, name)?;
        let a = &def.attrs[attr.0 as usize];
        value.encode_into(
            &a.shape,
            &mut payload[a.offset as usize..(a.offset + a.size) as usize],
        )?;
    }
    Ok(payload)
}

/// Decode every attribute of an agent into a name-keyed object.
/// Opaque (non-structural) attributes decode as null.
pub fn agent_to_object(registry: &TypeRegistry, agent: &Agent) -> Result<Value, CodecError> {
    let def = registry.agent_type(agent.ty());
    let mut map = IndexMap::with_capacity(def.attrs.len());
    for (idx, attr) in def.attrs.iter().enumerate() {
        let v = agent.attr_value(registry, herd_core::id::AttrId(idx as u32))?;
        map.insert(attr.name.clone(), v);
    }
    Ok(Value::Object(map))
}

/// Build an interaction payload from a name-keyed object.
pub fn interaction_payload_from_object(
    registry: &TypeRegistry,
    itype: InteractionTypeId,
    object: &Value,
) -> Result<Vec<u8>, ConfigError> {
    let def = registry.interaction_type(itype);
    let mut payload = vec![0u8; def.payload_size as usize];
    let map = match object {
        Value::Object(map) => map,
        Value::Null => return Ok(payload),
        other => {
            return Err(ConfigError::ValueShapeMismatch {
                detail: format!("expected interaction field object, got {other:?}"),
            })
        }
    };
    for (name, value) in map {
        let attr = def
            .attr_ids
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAttribute {
                agent_type: def.name.clone(),
                name: name.clone(),
            })?;
        let a = &def.attrs[attr.0 as usize];
        value.encode_into(
            &a.shape,
            &mut payload[a.offset as usize..(a.offset + a.size) as usize],
        )?;
    }
    Ok(payload)
}

/// Decode a received interaction's payload into a name-keyed object.
pub fn interaction_to_object(
    registry: &TypeRegistry,
    interaction: &Interaction,
) -> Result<Value, CodecError> {
    let def = registry.interaction_type(interaction.itype);
    let mut map = IndexMap::with_capacity(def.attrs.len());
    for attr in &def.attrs {
        let bytes =
            &interaction.payload[attr.offset as usize..(attr.offset + attr.size) as usize];
        map.insert(attr.name.clone(), Value::decode_from(&attr.shape, bytes)?);
    }
    Ok(Value::Object(map))
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::id::{AgentLocalId, MasterId};
    use herd_core::registry::{AgentTypeBuilder, InteractionTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};

    fn registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("cell")
                    .public("v", WireShape::Scalar(ScalarKind::I64))
                    .private("blob", WireShape::Opaque { size: 4 }),
            )
            .interaction(
                InteractionTypeBuilder::new("ping")
                    .field("token", WireShape::Scalar(ScalarKind::U64)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn object_payload_roundtrip() {
        let reg = registry();
        let ty = reg.agent_type_by_name("cell").unwrap();
        let mut obj = IndexMap::new();
        obj.insert("v".to_string(), Value::I64(31));
        let payload = payload_from_object(&reg, ty, &Value::Object(obj)).unwrap();

        let agent = Agent::new(&reg, ty, AgentLocalId(0), MasterId(0), payload);
        let back = agent_to_object(&reg, &agent).unwrap();
        assert_eq!(back.field("v"), Some(&Value::I64(31)));
        assert_eq!(back.field("blob"), Some(&Value::Null));
    }

    #[test]
    fn unknown_attribute_is_a_config_error() {
        let reg = registry();
        let ty = reg.agent_type_by_name("cell").unwrap();
        let mut obj = IndexMap::new();
        obj.insert("ghost".to_string(), Value::I64(1));
        assert!(matches!(
            payload_from_object(&reg, ty, &Value::Object(obj)),
            Err(ConfigError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn interaction_payload_roundtrip() {
        let reg = registry();
        let ping = reg.interaction_type_by_name("ping").unwrap();
        let mut obj = IndexMap::new();
        obj.insert("token".to_string(), Value::U64(99));
        let payload =
            interaction_payload_from_object(&reg, ping, &Value::Object(obj)).unwrap();
        let inter = Interaction {
            itype: ping,
            sender_type: herd_core::id::AgentTypeId(0),
            sender_id: AgentLocalId(0),
            recipient_type: herd_core::id::AgentTypeId(0),
            recipient_id: AgentLocalId(1),
            payload,
        };
        let back = interaction_to_object(&reg, &inter).unwrap();
        assert_eq!(back.field("token"), Some(&Value::U64(99)));
    }
}
