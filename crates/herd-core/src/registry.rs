//! The type registry: an immutable catalog of agent, interaction, and
//! attribute metadata.
//!
//! The registry is constructed once at startup from externally supplied
//! descriptors (in the full platform, by a source-to-runtime precompiler;
//! in tests, by hand) and is read-only for the life of the simulation.
//! Every size, offset, criticality, and sendability query the runtime
//! makes goes through here.
//!
//! # Layout rules
//!
//! Attribute payload offsets are packed in declaration order with no
//! padding. Each agent type additionally carries two *view* layouts:
//! the public struct (public non-critical attributes, in declaration
//! order) mirrored in the owner's public window, and the critical struct
//! (critical attributes) replicated in every master's critical window.

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::ConfigError;
use crate::id::{AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, InteractionTypeId};
use crate::wire::{FlatRun, WireShape};

/// Remote observability of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// Not observable remotely; lives only in the owner's payload.
    Private,
    /// Readable by any agent through the owner's public window.
    Public,
    /// Public with the stronger consistency tier: replicated in every
    /// master's critical window.
    Critical,
}

/// Metadata for one attribute of an agent or interaction type.
#[derive(Clone, Debug)]
pub struct AttrDef {
    /// Attribute name, unique within its type.
    pub name: String,
    /// Recursive wire shape.
    pub shape: WireShape,
    /// Remote observability.
    pub visibility: Visibility,
    /// Byte offset into the owning type's payload.
    pub offset: u32,
    /// Packed size in bytes.
    pub size: u32,
    /// Offset inside the visibility view's struct: the public struct for
    /// `Public`, the critical struct for `Critical`. Zero (and
    /// meaningless) for private attributes.
    pub view_offset: u32,
}

/// A field lookup result: where an attribute lives and what it looks like.
#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor<'a> {
    /// Byte offset into the agent payload.
    pub offset: u32,
    /// Packed size in bytes.
    pub size: u32,
    /// The attribute's recursive wire shape.
    pub shape: &'a WireShape,
}

/// Metadata for one agent type.
#[derive(Clone, Debug)]
pub struct AgentTypeDef {
    /// Type name.
    pub name: String,
    /// Attributes in declaration order; `AttrId(n)` is the n-th entry.
    pub attrs: Vec<AttrDef>,
    /// Name → attribute id.
    pub attr_ids: IndexMap<String, AttrId>,
    /// Total packed payload size.
    pub payload_size: u32,
    /// Size of the public (non-critical) view struct.
    pub public_size: u32,
    /// Size of the critical view struct.
    pub critical_size: u32,
    /// Whether agents of this type can cross the wire (no opaque field).
    pub sendable: bool,
}

/// Metadata for one interaction type. All fields are public.
#[derive(Clone, Debug)]
pub struct InteractionTypeDef {
    /// Type name.
    pub name: String,
    /// Payload fields in declaration order.
    pub attrs: Vec<AttrDef>,
    /// Name → attribute id.
    pub attr_ids: IndexMap<String, AttrId>,
    /// Total packed payload size.
    pub payload_size: u32,
}

/// Wire-format header bytes preceding an agent payload in a peer message:
/// type id (u32) + local id (u64).
pub const AGENT_HEADER_SIZE: u32 = 12;

/// Wire-format header bytes preceding an interaction payload: interaction
/// type (u32), sender type (u32), sender id (u64), recipient type (u32),
/// recipient id (u64).
pub const INTERACTION_HEADER_SIZE: u32 = 28;

/// Immutable catalog of agent/interaction/attribute metadata.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    agent_types: Vec<AgentTypeDef>,
    interaction_types: Vec<InteractionTypeDef>,
    agent_ids: IndexMap<String, AgentTypeId>,
    interaction_ids: IndexMap<String, InteractionTypeId>,
}

impl TypeRegistry {
    /// Number of registered agent types (`Ta` in the id encoding).
    pub fn agent_type_count(&self) -> u32 {
        self.agent_types.len() as u32
    }

    /// Number of registered interaction types.
    pub fn interaction_type_count(&self) -> u32 {
        self.interaction_types.len() as u32
    }

    /// Definition of an agent type.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range id; agent type ids are dense and come
    /// from this registry, so an invalid one is a programming error.
    pub fn agent_type(&self, ty: AgentTypeId) -> &AgentTypeDef {
        &self.agent_types[ty.0 as usize]
    }

    /// Definition of an interaction type.
    ///
    /// # Panics
    ///
    /// Panics on an out-of-range id, as for [`agent_type`](Self::agent_type).
    pub fn interaction_type(&self, it: InteractionTypeId) -> &InteractionTypeDef {
        &self.interaction_types[it.0 as usize]
    }

    /// Resolve an agent type by name.
    pub fn agent_type_by_name(&self, name: &str) -> Result<AgentTypeId, ConfigError> {
        self.agent_ids
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownAgentType { name: name.into() })
    }

    /// Resolve an interaction type by name.
    pub fn interaction_type_by_name(&self, name: &str) -> Result<InteractionTypeId, ConfigError> {
        self.interaction_ids
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownInteractionType { name: name.into() })
    }

    /// Resolve an attribute of an agent type by name.
    pub fn attr_by_name(&self, ty: AgentTypeId, name: &str) -> Result<AttrId, ConfigError> {
        let def = self.agent_type(ty);
        def.attr_ids
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownAttribute {
                agent_type: def.name.clone(),
                name: name.into(),
            })
    }

    /// Where an attribute lives in the agent payload and its wire shape.
    pub fn field_descriptor(&self, ty: AgentTypeId, attr: AttrId) -> FieldDescriptor<'_> {
        let a = &self.agent_type(ty).attrs[attr.0 as usize];
        FieldDescriptor {
            offset: a.offset,
            size: a.size,
            shape: &a.shape,
        }
    }

    /// The attribute definition for `(ty, attr)`.
    pub fn attr(&self, ty: AgentTypeId, attr: AttrId) -> &AttrDef {
        &self.agent_type(ty).attrs[attr.0 as usize]
    }

    /// Whether an attribute is critical.
    pub fn is_critical(&self, ty: AgentTypeId, attr: AttrId) -> bool {
        self.attr(ty, attr).visibility == Visibility::Critical
    }

    /// Whether an attribute's shape is purely structural.
    pub fn is_sendable(&self, ty: AgentTypeId, attr: AttrId) -> bool {
        self.attr(ty, attr).shape.is_structural()
    }

    /// Whether agents of this type can migrate.
    pub fn is_sendable_agent(&self, ty: AgentTypeId) -> bool {
        self.agent_type(ty).sendable
    }

    /// Size of the public (non-critical) view struct of an agent type.
    pub fn public_struct_size(&self, ty: AgentTypeId) -> u32 {
        self.agent_type(ty).public_size
    }

    /// Size of the critical view struct of an agent type.
    pub fn critical_struct_size(&self, ty: AgentTypeId) -> u32 {
        self.agent_type(ty).critical_size
    }

    /// Bytes of a peer message carrying one agent of this type.
    pub fn agent_message_size(&self, ty: AgentTypeId) -> u32 {
        AGENT_HEADER_SIZE + self.agent_type(ty).payload_size
    }

    /// Bytes of a peer message carrying one interaction of this type.
    pub fn interaction_message_size(&self, it: InteractionTypeId) -> u32 {
        INTERACTION_HEADER_SIZE + self.interaction_type(it).payload_size
    }

    /// The largest interaction message across all types. Sizes the
    /// fixed-stride inbox slots.
    pub fn max_interaction_size(&self) -> u32 {
        (0..self.interaction_type_count())
            .map(|i| self.interaction_message_size(InteractionTypeId(i)))
            .max()
            .unwrap_or(0)
    }

    /// Flat transport descriptor for an attribute, relative to the start
    /// of the attribute (displacements into windows are computed by the
    /// window layer).
    pub fn wire_descriptor_for(&self, ty: AgentTypeId, attr: AttrId) -> SmallVec<[FlatRun; 4]> {
        self.attr(ty, attr).shape.flatten(0)
    }

    /// A zeroed payload for an agent of this type.
    pub fn default_payload(&self, ty: AgentTypeId) -> Vec<u8> {
        vec![0u8; self.agent_type(ty).payload_size as usize]
    }

    /// Compose a global id using this registry's type count.
    pub fn global_id(&self, ty: AgentTypeId, local: AgentLocalId) -> AgentGlobalId {
        AgentGlobalId::pack(local, ty, self.agent_type_count())
    }

    /// The agent type encoded in a global id.
    pub fn type_of(&self, gid: AgentGlobalId) -> AgentTypeId {
        gid.ty(self.agent_type_count())
    }

    /// The local id encoded in a global id.
    pub fn local_of(&self, gid: AgentGlobalId) -> AgentLocalId {
        gid.local(self.agent_type_count())
    }
}

// ── Builders ────────────────────────────────────────────────────

/// Incremental description of one agent type.
#[derive(Clone, Debug)]
pub struct AgentTypeBuilder {
    name: String,
    attrs: Vec<(String, WireShape, Visibility)>,
}

impl AgentTypeBuilder {
    /// Start describing an agent type.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
        }
    }

    /// Add an attribute with explicit visibility.
    pub fn attr(mut self, name: &str, shape: WireShape, visibility: Visibility) -> Self {
        self.attrs.push((name.to_string(), shape, visibility));
        self
    }

    /// Add a private attribute.
    pub fn private(self, name: &str, shape: WireShape) -> Self {
        self.attr(name, shape, Visibility::Private)
    }

    /// Add a public (non-critical) attribute.
    pub fn public(self, name: &str, shape: WireShape) -> Self {
        self.attr(name, shape, Visibility::Public)
    }

    /// Add a critical attribute.
    pub fn critical(self, name: &str, shape: WireShape) -> Self {
        self.attr(name, shape, Visibility::Critical)
    }
}

/// Incremental description of one interaction type.
#[derive(Clone, Debug)]
pub struct InteractionTypeBuilder {
    name: String,
    attrs: Vec<(String, WireShape)>,
}

impl InteractionTypeBuilder {
    /// Start describing an interaction type.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
        }
    }

    /// Add a payload field. Interaction fields are always public.
    pub fn field(mut self, name: &str, shape: WireShape) -> Self {
        self.attrs.push((name.to_string(), shape));
        self
    }
}

/// Builder assembling the full registry.
#[derive(Clone, Debug, Default)]
pub struct RegistryBuilder {
    agents: Vec<AgentTypeBuilder>,
    interactions: Vec<InteractionTypeBuilder>,
}

impl RegistryBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent type. Ids are assigned in registration order.
    pub fn agent(mut self, ty: AgentTypeBuilder) -> Self {
        self.agents.push(ty);
        self
    }

    /// Register an interaction type. Ids are assigned in registration order.
    pub fn interaction(mut self, it: InteractionTypeBuilder) -> Self {
        self.interactions.push(it);
        self
    }

    /// Validate the description and compute all layouts.
    ///
    /// Rejects duplicate names, non-structural fields outside the private
    /// view, and interaction fields that are not structural.
    pub fn build(self) -> Result<TypeRegistry, ConfigError> {
        let mut agent_types = Vec::with_capacity(self.agents.len());
        let mut agent_ids = IndexMap::new();

        for (idx, tb) in self.agents.into_iter().enumerate() {
            if agent_ids
                .insert(tb.name.clone(), AgentTypeId(idx as u32))
                .is_some()
            {
                return Err(ConfigError::DuplicateName { name: tb.name });
            }

            let mut attrs = Vec::with_capacity(tb.attrs.len());
            let mut attr_ids = IndexMap::new();
            let mut payload = 0u32;
            let mut public = 0u32;
            let mut critical = 0u32;
            let mut sendable = true;

            for (aidx, (name, shape, visibility)) in tb.attrs.into_iter().enumerate() {
                if attr_ids.insert(name.clone(), AttrId(aidx as u32)).is_some() {
                    return Err(ConfigError::DuplicateName { name });
                }
                if !shape.is_structural() {
                    sendable = false;
                    if visibility != Visibility::Private {
                        return Err(ConfigError::OpaquePublic {
                            agent_type: tb.name.clone(),
                            attr: name,
                        });
                    }
                }
                let size = shape.size();
                let view_offset = match visibility {
                    Visibility::Private => 0,
                    Visibility::Public => {
                        let off = public;
                        public += size;
                        off
                    }
                    Visibility::Critical => {
                        let off = critical;
                        critical += size;
                        off
                    }
                };
                attrs.push(AttrDef {
                    name,
                    shape,
                    visibility,
                    offset: payload,
                    size,
                    view_offset,
                });
                payload += size;
            }

            agent_types.push(AgentTypeDef {
                name: tb.name,
                attrs,
                attr_ids,
                payload_size: payload,
                public_size: public,
                critical_size: critical,
                sendable,
            });
        }

        let mut interaction_types = Vec::with_capacity(self.interactions.len());
        let mut interaction_ids = IndexMap::new();

        for (idx, ib) in self.interactions.into_iter().enumerate() {
            if interaction_ids
                .insert(ib.name.clone(), InteractionTypeId(idx as u32))
                .is_some()
            {
                return Err(ConfigError::DuplicateName { name: ib.name });
            }
            let mut attrs = Vec::with_capacity(ib.attrs.len());
            let mut attr_ids = IndexMap::new();
            let mut payload = 0u32;
            for (aidx, (name, shape)) in ib.attrs.into_iter().enumerate() {
                if attr_ids.insert(name.clone(), AttrId(aidx as u32)).is_some() {
                    return Err(ConfigError::DuplicateName { name });
                }
                if !shape.is_structural() {
                    return Err(ConfigError::OpaquePublic {
                        agent_type: ib.name.clone(),
                        attr: name,
                    });
                }
                let size = shape.size();
                attrs.push(AttrDef {
                    name,
                    shape,
                    visibility: Visibility::Public,
                    offset: payload,
                    size,
                    view_offset: payload,
                });
                payload += size;
            }
            interaction_types.push(InteractionTypeDef {
                name: ib.name,
                attrs,
                attr_ids,
                payload_size: payload,
            });
        }

        Ok(TypeRegistry {
            agent_types,
            interaction_types,
            agent_ids,
            interaction_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{struct_of, ScalarKind};

    fn scalar(k: ScalarKind) -> WireShape {
        WireShape::Scalar(k)
    }

    fn sample_registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("cell")
                    .private("seed", scalar(ScalarKind::U64))
                    .public("v", scalar(ScalarKind::I64))
                    .critical("alarm", scalar(ScalarKind::I32))
                    .public("pos", struct_of(vec![
                        ("x", scalar(ScalarKind::F64)),
                        ("y", scalar(ScalarKind::F64)),
                    ])),
            )
            .agent(
                AgentTypeBuilder::new("probe")
                    .private("trace", WireShape::Opaque { size: 32 })
                    .public("level", scalar(ScalarKind::F32)),
            )
            .interaction(
                InteractionTypeBuilder::new("ping").field("token", scalar(ScalarKind::U64)),
            )
            .build()
            .unwrap()
    }

    // ── Layout ───────────────────────────────────────────────

    #[test]
    fn payload_offsets_are_packed_in_declaration_order() {
        let reg = sample_registry();
        let cell = reg.agent_type_by_name("cell").unwrap();
        let seed = reg.field_descriptor(cell, AttrId(0));
        let v = reg.field_descriptor(cell, AttrId(1));
        let alarm = reg.field_descriptor(cell, AttrId(2));
        let pos = reg.field_descriptor(cell, AttrId(3));
        assert_eq!((seed.offset, seed.size), (0, 8));
        assert_eq!((v.offset, v.size), (8, 8));
        assert_eq!((alarm.offset, alarm.size), (16, 4));
        assert_eq!((pos.offset, pos.size), (20, 16));
        assert_eq!(reg.agent_type(cell).payload_size, 36);
    }

    #[test]
    fn view_structs_partition_public_and_critical() {
        let reg = sample_registry();
        let cell = reg.agent_type_by_name("cell").unwrap();
        // Public view: v (8) + pos (16).
        assert_eq!(reg.public_struct_size(cell), 24);
        assert_eq!(reg.attr(cell, AttrId(1)).view_offset, 0);
        assert_eq!(reg.attr(cell, AttrId(3)).view_offset, 8);
        // Critical view: alarm (4).
        assert_eq!(reg.critical_struct_size(cell), 4);
        assert_eq!(reg.attr(cell, AttrId(2)).view_offset, 0);
        assert!(reg.is_critical(cell, AttrId(2)));
        assert!(!reg.is_critical(cell, AttrId(1)));
    }

    #[test]
    fn opaque_private_field_blocks_migration_only() {
        let reg = sample_registry();
        let probe = reg.agent_type_by_name("probe").unwrap();
        assert!(!reg.is_sendable_agent(probe));
        assert!(!reg.is_sendable(probe, AttrId(0)));
        assert!(reg.is_sendable(probe, AttrId(1)));

        let cell = reg.agent_type_by_name("cell").unwrap();
        assert!(reg.is_sendable_agent(cell));
    }

    #[test]
    fn opaque_public_field_is_rejected() {
        let err = RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("bad").public("blob", WireShape::Opaque { size: 8 }))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::OpaquePublic { .. }));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("a")
                    .public("x", scalar(ScalarKind::I32))
                    .public("x", scalar(ScalarKind::I32)),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { .. }));
    }

    // ── Message sizes ────────────────────────────────────────

    #[test]
    fn message_sizes_include_headers() {
        let reg = sample_registry();
        let cell = reg.agent_type_by_name("cell").unwrap();
        assert_eq!(reg.agent_message_size(cell), AGENT_HEADER_SIZE + 36);
        let ping = reg.interaction_type_by_name("ping").unwrap();
        assert_eq!(reg.interaction_message_size(ping), INTERACTION_HEADER_SIZE + 8);
        assert_eq!(reg.max_interaction_size(), INTERACTION_HEADER_SIZE + 8);
    }

    #[test]
    fn wire_descriptor_flattens_nested_attr() {
        let reg = sample_registry();
        let cell = reg.agent_type_by_name("cell").unwrap();
        let runs = reg.wire_descriptor_for(cell, AttrId(3));
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].kind, ScalarKind::F64);
        assert_eq!(runs[0].count, 2);
        assert_eq!(runs[0].offset, 0);
    }

    // ── Name resolution ──────────────────────────────────────

    #[test]
    fn unknown_names_error_with_context() {
        let reg = sample_registry();
        assert!(matches!(
            reg.agent_type_by_name("ghost"),
            Err(ConfigError::UnknownAgentType { .. })
        ));
        let cell = reg.agent_type_by_name("cell").unwrap();
        assert!(matches!(
            reg.attr_by_name(cell, "ghost"),
            Err(ConfigError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn global_id_helpers_use_type_count() {
        let reg = sample_registry();
        let probe = reg.agent_type_by_name("probe").unwrap();
        let gid = reg.global_id(probe, AgentLocalId(5));
        assert_eq!(reg.type_of(gid), probe);
        assert_eq!(reg.local_of(gid), AgentLocalId(5));
    }
}
