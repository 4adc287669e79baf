//! The agent instance: identity, packed attribute payload, mailboxes,
//! and the shadow image used to detect critical-attribute changes.
//!
//! User-defined agent classes are modeled as variants over the type
//! registry: an instance is `(type id, payload bytes)`, and every
//! polymorphic operation (field access, marshalling, behavior dispatch)
//! is looked up by type id. The payload holds private, public, and
//! critical attributes at the registry's packed offsets.

use smallvec::SmallVec;

use herd_core::error::{CodecError, ConfigError};
use herd_core::id::{AgentGlobalId, AgentLocalId, AgentTypeId, AttrId, InteractionTypeId, MasterId};
use herd_core::registry::{TypeRegistry, Visibility};
use herd_core::value::Value;
use herd_core::Interaction;

/// One live agent, uniquely owned by exactly one shard.
///
/// Agents do not point back at their master; they carry the master's id
/// and all cross-calls go through the behavior context.
#[derive(Clone, Debug)]
pub struct Agent {
    ty: AgentTypeId,
    local_id: AgentLocalId,
    home: MasterId,
    /// Packed attribute bytes, `payload_size(ty)` long.
    payload: Vec<u8>,
    /// Critical view image as of the last publish. `None` forces the
    /// next publish to replicate every critical attribute (fresh or
    /// migrated agents).
    critical_shadow: Option<Vec<u8>>,
    /// Per-interaction-type queues of this step's received messages.
    mailboxes: Vec<Vec<Interaction>>,
}

impl Agent {
    /// Create an agent from a packed payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload length does not match the registered type's
    /// payload size; payloads come from the registry or the wire, so a
    /// mismatch is a programming error.
    pub fn new(
        registry: &TypeRegistry,
        ty: AgentTypeId,
        local_id: AgentLocalId,
        home: MasterId,
        payload: Vec<u8>,
    ) -> Self {
        assert_eq!(
            payload.len(),
            registry.agent_type(ty).payload_size as usize,
            "payload size mismatch for agent type '{}'",
            registry.agent_type(ty).name
        );
        Self {
            ty,
            local_id,
            home,
            payload,
            critical_shadow: None,
            mailboxes: vec![Vec::new(); registry.interaction_type_count() as usize],
        }
    }

    /// The agent's type.
    pub fn ty(&self) -> AgentTypeId {
        self.ty
    }

    /// The agent's local id.
    pub fn local_id(&self) -> AgentLocalId {
        self.local_id
    }

    /// Id of the master currently holding the agent.
    pub fn home(&self) -> MasterId {
        self.home
    }

    /// Re-home the agent after a migration.
    pub fn set_home(&mut self, home: MasterId) {
        self.home = home;
        // The destination must replicate critical state on its next publish.
        self.critical_shadow = None;
    }

    /// The agent's global id under this registry.
    pub fn gid(&self, registry: &TypeRegistry) -> AgentGlobalId {
        registry.global_id(self.ty, self.local_id)
    }

    /// Raw payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The raw bytes of one attribute.
    pub fn attr_bytes(&self, registry: &TypeRegistry, attr: AttrId) -> &[u8] {
        let d = registry.field_descriptor(self.ty, attr);
        &self.payload[d.offset as usize..(d.offset + d.size) as usize]
    }

    /// Decode one attribute into a [`Value`].
    pub fn attr_value(&self, registry: &TypeRegistry, attr: AttrId) -> Result<Value, CodecError> {
        let d = registry.field_descriptor(self.ty, attr);
        Value::decode_from(d.shape, self.attr_bytes(registry, attr))
    }

    /// Encode a [`Value`] into one attribute's payload slot.
    pub fn set_attr_value(
        &mut self,
        registry: &TypeRegistry,
        attr: AttrId,
        value: &Value,
    ) -> Result<(), ConfigError> {
        let d = registry.field_descriptor(self.ty, attr);
        let (offset, size) = (d.offset as usize, d.size as usize);
        let shape = d.shape.clone();
        value.encode_into(&shape, &mut self.payload[offset..offset + size])
    }

    /// Overwrite one attribute's slot with raw bytes of the right length.
    pub fn set_attr_bytes(&mut self, registry: &TypeRegistry, attr: AttrId, bytes: &[u8]) {
        let d = registry.field_descriptor(self.ty, attr);
        assert_eq!(bytes.len(), d.size as usize);
        self.payload[d.offset as usize..(d.offset + d.size) as usize].copy_from_slice(bytes);
    }

    /// Copy the public (non-critical) view struct into `out`, which must
    /// be `public_struct_size(ty)` long. This is the image the owner
    /// mirrors into its public window each publish phase.
    pub fn copy_public_into(&self, registry: &TypeRegistry, out: &mut [u8]) {
        debug_assert_eq!(out.len(), registry.public_struct_size(self.ty) as usize);
        for attr in &registry.agent_type(self.ty).attrs {
            if attr.visibility == Visibility::Public {
                let src = &self.payload[attr.offset as usize..(attr.offset + attr.size) as usize];
                out[attr.view_offset as usize..(attr.view_offset + attr.size) as usize]
                    .copy_from_slice(src);
            }
        }
    }

    /// The packed critical view struct.
    pub fn critical_image(&self, registry: &TypeRegistry) -> Vec<u8> {
        let mut out = vec![0u8; registry.critical_struct_size(self.ty) as usize];
        for attr in &registry.agent_type(self.ty).attrs {
            if attr.visibility == Visibility::Critical {
                let src = &self.payload[attr.offset as usize..(attr.offset + attr.size) as usize];
                out[attr.view_offset as usize..(attr.view_offset + attr.size) as usize]
                    .copy_from_slice(src);
            }
        }
        out
    }

    /// Critical attributes whose value differs from the last published
    /// image. With no shadow (never published, or freshly migrated),
    /// every critical attribute is reported.
    pub fn changed_critical(&self, registry: &TypeRegistry) -> SmallVec<[AttrId; 4]> {
        let mut changed = SmallVec::new();
        let image = self.critical_image(registry);
        for (idx, attr) in registry.agent_type(self.ty).attrs.iter().enumerate() {
            if attr.visibility != Visibility::Critical {
                continue;
            }
            let range = attr.view_offset as usize..(attr.view_offset + attr.size) as usize;
            let differs = match &self.critical_shadow {
                None => true,
                Some(shadow) => shadow[range.clone()] != image[range.clone()],
            };
            if differs {
                changed.push(AttrId(idx as u32));
            }
        }
        changed
    }

    /// Record the current critical image as published.
    pub fn mark_critical_published(&mut self, registry: &TypeRegistry) {
        self.critical_shadow = Some(self.critical_image(registry));
    }

    /// Payload suitable for migration: non-sendable attribute slots are
    /// zeroed, so a migrated agent restarts those at their default.
    pub fn sendable_payload(&self, registry: &TypeRegistry) -> Vec<u8> {
        let mut out = self.payload.clone();
        for attr in &registry.agent_type(self.ty).attrs {
            if !attr.shape.is_structural() {
                out[attr.offset as usize..(attr.offset + attr.size) as usize].fill(0);
            }
        }
        out
    }

    /// Append a delivered interaction to its per-type queue.
    pub fn receive(&mut self, interaction: Interaction) {
        self.mailboxes[interaction.itype.0 as usize].push(interaction);
    }

    /// Interactions of one type delivered this step.
    pub fn received(&self, itype: InteractionTypeId) -> &[Interaction] {
        &self.mailboxes[itype.0 as usize]
    }

    /// Drop the previous step's deliveries. Called before dispatch.
    pub fn clear_mailboxes(&mut self) {
        for q in &mut self.mailboxes {
            q.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::registry::{AgentTypeBuilder, InteractionTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};

    fn registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("cell")
                    .private("seed", WireShape::Scalar(ScalarKind::U64))
                    .public("v", WireShape::Scalar(ScalarKind::I64))
                    .critical("alarm", WireShape::Scalar(ScalarKind::I32)),
            )
            .interaction(
                InteractionTypeBuilder::new("ping")
                    .field("token", WireShape::Scalar(ScalarKind::U64)),
            )
            .build()
            .unwrap()
    }

    fn make_agent(reg: &TypeRegistry) -> Agent {
        let ty = reg.agent_type_by_name("cell").unwrap();
        Agent::new(reg, ty, AgentLocalId(3), MasterId(0), reg.default_payload(ty))
    }

    #[test]
    fn attr_roundtrip_through_payload() {
        let reg = registry();
        let mut agent = make_agent(&reg);
        let v = reg.attr_by_name(agent.ty(), "v").unwrap();
        agent.set_attr_value(&reg, v, &Value::I64(-7)).unwrap();
        assert_eq!(agent.attr_value(&reg, v).unwrap(), Value::I64(-7));
    }

    #[test]
    fn public_image_excludes_private_and_critical() {
        let reg = registry();
        let mut agent = make_agent(&reg);
        let seed = reg.attr_by_name(agent.ty(), "seed").unwrap();
        let v = reg.attr_by_name(agent.ty(), "v").unwrap();
        let alarm = reg.attr_by_name(agent.ty(), "alarm").unwrap();
        agent.set_attr_value(&reg, seed, &Value::U64(u64::MAX)).unwrap();
        agent.set_attr_value(&reg, v, &Value::I64(42)).unwrap();
        agent.set_attr_value(&reg, alarm, &Value::I32(1)).unwrap();

        let mut image = vec![0u8; reg.public_struct_size(agent.ty()) as usize];
        agent.copy_public_into(&reg, &mut image);
        assert_eq!(image, 42i64.to_le_bytes());
    }

    #[test]
    fn changed_critical_tracks_the_shadow() {
        let reg = registry();
        let mut agent = make_agent(&reg);
        let alarm = reg.attr_by_name(agent.ty(), "alarm").unwrap();

        // Never published: everything critical counts as changed.
        assert_eq!(agent.changed_critical(&reg).as_slice(), &[alarm]);

        agent.mark_critical_published(&reg);
        assert!(agent.changed_critical(&reg).is_empty());

        agent.set_attr_value(&reg, alarm, &Value::I32(9)).unwrap();
        assert_eq!(agent.changed_critical(&reg).as_slice(), &[alarm]);

        // Migration drops the shadow again.
        agent.set_home(MasterId(1));
        assert_eq!(agent.changed_critical(&reg).as_slice(), &[alarm]);
    }

    #[test]
    fn mailboxes_accumulate_and_clear() {
        let reg = registry();
        let mut agent = make_agent(&reg);
        let ping = reg.interaction_type_by_name("ping").unwrap();
        let inter = Interaction {
            itype: ping,
            sender_type: agent.ty(),
            sender_id: AgentLocalId(0),
            recipient_type: agent.ty(),
            recipient_id: agent.local_id(),
            payload: vec![0; 8],
        };
        agent.receive(inter.clone());
        agent.receive(inter);
        assert_eq!(agent.received(ping).len(), 2);
        agent.clear_mailboxes();
        assert!(agent.received(ping).is_empty());
    }
}
