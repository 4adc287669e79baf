//! The outbox: pending interactions of one shard, indexed by
//! `(recipient master, interaction type)`.
//!
//! Each shard worker appends to its own outbox during the behavior
//! phase, so no cross-thread access happens; the router drains all
//! shard outboxes single-threaded during exchange.

use tracing::warn;

use herd_core::id::{InteractionTypeId, MasterId};
use herd_core::registry::TypeRegistry;
use herd_core::Interaction;
use herd_agent::PopulationIndex;

/// A 2-D array of append-only queues, one cell per
/// `(recipient master, interaction type)` pair.
#[derive(Debug)]
pub struct Outbox {
    masters: u32,
    itypes: u32,
    cells: Vec<Vec<Interaction>>,
}

impl Outbox {
    /// An empty outbox for `masters` peers and `itypes` interaction
    /// types.
    pub fn new(masters: u32, itypes: u32) -> Self {
        Self {
            masters,
            itypes,
            cells: vec![Vec::new(); (masters * itypes) as usize],
        }
    }

    fn cell_index(&self, master: MasterId, itype: InteractionTypeId) -> usize {
        (master.0 * self.itypes + itype.0) as usize
    }

    /// Enqueue an interaction for its recipient's master.
    ///
    /// If the recipient does not exist at send time, the interaction is
    /// dropped with a warning — behaviors are best-effort senders and a
    /// missing recipient is never an error.
    pub fn push(
        &mut self,
        registry: &TypeRegistry,
        index: &PopulationIndex,
        interaction: Interaction,
    ) {
        if !index.exists(interaction.recipient_type, interaction.recipient_id) {
            warn!(
                sender = %interaction.sender_id,
                sender_type = %registry.agent_type(interaction.sender_type).name,
                recipient = %interaction.recipient_id,
                recipient_type = %registry.agent_type(interaction.recipient_type).name,
                "interaction sent to an agent which does not exist; it is ignored"
            );
            return;
        }
        let gid = registry.global_id(interaction.recipient_type, interaction.recipient_id);
        // The owner map covers every live agent, so the lookup cannot
        // miss once existence holds.
        let Some(owner) = index.owner(gid) else {
            warn!(gid = %gid, "recipient exists but has no owner entry; interaction dropped");
            return;
        };
        let idx = self.cell_index(owner, interaction.itype);
        self.cells[idx].push(interaction);
    }

    /// Pending interactions for one `(master, type)` cell.
    pub fn cell(&self, master: MasterId, itype: InteractionTypeId) -> &[Interaction] {
        &self.cells[self.cell_index(master, itype)]
    }

    /// Drain one cell, preserving enqueue order.
    pub fn drain_cell(&mut self, master: MasterId, itype: InteractionTypeId) -> Vec<Interaction> {
        let idx = self.cell_index(master, itype);
        std::mem::take(&mut self.cells[idx])
    }

    /// Total pending interactions.
    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    /// Whether no interactions are pending.
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    /// Number of peers this outbox routes to.
    pub fn master_count(&self) -> u32 {
        self.masters
    }

    /// Number of interaction types.
    pub fn interaction_type_count(&self) -> u32 {
        self.itypes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::id::{AgentLocalId, AgentTypeId};
    use herd_core::registry::{AgentTypeBuilder, InteractionTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};

    fn registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(AgentTypeBuilder::new("cell").public("v", WireShape::Scalar(ScalarKind::I64)))
            .interaction(
                InteractionTypeBuilder::new("ping")
                    .field("token", WireShape::Scalar(ScalarKind::U64)),
            )
            .interaction(InteractionTypeBuilder::new("nudge"))
            .build()
            .unwrap()
    }

    fn interaction(reg: &TypeRegistry, recipient: u64) -> Interaction {
        let ping = reg.interaction_type_by_name("ping").unwrap();
        Interaction {
            itype: ping,
            sender_type: AgentTypeId(0),
            sender_id: AgentLocalId(0),
            recipient_type: AgentTypeId(0),
            recipient_id: AgentLocalId(recipient),
            payload: vec![0; 8],
        }
    }

    #[test]
    fn push_routes_to_the_owner_cell() {
        let reg = registry();
        let mut index = PopulationIndex::new(reg.agent_type_count());
        index.insert(&reg, reg.global_id(AgentTypeId(0), AgentLocalId(1)), MasterId(1));

        let mut outbox = Outbox::new(2, reg.interaction_type_count());
        outbox.push(&reg, &index, interaction(&reg, 1));

        let ping = reg.interaction_type_by_name("ping").unwrap();
        assert_eq!(outbox.cell(MasterId(1), ping).len(), 1);
        assert!(outbox.cell(MasterId(0), ping).is_empty());
    }

    #[test]
    fn missing_recipient_is_dropped_silently() {
        let reg = registry();
        let index = PopulationIndex::new(reg.agent_type_count());
        let mut outbox = Outbox::new(2, reg.interaction_type_count());
        outbox.push(&reg, &index, interaction(&reg, 9));
        assert!(outbox.is_empty());
    }

    #[test]
    fn drain_preserves_enqueue_order() {
        let reg = registry();
        let mut index = PopulationIndex::new(reg.agent_type_count());
        index.insert(&reg, reg.global_id(AgentTypeId(0), AgentLocalId(1)), MasterId(0));

        let mut outbox = Outbox::new(1, reg.interaction_type_count());
        for sender in 0..3u64 {
            let mut inter = interaction(&reg, 1);
            inter.sender_id = AgentLocalId(sender);
            outbox.push(&reg, &index, inter);
        }
        let ping = reg.interaction_type_by_name("ping").unwrap();
        let drained = outbox.drain_cell(MasterId(0), ping);
        let senders: Vec<u64> = drained.iter().map(|i| i.sender_id.0).collect();
        assert_eq!(senders, vec![0, 1, 2]);
        assert!(outbox.is_empty());
    }
}
