//! The exchange and dispatch phases.
//!
//! Exchange is one global operation: announce per-channel counts with an
//! `M × Ti` all-to-all, bulk-transfer the message bytes, then land every
//! received message in a fixed-stride inbox slot and convert it back
//! into an [`Interaction`]. Dispatch walks the received list and appends
//! each message to its recipient agent's per-type mailbox.

use std::sync::Arc;

use herd_core::codec::{write_u32_le, ByteReader};
use herd_core::error::{ProtocolError, TransportError};
use herd_core::id::{InteractionTypeId, MasterId};
use herd_core::registry::TypeRegistry;
use herd_core::Interaction;
use herd_agent::AgentStore;
use herd_fabric::Fabric;

use crate::outbox::Outbox;

/// Flat buffer of fixed-stride slots receiving one step's messages.
///
/// The stride is the largest interaction message size across all types,
/// so any message fits any slot.
#[derive(Debug, Default)]
struct Inbox {
    buf: Vec<u8>,
    stride: usize,
    count: usize,
}

impl Inbox {
    fn ensure(&mut self, stride: usize, slots: usize) {
        self.stride = stride;
        self.count = slots;
        let needed = stride * slots;
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
    }

    fn slot_mut(&mut self, idx: usize) -> &mut [u8] {
        let start = idx * self.stride;
        &mut self.buf[start..start + self.stride]
    }

    fn slot(&self, idx: usize) -> &[u8] {
        let start = idx * self.stride;
        &self.buf[start..start + self.stride]
    }
}

/// Per-master interaction router.
pub struct Router {
    fabric: Arc<dyn Fabric>,
    registry: Arc<TypeRegistry>,
    inbox: Inbox,
    received: Vec<Interaction>,
}

impl Router {
    /// A router over the given fabric.
    pub fn new(fabric: Arc<dyn Fabric>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            fabric,
            registry,
            inbox: Inbox::default(),
            received: Vec::new(),
        }
    }

    /// Interactions received by the last exchange, in arrival order
    /// (source-major, then type-major, then per-channel FIFO).
    pub fn received(&self) -> &[Interaction] {
        &self.received
    }

    /// Run the exchange: merge the shard outboxes, announce counts,
    /// transfer the bytes, and decode the inbox.
    ///
    /// Outboxes are drained in shard order, which keeps each
    /// `(destination, type)` channel's order deterministic: shard 0's
    /// messages precede shard 1's, and within a shard the enqueue order
    /// is preserved.
    pub fn exchange(&mut self, outboxes: &mut [Outbox]) -> Result<(), TransportError> {
        let masters = self.fabric.master_count();
        let itypes = self.registry.interaction_type_count();

        // Merge shard outboxes per (destination, type) channel.
        let mut merged: Vec<Vec<Interaction>> = vec![Vec::new(); (masters * itypes) as usize];
        for outbox in outboxes.iter_mut() {
            for dest in 0..masters {
                for it in 0..itypes {
                    let cell =
                        outbox.drain_cell(MasterId(dest), InteractionTypeId(it));
                    merged[(dest * itypes + it) as usize].extend(cell);
                }
            }
        }

        // 1. Announce per-channel counts (an M × Ti matrix).
        let count_rows: Vec<Vec<u8>> = (0..masters)
            .map(|dest| {
                let mut row = Vec::with_capacity(itypes as usize * 4);
                for it in 0..itypes {
                    write_u32_le(&mut row, merged[(dest * itypes + it) as usize].len() as u32);
                }
                row
            })
            .collect();
        let gathered_counts = self.fabric.all_to_all(count_rows)?;

        let mut incoming = vec![0u32; (masters * itypes) as usize];
        for (src, row) in gathered_counts.iter().enumerate() {
            if row.len() != itypes as usize * 4 {
                return Err(TransportError::SizeMismatch {
                    expected: itypes as usize * 4,
                    found: row.len(),
                });
            }
            let mut r = ByteReader::new(row);
            for it in 0..itypes {
                incoming[src * itypes as usize + it as usize] =
                    r.read_u32_le().map_err(|_| TransportError::SizeMismatch {
                        expected: itypes as usize * 4,
                        found: row.len(),
                    })?;
            }
        }

        // 2. Bulk transfer: per destination, all messages type-major.
        let data_rows: Vec<Vec<u8>> = (0..masters)
            .map(|dest| {
                let mut blob = Vec::new();
                for it in 0..itypes {
                    for inter in &merged[(dest * itypes + it) as usize] {
                        inter.encode(&mut blob);
                    }
                }
                blob
            })
            .collect();
        let blobs = self.fabric.all_to_all(data_rows)?;

        // 3. Land each message in an inbox slot, then convert the slots
        //    into interactions.
        let total: usize = incoming.iter().map(|&c| c as usize).sum();
        let stride = self.registry.max_interaction_size() as usize;
        self.inbox.ensure(stride.max(1), total);
        self.received.clear();
        self.received.reserve(total);

        // The counts matrix fixes each slot's type, so decoding needs no
        // trust in the received header; a header that disagrees with
        // the announced type is a transport fault.
        let mut slot_types = Vec::with_capacity(total);
        let mut slot = 0usize;
        for (src, blob) in blobs.iter().enumerate() {
            let mut cursor = 0usize;
            for it in 0..itypes {
                let itype = InteractionTypeId(it);
                let msg_len = self.registry.interaction_message_size(itype) as usize;
                let n = incoming[src * itypes as usize + it as usize] as usize;
                for _ in 0..n {
                    if cursor + msg_len > blob.len() {
                        return Err(TransportError::SizeMismatch {
                            expected: cursor + msg_len,
                            found: blob.len(),
                        });
                    }
                    self.inbox.slot_mut(slot)[..msg_len]
                        .copy_from_slice(&blob[cursor..cursor + msg_len]);
                    slot_types.push(itype);
                    cursor += msg_len;
                    slot += 1;
                }
            }
            if cursor != blob.len() {
                return Err(TransportError::SizeMismatch {
                    expected: cursor,
                    found: blob.len(),
                });
            }
        }

        for (idx, &itype) in slot_types.iter().enumerate() {
            let payload_len = self.registry.interaction_type(itype).payload_size as usize;
            let mut r = ByteReader::new(self.inbox.slot(idx));
            let inter = Interaction::decode(&mut r, payload_len).map_err(|_| {
                TransportError::SizeMismatch {
                    expected: payload_len,
                    found: 0,
                }
            })?;
            if inter.itype != itype {
                return Err(TransportError::TagMismatch {
                    expected: u64::from(itype.0),
                    found: u64::from(inter.itype.0),
                });
            }
            self.received.push(inter);
        }

        Ok(())
    }

    /// Deliver every received interaction into its recipient's per-type
    /// mailbox. Recipients were routed here by the owner map, so a
    /// recipient missing from the local store means the map diverged.
    pub fn dispatch(&mut self, store: &mut AgentStore) -> Result<(), ProtocolError> {
        for inter in self.received.drain(..) {
            let gid = self
                .registry
                .global_id(inter.recipient_type, inter.recipient_id);
            match store.get_mut(gid) {
                Some(agent) => agent.receive(inter),
                None => return Err(ProtocolError::OwnerDivergence { gid }),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("received", &self.received.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_agent::{Agent, PopulationIndex};
    use herd_core::id::{AgentLocalId, AgentTypeId};
    use herd_core::registry::{AgentTypeBuilder, InteractionTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};
    use herd_fabric::LocalFabric;
    use std::thread;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            RegistryBuilder::new()
                .agent(
                    AgentTypeBuilder::new("cell")
                        .public("v", WireShape::Scalar(ScalarKind::I64)),
                )
                .interaction(
                    InteractionTypeBuilder::new("ping")
                        .field("token", WireShape::Scalar(ScalarKind::U64)),
                )
                .interaction(
                    InteractionTypeBuilder::new("wide")
                        .field("a", WireShape::Scalar(ScalarKind::U64))
                        .field("b", WireShape::Scalar(ScalarKind::U64)),
                )
                .build()
                .unwrap(),
        )
    }

    fn ping(reg: &TypeRegistry, sender: u64, recipient: u64, token: u64) -> Interaction {
        Interaction {
            itype: reg.interaction_type_by_name("ping").unwrap(),
            sender_type: AgentTypeId(0),
            sender_id: AgentLocalId(sender),
            recipient_type: AgentTypeId(0),
            recipient_id: AgentLocalId(recipient),
            payload: token.to_le_bytes().to_vec(),
        }
    }

    /// Two masters; agent k lives on master k.
    fn index_two(reg: &TypeRegistry) -> PopulationIndex {
        let mut index = PopulationIndex::new(reg.agent_type_count());
        for k in 0..2u64 {
            index.insert(
                reg,
                reg.global_id(AgentTypeId(0), AgentLocalId(k)),
                MasterId(k as u32),
            );
        }
        index
    }

    #[test]
    fn cross_master_exchange_preserves_channel_fifo() {
        let reg = registry();
        let handles: Vec<_> = LocalFabric::cluster(2)
            .into_iter()
            .map(|fab| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    let me = fab.master_id();
                    let index = index_two(&reg);
                    let mut router = Router::new(Arc::new(fab), Arc::clone(&reg));
                    let mut outbox = Outbox::new(2, reg.interaction_type_count());

                    if me.is_root() {
                        // Three pings on one channel; order must survive.
                        for token in [10u64, 20, 30] {
                            outbox.push(&reg, &index, ping(&reg, 0, 1, token));
                        }
                    }
                    router.exchange(std::slice::from_mut(&mut outbox)).unwrap();
                    router
                        .received()
                        .iter()
                        .map(|i| u64::from_le_bytes(i.payload.clone().try_into().unwrap()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results[0].is_empty());
        assert_eq!(results[1], vec![10, 20, 30]);
    }

    #[test]
    fn mixed_sizes_share_the_inbox() {
        // One master, messages of two types to itself; the stride is the
        // larger message, and both decode cleanly.
        let reg = registry();
        let fab = LocalFabric::cluster(1).into_iter().next().unwrap();
        let mut index = PopulationIndex::new(reg.agent_type_count());
        index.insert(&reg, reg.global_id(AgentTypeId(0), AgentLocalId(0)), MasterId(0));

        let mut router = Router::new(Arc::new(fab), Arc::clone(&reg));
        let mut outbox = Outbox::new(1, reg.interaction_type_count());
        outbox.push(&reg, &index, ping(&reg, 0, 0, 5));
        let wide = Interaction {
            itype: reg.interaction_type_by_name("wide").unwrap(),
            sender_type: AgentTypeId(0),
            sender_id: AgentLocalId(0),
            recipient_type: AgentTypeId(0),
            recipient_id: AgentLocalId(0),
            payload: [1u64.to_le_bytes(), 2u64.to_le_bytes()].concat(),
        };
        outbox.push(&reg, &index, wide.clone());

        router.exchange(std::slice::from_mut(&mut outbox)).unwrap();
        assert_eq!(router.received().len(), 2);
        // Type-major order: ping (type 0) before wide (type 1).
        assert_eq!(router.received()[0].payload.len(), 8);
        assert_eq!(router.received()[1], wide);
    }

    #[test]
    fn dispatch_fills_recipient_mailboxes() {
        let reg = registry();
        let fab = LocalFabric::cluster(1).into_iter().next().unwrap();
        let mut index = PopulationIndex::new(reg.agent_type_count());
        let gid = reg.global_id(AgentTypeId(0), AgentLocalId(0));
        index.insert(&reg, gid, MasterId(0));

        let mut store = AgentStore::new(1);
        store.add(
            0,
            &reg,
            Agent::new(
                &reg,
                AgentTypeId(0),
                AgentLocalId(0),
                MasterId(0),
                reg.default_payload(AgentTypeId(0)),
            ),
        );

        let mut router = Router::new(Arc::new(fab), Arc::clone(&reg));
        let mut outbox = Outbox::new(1, reg.interaction_type_count());
        outbox.push(&reg, &index, ping(&reg, 0, 0, 77));
        router.exchange(std::slice::from_mut(&mut outbox)).unwrap();
        router.dispatch(&mut store).unwrap();

        let itype = reg.interaction_type_by_name("ping").unwrap();
        let agent = store.get(gid).unwrap();
        assert_eq!(agent.received(itype).len(), 1);
        assert_eq!(agent.received(itype)[0].payload, 77u64.to_le_bytes());
    }

    #[test]
    fn dispatch_flags_owner_divergence() {
        let reg = registry();
        let fab = LocalFabric::cluster(1).into_iter().next().unwrap();
        let mut index = PopulationIndex::new(reg.agent_type_count());
        // The index says agent 0 is here, but the store does not hold it.
        let gid = reg.global_id(AgentTypeId(0), AgentLocalId(0));
        index.insert(&reg, gid, MasterId(0));

        let mut store = AgentStore::new(1);
        let mut router = Router::new(Arc::new(fab), Arc::clone(&reg));
        let mut outbox = Outbox::new(1, reg.interaction_type_count());
        outbox.push(&reg, &index, ping(&reg, 0, 0, 1));
        router.exchange(std::slice::from_mut(&mut outbox)).unwrap();

        let err = router.dispatch(&mut store).unwrap_err();
        assert_eq!(err, ProtocolError::OwnerDivergence { gid });
    }
}
