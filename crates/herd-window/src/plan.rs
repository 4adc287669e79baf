//! Offset planning for the public and critical windows.
//!
//! All masters walk the same sorted gid list and assign each agent its
//! public offset at the end of its owner's running counter and its
//! critical offset at the end of the global running counter. The public
//! table is only *used* by an agent's owner, but the mapping itself is
//! agreed on by every peer; the critical table is total and identical
//! everywhere. A plan digest is all-gathered after every build to catch
//! divergence before it can corrupt a window.

use std::collections::HashMap;

use herd_core::error::ProtocolError;
use herd_core::id::{AgentGlobalId, MasterId};
use herd_core::registry::TypeRegistry;

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

#[inline]
fn fnv1a_u64(mut hash: u64, v: u64) -> u64 {
    for &b in &v.to_le_bytes() {
        hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The agreed offset tables for one population.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowPlan {
    public_offset: HashMap<AgentGlobalId, u64>,
    critical_offset: HashMap<AgentGlobalId, u64>,
    /// Per master, bytes of public window actually used by owned agents.
    public_used: Vec<u64>,
    /// Total critical window size (identical on every master).
    critical_size: u64,
}

impl WindowPlan {
    /// Build the plan from `(gid, owner)` pairs.
    ///
    /// Pairs are sorted by gid internally; every master must supply the
    /// same set of pairs, which holds whenever they come from the
    /// replicated population index.
    pub fn build(
        registry: &TypeRegistry,
        master_count: u32,
        population: &[(AgentGlobalId, MasterId)],
    ) -> Self {
        let mut pairs: Vec<(AgentGlobalId, MasterId)> = population.to_vec();
        pairs.sort_unstable_by_key(|(gid, _)| *gid);
        Self::from_sorted(registry, master_count, &pairs)
    }

    /// Build the plan from pairs in the given order, without sorting.
    ///
    /// This is the raw construction path; [`build`](Self::build) is what
    /// the runtime uses. Taking an explicit order makes divergence
    /// injectable in tests: feeding one master a perturbed order must
    /// trip the consensus check.
    pub fn from_sorted(
        registry: &TypeRegistry,
        master_count: u32,
        population: &[(AgentGlobalId, MasterId)],
    ) -> Self {
        let mut public_offset = HashMap::with_capacity(population.len());
        let mut critical_offset = HashMap::with_capacity(population.len());
        let mut public_used = vec![0u64; master_count as usize];
        let mut critical_size = 0u64;

        for &(gid, owner) in population {
            let ty = registry.type_of(gid);
            public_offset.insert(gid, public_used[owner.0 as usize]);
            critical_offset.insert(gid, critical_size);
            public_used[owner.0 as usize] += u64::from(registry.public_struct_size(ty));
            critical_size += u64::from(registry.critical_struct_size(ty));
        }

        Self {
            public_offset,
            critical_offset,
            public_used,
            critical_size,
        }
    }

    /// Offset of an agent's public struct in its owner's public window.
    pub fn public_offset(&self, gid: AgentGlobalId) -> Option<u64> {
        self.public_offset.get(&gid).copied()
    }

    /// Offset of an agent's critical struct in every critical window.
    pub fn critical_offset(&self, gid: AgentGlobalId) -> Option<u64> {
        self.critical_offset.get(&gid).copied()
    }

    /// Bytes of public window used by one master's owned agents.
    pub fn public_used(&self, master: MasterId) -> u64 {
        self.public_used[master.0 as usize]
    }

    /// The largest per-master public usage; public windows are all sized
    /// from this.
    pub fn max_public_used(&self) -> u64 {
        self.public_used.iter().copied().max().unwrap_or(0)
    }

    /// Total size of the critical window.
    pub fn critical_size(&self) -> u64 {
        self.critical_size
    }

    /// Number of planned agents.
    pub fn len(&self) -> usize {
        self.public_offset.len()
    }

    /// Whether the plan covers no agents.
    pub fn is_empty(&self) -> bool {
        self.public_offset.is_empty()
    }

    /// FNV-1a digest of the plan: every `(gid, public offset, critical
    /// offset)` triple in gid order, then the per-master usage vector
    /// and the critical size. Two masters with the same digest hold the
    /// same tables.
    pub fn digest(&self) -> u64 {
        let mut gids: Vec<AgentGlobalId> = self.public_offset.keys().copied().collect();
        gids.sort_unstable();
        let mut hash = FNV_OFFSET;
        for gid in gids {
            hash = fnv1a_u64(hash, gid.0);
            hash = fnv1a_u64(hash, self.public_offset[&gid]);
            hash = fnv1a_u64(hash, self.critical_offset[&gid]);
        }
        for &used in &self.public_used {
            hash = fnv1a_u64(hash, used);
        }
        fnv1a_u64(hash, self.critical_size)
    }
}

/// Compare this master's digest against the all-gathered set.
///
/// Returns the first disagreeing master as a
/// [`ProtocolError::PlanDivergence`].
pub fn check_digests(own: u64, gathered: &[u64]) -> Result<(), ProtocolError> {
    for (rank, &digest) in gathered.iter().enumerate() {
        if digest != own {
            return Err(ProtocolError::PlanDivergence {
                master: MasterId(rank as u32),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herd_core::id::{AgentLocalId, AgentTypeId};
    use herd_core::registry::{AgentTypeBuilder, RegistryBuilder};
    use herd_core::wire::{ScalarKind, WireShape};
    use proptest::prelude::*;

    /// Two types: "a" has 8 public + 4 critical bytes, "b" has 16 public.
    fn registry() -> TypeRegistry {
        RegistryBuilder::new()
            .agent(
                AgentTypeBuilder::new("a")
                    .public("v", WireShape::Scalar(ScalarKind::I64))
                    .critical("c", WireShape::Scalar(ScalarKind::I32)),
            )
            .agent(
                AgentTypeBuilder::new("b")
                    .public("x", WireShape::Scalar(ScalarKind::F64))
                    .public("y", WireShape::Scalar(ScalarKind::F64)),
            )
            .build()
            .unwrap()
    }

    fn population(reg: &TypeRegistry) -> Vec<(AgentGlobalId, MasterId)> {
        // Type a: locals 0,1 on master 0; local 2 on master 1.
        // Type b: local 0 on master 1.
        let a = AgentTypeId(0);
        let b = AgentTypeId(1);
        vec![
            (reg.global_id(a, AgentLocalId(0)), MasterId(0)),
            (reg.global_id(a, AgentLocalId(1)), MasterId(0)),
            (reg.global_id(a, AgentLocalId(2)), MasterId(1)),
            (reg.global_id(b, AgentLocalId(0)), MasterId(1)),
        ]
    }

    #[test]
    fn public_offsets_advance_per_owner() {
        let reg = registry();
        let pop = population(&reg);
        let plan = WindowPlan::build(&reg, 2, &pop);

        // gid order: a0 (gid 0), b0 (gid 1), a1 (gid 2), a2 (gid 4).
        let a = AgentTypeId(0);
        let b = AgentTypeId(1);
        assert_eq!(plan.public_offset(reg.global_id(a, AgentLocalId(0))), Some(0));
        assert_eq!(plan.public_offset(reg.global_id(b, AgentLocalId(0))), Some(0));
        assert_eq!(plan.public_offset(reg.global_id(a, AgentLocalId(1))), Some(8));
        assert_eq!(plan.public_offset(reg.global_id(a, AgentLocalId(2))), Some(16));
        assert_eq!(plan.public_used(MasterId(0)), 16);
        assert_eq!(plan.public_used(MasterId(1)), 24);
        assert_eq!(plan.max_public_used(), 24);
    }

    #[test]
    fn critical_offsets_are_total_and_global() {
        let reg = registry();
        let plan = WindowPlan::build(&reg, 2, &population(&reg));
        let a = AgentTypeId(0);
        let b = AgentTypeId(1);
        // gid order: a0, b0, a1, a2 — type b contributes no critical bytes.
        assert_eq!(plan.critical_offset(reg.global_id(a, AgentLocalId(0))), Some(0));
        assert_eq!(plan.critical_offset(reg.global_id(b, AgentLocalId(0))), Some(4));
        assert_eq!(plan.critical_offset(reg.global_id(a, AgentLocalId(1))), Some(4));
        assert_eq!(plan.critical_offset(reg.global_id(a, AgentLocalId(2))), Some(8));
        assert_eq!(plan.critical_size(), 12);
    }

    #[test]
    fn build_is_order_insensitive() {
        let reg = registry();
        let mut pop = population(&reg);
        let plan_a = WindowPlan::build(&reg, 2, &pop);
        pop.reverse();
        let plan_b = WindowPlan::build(&reg, 2, &pop);
        assert_eq!(plan_a, plan_b);
        assert_eq!(plan_a.digest(), plan_b.digest());
    }

    #[test]
    fn perturbed_order_changes_the_digest() {
        let reg = registry();
        let pop = population(&reg);
        let mut sorted = pop.clone();
        sorted.sort_unstable_by_key(|(gid, _)| *gid);
        let good = WindowPlan::from_sorted(&reg, 2, &sorted);
        sorted.swap(1, 2);
        let bad = WindowPlan::from_sorted(&reg, 2, &sorted);
        assert_ne!(good.digest(), bad.digest());
    }

    #[test]
    fn check_digests_names_the_first_divergent_master() {
        let err = check_digests(7, &[7, 7, 9]).unwrap_err();
        assert_eq!(err, ProtocolError::PlanDivergence { master: MasterId(2) });
        assert!(check_digests(7, &[7, 7, 7]).is_ok());
    }

    proptest! {
        /// Every planned agent's public struct fits inside its owner's
        /// used region, and regions never overlap.
        #[test]
        fn public_regions_are_disjoint(
            owners in prop::collection::vec(0u32..3, 1..40),
        ) {
            let reg = registry();
            let pop: Vec<(AgentGlobalId, MasterId)> = owners
                .iter()
                .enumerate()
                .map(|(i, &m)| {
                    let ty = AgentTypeId((i % 2) as u32);
                    (reg.global_id(ty, AgentLocalId(i as u64)), MasterId(m))
                })
                .collect();
            let plan = WindowPlan::build(&reg, 3, &pop);

            for m in 0..3u32 {
                let mut regions: Vec<(u64, u64)> = pop
                    .iter()
                    .filter(|(_, owner)| owner.0 == m)
                    .map(|(gid, _)| {
                        let size = u64::from(reg.public_struct_size(reg.type_of(*gid)));
                        (plan.public_offset(*gid).unwrap(), size)
                    })
                    .collect();
                regions.sort_unstable();
                for pair in regions.windows(2) {
                    prop_assert!(pair[0].0 + pair[0].1 <= pair[1].0);
                }
                if let Some(&(off, size)) = regions.last() {
                    prop_assert!(off + size <= plan.public_used(MasterId(m)));
                }
            }
        }
    }
}
