//! Meta-evolution records: deaths, births, and migrations requested
//! during a step and applied atomically between steps.
//!
//! Records are gathered from every master and applied in the same order
//! everywhere — all deaths, then all migrations, then all births — so
//! the resulting population, owner map, and id assignment are identical
//! on every peer without further coordination.

use herd_core::codec::{write_bytes, write_u32_le, write_u64_le, write_u8, ByteReader};
use herd_core::error::CodecError;
use herd_core::id::{AgentGlobalId, AgentTypeId, MasterId};
use herd_agent::EvolutionSink;

/// What a meta-evolution record does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvoKind {
    /// Remove an agent from the simulation.
    Death,
    /// Create an agent on the destination master.
    Birth,
    /// Move an agent from origin to destination.
    Migration,
}

/// One replicated meta-evolution request.
///
/// For deaths the destination is ignored; for births the gid is
/// assigned at apply time (from the replicated id bound) and the `ty`
/// field carries the new agent's type. Migration and birth records
/// carry the agent's sendable payload inline: every master sees it, the
/// destination materializes it.
#[derive(Clone, Debug, PartialEq)]
pub struct EvoRecord {
    /// The record kind.
    pub kind: EvoKind,
    /// The affected agent (unused for births).
    pub gid: AgentGlobalId,
    /// Agent type (used by births; redundant otherwise).
    pub ty: AgentTypeId,
    /// Requesting / owning master.
    pub origin: MasterId,
    /// Destination master (migrations and births).
    pub destination: MasterId,
    /// Sendable payload bytes (migrations and births).
    pub payload: Vec<u8>,
}

impl EvoRecord {
    fn encode(&self, out: &mut Vec<u8>) {
        write_u8(
            out,
            match self.kind {
                EvoKind::Death => 0,
                EvoKind::Birth => 1,
                EvoKind::Migration => 2,
            },
        );
        write_u64_le(out, self.gid.0);
        write_u32_le(out, self.ty.0);
        write_u32_le(out, self.origin.0);
        write_u32_le(out, self.destination.0);
        write_bytes(out, &self.payload);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let kind = match r.read_u8()? {
            0 => EvoKind::Death,
            1 => EvoKind::Birth,
            2 => EvoKind::Migration,
            found => return Err(CodecError::BadMarker { found }),
        };
        Ok(Self {
            kind,
            gid: AgentGlobalId(r.read_u64_le()?),
            ty: AgentTypeId(r.read_u32_le()?),
            origin: MasterId(r.read_u32_le()?),
            destination: MasterId(r.read_u32_le()?),
            payload: r.read_bytes()?.to_vec(),
        })
    }
}

/// Encode a master's record list for the all-gather.
pub fn encode_records(records: &[EvoRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32_le(&mut out, records.len() as u32);
    for record in records {
        record.encode(&mut out);
    }
    out
}

/// Decode one master's record list.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<EvoRecord>, CodecError> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_u32_le()? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(EvoRecord::decode(&mut r)?);
    }
    Ok(records)
}

/// Per-shard collector of this step's death and birth requests.
///
/// Each shard worker owns one queue, so requests need no locking; the
/// planner drains them all single-threaded during meta-evolution.
#[derive(Debug, Default)]
pub struct EvoQueue {
    /// Agents that requested death this step.
    pub deaths: Vec<AgentGlobalId>,
    /// Requested births: type plus initial payload.
    pub births: Vec<(AgentTypeId, Vec<u8>)>,
}

impl EvoQueue {
    /// Whether the queue holds no requests.
    pub fn is_empty(&self) -> bool {
        self.deaths.is_empty() && self.births.is_empty()
    }
}

impl EvolutionSink for EvoQueue {
    fn request_death(&mut self, gid: AgentGlobalId) {
        self.deaths.push(gid);
    }

    fn request_birth(&mut self, ty: AgentTypeId, payload: Vec<u8>) {
        self.births.push((ty, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_list_roundtrip() {
        let records = vec![
            EvoRecord {
                kind: EvoKind::Death,
                gid: AgentGlobalId(42),
                ty: AgentTypeId(1),
                origin: MasterId(2),
                destination: MasterId(0),
                payload: Vec::new(),
            },
            EvoRecord {
                kind: EvoKind::Migration,
                gid: AgentGlobalId(7),
                ty: AgentTypeId(0),
                origin: MasterId(0),
                destination: MasterId(3),
                payload: vec![1, 2, 3],
            },
            EvoRecord {
                kind: EvoKind::Birth,
                gid: AgentGlobalId(0),
                ty: AgentTypeId(1),
                origin: MasterId(1),
                destination: MasterId(1),
                payload: vec![9; 16],
            },
        ];
        let bytes = encode_records(&records);
        assert_eq!(decode_records(&bytes).unwrap(), records);
    }

    #[test]
    fn empty_list_roundtrip() {
        assert_eq!(decode_records(&encode_records(&[])).unwrap(), Vec::new());
    }

    #[test]
    fn bad_kind_is_rejected() {
        let mut bytes = encode_records(&[EvoRecord {
            kind: EvoKind::Death,
            gid: AgentGlobalId(0),
            ty: AgentTypeId(0),
            origin: MasterId(0),
            destination: MasterId(0),
            payload: Vec::new(),
        }]);
        bytes[4] = 9; // corrupt the kind byte
        assert!(matches!(
            decode_records(&bytes),
            Err(CodecError::BadMarker { found: 9 })
        ));
    }
}
