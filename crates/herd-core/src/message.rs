//! The typed message exchanged between agents: header identifying the
//! endpoints, plus an opaque payload laid out per the interaction type's
//! wire shape.

use crate::codec::{write_u32_le, write_u64_le, ByteReader};
use crate::error::CodecError;
use crate::id::{AgentLocalId, AgentTypeId, InteractionTypeId};

/// One interaction in flight between two agents.
///
/// The payload is the packed field struct of the interaction type; it is
/// decoded lazily by recipients through the registry.
#[derive(Clone, Debug, PartialEq)]
pub struct Interaction {
    /// The interaction type.
    pub itype: InteractionTypeId,
    /// Type of the sending agent.
    pub sender_type: AgentTypeId,
    /// Local id of the sending agent.
    pub sender_id: AgentLocalId,
    /// Type of the receiving agent.
    pub recipient_type: AgentTypeId,
    /// Local id of the receiving agent.
    pub recipient_id: AgentLocalId,
    /// Packed payload bytes, `interaction payload size` long.
    pub payload: Vec<u8>,
}

impl Interaction {
    /// Append the wire form (header + payload) to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        write_u32_le(out, self.itype.0);
        write_u32_le(out, self.sender_type.0);
        write_u64_le(out, self.sender_id.0);
        write_u32_le(out, self.recipient_type.0);
        write_u64_le(out, self.recipient_id.0);
        out.extend_from_slice(&self.payload);
    }

    /// Decode one interaction whose payload is `payload_len` bytes.
    pub fn decode(r: &mut ByteReader<'_>, payload_len: usize) -> Result<Self, CodecError> {
        Ok(Self {
            itype: InteractionTypeId(r.read_u32_le()?),
            sender_type: AgentTypeId(r.read_u32_le()?),
            sender_id: AgentLocalId(r.read_u64_le()?),
            recipient_type: AgentTypeId(r.read_u32_le()?),
            recipient_id: AgentLocalId(r.read_u64_le()?),
            payload: r.read_exact(payload_len)?.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let inter = Interaction {
            itype: InteractionTypeId(2),
            sender_type: AgentTypeId(0),
            sender_id: AgentLocalId(11),
            recipient_type: AgentTypeId(1),
            recipient_id: AgentLocalId(7),
            payload: vec![1, 2, 3, 4],
        };
        let mut out = Vec::new();
        inter.encode(&mut out);
        let mut r = ByteReader::new(&out);
        let back = Interaction::decode(&mut r, 4).unwrap();
        assert_eq!(back, inter);
        assert!(r.is_exhausted());
    }

    #[test]
    fn decode_rejects_short_payload() {
        let inter = Interaction {
            itype: InteractionTypeId(0),
            sender_type: AgentTypeId(0),
            sender_id: AgentLocalId(0),
            recipient_type: AgentTypeId(0),
            recipient_id: AgentLocalId(0),
            payload: vec![9],
        };
        let mut out = Vec::new();
        inter.encode(&mut out);
        let mut r = ByteReader::new(&out);
        assert!(Interaction::decode(&mut r, 2).is_err());
    }
}
