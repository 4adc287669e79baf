//! In-process fabric: M masters as threads of one process.
//!
//! Point-to-point messages travel over a full mesh of crossbeam channels
//! (one per ordered peer pair, so per-pair FIFO holds by construction).
//! Windows are shared byte buffers behind reader-writer locks; a remote
//! put or get is a locked copy into or out of the target's buffer, and
//! the epoch flags enforce that one-sided calls only happen inside a
//! lock-all/unlock-all bracket, mirroring the real substrate's rules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, RwLock};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use herd_core::error::TransportError;
use herd_core::id::MasterId;

use crate::fabric::{Fabric, WindowKind};

/// Reserved tags for collective operations. User tags must stay below
/// this range.
const TAG_BCAST: u64 = u64::MAX - 1;
const TAG_GATHER: u64 = u64::MAX - 2;
const TAG_ALLGATHER: u64 = u64::MAX - 3;
const TAG_ALLTOALL: u64 = u64::MAX - 4;

/// How long a receive waits before the fabric declares the peer lost.
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

struct Mail {
    tag: u64,
    bytes: Vec<u8>,
}

struct Shared {
    barrier: Barrier,
    /// `windows[kind][master]` is that master's exposed region.
    windows: [Vec<RwLock<Vec<u8>>>; 2],
}

/// One master's endpoint of an in-process cluster.
///
/// Created in bulk by [`LocalFabric::cluster`]; each endpoint is then
/// moved into its master's thread.
pub struct LocalFabric {
    id: MasterId,
    count: u32,
    shared: Arc<Shared>,
    /// Indexed by destination rank.
    senders: Vec<Sender<Mail>>,
    /// Indexed by source rank.
    receivers: Vec<Receiver<Mail>>,
    /// Epoch-open flags, one per window kind.
    epochs: [AtomicBool; 2],
    recv_timeout: Duration,
}

impl LocalFabric {
    /// Build a cluster of `m` connected endpoints, rank `k` at index `k`.
    pub fn cluster(m: u32) -> Vec<LocalFabric> {
        assert!(m > 0, "a cluster needs at least one master");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(m as usize),
            windows: [
                (0..m).map(|_| RwLock::new(Vec::new())).collect(),
                (0..m).map(|_| RwLock::new(Vec::new())).collect(),
            ],
        });

        // mesh[src][dst] holds the channel from src to dst.
        let mesh: Vec<Vec<(Sender<Mail>, Receiver<Mail>)>> = (0..m)
            .map(|_| (0..m).map(|_| unbounded()).collect())
            .collect();

        // Senders are cloned (rank r keeps mesh[r][*]); receivers move
        // out of the mesh transposed (rank r owns mesh[*][r]).
        let senders_by_rank: Vec<Vec<Sender<Mail>>> = (0..m as usize)
            .map(|rank| mesh[rank].iter().map(|(tx, _)| tx.clone()).collect())
            .collect();
        let mut receivers_by_rank: Vec<Vec<Receiver<Mail>>> =
            (0..m).map(|_| Vec::with_capacity(m as usize)).collect();
        for row in mesh {
            for (dst, (_, rx)) in row.into_iter().enumerate() {
                receivers_by_rank[dst].push(rx);
            }
        }

        senders_by_rank
            .into_iter()
            .zip(receivers_by_rank)
            .enumerate()
            .map(|(rank, (senders, receivers))| LocalFabric {
                id: MasterId(rank as u32),
                count: m,
                shared: Arc::clone(&shared),
                senders,
                receivers,
                epochs: [AtomicBool::new(false), AtomicBool::new(false)],
                recv_timeout: DEFAULT_RECV_TIMEOUT,
            })
            .collect()
    }

    /// Override the receive deadline (tests shorten it to fail fast).
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    fn check_rank(&self, peer: MasterId) -> Result<(), TransportError> {
        if peer.0 >= self.count {
            return Err(TransportError::PeerLost { peer });
        }
        Ok(())
    }

    fn check_epoch(&self, kind: WindowKind) -> Result<(), TransportError> {
        if !self.epochs[kind.index()].load(Ordering::Acquire) {
            return Err(TransportError::EpochClosed);
        }
        Ok(())
    }

    fn window_access(
        buf: &[u8],
        offset: usize,
        len: usize,
    ) -> Result<(), TransportError> {
        if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(TransportError::WindowOutOfBounds {
                size: buf.len(),
                offset,
                len,
            });
        }
        Ok(())
    }
}

impl Fabric for LocalFabric {
    fn master_id(&self) -> MasterId {
        self.id
    }

    fn master_count(&self) -> u32 {
        self.count
    }

    fn barrier(&self) -> Result<(), TransportError> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn send(&self, to: MasterId, tag: u64, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.check_rank(to)?;
        self.senders[to.0 as usize]
            .send(Mail { tag, bytes })
            .map_err(|_| TransportError::PeerLost { peer: to })
    }

    fn recv(&self, from: MasterId, tag: u64) -> Result<Vec<u8>, TransportError> {
        self.check_rank(from)?;
        let mail = self.receivers[from.0 as usize]
            .recv_timeout(self.recv_timeout)
            .map_err(|_| TransportError::Timeout { peer: from })?;
        if mail.tag != tag {
            return Err(TransportError::TagMismatch {
                expected: tag,
                found: mail.tag,
            });
        }
        Ok(mail.bytes)
    }

    fn broadcast(&self, root: MasterId, bytes: Vec<u8>) -> Result<Vec<u8>, TransportError> {
        self.check_rank(root)?;
        if self.id == root {
            for rank in 0..self.count {
                if rank != self.id.0 {
                    self.send(MasterId(rank), TAG_BCAST, bytes.clone())?;
                }
            }
            Ok(bytes)
        } else {
            self.recv(root, TAG_BCAST)
        }
    }

    fn gather(
        &self,
        root: MasterId,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
        self.check_rank(root)?;
        if self.id == root {
            let mut parts = Vec::with_capacity(self.count as usize);
            for rank in 0..self.count {
                if rank == self.id.0 {
                    parts.push(bytes.clone());
                } else {
                    parts.push(self.recv(MasterId(rank), TAG_GATHER)?);
                }
            }
            Ok(Some(parts))
        } else {
            self.send(root, TAG_GATHER, bytes)?;
            Ok(None)
        }
    }

    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError> {
        for rank in 0..self.count {
            if rank != self.id.0 {
                self.send(MasterId(rank), TAG_ALLGATHER, bytes.clone())?;
            }
        }
        let mut parts = Vec::with_capacity(self.count as usize);
        for rank in 0..self.count {
            if rank == self.id.0 {
                parts.push(bytes.clone());
            } else {
                parts.push(self.recv(MasterId(rank), TAG_ALLGATHER)?);
            }
        }
        Ok(parts)
    }

    fn all_to_all(&self, mut rows: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, TransportError> {
        if rows.len() != self.count as usize {
            return Err(TransportError::SizeMismatch {
                expected: self.count as usize,
                found: rows.len(),
            });
        }
        // Post all sends first; unbounded channels never block.
        for rank in 0..self.count {
            if rank != self.id.0 {
                let payload = std::mem::take(&mut rows[rank as usize]);
                self.send(MasterId(rank), TAG_ALLTOALL, payload)?;
            }
        }
        let mut parts = Vec::with_capacity(self.count as usize);
        for rank in 0..self.count {
            if rank == self.id.0 {
                parts.push(std::mem::take(&mut rows[rank as usize]));
            } else {
                parts.push(self.recv(MasterId(rank), TAG_ALLTOALL)?);
            }
        }
        Ok(parts)
    }

    fn window_resize(&self, kind: WindowKind, len: usize) -> Result<(), TransportError> {
        {
            let mut buf = self.shared.windows[kind.index()][self.id.0 as usize]
                .write()
                .map_err(|_| TransportError::PeerLost { peer: self.id })?;
            *buf = vec![0u8; len];
        }
        // All regions resized before anyone proceeds.
        self.barrier()
    }

    fn window_size(&self, kind: WindowKind, target: MasterId) -> Result<usize, TransportError> {
        self.check_rank(target)?;
        let buf = self.shared.windows[kind.index()][target.0 as usize]
            .read()
            .map_err(|_| TransportError::PeerLost { peer: target })?;
        Ok(buf.len())
    }

    fn window_lock_all(&self, kind: WindowKind) -> Result<(), TransportError> {
        if self.epochs[kind.index()].swap(true, Ordering::AcqRel) {
            return Err(TransportError::EpochClosed);
        }
        Ok(())
    }

    fn window_unlock_all(&self, kind: WindowKind) -> Result<(), TransportError> {
        if !self.epochs[kind.index()].swap(false, Ordering::AcqRel) {
            return Err(TransportError::EpochClosed);
        }
        Ok(())
    }

    fn window_put(
        &self,
        kind: WindowKind,
        target: MasterId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.check_rank(target)?;
        self.check_epoch(kind)?;
        let mut buf = self.shared.windows[kind.index()][target.0 as usize]
            .write()
            .map_err(|_| TransportError::PeerLost { peer: target })?;
        Self::window_access(&buf, offset, data.len())?;
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn window_get(
        &self,
        kind: WindowKind,
        target: MasterId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), TransportError> {
        self.check_rank(target)?;
        self.check_epoch(kind)?;
        let buf = self.shared.windows[kind.index()][target.0 as usize]
            .read()
            .map_err(|_| TransportError::PeerLost { peer: target })?;
        Self::window_access(&buf, offset, out.len())?;
        out.copy_from_slice(&buf[offset..offset + out.len()]);
        Ok(())
    }

    fn window_read_local(
        &self,
        kind: WindowKind,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), TransportError> {
        let buf = self.shared.windows[kind.index()][self.id.0 as usize]
            .read()
            .map_err(|_| TransportError::PeerLost { peer: self.id })?;
        Self::window_access(&buf, offset, out.len())?;
        out.copy_from_slice(&buf[offset..offset + out.len()]);
        Ok(())
    }

    fn window_write_local(
        &self,
        kind: WindowKind,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let mut buf = self.shared.windows[kind.index()][self.id.0 as usize]
            .write()
            .map_err(|_| TransportError::PeerLost { peer: self.id })?;
        Self::window_access(&buf, offset, data.len())?;
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFabric")
            .field("id", &self.id)
            .field("count", &self.count)
            .finish()
    }
}
