//! The [`Fabric`] trait: the substrate surface the runtime is written
//! against.
//!
//! Every collective is called by all masters in the same phase; global
//! ordering is guaranteed by the pipeline's barriers, so a single
//! reserved tag per collective suffices for matching.

use herd_core::error::TransportError;
use herd_core::id::MasterId;
use herd_core::wire::FlatRun;

/// The two memory windows every master exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowKind {
    /// Per-owner storage for public non-critical attributes.
    Public,
    /// Fully replicated storage for critical attributes.
    Critical,
}

impl WindowKind {
    /// Dense index for table lookups.
    pub fn index(self) -> usize {
        match self {
            Self::Public => 0,
            Self::Critical => 1,
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Peer-to-peer and one-sided communication among M masters.
///
/// All collectives (`barrier`, `broadcast`, `gather`, `all_gather`,
/// `all_to_all`, `window_resize`) must be entered by every master;
/// mismatched participation deadlocks or errors, which the runtime treats
/// as a transport failure.
///
/// Window put/get are valid only inside an epoch opened with
/// [`window_lock_all`](Fabric::window_lock_all); closing the epoch
/// implies completion of every operation issued inside it.
pub trait Fabric: Send + Sync {
    /// This master's rank.
    fn master_id(&self) -> MasterId;

    /// Number of masters in the communicator.
    fn master_count(&self) -> u32;

    /// Block until every master reaches the barrier.
    fn barrier(&self) -> Result<(), TransportError>;

    /// Send `bytes` to `to`, tagged. Non-blocking: buffers at the receiver.
    fn send(&self, to: MasterId, tag: u64, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next message from `from`, which must carry `tag`.
    ///
    /// A mismatched tag is a protocol bug surfaced as
    /// [`TransportError::TagMismatch`].
    fn recv(&self, from: MasterId, tag: u64) -> Result<Vec<u8>, TransportError>;

    /// Broadcast from `root`: the root passes the payload and gets it
    /// back; every other master passes an empty vector and receives the
    /// root's payload.
    fn broadcast(&self, root: MasterId, bytes: Vec<u8>) -> Result<Vec<u8>, TransportError>;

    /// Gather every master's payload at `root`, in rank order.
    ///
    /// Returns `Some` on the root, `None` elsewhere.
    fn gather(&self, root: MasterId, bytes: Vec<u8>)
        -> Result<Option<Vec<Vec<u8>>>, TransportError>;

    /// Gather every master's payload on every master, in rank order.
    fn all_gather(&self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError>;

    /// Exchange one payload per destination: `rows[d]` goes to master
    /// `d`; the result holds one payload per source, in rank order.
    fn all_to_all(&self, rows: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, TransportError>;

    /// Collectively resize this master's region of a window, zero-filled.
    ///
    /// Returns once every master's region has its new size.
    fn window_resize(&self, kind: WindowKind, len: usize) -> Result<(), TransportError>;

    /// Size in bytes of `target`'s region of a window.
    fn window_size(&self, kind: WindowKind, target: MasterId) -> Result<usize, TransportError>;

    /// Open an access epoch over a window (lock-all semantics).
    fn window_lock_all(&self, kind: WindowKind) -> Result<(), TransportError>;

    /// Close the access epoch. All puts and gets issued inside the epoch
    /// are complete when this returns.
    fn window_unlock_all(&self, kind: WindowKind) -> Result<(), TransportError>;

    /// One-sided write of `data` into `target`'s window at `offset`.
    fn window_put(
        &self,
        kind: WindowKind,
        target: MasterId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// One-sided read from `target`'s window at `offset` into `out`.
    fn window_get(
        &self,
        kind: WindowKind,
        target: MasterId,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Read from this master's own window region. Requires no epoch.
    fn window_read_local(
        &self,
        kind: WindowKind,
        offset: usize,
        out: &mut [u8],
    ) -> Result<(), TransportError>;

    /// Write into this master's own window region. Requires no epoch.
    fn window_write_local(
        &self,
        kind: WindowKind,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Typed put: write `src` (an attribute image) into `target`'s window
    /// using a flat wire descriptor, run by run, displaced by `disp`.
    ///
    /// Runs are relative to the start of `src`; opaque gaps in the shape
    /// are skipped, matching the substrate's native typed datatypes.
    fn window_put_typed(
        &self,
        kind: WindowKind,
        target: MasterId,
        disp: usize,
        runs: &[FlatRun],
        src: &[u8],
    ) -> Result<(), TransportError> {
        for run in runs {
            let lo = run.offset as usize;
            let hi = lo + run.len() as usize;
            self.window_put(kind, target, disp + lo, &src[lo..hi])?;
        }
        Ok(())
    }

    /// Typed get: the read-side counterpart of
    /// [`window_put_typed`](Fabric::window_put_typed).
    fn window_get_typed(
        &self,
        kind: WindowKind,
        target: MasterId,
        disp: usize,
        runs: &[FlatRun],
        out: &mut [u8],
    ) -> Result<(), TransportError> {
        for run in runs {
            let lo = run.offset as usize;
            let hi = lo + run.len() as usize;
            self.window_get(kind, target, disp + lo, &mut out[lo..hi])?;
        }
        Ok(())
    }
}
