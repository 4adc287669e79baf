//! The window layer: allocation, publish paths, and remote reads.
//!
//! One [`WindowLayer`] per master. It owns the installed [`WindowPlan`],
//! keeps the allocation sizes, and translates attribute-level operations
//! into fabric window calls. Epochs are scoped: [`EpochGuard`] releases
//! the window on every exit path.

use std::sync::Arc;

use tracing::warn;

use herd_core::error::{ModelError, ProtocolError, TransportError};
use herd_core::id::{AgentGlobalId, AttrId, MasterId};
use herd_core::registry::{AttrDef, TypeRegistry};
use herd_core::value::Value;
use herd_fabric::{Fabric, WindowKind};

use crate::plan::{check_digests, WindowPlan};
use crate::scratch::ScratchCache;

/// Failures of window-layer operations.
#[derive(Clone, Debug, PartialEq)]
pub enum WindowError {
    /// The underlying fabric failed.
    Transport(TransportError),
    /// Replicated state diverged across peers.
    Protocol(ProtocolError),
    /// An operation targeted an agent absent from the installed plan.
    Unplanned {
        /// The unplanned agent.
        gid: AgentGlobalId,
    },
}

impl std::fmt::Display for WindowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Protocol(e) => write!(f, "{e}"),
            Self::Unplanned { gid } => {
                write!(f, "agent {gid} has no slot in the installed window plan")
            }
        }
    }
}

impl std::error::Error for WindowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Protocol(e) => Some(e),
            Self::Unplanned { .. } => None,
        }
    }
}

impl From<TransportError> for WindowError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for WindowError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Scoped access epoch over one window.
///
/// Dropping the guard closes the epoch, so release is guaranteed on
/// every exit path of the publish and behavior phases, error paths
/// included. Prefer [`close`](EpochGuard::close) where the completion
/// result matters.
#[must_use]
pub struct EpochGuard<'a> {
    fabric: &'a dyn Fabric,
    kind: WindowKind,
    open: bool,
}

impl EpochGuard<'_> {
    /// Close the epoch, surfacing the completion result.
    pub fn close(mut self) -> Result<(), TransportError> {
        self.open = false;
        self.fabric.window_unlock_all(self.kind)
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.fabric.window_unlock_all(self.kind) {
                warn!(window = %self.kind, error = %e, "epoch close failed during unwind");
            }
        }
    }
}

/// Per-master manager of the public and critical windows.
pub struct WindowLayer {
    fabric: Arc<dyn Fabric>,
    registry: Arc<TypeRegistry>,
    plan: WindowPlan,
    public_alloc: u64,
    critical_alloc: u64,
}

impl WindowLayer {
    /// A layer with no plan installed and no window space allocated.
    pub fn new(fabric: Arc<dyn Fabric>, registry: Arc<TypeRegistry>) -> Self {
        let plan = WindowPlan::build(&registry, fabric.master_count(), &[]);
        Self {
            fabric,
            registry,
            plan,
            public_alloc: 0,
            critical_alloc: 0,
        }
    }

    /// The installed plan.
    pub fn plan(&self) -> &WindowPlan {
        &self.plan
    }

    /// The fabric this layer operates over.
    pub fn fabric(&self) -> &Arc<dyn Fabric> {
        &self.fabric
    }

    /// Install a freshly built plan: verify consensus across peers, then
    /// (re)allocate the windows if the sizing policy demands it.
    ///
    /// All public windows are allocated at the same size, twice the
    /// largest per-master usage, so modest population shifts between
    /// steps need no coordination. A window is reallocated only when the
    /// required size exceeds the allocation or shrinks below a quarter
    /// of it. Returns whether any window was reallocated (the caller
    /// must then refill window contents).
    pub fn install_plan(&mut self, plan: WindowPlan) -> Result<bool, WindowError> {
        // Consensus: every master must hold byte-identical tables.
        let own = plan.digest();
        let gathered = self.fabric.all_gather(own.to_le_bytes().to_vec())?;
        let mut digests = Vec::with_capacity(gathered.len());
        for part in &gathered {
            let bytes: [u8; 8] = part.as_slice().try_into().map_err(|_| {
                TransportError::SizeMismatch {
                    expected: 8,
                    found: part.len(),
                }
            })?;
            digests.push(u64::from_le_bytes(bytes));
        }
        check_digests(own, &digests)?;

        let mut resized = false;
        let public_required = plan.max_public_used();
        if Self::needs_resize(public_required, self.public_alloc) {
            self.public_alloc = 2 * public_required;
            self.fabric
                .window_resize(WindowKind::Public, self.public_alloc as usize)?;
            resized = true;
        }
        let critical_required = plan.critical_size();
        if Self::needs_resize(critical_required, self.critical_alloc) {
            self.critical_alloc = 2 * critical_required;
            self.fabric
                .window_resize(WindowKind::Critical, self.critical_alloc as usize)?;
            resized = true;
        }

        self.plan = plan;
        Ok(resized)
    }

    fn needs_resize(required: u64, allocated: u64) -> bool {
        required > allocated || (allocated > 0 && required * 4 < allocated)
    }

    /// Open an access epoch over a window.
    pub fn epoch(&self, kind: WindowKind) -> Result<EpochGuard<'_>, TransportError> {
        self.fabric.window_lock_all(kind)?;
        Ok(EpochGuard {
            fabric: self.fabric.as_ref(),
            kind,
            open: true,
        })
    }

    fn attr_checked(&self, gid: AgentGlobalId, attr: AttrId) -> Result<&AttrDef, ModelError> {
        let ty = self.registry.type_of(gid);
        let def = self.registry.agent_type(ty);
        def.attrs
            .get(attr.0 as usize)
            .ok_or_else(|| ModelError::NoSuchAttribute {
                type_name: def.name.clone(),
                attr: attr.0,
            })
    }

    /// Copy an owned agent's public struct image into the local public
    /// window. Called during the publish phase for every owned agent.
    pub fn write_public_local(
        &self,
        gid: AgentGlobalId,
        image: &[u8],
    ) -> Result<(), WindowError> {
        let offset = self
            .plan
            .public_offset(gid)
            .ok_or(WindowError::Unplanned { gid })?;
        self.fabric
            .window_write_local(WindowKind::Public, offset as usize, image)?;
        Ok(())
    }

    /// Replicate one critical attribute to every master's critical
    /// window. Must be called inside a critical-window epoch, during the
    /// publish phase only.
    pub fn publish_critical(
        &self,
        gid: AgentGlobalId,
        attr: AttrId,
        bytes: &[u8],
    ) -> Result<(), WindowError> {
        let base = self
            .plan
            .critical_offset(gid)
            .ok_or(WindowError::Unplanned { gid })?;
        let ty = self.registry.type_of(gid);
        let view_offset = self.registry.attr(ty, attr).view_offset;
        let runs = self.registry.wire_descriptor_for(ty, attr);
        let disp = (base + u64::from(view_offset)) as usize;
        for rank in 0..self.fabric.master_count() {
            self.fabric
                .window_put_typed(WindowKind::Critical, MasterId(rank), disp, &runs, bytes)?;
        }
        Ok(())
    }

    /// Replicate an agent's whole critical struct to every master. Used
    /// when windows are first filled and after any re-plan.
    pub fn publish_critical_struct(
        &self,
        gid: AgentGlobalId,
        image: &[u8],
    ) -> Result<(), WindowError> {
        if image.is_empty() {
            return Ok(());
        }
        let base = self
            .plan
            .critical_offset(gid)
            .ok_or(WindowError::Unplanned { gid })?;
        for rank in 0..self.fabric.master_count() {
            self.fabric.window_put(
                WindowKind::Critical,
                MasterId(rank),
                base as usize,
                image,
            )?;
        }
        Ok(())
    }

    /// Read a public non-critical attribute by identity.
    ///
    /// Local owners resolve straight out of the local window. Remote
    /// reads memoize through the worker's scratch cache: the first read
    /// of a `(gid, attr)` pair issues the one-sided get, later reads
    /// decode the cached bytes. Valid only during the behavior phase,
    /// inside the public-window read epoch.
    pub fn read_public(
        &self,
        cache: &mut ScratchCache,
        owner: MasterId,
        gid: AgentGlobalId,
        attr: AttrId,
    ) -> Result<Value, ModelError> {
        let a = self.attr_checked(gid, attr)?;
        let (shape, size, view_offset) = (a.shape.clone(), a.size as usize, a.view_offset);
        let base = self.plan.public_offset(gid).ok_or_else(|| {
            ModelError::AgentNotFound {
                local_id: self.registry.local_of(gid),
                type_name: self.registry.agent_type(self.registry.type_of(gid)).name.clone(),
            }
        })?;
        let disp = (base + u64::from(view_offset)) as usize;

        if owner == self.fabric.master_id() {
            let mut buf = vec![0u8; size];
            self.fabric
                .window_read_local(WindowKind::Public, disp, &mut buf)
                .map_err(ModelError::Transport)?;
            return decode(&shape, &buf);
        }

        if let Some(slot) = cache.lookup(gid, attr) {
            return decode(&shape, cache.bytes(slot));
        }

        let ty = self.registry.type_of(gid);
        let runs = self.registry.wire_descriptor_for(ty, attr);
        let slot = cache.reserve(gid, attr, size);
        self.fabric
            .window_get_typed(WindowKind::Public, owner, disp, &runs, cache.bytes_mut(slot))
            .map_err(ModelError::Transport)?;
        decode(&shape, cache.bytes(slot))
    }

    /// Read a critical attribute: always a local-replica read, no
    /// network traffic.
    pub fn read_critical(&self, gid: AgentGlobalId, attr: AttrId) -> Result<Value, ModelError> {
        let a = self.attr_checked(gid, attr)?;
        let (shape, size, view_offset) = (a.shape.clone(), a.size as usize, a.view_offset);
        let base = self.plan.critical_offset(gid).ok_or_else(|| {
            ModelError::AgentNotFound {
                local_id: self.registry.local_of(gid),
                type_name: self.registry.agent_type(self.registry.type_of(gid)).name.clone(),
            }
        })?;
        let mut buf = vec![0u8; size];
        self.fabric
            .window_read_local(
                WindowKind::Critical,
                (base + u64::from(view_offset)) as usize,
                &mut buf,
            )
            .map_err(ModelError::Transport)?;
        decode(&shape, &buf)
    }
}

fn decode(shape: &herd_core::wire::WireShape, bytes: &[u8]) -> Result<Value, ModelError> {
    Value::decode_from(shape, bytes).map_err(|_| {
        // Shapes and slots are sized together; a mismatch means the
        // transport mangled the payload.
        ModelError::Transport(TransportError::SizeMismatch {
            expected: shape.size() as usize,
            found: bytes.len(),
        })
    })
}

impl std::fmt::Debug for WindowLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowLayer")
            .field("planned_agents", &self.plan.len())
            .field("public_alloc", &self.public_alloc)
            .field("critical_alloc", &self.critical_alloc)
            .finish()
    }
}
