//! The control plane.
//!
//! Master 0 (the root) drives the simulation: it encodes each control
//! action as an [`Order`], broadcasts it over the master communicator,
//! and then every master — root included — executes it. Non-root
//! masters sit in [`Master::wait_orders`] between orders. Orders never
//! overlap: the root only issues the next one after the previous one
//! returned everywhere.
//!
//! Above the order layer sits the front-end protocol: the root reads
//! ASCII command lines from a named control queue (`herd_<token>`,
//! token random per run) and the remaining processes loop in
//! [`peer_main`] on the outer [`Control`] broadcast, standing masters
//! up and tearing them down as `init`/`kill` cycles demand.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::{distributions::Alphanumeric, Rng};
use tracing::{info, warn};

use herd_core::codec::{write_u32_le, write_u64_le, ByteReader};
use herd_core::error::{ConfigError, ProtocolError};
use herd_core::id::{AgentLocalId, MasterId};
use herd_core::value::Value;
use herd_fabric::Fabric;
use herd_snapshot::{document, population};

use crate::config::MasterConfig;
use crate::error::{ControlError, StepError};
use crate::master::{Master, TAG_MODIFY_VALUE};

/// Name prefix of the control queue.
pub const QUEUE_PREFIX: &str = "herd";

/// Control actions broadcast by the root to all masters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    /// No-op; peers keep waiting.
    Idle,
    /// Run `period` steps.
    Run,
    /// Change the steps-per-run period.
    ChangePeriod,
    /// Inject agents supplied by the front-end (declared; the payload
    /// protocol is reserved and the order is currently a no-op).
    AddAgents,
    /// Overwrite one attribute of one agent.
    ModifyAttribute,
    /// Gather and export all agent state to the root.
    Export,
    /// Tear the simulation down; peers leave the order loop.
    Kill,
}

impl Order {
    /// Single-byte wire form.
    pub fn encode(self) -> Vec<u8> {
        vec![match self {
            Self::Idle => 0,
            Self::Run => 1,
            Self::ChangePeriod => 2,
            Self::AddAgents => 3,
            Self::ModifyAttribute => 4,
            Self::Export => 5,
            Self::Kill => 6,
        }]
    }

    /// Decode from a broadcast payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [0] => Ok(Self::Idle),
            [1] => Ok(Self::Run),
            [2] => Ok(Self::ChangePeriod),
            [3] => Ok(Self::AddAgents),
            [4] => Ok(Self::ModifyAttribute),
            [5] => Ok(Self::Export),
            [6] => Ok(Self::Kill),
            other => Err(ProtocolError::OrderDesync {
                detail: format!("unrecognized order payload {other:?}"),
            }),
        }
    }
}

/// Outer process-lifecycle controls, broadcast before any master
/// exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Stand up a master on every process.
    Init,
    /// Change the shard (thread) count used by the next `init`.
    ChangeThreads,
    /// Shut the process down.
    Exit,
}

impl Control {
    /// Single-byte wire form.
    pub fn encode(self) -> Vec<u8> {
        vec![match self {
            Self::Init => 1,
            Self::ChangeThreads => 2,
            Self::Exit => 3,
        }]
    }

    /// Decode from a broadcast payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            [1] => Ok(Self::Init),
            [2] => Ok(Self::ChangeThreads),
            [3] => Ok(Self::Exit),
            other => Err(ProtocolError::OrderDesync {
                detail: format!("unrecognized control payload {other:?}"),
            }),
        }
    }
}

// ── Order execution on the master ───────────────────────────────

impl Master {
    /// Run one period of steps on every master. Root-side entry of the
    /// `RUN` order.
    pub fn order_run(&mut self) -> Result<(), StepError> {
        if self.id.is_root() {
            self.fabric.broadcast(MasterId::ROOT, Order::Run.encode())?;
        }
        self.run(self.period)
    }

    /// Change the steps-per-run period everywhere. The argument is only
    /// meaningful on the root; followers receive the value from the
    /// broadcast.
    pub fn order_change_period(&mut self, new_period: u64) -> Result<(), StepError> {
        let payload = if self.id.is_root() {
            self.fabric
                .broadcast(MasterId::ROOT, Order::ChangePeriod.encode())?;
            new_period.to_le_bytes().to_vec()
        } else {
            Vec::new()
        };
        let payload = self.fabric.broadcast(MasterId::ROOT, payload)?;
        let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
            StepError::Protocol(ProtocolError::OrderDesync {
                detail: format!("period payload of {} bytes", payload.len()),
            })
        })?;
        self.period = u64::from_le_bytes(bytes);
        Ok(())
    }

    /// Overwrite one agent's attribute everywhere it matters.
    ///
    /// Root-side entry of the `MODIFY_ATTRIBUTE` order. Validation
    /// happens before any broadcast: an unknown type or attribute, a
    /// non-sendable attribute, or a missing agent is a config error and
    /// nothing changes anywhere.
    pub fn order_modify_attribute(
        &mut self,
        type_name: &str,
        local_id: AgentLocalId,
        attr_name: &str,
        value: &Value,
    ) -> Result<(), ControlError> {
        let registry = Arc::clone(&self.registry);
        let ty = registry.agent_type_by_name(type_name)?;
        let attr = registry.attr_by_name(ty, attr_name)?;
        if !registry.is_sendable(ty, attr) {
            return Err(ConfigError::InvalidArgument {
                detail: format!("attribute '{attr_name}' cannot be modified: it is not sendable"),
            }
            .into());
        }
        if !self.index.exists(ty, local_id) {
            return Err(ConfigError::InvalidArgument {
                detail: format!("agent {local_id} of type '{type_name}' does not exist"),
            }
            .into());
        }
        let descriptor = registry.field_descriptor(ty, attr);
        let mut bytes = vec![0u8; descriptor.size as usize];
        value.encode_into(descriptor.shape, &mut bytes)?;

        self.fabric
            .broadcast(MasterId::ROOT, Order::ModifyAttribute.encode())
            .map_err(StepError::from)?;
        let gid = registry.global_id(ty, local_id);
        let mut blob = Vec::with_capacity(12);
        write_u64_le(&mut blob, gid.0);
        write_u32_le(&mut blob, attr.0);
        self.fabric
            .broadcast(MasterId::ROOT, blob)
            .map_err(StepError::from)?;

        let owner = self
            .index
            .owner(gid)
            .ok_or(StepError::Protocol(ProtocolError::OwnerDivergence { gid }))?;
        if owner == self.id {
            self.apply_attribute_bytes(gid, attr, &bytes)?;
        } else {
            self.fabric
                .send(owner, TAG_MODIFY_VALUE, bytes)
                .map_err(StepError::from)?;
        }
        Ok(())
    }

    /// Follower side of `MODIFY_ATTRIBUTE`: learn the target from the
    /// broadcast and, if this master owns it, receive and apply the new
    /// value.
    pub(crate) fn follow_modify_attribute(&mut self) -> Result<(), ControlError> {
        let blob = self
            .fabric
            .broadcast(MasterId::ROOT, Vec::new())
            .map_err(StepError::from)?;
        let mut r = ByteReader::new(&blob);
        let (gid, attr) = match (r.read_u64_le(), r.read_u32_le()) {
            (Ok(gid), Ok(attr)) => (herd_core::id::AgentGlobalId(gid), herd_core::id::AttrId(attr)),
            _ => {
                return Err(StepError::Protocol(ProtocolError::OrderDesync {
                    detail: "malformed modify-attribute target".into(),
                })
                .into())
            }
        };
        if self.index.owner(gid) == Some(self.id) {
            let bytes = self
                .fabric
                .recv(MasterId::ROOT, TAG_MODIFY_VALUE)
                .map_err(StepError::from)?;
            self.apply_attribute_bytes(gid, attr, &bytes)?;
        }
        Ok(())
    }

    /// Export all agent state: every master serializes its part, the
    /// root gathers, merges, and returns the document (`None`
    /// elsewhere). Root-side entry of the `EXPORT` order; peers reach
    /// [`export`](Self::export) through their order loop.
    pub fn order_export(&mut self) -> Result<Option<Value>, ControlError> {
        if self.id.is_root() {
            self.fabric
                .broadcast(MasterId::ROOT, Order::Export.encode())
                .map_err(StepError::from)?;
        }
        self.export()
    }

    /// Collective export: every master must call this together.
    pub fn export(&mut self) -> Result<Option<Value>, ControlError> {
        let local = document::agents_document(&self.registry, &self.store)?;
        let parts = self
            .fabric
            .gather(MasterId::ROOT, herd_snapshot::binary::to_bytes(&local))
            .map_err(StepError::from)?;
        match parts {
            Some(parts) => {
                let mut docs = Vec::with_capacity(parts.len());
                for part in &parts {
                    docs.push(
                        herd_snapshot::binary::from_bytes(part)
                            .map_err(herd_snapshot::SnapshotError::from)?,
                    );
                }
                Ok(Some(document::merge_documents(&self.registry, &docs)?))
            }
            None => Ok(None),
        }
    }

    /// Runtime agent injection. The order is part of the protocol but
    /// its payload exchange is not implemented; every master treats it
    /// as a no-op.
    pub fn order_add_agents(&mut self) -> Result<(), StepError> {
        if self.id.is_root() {
            self.fabric
                .broadcast(MasterId::ROOT, Order::AddAgents.encode())?;
        }
        warn!(master = %self.id, "add-agents order received; runtime injection is not implemented");
        Ok(())
    }

    /// Tear the simulation down: peers leave their order loop.
    pub fn order_kill(&mut self) -> Result<(), StepError> {
        if self.id.is_root() {
            self.fabric.broadcast(MasterId::ROOT, Order::Kill.encode())?;
        }
        self.cancel.store(true, Ordering::Release);
        info!(master = %self.id, "simulation killed");
        Ok(())
    }

    /// Non-root order loop: block on the order broadcast and execute
    /// until `KILL` arrives. A no-op on the root.
    pub fn wait_orders(&mut self) -> Result<(), ControlError> {
        if self.id.is_root() {
            return Ok(());
        }
        loop {
            let payload = self
                .fabric
                .broadcast(MasterId::ROOT, Vec::new())
                .map_err(StepError::from)?;
            match Order::decode(&payload).map_err(StepError::from)? {
                Order::Idle => continue,
                Order::Run => self.run(self.period)?,
                Order::ChangePeriod => self.order_change_period(0)?,
                Order::AddAgents => self.order_add_agents()?,
                Order::ModifyAttribute => self.follow_modify_attribute()?,
                Order::Export => {
                    let _ = self.export()?;
                }
                Order::Kill => break,
            }
        }
        Ok(())
    }
}

// ── Control queue ───────────────────────────────────────────────

type QueuePair = (Sender<String>, Receiver<String>);

fn queue_registry() -> &'static Mutex<HashMap<String, QueuePair>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, QueuePair>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A run-scoped random token for the control queue name.
pub fn run_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// The queue name for a token: `herd_<token>`.
pub fn queue_name(token: &str) -> String {
    format!("{QUEUE_PREFIX}_{token}")
}

/// A named message queue carrying ASCII command lines from the
/// front-end to the root master's control session.
#[derive(Clone)]
pub struct ControlQueue {
    name: String,
    tx: Sender<String>,
    rx: Receiver<String>,
}

impl ControlQueue {
    /// Open the queue with this name, creating it if needed. Both ends
    /// address the queue purely by name, so it does not matter whether
    /// the front-end or the session arrives first.
    pub fn create(name: &str) -> Self {
        let mut registry = queue_registry().lock().unwrap_or_else(|e| e.into_inner());
        let (tx, rx) = registry
            .entry(name.to_string())
            .or_insert_with(unbounded)
            .clone();
        Self {
            name: name.to_string(),
            tx,
            rx,
        }
    }

    /// Open an existing queue by name.
    pub fn open(name: &str) -> Option<Self> {
        let registry = queue_registry().lock().unwrap_or_else(|e| e.into_inner());
        registry.get(name).map(|(tx, rx)| Self {
            name: name.to_string(),
            tx: tx.clone(),
            rx: rx.clone(),
        })
    }

    /// The queue's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a command line.
    pub fn send(&self, line: &str) {
        let _ = self.tx.send(line.to_string());
    }

    /// Pop the next command line, if any.
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Pop the next command line, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }
}

// ── Root session and peer loop ──────────────────────────────────

/// What the session should do after a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep listening.
    Continue,
    /// Shut the front-end down.
    Exit,
}

/// The root master's command session.
///
/// Parses whitespace-separated command lines from the control queue and
/// executes them. Config-level problems (unknown command, bad argument
/// count, missing file) print a diagnostic to standard error and change
/// nothing; transport and protocol failures propagate.
pub struct ControlSession {
    fabric: Arc<dyn Fabric>,
    config: MasterConfig,
    queue: ControlQueue,
    master: Option<Master>,
    run_latch: bool,
}

impl ControlSession {
    /// Open a session on the root over the named queue for `token`.
    pub fn new(config: MasterConfig, fabric: Arc<dyn Fabric>, token: &str) -> Self {
        debug_assert!(fabric.master_id().is_root(), "sessions live on the root");
        let queue = ControlQueue::create(&queue_name(token));
        info!(queue = queue.name(), "control session open");
        Self {
            fabric,
            config,
            queue,
            master: None,
            run_latch: false,
        }
    }

    /// The session's queue name (the front-end opens it by this name).
    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// The live root master, if a simulation is initialized.
    pub fn master(&self) -> Option<&Master> {
        self.master.as_ref()
    }

    /// Serve commands until `quit`/`exit`.
    ///
    /// With the run latch set (a bare `run`), batches of `period` steps
    /// execute between queue polls until `pause` or any other command
    /// arrives.
    pub fn listen(&mut self) -> Result<(), ControlError> {
        loop {
            match self.queue.try_recv() {
                Some(line) => {
                    self.run_latch = false;
                    if self.execute(&line)? == Flow::Exit {
                        return Ok(());
                    }
                }
                None => {
                    if self.run_latch && self.master.is_some() {
                        if let Some(master) = self.master.as_mut() {
                            master.order_run()?;
                        }
                    } else {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
            }
        }
    }

    /// Execute one command line.
    ///
    /// A malformed argument count is diagnosed on standard error before
    /// anything executes, so the command has no effect.
    pub fn execute(&mut self, line: &str) -> Result<Flow, ControlError> {
        let mut tokens = line.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(Flow::Continue);
        };
        let args: Vec<&str> = tokens.collect();
        let arity_ok = match command {
            "init" | "run" => args.len() <= 1,
            "pause" | "kill" | "quit" | "exit" => args.is_empty(),
            "set_period" | "set_nb_threads" | "export_json" | "export_ubjson" => args.len() == 1,
            "convert" => args.len() == 2,
            _ => true,
        };
        if !arity_ok {
            eprintln!("{command}: wrong number of arguments");
            return Ok(Flow::Continue);
        }
        let mut tokens = args.into_iter();
        match command {
            "init" => {
                let seeds = match tokens.next() {
                    Some(path) => {
                        let loaded = population::load_population(path)
                            .and_then(|f| population::materialize(&self.config.registry, &f));
                        match loaded {
                            Ok(seeds) => seeds,
                            Err(e) => {
                                eprintln!("init: {e}");
                                return Ok(Flow::Continue);
                            }
                        }
                    }
                    None => Vec::new(),
                };
                if self.master.is_some() {
                    self.kill_master()?;
                }
                self.fabric
                    .broadcast(MasterId::ROOT, Control::Init.encode())
                    .map_err(StepError::from)?;
                let master =
                    Master::init(self.config.clone(), Arc::clone(&self.fabric), seeds)?;
                self.master = Some(master);
            }
            "run" => match (&mut self.master, tokens.next()) {
                (None, _) => eprintln!("run: no simulation is alive; use init first"),
                (Some(master), Some(arg)) => match arg.parse::<u64>() {
                    Ok(batches) => {
                        for _ in 0..batches {
                            master.order_run()?;
                        }
                    }
                    Err(_) => eprintln!("run: invalid step count '{arg}'"),
                },
                (Some(_), None) => self.run_latch = true,
            },
            "pause" => self.run_latch = false,
            "kill" => {
                if self.master.is_some() {
                    self.kill_master()?;
                }
            }
            "set_period" => match (&mut self.master, tokens.next().map(str::parse::<u64>)) {
                (None, _) => eprintln!("set_period: no simulation is alive; use init first"),
                (Some(master), Some(Ok(period))) => master.order_change_period(period)?,
                (Some(_), _) => eprintln!("set_period: expected a step count"),
            },
            "set_nb_threads" => {
                if self.master.is_some() {
                    eprintln!("set_nb_threads: only valid while no simulation is alive");
                } else {
                    match tokens.next().map(str::parse::<u64>) {
                        Some(Ok(threads)) if threads > 0 => {
                            self.fabric
                                .broadcast(MasterId::ROOT, Control::ChangeThreads.encode())
                                .map_err(StepError::from)?;
                            self.fabric
                                .broadcast(MasterId::ROOT, threads.to_le_bytes().to_vec())
                                .map_err(StepError::from)?;
                            self.config.threads = threads as usize;
                        }
                        _ => eprintln!("set_nb_threads: expected a positive thread count"),
                    }
                }
            }
            "export_json" | "export_ubjson" => {
                let Some(path) = tokens.next() else {
                    eprintln!("{command}: expected an output path");
                    return Ok(Flow::Continue);
                };
                let Some(master) = self.master.as_mut() else {
                    eprintln!("{command}: no simulation is alive; use init first");
                    return Ok(Flow::Continue);
                };
                let doc = master.order_export()?.ok_or_else(|| {
                    StepError::Protocol(ProtocolError::OrderDesync {
                        detail: "export returned no document on the root".into(),
                    })
                })?;
                let written = if command == "export_json" {
                    document::write_json(path, &doc)
                } else {
                    document::write_binary(path, &doc)
                };
                if let Err(e) = written {
                    eprintln!("{command}: {e}");
                }
            }
            "convert" => match (tokens.next(), tokens.next()) {
                (Some(input), Some(output)) => {
                    let converted = document::read_document(input)
                        .and_then(|doc| document::convert_document(&doc))
                        .and_then(|file| document::write_population(output, &file));
                    if let Err(e) = converted {
                        eprintln!("convert: {e}");
                    }
                }
                _ => eprintln!("convert: expected input and output paths"),
            },
            "quit" | "exit" => {
                if self.master.is_some() {
                    self.kill_master()?;
                }
                self.fabric
                    .broadcast(MasterId::ROOT, Control::Exit.encode())
                    .map_err(StepError::from)?;
                return Ok(Flow::Exit);
            }
            unknown => eprintln!("unknown command '{unknown}'"),
        }
        Ok(Flow::Continue)
    }

    fn kill_master(&mut self) -> Result<(), ControlError> {
        if let Some(mut master) = self.master.take() {
            master.order_kill()?;
        }
        self.run_latch = false;
        Ok(())
    }
}

/// Non-root process loop: wait for outer controls, standing a master up
/// on `Init` and serving its orders until the simulation dies.
pub fn peer_main(mut config: MasterConfig, fabric: Arc<dyn Fabric>) -> Result<(), ControlError> {
    debug_assert!(!fabric.master_id().is_root(), "the root runs a ControlSession");
    loop {
        let payload = fabric
            .broadcast(MasterId::ROOT, Vec::new())
            .map_err(StepError::from)?;
        match Control::decode(&payload).map_err(StepError::from)? {
            Control::Init => {
                let mut master =
                    Master::init(config.clone(), Arc::clone(&fabric), Vec::new())?;
                master.wait_orders()?;
            }
            Control::ChangeThreads => {
                let payload = fabric
                    .broadcast(MasterId::ROOT, Vec::new())
                    .map_err(StepError::from)?;
                let bytes: [u8; 8] = payload.as_slice().try_into().map_err(|_| {
                    StepError::Protocol(ProtocolError::OrderDesync {
                        detail: format!("thread-count payload of {} bytes", payload.len()),
                    })
                })?;
                config.threads = u64::from_le_bytes(bytes) as usize;
            }
            Control::Exit => return Ok(()),
        }
    }
}
