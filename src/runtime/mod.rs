//! The cell runtime: recursive entry point, cancellation scopes, and the
//! shared worker pool.
//!
//! Recursion is logical, not stack-based: children run as independent
//! tokio tasks awaited through structured concurrency, so call depth is
//! bounded by `max_delegation_depth` regardless of host stack. Shared
//! services (collaborators, bus, trace stream, id generator) live here and
//! are handed to each cell at spawn; nothing is module-global.

pub mod cell;
pub mod delegate;
pub mod healing;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{Semaphore, watch};
use tokio::time::{Duration, Instant};

use crate::budget::{Governor, TokenBudget};
use crate::bus::{BusEndpoint, CellBus};
use crate::collaborators::Collaborators;
use crate::config::KernelConfig;
use crate::cycle::{CellCtx, StepPlan};
use crate::envelope::{Envelope, StderrEntry, StderrKind, StdoutPayload};
use crate::roles::RoleDirectory;
use crate::trace::{TraceBus, TraceEmitter, TraceEvent, TraceSink};
use crate::types::{
    CellId, CellIdentity, CellLevel, Complexity, ProcessingMode, TraceId,
};
use crate::utils::id_generator::IdGenerator;

/// Cancellation scope a cell owns for its children.
///
/// The parent's own cancellation propagates transitively: a forwarder task
/// mirrors the parent signal into this scope's channel, and the cell can
/// additionally cancel its subtree explicitly (timeouts, budget pulls).
#[derive(Debug)]
pub struct CancelScope {
    tx: watch::Sender<bool>,
}

impl CancelScope {
    /// Create a scope derived from a parent signal.
    pub fn derived(parent: watch::Receiver<bool>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(*parent.borrow());
        let forward_tx = tx.clone();
        let mut parent = parent;
        tokio::spawn(async move {
            loop {
                if *parent.borrow() {
                    let _ = forward_tx.send(true);
                    return;
                }
                if parent.changed().await.is_err() {
                    return;
                }
            }
        });
        let scope = Self { tx };
        (scope, rx)
    }

    /// Root scope with no parent.
    pub fn root() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    /// Cancel every receiver derived from this scope.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Everything needed to bring one cell to life.
#[derive(Debug)]
pub struct SpawnSpec {
    pub envelope: Envelope,
    pub budget: TokenBudget,
    pub parent: Option<CellId>,
    /// Pre-minted id, so a supervising parent can address the child before
    /// it finishes. Minted fresh when absent.
    pub cell_id: Option<CellId>,
    /// Role name; resolved through the directory (defaults by intent).
    pub role: Option<String>,
    pub level: Option<CellLevel>,
    pub trace_id: TraceId,
    pub cancel: watch::Receiver<bool>,
}

/// The process-wide runtime that owns shared services and spawns cells.
pub struct CellRuntime {
    config: Arc<KernelConfig>,
    collaborators: Collaborators,
    bus: Arc<CellBus>,
    trace: TraceEmitter,
    roles: Arc<RoleDirectory>,
    ids: Arc<IdGenerator>,
    workers: Arc<Semaphore>,
}

impl std::fmt::Debug for CellRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellRuntime").finish_non_exhaustive()
    }
}

impl CellRuntime {
    /// Build a runtime with default trace sinks (tracing log output).
    #[must_use]
    pub fn new(config: KernelConfig, collaborators: Collaborators) -> Arc<Self> {
        Self::with_trace_sinks(config, collaborators, Vec::new())
    }

    /// Build a runtime with additional trace sinks.
    #[must_use]
    pub fn with_trace_sinks(
        config: KernelConfig,
        collaborators: Collaborators,
        extra_sinks: Vec<Box<dyn TraceSink>>,
    ) -> Arc<Self> {
        let mut sinks: Vec<Box<dyn TraceSink>> =
            vec![Box::new(crate::trace::LogTraceSink)];
        sinks.extend(extra_sinks);
        let trace_bus = TraceBus::with_sinks(sinks);
        trace_bus.listen();
        let trace = trace_bus.emitter();

        let workers = Arc::new(Semaphore::new(config.worker_pool_size()));
        Arc::new(Self {
            bus: Arc::new(CellBus::new(config.bus.clone())),
            roles: Arc::new(RoleDirectory::builtin()),
            ids: Arc::new(IdGenerator::new()),
            collaborators,
            trace,
            workers,
            config: Arc::new(config),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Arc<KernelConfig> {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> &Arc<CellBus> {
        &self.bus
    }

    #[must_use]
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    #[must_use]
    pub fn workers(&self) -> &Arc<Semaphore> {
        &self.workers
    }

    /// Process one envelope through a fresh root cell.
    ///
    /// Invalid envelopes are rejected with an `invalid_envelope` failure and
    /// no side effect. This is the kernel's public entry point.
    pub async fn process(self: Arc<Self>, envelope: Envelope) -> Envelope {
        let (_scope, cancel) = CancelScope::root();
        self.process_with_cancel(envelope, cancel).await
    }

    /// Process one envelope under an external cancellation signal.
    pub async fn process_with_cancel(
        self: Arc<Self>,
        envelope: Envelope,
        cancel: watch::Receiver<bool>,
    ) -> Envelope {
        if let Err(error) = envelope.validate() {
            let mut reply = envelope.clone();
            reply.stdout = Some(StdoutPayload::default());
            reply.stderr.fail(StderrEntry::new(
                StderrKind::InvalidEnvelope,
                error.to_string(),
            ));
            return reply;
        }
        let budget = TokenBudget::root(
            envelope.constraints.token_budget,
            envelope.constraints.max_delegation_depth,
        );
        let trace_id = TraceId::new(self.ids.run_id());
        let spec = SpawnSpec {
            envelope,
            budget,
            parent: None,
            cell_id: None,
            role: None,
            level: None,
            trace_id,
            cancel,
        };
        self.run_cell(spec).await
    }

    /// Bring one cell to life and run it to its terminal envelope.
    ///
    /// Boxed so the delegation recursion ties the knot through spawned
    /// tasks instead of an infinitely nested future type.
    pub fn run_cell(self: Arc<Self>, spec: SpawnSpec) -> BoxFuture<'static, Envelope> {
        Box::pin(async move {
            let SpawnSpec {
                envelope,
                budget,
                parent,
                cell_id,
                role,
                level,
                trace_id,
                cancel,
            } = spec;

            let cell_id = cell_id.unwrap_or_else(|| CellId::new(self.ids.next_id("cell")));
            let level = level.unwrap_or_else(|| level_for_depth(budget.depth, budget.max_depth));
            let role = role.unwrap_or_else(|| {
                self.roles
                    .for_intent(envelope.instruction.intent)
                    .name
                    .clone()
            });
            let domain = envelope
                .context
                .domain_hints
                .first()
                .cloned()
                .unwrap_or_else(|| "general".to_string());
            let identity = CellIdentity {
                cell_id: cell_id.clone(),
                level,
                role: role.clone(),
                domain,
            };

            self.bus.register(&cell_id);
            self.trace.emit(TraceEvent::CellSpawned {
                trace_id: trace_id.clone(),
                cell_id: cell_id.clone(),
                level,
                role,
            });

            let deadline = envelope
                .constraints
                .deadline_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms));
            let governor = Governor::new(
                budget,
                self.config.execution.safety_floor,
                self.config.delegation.per_child_minimum,
                self.config.healing.min_reserve_floor,
                self.config.healing.min_reserve_ratio,
                self.config.healing.enabled,
                envelope.authority.can_delegate,
            )
            .with_deadline(deadline);

            let endpoint = BusEndpoint::new(
                self.bus.clone(),
                cell_id.clone(),
                parent,
                trace_id.clone(),
                self.ids.clone(),
            );

            let focus = envelope.instruction.text.clone();
            let ctx = CellCtx {
                identity,
                envelope: envelope.clone(),
                memory: crate::memory::WorkingMemory::new(focus),
                governor,
                collaborators: self.collaborators.clone(),
                endpoint,
                config: self.config.clone(),
                roles: self.roles.clone(),
                trace: self.trace.clone(),
                ids: self.ids.clone(),
                cancel: cancel.clone(),
                started: Instant::now(),
                complexity: Complexity::Simple,
                mode: ProcessingMode::Solo,
                plan: StepPlan::default(),
                replans: 0,
                artifacts: Vec::new(),
                catalogue: Vec::new(),
            };

            let wind_down = Duration::from_millis(self.config.execution.wind_down_ms);
            let runtime = self.clone();
            let drive = cell::drive(runtime, ctx);
            tokio::pin!(drive);

            let mut forced_cancel = cancel.clone();
            let reply = tokio::select! {
                reply = &mut drive => reply,
                () = forced_wind_down(&mut forced_cancel, wind_down) => {
                    // Wind-down expired before the cell packaged its own
                    // partial envelope; emit the forced terminal form.
                    let mut reply = envelope.reply();
                    reply.stdout = Some(StdoutPayload::default());
                    reply.stderr.fail(StderrEntry::new(
                        StderrKind::Cancelled,
                        "cancelled; wind-down window expired",
                    ));
                    reply
                }
            };

            self.bus.deregister(&cell_id);
            self.trace.emit(TraceEvent::CellTerminated {
                trace_id,
                cell_id,
                tokens_used: reply
                    .metadata
                    .as_ref()
                    .map(|m| m.tokens_used)
                    .unwrap_or_default(),
                confidence: reply
                    .metadata
                    .as_ref()
                    .map(|m| m.confidence)
                    .unwrap_or_default(),
                failures: reply.stderr.failures.len(),
            });
            reply
        })
    }
}

/// Wait for the cancel signal, then give the cell its wind-down window.
async fn forced_wind_down(cancel: &mut watch::Receiver<bool>, wind_down: Duration) {
    loop {
        if *cancel.borrow() {
            break;
        }
        if cancel.changed().await.is_err() {
            // Sender gone without cancelling: never force.
            futures_util::future::pending::<()>().await;
        }
    }
    tokio::time::sleep(wind_down).await;
}

/// Rank assigned by depth: deeper orgs start higher so the ladder has room.
#[must_use]
pub fn level_for_depth(depth: u32, max_depth: u32) -> CellLevel {
    let mut level = match max_depth {
        0 => CellLevel::Staff,
        1 => CellLevel::Manager,
        2 => CellLevel::Director,
        _ => CellLevel::Vp,
    };
    for _ in 0..depth {
        level = level.next_lower().unwrap_or(CellLevel::Intern);
    }
    level
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_zero_rank_scales_with_org_size() {
        assert_eq!(level_for_depth(0, 0), CellLevel::Staff);
        assert_eq!(level_for_depth(0, 3), CellLevel::Vp);
        assert_eq!(level_for_depth(2, 3), CellLevel::Manager);
        assert_eq!(level_for_depth(9, 3), CellLevel::Intern);
    }

    #[tokio::test]
    async fn cancel_scope_propagates_from_parent() {
        let (root, root_rx) = CancelScope::root();
        let (_child_scope, mut child_rx) = CancelScope::derived(root_rx);
        root.cancel();
        tokio::time::timeout(Duration::from_millis(200), async {
            while !*child_rx.borrow() {
                child_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("child scope saw parent cancellation");
    }
}
