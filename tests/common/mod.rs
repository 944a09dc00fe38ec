//! Shared fixtures for the integration suite.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use hivecell::budget::{Governor, TokenBudget};
use hivecell::bus::{BusEndpoint, CellBus};
use hivecell::collaborators::Collaborators;
use hivecell::config::KernelConfig;
use hivecell::cycle::{CellCtx, StepPlan};
use hivecell::envelope::Envelope;
use hivecell::roles::RoleDirectory;
use hivecell::runtime::CellRuntime;
use hivecell::trace::{MemoryTraceSink, TraceEmitter};
use hivecell::types::{CellId, CellIdentity, CellLevel, Complexity, ProcessingMode, TraceId};
use hivecell::utils::id_generator::IdGenerator;

pub use hivecell::utils::testing::*;

/// Runtime plus a memory sink capturing its trace stream.
pub fn traced_runtime(
    config: KernelConfig,
    collaborators: Collaborators,
) -> (Arc<CellRuntime>, Arc<MemoryTraceSink>) {
    let sink = MemoryTraceSink::new();
    let runtime = CellRuntime::with_trace_sinks(config, collaborators, vec![Box::new(sink.clone())]);
    (runtime, sink)
}

/// A standalone cell context for driving individual phases in tests.
///
/// The cell is manager-ranked so the healing loop gets its full iteration
/// allowance, and it is pre-registered on a fresh bus.
pub fn bare_ctx(
    collaborators: Collaborators,
    envelope: Envelope,
    config: KernelConfig,
) -> CellCtx {
    let config = Arc::new(config);
    let bus = Arc::new(CellBus::new(config.bus.clone()));
    let ids = Arc::new(IdGenerator::new());
    let cell_id = CellId::new(ids.next_id("cell"));
    bus.register(&cell_id);

    let budget = TokenBudget::root(
        envelope.constraints.token_budget,
        envelope.constraints.max_delegation_depth,
    );
    let governor = Governor::new(
        budget,
        config.execution.safety_floor,
        config.delegation.per_child_minimum,
        config.healing.min_reserve_floor,
        config.healing.min_reserve_ratio,
        config.healing.enabled,
        envelope.authority.can_delegate,
    );
    let endpoint = BusEndpoint::new(
        bus,
        cell_id.clone(),
        None,
        TraceId::new(ids.run_id()),
        ids.clone(),
    );
    let (_cancel_tx, cancel) = watch::channel(false);
    // The sender is dropped here; receivers treat a vanished sender as
    // "never cancelled", which is what bare contexts want.

    let focus = envelope.instruction.text.clone();
    CellCtx {
        identity: CellIdentity {
            cell_id,
            level: CellLevel::Manager,
            role: "generalist".to_string(),
            domain: "general".to_string(),
        },
        envelope,
        memory: hivecell::memory::WorkingMemory::new(focus),
        governor,
        collaborators,
        endpoint,
        config,
        roles: Arc::new(RoleDirectory::builtin()),
        trace: TraceEmitter::disconnected(),
        ids,
        cancel,
        started: Instant::now(),
        complexity: Complexity::Simple,
        mode: ProcessingMode::Solo,
        plan: StepPlan::default(),
        replans: 0,
        artifacts: Vec::new(),
        catalogue: Vec::new(),
    }
}
