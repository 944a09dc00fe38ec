//! # Hivecell: Recursive Cognitive-Cell Runtime
//!
//! Hivecell executes open-ended natural-language requests through a
//! simulated corporate hierarchy of cognitive agents ("cells"). Every cell
//! runs the same seven-phase cycle — Intake → Assess → Plan → Execute ⇄
//! Monitor → Heal → Package — parameterised by its rank, so senior cells
//! delegate subtask DAGs to children while junior cells execute tools.
//!
//! ## Core Concepts
//!
//! - **Envelope**: the universal I/O contract between cells and callers
//! - **Cell**: one instance of the recursive cognitive unit
//! - **Budget**: token allowance carved down the hierarchy, governed by
//!   advisory admission checks
//! - **Bus**: typed inter-cell channels with per-channel delivery classes
//! - **Error journal**: per-cell remediation record feeding the
//!   self-healing loop and its cascade detector
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hivecell::config::KernelConfig;
//! use hivecell::runtime::CellRuntime;
//! use hivecell::utils::testing::{request_envelope, stub_collaborators};
//!
//! # async fn example() {
//! let runtime = CellRuntime::new(KernelConfig::default(), stub_collaborators(7));
//! let reply = runtime
//!     .process(request_envelope("Define the term 'photosynthesis'.", 5_000, 0))
//!     .await;
//! assert!(reply.stdout.is_some());
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`envelope`] / [`artifact`] - the I/O contract and its payload
//! - [`cycle`] - the seven-phase cognitive cycle
//! - [`memory`] - per-cell working memory and stagnation signals
//! - [`journal`] - the error journal state machine
//! - [`budget`] - token budgets and the resource governor
//! - [`bus`] - typed inter-cell messaging
//! - [`heal`] - convergence detection, cascade admission, fix patterns
//! - [`runtime`] - the recursive cell runtime and delegation protocol
//! - [`trace`] - structured observer events
//! - [`collaborators`] - interfaces to the external services
//!
//! External collaborators (tool host, knowledge, vault, inference) are
//! trait objects passed in at spawn; [`utils::testing`] ships
//! deterministic stubs for all four.

pub mod artifact;
pub mod budget;
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod cycle;
pub mod envelope;
pub mod heal;
pub mod journal;
pub mod memory;
pub mod roles;
pub mod runtime;
pub mod trace;
pub mod types;
pub mod utils;
