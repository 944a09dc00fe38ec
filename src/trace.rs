//! Structured trace stream for observers.
//!
//! Cells and the bus emit [`TraceEvent`]s as they work; a [`TraceBus`]
//! fans them out to pluggable sinks from a background listener. Emission is
//! non-blocking: a full or disconnected stream never slows a cell down.
//! Every event carries the originating trace id so observers can correlate
//! activity across a delegation tree.

use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::types::{CellId, CellLevel, CellState, TraceId};

/// One observable moment in a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    CellSpawned {
        trace_id: TraceId,
        cell_id: CellId,
        level: CellLevel,
        role: String,
    },
    PhaseChanged {
        trace_id: TraceId,
        cell_id: CellId,
        state: CellState,
    },
    StepCompleted {
        trace_id: TraceId,
        cell_id: CellId,
        step: u64,
        outcome: String,
    },
    BusTraffic {
        trace_id: TraceId,
        from: CellId,
        to: CellId,
        channel: String,
    },
    HealIteration {
        trace_id: TraceId,
        cell_id: CellId,
        iteration: u32,
        unresolved: usize,
    },
    CellTerminated {
        trace_id: TraceId,
        cell_id: CellId,
        tokens_used: u64,
        confidence: f64,
        failures: usize,
    },
    Diagnostic {
        trace_id: TraceId,
        scope: String,
        message: String,
    },
}

impl TraceEvent {
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        match self {
            TraceEvent::CellSpawned { trace_id, .. }
            | TraceEvent::PhaseChanged { trace_id, .. }
            | TraceEvent::StepCompleted { trace_id, .. }
            | TraceEvent::BusTraffic { trace_id, .. }
            | TraceEvent::HealIteration { trace_id, .. }
            | TraceEvent::CellTerminated { trace_id, .. }
            | TraceEvent::Diagnostic { trace_id, .. } => trace_id,
        }
    }

    /// Normalised JSON form with a stamped timestamp.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        }
        value
    }
}

/// Consumer of trace events.
pub trait TraceSink: Send + Sync {
    fn on_event(&self, event: &TraceEvent);
}

/// Logs events through `tracing` at debug level.
#[derive(Debug, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn on_event(&self, event: &TraceEvent) {
        tracing::debug!(trace_id = %event.trace_id(), event = ?event, "trace");
    }
}

/// Buffers events in memory, for tests and post-run inspection.
#[derive(Debug, Default)]
pub struct MemoryTraceSink {
    events: parking_lot::Mutex<Vec<TraceEvent>>,
}

impl MemoryTraceSink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }
}

impl TraceSink for Arc<MemoryTraceSink> {
    fn on_event(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events into a flume channel, for streaming consumers.
#[derive(Debug)]
pub struct ChannelTraceSink {
    tx: flume::Sender<TraceEvent>,
}

impl ChannelTraceSink {
    #[must_use]
    pub fn new(tx: flume::Sender<TraceEvent>) -> Self {
        Self { tx }
    }
}

impl TraceSink for ChannelTraceSink {
    fn on_event(&self, event: &TraceEvent) {
        let _ = self.tx.try_send(event.clone());
    }
}

/// Cheap handle cells use to emit.
#[derive(Clone)]
pub struct TraceEmitter {
    tx: flume::Sender<TraceEvent>,
}

impl std::fmt::Debug for TraceEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceEmitter").finish_non_exhaustive()
    }
}

impl TraceEmitter {
    /// Emit without blocking; events are dropped if the stream is gone.
    pub fn emit(&self, event: TraceEvent) {
        let _ = self.tx.try_send(event);
    }

    /// An emitter wired to nothing, for contexts without observability.
    #[must_use]
    pub fn disconnected() -> Self {
        let (tx, _rx) = flume::bounded(0);
        Self { tx }
    }
}

/// Fan-out hub between emitters and sinks.
pub struct TraceBus {
    tx: flume::Sender<TraceEvent>,
    rx: flume::Receiver<TraceEvent>,
    sinks: Arc<Vec<Box<dyn TraceSink>>>,
}

impl std::fmt::Debug for TraceBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBus")
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

/// Buffered events before the listener applies backpressure by dropping.
const TRACE_BUFFER: usize = 1024;

impl TraceBus {
    #[must_use]
    pub fn with_sinks(sinks: Vec<Box<dyn TraceSink>>) -> Self {
        let (tx, rx) = flume::bounded(TRACE_BUFFER);
        Self {
            tx,
            rx,
            sinks: Arc::new(sinks),
        }
    }

    #[must_use]
    pub fn emitter(&self) -> TraceEmitter {
        TraceEmitter {
            tx: self.tx.clone(),
        }
    }

    /// Start the background forwarding task. Safe to call once per bus.
    pub fn listen(&self) {
        let rx = self.rx.clone();
        let sinks = self.sinks.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv_async().await {
                for sink in sinks.iter() {
                    sink.on_event(&event);
                }
            }
        });
    }
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(LogTraceSink)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_memory_sink() {
        let sink = MemoryTraceSink::new();
        let bus = TraceBus::with_sinks(vec![Box::new(sink.clone())]);
        bus.listen();
        let emitter = bus.emitter();
        emitter.emit(TraceEvent::Diagnostic {
            trace_id: TraceId::from("t"),
            scope: "test".into(),
            message: "hello".into(),
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let events = sink.events();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn disconnected_emitter_never_blocks() {
        let emitter = TraceEmitter::disconnected();
        for _ in 0..100 {
            emitter.emit(TraceEvent::Diagnostic {
                trace_id: TraceId::from("t"),
                scope: "s".into(),
                message: "m".into(),
            });
        }
    }

    #[test]
    fn json_form_carries_event_tag() {
        let event = TraceEvent::StepCompleted {
            trace_id: TraceId::from("t"),
            cell_id: CellId::from("c"),
            step: 3,
            outcome: "ok".into(),
        };
        let value = event.to_json_value();
        assert_eq!(value["event"], "step_completed");
        assert_eq!(value["step"], 3);
        assert!(value["timestamp"].is_string());
    }
}
