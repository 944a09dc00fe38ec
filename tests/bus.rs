//! Bus delivery semantics: FIFO per sender/channel, drop-oldest under
//! load, backpressure on exactly-once channels, latest-wins redirects.

use std::sync::Arc;

use hivecell::bus::{
    BusEndpoint, BusError, BusMessage, BusPayload, CellBus, ChannelKind, Defect, DefectKind,
    SendOutcome,
};
use hivecell::config::BusConfig;
use hivecell::memory::Fact;
use hivecell::types::{CellId, MessageId, Severity, TraceId};
use hivecell::utils::id_generator::IdGenerator;

fn small_bus(capacity: usize, backpressure_ms: u64) -> Arc<CellBus> {
    Arc::new(CellBus::new(BusConfig {
        mailbox_capacity: capacity,
        backpressure_timeout_ms: backpressure_ms,
    }))
}

fn endpoint(bus: &Arc<CellBus>, cell: &str, parent: Option<&str>) -> BusEndpoint {
    BusEndpoint::new(
        bus.clone(),
        CellId::from(cell),
        parent.map(CellId::from),
        TraceId::from("trace"),
        Arc::new(IdGenerator::new()),
    )
}

#[tokio::test]
async fn progress_is_fifo_per_sender() {
    let bus = small_bus(64, 100);
    bus.register(&CellId::from("parent"));
    let child = endpoint(&bus, "child", Some("parent"));
    for n in 0..5 {
        child.progress("executing", format!("ping {n}")).await.unwrap();
    }
    let drained = bus.drain(&CellId::from("parent"), ChannelKind::Progress);
    let notes: Vec<String> = drained
        .into_iter()
        .map(|message| match message.payload {
            BusPayload::Progress { note, .. } => note,
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    assert_eq!(notes, vec!["ping 0", "ping 1", "ping 2", "ping 3", "ping 4"]);
}

#[tokio::test]
async fn lossy_overflow_drops_oldest_first() {
    let bus = small_bus(2, 100);
    bus.register(&CellId::from("parent"));
    let child = endpoint(&bus, "child", Some("parent"));
    for n in 0..4 {
        child.progress("executing", format!("ping {n}")).await.unwrap();
    }
    let drained = bus.drain(&CellId::from("parent"), ChannelKind::Progress);
    assert_eq!(drained.len(), 2);
    match &drained[0].payload {
        BusPayload::Progress { note, .. } => assert_eq!(note, "ping 2"),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn exactly_once_backpressures_instead_of_dropping() {
    let bus = small_bus(1, 30);
    bus.register(&CellId::from("child"));
    let parent = endpoint(&bus, "parent", None);

    let defect = |note: &str| {
        vec![Defect {
            kind: DefectKind::Gaps,
            note: note.to_string(),
        }]
    };
    parent
        .feedback(&CellId::from("child"), None, defect("first"))
        .await
        .unwrap();
    let second = parent
        .feedback(&CellId::from("child"), None, defect("second"))
        .await;
    match second {
        Err(BusError::Backpressure { channel, .. }) => {
            assert_eq!(channel, ChannelKind::Feedback);
        }
        other => panic!("expected backpressure, got {other:?}"),
    }
    // The first message is still queued, untouched.
    let drained = bus.drain(&CellId::from("child"), ChannelKind::Feedback);
    assert_eq!(drained.len(), 1);
}

#[tokio::test]
async fn redirect_is_idempotent_latest_wins() {
    let bus = small_bus(16, 100);
    bus.register(&CellId::from("child"));
    let parent = endpoint(&bus, "parent", None);
    for n in 0..3 {
        let outcome = parent
            .redirect(&CellId::from("child"), Some(format!("focus {n}")), "shift")
            .await
            .unwrap();
        if n > 0 {
            assert_eq!(outcome, SendOutcome::Replaced);
        }
    }
    let drained = bus.drain(&CellId::from("child"), ChannelKind::Redirect);
    assert_eq!(drained.len(), 1);
    match &drained[0].payload {
        BusPayload::Redirect { focus, .. } => assert_eq!(focus.as_deref(), Some("focus 2")),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn messages_carry_the_trace_id() {
    let bus = small_bus(16, 100);
    bus.register(&CellId::from("parent"));
    let child = endpoint(&bus, "child", Some("parent"));
    child
        .insight(Fact::new("surprising result", 0.95, "test"))
        .await
        .unwrap();
    let message = bus
        .try_recv(&CellId::from("parent"), ChannelKind::Insight)
        .unwrap();
    assert_eq!(message.trace_id.as_str(), "trace");
    assert_eq!(message.channel(), ChannelKind::Insight);
}

#[tokio::test]
async fn escalate_acknowledgement_round_trip() {
    let bus = small_bus(16, 100);
    bus.register(&CellId::from("parent"));
    let child = endpoint(&bus, "child", Some("parent"));

    let ack_rx = child.escalate("stuck on access", Severity::High).await.unwrap();
    let message = bus
        .try_recv(&CellId::from("parent"), ChannelKind::Escalate)
        .unwrap();
    match message.payload {
        BusPayload::Escalate { reason, ack, .. } => {
            assert_eq!(reason, "stuck on access");
            ack.send(()).unwrap();
        }
        other => panic!("unexpected payload {other:?}"),
    }
    ack_rx.await.unwrap();
}

#[tokio::test]
async fn deregistered_cells_are_unknown_recipients() {
    let bus = small_bus(16, 100);
    bus.register(&CellId::from("parent"));
    bus.deregister(&CellId::from("parent"));
    let child = endpoint(&bus, "child", Some("parent"));
    assert!(matches!(
        child.blocked("anyone there?").await,
        Err(BusError::UnknownRecipient { .. })
    ));
}

#[tokio::test]
async fn raw_send_respects_payload_channel() {
    let bus = small_bus(16, 100);
    bus.register(&CellId::from("peer"));
    let message = BusMessage::new(
        MessageId::from("m-1"),
        TraceId::from("trace"),
        CellId::from("origin"),
        CellId::from("peer"),
        BusPayload::Share {
            fact: Fact::new("lateral fact", 0.8, "origin"),
        },
    );
    bus.send(message).await.unwrap();
    assert!(bus.try_recv(&CellId::from("peer"), ChannelKind::Share).is_some());
    assert!(bus.try_recv(&CellId::from("peer"), ChannelKind::Insight).is_none());
}
