// tests/events.rs
// Structured events, including those from emit_system_event!, reach registered sinks. Kept to one test: the dispatcher is process-global.

mod common;

use async_trait::async_trait;
use common::{attempt, registry, wait_for_outcomes};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tlsfactory::emit_system_event;
use tlsfactory::events::{init_events, LogEvent, LogLevel, LogSink};
use tlsfactory::security::settings::SecurityConfiguration;
use tlsfactory::security::{ProbeConfig, SecurityConfigSpec};

#[derive(Default)]
struct MemorySink {
    events: Mutex<Vec<LogEvent>>,
}

#[async_trait]
impl LogSink for MemorySink {
    async fn handle(&self, event: &LogEvent) {
        self.events.lock().push(event.clone());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn endpoint_and_handshake_events_are_emitted() {
    let mem = Arc::new(MemorySink::default());
    init_events(vec![mem.clone() as Arc<dyn LogSink>], 64).await;

    emit_system_event!("driver", LogLevel::Info, "matrix_started", Some("rows=1".to_string()));

    let reg = registry();
    let cfg =
        SecurityConfiguration::from_spec(&SecurityConfigSpec::new(), &common::endpoint_settings())
            .unwrap();
    let (h, addr) = reg.create(cfg).await.unwrap();
    attempt(addr, &ProbeConfig::new()).await.unwrap();
    assert_eq!(wait_for_outcomes(&reg, h, 1).await.len(), 1);

    let mut seen_transient = false;
    let mut seen_accepting = false;
    let mut seen_handshake = false;
    let mut seen_system = false;
    for _ in 0..100 {
        {
            let events = mem.events.lock();
            let endpoint_states: Vec<(&str, Option<&str>)> = events
                .iter()
                .filter_map(|e| match e {
                    LogEvent::Endpoint(ep) if ep.handle == h.0 => {
                        Some((ep.action.as_str(), ep.state.as_deref()))
                    }
                    _ => None,
                })
                .collect();
            seen_transient = endpoint_states.starts_with(&[
                ("endpoint_created", Some("created")),
                ("endpoint_bound", Some("bound")),
            ]);
            seen_accepting = events.iter().any(|e| {
                matches!(e, LogEvent::Endpoint(ep) if ep.handle == h.0 && ep.action == "endpoint_accepting")
            });
            seen_handshake = events.iter().any(|e| {
                matches!(e, LogEvent::Handshake(hs) if hs.handle == h.0 && hs.seq == 1 && hs.result == "accepted")
            });
            seen_system = events.iter().any(|e| {
                matches!(e, LogEvent::System(s) if s.action == "matrix_started" && s.meta.component == "driver")
            });
        }
        if seen_transient && seen_accepting && seen_handshake && seen_system {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen_transient, "created/bound should precede the other endpoint events");
    assert!(seen_accepting, "missing endpoint_accepting event");
    assert!(seen_handshake, "missing handshake event");
    assert!(seen_system, "missing system event");
    reg.shutdown().await;
}
