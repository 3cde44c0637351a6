//! End-to-end broker scenarios: blocked callers, human decisions,
//! rule auto-resolution, cancellation and timeouts.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use ah_broker::{BrokerEvent, BrokerEvents, NoopEvents, PermissionBroker, PermissionOutcome, RememberScope};
use ah_domain::config::BrokerConfig;
use ah_domain::store::{MemoryStore, RuleDecision};
use ah_domain::Result;

// ── Helpers ─────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingEvents {
    events: Mutex<Vec<BrokerEvent>>,
}

impl BrokerEvents for RecordingEvents {
    fn publish(&self, event: BrokerEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

fn broker() -> Arc<PermissionBroker> {
    Arc::new(PermissionBroker::new(
        Arc::new(MemoryStore::new()),
        &BrokerConfig::default(),
    ))
}

fn spawn_request(
    broker: &Arc<PermissionBroker>,
    request_id: &str,
    session_id: &str,
    profile_id: &str,
    tool_name: &str,
    tool_input: serde_json::Value,
) -> JoinHandle<PermissionOutcome> {
    let broker = broker.clone();
    let request_id = request_id.to_owned();
    let session_id = session_id.to_owned();
    let profile_id = profile_id.to_owned();
    let tool_name = tool_name.to_owned();
    tokio::spawn(async move {
        broker
            .request(
                &request_id,
                &session_id,
                &profile_id,
                &tool_name,
                tool_input,
                &NoopEvents,
            )
            .await
    })
}

async fn wait_for_pending(broker: &PermissionBroker, session_id: &str, count: usize) {
    for _ in 0..200 {
        if broker.pending_count(session_id) == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "pending count for {session_id} never reached {count} (now {})",
        broker.pending_count(session_id)
    );
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn rule_install_auto_resolves_matching_requests() {
    let broker = broker();

    let first = spawn_request(
        &broker,
        "r1",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    let second = spawn_request(
        &broker,
        "r2",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "npm test"}),
    );
    let third = spawn_request(
        &broker,
        "r3",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "rm -rf /"}),
    );
    wait_for_pending(&broker, "s1", 3).await;

    let outcome = broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Allow,
            RememberScope::Session,
            Some("npm *".into()),
            &NoopEvents,
        )
        .unwrap();
    assert_eq!(outcome.auto_resolved_ids, vec!["r2".to_string()]);

    // The first two callers wake with Allow; the third still blocks.
    assert!(first.await.unwrap().is_allowed());
    assert!(second.await.unwrap().is_allowed());
    assert_eq!(broker.pending_count("s1"), 1);

    // Installed rule survives for follow-up requests in the session.
    let followup = broker
        .request(
            "r4",
            "s1",
            "p1",
            "Bash",
            serde_json::json!({"command": "npm run build"}),
            &NoopEvents,
        )
        .await;
    assert!(followup.is_allowed());

    // Drain the third cleanly.
    assert!(broker.cancel("r3", "s1"));
    assert_eq!(
        third.await.unwrap(),
        PermissionOutcome::Deny {
            message: "Request cancelled".into()
        }
    );
}

#[tokio::test]
async fn originator_receives_the_responded_decision_not_the_rule() {
    let broker = broker();
    let task = spawn_request(
        &broker,
        "r1",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    wait_for_pending(&broker, "s1", 1).await;

    // The remembered pattern also matches the originator, but the
    // originator gets the direct decision, not the rule's message.
    broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Deny,
            RememberScope::Session,
            Some("npm *".into()),
            &NoopEvents,
        )
        .unwrap();

    assert_eq!(
        task.await.unwrap(),
        PermissionOutcome::Deny {
            message: "User denied permission".into()
        }
    );
}

#[tokio::test]
async fn profile_rule_does_not_cross_profiles() {
    let broker = broker();
    let p_task = spawn_request(
        &broker,
        "r1",
        "s1",
        "profile-p",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    let q_task = spawn_request(
        &broker,
        "r2",
        "s1",
        "profile-q",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    wait_for_pending(&broker, "s1", 2).await;

    let outcome = broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Allow,
            RememberScope::Profile,
            Some("npm *".into()),
            &NoopEvents,
        )
        .unwrap();

    // The profile-scoped rule covers only profile-p requests; r2
    // belongs to profile-q and must stay pending.
    assert!(outcome.auto_resolved_ids.is_empty());
    assert!(p_task.await.unwrap().is_allowed());
    assert_eq!(broker.pending_count("s1"), 1);

    broker.cancel_session("s1");
    assert!(!q_task.await.unwrap().is_allowed());
}

#[tokio::test]
async fn session_rules_do_not_leak_across_sessions() {
    let broker = broker();
    let other = spawn_request(
        &broker,
        "r-other",
        "s2",
        "p1",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    let own = spawn_request(
        &broker,
        "r-own",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "npm install"}),
    );
    wait_for_pending(&broker, "s1", 1).await;
    wait_for_pending(&broker, "s2", 1).await;

    broker
        .respond(
            "r-own",
            "s1",
            RuleDecision::Allow,
            RememberScope::Session,
            Some("*".into()),
            &NoopEvents,
        )
        .unwrap();

    assert!(own.await.unwrap().is_allowed());
    // The session-scoped rule never reaches s2.
    assert_eq!(broker.pending_count("s2"), 1);
    assert_eq!(broker.cancel_session("s2"), 1);
    assert!(!other.await.unwrap().is_allowed());
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let broker = broker();
    let task = spawn_request(
        &broker,
        "r1",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "sleep 999"}),
    );

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(broker.pending_count("s1"), 1);

    // Jump past the 300 s decision timeout.
    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(
        task.await.unwrap(),
        PermissionOutcome::Deny {
            message: "Permission request timed out".into()
        }
    );
    assert!(broker.pending("s1").is_empty());
}

#[tokio::test]
async fn each_request_decided_exactly_once() {
    let broker = broker();
    let task = spawn_request(
        &broker,
        "r1",
        "s1",
        "p1",
        "Bash",
        serde_json::json!({"command": "ls"}),
    );
    wait_for_pending(&broker, "s1", 1).await;

    broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Allow,
            RememberScope::None,
            None,
            &NoopEvents,
        )
        .unwrap();

    // Later attempts to decide the same id find nothing.
    assert!(broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Deny,
            RememberScope::None,
            None,
            &NoopEvents
        )
        .is_err());
    assert!(!broker.cancel("r1", "s1"));

    assert!(task.await.unwrap().is_allowed());
}

#[tokio::test]
async fn cancel_session_wakes_every_waiter() {
    let broker = broker();
    let tasks: Vec<_> = (0..3)
        .map(|i| {
            spawn_request(
                &broker,
                &format!("r{i}"),
                "s1",
                "p1",
                "Bash",
                serde_json::json!({"command": format!("cmd-{i}")}),
            )
        })
        .collect();
    wait_for_pending(&broker, "s1", 3).await;

    assert_eq!(broker.cancel_session("s1"), 3);
    assert_eq!(broker.pending_count("s1"), 0);

    for task in tasks {
        assert_eq!(
            task.await.unwrap(),
            PermissionOutcome::Deny {
                message: "Session cancelled".into()
            }
        );
    }
}

#[tokio::test]
async fn broadcasts_cover_request_and_queue_update() {
    let broker = broker();
    let events = Arc::new(RecordingEvents::default());

    let request_events = events.clone();
    let b = broker.clone();
    let first = tokio::spawn(async move {
        b.request(
            "r1",
            "s1",
            "p1",
            "Bash",
            serde_json::json!({"command": "npm install"}),
            request_events.as_ref(),
        )
        .await
    });
    let request_events = events.clone();
    let b = broker.clone();
    let second = tokio::spawn(async move {
        b.request(
            "r2",
            "s1",
            "p1",
            "Bash",
            serde_json::json!({"command": "npm test"}),
            request_events.as_ref(),
        )
        .await
    });
    wait_for_pending(&broker, "s1", 2).await;

    {
        let recorded = events.events.lock();
        assert_eq!(recorded.len(), 2);
        assert!(recorded
            .iter()
            .all(|event| matches!(event, BrokerEvent::PermissionRequest { .. })));
    }

    broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Allow,
            RememberScope::Session,
            Some("npm *".into()),
            events.as_ref(),
        )
        .unwrap();
    assert!(first.await.unwrap().is_allowed());
    assert!(second.await.unwrap().is_allowed());

    let recorded = events.events.lock();
    match recorded.last().unwrap() {
        BrokerEvent::PermissionQueueUpdate {
            session_id,
            resolved_ids,
            remaining_count,
        } => {
            assert_eq!(session_id, "s1");
            assert_eq!(resolved_ids, &vec!["r2".to_string()]);
            assert_eq!(*remaining_count, 0);
        }
        other => panic!("expected queue update, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_failure_does_not_break_the_broker() {
    struct FailingEvents;
    impl BrokerEvents for FailingEvents {
        fn publish(&self, _event: BrokerEvent) -> Result<()> {
            Err(ah_domain::Error::Broadcast("socket gone".into()))
        }
    }

    let broker = broker();
    let b = broker.clone();
    let task = tokio::spawn(async move {
        b.request(
            "r1",
            "s1",
            "p1",
            "Bash",
            serde_json::json!({"command": "ls"}),
            &FailingEvents,
        )
        .await
    });
    wait_for_pending(&broker, "s1", 1).await;

    broker
        .respond(
            "r1",
            "s1",
            RuleDecision::Allow,
            RememberScope::None,
            None,
            &FailingEvents,
        )
        .unwrap();
    assert!(task.await.unwrap().is_allowed());
}
