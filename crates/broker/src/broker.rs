//! Permission broker — per-session queues of pending tool-use requests.
//!
//! Every pending request owns a `oneshot::Sender`; whoever decides it
//! (human response, rule auto-resolution, cancellation, timeout) sends
//! exactly once. Sending and removal from the pending map happen under
//! the same lock, so a decided request is never visible as pending and
//! a blocked caller is woken exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use ah_domain::config::BrokerConfig;
use ah_domain::store::{NewRule, RuleDecision, Store};
use ah_domain::{Error, Result};

use crate::events::{BrokerEvent, BrokerEvents};
use crate::rule::{PermissionRule, RuleScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminal outcome delivered to a blocked tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionOutcome {
    Allow { updated_input: serde_json::Value },
    Deny { message: String },
}

impl PermissionOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PermissionOutcome::Allow { .. })
    }

    /// Convert a denial into the error an agent runtime propagates; the
    /// allowed side yields the (possibly updated) tool input.
    pub fn into_result(self) -> Result<serde_json::Value> {
        match self {
            PermissionOutcome::Allow { updated_input } => Ok(updated_input),
            PermissionOutcome::Deny { message } => Err(Error::PermissionDenied(message)),
        }
    }

    fn from_rule(rule: &PermissionRule, tool_input: &serde_json::Value, reason: &str) -> Self {
        match rule.decision {
            RuleDecision::Allow => PermissionOutcome::Allow {
                updated_input: tool_input.clone(),
            },
            RuleDecision::Deny => PermissionOutcome::Deny {
                message: reason.to_owned(),
            },
        }
    }
}

/// Where a remembered decision applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RememberScope {
    None,
    Session,
    Profile,
    Global,
}

/// Serializable summary of one pending request.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub request_id: String,
    pub tool_name: String,
    pub tool_input: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// What `respond` reports back to the responder.
#[derive(Debug, Clone, Serialize)]
pub struct RespondOutcome {
    pub resolved: bool,
    pub auto_resolved_ids: Vec<String>,
}

struct PendingRequest {
    id: String,
    profile_id: String,
    tool_name: String,
    tool_input: serde_json::Value,
    created_at: DateTime<Utc>,
    respond: oneshot::Sender<PermissionOutcome>,
}

impl PendingRequest {
    fn info(&self) -> PendingInfo {
        PendingInfo {
            request_id: self.id.clone(),
            tool_name: self.tool_name.clone(),
            tool_input: self.tool_input.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    /// session_id -> request_id -> pending request.
    pending: HashMap<String, HashMap<String, PendingRequest>>,
    /// In-memory session rules, dropped when the session ends.
    session_rules: HashMap<String, Vec<PermissionRule>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PermissionBroker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PermissionBroker {
    state: Mutex<BrokerState>,
    store: Arc<dyn Store>,
    decision_timeout: Duration,
}

impl PermissionBroker {
    pub fn new(store: Arc<dyn Store>, config: &BrokerConfig) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            store,
            decision_timeout: Duration::from_secs(config.decision_timeout_secs),
        }
    }

    pub fn decision_timeout(&self) -> Duration {
        self.decision_timeout
    }

    /// Ask permission for one tool invocation. Blocks the caller.
    ///
    /// Resolves immediately when an installed rule matches; otherwise
    /// the request is queued, broadcast, and the caller suspends until a
    /// decision arrives or `decision_timeout` elapses.
    pub async fn request(
        &self,
        request_id: &str,
        session_id: &str,
        profile_id: &str,
        tool_name: &str,
        tool_input: serde_json::Value,
        events: &dyn BrokerEvents,
    ) -> PermissionOutcome {
        if let Some(rule) = self.find_rule(session_id, profile_id, tool_name, &tool_input) {
            tracing::info!(
                tool_name,
                rule_id = %rule.id,
                decision = ?rule.decision,
                "permission resolved by saved rule"
            );
            return PermissionOutcome::from_rule(&rule, &tool_input, "Denied by saved rule");
        }

        let (tx, mut rx) = oneshot::channel();
        let queue_total = {
            let mut state = self.state.lock();
            let session = state.pending.entry(session_id.to_owned()).or_default();
            session.insert(
                request_id.to_owned(),
                PendingRequest {
                    id: request_id.to_owned(),
                    profile_id: profile_id.to_owned(),
                    tool_name: tool_name.to_owned(),
                    tool_input: tool_input.clone(),
                    created_at: Utc::now(),
                    respond: tx,
                },
            );
            session.len()
        };

        // Notify the frontend before suspending on the signal.
        publish(
            events,
            BrokerEvent::PermissionRequest {
                request_id: request_id.to_owned(),
                session_id: session_id.to_owned(),
                tool_name: tool_name.to_owned(),
                tool_input,
                queue_position: queue_total,
                queue_total,
            },
        );
        tracing::info!(request_id, session_id, tool_name, "permission request queued");

        match tokio::time::timeout(self.decision_timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => PermissionOutcome::Deny {
                message: "No response received".into(),
            },
            Err(_) => {
                // Timed out — evict the entry, unless a decision landed
                // between the deadline and this lock (sends happen under
                // the lock before removal, so an absent entry means the
                // channel holds the decision).
                let evicted = {
                    let mut state = self.state.lock();
                    state
                        .pending
                        .get_mut(session_id)
                        .and_then(|session| session.remove(request_id))
                };
                match evicted {
                    Some(_) => {
                        tracing::warn!(request_id, session_id, "permission request timed out");
                        PermissionOutcome::Deny {
                            message: "Permission request timed out".into(),
                        }
                    }
                    None => rx.try_recv().unwrap_or(PermissionOutcome::Deny {
                        message: "No response received".into(),
                    }),
                }
            }
        }
    }

    /// Deliver a human decision to exactly one pending request.
    ///
    /// With `remember` ≠ `None` a rule is installed at the requested
    /// scope and every still-pending request it covers in this session
    /// is auto-resolved before this method returns.
    pub fn respond(
        &self,
        request_id: &str,
        session_id: &str,
        decision: RuleDecision,
        remember: RememberScope,
        pattern: Option<String>,
        events: &dyn BrokerEvents,
    ) -> Result<RespondOutcome> {
        let (auto_resolved_ids, remaining) = {
            let mut state = self.state.lock();
            let session = state
                .pending
                .get_mut(session_id)
                .ok_or_else(|| Error::Other(format!("session not found: {session_id}")))?;
            let request = session
                .remove(request_id)
                .ok_or_else(|| Error::Other(format!("permission request not found: {request_id}")))?;

            let outcome = match decision {
                RuleDecision::Allow => PermissionOutcome::Allow {
                    updated_input: request.tool_input.clone(),
                },
                RuleDecision::Deny => PermissionOutcome::Deny {
                    message: "User denied permission".into(),
                },
            };
            // First (and only) setter for this request.
            let _ = request.respond.send(outcome);

            if remember == RememberScope::None {
                (Vec::new(), 0)
            } else {
                let rule = self.install_rule(
                    &mut state,
                    session_id,
                    &request.profile_id,
                    &request.tool_name,
                    pattern,
                    decision,
                    remember,
                );
                let resolved = resolve_matching(&mut state, session_id, &rule);
                let remaining = state
                    .pending
                    .get(session_id)
                    .map(HashMap::len)
                    .unwrap_or(0);
                (resolved, remaining)
            }
        };

        if !auto_resolved_ids.is_empty() {
            publish(
                events,
                BrokerEvent::PermissionQueueUpdate {
                    session_id: session_id.to_owned(),
                    resolved_ids: auto_resolved_ids.clone(),
                    remaining_count: remaining,
                },
            );
        }

        Ok(RespondOutcome {
            resolved: true,
            auto_resolved_ids,
        })
    }

    /// Cancel one pending request; its caller wakes with a denial.
    pub fn cancel(&self, request_id: &str, session_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(request) = state
            .pending
            .get_mut(session_id)
            .and_then(|session| session.remove(request_id))
        else {
            return false;
        };
        let _ = request.respond.send(PermissionOutcome::Deny {
            message: "Request cancelled".into(),
        });
        tracing::info!(request_id, session_id, "permission request cancelled");
        true
    }

    /// Drain every pending request of a session. Returns the count.
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let mut state = self.state.lock();
        let Some(session) = state.pending.remove(session_id) else {
            return 0;
        };
        let count = session.len();
        for (_, request) in session {
            let _ = request.respond.send(PermissionOutcome::Deny {
                message: "Session cancelled".into(),
            });
        }
        if count > 0 {
            tracing::info!(session_id, count, "cancelled all pending permission requests");
        }
        count
    }

    /// Pending requests for a session, oldest first.
    pub fn pending(&self, session_id: &str) -> Vec<PendingInfo> {
        let state = self.state.lock();
        let mut infos: Vec<PendingInfo> = state
            .pending
            .get(session_id)
            .map(|session| session.values().map(PendingRequest::info).collect())
            .unwrap_or_default();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Number of pending requests for a session.
    pub fn pending_count(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .pending
            .get(session_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// In-memory rules installed for a session.
    pub fn rules(&self, session_id: &str) -> Vec<PermissionRule> {
        self.state
            .lock()
            .session_rules
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Session-end cleanup of in-memory rules.
    pub fn clear_session_rules(&self, session_id: &str) {
        self.state.lock().session_rules.remove(session_id);
    }

    // ── Private ──────────────────────────────────────────────────────

    /// First matching rule, session scope first, then profile, then
    /// global; within a scope the most recently installed rule wins.
    fn find_rule(
        &self,
        session_id: &str,
        profile_id: &str,
        tool_name: &str,
        tool_input: &serde_json::Value,
    ) -> Option<PermissionRule> {
        {
            let state = self.state.lock();
            if let Some(rules) = state.session_rules.get(session_id) {
                if let Some(rule) = rules
                    .iter()
                    .rev()
                    .find(|rule| rule.matches(tool_name, tool_input))
                {
                    return Some(rule.clone());
                }
            }
        }

        // Store scopes are read outside the pending lock; a broken store
        // degrades to in-memory rules only.
        let profile_rules = self.store.get_profile_rules(profile_id).unwrap_or_else(|e| {
            tracing::warn!(profile_id, error = %e, "profile rule read failed");
            Vec::new()
        });
        if let Some(rule) = profile_rules
            .into_iter()
            .map(PermissionRule::from)
            .rev()
            .find(|rule| rule.matches(tool_name, tool_input))
        {
            return Some(rule);
        }

        let global_rules = self.store.get_global_rules().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "global rule read failed");
            Vec::new()
        });
        global_rules
            .into_iter()
            .map(PermissionRule::from)
            .rev()
            .find(|rule| rule.matches(tool_name, tool_input))
    }

    /// Build and install a remembered rule at the requested scope.
    fn install_rule(
        &self,
        state: &mut BrokerState,
        session_id: &str,
        profile_id: &str,
        tool_name: &str,
        pattern: Option<String>,
        decision: RuleDecision,
        remember: RememberScope,
    ) -> PermissionRule {
        let scope = match remember {
            RememberScope::Session | RememberScope::None => {
                RuleScope::Session(session_id.to_owned())
            }
            RememberScope::Profile => RuleScope::Profile(profile_id.to_owned()),
            RememberScope::Global => RuleScope::Global,
        };

        let rule = PermissionRule {
            id: Uuid::new_v4().to_string(),
            scope: scope.clone(),
            tool_name: tool_name.to_owned(),
            tool_pattern: pattern,
            decision,
            created_at: Utc::now(),
        };

        match scope {
            RuleScope::Session(_) => {
                state
                    .session_rules
                    .entry(session_id.to_owned())
                    .or_default()
                    .push(rule.clone());
            }
            RuleScope::Profile(ref profile) => {
                self.persist_rule(&rule, Some(profile.clone()));
            }
            RuleScope::Global => {
                self.persist_rule(&rule, None);
            }
        }

        tracing::info!(
            rule_id = %rule.id,
            tool_name = %rule.tool_name,
            pattern = ?rule.tool_pattern,
            scope = ?remember,
            "installed permission rule"
        );
        rule
    }

    fn persist_rule(&self, rule: &PermissionRule, profile_id: Option<String>) {
        let new_rule = NewRule {
            profile_id,
            tool_name: rule.tool_name.clone(),
            tool_pattern: rule.tool_pattern.clone(),
            decision: rule.decision,
        };
        // The in-hand rule still auto-resolves this session even when
        // persistence fails; only future sessions lose it.
        if let Err(e) = self.store.add_rule(&new_rule) {
            tracing::warn!(error = %e, "failed to persist permission rule");
        }
    }
}

/// Decide every still-pending request in the session the rule covers.
/// Runs under the broker lock; returns the resolved ids.
fn resolve_matching(
    state: &mut BrokerState,
    session_id: &str,
    rule: &PermissionRule,
) -> Vec<String> {
    let Some(session) = state.pending.get_mut(session_id) else {
        return Vec::new();
    };

    let matching: Vec<String> = session
        .values()
        .filter(|request| rule_covers(rule, session_id, request))
        .map(|request| request.id.clone())
        .collect();

    let mut resolved = Vec::with_capacity(matching.len());
    for id in matching {
        if let Some(request) = session.remove(&id) {
            let outcome =
                PermissionOutcome::from_rule(rule, &request.tool_input, "Denied by rule");
            let _ = request.respond.send(outcome);
            tracing::info!(request_id = %id, tool_name = %request.tool_name, "auto-resolved by new rule");
            resolved.push(id);
        }
    }
    resolved
}

/// Scope check + pattern match for auto-resolution. A profile rule never
/// touches a request with a different profile; a session rule never
/// leaves its session.
fn rule_covers(rule: &PermissionRule, session_id: &str, request: &PendingRequest) -> bool {
    let in_scope = match &rule.scope {
        RuleScope::Session(scoped_session) => scoped_session == session_id,
        RuleScope::Profile(scoped_profile) => *scoped_profile == request.profile_id,
        RuleScope::Global => true,
    };
    in_scope && rule.matches(&request.tool_name, &request.tool_input)
}

fn publish(events: &dyn BrokerEvents, event: BrokerEvent) {
    if let Err(e) = events.publish(event) {
        tracing::warn!(error = %e, "broker event broadcast failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEvents;
    use ah_domain::store::MemoryStore;

    fn broker() -> PermissionBroker {
        PermissionBroker::new(Arc::new(MemoryStore::new()), &BrokerConfig::default())
    }

    fn broker_with_store(store: Arc<MemoryStore>) -> PermissionBroker {
        PermissionBroker::new(store, &BrokerConfig::default())
    }

    #[tokio::test]
    async fn profile_rule_resolves_immediately() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_rule(&NewRule {
                profile_id: Some("p1".into()),
                tool_name: "Bash".into(),
                tool_pattern: Some("npm *".into()),
                decision: RuleDecision::Allow,
            })
            .unwrap();
        let broker = broker_with_store(store);

        let outcome = broker
            .request(
                "r1",
                "s1",
                "p1",
                "Bash",
                serde_json::json!({"command": "npm install"}),
                &NoopEvents,
            )
            .await;
        assert!(outcome.is_allowed());
        assert_eq!(broker.pending_count("s1"), 0);
    }

    #[tokio::test]
    async fn global_deny_rule_applies_to_any_profile() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_rule(&NewRule {
                profile_id: None,
                tool_name: "*".into(),
                tool_pattern: None,
                decision: RuleDecision::Deny,
            })
            .unwrap();
        let broker = broker_with_store(store);

        let outcome = broker
            .request(
                "r1",
                "s1",
                "any-profile",
                "WebFetch",
                serde_json::json!({"url": "https://example.com"}),
                &NoopEvents,
            )
            .await;
        assert_eq!(
            outcome,
            PermissionOutcome::Deny {
                message: "Denied by saved rule".into()
            }
        );
    }

    #[tokio::test]
    async fn session_rule_wins_over_profile_rule() {
        let store = Arc::new(MemoryStore::new());
        store
            .add_rule(&NewRule {
                profile_id: Some("p1".into()),
                tool_name: "Bash".into(),
                tool_pattern: None,
                decision: RuleDecision::Deny,
            })
            .unwrap();
        let broker = broker_with_store(store);
        {
            let mut state = broker.state.lock();
            state.session_rules.insert(
                "s1".into(),
                vec![PermissionRule {
                    id: "session-allow".into(),
                    scope: RuleScope::Session("s1".into()),
                    tool_name: "Bash".into(),
                    tool_pattern: None,
                    decision: RuleDecision::Allow,
                    created_at: Utc::now(),
                }],
            );
        }

        let outcome = broker
            .request(
                "r1",
                "s1",
                "p1",
                "Bash",
                serde_json::json!({"command": "ls"}),
                &NoopEvents,
            )
            .await;
        assert!(outcome.is_allowed());
    }

    #[test]
    fn outcome_conversion_surfaces_denial_reason() {
        let allow = PermissionOutcome::Allow {
            updated_input: serde_json::json!({"command": "ls"}),
        };
        assert_eq!(
            allow.into_result().unwrap(),
            serde_json::json!({"command": "ls"})
        );

        let deny = PermissionOutcome::Deny {
            message: "Permission request timed out".into(),
        };
        match deny.into_result() {
            Err(Error::PermissionDenied(message)) => {
                assert_eq!(message, "Permission request timed out");
            }
            other => panic!("expected PermissionDenied, got {other:?}"),
        }
    }

    #[test]
    fn respond_unknown_request_errors() {
        let broker = broker();
        let err = broker
            .respond(
                "nope",
                "s1",
                RuleDecision::Allow,
                RememberScope::None,
                None,
                &NoopEvents,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn cancel_unknown_request_returns_false() {
        let broker = broker();
        assert!(!broker.cancel("nope", "s1"));
        assert_eq!(broker.cancel_session("s1"), 0);
    }

    #[test]
    fn clear_session_rules_drops_only_that_session() {
        let broker = broker();
        {
            let mut state = broker.state.lock();
            for session in ["s1", "s2"] {
                state.session_rules.insert(
                    session.into(),
                    vec![PermissionRule {
                        id: format!("rule-{session}"),
                        scope: RuleScope::Session(session.into()),
                        tool_name: "*".into(),
                        tool_pattern: None,
                        decision: RuleDecision::Allow,
                        created_at: Utc::now(),
                    }],
                );
            }
        }

        broker.clear_session_rules("s1");
        assert!(broker.rules("s1").is_empty());
        assert_eq!(broker.rules("s2").len(), 1);
    }

    #[tokio::test]
    async fn most_recent_session_rule_wins() {
        let broker = broker();
        {
            let mut state = broker.state.lock();
            let rules = state.session_rules.entry("s1".into()).or_default();
            rules.push(PermissionRule {
                id: "older".into(),
                scope: RuleScope::Session("s1".into()),
                tool_name: "Bash".into(),
                tool_pattern: None,
                decision: RuleDecision::Deny,
                created_at: Utc::now(),
            });
            rules.push(PermissionRule {
                id: "newer".into(),
                scope: RuleScope::Session("s1".into()),
                tool_name: "Bash".into(),
                tool_pattern: None,
                decision: RuleDecision::Allow,
                created_at: Utc::now(),
            });
        }

        let outcome = broker
            .request(
                "r1",
                "s1",
                "p1",
                "Bash",
                serde_json::json!({"command": "ls"}),
                &NoopEvents,
            )
            .await;
        assert!(outcome.is_allowed());
    }
}
