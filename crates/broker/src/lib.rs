//! Interactive permission broker — gates every tool invocation a running
//! agent attempts.
//!
//! A tool call either resolves immediately against an installed
//! [`rule::PermissionRule`], or blocks on a one-shot completion signal
//! until a human decides, a newly installed rule subsumes it, it is
//! cancelled, or it times out. Installing a rule auto-resolves every
//! pending request it matches in the same session.

pub mod broker;
pub mod events;
pub mod rule;

pub use broker::{PendingInfo, PermissionBroker, PermissionOutcome, RememberScope, RespondOutcome};
pub use events::{BrokerEvent, BrokerEvents, NoopEvents};
pub use rule::{PermissionRule, RuleScope};
