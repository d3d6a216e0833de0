//! # asgctl
//!
//! Desired-state reconciliation for AWS Auto Scaling Groups.
//!
//! A JSON document describes the group you want; the engine converges the
//! live group on it and reports what changed. Creation is two-phase when
//! lifecycle hooks are involved, updates are incremental diffs, and deletion
//! drains the group before tearing it down.
//!
//! ## Architecture
//!
//! ```text
//! GroupSpec (JSON)
//!     │ validate
//!     ▼
//! translate ──▶ Create/Update requests
//!     │
//! GroupManager (orchestrator)
//!     ├── wait       capacity + attachment convergence polling
//!     ├── reconcile  set diffs: LBs, target groups, tags, metrics, processes
//!     ├── observe    declarative-shaped read-back
//!     └── api        AsgApi trait ──▶ aws (SDK clients)
//! ```
//!
//! The engine only ever talks to the control plane through the [`api::AsgApi`]
//! trait; [`aws::AwsAsgClient`] is its production implementation and tests
//! script an in-memory fake. See [`orchestrator`] for the lifecycle flows.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod aws;
pub mod error;
pub mod observe;
pub mod orchestrator;
pub mod reconcile;
pub mod spec;
pub mod tags;
pub mod translate;
pub mod wait;

#[cfg(test)]
pub mod testing;

// Lifecycle orchestration
pub use orchestrator::{ApplyReport, GroupManager};

// Desired and observed state
pub use api::{AsgApi, ObservedGroup, ProviderError, ProviderErrorKind};
pub use observe::GroupState;
pub use spec::GroupSpec;
pub use tags::TagEntry;

// Error handling
pub use error::{AsgError, Result};
