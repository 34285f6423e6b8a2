//! Hireline engagement lifecycle engine.
//!
//! The engine owns every state transition of a project engagement: proposal
//! negotiation, the manually verified escrow ledger, deliverable review and
//! the milestone checklist. It holds no state of its own; each operation is
//! one snapshot against [`MarketStorage`](hireline_storage::MarketStorage)
//! that reads the records it needs, checks authorization and the transition
//! tables, writes, and commits. Notifications go out only after the commit
//! succeeds.
//!
//! Operations are grouped by concern:
//! - [`negotiation`]: submit, counter-offer, accept, decline, withdraw
//! - [`escrow`]: payment proof, verification, release, dispute, refund
//! - [`lifecycle`]: project creation, submit-for-review, cancellation
//! - [`deliverable`]: submission and the review/revision cycle
//! - [`milestone`]: the progress checklist
//! - [`query`]: read-only views of committed state

pub mod collaborators;
pub mod deliverable;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod event;
pub mod lifecycle;
pub mod milestone;
pub mod negotiation;
pub mod query;

pub use collaborators::{
    BroadcastNotifier, FileStore, FileStoreError, MemoryFileStore, Notifier, NotifyError,
    TracingNotifier,
};
pub use deliverable::Resubmission;
pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
pub use escrow::ReleaseRequest;
pub use event::{Envelope, EventKind, Notification, ADMIN_RECIPIENT};
pub use lifecycle::{CancelRequest, CancelResolution};
pub use negotiation::{Acceptance, CounterOffer};
