//! Hireline domain model.
//!
//! Records for the four engagement entities (Project, Proposal, Milestone,
//! Deliverable), the closed status enums that drive them, and the escrow
//! fee arithmetic. Nothing in this crate performs I/O; the engine crate
//! owns persistence and authorization.

pub mod actor;
pub mod model;
pub mod money;
pub mod status;

pub use actor::{Actor, Role};
pub use model::{
    Deliverable, Escrow, Milestone, NegotiationEntry, NewDeliverable, NewMilestone, NewProject,
    NewProposal, Project, Proposal, RevisionRequest,
};
pub use money::{validate_amount, AmountError, EscrowSplit, FeeRate};
pub use status::{
    DeliverableStatus, EscrowStatus, Lifecycle, MilestoneStatus, ProjectStatus, ProposalStatus,
};

/// Maximum number of counter-offers a proposal may carry, across both parties.
pub const MAX_NEGOTIATION_ROUNDS: u8 = 2;
