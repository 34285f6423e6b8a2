//! Proposal negotiation engine.
//!
//! A proposal opens `pending` with the freelancer's offer recorded as the
//! first history entry. Either party may counter; the cap is on the total
//! number of counter-offers, not on who makes them. Acceptance writes the
//! proposal, every sibling, and the project (with its fresh escrow) in one
//! snapshot, so two accepts on the same project cannot both commit.

use hireline_core::{
    validate_amount, Actor, Escrow, EscrowSplit, NegotiationEntry, NewProposal, Project,
    ProjectStatus, Proposal, ProposalStatus, Role, MAX_NEGOTIATION_ROUNDS,
};
use hireline_storage::{MarketStorage, StorageExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::engine::{
    new_id, now, optional_text, require_client, required_text, unauthorized, Applied, Engine,
};
use crate::error::{ensure_status, ensure_transition, EngineError};
use crate::event::{EventKind, Notification, Outbox, ADMIN_RECIPIENT};

const NEGOTIABLE: [ProposalStatus; 3] = [
    ProposalStatus::Pending,
    ProposalStatus::Negotiating,
    ProposalStatus::FinalOffer,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterOffer {
    pub amount: Decimal,
    #[serde(default)]
    pub note: Option<String>,
}

/// The accepted proposal and the project it now funds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acceptance {
    pub proposal: Proposal,
    pub project: Project,
}

impl<S: MarketStorage> Engine<S> {
    /// A freelancer bids on an open project.
    pub async fn submit_proposal(
        &self,
        actor: &Actor,
        project_id: &str,
        input: NewProposal,
    ) -> Result<Proposal, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .submit_proposal_in(&mut snap, actor, project_id, input)
            .await;
        let proposal = self.finish(snap, "submit proposal", result).await?;
        info!(
            proposal_id = %proposal.id,
            project_id = %proposal.project_id,
            budget = %proposal.proposed_budget,
            "proposal submitted"
        );
        Ok(proposal)
    }

    async fn submit_proposal_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        input: NewProposal,
    ) -> Result<Applied<Proposal>, EngineError> {
        if actor.role != Role::Freelancer {
            return Err(unauthorized(actor, "submit a proposal on", "project", project_id));
        }
        let budget = validate_amount(input.budget).map_err(|e| EngineError::amount("budget", e))?;
        let estimated_duration = required_text("estimated_duration", &input.estimated_duration)?;
        let pitch = required_text("pitch", &input.pitch)?;

        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        ensure_status(
            project_id,
            "submit a proposal on",
            &[ProjectStatus::Open],
            project.status,
        )?;
        if let Some(accepted) = &project.accepted_proposal_id {
            return Err(EngineError::AlreadyAccepted {
                project_id: project.id.clone(),
                accepted_proposal_id: accepted.clone(),
            });
        }

        let siblings = self.children_for_update::<Proposal>(snap, project_id).await?;
        if let Some(existing) = siblings
            .iter()
            .map(|v| &v.record)
            .find(|p| p.freelancer_id == actor.user_id && p.status.is_live())
        {
            return Err(EngineError::InvalidState {
                entity: "proposal",
                id: existing.id.clone(),
                operation: "submit a second proposal alongside",
                expected: "no live proposal from this freelancer".to_string(),
                actual: existing.status.to_string(),
            });
        }

        let at = now();
        let proposal = Proposal {
            id: new_id(),
            project_id: project_id.to_string(),
            freelancer_id: actor.user_id.clone(),
            proposed_budget: budget,
            original_budget: budget,
            estimated_duration,
            pitch,
            status: ProposalStatus::Pending,
            negotiation_count: 0,
            negotiation_history: vec![NegotiationEntry {
                actor_role: Role::Freelancer,
                amount: budget,
                at,
                note: None,
            }],
            created_at: at,
            updated_at: at,
        };
        self.create(snap, &proposal).await?;

        // Bumping the project serializes concurrent submissions against the
        // duplicate check above and against acceptance.
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            project.client_id.clone(),
            Notification::new(
                EventKind::ProposalSubmitted,
                project_id,
                &proposal.id,
                json!({ "freelancer_id": proposal.freelancer_id, "budget": budget }),
            ),
        );
        Ok(Applied::new(proposal, outbox))
    }

    /// Counter the current offer. Either the project's client or the
    /// proposing freelancer may counter, up to the round limit.
    pub async fn counter_offer(
        &self,
        actor: &Actor,
        proposal_id: &str,
        offer: CounterOffer,
    ) -> Result<Proposal, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.counter_offer_in(&mut snap, actor, proposal_id, offer).await;
        let proposal = self.finish(snap, "counter offer", result).await?;
        info!(
            proposal_id = %proposal.id,
            round = proposal.negotiation_count,
            amount = %proposal.proposed_budget,
            status = %proposal.status,
            "counter-offer recorded"
        );
        Ok(proposal)
    }

    async fn counter_offer_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        proposal_id: &str,
        offer: CounterOffer,
    ) -> Result<Applied<Proposal>, EngineError> {
        let stored = self.load_for_update::<Proposal>(snap, proposal_id).await?;
        let mut proposal = stored.record;
        let project = self
            .load_for_update::<Project>(snap, &proposal.project_id)
            .await?;
        let project = project.record;

        let counterparty = match actor.role {
            Role::Client if project.is_client(&actor.user_id) => proposal.freelancer_id.clone(),
            Role::Freelancer if proposal.freelancer_id == actor.user_id => project.client_id.clone(),
            _ => return Err(unauthorized(actor, "counter", "proposal", proposal_id)),
        };

        ensure_status(proposal_id, "counter", &NEGOTIABLE, proposal.status)?;
        if proposal.negotiation_count >= MAX_NEGOTIATION_ROUNDS {
            return Err(EngineError::NegotiationLimitExceeded {
                proposal_id: proposal_id.to_string(),
                limit: MAX_NEGOTIATION_ROUNDS,
            });
        }
        let amount = validate_amount(offer.amount).map_err(|e| EngineError::amount("amount", e))?;

        let round = proposal.negotiation_count + 1;
        let next = if round == 1 {
            ProposalStatus::Negotiating
        } else {
            ProposalStatus::FinalOffer
        };
        ensure_transition(proposal_id, "counter", proposal.status, next)?;

        let at = now();
        proposal.negotiation_history.push(NegotiationEntry {
            actor_role: actor.role,
            amount,
            at,
            note: optional_text(offer.note),
        });
        proposal.negotiation_count = round;
        proposal.proposed_budget = amount;
        proposal.status = next;
        proposal.updated_at = at;
        self.save(snap, stored.version, &proposal).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            counterparty,
            Notification::new(
                EventKind::CounterOffer,
                &proposal.project_id,
                proposal_id,
                json!({
                    "amount": amount,
                    "round": round,
                    "status": proposal.status,
                    "from": actor.role,
                }),
            ),
        );
        Ok(Applied::new(proposal, outbox))
    }

    /// Accept a proposal. Client only.
    ///
    /// Rejects every other live proposal on the project, assigns the
    /// freelancer and opens the escrow at the accepted amount. The project
    /// stays `open` until the escrow is verified.
    pub async fn accept_proposal(
        &self,
        actor: &Actor,
        proposal_id: &str,
    ) -> Result<Acceptance, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.accept_proposal_in(&mut snap, actor, proposal_id).await;
        match self.finish(snap, "accept proposal", result).await {
            Ok(acceptance) => {
                info!(
                    proposal_id = %acceptance.proposal.id,
                    project_id = %acceptance.project.id,
                    amount = %acceptance.proposal.proposed_budget,
                    "proposal accepted"
                );
                Ok(acceptance)
            }
            Err(stale @ EngineError::StaleState { .. }) => {
                Err(self.explain_accept_conflict(proposal_id, stale).await)
            }
            Err(err) => Err(err),
        }
    }

    /// A lost accept race reports the winner when there is one.
    async fn explain_accept_conflict(&self, proposal_id: &str, stale: EngineError) -> EngineError {
        let Ok(proposal) = self.storage().load::<Proposal>(proposal_id).await else {
            return stale;
        };
        let Ok(project) = self
            .storage()
            .load::<Project>(&proposal.record.project_id)
            .await
        else {
            return stale;
        };
        match project.record.accepted_proposal_id {
            Some(accepted_proposal_id) => EngineError::AlreadyAccepted {
                project_id: project.record.id,
                accepted_proposal_id,
            },
            None => stale,
        }
    }

    async fn accept_proposal_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        proposal_id: &str,
    ) -> Result<Applied<Acceptance>, EngineError> {
        let stored = self.load_for_update::<Proposal>(snap, proposal_id).await?;
        let mut proposal = stored.record;
        let stored_project = self
            .load_for_update::<Project>(snap, &proposal.project_id)
            .await?;
        let mut project = stored_project.record;

        require_client(actor, &project, "accept", "proposal", proposal_id)?;
        if let Some(accepted) = &project.accepted_proposal_id {
            return Err(EngineError::AlreadyAccepted {
                project_id: project.id.clone(),
                accepted_proposal_id: accepted.clone(),
            });
        }
        ensure_status(
            &project.id,
            "accept a proposal on",
            &[ProjectStatus::Open],
            project.status,
        )?;
        ensure_transition(proposal_id, "accept", proposal.status, ProposalStatus::Accepted)?;

        let split = EscrowSplit::compute(proposal.proposed_budget, self.config().platform_fee)
            .map_err(|e| EngineError::amount("proposed_budget", e))?;

        let at = now();
        let mut outbox = Outbox::new();
        let siblings = self
            .children_for_update::<Proposal>(snap, &project.id)
            .await?;
        for sibling in siblings {
            let mut other = sibling.record;
            if other.id == proposal.id {
                continue;
            }
            if other.status == ProposalStatus::Accepted {
                return Err(EngineError::AlreadyAccepted {
                    project_id: project.id.clone(),
                    accepted_proposal_id: other.id,
                });
            }
            if !other.status.is_live() {
                continue;
            }
            other.status = ProposalStatus::Rejected;
            other.updated_at = at;
            self.save(snap, sibling.version, &other).await?;
            outbox.send(
                other.freelancer_id.clone(),
                Notification::new(
                    EventKind::ProposalRejected,
                    &project.id,
                    &other.id,
                    json!({ "reason": "another proposal was accepted" }),
                ),
            );
        }

        proposal.status = ProposalStatus::Accepted;
        proposal.updated_at = at;
        self.save(snap, stored.version, &proposal).await?;

        project.freelancer_id = Some(proposal.freelancer_id.clone());
        project.accepted_proposal_id = Some(proposal.id.clone());
        project.escrow = Some(Escrow::new(split, self.config().platform_fee));
        project.updated_at = at;
        self.save(snap, stored_project.version, &project).await?;

        let figures = json!({
            "escrow_amount": split.escrow_amount,
            "platform_fee_amount": split.platform_fee_amount,
            "freelancer_payout_amount": split.freelancer_payout_amount,
        });
        outbox.send(
            proposal.freelancer_id.clone(),
            Notification::new(EventKind::ProposalAccepted, &project.id, proposal_id, figures.clone()),
        );
        outbox.send(
            project.client_id.clone(),
            Notification::new(EventKind::EscrowInitialized, &project.id, &project.id, figures.clone()),
        );
        outbox.send(
            ADMIN_RECIPIENT,
            Notification::new(EventKind::EscrowInitialized, &project.id, &project.id, figures),
        );

        Ok(Applied::new(Acceptance { proposal, project }, outbox))
    }

    /// Client turns a proposal down.
    pub async fn decline_proposal(
        &self,
        actor: &Actor,
        proposal_id: &str,
        reason: Option<String>,
    ) -> Result<Proposal, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .decline_proposal_in(&mut snap, actor, proposal_id, reason)
            .await;
        let proposal = self.finish(snap, "decline proposal", result).await?;
        info!(proposal_id = %proposal.id, "proposal declined");
        Ok(proposal)
    }

    async fn decline_proposal_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        proposal_id: &str,
        reason: Option<String>,
    ) -> Result<Applied<Proposal>, EngineError> {
        let stored = self.load_for_update::<Proposal>(snap, proposal_id).await?;
        let mut proposal = stored.record;
        let project = self
            .load_for_update::<Project>(snap, &proposal.project_id)
            .await?
            .record;
        require_client(actor, &project, "decline", "proposal", proposal_id)?;
        ensure_transition(proposal_id, "decline", proposal.status, ProposalStatus::Rejected)?;

        proposal.status = ProposalStatus::Rejected;
        proposal.updated_at = now();
        self.save(snap, stored.version, &proposal).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            proposal.freelancer_id.clone(),
            Notification::new(
                EventKind::ProposalRejected,
                &proposal.project_id,
                proposal_id,
                json!({ "reason": optional_text(reason) }),
            ),
        );
        Ok(Applied::new(proposal, outbox))
    }

    /// Freelancer pulls their own proposal. Not possible once accepted.
    pub async fn withdraw_proposal(
        &self,
        actor: &Actor,
        proposal_id: &str,
    ) -> Result<Proposal, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.withdraw_proposal_in(&mut snap, actor, proposal_id).await;
        let proposal = self.finish(snap, "withdraw proposal", result).await?;
        info!(proposal_id = %proposal.id, "proposal withdrawn");
        Ok(proposal)
    }

    async fn withdraw_proposal_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        proposal_id: &str,
    ) -> Result<Applied<Proposal>, EngineError> {
        let stored = self.load_for_update::<Proposal>(snap, proposal_id).await?;
        let mut proposal = stored.record;
        if actor.role != Role::Freelancer || proposal.freelancer_id != actor.user_id {
            return Err(unauthorized(actor, "withdraw", "proposal", proposal_id));
        }
        ensure_transition(proposal_id, "withdraw", proposal.status, ProposalStatus::Withdrawn)?;
        let project = self
            .load_for_update::<Project>(snap, &proposal.project_id)
            .await?
            .record;

        proposal.status = ProposalStatus::Withdrawn;
        proposal.updated_at = now();
        self.save(snap, stored.version, &proposal).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            project.client_id,
            Notification::new(
                EventKind::ProposalWithdrawn,
                &proposal.project_id,
                proposal_id,
                json!({ "freelancer_id": proposal.freelancer_id }),
            ),
        );
        Ok(Applied::new(proposal, outbox))
    }
}
