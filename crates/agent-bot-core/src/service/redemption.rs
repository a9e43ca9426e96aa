//! # Redemption Lifecycle
//!
//! ```text
//! Started ──pay──→ Paid ──confirmed depth──→ AwaitingProof ──proved──→ Done
//!                    └──(self-confirmation off)──→ ProofNotRequested
//! any open state ──proof window expired──→ Done (finished without payment)
//! ```
//!
//! Paying is the one step whose effect cannot be rolled back. Before paying
//! the lifecycle looks for an earlier payment carrying the same reference and
//! adopts it, so a crash between paying and committing never pays twice.

use super::context::AgentBotContext;
use super::top_up::UnderlyingTopUp;
use crate::algorithms::{confirmation_depth_reached, proof_window_expired, still_time_to_pay};
use crate::domain::{
    AgentBotResult, AttestationProof, ProofOutcome, RedemptionFinalState, RedemptionRecord,
    RedemptionState, TxId,
};
use crate::ports::{Notification, PaymentQuery, UnitOfWork};
use tracing::{debug, error, info, warn};

/// One-step-at-a-time driver for an agent's redemptions.
pub struct RedemptionLifecycle<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
    underlying_address: &'a str,
}

impl<'a> RedemptionLifecycle<'a> {
    /// Lifecycle for `agent`, paying from `underlying_address`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str, underlying_address: &'a str) -> Self {
        Self {
            ctx,
            agent,
            underlying_address,
        }
    }

    /// Advance one redemption by at most one transition.
    pub async fn step(
        &self,
        redemption: RedemptionRecord,
        block_height_proof: Option<&AttestationProof>,
    ) -> AgentBotResult<()> {
        debug!(
            "[redemption] agent={} handling {} in {:?}",
            self.agent, redemption.request_id, redemption.state
        );
        if redemption.state.is_terminal() {
            return Ok(());
        }
        // Started records are left to the daily sweep
        if let Some(proof) =
            block_height_proof.filter(|_| redemption.state != RedemptionState::Started)
        {
            if self.finish_if_expired(redemption.clone(), proof).await? {
                return Ok(());
            }
        }
        match redemption.state {
            RedemptionState::Started => self.pay(redemption).await,
            RedemptionState::Paid => self.request_proof(redemption).await,
            RedemptionState::AwaitingProof => self.confirm(redemption).await,
            RedemptionState::ProofNotRequested | RedemptionState::Done => Ok(()),
        }
    }

    /// Close the redemption without payment when the attestors can no longer
    /// prove anything about its payment window. Returns whether it closed.
    pub async fn finish_if_expired(
        &self,
        mut redemption: RedemptionRecord,
        block_height_proof: &AttestationProof,
    ) -> AgentBotResult<bool> {
        if redemption.state.is_terminal()
            || !proof_window_expired(
                block_height_proof,
                redemption.last_underlying_block,
                redemption.last_underlying_timestamp,
            )
        {
            return Ok(false);
        }
        info!(
            "[redemption] agent={} proof window for {} expired in {:?}, finishing without payment",
            self.agent, redemption.request_id, redemption.state
        );
        self.ctx
            .ledger
            .finish_redemption_without_payment(self.agent, redemption.request_id, block_height_proof)
            .await?;
        redemption.finish(RedemptionFinalState::FinishedWithoutPayment)?;
        let request_id = redemption.request_id;
        self.save(redemption).await?;
        self.ctx
            .notify(self.agent, Notification::RedemptionExpired { request_id });
        Ok(true)
    }

    async fn pay(&self, redemption: RedemptionRecord) -> AgentBotResult<()> {
        if let Some(tx_id) = self.earlier_payment(&redemption).await? {
            warn!(
                "[redemption] agent={} found earlier payment {} for {}",
                self.agent, tx_id, redemption.request_id
            );
            return self.mark_paid(redemption, tx_id).await;
        }

        let latest = self.ctx.latest_underlying_block().await?;
        if !still_time_to_pay(
            latest,
            self.ctx.underlying.finalization_blocks(),
            self.ctx.underlying.seconds_per_block(),
            redemption.last_underlying_block,
            redemption.last_underlying_timestamp,
        ) {
            info!(
                "[redemption] agent={} no time left to pay {}",
                self.agent, redemption.request_id
            );
            return Ok(());
        }

        let amount = redemption.payment_amount();
        info!(
            "[redemption] agent={} paying {} to {} for {}",
            self.agent, amount, redemption.payment_address, redemption.request_id
        );
        let tx_id = self
            .ctx
            .underlying
            .submit_payment(
                self.underlying_address,
                &redemption.payment_address,
                amount,
                Some(redemption.payment_reference),
            )
            .await?;
        self.mark_paid(redemption, tx_id).await
    }

    async fn earlier_payment(&self, redemption: &RedemptionRecord) -> AgentBotResult<Option<TxId>> {
        let found = self
            .ctx
            .underlying
            .transactions_by_reference(&redemption.payment_reference)
            .await?;
        Ok(found
            .into_iter()
            .find(|tx| tx.first_input().map(String::as_str) == Some(self.underlying_address))
            .map(|tx| tx.tx_id))
    }

    async fn mark_paid(&self, mut redemption: RedemptionRecord, tx_id: TxId) -> AgentBotResult<()> {
        let request_id = redemption.request_id;
        redemption.mark_paid(tx_id.clone())?;
        self.save(redemption).await?;
        self.ctx
            .notify(self.agent, Notification::RedemptionPaid { request_id, tx_id });
        Ok(())
    }

    async fn request_proof(&self, mut redemption: RedemptionRecord) -> AgentBotResult<()> {
        let tx_id = redemption.require_payment_tx()?.clone();
        let Some(block_number) = self
            .ctx
            .underlying
            .transaction(&tx_id)
            .await?
            .and_then(|tx| tx.block_number)
        else {
            debug!(
                "[redemption] agent={} payment {} not included yet",
                self.agent, tx_id
            );
            return Ok(());
        };
        let height = self.ctx.underlying.block_height().await?;
        if !confirmation_depth_reached(height, block_number, self.ctx.underlying.finalization_blocks())
        {
            return Ok(());
        }

        if !self.ctx.config.confirm_redemption_payments {
            info!(
                "[redemption] agent={} payment for {} final, confirmation left to others",
                self.agent, redemption.request_id
            );
            redemption.transition_to(RedemptionState::ProofNotRequested)?;
            return self.save(redemption).await;
        }

        let query = PaymentQuery {
            tx_id: tx_id.clone(),
            block_number,
            source: self.underlying_address.to_string(),
            target: redemption.payment_address.clone(),
        };
        let Some(request) = self.ctx.attestation.request_payment_proof(&query).await? else {
            info!(
                "[redemption] agent={} cannot yet request payment proof for {}",
                self.agent, redemption.request_id
            );
            return Ok(());
        };
        info!(
            "[redemption] agent={} requested payment proof for {} in round {}",
            self.agent, redemption.request_id, request.round
        );
        redemption.transition_to(RedemptionState::AwaitingProof)?;
        redemption.proof_request = Some(request);
        let request_id = redemption.request_id;
        self.save(redemption).await?;
        self.ctx
            .notify(self.agent, Notification::RedemptionProofRequested { request_id });
        Ok(())
    }

    async fn confirm(&self, mut redemption: RedemptionRecord) -> AgentBotResult<()> {
        if redemption.proof_unobtainable {
            return Ok(());
        }
        let request = redemption.require_proof_request()?.clone();
        let request_id = redemption.request_id;
        match self.ctx.attestation.obtain_proof(&request).await? {
            ProofOutcome::NotFinalized => {
                info!(
                    "[redemption] agent={} proof for {} not finalized in round {}",
                    self.agent, request_id, request.round
                );
                Ok(())
            }
            ProofOutcome::Proved(proof) => {
                self.ctx
                    .ledger
                    .confirm_redemption_payment(self.agent, request_id, &proof)
                    .await?;
                redemption.finish(RedemptionFinalState::Performed)?;
                self.save(redemption).await?;
                self.ctx
                    .notify(self.agent, Notification::RedemptionPerformed { request_id });
                if let Err(e) = UnderlyingTopUp::new(self.ctx, self.agent).check().await {
                    error!(
                        "[redemption] agent={} underlying balance check failed: {}",
                        self.agent, e
                    );
                }
                Ok(())
            }
            ProofOutcome::NotProved => {
                warn!(
                    "[redemption] agent={} proof for {} in round {} not proved",
                    self.agent, request_id, request.round
                );
                redemption.proof_unobtainable = true;
                self.save(redemption).await?;
                self.ctx
                    .notify(self.agent, Notification::RedemptionProofUnobtainable { request_id });
                Ok(())
            }
        }
    }

    async fn save(&self, redemption: RedemptionRecord) -> AgentBotResult<()> {
        let mut work = UnitOfWork::new();
        work.update_redemption(redemption);
        self.ctx.store.commit(work).await
    }
}
