//! # Minting Lifecycle
//!
//! Drives a collateral reservation the minter did not execute:
//!
//! 1. the payment deadline passes on the underlying chain,
//! 2. the bot proves payment (execute) or non-payment (default),
//! 3. if the attestors can no longer prove either, the minting is unstuck.
//!
//! The expiry check always runs before the deadline check. A minting that is
//! still `Started` is not touched until a block-height proof is known: without
//! one an expired window cannot be told apart from a missed deadline.

use super::context::AgentBotContext;
use crate::algorithms::{payment_deadline_passed, proof_window_expired, unstick_burn_amount};
use crate::domain::{
    AgentBotResult, AttestationProof, CollateralClass, MintingRecord, MintingState,
    ProofOutcome,
};
use crate::ports::{NonPaymentQuery, Notification, PaymentQuery, UnitOfWork};
use tracing::{debug, info, warn};

/// One-step-at-a-time driver for an agent's mintings.
pub struct MintingLifecycle<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> MintingLifecycle<'a> {
    /// Lifecycle for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Advance one minting by at most one transition.
    ///
    /// `block_height_proof` is the latest confirmed-block-height proof, used
    /// to detect an expired proof-availability window. A `Started` minting
    /// waits while it is `None`.
    pub async fn step(
        &self,
        minting: MintingRecord,
        block_height_proof: Option<&AttestationProof>,
    ) -> AgentBotResult<()> {
        debug!(
            "[minting] agent={} handling {} in {:?}",
            self.agent, minting.request_id, minting.state
        );
        if minting.state.is_terminal() {
            return Ok(());
        }
        let may_unstick = minting.state == MintingState::Started || minting.proof_unobtainable;
        if let Some(proof) = block_height_proof {
            if may_unstick
                && proof_window_expired(
                    proof,
                    minting.last_underlying_block,
                    minting.last_underlying_timestamp,
                )
            {
                return self.unstick(minting, proof).await;
            }
        }
        match minting.state {
            MintingState::Started if block_height_proof.is_none() => {
                debug!(
                    "[minting] agent={} {} waiting for block height proof",
                    self.agent, minting.request_id
                );
                Ok(())
            }
            MintingState::Started => self.check_payment_deadline(minting).await,
            MintingState::AwaitingPaymentProof | MintingState::AwaitingNonPaymentProof => {
                if minting.proof_unobtainable {
                    debug!(
                        "[minting] agent={} proof for {} unobtainable, waiting for expiry",
                        self.agent, minting.request_id
                    );
                    return Ok(());
                }
                self.check_proof(minting).await
            }
            MintingState::Done => Ok(()),
        }
    }

    async fn check_payment_deadline(&self, mut minting: MintingRecord) -> AgentBotResult<()> {
        let latest = self.ctx.latest_underlying_block().await?;
        let finalization_blocks = self.ctx.underlying.finalization_blocks();
        if !payment_deadline_passed(minting.last_underlying_block, finalization_blocks, latest) {
            return Ok(());
        }
        info!(
            "[minting] agent={} payment time for {} expired",
            self.agent, minting.request_id
        );
        let transactions = self
            .ctx
            .underlying
            .transactions_by_reference(&minting.payment_reference)
            .await?;

        match transactions.as_slice() {
            [] => {
                let query = NonPaymentQuery {
                    destination: minting.agent_underlying_address.clone(),
                    payment_reference: minting.payment_reference,
                    amount: minting.total_payment(),
                    first_block: minting.first_underlying_block,
                    last_block: minting.last_underlying_block,
                    deadline_timestamp: minting.last_underlying_timestamp,
                };
                let Some(request) = self
                    .ctx
                    .attestation
                    .request_referenced_payment_nonexistence_proof(&query)
                    .await?
                else {
                    info!(
                        "[minting] agent={} cannot yet request non-payment proof for {}",
                        self.agent, minting.request_id
                    );
                    return Ok(());
                };
                info!(
                    "[minting] agent={} requested non-payment proof for {} in round {}",
                    self.agent, minting.request_id, request.round
                );
                minting.await_proof(MintingState::AwaitingNonPaymentProof, request)?;
                self.save(minting).await
            }
            [payment] => {
                let (Some(source), Some(block_number)) =
                    (payment.first_input(), payment.block_number)
                else {
                    info!(
                        "[minting] agent={} payment {} for {} not included yet",
                        self.agent, payment.tx_id, minting.request_id
                    );
                    return Ok(());
                };
                let query = PaymentQuery {
                    tx_id: payment.tx_id.clone(),
                    block_number,
                    source: source.clone(),
                    target: minting.agent_underlying_address.clone(),
                };
                let Some(request) = self.ctx.attestation.request_payment_proof(&query).await?
                else {
                    info!(
                        "[minting] agent={} cannot yet request payment proof for {}",
                        self.agent, minting.request_id
                    );
                    return Ok(());
                };
                info!(
                    "[minting] agent={} requested payment proof for {} (tx {}) in round {}",
                    self.agent, minting.request_id, payment.tx_id, request.round
                );
                minting.await_proof(MintingState::AwaitingPaymentProof, request)?;
                self.save(minting).await
            }
            many => {
                warn!(
                    "[minting] agent={} {} payments carry the reference of {}, not acting",
                    self.agent,
                    many.len(),
                    minting.request_id
                );
                Ok(())
            }
        }
    }

    async fn check_proof(&self, mut minting: MintingRecord) -> AgentBotResult<()> {
        let request = minting.require_proof_request()?.clone();
        match self.ctx.attestation.obtain_proof(&request).await? {
            ProofOutcome::NotFinalized => {
                info!(
                    "[minting] agent={} proof for {} not finalized in round {}",
                    self.agent, minting.request_id, request.round
                );
                Ok(())
            }
            ProofOutcome::Proved(proof) => {
                let notification = if minting.state == MintingState::AwaitingPaymentProof {
                    self.ctx
                        .ledger
                        .execute_minting(self.agent, minting.request_id, &proof)
                        .await?;
                    Notification::MintingExecuted {
                        request_id: minting.request_id,
                    }
                } else {
                    self.ctx
                        .ledger
                        .minting_payment_default(self.agent, minting.request_id, &proof)
                        .await?;
                    Notification::MintingDefaulted {
                        request_id: minting.request_id,
                    }
                };
                minting.transition_to(MintingState::Done)?;
                self.save(minting).await?;
                self.ctx.notify(self.agent, notification);
                Ok(())
            }
            ProofOutcome::NotProved => {
                warn!(
                    "[minting] agent={} proof for {} in round {} not proved",
                    self.agent, minting.request_id, request.round
                );
                minting.proof_unobtainable = true;
                let request_id = minting.request_id;
                self.save(minting).await?;
                self.ctx
                    .notify(self.agent, Notification::MintingProofUnobtainable { request_id });
                Ok(())
            }
        }
    }

    async fn unstick(
        &self,
        mut minting: MintingRecord,
        block_height_proof: &AttestationProof,
    ) -> AgentBotResult<()> {
        let settings = self.ctx.ledger.settings().await?;
        let pool_price = self
            .ctx
            .ledger
            .collateral_price(self.agent, CollateralClass::Pool)
            .await?;
        let burned_nat_wei = unstick_burn_amount(
            &pool_price,
            minting.value,
            settings.vault_collateral_buy_for_flare_factor_bips,
        );
        info!(
            "[minting] agent={} proofs for {} expired, unsticking (burn {})",
            self.agent, minting.request_id, burned_nat_wei
        );
        self.ctx
            .ledger
            .unstick_minting(
                self.agent,
                minting.request_id,
                block_height_proof,
                burned_nat_wei,
            )
            .await?;
        minting.transition_to(MintingState::Done)?;
        let request_id = minting.request_id;
        self.save(minting).await?;
        self.ctx.notify(
            self.agent,
            Notification::MintingUnstuck {
                request_id,
                burned_nat_wei,
            },
        );
        Ok(())
    }

    async fn save(&self, minting: MintingRecord) -> AgentBotResult<()> {
        let mut work = UnitOfWork::new();
        work.update_minting(minting);
        self.ctx.store.commit(work).await
    }
}
