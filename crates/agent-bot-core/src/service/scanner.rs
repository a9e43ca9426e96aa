//! # Daily Corner-Case Scanner
//!
//! Once per period of underlying chain time the scanner obtains a
//! confirmed-block-height proof, then uses it to close every minting and
//! redemption whose proof window expired while nobody was looking. Reward and
//! airdrop claims ride along on the same schedule.

use super::context::AgentBotContext;
use super::minting::MintingLifecycle;
use super::redemption::RedemptionLifecycle;
use crate::algorithms::daily_tasks_due;
use crate::domain::{
    AgentBotResult, AgentSchedule, AttestationProof, CollateralClass, DailyProofState,
    ProofOutcome,
};
use crate::ports::Notification;
use tracing::{debug, error, info, warn};

/// Daily scan for one agent.
pub struct DailyScanner<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> DailyScanner<'a> {
    /// Scanner for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Advance the daily proof phase. Returns the block-height proof when one
    /// was obtained during this call.
    pub async fn run(&self) -> AgentBotResult<Option<AttestationProof>> {
        let mut schedule = self.ctx.schedule(self.agent).await?;
        let latest = self.ctx.latest_underlying_block().await?;
        if !daily_tasks_due(
            latest.timestamp,
            schedule.daily_tasks_timestamp,
            self.ctx.config.daily_task_period_seconds,
        ) {
            return Ok(None);
        }

        match schedule.daily_proof_state {
            DailyProofState::ObtainedProof => {
                self.request_proof(&mut schedule).await?;
                Ok(None)
            }
            DailyProofState::WaitingProof => {
                let Some(request) = schedule.daily_proof_request.clone() else {
                    warn!(
                        "[scanner] agent={} waiting for a proof without a request",
                        self.agent
                    );
                    self.reset(&mut schedule).await?;
                    return Ok(None);
                };
                match self.ctx.attestation.obtain_proof(&request).await? {
                    ProofOutcome::NotFinalized => {
                        debug!(
                            "[scanner] agent={} block height proof round {} not finalized",
                            self.agent, request.round
                        );
                        Ok(None)
                    }
                    ProofOutcome::Proved(proof) => {
                        info!(
                            "[scanner] agent={} obtained block height proof in round {}",
                            self.agent, request.round
                        );
                        self.sweep(&schedule, &proof).await;
                        self.claim_all().await;
                        // sweeps write records, not the schedule
                        let mut schedule = self.ctx.schedule(self.agent).await?;
                        schedule.daily_tasks_timestamp = latest.timestamp;
                        schedule.block_height_proof = Some(proof.clone());
                        self.reset(&mut schedule).await?;
                        Ok(Some(proof))
                    }
                    ProofOutcome::NotProved => {
                        warn!(
                            "[scanner] agent={} block height proof round {} not proved",
                            self.agent, request.round
                        );
                        self.ctx
                            .notify(self.agent, Notification::BlockHeightProofUnobtainable);
                        self.reset(&mut schedule).await?;
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn request_proof(&self, schedule: &mut AgentSchedule) -> AgentBotResult<()> {
        let settings = self.ctx.ledger.settings().await?;
        let Some(request) = self
            .ctx
            .attestation
            .request_confirmed_block_height_exists_proof(settings.attestation_window_seconds)
            .await?
        else {
            info!(
                "[scanner] agent={} cannot yet request block height proof",
                self.agent
            );
            return Ok(());
        };
        info!(
            "[scanner] agent={} requested block height proof in round {}",
            self.agent, request.round
        );
        schedule.daily_proof_state = DailyProofState::WaitingProof;
        schedule.daily_proof_request = Some(request);
        self.ctx.commit_schedule(schedule).await
    }

    async fn reset(&self, schedule: &mut AgentSchedule) -> AgentBotResult<()> {
        schedule.daily_proof_state = DailyProofState::ObtainedProof;
        schedule.daily_proof_request = None;
        self.ctx.commit_schedule(schedule).await
    }

    async fn sweep(&self, schedule: &AgentSchedule, proof: &AttestationProof) {
        let mintings = MintingLifecycle::new(self.ctx, self.agent);
        match self.ctx.store.open_mintings(self.agent).await {
            Ok(open) => {
                for minting in open {
                    let request_id = minting.request_id;
                    if let Err(e) = mintings.step(minting, Some(proof)).await {
                        error!(
                            "[scanner] agent={} minting {} sweep failed: {}",
                            self.agent, request_id, e
                        );
                    }
                }
            }
            Err(e) => error!(
                "[scanner] agent={} cannot load open mintings: {}",
                self.agent, e
            ),
        }

        let redemptions =
            RedemptionLifecycle::new(self.ctx, self.agent, &schedule.underlying_address);
        match self.ctx.store.open_redemptions(self.agent).await {
            Ok(open) => {
                for redemption in open {
                    let request_id = redemption.request_id;
                    if let Err(e) = redemptions.finish_if_expired(redemption, proof).await {
                        error!(
                            "[scanner] agent={} redemption {} sweep failed: {}",
                            self.agent, request_id, e
                        );
                    }
                }
            }
            Err(e) => error!(
                "[scanner] agent={} cannot load open redemptions: {}",
                self.agent, e
            ),
        }
    }

    async fn claim_all(&self) {
        for class in CollateralClass::ALL {
            if let Err(e) = self.claim_rewards(class).await {
                error!(
                    "[scanner] agent={} {:?} reward claim failed: {}",
                    self.agent, class, e
                );
            }
            if let Err(e) = self.claim_airdrop(class).await {
                error!(
                    "[scanner] agent={} {:?} airdrop claim failed: {}",
                    self.agent, class, e
                );
            }
        }
    }

    async fn claim_rewards(&self, class: CollateralClass) -> AgentBotResult<()> {
        let epochs = self
            .ctx
            .ledger
            .unclaimed_reward_epochs(self.agent, class)
            .await?;
        if epochs.is_empty() {
            return Ok(());
        }
        let amount = self.ctx.ledger.claim_rewards(self.agent, class, &epochs).await?;
        info!(
            "[scanner] agent={} claimed {} {:?} rewards for {} epochs",
            self.agent,
            amount,
            class,
            epochs.len()
        );
        self.ctx
            .notify(self.agent, Notification::RewardsClaimed { class, amount });
        Ok(())
    }

    async fn claim_airdrop(&self, class: CollateralClass) -> AgentBotResult<()> {
        let months = self
            .ctx
            .ledger
            .claimable_airdrop_months(self.agent, class)
            .await?;
        if months.is_empty() {
            return Ok(());
        }
        let amount = self.ctx.ledger.claim_airdrop(self.agent, class, &months).await?;
        self.ctx
            .notify(self.agent, Notification::AirdropClaimed { class, amount });
        Ok(())
    }
}
