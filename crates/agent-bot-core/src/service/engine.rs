//! # Agent Bot Engine
//!
//! One engine per agent vault. A tick runs these stages in order, each
//! failure logged and the tick continued:
//!
//! ```text
//! retry failed events → read new events → follow-ups
//!   → redemptions (prioritised) → mintings → timelocks → daily scan
//! ```
//!
//! Ticks and owner API calls are serialised by a per-engine lock, so the
//! schedule record only ever has one writer.

use super::context::AgentBotContext;
use super::minting::MintingLifecycle;
use super::reconciler::{EventReconciler, FollowUp};
use super::redemption::RedemptionLifecycle;
use super::scanner::DailyScanner;
use super::timelocks::TimelockExecutor;
use super::top_up::{CollateralTopUp, UnderlyingTopUp};
use crate::algorithms::prioritise_redemptions;
use crate::domain::{
    AgentBotError, AgentBotResult, AgentSchedule, AgentSettingName, Amount, AttestationProof,
    TimelockAction, TxId, UnderlyingWithdrawal,
};
use crate::ports::AgentOwnerApi;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Lifecycle engine of one agent vault.
pub struct AgentBotEngine {
    ctx: Arc<AgentBotContext>,
    agent: String,
    underlying_address: String,
    step_lock: Mutex<()>,
    block_height_proof: RwLock<Option<AttestationProof>>,
    initial_checks_done: AtomicBool,
}

impl AgentBotEngine {
    /// Start tracking `agent`. An existing schedule is reused, otherwise one
    /// is created that reads events from the next native block on.
    pub async fn register(ctx: Arc<AgentBotContext>, agent: &str) -> AgentBotResult<Self> {
        if let Some(schedule) = ctx.store.agent_schedule(agent).await? {
            debug!("[engine] agent={} already registered", agent);
            return Ok(Self::with_schedule(ctx, &schedule));
        }
        let info = ctx.ledger.agent_info(agent).await?;
        let next_block = ctx.ledger.block_height().await?.saturating_add(1);
        let schedule = AgentSchedule::new(agent, &info.underlying_address, next_block);
        ctx.commit_schedule(&schedule).await?;
        info!(
            "[engine] agent={} registered, reading events from block {}",
            agent, next_block
        );
        Ok(Self::with_schedule(ctx, &schedule))
    }

    /// Engine for an agent that is already registered.
    pub async fn load(ctx: Arc<AgentBotContext>, agent: &str) -> AgentBotResult<Self> {
        let schedule = ctx.schedule(agent).await?;
        Ok(Self::with_schedule(ctx, &schedule))
    }

    fn with_schedule(ctx: Arc<AgentBotContext>, schedule: &AgentSchedule) -> Self {
        Self {
            ctx,
            agent: schedule.agent.clone(),
            underlying_address: schedule.underlying_address.clone(),
            step_lock: Mutex::new(()),
            block_height_proof: RwLock::new(schedule.block_height_proof.clone()),
            initial_checks_done: AtomicBool::new(false),
        }
    }

    /// Agent vault address.
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Block-height proof obtained by the last daily scan, if any. Survives
    /// restarts through the schedule.
    pub fn cached_block_height_proof(&self) -> Option<AttestationProof> {
        self.block_height_proof.read().clone()
    }

    /// False once the vault was destroyed.
    pub async fn is_active(&self) -> AgentBotResult<bool> {
        Ok(self.ctx.schedule(&self.agent).await?.active)
    }

    /// Run one tick.
    pub async fn run_step(&self) -> AgentBotResult<()> {
        let _guard = self.step_lock.lock().await;
        if !self.is_active().await? {
            return Ok(());
        }
        let ctx = self.ctx.as_ref();
        let agent = self.agent.as_str();

        if !self.initial_checks_done.swap(true, Ordering::SeqCst) {
            if let Err(e) = UnderlyingTopUp::new(ctx, agent).check().await {
                error!("[engine] agent={} initial underlying check failed: {}", agent, e);
            }
        }

        let reconciler = EventReconciler::new(ctx, agent);
        let mut follow_ups = Vec::new();
        match reconciler.retry_failed_events().await {
            Ok(more) => follow_ups.extend(more),
            Err(e) => error!("[engine] agent={} retrying events failed: {}", agent, e),
        }
        match reconciler.read_new_events().await {
            Ok(more) => follow_ups.extend(more),
            Err(e) => error!("[engine] agent={} reading events failed: {}", agent, e),
        }
        self.run_follow_ups(follow_ups).await;

        if !self.is_active().await? {
            info!("[engine] agent={} destroyed, stopping", agent);
            return Ok(());
        }

        let proof = self.cached_block_height_proof();
        if let Err(e) = self.step_redemptions(proof.as_ref()).await {
            error!("[engine] agent={} redemption stage failed: {}", agent, e);
        }
        if let Err(e) = self.step_mintings(proof.as_ref()).await {
            error!("[engine] agent={} minting stage failed: {}", agent, e);
        }
        if let Err(e) = UnderlyingTopUp::new(ctx, agent).step().await {
            error!("[engine] agent={} underlying top-up stage failed: {}", agent, e);
        }
        if let Err(e) = TimelockExecutor::new(ctx, agent).run().await {
            error!("[engine] agent={} timelock stage failed: {}", agent, e);
        }
        match DailyScanner::new(ctx, agent).run().await {
            Ok(Some(proof)) => *self.block_height_proof.write() = Some(proof),
            Ok(None) => {}
            Err(e) => error!("[engine] agent={} daily scan failed: {}", agent, e),
        }
        Ok(())
    }

    async fn run_follow_ups(&self, follow_ups: Vec<FollowUp>) {
        let mut seen = Vec::new();
        for follow_up in follow_ups {
            if seen.contains(&follow_up) {
                continue;
            }
            seen.push(follow_up);
            let result = match follow_up {
                FollowUp::CollateralCheck => {
                    CollateralTopUp::new(&self.ctx, &self.agent).check().await
                }
                FollowUp::UnderlyingBalanceCheck => {
                    UnderlyingTopUp::new(&self.ctx, &self.agent).check().await
                }
            };
            if let Err(e) = result {
                error!(
                    "[engine] agent={} {:?} follow-up failed: {}",
                    self.agent, follow_up, e
                );
            }
        }
    }

    async fn step_redemptions(&self, proof: Option<&AttestationProof>) -> AgentBotResult<()> {
        let open = self.ctx.store.open_redemptions(&self.agent).await?;
        let lifecycle = RedemptionLifecycle::new(&self.ctx, &self.agent, &self.underlying_address);
        for redemption in prioritise_redemptions(open, self.ctx.config.max_non_priority_redemptions)
        {
            let request_id = redemption.request_id;
            if let Err(e) = lifecycle.step(redemption, proof).await {
                error!(
                    "[engine] agent={} redemption {} step failed: {}",
                    self.agent, request_id, e
                );
            }
        }
        Ok(())
    }

    async fn step_mintings(&self, proof: Option<&AttestationProof>) -> AgentBotResult<()> {
        let open = self.ctx.store.open_mintings(&self.agent).await?;
        let lifecycle = MintingLifecycle::new(&self.ctx, &self.agent);
        for minting in open {
            let request_id = minting.request_id;
            if let Err(e) = lifecycle.step(minting, proof).await {
                error!(
                    "[engine] agent={} minting {} step failed: {}",
                    self.agent, request_id, e
                );
            }
        }
        Ok(())
    }

    async fn store_announcement(
        &self,
        valid_at: u64,
        action: TimelockAction,
    ) -> AgentBotResult<u64> {
        let mut schedule = self.ctx.schedule(&self.agent).await?;
        info!(
            "[engine] agent={} announced {}, valid at {}",
            self.agent,
            action.name(),
            valid_at
        );
        schedule.announce(valid_at, action);
        self.ctx.commit_schedule(&schedule).await?;
        Ok(valid_at)
    }
}

#[async_trait]
impl AgentOwnerApi for AgentBotEngine {
    async fn announce_vault_collateral_withdrawal(&self, amount: Amount) -> AgentBotResult<u64> {
        let _guard = self.step_lock.lock().await;
        let valid_at = self
            .ctx
            .ledger
            .announce_vault_collateral_withdrawal(&self.agent, amount)
            .await?;
        self.store_announcement(valid_at, TimelockAction::VaultCollateralWithdrawal { amount })
            .await
    }

    async fn announce_pool_token_redemption(&self, amount: Amount) -> AgentBotResult<u64> {
        let _guard = self.step_lock.lock().await;
        let valid_at = self
            .ctx
            .ledger
            .announce_pool_token_redemption(&self.agent, amount)
            .await?;
        self.store_announcement(valid_at, TimelockAction::PoolTokenRedemption { amount })
            .await
    }

    async fn announce_exit_available(&self) -> AgentBotResult<u64> {
        let _guard = self.step_lock.lock().await;
        let valid_at = self.ctx.ledger.announce_exit_available(&self.agent).await?;
        self.store_announcement(valid_at, TimelockAction::ExitAvailable)
            .await
    }

    async fn announce_setting_update(
        &self,
        setting: AgentSettingName,
        value: u128,
    ) -> AgentBotResult<u64> {
        let _guard = self.step_lock.lock().await;
        let valid_at = self
            .ctx
            .ledger
            .announce_agent_setting_update(&self.agent, setting, value)
            .await?;
        self.store_announcement(valid_at, TimelockAction::SettingUpdate { setting, value })
            .await
    }

    async fn announce_underlying_withdrawal(&self) -> AgentBotResult<u64> {
        let _guard = self.step_lock.lock().await;
        let (announced_at, reference) = self
            .ctx
            .ledger
            .announce_underlying_withdrawal(&self.agent)
            .await?;
        let mut schedule = self.ctx.schedule(&self.agent).await?;
        schedule.underlying_withdrawal =
            Some(UnderlyingWithdrawal::announced(announced_at, reference));
        self.ctx.commit_schedule(&schedule).await?;
        info!(
            "[engine] agent={} announced underlying withdrawal at {}",
            self.agent, announced_at
        );
        Ok(announced_at)
    }

    async fn perform_underlying_withdrawal(
        &self,
        destination: &str,
        amount: Amount,
    ) -> AgentBotResult<TxId> {
        let _guard = self.step_lock.lock().await;
        let mut schedule = self.ctx.schedule(&self.agent).await?;
        let Some(withdrawal) = schedule.underlying_withdrawal.as_mut() else {
            return Err(AgentBotError::NoUnderlyingWithdrawal {
                agent: self.agent.clone(),
            });
        };
        let tx_id = self
            .ctx
            .underlying
            .submit_payment(
                &self.underlying_address,
                destination,
                amount,
                Some(withdrawal.payment_reference),
            )
            .await?;
        withdrawal.payment_tx = Some(tx_id.clone());
        self.ctx.commit_schedule(&schedule).await?;
        info!(
            "[engine] agent={} paid underlying withdrawal of {} in {}",
            self.agent, amount, tx_id
        );
        Ok(tx_id)
    }

    async fn cancel_underlying_withdrawal(&self) -> AgentBotResult<()> {
        let _guard = self.step_lock.lock().await;
        let mut schedule = self.ctx.schedule(&self.agent).await?;
        let Some(withdrawal) = schedule.underlying_withdrawal.as_mut() else {
            return Err(AgentBotError::NoUnderlyingWithdrawal {
                agent: self.agent.clone(),
            });
        };
        withdrawal.cancel_requested = true;
        self.ctx.commit_schedule(&schedule).await
    }

    async fn begin_destruction(&self) -> AgentBotResult<()> {
        let _guard = self.step_lock.lock().await;
        let info = self.ctx.ledger.agent_info(&self.agent).await?;
        let mut schedule = self.ctx.schedule(&self.agent).await?;
        if info.publicly_available {
            let valid_at = self.ctx.ledger.announce_exit_available(&self.agent).await?;
            schedule.announce(valid_at, TimelockAction::ExitAvailable);
        }
        schedule.waiting_for_destruction_cleanup = true;
        self.ctx.commit_schedule(&schedule).await?;
        info!("[engine] agent={} destruction started", self.agent);
        Ok(())
    }
}
