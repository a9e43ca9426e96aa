//! # Timelock Executor
//!
//! Executes announced actions once their timelock passed, settles the
//! announced underlying withdrawal and drives destruction cleanup. Every
//! schedule change is committed right after the ledger call it records.

use super::context::AgentBotContext;
use crate::domain::{
    AgentBotResult, AgentSchedule, TimelockAction, TimelockEntry,
    DESTROY_POOL_TOKEN_REDEMPTION, DESTROY_VAULT_COLLATERAL_WITHDRAWAL,
};
use crate::ports::Notification;
use tracing::{debug, error, info, warn};

/// Timelock execution for one agent.
pub struct TimelockExecutor<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> TimelockExecutor<'a> {
    /// Executor for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Execute due entries, then settle withdrawals and continue cleanup.
    pub async fn run(&self) -> AgentBotResult<()> {
        let mut schedule = self.ctx.schedule(self.agent).await?;
        let now = self.ctx.ledger.latest_timestamp().await?;

        for entry in schedule.due_timelocks(now) {
            self.execute(&mut schedule, entry).await?;
            if !schedule.active {
                return Ok(());
            }
        }
        self.settle_underlying_withdrawal(&mut schedule, now).await?;
        self.destruction_cleanup(&mut schedule).await
    }

    async fn execute(
        &self,
        schedule: &mut AgentSchedule,
        entry: TimelockEntry,
    ) -> AgentBotResult<()> {
        debug!(
            "[timelocks] agent={} executing {} (valid at {})",
            self.agent, entry.name, entry.valid_at
        );
        let ledger = &self.ctx.ledger;
        let result = match &entry.action {
            TimelockAction::VaultCollateralWithdrawal { amount }
            | TimelockAction::DestroyVaultCollateralWithdrawal { amount } => {
                ledger.withdraw_vault_collateral(self.agent, *amount).await
            }
            TimelockAction::PoolTokenRedemption { amount }
            | TimelockAction::DestroyPoolTokenRedemption { amount } => {
                ledger.redeem_collateral_pool_tokens(self.agent, *amount).await
            }
            TimelockAction::ExitAvailable => ledger.exit_available(self.agent).await,
            TimelockAction::SettingUpdate { setting, .. } => {
                ledger
                    .execute_agent_setting_update(self.agent, *setting)
                    .await
            }
            TimelockAction::Destroy => ledger.destroy(self.agent).await,
        };

        match result {
            Ok(()) => {
                info!("[timelocks] agent={} executed {}", self.agent, entry.name);
                schedule.clear(&entry.name);
                if entry.action == TimelockAction::Destroy {
                    schedule.active = false;
                }
                self.ctx.commit_schedule(schedule).await?;
                self.ctx.notify(
                    self.agent,
                    Notification::TimelockExecuted {
                        name: entry.name.clone(),
                    },
                );
                match entry.action {
                    TimelockAction::SettingUpdate { setting, .. } => self
                        .ctx
                        .notify(self.agent, Notification::SettingUpdated { setting }),
                    TimelockAction::ExitAvailable => {
                        self.ctx.notify(self.agent, Notification::ExitedAvailable)
                    }
                    TimelockAction::Destroy => {
                        self.ctx.notify(self.agent, Notification::AgentDestroyed)
                    }
                    _ => {}
                }
                Ok(())
            }
            Err(e) if e.is_lapsed_timelock() => {
                warn!(
                    "[timelocks] agent={} {} lapsed: {}",
                    self.agent, entry.name, e
                );
                schedule.clear(&entry.name);
                self.ctx.commit_schedule(schedule).await?;
                self.ctx.notify(
                    self.agent,
                    Notification::TimelockLapsed {
                        name: entry.name,
                        reason: e.to_string(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "[timelocks] agent={} {} failed, kept for next tick: {}",
                    self.agent, entry.name, e
                );
                Ok(())
            }
        }
    }

    async fn settle_underlying_withdrawal(
        &self,
        schedule: &mut AgentSchedule,
        now: u64,
    ) -> AgentBotResult<()> {
        let Some(withdrawal) = schedule.underlying_withdrawal.clone() else {
            return Ok(());
        };
        let settings = self.ctx.ledger.settings().await?;
        if !withdrawal.can_settle(now, settings.announced_underlying_confirmation_min_seconds) {
            return Ok(());
        }

        if withdrawal.cancel_requested {
            self.ctx
                .ledger
                .cancel_underlying_withdrawal(self.agent)
                .await?;
            info!("[timelocks] agent={} underlying withdrawal cancelled", self.agent);
            schedule.underlying_withdrawal = None;
            self.ctx.commit_schedule(schedule).await?;
            self.ctx
                .notify(self.agent, Notification::UnderlyingWithdrawalCancelled);
        } else if let Some(tx_id) = withdrawal.payment_tx {
            self.ctx
                .ledger
                .confirm_underlying_withdrawal(self.agent, &tx_id)
                .await?;
            info!(
                "[timelocks] agent={} underlying withdrawal {} confirmed",
                self.agent, tx_id
            );
            schedule.underlying_withdrawal = None;
            self.ctx.commit_schedule(schedule).await?;
            self.ctx
                .notify(self.agent, Notification::UnderlyingWithdrawalConfirmed { tx_id });
        }
        Ok(())
    }

    async fn destruction_cleanup(&self, schedule: &mut AgentSchedule) -> AgentBotResult<()> {
        if !schedule.waiting_for_destruction_cleanup || schedule.cleanup_blocked() {
            return Ok(());
        }
        let ledger = &self.ctx.ledger;

        if schedule.pending_self_close.is_none() {
            let fees = ledger.pool_fee_balance(self.agent).await?;
            if fees > 0 {
                info!(
                    "[timelocks] agent={} withdrawing {} pool fees",
                    self.agent, fees
                );
                ledger.withdraw_pool_fees(self.agent, fees).await?;
                schedule.pending_self_close = Some(fees);
                self.ctx.commit_schedule(schedule).await?;
            }
        }
        if let Some(amount) = schedule.pending_self_close {
            ledger.self_close(self.agent, amount).await?;
            info!(
                "[timelocks] agent={} self-closed {} withdrawn pool fees",
                self.agent, amount
            );
            schedule.pending_self_close = None;
            self.ctx.commit_schedule(schedule).await?;
        }

        let info = ledger.agent_info(self.agent).await?;
        let nothing_backed = info.has_no_backed_fassets();

        if nothing_backed
            && info.free_vault_collateral_wei > 0
            && schedule.pending(DESTROY_VAULT_COLLATERAL_WITHDRAWAL).is_none()
        {
            let amount = info.free_vault_collateral_wei;
            let valid_at = ledger
                .announce_vault_collateral_withdrawal(self.agent, amount)
                .await?;
            info!(
                "[timelocks] agent={} announced cleanup withdrawal of {} vault collateral",
                self.agent, amount
            );
            schedule.announce(
                valid_at,
                TimelockAction::DestroyVaultCollateralWithdrawal { amount },
            );
            self.ctx.commit_schedule(schedule).await?;
        }

        let pool_tokens = ledger.pool_token_balance(self.agent).await?;
        if nothing_backed
            && pool_tokens > 0
            && schedule.pending(DESTROY_POOL_TOKEN_REDEMPTION).is_none()
        {
            let valid_at = ledger
                .announce_pool_token_redemption(self.agent, pool_tokens)
                .await?;
            info!(
                "[timelocks] agent={} announced cleanup redemption of {} pool tokens",
                self.agent, pool_tokens
            );
            schedule.announce(
                valid_at,
                TimelockAction::DestroyPoolTokenRedemption {
                    amount: pool_tokens,
                },
            );
            self.ctx.commit_schedule(schedule).await?;
        }

        let supply = ledger.pool_token_total_supply(self.agent).await?;
        if nothing_backed && supply == 0 && info.total_vault_collateral_wei == 0 {
            let valid_at = ledger.announce_destroy(self.agent).await?;
            info!(
                "[timelocks] agent={} announced destroy, valid at {}",
                self.agent, valid_at
            );
            schedule.announce(valid_at, TimelockAction::Destroy);
            schedule.waiting_for_destruction_cleanup = false;
            self.ctx.commit_schedule(schedule).await?;
            self.ctx.notify(self.agent, Notification::DestroyAnnounced);
        }
        Ok(())
    }
}
