//! # Collateral and Underlying Top-ups
//!
//! Collateral is topped up after every price epoch so that each class covers
//! the agent's backed value at the warning-band ratio plus a margin. The
//! free underlying balance is topped up from the owner once it can no longer
//! pay a few transaction fees. Collateral failures are notified and not
//! retried; the next trigger re-evaluates from scratch. An underlying top-up
//! stays open on the schedule until the ledger credited it.

use super::context::AgentBotContext;
use crate::algorithms::payment_reference;
use crate::algorithms::{confirmation_depth_reached, required_top_up, underlying_top_up_amount};
use crate::domain::{
    AgentBotError, AgentBotResult, AgentSchedule, Amount, CollateralClass, PaymentReference,
    ProofOutcome, TopUpState, TxId, UnderlyingTopUpPayment, MAX_BIPS,
};
use crate::ports::{Notification, PaymentQuery};
use tracing::{debug, error, info, warn};

/// Vault and pool collateral top-up for one agent.
pub struct CollateralTopUp<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> CollateralTopUp<'a> {
    /// Top-up checks for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Top up both classes where short, then check the owner's balances.
    pub async fn check(&self) -> AgentBotResult<()> {
        let info = self.ctx.ledger.agent_info(self.agent).await?;
        for class in CollateralClass::ALL {
            let price = self.ctx.ledger.collateral_price(self.agent, class).await?;
            let required = required_top_up(
                &price,
                info.backed_uba(class),
                info.collateral_balance(class),
                self.ctx.config.collateral_top_up_factor_bips,
            );
            if required == 0 {
                continue;
            }
            info!(
                "[top-up] agent={} {:?} collateral short by {}",
                self.agent, class, required
            );
            let result = match class {
                CollateralClass::Vault => {
                    self.ctx
                        .ledger
                        .deposit_vault_collateral(self.agent, required)
                        .await
                }
                CollateralClass::Pool => {
                    self.ctx
                        .ledger
                        .buy_collateral_pool_tokens(self.agent, required)
                        .await
                }
            };
            match result {
                Ok(()) => self.ctx.notify(
                    self.agent,
                    Notification::CollateralToppedUp {
                        class,
                        amount: required,
                    },
                ),
                Err(e) => {
                    error!(
                        "[top-up] agent={} {:?} top-up of {} failed: {}",
                        self.agent, class, required, e
                    );
                    self.ctx.notify(
                        self.agent,
                        Notification::CollateralTopUpFailed {
                            class,
                            amount: required,
                        },
                    );
                }
            }
        }
        self.check_owner_balances(&info.owner).await
    }

    async fn check_owner_balances(&self, owner: &str) -> AgentBotResult<()> {
        for class in CollateralClass::ALL {
            let threshold = match class {
                CollateralClass::Vault => self.ctx.config.owner_low_vault_collateral_balance,
                CollateralClass::Pool => self.ctx.config.owner_low_native_balance,
            };
            let balance = self.ctx.ledger.owner_balance(owner, class).await?;
            if balance <= threshold {
                warn!(
                    "[top-up] owner {} {:?} balance {} at or below {}",
                    owner, class, balance, threshold
                );
                self.ctx
                    .notify(self.agent, Notification::LowOwnerBalance { class, balance });
            }
        }
        Ok(())
    }
}

/// Free underlying balance top-up for one agent.
///
/// ```text
/// Requested ──pay──→ Paid ──confirmed depth──→ AwaitingProof ──proved──→ (cleared)
/// ```
///
/// The open top-up lives on the agent schedule. It is written before the
/// owner pays and cleared only once the ledger credited it, so at most one
/// top-up is in flight and a failed confirmation never pays again.
pub struct UnderlyingTopUp<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> UnderlyingTopUp<'a> {
    /// Underlying checks for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Start a top-up from the owner when the free balance is too low.
    /// While a top-up is open it is advanced instead.
    pub async fn check(&self) -> AgentBotResult<()> {
        let owner_address = self.ctx.config.owner_underlying_address.as_str();
        if owner_address.is_empty() {
            warn!(
                "[top-up] agent={} no owner underlying address configured",
                self.agent
            );
            return Ok(());
        }
        let mut schedule = self.ctx.schedule(self.agent).await?;
        if schedule.underlying_top_up.is_some() {
            debug!(
                "[top-up] agent={} underlying top-up still open, not starting another",
                self.agent
            );
            return self.step().await;
        }

        let info = self.ctx.ledger.agent_info(self.agent).await?;
        let fee = self.ctx.underlying.transaction_fee().await?;
        let factor = self.ctx.config.underlying_top_up_factor_bips;

        if let Some(amount) =
            underlying_top_up_amount(info.free_underlying_balance_uba, fee, factor)
        {
            info!(
                "[top-up] agent={} free underlying balance {} too low, topping up {}",
                self.agent, info.free_underlying_balance_uba, amount
            );
            let height = self.ctx.underlying.block_height().await?;
            schedule.underlying_top_up = Some(UnderlyingTopUpPayment::requested(
                owner_address,
                amount,
                height,
            ));
            self.ctx.commit_schedule(&schedule).await?;
            self.step().await?;
        }

        let balance = self.ctx.underlying.balance(owner_address).await?;
        let reserve = fee.saturating_mul(Amount::from(factor)) / Amount::from(MAX_BIPS);
        let threshold = self
            .ctx
            .config
            .owner_underlying_min_balance
            .saturating_add(reserve);
        if balance <= threshold {
            warn!(
                "[top-up] owner underlying balance {} at or below {}",
                balance, threshold
            );
            self.ctx
                .notify(self.agent, Notification::LowOwnerUnderlyingBalance { balance });
        }
        Ok(())
    }

    /// Advance the open top-up, if any, by at most one phase.
    pub async fn step(&self) -> AgentBotResult<()> {
        let schedule = self.ctx.schedule(self.agent).await?;
        let Some(top_up) = schedule.underlying_top_up.clone() else {
            return Ok(());
        };
        match top_up.state {
            TopUpState::Requested => self.pay(schedule, top_up).await,
            TopUpState::Paid => self.request_proof(schedule, top_up).await,
            TopUpState::AwaitingProof => self.confirm(schedule, top_up).await,
        }
    }

    async fn pay(
        &self,
        mut schedule: AgentSchedule,
        top_up: UnderlyingTopUpPayment,
    ) -> AgentBotResult<()> {
        let reference = payment_reference::top_up(self.agent);
        if let Some(tx_id) = self.earlier_payment(&top_up, &reference).await? {
            warn!(
                "[top-up] agent={} found earlier top-up payment {}",
                self.agent, tx_id
            );
            return self.mark_paid(schedule, top_up, tx_id).await;
        }
        let paid = self
            .ctx
            .underlying
            .submit_payment(
                &top_up.source,
                &schedule.underlying_address,
                top_up.amount,
                Some(reference),
            )
            .await;
        match paid {
            Ok(tx_id) => self.mark_paid(schedule, top_up, tx_id).await,
            Err(e) => {
                error!(
                    "[top-up] agent={} underlying top-up of {} failed: {}",
                    self.agent, top_up.amount, e
                );
                let amount = top_up.amount;
                schedule.underlying_top_up = None;
                self.ctx.commit_schedule(&schedule).await?;
                self.ctx
                    .notify(self.agent, Notification::UnderlyingTopUpFailed { amount });
                Ok(())
            }
        }
    }

    async fn earlier_payment(
        &self,
        top_up: &UnderlyingTopUpPayment,
        reference: &PaymentReference,
    ) -> AgentBotResult<Option<TxId>> {
        let found = self
            .ctx
            .underlying
            .transactions_by_reference(reference)
            .await?;
        Ok(found
            .into_iter()
            .filter(|tx| tx.first_input() == Some(&top_up.source))
            .find(|tx| {
                tx.block_number
                    .map_or(true, |block| block >= top_up.requested_at_block)
            })
            .map(|tx| tx.tx_id))
    }

    async fn mark_paid(
        &self,
        mut schedule: AgentSchedule,
        mut top_up: UnderlyingTopUpPayment,
        tx_id: TxId,
    ) -> AgentBotResult<()> {
        let amount = top_up.amount;
        top_up.mark_paid(tx_id.clone());
        schedule.underlying_top_up = Some(top_up);
        self.ctx.commit_schedule(&schedule).await?;
        info!(
            "[top-up] agent={} owner paid underlying top-up {} in {}",
            self.agent, amount, tx_id
        );
        self.ctx
            .notify(self.agent, Notification::UnderlyingTopUpPaid { amount, tx_id });
        Ok(())
    }

    async fn request_proof(
        &self,
        mut schedule: AgentSchedule,
        mut top_up: UnderlyingTopUpPayment,
    ) -> AgentBotResult<()> {
        let Some(tx_id) = top_up.payment_tx.clone() else {
            return Err(AgentBotError::IncompleteTopUp {
                state: format!("{:?}", top_up.state),
                field: "payment transaction",
            });
        };
        let Some(block_number) = self
            .ctx
            .underlying
            .transaction(&tx_id)
            .await?
            .and_then(|tx| tx.block_number)
        else {
            debug!(
                "[top-up] agent={} payment {} not included yet",
                self.agent, tx_id
            );
            return Ok(());
        };
        let height = self.ctx.underlying.block_height().await?;
        if !confirmation_depth_reached(height, block_number, self.ctx.underlying.finalization_blocks())
        {
            return Ok(());
        }
        let query = PaymentQuery {
            tx_id: tx_id.clone(),
            block_number,
            source: top_up.source.clone(),
            target: schedule.underlying_address.clone(),
        };
        let Some(request) = self.ctx.attestation.request_payment_proof(&query).await? else {
            info!(
                "[top-up] agent={} cannot yet request payment proof for {}",
                self.agent, tx_id
            );
            return Ok(());
        };
        info!(
            "[top-up] agent={} requested payment proof for {} in round {}",
            self.agent, tx_id, request.round
        );
        top_up.await_proof(request);
        schedule.underlying_top_up = Some(top_up);
        self.ctx.commit_schedule(&schedule).await
    }

    async fn confirm(
        &self,
        mut schedule: AgentSchedule,
        top_up: UnderlyingTopUpPayment,
    ) -> AgentBotResult<()> {
        let (Some(request), Some(tx_id)) = (top_up.proof_request.clone(), top_up.payment_tx.clone())
        else {
            return Err(AgentBotError::IncompleteTopUp {
                state: format!("{:?}", top_up.state),
                field: "proof request",
            });
        };
        let amount = top_up.amount;
        match self.ctx.attestation.obtain_proof(&request).await? {
            ProofOutcome::NotFinalized => {
                debug!(
                    "[top-up] agent={} proof for {} not finalized in round {}",
                    self.agent, tx_id, request.round
                );
                Ok(())
            }
            ProofOutcome::Proved(proof) => {
                self.ctx
                    .ledger
                    .confirm_top_up_payment(self.agent, &proof)
                    .await?;
                schedule.underlying_top_up = None;
                self.ctx.commit_schedule(&schedule).await?;
                info!(
                    "[top-up] agent={} underlying top-up {} confirmed",
                    self.agent, tx_id
                );
                self.ctx
                    .notify(self.agent, Notification::UnderlyingToppedUp { amount, tx_id });
                Ok(())
            }
            ProofOutcome::NotProved => {
                error!(
                    "[top-up] agent={} proof for top-up {} in round {} not proved",
                    self.agent, tx_id, request.round
                );
                schedule.underlying_top_up = None;
                self.ctx.commit_schedule(&schedule).await?;
                self.ctx
                    .notify(self.agent, Notification::UnderlyingTopUpFailed { amount });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::UnderlyingChainClient;
    use crate::service::testkit::TestBed;

    #[tokio::test]
    async fn test_collateral_shortfall_is_deposited() {
        let bed = TestBed::new().await;
        bed.ledger.update_agent_info(TestBed::AGENT, |info| {
            info.minted_uba = 1_000;
            info.total_vault_collateral_wei = 1_500;
            info.total_pool_collateral_nat_wei = 10_000;
        });
        bed.ledger
            .set_owner_balance(TestBed::OWNER, CollateralClass::Vault, 10_000);

        CollateralTopUp::new(&bed.ctx, TestBed::AGENT)
            .check()
            .await
            .unwrap();

        // 1000 * 1.5 * 1.2 = 1800 required, 1500 held
        let deposits: Vec<_> = bed
            .ledger
            .calls()
            .into_iter()
            .filter(|c| c.method == "depositVaultCollateral")
            .collect();
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].amount, Some(300));
        assert_eq!(bed.ledger.call_count("buyCollateralPoolTokens"), 0);
        assert_eq!(
            bed.notifier.count(|n| matches!(
                n,
                Notification::CollateralToppedUp {
                    class: CollateralClass::Vault,
                    amount: 300
                }
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_top_up_is_notified() {
        let bed = TestBed::new().await;
        bed.ledger.update_agent_info(TestBed::AGENT, |info| {
            info.minted_uba = 1_000;
        });

        CollateralTopUp::new(&bed.ctx, TestBed::AGENT)
            .check()
            .await
            .unwrap();

        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::CollateralTopUpFailed { .. })),
            2
        );
        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::LowOwnerBalance { .. })),
            2
        );
    }

    async fn open_top_up(bed: &TestBed) -> Option<TopUpState> {
        bed.schedule().await.underlying_top_up.map(|t| t.state)
    }

    #[tokio::test]
    async fn test_underlying_top_up_from_owner() {
        let bed = TestBed::new().await;
        bed.chain.fund(TestBed::OWNER_UNDERLYING, 1_000);
        let top_up = UnderlyingTopUp::new(&bed.ctx, TestBed::AGENT);

        top_up.check().await.unwrap();

        // fee 10 * 1.2
        let payments = bed.chain.payments_from(TestBed::OWNER_UNDERLYING);
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].outputs[0], (TestBed::AGENT_UNDERLYING.to_string(), 12));
        assert_eq!(open_top_up(&bed).await, Some(TopUpState::Paid));
        assert_eq!(bed.ledger.call_count("confirmTopupPayment"), 0);

        // confirmation depth not reached
        top_up.step().await.unwrap();
        assert_eq!(open_top_up(&bed).await, Some(TopUpState::Paid));

        bed.chain.mine(3);
        top_up.step().await.unwrap();
        assert_eq!(open_top_up(&bed).await, Some(TopUpState::AwaitingProof));

        bed.attestation.finalize_rounds();
        top_up.step().await.unwrap();
        assert_eq!(open_top_up(&bed).await, None);
        assert_eq!(
            bed.ledger.info(TestBed::AGENT).unwrap().free_underlying_balance_uba,
            12
        );
        assert_eq!(bed.ledger.call_count("confirmTopupPayment"), 1);
        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::UnderlyingToppedUp { amount: 12, .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_confirmation_does_not_pay_again() {
        let bed = TestBed::new().await;
        bed.chain.fund(TestBed::OWNER_UNDERLYING, 1_000);
        let top_up = UnderlyingTopUp::new(&bed.ctx, TestBed::AGENT);
        top_up.check().await.unwrap();
        bed.chain.mine(3);
        top_up.step().await.unwrap();
        bed.attestation.finalize_rounds();

        bed.ledger.fail_next("confirmTopupPayment", 1);
        assert!(top_up.step().await.is_err());
        assert_eq!(open_top_up(&bed).await, Some(TopUpState::AwaitingProof));

        // the balance still looks low, but the open top-up is confirmed instead
        top_up.check().await.unwrap();
        assert_eq!(bed.chain.payments_from(TestBed::OWNER_UNDERLYING).len(), 1);
        assert_eq!(open_top_up(&bed).await, None);
        assert_eq!(
            bed.ledger.info(TestBed::AGENT).unwrap().free_underlying_balance_uba,
            12
        );
    }

    #[tokio::test]
    async fn test_payment_before_crash_is_adopted() {
        let bed = TestBed::new().await;
        bed.chain.fund(TestBed::OWNER_UNDERLYING, 1_000);
        // decided and paid, but the Paid phase never got committed
        let mut schedule = bed.schedule().await;
        let height = bed.chain.tip().number;
        schedule.underlying_top_up = Some(UnderlyingTopUpPayment::requested(
            TestBed::OWNER_UNDERLYING,
            12,
            height,
        ));
        bed.ctx.commit_schedule(&schedule).await.unwrap();
        let tx_id = bed
            .chain
            .submit_payment(
                TestBed::OWNER_UNDERLYING,
                TestBed::AGENT_UNDERLYING,
                12,
                Some(payment_reference::top_up(TestBed::AGENT)),
            )
            .await
            .unwrap();

        UnderlyingTopUp::new(&bed.ctx, TestBed::AGENT)
            .step()
            .await
            .unwrap();

        let open = bed.schedule().await.underlying_top_up.unwrap();
        assert_eq!(open.state, TopUpState::Paid);
        assert_eq!(open.payment_tx, Some(tx_id));
        assert_eq!(bed.chain.payments_from(TestBed::OWNER_UNDERLYING).len(), 1);
    }

    #[tokio::test]
    async fn test_unfunded_owner_is_reported_once() {
        let bed = TestBed::new().await;
        UnderlyingTopUp::new(&bed.ctx, TestBed::AGENT)
            .check()
            .await
            .unwrap();

        assert_eq!(open_top_up(&bed).await, None);
        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::UnderlyingTopUpFailed { amount: 12 })),
            1
        );
        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::LowOwnerUnderlyingBalance { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_no_underlying_top_up_when_funded() {
        let bed = TestBed::new().await;
        bed.chain.fund(TestBed::OWNER_UNDERLYING, 1_000);
        bed.ledger.update_agent_info(TestBed::AGENT, |info| {
            info.free_underlying_balance_uba = 500;
        });

        UnderlyingTopUp::new(&bed.ctx, TestBed::AGENT)
            .check()
            .await
            .unwrap();

        assert!(bed.chain.payments_from(TestBed::OWNER_UNDERLYING).is_empty());
        assert_eq!(
            bed.notifier
                .count(|n| matches!(n, Notification::LowOwnerUnderlyingBalance { .. })),
            0
        );
    }
}
