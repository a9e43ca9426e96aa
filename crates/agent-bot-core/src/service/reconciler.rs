//! # Event Reconciler
//!
//! Reads the agent's finalized ledger logs past the watermark and applies
//! each one in its own unit of work together with the watermark advance.
//!
//! ## Failure handling
//!
//! A failing handler does not stop the batch. The event is queued in the
//! schedule's retry queue in the same commit that moves the watermark past
//! it, and re-applied at the start of later ticks until it succeeds or its
//! retry budget is spent.
//!
//! Handlers only touch the store. Anything that calls out to a chain is
//! returned as a [`FollowUp`] and run by the caller after the commit.

use super::context::AgentBotContext;
use crate::algorithms::{order_new_events, read_ranges};
use crate::domain::{
    AgentBotError, AgentBotResult, AgentSchedule, EventRecord, LedgerEvent, MintingRecord, MintingState,
    RedemptionFinalState, RedemptionRecord, RequestId,
};
use crate::ports::{Notification, StoreOperation, UnitOfWork};
use tracing::{debug, error, info, warn};

/// Chain-calling work triggered by an applied event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowUp {
    /// Prices changed: re-check collateral.
    CollateralCheck,
    /// A redemption closed: re-check the free underlying balance.
    UnderlyingBalanceCheck,
}

#[derive(Default)]
struct EventEffects {
    work: UnitOfWork,
    notifications: Vec<Notification>,
    follow_ups: Vec<FollowUp>,
    deactivate: bool,
}

impl EventEffects {
    fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Event reading for one agent.
pub struct EventReconciler<'a> {
    ctx: &'a AgentBotContext,
    agent: &'a str,
}

impl<'a> EventReconciler<'a> {
    /// Reconciler for `agent`.
    pub fn new(ctx: &'a AgentBotContext, agent: &'a str) -> Self {
        Self { ctx, agent }
    }

    /// Re-apply events queued by earlier failures.
    pub async fn retry_failed_events(&self) -> AgentBotResult<Vec<FollowUp>> {
        let mut schedule = self.ctx.schedule(self.agent).await?;
        let queued: Vec<EventRecord> = schedule
            .failed_events
            .iter()
            .map(|failed| failed.record.clone())
            .collect();
        let mut follow_ups = Vec::new();
        for record in queued {
            debug!(
                "[reconciler] agent={} retrying {} at {}",
                self.agent,
                record.event.name(),
                record.position
            );
            follow_ups.extend(self.apply(&mut schedule, record, Attempt::Retry).await?);
        }
        Ok(follow_ups)
    }

    /// Read and apply finalized events past the watermark.
    pub async fn read_new_events(&self) -> AgentBotResult<Vec<FollowUp>> {
        let mut schedule = self.ctx.schedule(self.agent).await?;
        let height = self.ctx.ledger.block_height().await?;
        let last_final = height.saturating_sub(self.ctx.config.native_finalization_blocks);
        let mut follow_ups = Vec::new();

        for (from, to) in read_ranges(
            schedule.watermark.next_block,
            last_final,
            self.ctx.config.read_logs_chunk_size,
        ) {
            let records = self.ctx.ledger.events(self.agent, from, to).await?;
            for record in order_new_events(records, &schedule.watermark) {
                follow_ups.extend(self.apply(&mut schedule, record, Attempt::First).await?);
                if !schedule.active {
                    break;
                }
            }
            schedule.watermark.finish_range(to);
            self.ctx.commit_schedule(&schedule).await?;
            if !schedule.active {
                info!("[reconciler] agent={} is no longer active", self.agent);
                break;
            }
        }
        Ok(follow_ups)
    }

    /// Apply one event and persist the outcome. `Err` only when the
    /// outcome itself could not be persisted.
    async fn apply(
        &self,
        schedule: &mut AgentSchedule,
        record: EventRecord,
        attempt: Attempt,
    ) -> AgentBotResult<Vec<FollowUp>> {
        let position = record.position;
        let failure = match self.handle(&record.event, schedule).await {
            Ok(effects) => {
                let mut updated = schedule.clone();
                match attempt {
                    Attempt::First => updated.watermark.record_applied(position)?,
                    Attempt::Retry => updated.forget_failure(position),
                }
                if effects.deactivate {
                    updated.active = false;
                }
                let mut work = effects.work;
                work.put_schedule(updated.clone());
                match self.ctx.store.commit(work).await {
                    Ok(()) => {
                        *schedule = updated;
                        for notification in effects.notifications {
                            self.ctx.notify(self.agent, notification);
                        }
                        return Ok(effects.follow_ups);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };

        error!(
            "[reconciler] agent={} {} at {} failed: {}",
            self.agent,
            record.event.name(),
            position,
            failure
        );
        let mut updated = schedule.clone();
        if attempt == Attempt::First {
            updated.watermark.record_applied(position)?;
        }
        let event_name = record.event.name();
        updated.record_failure(record);
        let exhausted = updated
            .failed_events
            .iter()
            .any(|f| f.record.position == position && f.attempts > self.ctx.config.max_event_retries);
        if exhausted {
            updated.forget_failure(position);
        }
        self.ctx.commit_schedule(&updated).await?;
        *schedule = updated;
        if exhausted {
            error!(
                "[reconciler] agent={} dropping {} at {} after {} retries",
                self.agent, event_name, position, self.ctx.config.max_event_retries
            );
            self.ctx.notify(
                self.agent,
                Notification::EventDropped {
                    position,
                    event: event_name,
                },
            );
        }
        Ok(Vec::new())
    }

    async fn handle(
        &self,
        event: &LedgerEvent,
        schedule: &AgentSchedule,
    ) -> AgentBotResult<EventEffects> {
        let mut effects = EventEffects::default();
        match event {
            LedgerEvent::CollateralReserved(reservation) => {
                if self.find_minting(reservation.request_id).await?.is_some() {
                    debug!(
                        "[reconciler] agent={} minting {} already recorded",
                        self.agent, reservation.request_id
                    );
                } else {
                    let minting = MintingRecord::from_reservation(
                        self.agent,
                        &schedule.underlying_address,
                        reservation,
                    );
                    effects.work.push(StoreOperation::InsertMinting(minting));
                    effects.notify(Notification::MintingStarted {
                        request_id: reservation.request_id,
                    });
                }
            }
            LedgerEvent::CollateralReservationDeleted { request_id } => {
                if self.close_minting(&mut effects, schedule, *request_id).await? {
                    effects.notify(Notification::MintingDeleted {
                        request_id: *request_id,
                    });
                }
            }
            LedgerEvent::MintingExecuted { request_id } => match request_id {
                Some(request_id) => {
                    if self.close_minting(&mut effects, schedule, *request_id).await? {
                        effects.notify(Notification::MintingExecuted {
                            request_id: *request_id,
                        });
                    }
                }
                None => {
                    info!("[reconciler] agent={} self-minting executed", self.agent);
                    effects.notify(Notification::SelfMintExecuted);
                }
            },
            LedgerEvent::RedemptionRequested(request) => {
                if self.find_redemption(request.request_id).await?.is_some() {
                    debug!(
                        "[reconciler] agent={} redemption {} already recorded",
                        self.agent, request.request_id
                    );
                } else {
                    let redemption = RedemptionRecord::from_request(self.agent, request);
                    effects.work.push(StoreOperation::InsertRedemption(redemption));
                    effects.notify(Notification::RedemptionStarted {
                        request_id: request.request_id,
                    });
                }
            }
            LedgerEvent::RedemptionDefault {
                request_id,
                redeemer,
            } => {
                if let Some(mut redemption) = self.find_redemption(*request_id).await? {
                    if !redemption.defaulted {
                        redemption.defaulted = true;
                        effects.work.update_redemption(redemption);
                        effects.notify(Notification::RedemptionDefaulted {
                            request_id: *request_id,
                            redeemer: redeemer.clone(),
                        });
                    }
                }
            }
            LedgerEvent::RedemptionPerformed { request_id, .. } => {
                if self
                    .close_redemption(
                        &mut effects,
                        schedule,
                        *request_id,
                        RedemptionFinalState::Performed,
                    )
                    .await?
                {
                    effects.notify(Notification::RedemptionPerformed {
                        request_id: *request_id,
                    });
                }
            }
            LedgerEvent::RedemptionPaymentFailed {
                request_id,
                failure_reason,
                ..
            } => {
                if self
                    .close_redemption(
                        &mut effects,
                        schedule,
                        *request_id,
                        RedemptionFinalState::Failed,
                    )
                    .await?
                {
                    effects.notify(Notification::RedemptionFailed {
                        request_id: *request_id,
                        reason: failure_reason.clone(),
                    });
                }
            }
            LedgerEvent::RedemptionPaymentBlocked { request_id, .. } => {
                if self
                    .close_redemption(
                        &mut effects,
                        schedule,
                        *request_id,
                        RedemptionFinalState::Blocked,
                    )
                    .await?
                {
                    effects.notify(Notification::RedemptionBlocked {
                        request_id: *request_id,
                    });
                }
            }
            LedgerEvent::AgentDestroyed => {
                if schedule.active {
                    effects.deactivate = true;
                    effects.notify(Notification::AgentDestroyed);
                }
            }
            LedgerEvent::PriceEpochFinalized { epoch } => {
                debug!("[reconciler] agent={} price epoch {}", self.agent, epoch);
                effects.follow_ups.push(FollowUp::CollateralCheck);
            }
            LedgerEvent::AgentInCcb { timestamp } => {
                effects.follow_ups.push(FollowUp::CollateralCheck);
                effects.notify(Notification::AgentInCcb {
                    timestamp: *timestamp,
                })
            }
            LedgerEvent::LiquidationStarted { timestamp } => {
                effects.follow_ups.push(FollowUp::CollateralCheck);
                effects.notify(Notification::LiquidationStarted {
                    timestamp: *timestamp,
                })
            }
            LedgerEvent::LiquidationEnded => effects.notify(Notification::LiquidationEnded),
            LedgerEvent::LiquidationPerformed { value } => {
                effects.notify(Notification::LiquidationPerformed { value: *value })
            }
            LedgerEvent::UnderlyingBalanceTooLow => {
                effects.notify(Notification::UnderlyingBalanceTooLow)
            }
            LedgerEvent::DuplicatePaymentConfirmed { tx_id_1, tx_id_2 } => {
                effects.notify(Notification::DuplicatePayment {
                    tx_id_1: tx_id_1.clone(),
                    tx_id_2: tx_id_2.clone(),
                })
            }
            LedgerEvent::IllegalPaymentConfirmed { tx_id } => {
                effects.notify(Notification::IllegalPayment {
                    tx_id: tx_id.clone(),
                })
            }
        }
        Ok(effects)
    }

    async fn find_minting(&self, request_id: RequestId) -> AgentBotResult<Option<MintingRecord>> {
        self.ctx.store.minting(self.agent, request_id).await
    }

    async fn find_redemption(
        &self,
        request_id: RequestId,
    ) -> AgentBotResult<Option<RedemptionRecord>> {
        self.ctx.store.redemption(self.agent, request_id).await
    }

    /// Move an open minting to Done. Returns whether this event closed it.
    /// Fails while the reservation event is still queued, so the closing
    /// event is queued behind it.
    async fn close_minting(
        &self,
        effects: &mut EventEffects,
        schedule: &AgentSchedule,
        request_id: RequestId,
    ) -> AgentBotResult<bool> {
        let Some(mut minting) = self.find_minting(request_id).await? else {
            if schedule.minting_creation_queued(request_id) {
                return Err(AgentBotError::CreationPending {
                    kind: "minting",
                    request_id,
                });
            }
            warn!(
                "[reconciler] agent={} closing event for unknown minting {}",
                self.agent, request_id
            );
            return Ok(false);
        };
        if minting.state.is_terminal() {
            return Ok(false);
        }
        minting.transition_to(MintingState::Done)?;
        effects.work.update_minting(minting);
        Ok(true)
    }

    /// Close an open redemption with a ledger outcome. Returns whether this
    /// event closed it.
    async fn close_redemption(
        &self,
        effects: &mut EventEffects,
        schedule: &AgentSchedule,
        request_id: RequestId,
        outcome: RedemptionFinalState,
    ) -> AgentBotResult<bool> {
        let Some(mut redemption) = self.find_redemption(request_id).await? else {
            if schedule.redemption_creation_queued(request_id) {
                return Err(AgentBotError::CreationPending {
                    kind: "redemption",
                    request_id,
                });
            }
            warn!(
                "[reconciler] agent={} closing event for unknown redemption {}",
                self.agent, request_id
            );
            return Ok(false);
        };
        if !redemption.finish(outcome)? {
            return Ok(false);
        }
        effects.work.update_redemption(redemption);
        effects.follow_ups.push(FollowUp::UnderlyingBalanceCheck);
        Ok(true)
    }
}
