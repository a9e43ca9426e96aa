//! # Redemption Scenarios
//!
//! Redemption requests driven by engine ticks: paid and confirmed, left
//! unpaid until the proof window closes, parked for third-party
//! confirmation, and processed under the per-tick cap.

#[cfg(test)]
mod tests {
    use agent_bot_core::{
        AgentBotConfig, LedgerEvent, Notification, RedemptionFinalState, RedemptionState,
    };

    use super::super::harness::{Devnet, AGENT, OWNER_UNDERLYING};

    fn lifecycle_notifications(devnet: &Devnet) -> Vec<&'static str> {
        devnet
            .notifier
            .notifications()
            .iter()
            .filter_map(|(_, n)| match n {
                Notification::RedemptionStarted { .. } => Some("started"),
                Notification::RedemptionPaid { .. } => Some("paid"),
                Notification::RedemptionProofRequested { .. } => Some("proof requested"),
                Notification::RedemptionPerformed { .. } => Some("performed"),
                Notification::RedemptionExpired { .. } => Some("expired"),
                Notification::RedemptionDefaulted { .. } => Some("defaulted"),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // SCENARIO D: PAID IN TIME
    // =========================================================================

    #[tokio::test]
    async fn test_paid_redemption_is_confirmed_once() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.redeem(2).await;

        engine.run_step().await.unwrap();
        let paid = devnet.redemption(id).await;
        assert_eq!(paid.state, RedemptionState::Paid);
        assert_eq!(devnet.agent_payments_to_redeemer(), 1);
        let payment = devnet
            .chain
            .find_transaction(paid.payment_tx.as_deref().unwrap())
            .unwrap();
        assert_eq!(payment.reference, Some(paid.payment_reference));
        // value minus the 1% redemption fee
        assert_eq!(payment.outputs[0], ("rRedeemer".to_string(), 990));

        // not deep enough yet
        devnet.chain.mine(2);
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(id).await.state, RedemptionState::Paid);

        devnet.chain.mine(1);
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.redemption(id).await.state,
            RedemptionState::AwaitingProof
        );

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        let done = devnet.redemption(id).await;
        assert_eq!(done.state, RedemptionState::Done);
        assert_eq!(done.final_state, Some(RedemptionFinalState::Performed));
        assert_eq!(devnet.ledger.call_count("confirmRedemptionPayment"), 1);

        // the ledger's RedemptionPerformed event changes nothing
        devnet.settle();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.call_count("confirmRedemptionPayment"), 1);
        assert_eq!(devnet.agent_payments_to_redeemer(), 1);
        assert_eq!(
            lifecycle_notifications(&devnet),
            vec!["started", "paid", "proof requested", "performed"]
        );
    }

    // =========================================================================
    // SCENARIO E: PROOF WINDOW EXPIRES WHILE STARTED
    // =========================================================================

    #[tokio::test]
    async fn test_unpaid_redemption_finishes_without_payment() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.redeem(1).await;

        // the bot comes up a day late: no time left to pay
        devnet.chain.mine(20_000);
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(id).await.state, RedemptionState::Started);
        assert_eq!(devnet.agent_payments_to_redeemer(), 0);

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        let done = devnet.redemption(id).await;
        assert_eq!(done.state, RedemptionState::Done);
        assert_eq!(
            done.final_state,
            Some(RedemptionFinalState::FinishedWithoutPayment)
        );
        assert!(done.payment_tx.is_none());
        assert_eq!(devnet.ledger.call_count("finishRedemptionWithoutPayment"), 1);
        assert_eq!(devnet.ledger.call_count("confirmRedemptionPayment"), 0);

        // the ledger pays the redeemer from collateral
        devnet.settle();
        engine.run_step().await.unwrap();
        assert!(devnet.redemption(id).await.defaulted);
        assert_eq!(devnet.ledger.call_count("finishRedemptionWithoutPayment"), 1);
        assert_eq!(
            lifecycle_notifications(&devnet),
            vec!["started", "expired", "defaulted"]
        );
    }

    // =========================================================================
    // THIRD-PARTY CONFIRMATION
    // =========================================================================

    #[tokio::test]
    async fn test_parked_redemption_closes_on_ledger_event() {
        let devnet = Devnet::with_config(AgentBotConfig {
            owner_underlying_address: OWNER_UNDERLYING.to_string(),
            confirm_redemption_payments: false,
            ..AgentBotConfig::default()
        });
        let engine = devnet.engine().await;
        let id = devnet.redeem(1).await;

        engine.run_step().await.unwrap();
        devnet.chain.mine(3);
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.redemption(id).await.state,
            RedemptionState::ProofNotRequested
        );

        devnet.ledger.emit(
            AGENT,
            LedgerEvent::RedemptionPerformed {
                request_id: id,
                redeemer: "0xredeemer".to_string(),
            },
        );
        devnet.settle();
        engine.run_step().await.unwrap();

        let done = devnet.redemption(id).await;
        assert_eq!(done.state, RedemptionState::Done);
        assert_eq!(done.final_state, Some(RedemptionFinalState::Performed));
        assert_eq!(devnet.ledger.call_count("confirmRedemptionPayment"), 0);
    }

    // =========================================================================
    // PRIORITY CAP
    // =========================================================================

    #[tokio::test]
    async fn test_started_redemptions_bypass_the_cap() {
        let devnet = Devnet::with_config(AgentBotConfig {
            owner_underlying_address: OWNER_UNDERLYING.to_string(),
            max_non_priority_redemptions: 1,
            ..AgentBotConfig::default()
        });
        let engine = devnet.engine().await;
        let first = devnet.redeem(1).await;
        let second = devnet.redeem(1).await;
        let third = devnet.redeem(1).await;

        // every Started redemption is paid in the same tick
        engine.run_step().await.unwrap();
        assert_eq!(devnet.agent_payments_to_redeemer(), 3);

        // past confirmation depth only one Paid record is handled per tick
        devnet.chain.mine(3);
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.redemption(first).await.state,
            RedemptionState::AwaitingProof
        );
        assert_eq!(devnet.redemption(second).await.state, RedemptionState::Paid);
        assert_eq!(devnet.redemption(third).await.state, RedemptionState::Paid);

        // a new request still gets paid while the cap is used up
        let fourth = devnet.redeem(1).await;
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(fourth).await.state, RedemptionState::Paid);
        assert_eq!(devnet.redemption(second).await.state, RedemptionState::Paid);

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(first).await.state, RedemptionState::Done);
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.redemption(second).await.state,
            RedemptionState::AwaitingProof
        );
        assert_eq!(devnet.redemption(third).await.state, RedemptionState::Paid);
    }
}
