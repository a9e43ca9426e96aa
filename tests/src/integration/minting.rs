//! # Minting Scenarios
//!
//! A reservation driven by engine ticks to each of its three endings:
//!
//! 1. **Paid**: minter pays, payment proof, execute-minting
//! 2. **Unpaid**: deadline passes, non-payment proof, payment default
//! 3. **Stuck**: proof window expires first, unstick via the daily scan

#[cfg(test)]
mod tests {
    use agent_bot_core::{MintingState, Notification};

    use super::super::harness::{Devnet, AGENT};

    /// Append `state` unless it repeats the last observation.
    fn observe(seen: &mut Vec<MintingState>, state: MintingState) {
        if seen.last() != Some(&state) {
            seen.push(state);
        }
    }

    // =========================================================================
    // SCENARIO A: MINTER PAYS IN TIME
    // =========================================================================

    #[tokio::test]
    async fn test_paid_reservation_is_executed_once() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let id = devnet.reserve(2).await;
        let mut seen = Vec::new();

        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        // payment lands, then the deadline passes (window 10 + finality 3)
        devnet.pay_minting(id).await;
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        // round not finalized: nothing moves
        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        assert_eq!(
            seen,
            vec![
                MintingState::Started,
                MintingState::AwaitingPaymentProof,
                MintingState::Done
            ]
        );
        assert_eq!(devnet.ledger.call_count("executeMinting"), 1);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 0);
        assert_eq!(devnet.ledger.info(AGENT).unwrap().minted_uba, 1_000);

        // the ledger's own MintingExecuted event arrives later and changes nothing
        devnet.settle();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Done);
        assert_eq!(devnet.ledger.call_count("executeMinting"), 1);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::MintingExecuted { .. })),
            1
        );
    }

    // =========================================================================
    // SCENARIO B: MINTER NEVER PAYS
    // =========================================================================

    #[tokio::test]
    async fn test_unpaid_reservation_defaults_once() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let id = devnet.reserve(2).await;
        let mut seen = Vec::new();

        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        observe(&mut seen, devnet.minting(id).await.state);

        assert_eq!(
            seen,
            vec![
                MintingState::Started,
                MintingState::AwaitingNonPaymentProof,
                MintingState::Done
            ]
        );
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 1);
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 0);
    }

    #[tokio::test]
    async fn test_defaulted_reservation_is_not_unstuck_later() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let id = devnet.reserve(1).await;
        engine.run_step().await.unwrap();
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Done);

        // a day later the proof window has long moved past the reservation
        devnet.chain.mine(20_000);
        engine.run_step().await.unwrap();
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();

        assert!(engine.cached_block_height_proof().is_some());
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 0);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 1);
    }

    // =========================================================================
    // SCENARIO C: PROOF WINDOW EXPIRES FIRST
    // =========================================================================

    #[tokio::test]
    async fn test_expired_window_unsticks_without_non_payment_proof() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.reserve(2).await;

        // first tick asks for the daily block-height proof, the minting waits
        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Started);
        assert_eq!(devnet.attestation.requests().len(), 1);

        // a day of blocks passes before the round finalizes
        devnet.chain.mine(20_000);
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();

        let minting = devnet.minting(id).await;
        assert_eq!(minting.state, MintingState::Done);
        assert!(minting.proof_request.is_none());
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 1);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 0);
        assert_eq!(devnet.attestation.requests().len(), 1);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::MintingUnstuck { .. })),
            1
        );

        // further ticks leave the closed minting alone
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 1);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 0);
    }

    #[tokio::test]
    async fn test_started_minting_waits_for_first_block_height_proof() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.reserve(1).await;

        // deadline long gone, but no proof of the window yet
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Started);
        assert_eq!(devnet.attestation.requests().len(), 1);

        // the proof shows an open window: the normal deadline path follows
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.minting(id).await.state,
            MintingState::AwaitingNonPaymentProof
        );
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Done);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 1);
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 0);
    }

    #[tokio::test]
    async fn test_unproved_non_payment_is_not_retried() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let id = devnet.reserve(1).await;
        engine.run_step().await.unwrap();
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();

        // attestors finalize a negative result
        devnet.attestation.set_force_not_proved(true);
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();

        let minting = devnet.minting(id).await;
        assert!(minting.proof_unobtainable);
        assert_eq!(minting.state, MintingState::AwaitingNonPaymentProof);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::MintingProofUnobtainable { .. })),
            1
        );
    }
}
