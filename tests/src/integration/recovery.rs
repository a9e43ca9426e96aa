//! # Crash and Replay Safety
//!
//! The bot may stop between any two commits and may re-read events it has
//! already applied. None of that may repeat an on-chain action.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use agent_bot_core::adapters::{InMemoryAgentStore, StoreSnapshot};
    use agent_bot_core::{AgentBotEngine, MintingState, Notification, RedemptionState};

    use super::super::harness::{Devnet, AGENT};

    // =========================================================================
    // RESTARTS
    // =========================================================================

    #[tokio::test]
    async fn test_restart_resumes_pending_proof() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let id = devnet.reserve(2).await;
        engine.run_step().await.unwrap();
        devnet.pay_minting(id).await;
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        assert_eq!(
            devnet.minting(id).await.state,
            MintingState::AwaitingPaymentProof
        );
        let requests = devnet.attestation.requests().len();
        drop(engine);

        let restarted = devnet.restart();
        let engine = AgentBotEngine::load(restarted.ctx.clone(), AGENT)
            .await
            .unwrap();
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();

        assert_eq!(restarted.minting(id).await.state, MintingState::Done);
        assert_eq!(devnet.ledger.call_count("executeMinting"), 1);
        // the persisted proof request was polled, not re-submitted
        assert_eq!(devnet.attestation.requests().len(), requests);
    }

    #[tokio::test]
    async fn test_restart_before_first_proof_unsticks_expired_minting() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.reserve(1).await;
        engine.run_step().await.unwrap();
        assert!(engine.cached_block_height_proof().is_none());
        drop(engine);

        // down for more than a day, nothing cached anywhere
        devnet.chain.mine(20_000);
        let restarted = devnet.restart();
        let engine = AgentBotEngine::load(restarted.ctx.clone(), AGENT)
            .await
            .unwrap();
        assert!(engine.cached_block_height_proof().is_none());
        engine.run_step().await.unwrap();
        assert_eq!(restarted.minting(id).await.state, MintingState::Started);

        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();

        assert_eq!(restarted.minting(id).await.state, MintingState::Done);
        assert_eq!(devnet.ledger.call_count("unstickMinting"), 1);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 0);
    }

    #[tokio::test]
    async fn test_restart_reloads_block_height_proof() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let proof = engine.cached_block_height_proof();
        let id = devnet.reserve(1).await;
        drop(engine);

        let restarted = devnet.restart();
        let engine = AgentBotEngine::load(restarted.ctx.clone(), AGENT)
            .await
            .unwrap();
        assert_eq!(engine.cached_block_height_proof(), proof);

        // the reloaded proof lets the deadline path run straight away
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        assert_eq!(
            restarted.minting(id).await.state,
            MintingState::AwaitingNonPaymentProof
        );
    }

    #[tokio::test]
    async fn test_replay_from_older_watermark_changes_nothing() {
        let devnet = Devnet::new();
        let engine = devnet.engine_with_block_height_proof().await;
        let registered = devnet.store.snapshot();

        let id = devnet.reserve(2).await;
        engine.run_step().await.unwrap();
        devnet.pay_minting(id).await;
        devnet.chain.mine(15);
        engine.run_step().await.unwrap();
        devnet.attestation.finalize_rounds();
        engine.run_step().await.unwrap();
        devnet.settle();
        engine.run_step().await.unwrap();
        let caught_up = devnet.schedule_watermark().await;

        // records as of now, schedule as of registration
        let current = devnet.store.snapshot();
        let rewound = StoreSnapshot {
            schedules: registered.schedules,
            ..current
        };
        let store =
            InMemoryAgentStore::from_json(&serde_json::to_string(&rewound).unwrap()).unwrap();
        let replayed = devnet.with_store(Arc::new(store));
        let engine = AgentBotEngine::load(replayed.ctx.clone(), AGENT)
            .await
            .unwrap();
        engine.run_step().await.unwrap();

        assert_eq!(replayed.minting(id).await.state, MintingState::Done);
        assert_eq!(replayed.store.all_mintings(AGENT).len(), 1);
        assert_eq!(devnet.ledger.call_count("executeMinting"), 1);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::MintingStarted { .. })),
            1
        );
        assert_eq!(replayed.schedule_watermark().await, caught_up);
    }

    // =========================================================================
    // INTERRUPTED COMMITS
    // =========================================================================

    #[tokio::test]
    async fn test_payment_without_commit_is_not_repeated() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.redeem(1).await;

        // first tick records the request, the wallet is down
        devnet.chain.set_reject_submissions(true);
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(id).await.state, RedemptionState::Started);

        // payment goes out, recording it fails
        devnet.chain.set_reject_submissions(false);
        devnet.store.fail_next_commits(1);
        engine.run_step().await.unwrap();
        assert_eq!(devnet.redemption(id).await.state, RedemptionState::Started);
        assert_eq!(devnet.agent_payments_to_redeemer(), 1);

        engine.run_step().await.unwrap();
        let redemption = devnet.redemption(id).await;
        assert_eq!(redemption.state, RedemptionState::Paid);
        assert_eq!(devnet.agent_payments_to_redeemer(), 1);
        let adopted = devnet
            .chain
            .find_transaction(redemption.payment_tx.as_deref().unwrap())
            .unwrap();
        assert_eq!(adopted.reference, Some(redemption.payment_reference));
    }

    #[tokio::test]
    async fn test_event_read_failures_lose_nothing() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        let id = devnet.reserve(1).await;
        devnet.ledger.fail_next("events", 2);

        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();
        assert!(devnet.store.all_mintings(AGENT).is_empty());

        engine.run_step().await.unwrap();
        assert_eq!(devnet.minting(id).await.state, MintingState::Started);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::MintingStarted { .. })),
            1
        );
    }
}
