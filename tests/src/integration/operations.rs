//! # Owner Operations and Maintenance
//!
//! Timelocked owner actions, vault destruction, collateral top-ups driven
//! by price events and several agents stepped by one runner.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agent_bot_core::domain::{AgentSettingName, EXIT_AVAILABLE};
    use agent_bot_core::{
        AgentBotRunner, AgentOwnerApi, CollateralClass, LedgerClient, LedgerEvent, MintingState,
        Notification, PersistentStore,
    };

    use super::super::harness::{Devnet, AGENT, OWNER};

    // =========================================================================
    // TIMELOCKED SETTINGS
    // =========================================================================

    #[tokio::test]
    async fn test_setting_update_waits_for_timelock() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        engine
            .announce_setting_update(AgentSettingName::FeeBips, 200)
            .await
            .unwrap();

        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.call_count("executeAgentSettingUpdate"), 0);

        devnet.ledger.advance_time(120);
        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();

        assert_eq!(devnet.ledger.call_count("executeAgentSettingUpdate"), 1);
        assert_eq!(
            devnet.ledger.setting(AGENT, AgentSettingName::FeeBips),
            Some(200)
        );
        assert!(devnet.ctx.schedule(AGENT).await.unwrap().timelocks.is_empty());
        assert_eq!(
            devnet.notifier.count(|n| matches!(
                n,
                Notification::SettingUpdated {
                    setting: AgentSettingName::FeeBips
                }
            )),
            1
        );
    }

    #[tokio::test]
    async fn test_lapsed_setting_update_is_dropped() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        engine
            .announce_setting_update(AgentSettingName::PoolFeeShareBips, 4_000)
            .await
            .unwrap();
        devnet
            .ledger
            .reject("executeAgentSettingUpdate", "update not valid anymore");

        devnet.ledger.advance_time(120);
        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();

        assert!(devnet.ctx.schedule(AGENT).await.unwrap().timelocks.is_empty());
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::TimelockLapsed { .. })),
            1
        );
        assert_eq!(
            devnet.ledger.setting(AGENT, AgentSettingName::PoolFeeShareBips),
            None
        );
    }

    // =========================================================================
    // UNDERLYING WITHDRAWAL
    // =========================================================================

    #[tokio::test]
    async fn test_cancelled_underlying_withdrawal() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        engine.announce_underlying_withdrawal().await.unwrap();
        engine.cancel_underlying_withdrawal().await.unwrap();

        // confirmation window not open yet
        engine.run_step().await.unwrap();
        assert!(devnet
            .ctx
            .schedule(AGENT)
            .await
            .unwrap()
            .underlying_withdrawal
            .is_some());

        devnet.ledger.advance_time(61);
        engine.run_step().await.unwrap();
        assert!(devnet
            .ctx
            .schedule(AGENT)
            .await
            .unwrap()
            .underlying_withdrawal
            .is_none());
        assert_eq!(devnet.ledger.call_count("cancelUnderlyingWithdrawal"), 1);
        assert_eq!(devnet.ledger.call_count("confirmUnderlyingWithdrawal"), 0);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::UnderlyingWithdrawalCancelled)),
            1
        );
    }

    // =========================================================================
    // DESTRUCTION
    // =========================================================================

    #[tokio::test]
    async fn test_destruction_runs_to_completion() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        devnet.ledger.update_agent_info(AGENT, |info| {
            info.total_vault_collateral_wei = 5_000;
            info.free_vault_collateral_wei = 5_000;
        });
        devnet.ledger.set_pool(AGENT, 30, 800, 800);
        engine.begin_destruction().await.unwrap();

        // cleanup waits for the exit
        engine.run_step().await.unwrap();
        let schedule = devnet.ctx.schedule(AGENT).await.unwrap();
        assert!(schedule.pending(EXIT_AVAILABLE).is_some());
        assert_eq!(devnet.ledger.call_count("withdrawPoolFees"), 0);

        devnet.ledger.advance_time(60);
        engine.run_step().await.unwrap();
        assert!(!devnet.ledger.info(AGENT).unwrap().publicly_available);
        assert_eq!(devnet.ledger.call_count("withdrawPoolFees"), 1);

        // collateral leaves, then destroy is announced
        devnet.ledger.advance_time(60);
        engine.run_step().await.unwrap();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.call_count("announceDestroy"), 1);
        assert!(!devnet
            .ctx
            .schedule(AGENT)
            .await
            .unwrap()
            .waiting_for_destruction_cleanup);

        devnet.ledger.advance_time(300);
        engine.run_step().await.unwrap();
        assert!(devnet.ledger.is_destroyed(AGENT));
        assert!(!engine.is_active().await.unwrap());

        // nothing is stepped after that
        let calls = devnet.ledger.calls().len();
        devnet.settle();
        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.calls().len(), calls);
        assert_eq!(
            devnet
                .notifier
                .count(|n| matches!(n, Notification::AgentDestroyed)),
            1
        );
    }

    // =========================================================================
    // COLLATERAL TOP-UP
    // =========================================================================

    #[tokio::test]
    async fn test_price_event_tops_up_collateral() {
        let devnet = Devnet::new();
        let engine = devnet.engine().await;
        devnet
            .ledger
            .set_owner_balance(OWNER, CollateralClass::Vault, 10_000);
        devnet
            .ledger
            .set_owner_balance(OWNER, CollateralClass::Pool, 10_000);
        devnet.reserve(2).await;
        engine.run_step().await.unwrap();
        assert_eq!(devnet.ledger.call_count("depositVaultCollateral"), 0);

        devnet
            .ledger
            .emit(AGENT, LedgerEvent::PriceEpochFinalized { epoch: 7 });
        devnet.settle();
        engine.run_step().await.unwrap();

        // 1000 reserved * 1.5 * 1.2, nothing held yet
        let deposit = devnet
            .ledger
            .calls()
            .into_iter()
            .find(|c| c.method == "depositVaultCollateral")
            .unwrap();
        assert_eq!(deposit.amount, Some(1_800));
        assert_eq!(
            devnet.notifier.count(|n| matches!(
                n,
                Notification::CollateralToppedUp {
                    class: CollateralClass::Pool,
                    ..
                }
            )),
            1
        );
    }

    // =========================================================================
    // RUNNER
    // =========================================================================

    #[tokio::test]
    async fn test_runner_steps_agents_independently() {
        let devnet = Devnet::new();
        devnet.ledger.create_agent("0xb0b", OWNER, "rBob");
        let mut runner = AgentBotRunner::new(devnet.ctx.clone(), Duration::from_millis(10));
        runner.add_agent(AGENT).await.unwrap();
        runner.add_agent("0xb0b").await.unwrap();
        devnet.ledger.mine(1);

        let paid = devnet.reserve(1).await;
        let unpaid = devnet
            .ledger
            .reserve_collateral("0xb0b", "0xminter", 500)
            .await
            .unwrap()
            .request_id;
        devnet.settle();

        runner.run_step().await;
        devnet.pay_minting(paid).await;
        devnet.chain.mine(15);
        runner.run_step().await;
        // the first block-height proof arrives, the sweep requests proofs
        devnet.attestation.finalize_rounds();
        runner.run_step().await;
        devnet.attestation.finalize_rounds();
        runner.run_step().await;

        assert_eq!(devnet.minting(paid).await.state, MintingState::Done);
        let bob = devnet
            .ctx
            .store
            .minting("0xb0b", unpaid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bob.state, MintingState::Done);
        assert_eq!(devnet.ledger.call_count("executeMinting"), 1);
        assert_eq!(devnet.ledger.call_count("mintingPaymentDefault"), 1);
    }
}
