//! In-memory persistent store.
//!
//! Units of work are applied to a staged copy and swapped in only when every
//! operation succeeded. Snapshots serialize to JSON so a test can "restart"
//! the bot from persisted state, and the runtime can keep them on disk.

use crate::domain::{
    invariant_minting_forward, invariant_redemption_forward, invariant_watermark_forward,
    AgentBotError, AgentBotResult, AgentSchedule, MintingRecord, RedemptionRecord, RequestId,
    VaultAddress,
};
use crate::ports::{PersistentStore, StoreOperation, UnitOfWork};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

type RecordKey = (VaultAddress, RequestId);

#[derive(Clone, Debug, Default)]
struct StoreState {
    mintings: BTreeMap<RecordKey, MintingRecord>,
    redemptions: BTreeMap<RecordKey, RedemptionRecord>,
    schedules: HashMap<VaultAddress, AgentSchedule>,
}

/// Serialized store contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// All minting records.
    pub mintings: Vec<MintingRecord>,
    /// All redemption records.
    pub redemptions: Vec<RedemptionRecord>,
    /// All schedules.
    pub schedules: Vec<AgentSchedule>,
}

/// In-memory store with atomic commits.
#[derive(Debug, Default)]
pub struct InMemoryAgentStore {
    state: RwLock<StoreState>,
    commits: AtomicU64,
    fail_next: AtomicU32,
}

impl InMemoryAgentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with a storage error.
    pub fn fail_next_commits(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Every minting of an agent, open or not.
    pub fn all_mintings(&self, agent: &str) -> Vec<MintingRecord> {
        self.state
            .read()
            .mintings
            .values()
            .filter(|m| m.agent == agent)
            .cloned()
            .collect()
    }

    /// Every redemption of an agent, open or not.
    pub fn all_redemptions(&self, agent: &str) -> Vec<RedemptionRecord> {
        self.state
            .read()
            .redemptions
            .values()
            .filter(|r| r.agent == agent)
            .cloned()
            .collect()
    }

    /// Copy of the contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            mintings: state.mintings.values().cloned().collect(),
            redemptions: state.redemptions.values().cloned().collect(),
            schedules: state.schedules.values().cloned().collect(),
        }
    }

    /// Contents as JSON.
    pub fn to_json(&self) -> AgentBotResult<String> {
        serde_json::to_string(&self.snapshot()).map_err(|e| AgentBotError::Storage {
            reason: e.to_string(),
        })
    }

    /// Store rebuilt from [`Self::to_json`] output.
    pub fn from_json(json: &str) -> AgentBotResult<Self> {
        let snapshot: StoreSnapshot =
            serde_json::from_str(json).map_err(|e| AgentBotError::Storage {
                reason: e.to_string(),
            })?;
        let mut state = StoreState::default();
        for minting in snapshot.mintings {
            state
                .mintings
                .insert((minting.agent.clone(), minting.request_id), minting);
        }
        for redemption in snapshot.redemptions {
            state
                .redemptions
                .insert((redemption.agent.clone(), redemption.request_id), redemption);
        }
        for schedule in snapshot.schedules {
            state.schedules.insert(schedule.agent.clone(), schedule);
        }
        Ok(Self {
            state: RwLock::new(state),
            ..Self::default()
        })
    }

    /// Store saved at `path` by [`Self::save_to`], or an empty one when
    /// nothing was saved there yet.
    pub fn load_or_new(path: &Path) -> AgentBotResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(file_error(path, e)),
        }
    }

    /// Write the contents to `path`. The previous file is replaced only once
    /// the new one is fully written.
    pub fn save_to(&self, path: &Path) -> AgentBotResult<()> {
        let json = self.to_json()?;
        let staged = path.with_extension("tmp");
        std::fs::write(&staged, json).map_err(|e| file_error(&staged, e))?;
        std::fs::rename(&staged, path).map_err(|e| file_error(path, e))
    }

    fn apply(state: &mut StoreState, operation: StoreOperation) -> AgentBotResult<()> {
        match operation {
            StoreOperation::InsertMinting(minting) => {
                let key = (minting.agent.clone(), minting.request_id);
                if state.mintings.contains_key(&key) {
                    return Err(AgentBotError::DuplicateRecord {
                        kind: "minting",
                        agent: key.0,
                        request_id: key.1,
                    });
                }
                state.mintings.insert(key, minting);
            }
            StoreOperation::UpdateMinting(minting) => {
                let key = (minting.agent.clone(), minting.request_id);
                let stored = state
                    .mintings
                    .get_mut(&key)
                    .ok_or(AgentBotError::MintingNotFound {
                        agent: key.0.clone(),
                        request_id: key.1,
                    })?;
                invariant_minting_forward(stored, &minting)?;
                *stored = minting;
            }
            StoreOperation::InsertRedemption(redemption) => {
                let key = (redemption.agent.clone(), redemption.request_id);
                if state.redemptions.contains_key(&key) {
                    return Err(AgentBotError::DuplicateRecord {
                        kind: "redemption",
                        agent: key.0,
                        request_id: key.1,
                    });
                }
                state.redemptions.insert(key, redemption);
            }
            StoreOperation::UpdateRedemption(redemption) => {
                let key = (redemption.agent.clone(), redemption.request_id);
                let stored =
                    state
                        .redemptions
                        .get_mut(&key)
                        .ok_or(AgentBotError::RedemptionNotFound {
                            agent: key.0.clone(),
                            request_id: key.1,
                        })?;
                invariant_redemption_forward(stored, &redemption)?;
                *stored = redemption;
            }
            StoreOperation::PutSchedule(schedule) => {
                if let Some(stored) = state.schedules.get(&schedule.agent) {
                    invariant_watermark_forward(&stored.watermark, &schedule.watermark)?;
                }
                state.schedules.insert(schedule.agent.clone(), schedule);
            }
        }
        Ok(())
    }
}

fn file_error(path: &Path, e: std::io::Error) -> AgentBotError {
    AgentBotError::Storage {
        reason: format!("{}: {}", path.display(), e),
    }
}

#[async_trait]
impl PersistentStore for InMemoryAgentStore {
    async fn agent_schedule(&self, agent: &str) -> AgentBotResult<Option<AgentSchedule>> {
        Ok(self.state.read().schedules.get(agent).cloned())
    }

    async fn active_agents(&self) -> AgentBotResult<Vec<VaultAddress>> {
        let mut agents: Vec<_> = self
            .state
            .read()
            .schedules
            .values()
            .filter(|s| s.active)
            .map(|s| s.agent.clone())
            .collect();
        agents.sort();
        Ok(agents)
    }

    async fn minting(
        &self,
        agent: &str,
        request_id: RequestId,
    ) -> AgentBotResult<Option<MintingRecord>> {
        Ok(self
            .state
            .read()
            .mintings
            .get(&(agent.to_string(), request_id))
            .cloned())
    }

    async fn redemption(
        &self,
        agent: &str,
        request_id: RequestId,
    ) -> AgentBotResult<Option<RedemptionRecord>> {
        Ok(self
            .state
            .read()
            .redemptions
            .get(&(agent.to_string(), request_id))
            .cloned())
    }

    async fn open_mintings(&self, agent: &str) -> AgentBotResult<Vec<MintingRecord>> {
        Ok(self
            .all_mintings(agent)
            .into_iter()
            .filter(|m| !m.state.is_terminal())
            .collect())
    }

    async fn open_redemptions(&self, agent: &str) -> AgentBotResult<Vec<RedemptionRecord>> {
        Ok(self
            .all_redemptions(agent)
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect())
    }

    async fn commit(&self, work: UnitOfWork) -> AgentBotResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AgentBotError::Storage {
                reason: "injected commit failure".to_string(),
            });
        }

        let mut state = self.state.write();
        let mut staged = state.clone();
        for operation in work.operations {
            Self::apply(&mut staged, operation)?;
        }
        *state = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CollateralReservation, MintingState};

    fn minting(request_id: u64) -> MintingRecord {
        MintingRecord::from_reservation(
            "0xvault",
            "rAgent",
            &CollateralReservation {
                request_id,
                minter: "0xminter".to_string(),
                value: 100,
                fee: 1,
                first_underlying_block: 1,
                last_underlying_block: 5,
                last_underlying_timestamp: 50,
                payment_reference: [1u8; 32],
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryAgentStore::new();
        let mut work = UnitOfWork::new();
        work.push(StoreOperation::InsertMinting(minting(1)));
        store.commit(work).await.unwrap();

        let found = store.minting("0xvault", 1).await.unwrap().unwrap();
        assert_eq!(found.request_id, 1);
        assert_eq!(store.open_mintings("0xvault").await.unwrap().len(), 1);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejects_whole_unit() {
        let store = InMemoryAgentStore::new();
        let mut first = UnitOfWork::new();
        first.push(StoreOperation::InsertMinting(minting(1)));
        store.commit(first).await.unwrap();

        let mut second = UnitOfWork::new();
        second
            .push(StoreOperation::InsertMinting(minting(2)))
            .push(StoreOperation::InsertMinting(minting(1)));
        let err = store.commit(second).await.unwrap_err();
        assert!(matches!(err, AgentBotError::DuplicateRecord { .. }));
        assert!(store.minting("0xvault", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = InMemoryAgentStore::new();
        let mut work = UnitOfWork::new();
        work.update_minting(minting(3));
        assert!(matches!(
            store.commit(work).await,
            Err(AgentBotError::MintingNotFound { request_id: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_done_record_cannot_reopen() {
        let store = InMemoryAgentStore::new();
        let mut done = minting(1);
        done.state = MintingState::Done;
        let mut work = UnitOfWork::new();
        work.push(StoreOperation::InsertMinting(done));
        store.commit(work).await.unwrap();

        let mut work = UnitOfWork::new();
        work.update_minting(minting(1));
        assert!(store.commit(work).await.is_err());
        assert!(store.open_mintings("0xvault").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_watermark_cannot_regress() {
        let store = InMemoryAgentStore::new();
        let mut work = UnitOfWork::new();
        work.put_schedule(AgentSchedule::new("0xvault", "rAgent", 50));
        store.commit(work).await.unwrap();

        let mut work = UnitOfWork::new();
        work.put_schedule(AgentSchedule::new("0xvault", "rAgent", 10));
        assert!(matches!(
            store.commit(work).await,
            Err(AgentBotError::WatermarkRegression { .. })
        ));
        assert_eq!(store.active_agents().await.unwrap(), vec!["0xvault".to_string()]);
    }

    #[test]
    fn test_injected_failure() {
        let store = InMemoryAgentStore::new();
        store.fail_next_commits(1);
        let mut work = UnitOfWork::new();
        work.put_schedule(AgentSchedule::new("0xvault", "rAgent", 1));
        assert!(tokio_test::block_on(store.commit(work.clone())).is_err());
        assert!(tokio_test::block_on(store.commit(work)).is_ok());
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_json_round_trip_restores_records() {
        let store = InMemoryAgentStore::new();
        let mut work = UnitOfWork::new();
        work.push(StoreOperation::InsertMinting(minting(4)))
            .put_schedule(AgentSchedule::new("0xvault", "rAgent", 9));
        store.commit(work).await.unwrap();

        let restored = InMemoryAgentStore::from_json(&store.to_json().unwrap()).unwrap();
        assert_eq!(
            restored.minting("0xvault", 4).await.unwrap(),
            store.minting("0xvault", 4).await.unwrap()
        );
        assert_eq!(
            restored.agent_schedule("0xvault").await.unwrap(),
            store.agent_schedule("0xvault").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("agent-store-{}.json", uuid::Uuid::new_v4()));
        assert!(InMemoryAgentStore::load_or_new(&path)
            .unwrap()
            .agent_schedule("0xvault")
            .await
            .unwrap()
            .is_none());

        let store = InMemoryAgentStore::new();
        let mut work = UnitOfWork::new();
        work.push(StoreOperation::InsertMinting(minting(5)))
            .put_schedule(AgentSchedule::new("0xvault", "rAgent", 3));
        store.commit(work).await.unwrap();
        store.save_to(&path).unwrap();

        let loaded = InMemoryAgentStore::load_or_new(&path).unwrap();
        assert_eq!(
            loaded.minting("0xvault", 5).await.unwrap(),
            store.minting("0xvault", 5).await.unwrap()
        );
        assert!(!path.with_extension("tmp").exists());
        std::fs::remove_file(&path).unwrap();
    }
}
