//! Coordinator service loop.
//!
//! Each poll cycle pulls the controller's active travels, upserts them into
//! the local mirror, reconciles entries that went terminal since the last
//! cycle, and forces overdue travels home via emergency return. Recovery
//! calls run under a concurrency bound with per-call timeouts and
//! exponential backoff; exhausted retries flag the mirror entry for operator
//! attention instead of looping forever.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use omnipet_travel::{TravelError, TravelRecord};

use crate::client::{ClientError, ControllerClient};
use crate::config::CoordinatorConfig;
use crate::mirror::MirrorStore;

pub struct CoordinatorService {
    client: Arc<dyn ControllerClient>,
    mirror: MirrorStore,
    config: CoordinatorConfig,
    recovery_permits: Arc<Semaphore>,
}

/// What the poll cycle decided to do with an active record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Requested duration elapsed; settle via completion.
    Complete,
    /// Safety window exceeded; force home.
    EmergencyReturn,
}

/// Outcome of one recovery attempt sequence.
enum Recovery {
    /// The call went through; amount refunded.
    Settled(u128),
    /// Nothing left to recover (settled concurrently or not yet eligible).
    Skipped,
    /// All attempts failed.
    Exhausted,
}

impl CoordinatorService {
    pub fn new(
        client: Arc<dyn ControllerClient>,
        mirror: MirrorStore,
        config: CoordinatorConfig,
    ) -> Self {
        let recovery_permits = Arc::new(Semaphore::new(config.max_concurrent_recoveries));
        Self {
            client,
            mirror,
            config,
            recovery_permits,
        }
    }

    /// Verify this coordinator is the identity the controller accepts.
    /// Run at startup; a mismatch means every privileged call would be
    /// rejected, so fail fast instead of polling uselessly.
    pub async fn self_check(&self) -> Result<()> {
        let expected = self
            .client
            .authorized_coordinator()
            .await
            .context("failed to query authorized coordinator identity")?;
        let ours = self.config.identity()?;
        if expected != ours {
            bail!(
                "coordinator identity mismatch: controller expects {}, configured {}",
                expected,
                ours
            );
        }
        info!(identity = %ours, "coordinator identity verified");
        Ok(())
    }

    /// Poll until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.self_check().await?;
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs));
        loop {
            ticker.tick().await;
            let now = unix_now();
            if let Err(err) = self.poll_once(now).await {
                error!(error = %err, "poll cycle failed");
            }
        }
    }

    /// One reconciliation cycle at the given unix time.
    pub async fn poll_once(&self, now: u64) -> Result<()> {
        let active = self
            .client
            .active_travels()
            .await
            .context("failed to fetch active travels")?;
        debug!(count = active.len(), "fetched active travels");

        for record in &active {
            if let Err(err) = record.check_delivery(now) {
                warn!(
                    asset_id = record.asset_id,
                    error = %err,
                    "travel past due without arrival acknowledgement"
                );
            }
            self.mirror.sync(record, now)?;
        }
        self.reconcile_terminated(&active, now).await?;

        let due: Vec<(u64, Action)> = active
            .iter()
            .filter_map(|r| {
                if now >= r.emergency_eligible_at(self.config.safety_multiplier) {
                    Some((r.asset_id, Action::EmergencyReturn))
                } else if now >= r.due_at() {
                    Some((r.asset_id, Action::Complete))
                } else {
                    None
                }
            })
            .collect();
        if due.is_empty() {
            return Ok(());
        }
        info!(count = due.len(), "settling due travels");

        let recoveries = due.into_iter().map(|(asset_id, action)| {
            async move {
                // Permit bound caps concurrent controller calls.
                let _permit = self
                    .recovery_permits
                    .acquire()
                    .await
                    .expect("recovery semaphore closed");
                let outcome = self.recover(asset_id, action, now).await;
                (asset_id, action, outcome)
            }
        });

        for (asset_id, action, outcome) in join_all(recoveries).await {
            match outcome? {
                Recovery::Settled(refund) => {
                    info!(asset_id, refund, ?action, "travel settled");
                    if let Some(record) = self.client.travel_record(asset_id).await? {
                        self.mirror.sync(&record, now)?;
                    }
                }
                Recovery::Skipped => {
                    debug!(asset_id, "nothing to recover");
                }
                Recovery::Exhausted => {
                    self.mirror.flag_attention(asset_id)?;
                    error!(
                        asset_id,
                        retries = self.config.max_retries,
                        "recovery retries exhausted, flagged for attention"
                    );
                }
            }
        }
        Ok(())
    }

    /// Pull fresh terminal state for mirror entries the active set no longer
    /// contains, so completions land in the mirror even when they happened
    /// between polls.
    async fn reconcile_terminated(&self, active: &[TravelRecord], now: u64) -> Result<()> {
        for entry in self.mirror.all()? {
            if !entry.record.status.is_active() {
                continue;
            }
            let asset_id = entry.record.asset_id;
            if active.iter().any(|r| r.asset_id == asset_id) {
                continue;
            }
            if let Some(record) = self.client.travel_record(asset_id).await? {
                self.mirror.sync(&record, now)?;
            }
        }
        Ok(())
    }

    /// Settle one asset with bounded retries.
    async fn recover(&self, asset_id: u64, action: Action, now: u64) -> Result<Recovery> {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);
        for attempt in 0..self.config.max_retries {
            let call = async {
                match action {
                    Action::Complete => {
                        // No outcome payload was observed; completion settles
                        // the escrow on schedule.
                        self.client
                            .mark_completed(asset_id, serde_json::Value::Null, now)
                            .await
                    }
                    Action::EmergencyReturn => self.client.emergency_return(asset_id, now).await,
                }
            };
            match timeout(call_timeout, call).await {
                Ok(Ok(refund)) => return Ok(Recovery::Settled(refund)),
                Ok(Err(ClientError::Travel(TravelError::InvalidState { status }))) => {
                    // Settled by someone else since the poll snapshot.
                    debug!(asset_id, ?status, "travel already settled");
                    return Ok(Recovery::Skipped);
                }
                Ok(Err(ClientError::Travel(TravelError::NotYetEligible { eligible_at }))) => {
                    debug!(asset_id, eligible_at, "safety window not yet exceeded");
                    return Ok(Recovery::Skipped);
                }
                Ok(Err(err)) => {
                    warn!(asset_id, attempt, error = %err, "recovery attempt failed");
                }
                Err(_) => {
                    warn!(asset_id, attempt, "recovery attempt timed out");
                }
            }
            self.mirror.record_retry(asset_id)?;
            tokio::time::sleep(self.backoff(attempt)).await;
        }
        Ok(Recovery::Exhausted)
    }

    /// Exponential backoff with jitter: `base * 2^attempt + rand(0..base/2)`.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_ms;
        let exp = base.saturating_mul(1u64 << attempt.min(10));
        let jitter = rand::thread_rng().gen_range(0..=base / 2 + 1);
        Duration::from_millis(exp + jitter)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    use omnipet_chains::{ChainRegistry, MessagingAdapter, NoopConnector};
    use omnipet_travel::{Identity, TravelController, TravelPolicy, TravelStatus};

    use crate::client::InProcessClient;

    const T0: u64 = 1_700_000_000;

    fn owner() -> Identity {
        Identity([0x11; 20])
    }

    fn coordinator_id() -> Identity {
        Identity([0x22; 20])
    }

    fn test_config() -> CoordinatorConfig {
        CoordinatorConfig {
            coordinator_identity: format!("0x{}", "22".repeat(20)),
            mirror_db_path: String::new(),
            poll_interval_secs: 30,
            max_retries: 2,
            max_concurrent_recoveries: 4,
            call_timeout_secs: 5,
            backoff_base_ms: 1,
            safety_multiplier: 3,
        }
    }

    fn controller_with_travel() -> Arc<Mutex<TravelController>> {
        let adapter = Arc::new(MessagingAdapter::new(
            ChainRegistry::with_builtin_chains(),
            Arc::new(NoopConnector),
        ));
        let mut controller = TravelController::new(
            TravelPolicy {
                base_rate_per_hour: 100,
                settlement_fee: 30,
                emergency_fee: 10,
                ..TravelPolicy::default()
            },
            coordinator_id(),
            Identity([0x33; 20]),
            adapter.clone(),
        );
        controller.register_asset(5, owner());
        let (chain, _) = adapter.registry().get(97).unwrap();
        let deposit =
            omnipet_travel::provisions::required_deposit(controller.policy(), 3_600, &chain);
        controller
            .start_travel(owner(), 5, 97, 3_600, deposit, T0)
            .unwrap();
        Arc::new(Mutex::new(controller))
    }

    fn service(controller: Arc<Mutex<TravelController>>) -> CoordinatorService {
        let client = Arc::new(InProcessClient::new(controller, coordinator_id()));
        CoordinatorService::new(client, MirrorStore::temporary().unwrap(), test_config())
    }

    #[tokio::test]
    async fn self_check_accepts_matching_identity() {
        let service = service(controller_with_travel());
        service.self_check().await.unwrap();
    }

    #[tokio::test]
    async fn self_check_rejects_mismatched_identity() {
        let controller = controller_with_travel();
        let client = Arc::new(InProcessClient::new(controller, coordinator_id()));
        let mut config = test_config();
        config.coordinator_identity = format!("0x{}", "99".repeat(20));
        let service =
            CoordinatorService::new(client, MirrorStore::temporary().unwrap(), config);
        assert!(service.self_check().await.is_err());
    }

    #[tokio::test]
    async fn poll_mirrors_active_travels() {
        let service = service(controller_with_travel());
        service.poll_once(T0 + 60).await.unwrap();

        let entry = service.mirror.get(5).unwrap().unwrap();
        assert_eq!(entry.record.status, TravelStatus::Traveling);
        assert_eq!(entry.last_synced_at, T0 + 60);
    }

    #[tokio::test]
    async fn due_travel_is_completed_on_schedule() {
        let service = service(controller_with_travel());

        // Before the requested duration elapses nothing settles.
        service.poll_once(T0 + 3_599).await.unwrap();
        assert_eq!(
            service.mirror.get(5).unwrap().unwrap().record.status,
            TravelStatus::Traveling
        );

        service.poll_once(T0 + 3_600).await.unwrap();
        let entry = service.mirror.get(5).unwrap().unwrap();
        assert_eq!(entry.record.status, TravelStatus::Completed);
        let escrow = entry.record.escrow;
        assert_eq!(escrow.deposited, escrow.refunded + escrow.consumed);
    }

    #[tokio::test]
    async fn overdue_travel_is_forced_home() {
        // First contact with the record happens after the safety window:
        // the emergency path wins over scheduled completion.
        let service = service(controller_with_travel());
        service.poll_once(T0 + 10_800).await.unwrap();

        let entry = service.mirror.get(5).unwrap().unwrap();
        assert_eq!(entry.record.status, TravelStatus::Timeout);
        let escrow = entry.record.escrow;
        assert_eq!(escrow.deposited, escrow.refunded + escrow.consumed);
    }

    #[tokio::test]
    async fn completion_between_polls_reaches_the_mirror() {
        let controller = controller_with_travel();
        let service = service(controller.clone());
        service.poll_once(T0 + 60).await.unwrap();

        controller
            .lock()
            .await
            .mark_completed(coordinator_id(), 5, serde_json::json!({"xp": 70}), T0 + 3_600)
            .unwrap();

        service.poll_once(T0 + 3_660).await.unwrap();
        let entry = service.mirror.get(5).unwrap().unwrap();
        assert_eq!(entry.record.status, TravelStatus::Completed);
    }

    struct FailingClient {
        inner: InProcessClient,
    }

    #[async_trait]
    impl ControllerClient for FailingClient {
        async fn authorized_coordinator(&self) -> Result<Identity, ClientError> {
            self.inner.authorized_coordinator().await
        }

        async fn active_travels(&self) -> Result<Vec<TravelRecord>, ClientError> {
            self.inner.active_travels().await
        }

        async fn travel_record(
            &self,
            asset_id: u64,
        ) -> Result<Option<TravelRecord>, ClientError> {
            self.inner.travel_record(asset_id).await
        }

        async fn mark_completed(
            &self,
            asset_id: u64,
            outcome: serde_json::Value,
            now: u64,
        ) -> Result<u128, ClientError> {
            self.inner.mark_completed(asset_id, outcome, now).await
        }

        async fn emergency_return(&self, _asset_id: u64, _now: u64) -> Result<u128, ClientError> {
            Err(ClientError::Transport("connection refused".into()))
        }

        async fn mark_failed(
            &self,
            asset_id: u64,
            reason: &str,
            now: u64,
        ) -> Result<u128, ClientError> {
            self.inner.mark_failed(asset_id, reason, now).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_flag_attention() {
        let controller = controller_with_travel();
        let client = Arc::new(FailingClient {
            inner: InProcessClient::new(controller, coordinator_id()),
        });
        let service =
            CoordinatorService::new(client, MirrorStore::temporary().unwrap(), test_config());

        service.poll_once(T0 + 10_800).await.unwrap();
        let entry = service.mirror.get(5).unwrap().unwrap();
        assert!(entry.needs_attention);
        assert_eq!(entry.retry_count, 2);
    }
}
