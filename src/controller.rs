//! Run controller: connect, classify, reconcile deletes, reconcile inserts.
//!
//! The first fatal error stops the pipeline and becomes the run's result.
//! There are no retries here; re-running the whole pipeline is safe because
//! the engine only applies changes the target does not already reflect.

use crate::classifier::ChangeClassifier;
use crate::config::SyncConfig;
use crate::engine::{ListSummary, ReconciliationEngine};
use crate::error::{ReconcileError, ReconcileResult};
use crate::store::{SledGateway, StoreGateway};
use log::{error, info};

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Queue records with an unrecognised status
    pub dropped: usize,
    /// Queue records set aside because their identity or payload was unusable
    pub rejected: usize,
    pub deletes: ListSummary,
    pub inserts: ListSummary,
}

impl RunReport {
    /// True when the run changed nothing in the target.
    pub fn is_noop(&self) -> bool {
        self.deletes.mutations() == 0 && self.inserts.mutations() == 0
    }
}

pub struct RunController {
    config: SyncConfig,
}

impl RunController {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Opens the configured connections and runs the whole pipeline.
    pub async fn run(&self) -> ReconcileResult<RunReport> {
        self.config.validate()?;
        let gateway = SledGateway::connect(&self.config.connections)
            .await
            .map_err(|e| {
                error!("Connect failed: {}", e);
                ReconcileError::Connect(e)
            })?;
        self.execute(&gateway).await
    }

    /// Runs classify → deletes → inserts against an already-connected gateway.
    pub async fn run_with<G>(&self, gateway: &G) -> ReconcileResult<RunReport>
    where
        G: StoreGateway + ?Sized,
    {
        if let Err(e) = self.config.validate() {
            error!("Run failed in {} stage: {}", e.stage(), e);
            return Err(e);
        }
        self.execute(gateway).await
    }

    async fn execute<G>(&self, gateway: &G) -> ReconcileResult<RunReport>
    where
        G: StoreGateway + ?Sized,
    {
        let result = self.pipeline(gateway).await;
        match &result {
            Ok(report) => info!(
                "Run complete: deleted {}/{} (skipped {}), inserted {}/{} (skipped {}), dropped {}, rejected {}",
                report.deletes.mutations(),
                report.deletes.count,
                report.deletes.skips(),
                report.inserts.mutations(),
                report.inserts.count,
                report.inserts.skips(),
                report.dropped,
                report.rejected
            ),
            Err(e) => match e.cursor() {
                Some(cursor) => error!(
                    "Run failed in {} stage at index {}: {}",
                    e.stage(),
                    cursor,
                    e
                ),
                None => error!("Run failed in {} stage: {}", e.stage(), e),
            },
        }
        result
    }

    async fn pipeline<G>(&self, gateway: &G) -> ReconcileResult<RunReport>
    where
        G: StoreGateway + ?Sized,
    {
        let classifier = ChangeClassifier::new(&self.config.fields);
        let mut classification = classifier
            .classify(gateway, &self.config.queue, self.config.page_limit)
            .await?;

        let mut engine = ReconciliationEngine::new(gateway, &self.config.target);
        let deletes = engine.run_list(&mut classification.deletes).await?;
        let inserts = engine.run_list(&mut classification.inserts).await?;

        Ok(RunReport {
            dropped: classification.dropped,
            rejected: classification.rejected,
            deletes,
            inserts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::error::RunStage;

    #[tokio::test]
    async fn run_against_empty_queue_succeeds() {
        let mut config = SyncConfig::default();
        config.connections = vec![
            ConnectionConfig::new("source", "memory:queue"),
            ConnectionConfig::new("destination", "memory:target"),
        ];
        let report = RunController::new(config).run().await.unwrap();
        assert_eq!(report.deletes.count, 0);
        assert_eq!(report.inserts.count, 0);
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn invalid_config_fails_before_connecting() {
        let config = SyncConfig {
            page_limit: 0,
            ..SyncConfig::default()
        };
        let err = RunController::new(config).run().await.unwrap_err();
        assert_eq!(err.stage(), RunStage::Config);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_as_connect_stage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        std::fs::write(&file, b"occupied").unwrap();

        let mut config = SyncConfig::default();
        config.connections = vec![
            ConnectionConfig::new("source", file.to_string_lossy()),
            ConnectionConfig::new("destination", "memory:target"),
        ];
        let err = RunController::new(config).run().await.unwrap_err();
        assert_eq!(err.stage(), RunStage::Connect);
    }
}
