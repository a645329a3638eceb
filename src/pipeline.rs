//! The record processing pipeline.
//!
//! Every stage implements [`Stage`] and the pipeline drives them in a fixed
//! order from a single loop:
//!
//! ```text
//! Scanner ──► Dedup ──► Rules ──► Whitelist ──► Threshold ──► Actions ──► Unban
//!                                                                            │
//!                                              observers (logs, metrics) ◄───┘
//! ```
//!
//! Stage state (dedup window, threshold counters, metrics) is owned by the
//! pipeline instance, so it needs no locking. Only the unban list is shared
//! with the background reversal loop.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::actions::{ActionDispatcher, ActionMap};
use crate::cmd_abstraction::CommandExecutor;
use crate::dedup::Dedup;
use crate::observers::{ActionLog, Metrics, Observer, RejectionLog};
use crate::record::Record;
use crate::rules::{Rule, RuleEngine};
use crate::signal::ShutdownToken;
use crate::threshold::Threshold;
use crate::unban::{UnbanList, UnbanScheduler};
use crate::whitelist::Whitelist;

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Inspect and update the record.
    async fn handle(&mut self, record: &mut Record);
}

/// An ordered list of stages plus the observers that see every finished record.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    observers: Vec<Box<dyn Observer>>,
    metrics: Metrics,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            observers: Vec::new(),
            metrics: Metrics::new(),
        }
    }

    /// Build the standard dedup → rules → whitelist → threshold → actions → unban chain.
    pub fn standard(
        rules: Vec<Rule>,
        whitelist: Whitelist,
        actions: ActionMap,
        executor: Arc<dyn CommandExecutor>,
        unban_list: Arc<UnbanList>,
    ) -> Self {
        Self::new(vec![
            Box::new(Dedup::new()),
            Box::new(RuleEngine::new(rules)),
            Box::new(whitelist),
            Box::new(Threshold::new()),
            Box::new(ActionDispatcher::new(actions, executor)),
            Box::new(UnbanScheduler::new(unban_list)),
        ])
    }

    /// Attach the default observers: the action log and, if verbose, the rejection log.
    pub fn with_default_observers(self, verbose: bool) -> Self {
        self.with_observer(Box::new(ActionLog))
            .with_observer(Box::new(RejectionLog::new(verbose)))
    }

    pub fn with_observer(mut self, observer: Box<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Push one record through every stage, then hand it to the observers.
    ///
    /// Stages are skipped once the record is rejected.
    pub async fn process(&mut self, record: &mut Record) {
        for stage in self.stages.iter_mut() {
            if record.is_rejected() {
                break;
            }
            stage.handle(record).await;
            if let Some(reason) = record.rejection() {
                trace!("{} rejected by {}: {}", record.filename, stage.name(), reason);
            }
        }

        self.metrics.observe(record);
        for observer in self.observers.iter_mut() {
            observer.observe(record);
        }
    }

    /// Consume records until the channel closes or shutdown is requested.
    pub async fn run(&mut self, mut records: mpsc::Receiver<Record>, shutdown: ShutdownToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Pipeline stopping on shutdown");
                    break;
                }
                next = records.recv() => match next {
                    Some(mut record) => self.process(&mut record).await,
                    None => {
                        debug!("All sources finished");
                        break;
                    }
                },
            }
        }
        self.metrics.finish();
    }
}
