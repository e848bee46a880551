use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error};

use super::checker::Checker;
use super::types::{Failure, ProbeResult, Report, Target};

/// Fans a probe out to every configured target and renders the report
pub struct ReportBuilder {
    checker: Arc<dyn Checker>,
}

impl ReportBuilder {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Probe all `targets` concurrently and wait for every one of them
    ///
    /// Lines are ordered by target name.
    pub async fn build_report(&self, targets: &BTreeMap<String, String>) -> Report {
        let results: Arc<Mutex<BTreeMap<String, ProbeResult>>> = Arc::new(Mutex::new(BTreeMap::new()));

        let handles: Vec<_> = targets
            .iter()
            .map(|(name, address)| {
                let target = Target::new(name.clone(), address.clone());
                let checker = Arc::clone(&self.checker);
                let results = Arc::clone(&results);
                tokio::spawn(async move {
                    let result = checker.check(&target).await;
                    debug!(target = %target.name, reachable = result.reachable, "Probe finished");
                    results.lock().await.insert(target.name, result);
                })
            })
            .collect();

        for outcome in join_all(handles).await {
            if let Err(e) = outcome {
                error!("Probe task failed: {}", e);
            }
        }

        let mut results = results.lock().await;

        // A probe task that died before recording still gets its line
        for (name, address) in targets {
            if !results.contains_key(name) {
                let target = Target::new(name.clone(), address.clone());
                results.insert(
                    name.clone(),
                    ProbeResult::unreachable(target, Failure::Error("probe task failed".into())),
                );
            }
        }

        Report::from_results(results.values())
    }
}
