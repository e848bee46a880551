use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::error::SchedulerError;
use crate::monitoring::ReportBuilder;
use crate::scheduler::Scheduler;

/// Name the periodic subscriber report is registered under
pub const REPORT_TASK_NAME: &str = "send_report_to_subs";

/// Probe every server, then deliver the report to all subscribers
pub struct ReportTask {
    builder: Arc<ReportBuilder>,
    dispatcher: Arc<Dispatcher>,
    servers: Arc<BTreeMap<String, String>>,
}

impl ReportTask {
    pub fn new(
        builder: Arc<ReportBuilder>,
        dispatcher: Arc<Dispatcher>,
        servers: Arc<BTreeMap<String, String>>,
    ) -> Self {
        Self { builder, dispatcher, servers }
    }

    /// One report cycle; only a recipient fetch failure is returned as an error
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let report = self.builder.build_report(&self.servers).await;
        if cancel.is_cancelled() {
            info!("Report cycle cancelled before dispatch");
            return Ok(());
        }

        self.dispatcher.dispatch_report(&report, &cancel).await?;
        Ok(())
    }

    /// Register this task under [`REPORT_TASK_NAME`]
    pub fn register(self, scheduler: &mut Scheduler, interval: Duration) -> Result<(), SchedulerError> {
        let task = Arc::new(self);
        scheduler.add_task(REPORT_TASK_NAME, interval, move |cancel| {
            let task = Arc::clone(&task);
            async move { task.run(cancel).await }
        })
    }
}
