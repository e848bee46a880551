/// Recurring jobs registered with the [`crate::scheduler::Scheduler`]
pub mod report;

pub use report::ReportTask;
