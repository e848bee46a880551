/// Monitoring module - reachability probes and report building
///
/// This module is responsible for:
/// - Probing individual targets through a [`Checker`]
/// - Fanning probes out over the configured servers
/// - Rendering the plain-text status report
pub mod aggregator;
pub mod checker;
pub mod types;

pub use aggregator::ReportBuilder;
pub use checker::{Checker, IcmpChecker};
pub use types::{ProbeResult, Report, Target};
