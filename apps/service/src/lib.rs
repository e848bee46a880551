//! pingwatch - server reachability reports over Telegram
//!
//! A [`scheduler::Scheduler`] drives the periodic [`tasks::ReportTask`], which
//! probes every configured server concurrently and delivers the report to all
//! current subscribers through a [`dispatch::Dispatcher`].

pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod monitoring;
pub mod pool;
pub mod scheduler;
pub mod tasks;
pub mod telegram;
