//! End-to-end report cycle: scheduler -> probes -> SQLite subscribers -> transport.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use pingwatch_service::database::{SubscriberRepository, initialize_database};
use pingwatch_service::dispatch::{DispatchConfig, Dispatcher, RecipientStore, Transport};
use pingwatch_service::error::TransportError;
use pingwatch_service::monitoring::types::Failure;
use pingwatch_service::monitoring::{Checker, ProbeResult, ReportBuilder, Target};
use pingwatch_service::pool::open_local;
use pingwatch_service::scheduler::Scheduler;
use pingwatch_service::tasks::ReportTask;
use pingwatch_service::telegram::client::parse_chat_id;

/// Addresses ending in `.down` are unreachable
struct SuffixChecker;

#[async_trait]
impl Checker for SuffixChecker {
    async fn check(&self, target: &Target) -> ProbeResult {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if target.address.ends_with(".down") {
            ProbeResult::unreachable(target.clone(), Failure::Timeout)
        } else {
            ProbeResult::reachable(target.clone())
        }
    }
}

/// Accepts Telegram-style numeric chat ids only
#[derive(Default)]
struct ChatTransport {
    delivered: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl Transport for ChatTransport {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError> {
        let chat_id = parse_chat_id(recipient)?;
        self.delivered.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_scheduled_report_reaches_sqlite_subscribers() -> Result<()> {
    let dir = tempdir()?;
    let pool = open_local(&dir.path().join("subs.db").to_string_lossy()).await?;
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }
    let store = Arc::new(SubscriberRepository::new_from_pool(pool));
    store.add_recipient("1001").await?;
    store.add_recipient("broken-id").await?;
    store.add_recipient("-2002").await?;

    let transport = Arc::new(ChatTransport::default());
    let dispatcher = Dispatcher::new(
        store.clone(),
        transport.clone(),
        DispatchConfig { fetch_timeout: Duration::from_secs(2), pacing: Duration::from_millis(10) },
    );
    let servers = BTreeMap::from([
        ("backup".to_string(), "backup.down".to_string()),
        ("api".to_string(), "api.up".to_string()),
    ]);

    let mut scheduler = Scheduler::new();
    ReportTask::new(Arc::new(ReportBuilder::new(Arc::new(SuffixChecker))), Arc::new(dispatcher), Arc::new(servers))
        .register(&mut scheduler, Duration::from_millis(100))?;

    scheduler.start(&CancellationToken::new())?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    scheduler.stop().await;

    let delivered = transport.delivered.lock().unwrap();
    let chats: Vec<i64> = delivered.iter().map(|(id, _)| *id).collect();
    assert!(!chats.is_empty());
    // every cycle skips the malformed id and keeps subscription order; stop may cut the last one short
    assert!(
        chats.chunks(2).all(|cycle| cycle[0] == 1001 && cycle.get(1).is_none_or(|id| *id == -2002)),
        "unexpected deliveries {chats:?}"
    );
    assert_eq!(chats[..2], [1001, -2002]);

    let report = &delivered[0].1;
    assert_eq!(report.lines().count(), 2);
    assert!(report.starts_with("api - ✅"));
    assert!(report.contains("backup - ❌ Сервер backup.down недоступен (timeout)"));
    Ok(())
}

#[tokio::test]
async fn test_unsubscribed_chat_is_skipped_next_cycle() -> Result<()> {
    let dir = tempdir()?;
    let pool = open_local(&dir.path().join("subs.db").to_string_lossy()).await?;
    {
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
    }
    let store = Arc::new(SubscriberRepository::new_from_pool(pool));
    store.add_recipient("1").await?;
    store.add_recipient("2").await?;

    let transport = Arc::new(ChatTransport::default());
    let dispatcher = Dispatcher::new(store.clone(), transport.clone(), DispatchConfig::default());
    let builder = ReportBuilder::new(Arc::new(SuffixChecker));
    let servers = BTreeMap::from([("api".to_string(), "api.up".to_string())]);

    let report = builder.build_report(&servers).await;
    dispatcher.dispatch_report(&report, &CancellationToken::new()).await?;
    store.remove_recipient("1").await?;
    let summary = dispatcher.dispatch_report(&report, &CancellationToken::new()).await?;

    assert_eq!(summary.attempted, 1);
    let chats: Vec<i64> = transport.delivered.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(chats, vec![1, 2, 2]);
    Ok(())
}
