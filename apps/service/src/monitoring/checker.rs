use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use super::types::{Failure, ProbeResult, Target};

/// Checker trait for reachability probes
///
/// Implementations never return an error: every failure ends up in the
/// returned [`ProbeResult`] and is bounded by the checker's own deadline.
#[async_trait::async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, target: &Target) -> ProbeResult;
}

/// ICMP echo checker backed by the system `ping` binary
///
/// Raw sockets need elevated privileges, the setuid `ping` tool does not.
pub struct IcmpChecker {
    count: u32,
    timeout_duration: Duration,
}

impl IcmpChecker {
    pub fn new(count: u32, timeout_seconds: u64) -> Self {
        Self { count: count.max(1), timeout_duration: Duration::from_secs(timeout_seconds) }
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new("ping");
        let count = self.count.to_string();
        if cfg!(windows) {
            cmd.args(["-n", count.as_str(), address]);
        } else {
            cmd.args(["-c", count.as_str(), address]);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait::async_trait]
impl Checker for IcmpChecker {
    async fn check(&self, target: &Target) -> ProbeResult {
        if let Err(reason) = validate_address(&target.address) {
            return ProbeResult::unreachable(target.clone(), Failure::InvalidAddress(reason));
        }

        let output = match timeout(self.timeout_duration, self.command(&target.address).output()).await {
            Err(_) => return ProbeResult::unreachable(target.clone(), Failure::Timeout),
            Ok(Err(e)) => {
                return ProbeResult::unreachable(
                    target.clone(),
                    Failure::Error(format!("failed to run ping: {}", e)),
                );
            }
            Ok(Ok(output)) => output,
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        interpret(target.clone(), output.status.success(), &output.status.to_string(), &combined)
    }
}

/// Map a finished ping run onto a probe result
fn interpret(target: Target, success: bool, status: &str, output: &str) -> ProbeResult {
    if !success {
        return ProbeResult::unreachable(target, Failure::Error(status.to_string()));
    }

    // Windows ping exits 0 even when every request timed out
    if replies_lost(output) {
        return ProbeResult::unreachable(target, Failure::Timeout);
    }

    ProbeResult::reachable(target)
}

/// Only reply and statistics lines count; header lines echo the address
fn replies_lost(output: &str) -> bool {
    output.lines().map(str::trim).any(|line| {
        line.starts_with("Request timed out")
            || line.contains("100% packet loss")
            || line.contains("100.0% packet loss")
            || received_count(line) == Some(0)
    })
}

/// `4 packets transmitted, 0 received` or `Sent = 4, Received = 0, Lost = 4`
fn received_count(line: &str) -> Option<u64> {
    line.split(',').map(str::trim).find_map(|part| {
        part.strip_suffix(" packets received")
            .or_else(|| part.strip_suffix(" received"))
            .or_else(|| part.strip_prefix("Received = "))?
            .trim()
            .parse()
            .ok()
    })
}

/// Reject anything that is not a bare hostname or IP literal
pub fn validate_address(address: &str) -> Result<(), String> {
    if address.is_empty() {
        return Err("empty address".into());
    }
    if address.starts_with('-') {
        return Err("address must not start with '-'".into());
    }
    if let Some(c) = address
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '%' | '_')))
    {
        return Err(format!("unexpected character {:?}", c));
    }
    Ok(())
}
