use std::fmt;

/// A named network endpoint that gets probed on every report cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
    pub address: String,
}

impl Target {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self { name: name.into(), address: address.into() }
    }
}

/// Why a probe failed to reach its target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// No reply within the probe deadline, or the tool reported a timeout
    Timeout,
    /// The address was rejected before any packet was sent
    InvalidAddress(String),
    /// Non-zero exit, spawn failure, or anything else the tool reported
    Error(String),
}

/// Result of probing one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub target: Target,
    pub reachable: bool,
    /// Human-readable status line rendered into the report
    pub detail: String,
}

impl ProbeResult {
    /// Mark the target as reachable
    pub fn reachable(target: Target) -> Self {
        let detail = format!("✅ Сервер {} доступен", target.address);
        Self { target, reachable: true, detail }
    }

    /// Mark the target as unreachable with the reason
    pub fn unreachable(target: Target, failure: Failure) -> Self {
        let detail = match &failure {
            Failure::Timeout => format!("❌ Сервер {} недоступен (timeout)", target.address),
            Failure::InvalidAddress(reason) => {
                format!("❌ Сервер {} недоступен: invalid address ({})", target.address, reason)
            }
            Failure::Error(reason) => format!("❌ Сервер {} недоступен: {}", target.address, reason),
        };
        Self { target, reachable: false, detail }
    }
}

/// Plain-text status report, one `<name> - <status>` line per target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report(String);

impl Report {
    pub(crate) fn from_results<'a>(results: impl IntoIterator<Item = &'a ProbeResult>) -> Self {
        let mut text = String::new();
        for result in results {
            text.push_str(&result.target.name);
            text.push_str(" - ");
            text.push_str(&result.detail);
            text.push('\n');
        }
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
