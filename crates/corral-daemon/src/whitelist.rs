//! Hostname whitelist watcher
//!
//! Re-reads the whitelist file on an interval and delivers changes to the
//! coordinator. A line containing only `*` accepts every host; an empty file
//! accepts none. If the file cannot be read, the last list stays in force.

use crate::error::DaemonResult;
use corral_coordinator::CoordinatorHandle;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Parse whitelist file contents. `None` means every host is accepted.
/// Blank lines and `#` comments are ignored.
pub fn parse(contents: &str) -> Option<BTreeSet<String>> {
    let mut hosts = BTreeSet::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if line == "*" {
            return None;
        }
        hosts.insert(line.to_string());
    }
    Some(hosts)
}

pub struct WhitelistWatcher {
    path: PathBuf,
    interval: Duration,
    handle: CoordinatorHandle,
    /// Last list delivered to the coordinator
    current: Option<Option<BTreeSet<String>>>,
}

impl WhitelistWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration, handle: CoordinatorHandle) -> Self {
        Self {
            path: path.into(),
            interval,
            handle,
            current: None,
        }
    }

    /// Read the file once. Returns whether a new list was delivered.
    pub async fn poll(&mut self) -> DaemonResult<bool> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read whitelist; keeping the last one");
                return Ok(false);
            }
        };

        let whitelist = parse(&contents);
        if self.current.as_ref() == Some(&whitelist) {
            return Ok(false);
        }

        match &whitelist {
            Some(hosts) => info!(path = %self.path.display(), hosts = hosts.len(), "Whitelist changed"),
            None => info!(path = %self.path.display(), "Whitelist accepts all hosts"),
        }
        self.handle.update_whitelist(whitelist.clone()).await?;
        self.current = Some(whitelist);
        Ok(true)
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        warn!(error = %e, "Whitelist watcher stopping");
                        return;
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Whitelist watcher shutting down");
                    return;
                }
            }
        }
    }
}
