//! Online/offline signal
//!
//! A single boolean published over a `watch` channel. It is set explicitly
//! (e.g. `--offline`) or by a background HTTP probe against the server.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
    probe: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self {
            tx: Arc::new(tx),
            probe: None,
        }
    }

    /// Publish a new state; returns whether it changed
    pub fn set_online(&self, online: bool) -> bool {
        publish(&self.tx, online)
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Probe `url` every `interval` and publish the result.
    ///
    /// Replaces a probe that is already running.
    pub fn start_probe(&mut self, url: String, interval: Duration, timeout: Duration) {
        self.stop_probe();

        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Connectivity probe disabled: {}", e);
                return;
            }
        };

        let tx = Arc::clone(&self.tx);
        self.probe = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe_once(&client, &url).await;
                if publish(&tx, reachable) {
                    tracing::info!(
                        "Server {} is {}",
                        url,
                        if reachable { "reachable" } else { "unreachable" }
                    );
                }
            }
        }));
    }

    pub fn stop_probe(&mut self) {
        if let Some(probe) = self.probe.take() {
            probe.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop_probe();
    }
}

fn publish(tx: &watch::Sender<bool>, online: bool) -> bool {
    tx.send_if_modified(|current| {
        if *current == online {
            return false;
        }
        *current = online;
        true
    })
}

/// One reachability check; any HTTP response counts as reachable
pub async fn probe_once(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) => {
            tracing::trace!("Probe {} -> {}", url, response.status());
            true
        }
        Err(e) => {
            tracing::debug!("Probe {} failed: {}", url, e);
            false
        }
    }
}

/// Probe `url` once with a fresh client
pub async fn probe_url(url: &str, timeout: Duration) -> bool {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => probe_once(&client, url).await,
        Err(e) => {
            tracing::warn!("Connectivity probe unavailable: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_changes_are_published() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(!monitor.set_online(false));
        assert!(!rx.has_changed().unwrap());

        assert!(monitor.set_online(true));
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_probe_against_closed_port_is_offline() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        assert!(!probe_once(&client, "http://127.0.0.1:9").await);
    }

    #[tokio::test]
    async fn test_probe_task_reports_unreachable() {
        let mut monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.subscribe();
        monitor.start_probe(
            "http://127.0.0.1:9".to_string(),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!monitor.is_online());
        monitor.stop_probe();
    }
}
