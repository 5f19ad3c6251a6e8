//! Connectivity transitions.
//!
//! The platform reports reachability into a `watch` channel; the watcher
//! task turns every change into `ConnectionRestored` / `ConnectionLost`.
//! It runs for the process lifetime and does not look at `locked`; the
//! projection ignores connectivity after lock-in on its own.

use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::Publisher;
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    const fn event(self) -> Event {
        match self {
            Self::Online => Event::ConnectionRestored,
            Self::Offline => Event::ConnectionLost,
        }
    }
}

/// Spawn the watcher.
///
/// An initial `Offline` reading is published as `ConnectionLost`; an initial
/// `Online` reading publishes nothing. After that every change publishes
/// once. The task ends when the sender is dropped.
pub fn watch_connectivity(
    mut rx: watch::Receiver<Connectivity>,
    publisher: Publisher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = *rx.borrow_and_update();
        if last == Connectivity::Offline {
            publisher.publish(last.event());
        }
        while rx.changed().await.is_ok() {
            let current = *rx.borrow_and_update();
            if current != last {
                info!(connectivity = ?current, "connectivity changed");
                publisher.publish(current.event());
                last = current;
            }
        }
        debug!("connectivity source closed");
    })
}

/// Reachability source that periodically opens a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    pub address: String,
    pub interval: Duration,
    pub connect_timeout: Duration,
}

impl TcpProbe {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(3),
        }
    }

    /// Probe once.
    pub async fn check(&self) -> Connectivity {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await
        {
            Ok(Ok(_)) => Connectivity::Online,
            _ => Connectivity::Offline,
        }
    }

    /// Probe forever, feeding the returned receiver. The first probe
    /// completes before this returns.
    pub async fn spawn(self) -> (watch::Receiver<Connectivity>, JoinHandle<()>) {
        let initial = self.check().await;
        let (tx, rx) = watch::channel(initial);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                let state = self.check().await;
                tx.send_if_modified(|current| {
                    let changed = *current != state;
                    *current = state;
                    changed
                });
                if tx.is_closed() {
                    break;
                }
            }
        });
        (rx, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;

    #[tokio::test]
    async fn transitions_publish_once_each() {
        let (publisher, mut inbox) = bus::channel();
        let (tx, rx) = watch::channel(Connectivity::Online);
        let task = watch_connectivity(rx, publisher);

        tx.send_replace(Connectivity::Offline);
        assert_eq!(inbox.recv().await, Some(Event::ConnectionLost));
        tx.send_replace(Connectivity::Online);
        assert_eq!(inbox.recv().await, Some(Event::ConnectionRestored));

        drop(tx);
        task.await.expect("watcher exits");
        assert!(inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn initial_offline_is_reported() {
        let (publisher, mut inbox) = bus::channel();
        let (tx, rx) = watch::channel(Connectivity::Offline);
        let task = watch_connectivity(rx, publisher);
        assert_eq!(inbox.recv().await, Some(Event::ConnectionLost));
        drop(tx);
        task.await.expect("watcher exits");
    }

    #[tokio::test]
    async fn probe_reports_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        assert_eq!(TcpProbe::new(address).check().await, Connectivity::Online);
    }
}
