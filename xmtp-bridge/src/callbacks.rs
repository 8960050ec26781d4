//! Pre-action callback gates.
//!
//! Each wait is a single-shot signal with a deadline. The host releases it
//! with [`PreActionGates::complete`], either by request id or for every
//! waiter of one action.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::oneshot;

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::events::{EventBridge, EventName};
use crate::library::PreActionHooks;
use crate::signature::request_id;
use crate::types::PreAction;

struct Gate {
    action: PreAction,
    release: oneshot::Sender<()>,
}

/// Open pre-action gates keyed by request id.
#[derive(Clone, Default)]
pub struct PreActionGates {
    open: Arc<DashMap<String, Gate>>,
}

impl fmt::Debug for PreActionGates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreActionGates")
            .field("open", &self.open.len())
            .finish()
    }
}

impl PreActionGates {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce `action` to the host and suspend until it completes the
    /// callback or `timeout` passes.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] when the deadline passes first.
    pub async fn wait(
        &self,
        events: &EventBridge,
        action: PreAction,
        address: &str,
        timeout: Duration,
    ) -> Result<()> {
        let id = request_id();
        let (tx, rx) = oneshot::channel();
        self.open.insert(id.clone(), Gate { action, release: tx });
        let _close = CloseOnDrop {
            id: id.clone(),
            open: Arc::clone(&self.open),
        };

        tracing::debug!(%action, request_id = %id, "waiting on host callback");
        events.emit(
            EventName::PreAction(action),
            json!({ "id": id, "address": address }),
        );

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(Error::Cancelled(action.to_string())),
            Err(_) => Err(Error::Timeout(action.to_string())),
        }
    }

    /// Release the gate `id`, or every open gate of `action` when `id` is
    /// `None`. Returns how many waiters were released.
    pub fn complete(&self, action: PreAction, id: Option<&str>) -> usize {
        let ids: Vec<String> = match id {
            Some(id) => vec![id.to_owned()],
            None => self
                .open
                .iter()
                .filter(|e| e.value().action == action)
                .map(|e| e.key().clone())
                .collect(),
        };

        let released = ids
            .iter()
            .filter_map(|id| self.open.remove_if(id, |_, g| g.action == action))
            .map(|(_, gate)| gate.release.send(()).is_ok())
            .filter(|sent| *sent)
            .count();
        if released == 0 {
            tracing::warn!(%action, request_id = ?id, "callback completion matched no waiter");
        }
        released
    }

    /// Number of open gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// Whether no gate is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

struct CloseOnDrop {
    id: String,
    open: Arc<DashMap<String, Gate>>,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.open.remove(&self.id);
    }
}

/// [`PreActionHooks`] that waits on the host for the actions it opted into.
pub struct HostHooks {
    gates: PreActionGates,
    events: EventBridge,
    options: ClientOptions,
    timeout: Duration,
}

impl fmt::Debug for HostHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHooks")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HostHooks {
    /// Hooks honoring the `has…Callback` flags in `options`.
    #[must_use]
    pub fn new(
        gates: PreActionGates,
        events: EventBridge,
        options: &ClientOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            gates,
            events,
            options: options.clone(),
            timeout,
        }
    }
}

#[async_trait]
impl PreActionHooks for HostHooks {
    async fn before(&self, action: PreAction, address: &str) -> Result<()> {
        if !self.options.wants_callback(action) {
            return Ok(());
        }
        self.gates
            .wait(&self.events, action, address, self.timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::events::{ChannelSink, HostEvent};

    fn bridge() -> (EventBridge, UnboundedReceiver<HostEvent>) {
        let (sink, rx) = ChannelSink::new();
        (EventBridge::new(Arc::new(sink)), rx)
    }

    #[tokio::test]
    async fn completion_by_id_releases_only_that_waiter() {
        let (events, mut rx) = bridge();
        let gates = PreActionGates::new();

        let waiter = tokio::spawn({
            let gates = gates.clone();
            async move {
                gates
                    .wait(&events, PreAction::CreateIdentity, "0xabc", Duration::from_secs(5))
                    .await
            }
        });

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.name, EventName::PreAction(PreAction::CreateIdentity));
        let id = ev.payload["id"].as_str().unwrap().to_owned();

        assert_eq!(gates.complete(PreAction::EnableIdentity, Some(&id)), 0);
        assert_eq!(gates.complete(PreAction::CreateIdentity, Some(&id)), 1);
        waiter.await.unwrap().unwrap();
        assert!(gates.is_empty());
    }

    #[tokio::test]
    async fn completion_without_id_releases_every_waiter_of_the_action() {
        let (events, mut rx) = bridge();
        let gates = PreActionGates::new();

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let gates = gates.clone();
            let events = events.clone();
            waiters.push(tokio::spawn(async move {
                gates
                    .wait(
                        &events,
                        PreAction::AuthenticateToInbox,
                        "0xabc",
                        Duration::from_secs(5),
                    )
                    .await
            }));
        }
        for _ in 0..3 {
            rx.recv().await.unwrap();
        }

        assert_eq!(gates.complete(PreAction::AuthenticateToInbox, None), 3);
        for w in waiters {
            w.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_callback_times_out() {
        let (events, _rx) = bridge();
        let gates = PreActionGates::new();
        let err = gates
            .wait(&events, PreAction::EnableIdentity, "0xabc", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(gates.is_empty());
    }

    #[tokio::test]
    async fn hooks_skip_actions_the_host_did_not_ask_for() {
        let (events, mut rx) = bridge();
        let hooks = HostHooks::new(
            PreActionGates::new(),
            events,
            &ClientOptions::default(),
            Duration::from_secs(1),
        );
        hooks.before(PreAction::CreateIdentity, "0xabc").await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
