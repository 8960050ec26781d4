//! Host-delegated signing.
//!
//! The library asks for a signature, the bridge emits a `sign` event with a
//! fresh request id and suspends until the host answers through
//! [`SignatureRequests::resolve`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::events::{EventBridge, EventName};
use crate::library::SigningKey;

/// Unique, hard-to-guess id for a host round trip.
pub(crate) fn request_id() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    let mut salt = [0u8; 8];
    if getrandom::fill(&mut salt).is_err() {
        tracing::warn!("system RNG unavailable; request id is sequential only");
    }
    format!("{seq}-{}", hex::encode(salt))
}

/// Sender for one issue of a request id, tagged so a superseded request
/// cannot withdraw its replacement.
#[derive(Debug)]
struct Slot {
    issue: u64,
    tx: oneshot::Sender<Vec<u8>>,
}

type Pending = Arc<DashMap<String, Slot>>;

/// Pending signature requests keyed by request id.
#[derive(Clone, Default)]
pub struct SignatureRequests {
    pending: Pending,
    issued: Arc<AtomicU64>,
}

impl fmt::Debug for SignatureRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureRequests")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SignatureRequests {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a request under a fresh id.
    #[must_use]
    pub fn issue(&self) -> PendingSignature {
        self.issue_with_id(request_id())
    }

    /// Open a request under a caller-chosen id, replacing any request that
    /// already used it.
    #[must_use]
    pub fn issue_with_id(&self, id: impl Into<String>) -> PendingSignature {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let issue = self.issued.fetch_add(1, Ordering::Relaxed);
        if self.pending.insert(id.clone(), Slot { issue, tx }).is_some() {
            tracing::debug!(request_id = %id, "signature request reissued");
        }
        PendingSignature {
            id,
            issue,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Deliver the signature for `id`. Unknown or already-resolved ids are
    /// ignored; returns whether a waiter received it.
    pub fn resolve(&self, id: &str, signature: Vec<u8>) -> bool {
        let Some((_, Slot { tx, .. })) = self.pending.remove(id) else {
            tracing::warn!(request_id = id, "signature for unknown request ignored");
            return false;
        };
        tx.send(signature).is_ok()
    }

    /// Number of unanswered requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// One outstanding request. Dropping it withdraws the request.
#[derive(Debug)]
pub struct PendingSignature {
    id: String,
    issue: u64,
    rx: oneshot::Receiver<Vec<u8>>,
    pending: Pending,
}

impl PendingSignature {
    /// Request id to hand to the host.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the host's answer.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if nothing arrives within `timeout`;
    /// [`Error::Cancelled`] if the request was withdrawn.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<u8>> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(signature)) => Ok(signature),
            Ok(Err(_)) => Err(Error::Cancelled(format!("signature request {}", self.id))),
            Err(_) => Err(Error::Timeout(format!("signature request {}", self.id))),
        }
    }
}

impl Drop for PendingSignature {
    fn drop(&mut self) {
        self.pending.remove_if(&self.id, |_, slot| slot.issue == self.issue);
    }
}

/// [`SigningKey`] that forwards every signing request to the host.
pub struct HostSigner {
    address: String,
    smart_contract_wallet: bool,
    chain_id: Option<u64>,
    block_number: Option<u64>,
    events: EventBridge,
    requests: SignatureRequests,
    timeout: Duration,
}

impl fmt::Debug for HostSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSigner")
            .field("address", &self.address)
            .field("smart_contract_wallet", &self.smart_contract_wallet)
            .finish_non_exhaustive()
    }
}

impl HostSigner {
    /// A signer for an externally owned account.
    #[must_use]
    pub fn new(
        address: impl Into<String>,
        events: EventBridge,
        requests: SignatureRequests,
        timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            smart_contract_wallet: false,
            chain_id: None,
            block_number: None,
            events,
            requests,
            timeout,
        }
    }

    /// Mark the account as a smart contract wallet verified on `chain_id`.
    #[must_use]
    pub const fn smart_contract_wallet(
        mut self,
        chain_id: u64,
        block_number: Option<u64>,
    ) -> Self {
        self.smart_contract_wallet = true;
        self.chain_id = Some(chain_id);
        self.block_number = block_number;
        self
    }
}

#[async_trait]
impl SigningKey for HostSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, text: &str) -> Result<Vec<u8>> {
        let pending = self.requests.issue();
        tracing::debug!(
            request_id = pending.id(),
            address = %self.address,
            "requesting host signature"
        );
        self.events.emit(
            EventName::Sign,
            json!({ "id": pending.id(), "address": self.address, "message": text }),
        );
        pending.wait(self.timeout).await
    }

    fn is_smart_contract_wallet(&self) -> bool {
        self.smart_contract_wallet
    }

    fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    fn block_number(&self) -> Option<u64> {
        self.block_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelSink;

    #[tokio::test]
    async fn first_signature_wins_and_repeats_are_ignored() {
        let requests = SignatureRequests::new();
        let pending = requests.issue_with_id("r1");

        assert!(requests.resolve("r1", vec![1, 2, 3]));
        assert!(!requests.resolve("r1", vec![9]));
        assert_eq!(pending.wait(Duration::from_secs(1)).await.unwrap(), vec![1, 2, 3]);
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn reissued_id_survives_the_superseded_request() {
        let requests = SignatureRequests::new();
        let stale = requests.issue_with_id("r1");
        let fresh = requests.issue_with_id("r1");
        drop(stale);

        assert_eq!(requests.len(), 1);
        assert!(requests.resolve("r1", vec![7]));
        assert_eq!(fresh.wait(Duration::from_secs(1)).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn unknown_request_is_a_no_op() {
        let requests = SignatureRequests::new();
        assert!(!requests.resolve("nope", vec![1]));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_and_is_withdrawn() {
        let requests = SignatureRequests::new();
        let pending = requests.issue();
        let id = pending.id().to_owned();
        let err = pending.wait(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(!requests.resolve(&id, vec![1]));
    }

    #[tokio::test]
    async fn host_signer_emits_sign_event() {
        let (sink, mut rx) = ChannelSink::new();
        let requests = SignatureRequests::new();
        let signer = HostSigner::new(
            "0xabc",
            EventBridge::new(Arc::new(sink)),
            requests.clone(),
            Duration::from_secs(5),
        );

        let answer = tokio::spawn({
            let requests = requests.clone();
            async move {
                let ev = rx.recv().await.unwrap();
                assert_eq!(ev.name, EventName::Sign);
                assert_eq!(ev.payload["message"], "hello");
                let id = ev.payload["id"].as_str().unwrap().to_owned();
                requests.resolve(&id, vec![0xaa])
            }
        });

        assert_eq!(signer.sign("hello").await.unwrap(), vec![0xaa]);
        assert!(answer.await.unwrap());
    }
}
