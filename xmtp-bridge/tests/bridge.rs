#![cfg(feature = "loopback")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use xmtp_bridge::loopback::LoopbackNetwork;
use xmtp_bridge::registry::EntityKey;
use xmtp_bridge::types::{CreateGroupOptions, ListMessagesOptions};
use xmtp_bridge::{
    Bridge, BridgeConfig, ChannelSink, ClientInfo, ClientOptions, ConsentEntityType, ConsentState,
    Error, EventName, HostEvent, IdentityState, MetadataField, PermissionUpdateType, PreAction,
    SubscriptionKey, SubscriptionKind, WalletOptions,
};

struct Host {
    bridge: Arc<Bridge>,
    events: UnboundedReceiver<HostEvent>,
    network: LoopbackNetwork,
    dir: TempDir,
}

fn host_with(config: impl FnOnce(&TempDir) -> BridgeConfig) -> Host {
    let dir = tempfile::tempdir().unwrap();
    let network = LoopbackNetwork::new();
    let (sink, events) = ChannelSink::new();
    let bridge = Bridge::new(Arc::new(network.clone()), Arc::new(sink), config(&dir));
    Host {
        bridge: Arc::new(bridge),
        events,
        network,
        dir,
    }
}

fn host() -> Host {
    host_with(|dir| BridgeConfig::builder().prepared_dir(dir.path()).build())
}

fn v3() -> ClientOptions {
    ClientOptions {
        enable_v3: true,
        ..ClientOptions::default()
    }
}

async fn user(host: &Host) -> ClientInfo {
    host.bridge.create_random(v3()).await.unwrap()
}

/// Next event called `name`, skipping any other.
async fn next_event(rx: &mut UnboundedReceiver<HostEvent>, name: EventName) -> HostEvent {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if event.name == name {
            return event;
        }
    }
}

async fn no_event(rx: &mut UnboundedReceiver<HostEvent>, name: EventName) {
    let waited = timeout(Duration::from_millis(200), async {
        while let Some(event) = rx.recv().await {
            if event.name == name {
                return event;
            }
        }
        std::future::pending().await
    })
    .await;
    assert!(waited.is_err(), "unexpected {name} event: {waited:?}");
}

async fn conversation(host: &Host, from: &ClientInfo, to: &ClientInfo) -> String {
    let c = host
        .bridge
        .create_conversation(&from.inbox_id, &to.address, None)
        .await
        .unwrap();
    c["topic"].as_str().unwrap().to_owned()
}

// ── Identity ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn auth_asks_the_host_for_each_signature() {
    let mut host = host();
    let address = "0xAbC0000000000000000000000000000000000001";

    for expected_signatures in [2, 1] {
        let bridge = Arc::clone(&host.bridge);
        let auth = tokio::spawn(async move {
            bridge
                .auth(address, &ClientOptions::default(), WalletOptions::default())
                .await
        });

        let mut signed = 0;
        loop {
            let event = timeout(Duration::from_secs(5), host.events.recv())
                .await
                .unwrap()
                .unwrap();
            match event.name {
                EventName::Sign => {
                    assert_eq!(event.payload["address"], address);
                    let id = event.payload["id"].as_str().unwrap();
                    assert!(host.bridge.receive_signature(id, "0xdeadbeef").unwrap());
                    signed += 1;
                }
                EventName::Authed => break,
                other => panic!("unexpected event {other}"),
            }
        }
        assert_eq!(signed, expected_signatures);

        let info = auth.await.unwrap().unwrap();
        assert_eq!(info.address, address.to_lowercase());
        assert_eq!(host.bridge.identity_state(address), IdentityState::Active);
    }
    assert_eq!(host.bridge.identities().len(), 1);
    assert_eq!(host.network.inbox_count(), 1);
}

#[tokio::test]
async fn repeated_and_unknown_signatures_are_ignored() {
    let host = host();
    assert!(!host.bridge.receive_signature("r1", "0x01").unwrap());
    assert!(matches!(
        host.bridge.receive_signature("r1", "not hex"),
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn pre_action_callbacks_gate_authentication() {
    let mut host = host();
    let bridge = Arc::clone(&host.bridge);
    let create = tokio::spawn(async move {
        bridge
            .call(
                "createRandom",
                json!({ "options": {
                    "enableV3": true,
                    "hasPreCreateIdentityCallback": true,
                    "hasPreAuthenticateToInboxCallback": true,
                }}),
            )
            .await
    });

    for action in [PreAction::CreateIdentity, PreAction::AuthenticateToInbox] {
        let event = next_event(&mut host.events, EventName::PreAction(action)).await;
        let released = host
            .bridge
            .call(
                &format!("{action}Completed"),
                json!({ "id": event.payload["id"] }),
            )
            .await
            .unwrap();
        assert_eq!(released, 1);
    }

    let info = create.await.unwrap().unwrap();
    let inbox_id = info["inboxId"].as_str().unwrap();
    assert_eq!(host.bridge.identity_state(inbox_id), IdentityState::Active);
}

#[tokio::test(start_paused = true)]
async fn unanswered_callback_times_out() {
    let host = host_with(|dir| {
        BridgeConfig::builder()
            .prepared_dir(dir.path())
            .callback_timeout(Duration::from_secs(30))
            .build()
    });
    let options = ClientOptions {
        has_pre_enable_identity_callback: true,
        ..ClientOptions::default()
    };
    let err = host.bridge.create_random(options).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
    assert!(host.bridge.identities().is_empty());
}

#[tokio::test]
async fn key_bundle_restores_the_same_inbox() {
    let host = host();
    let alice = user(&host).await;
    let bundle = host.bridge.export_key_bundle(&alice.inbox_id).await.unwrap();

    let restored = host
        .bridge
        .create_from_key_bundle(&bundle, &v3())
        .await
        .unwrap();
    assert_eq!(restored.inbox_id, alice.inbox_id);
    assert_ne!(restored.installation_id, alice.installation_id);
    assert_eq!(host.bridge.identities().len(), 1);

    assert!(matches!(
        host.bridge.create_from_key_bundle("zz", &v3()).await,
        Err(Error::InvalidKeyBundle)
    ));
}

#[tokio::test]
async fn sign_needs_a_32_byte_digest() {
    let host = host();
    let alice = user(&host).await;
    let sig = host
        .bridge
        .sign(&alice.inbox_id, &format!("0x{}", "ab".repeat(32)))
        .await
        .unwrap();
    assert_eq!(sig.len(), 64);
    assert!(matches!(
        host.bridge.sign(&alice.inbox_id, "abcd").await,
        Err(Error::InvalidDigest)
    ));
}

// ── Registries ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_lookups_share_one_cached_handle() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;

    let lookups = futures::future::join_all(
        (0..8).map(|_| host.bridge.find_conversation(&bob.inbox_id, &topic)),
    )
    .await;
    assert!(lookups.iter().all(|r| matches!(r, Ok(Some(_)))));

    let key = EntityKey::new(bob.inbox_id.as_str(), topic.as_str());
    let first = host.bridge.cache().get(&key).unwrap();
    host.bridge.find_conversation(&bob.inbox_id, &topic).await.unwrap();
    let second = host.bridge.cache().get(&key).unwrap();
    assert!(first.same_handle(&second));
    assert_eq!(host.bridge.cache().len_for(&bob.inbox_id), 1);
}

#[tokio::test]
async fn replaced_listener_never_delivers() {
    let mut host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;
    let kind = SubscriptionKind::ConversationMessages;

    let first = host
        .bridge
        .subscribe(kind, &bob.inbox_id, Some(&topic))
        .await
        .unwrap();
    let second = host
        .bridge
        .subscribe(kind, &bob.inbox_id, Some(&topic))
        .await
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(host.bridge.subscriptions().len(), 1);

    host.bridge
        .send_message(&alice.inbox_id, &topic, &json!({ "text": "once" }))
        .await
        .unwrap();
    let event = next_event(&mut host.events, EventName::ConversationMessage).await;
    assert_eq!(event.payload["inboxId"], bob.inbox_id.as_str());
    assert_eq!(event.payload["topic"], topic.as_str());
    assert_eq!(event.payload["message"]["content"]["text"], "once");
    no_event(&mut host.events, EventName::ConversationMessage).await;
}

#[tokio::test]
async fn drop_waits_for_a_subscribe_in_flight() {
    let host = host();
    let alice = user(&host).await;
    let entry = host.bridge.identities().require(&alice.inbox_id).unwrap();

    // Stands in for a subscribe that leased the client and is still
    // opening its stream.
    let lease = entry.lease().await.unwrap();
    let bridge = Arc::clone(&host.bridge);
    let inbox_id = alice.inbox_id.clone();
    let dropping = tokio::spawn(async move { bridge.drop_client(&inbox_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!dropping.is_finished());
    assert_eq!(host.bridge.identities().len(), 1);

    let key = SubscriptionKey::new(SubscriptionKind::AllMessages, alice.inbox_id.as_str(), None)
        .unwrap();
    host.bridge
        .subscriptions()
        .start(key.clone(), std::future::pending::<()>())
        .await;
    assert!(format!("{lease:?}").contains(&alice.inbox_id));
    drop(lease);

    assert!(dropping.await.unwrap());
    assert!(!host.bridge.subscriptions().is_active(&key));
    assert!(host.bridge.identities().is_empty());
    assert!(matches!(entry.lease().await, Err(Error::NoClient(_))));
}

#[tokio::test]
async fn unsubscribing_twice_is_a_no_op() {
    let host = host();
    let alice = user(&host).await;
    host.bridge
        .subscribe(SubscriptionKind::Conversations, &alice.inbox_id, None)
        .await
        .unwrap();

    let kind = SubscriptionKind::Conversations;
    assert!(host.bridge.unsubscribe(kind, &alice.inbox_id, None).await.unwrap());
    assert!(!host.bridge.unsubscribe(kind, &alice.inbox_id, None).await.unwrap());
    assert!(!host.bridge.is_subscribed(kind, &alice.inbox_id, None).unwrap());
}

#[tokio::test]
async fn dropping_one_identity_leaves_others_alone() {
    let mut host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;
    host.bridge.find_conversation(&bob.inbox_id, &topic).await.unwrap();
    for who in [&alice, &bob] {
        host.bridge
            .subscribe(SubscriptionKind::AllMessages, &who.inbox_id, None)
            .await
            .unwrap();
    }

    assert!(host.bridge.drop_client(&alice.inbox_id).await);
    assert!(!host.bridge.drop_client(&alice.inbox_id).await);

    let kind = SubscriptionKind::AllMessages;
    assert!(!host.bridge.is_subscribed(kind, &alice.inbox_id, None).unwrap());
    assert!(host.bridge.is_subscribed(kind, &bob.inbox_id, None).unwrap());
    assert_eq!(host.bridge.cache().len_for(&alice.inbox_id), 0);
    assert_eq!(host.bridge.cache().len_for(&bob.inbox_id), 1);

    host.bridge
        .send_message(&bob.inbox_id, &topic, &json!({ "text": "still here" }))
        .await
        .unwrap();
    let event = next_event(&mut host.events, EventName::Message).await;
    assert_eq!(event.payload["inboxId"], bob.inbox_id.as_str());
    assert!(matches!(
        host.bridge.list_conversations(&alice.inbox_id).await,
        Err(Error::NoClient(_))
    ));
}

#[tokio::test]
async fn re_registering_tears_down_the_old_client() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;
    host.bridge
        .subscribe(SubscriptionKind::Conversations, &alice.inbox_id, None)
        .await
        .unwrap();
    assert_eq!(host.bridge.cache().len_for(&alice.inbox_id), 1);

    let rebuilt = host.bridge.build(&alice.address, &v3()).await.unwrap();
    assert_eq!(rebuilt.inbox_id, alice.inbox_id);

    let kind = SubscriptionKind::Conversations;
    assert!(!host.bridge.is_subscribed(kind, &alice.inbox_id, None).unwrap());
    assert_eq!(host.bridge.cache().len_for(&alice.inbox_id), 0);
    assert_eq!(host.bridge.identities().len(), 2);

    let found = host
        .bridge
        .find_conversation(&alice.inbox_id, &topic)
        .await
        .unwrap();
    assert_eq!(found.unwrap()["peerAddress"], bob.address.as_str());
}

// ── Conversations ────────────────────────────────────────────────────────────

#[tokio::test]
async fn messages_flow_between_two_identities() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;

    for text in ["one", "two"] {
        host.bridge
            .send_message(&alice.inbox_id, &topic, &json!({ "text": text }))
            .await
            .unwrap();
    }

    let listed = host.bridge.list_conversations(&bob.inbox_id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["peerAddress"], alice.address.as_str());
    assert_eq!(listed[0]["version"], "v2");

    let messages = host
        .bridge
        .conversation_messages(&bob.inbox_id, &topic, &ListMessagesOptions::default())
        .await
        .unwrap();
    let texts: Vec<&Value> = messages.iter().map(|m| &m["content"]["text"]).collect();
    assert_eq!(texts, ["two", "one"]);
    assert_eq!(messages[0]["senderInboxId"], alice.inbox_id.as_str());

    let limited = host
        .bridge
        .call(
            "conversationMessages",
            json!({ "inboxId": bob.address, "topic": topic, "limit": 1 }),
        )
        .await
        .unwrap();
    assert_eq!(limited.as_array().unwrap().len(), 1);

    assert!(matches!(
        host.bridge
            .send_message(&alice.inbox_id, &topic, &json!({ "video": "x" }))
            .await,
        Err(Error::NoMessage(_))
    ));
    assert!(
        host.bridge
            .find_conversation(&alice.inbox_id, "/xmtp/0/m-missing/proto")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn prepared_message_is_sent_once() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;

    let prepared = host
        .bridge
        .prepare_message(&alice.inbox_id, &topic, &json!({ "text": "later" }))
        .await
        .unwrap();
    let file = host
        .dir
        .path()
        .join(format!("{}.prepared", prepared.message_id));
    assert!(file.exists());
    assert!(prepared.prepared_file_uri.starts_with("file://"));

    let sent = host
        .bridge
        .send_prepared_message(&alice.inbox_id, &prepared)
        .await
        .unwrap();
    assert_eq!(sent, prepared.message_id);
    assert!(!file.exists());
    assert!(matches!(
        host.bridge
            .send_prepared_message(&alice.inbox_id, &prepared)
            .await,
        Err(Error::BadPreparation(_))
    ));

    let messages = host
        .bridge
        .conversation_messages(&bob.inbox_id, &topic, &ListMessagesOptions::default())
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], sent.as_str());
}

#[tokio::test]
async fn all_stream_delivers_groups_and_caches_them() {
    let mut host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    host.bridge
        .subscribe(SubscriptionKind::All, &bob.inbox_id, None)
        .await
        .unwrap();

    let group = host
        .bridge
        .create_group(
            &alice.inbox_id,
            std::slice::from_ref(&bob.address),
            &CreateGroupOptions::default(),
        )
        .await
        .unwrap();
    let id = group["id"].as_str().unwrap();

    let event = next_event(&mut host.events, EventName::ConversationContainer).await;
    let container = &event.payload["conversationContainer"];
    assert_eq!(container["version"], "v3");
    assert_eq!(container["id"], id);
    assert_eq!(container["addedByInboxId"], alice.inbox_id.as_str());
    let key = EntityKey::new(bob.inbox_id.as_str(), id);
    assert!(host.bridge.cache().get(&key).is_some_and(|c| c.is_group()));
}

// ── Groups ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn group_membership_and_permissions() {
    let host = host();
    let (alice, bob, carol) = (user(&host).await, user(&host).await, user(&host).await);
    let group = host
        .bridge
        .call(
            "createGroup",
            json!({
                "inboxId": alice.inbox_id,
                "peerAddresses": [bob.address],
                "name": "ops",
            }),
        )
        .await
        .unwrap();
    let id = group["id"].as_str().unwrap();
    assert_eq!(group["name"], "ops");

    assert_eq!(
        host.bridge.list_super_admins(&alice.inbox_id, id).await.unwrap(),
        [alice.inbox_id.clone()]
    );
    host.bridge
        .add_group_members(&bob.inbox_id, id, std::slice::from_ref(&carol.address))
        .await
        .unwrap();
    assert_eq!(host.bridge.group_members(&carol.inbox_id, id).await.unwrap().len(), 3);

    assert!(matches!(
        host.bridge
            .update_permission(
                &alice.inbox_id,
                id,
                PermissionUpdateType::AddMember,
                "owner",
                None,
            )
            .await,
        Err(Error::InvalidPermissionOption(v)) if v == "owner"
    ));
    host.bridge
        .update_permission(
            &alice.inbox_id,
            id,
            PermissionUpdateType::UpdateMetadata,
            "admin",
            Some(MetadataField::Name),
        )
        .await
        .unwrap();
    assert!(matches!(
        host.bridge
            .call(
                "updateGroupName",
                json!({ "inboxId": bob.inbox_id, "groupId": id, "value": "mine" }),
            )
            .await,
        Err(Error::Library(_))
    ));
    host.bridge
        .add_admin(&alice.inbox_id, id, &bob.inbox_id)
        .await
        .unwrap();
    host.bridge
        .call(
            "updateGroupName",
            json!({ "inboxId": bob.inbox_id, "groupId": id, "value": "mine" }),
        )
        .await
        .unwrap();
    let seen = host.bridge.find_group(&carol.inbox_id, id).await.unwrap();
    assert_eq!(seen.unwrap()["name"], "mine");

    host.bridge
        .remove_group_members_by_inbox_id(
            &alice.inbox_id,
            id,
            std::slice::from_ref(&carol.inbox_id),
        )
        .await
        .unwrap();
    assert!(!host.bridge.is_group_active(&carol.inbox_id, id).await.unwrap());
    assert!(host.bridge.is_group_active(&bob.inbox_id, id).await.unwrap());
}

#[tokio::test]
async fn group_messages_reach_every_member() {
    let mut host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let group = host
        .bridge
        .create_group(
            &alice.inbox_id,
            std::slice::from_ref(&bob.address),
            &CreateGroupOptions::default(),
        )
        .await
        .unwrap();
    let id = group["id"].as_str().unwrap();
    host.bridge
        .subscribe(SubscriptionKind::GroupMessages, &bob.inbox_id, Some(id))
        .await
        .unwrap();

    host.bridge
        .send_message(&alice.inbox_id, id, &json!({ "markdown": "**hi**" }))
        .await
        .unwrap();
    let event = next_event(&mut host.events, EventName::GroupMessage).await;
    assert_eq!(event.payload["groupId"], id);
    assert_eq!(event.payload["message"]["content"]["markdown"], "**hi**");

    let stored = host
        .bridge
        .group_messages(&bob.inbox_id, id, &ListMessagesOptions::default())
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn group_operations_need_mls() {
    let host = host();
    let dave = host
        .bridge
        .create_random(ClientOptions::default())
        .await
        .unwrap();
    let bob = user(&host).await;

    assert!(matches!(
        host.bridge
            .create_group(&dave.inbox_id, &[bob.address], &CreateGroupOptions::default())
            .await,
        Err(Error::MlsNotEnabled)
    ));
    assert!(matches!(
        host.bridge
            .subscribe(SubscriptionKind::Groups, &dave.inbox_id, None)
            .await,
        Err(Error::MlsNotEnabled)
    ));
    assert!(matches!(
        host.bridge.call("listGroups", json!({ "inboxId": dave.inbox_id })).await,
        Err(Error::MlsNotEnabled)
    ));
    assert!(matches!(
        host.bridge
            .subscribe(SubscriptionKind::AllGroupMessages, &dave.inbox_id, None)
            .await,
        Err(Error::MlsNotEnabled)
    ));
    assert!(matches!(
        host.bridge.group_members(&dave.inbox_id, "any-group").await,
        Err(Error::MlsNotEnabled)
    ));
    assert!(host.bridge.list_all(&dave.inbox_id).await.unwrap().is_empty());
}

// ── Consent ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn consent_is_recorded_and_refreshed() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);
    let topic = conversation(&host, &alice, &bob).await;

    assert!(host.bridge.is_allowed(&alice.inbox_id, &bob.address).await.unwrap());
    assert_eq!(
        host.bridge
            .conversation_consent_state(&bob.inbox_id, &topic)
            .await
            .unwrap(),
        ConsentState::Unknown
    );
    host.bridge
        .deny(&bob.inbox_id, std::slice::from_ref(&alice.address))
        .await
        .unwrap();
    assert_eq!(
        host.bridge
            .conversation_consent_state(&bob.inbox_id, &topic)
            .await
            .unwrap(),
        ConsentState::Denied
    );

    let spammer = "0x00000000000000000000000000000000000000ff";
    host.network.set_remote_consent(
        &bob.inbox_id,
        ConsentEntityType::Address,
        spammer,
        ConsentState::Denied,
    );
    assert!(!host.bridge.is_denied(&bob.inbox_id, spammer).await.unwrap());
    let refreshed = host.bridge.refresh_consent_list(&bob.inbox_id).await.unwrap();
    assert_eq!(refreshed.len(), 2);
    assert!(host.bridge.is_denied(&bob.inbox_id, spammer).await.unwrap());
    assert!(host.bridge.is_denied(&bob.inbox_id, &alice.address).await.unwrap());
}

// ── Lifecycle and dispatch ───────────────────────────────────────────────────

#[tokio::test]
async fn paused_identities_fail_fast_until_reconnected() {
    let host = host();
    let (alice, bob) = (user(&host).await, user(&host).await);

    assert_eq!(host.bridge.drop_local_database_connection().await.unwrap(), 2);
    assert_eq!(host.bridge.identity_state(&alice.address), IdentityState::Paused);
    assert!(matches!(
        host.bridge.list_conversations(&alice.inbox_id).await,
        Err(Error::Paused(_))
    ));
    let err = host
        .bridge
        .call("listAll", json!({ "inboxId": bob.inbox_id }))
        .await
        .unwrap_err();
    assert_eq!(err.to_json()["code"], "Paused");
    assert!(host.bridge.client_info(&alice.inbox_id).is_ok());

    assert_eq!(host.bridge.reconnect_local_database().await.unwrap(), 2);
    assert_eq!(host.bridge.identity_state(&alice.inbox_id), IdentityState::Active);
    assert!(host.bridge.list_conversations(&alice.inbox_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn dispatcher_rejects_unknown_methods_and_bad_arguments() {
    let host = host();
    let alice = user(&host).await;

    assert!(matches!(
        host.bridge.call("teleport", Value::Null).await,
        Err(Error::UnknownMethod(m)) if m == "teleport"
    ));
    assert!(matches!(
        host.bridge
            .call("sendMessage", json!({ "inboxId": alice.inbox_id }))
            .await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        host.bridge
            .call("listConversations", json!({ "inboxId": "nobody" }))
            .await,
        Err(Error::NoClient(_))
    ));
    assert_eq!(
        host.bridge
            .call("identityState", json!({ "inboxId": "nobody" }))
            .await
            .unwrap(),
        "noIdentity"
    );

    let shouted = alice.address.to_uppercase();
    let info = host
        .bridge
        .call("clientInfo", json!({ "address": shouted }))
        .await
        .unwrap();
    assert_eq!(info["inboxId"], alice.inbox_id.as_str());
}
