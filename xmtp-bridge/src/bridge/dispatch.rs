//! Named-operation entry point for JSON hosts.
//!
//! Arguments are camelCase objects. Every operation that acts on a client
//! takes `inboxId` (an account address is accepted too); container
//! operations take `id`, with `topic` and `groupId` as aliases.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::Bridge;
use crate::config::{ClientOptions, WalletOptions};
use crate::error::{Error, Result};
use crate::prepared::PreparedMessage;
use crate::registry::SubscriptionKind;
use crate::types::{
    ConsentState, ConversationContext, CreateGroupOptions, GroupMetadata,
    GroupPermissionsPreset, ListGroupsParams, ListMessagesOptions, MetadataField,
    PermissionPolicySet, PermissionUpdateType, PreAction,
};

// ── Argument shapes ──────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityArgs {
    #[serde(alias = "address")]
    inbox_id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthArgs {
    address: String,
    #[serde(default)]
    options: ClientOptions,
    #[serde(flatten)]
    wallet: WalletOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionsArgs {
    #[serde(default)]
    options: ClientOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildArgs {
    address: String,
    #[serde(default)]
    options: ClientOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBundleArgs {
    key_bundle: String,
    #[serde(default)]
    options: ClientOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureArgs {
    #[serde(alias = "id")]
    request_id: String,
    signature: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackArgs {
    #[serde(default, alias = "requestId")]
    id: Option<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CanMessageArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "addresses")]
    peer_addresses: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticCanMessageArgs {
    #[serde(alias = "addresses")]
    peer_addresses: Vec<String>,
    #[serde(default)]
    options: ClientOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    digest: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListGroupsArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(flatten)]
    params: ListGroupsParams,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewConversationArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    peer_address: String,
    #[serde(default)]
    context: Option<ConversationContext>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewGroupArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    peer_addresses: Vec<String>,
    #[serde(default)]
    permission_level: Option<GroupPermissionsPreset>,
    #[serde(default)]
    permission_policy_set: Option<Value>,
    #[serde(flatten)]
    metadata: GroupMetadata,
}

impl NewGroupArgs {
    fn options(&self) -> Result<CreateGroupOptions> {
        let custom_policies = self
            .permission_policy_set
            .as_ref()
            .map(PermissionPolicySet::from_json)
            .transpose()?;
        let permissions = if custom_policies.is_some() {
            GroupPermissionsPreset::Custom
        } else {
            self.permission_level
                .unwrap_or(GroupPermissionsPreset::AllMembers)
        };
        Ok(CreateGroupOptions {
            permissions,
            custom_policies,
            metadata: self.metadata.clone(),
        })
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "topic", alias = "groupId")]
    id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(default, alias = "topic", alias = "groupId")]
    id: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "topic", alias = "groupId")]
    id: String,
    content: Value,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendPreparedArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "prepared")]
    prepared_local_message: PreparedMessage,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "topic", alias = "groupId")]
    id: String,
    #[serde(flatten)]
    options: ListMessagesOptions,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "groupId")]
    id: String,
    #[serde(alias = "addresses", alias = "inboxIds")]
    members: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "groupId")]
    id: String,
    member_inbox_id: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "groupId")]
    id: String,
    #[serde(default)]
    field: Option<MetadataField>,
    value: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "groupId")]
    id: String,
    #[serde(alias = "permissionUpdateType")]
    update_type: PermissionUpdateType,
    #[serde(alias = "option")]
    permission_option: String,
    #[serde(default)]
    metadata_field: Option<MetadataField>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "addresses", alias = "groupIds", alias = "inboxIds")]
    values: Vec<String>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentQueryArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "peerAddress", alias = "groupId", alias = "peerInboxId")]
    value: String,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupConsentArgs {
    #[serde(alias = "address")]
    inbox_id: String,
    #[serde(alias = "groupId")]
    id: String,
    #[serde(alias = "value")]
    state: ConsentState,
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::decode(&e))
}

fn reply<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// `subscribeTo…` / `unsubscribeFrom…` suffix to listener kind.
fn subscription_kind(suffix: &str) -> Option<SubscriptionKind> {
    Some(match suffix {
        "Conversations" => SubscriptionKind::Conversations,
        "Groups" => SubscriptionKind::Groups,
        "All" => SubscriptionKind::All,
        "AllMessages" => SubscriptionKind::AllMessages,
        "AllGroupMessages" => SubscriptionKind::AllGroupMessages,
        "Messages" => SubscriptionKind::ConversationMessages,
        "GroupMessages" => SubscriptionKind::GroupMessages,
        _ => return None,
    })
}

/// Convenience metadata setters: method name to field.
fn metadata_setter(method: &str) -> Option<MetadataField> {
    Some(match method {
        "updateGroupName" => MetadataField::Name,
        "updateGroupImageUrlSquare" => MetadataField::ImageUrlSquare,
        "updateGroupDescription" => MetadataField::Description,
        "updateGroupPinnedFrameUrl" => MetadataField::PinnedFrameUrl,
        _ => return None,
    })
}

impl Bridge {
    /// Invoke the operation `method` with a JSON argument object. `null`
    /// counts as `{}`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownMethod`] for names that do not exist,
    /// [`Error::InvalidArgument`] for argument objects that do not match,
    /// and whatever the operation itself returns.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let args = if args.is_null() {
            Value::Object(Map::new())
        } else {
            args
        };
        tracing::debug!(method, "call");
        let result = self.route(method, args).await;
        if let Err(e) = &result {
            tracing::debug!(method, code = e.code(), error = %e, "call failed");
        }
        result
    }

    async fn route(&self, method: &str, args: Value) -> Result<Value> {
        if let Some(action) = method
            .strip_suffix("Completed")
            .and_then(PreAction::from_host)
        {
            let a: CallbackArgs = parse(args)?;
            return reply(self.pre_action_completed(action, a.id.as_deref()));
        }
        if let Some(kind) = method
            .strip_prefix("subscribeTo")
            .and_then(subscription_kind)
        {
            let a: SubscriptionArgs = parse(args)?;
            return reply(self.subscribe(kind, &a.inbox_id, a.id.as_deref()).await?);
        }
        if let Some(kind) = method
            .strip_prefix("unsubscribeFrom")
            .and_then(subscription_kind)
        {
            let a: SubscriptionArgs = parse(args)?;
            return reply(self.unsubscribe(kind, &a.inbox_id, a.id.as_deref()).await?);
        }
        if let Some(field) = metadata_setter(method) {
            let a: MetadataArgs = parse(args)?;
            self.update_group_metadata(&a.inbox_id, &a.id, field, &a.value)
                .await?;
            return Ok(Value::Null);
        }

        match method {
            // ── Identity ─────────────────────────────────────────────────────
            "auth" => {
                let a: AuthArgs = parse(args)?;
                reply(self.auth(&a.address, &a.options, a.wallet).await?)
            }
            "createRandom" => {
                let a: OptionsArgs = parse(args)?;
                reply(self.create_random(a.options).await?)
            }
            "build" => {
                let a: BuildArgs = parse(args)?;
                reply(self.build(&a.address, &a.options).await?)
            }
            "createFromKeyBundle" => {
                let a: KeyBundleArgs = parse(args)?;
                reply(self.create_from_key_bundle(&a.key_bundle, &a.options).await?)
            }
            "exportKeyBundle" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.export_key_bundle(&a.inbox_id).await?)
            }
            "receiveSignature" => {
                let a: SignatureArgs = parse(args)?;
                reply(self.receive_signature(&a.request_id, &a.signature)?)
            }
            "dropClient" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.drop_client(&a.inbox_id).await)
            }
            "identityState" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.identity_state(&a.inbox_id))
            }
            "clientInfo" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.client_info(&a.inbox_id)?)
            }
            "canMessage" => {
                let a: CanMessageArgs = parse(args)?;
                reply(self.can_message(&a.inbox_id, &a.peer_addresses).await?)
            }
            "staticCanMessage" => {
                let a: StaticCanMessageArgs = parse(args)?;
                reply(self.static_can_message(&a.peer_addresses, &a.options).await?)
            }
            "sign" => {
                let a: SignArgs = parse(args)?;
                reply(self.sign(&a.inbox_id, &a.digest).await?)
            }

            // ── Lifecycle ────────────────────────────────────────────────────
            "dropLocalDatabaseConnection" => reply(self.drop_local_database_connection().await?),
            "reconnectLocalDatabase" => reply(self.reconnect_local_database().await?),

            // ── Conversations ────────────────────────────────────────────────
            "listConversations" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.list_conversations(&a.inbox_id).await?)
            }
            "listGroups" => {
                let a: ListGroupsArgs = parse(args)?;
                reply(self.list_groups(&a.inbox_id, &a.params).await?)
            }
            "listAll" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.list_all(&a.inbox_id).await?)
            }
            "createConversation" => {
                let a: NewConversationArgs = parse(args)?;
                reply(
                    self.create_conversation(&a.inbox_id, &a.peer_address, a.context)
                        .await?,
                )
            }
            "createGroup" => {
                let a: NewGroupArgs = parse(args)?;
                let options = a.options()?;
                reply(
                    self.create_group(&a.inbox_id, &a.peer_addresses, &options)
                        .await?,
                )
            }
            "findConversation" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.find_conversation(&a.inbox_id, &a.id).await?)
            }
            "findGroup" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.find_group(&a.inbox_id, &a.id).await?)
            }
            "syncGroups" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.sync_groups(&a.inbox_id).await?)
            }
            "syncGroup" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.sync_group(&a.inbox_id, &a.id).await?)
            }
            "sendMessage" => {
                let a: SendArgs = parse(args)?;
                reply(self.send_message(&a.inbox_id, &a.id, &a.content).await?)
            }
            "prepareMessage" => {
                let a: SendArgs = parse(args)?;
                reply(self.prepare_message(&a.inbox_id, &a.id, &a.content).await?)
            }
            "sendPreparedMessage" => {
                let a: SendPreparedArgs = parse(args)?;
                reply(
                    self.send_prepared_message(&a.inbox_id, &a.prepared_local_message)
                        .await?,
                )
            }
            "conversationMessages" => {
                let a: MessagesArgs = parse(args)?;
                reply(
                    self.conversation_messages(&a.inbox_id, &a.id, &a.options)
                        .await?,
                )
            }
            "groupMessages" => {
                let a: MessagesArgs = parse(args)?;
                reply(self.group_messages(&a.inbox_id, &a.id, &a.options).await?)
            }

            // ── Groups ───────────────────────────────────────────────────────
            "listGroupMembers" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.group_members(&a.inbox_id, &a.id).await?)
            }
            "listAdmins" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.list_admins(&a.inbox_id, &a.id).await?)
            }
            "listSuperAdmins" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.list_super_admins(&a.inbox_id, &a.id).await?)
            }
            "addGroupMembers" => {
                let a: MembersArgs = parse(args)?;
                reply(
                    self.add_group_members(&a.inbox_id, &a.id, &a.members)
                        .await?,
                )
            }
            "removeGroupMembers" => {
                let a: MembersArgs = parse(args)?;
                reply(
                    self.remove_group_members(&a.inbox_id, &a.id, &a.members)
                        .await?,
                )
            }
            "addGroupMembersByInboxId" => {
                let a: MembersArgs = parse(args)?;
                reply(
                    self.add_group_members_by_inbox_id(&a.inbox_id, &a.id, &a.members)
                        .await?,
                )
            }
            "removeGroupMembersByInboxId" => {
                let a: MembersArgs = parse(args)?;
                reply(
                    self.remove_group_members_by_inbox_id(&a.inbox_id, &a.id, &a.members)
                        .await?,
                )
            }
            "addAdmin" => {
                let a: AdminArgs = parse(args)?;
                reply(self.add_admin(&a.inbox_id, &a.id, &a.member_inbox_id).await?)
            }
            "removeAdmin" => {
                let a: AdminArgs = parse(args)?;
                reply(
                    self.remove_admin(&a.inbox_id, &a.id, &a.member_inbox_id)
                        .await?,
                )
            }
            "addSuperAdmin" => {
                let a: AdminArgs = parse(args)?;
                reply(
                    self.add_super_admin(&a.inbox_id, &a.id, &a.member_inbox_id)
                        .await?,
                )
            }
            "removeSuperAdmin" => {
                let a: AdminArgs = parse(args)?;
                reply(
                    self.remove_super_admin(&a.inbox_id, &a.id, &a.member_inbox_id)
                        .await?,
                )
            }
            "updateGroupMetadata" => {
                let a: MetadataArgs = parse(args)?;
                let field = a
                    .field
                    .ok_or_else(|| Error::InvalidArgument("missing field".into()))?;
                reply(
                    self.update_group_metadata(&a.inbox_id, &a.id, field, &a.value)
                        .await?,
                )
            }
            "permissionPolicySet" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.permission_policy_set(&a.inbox_id, &a.id).await?)
            }
            "updatePermission" => {
                let a: PermissionArgs = parse(args)?;
                reply(
                    self.update_permission(
                        &a.inbox_id,
                        &a.id,
                        a.update_type,
                        &a.permission_option,
                        a.metadata_field,
                    )
                    .await?,
                )
            }
            "isGroupActive" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.is_group_active(&a.inbox_id, &a.id).await?)
            }

            // ── Consent ──────────────────────────────────────────────────────
            "isAllowed" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_allowed(&a.inbox_id, &a.value).await?)
            }
            "isDenied" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_denied(&a.inbox_id, &a.value).await?)
            }
            "isGroupAllowed" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_group_allowed(&a.inbox_id, &a.value).await?)
            }
            "isGroupDenied" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_group_denied(&a.inbox_id, &a.value).await?)
            }
            "isInboxAllowed" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_inbox_allowed(&a.inbox_id, &a.value).await?)
            }
            "isInboxDenied" => {
                let a: ConsentQueryArgs = parse(args)?;
                reply(self.is_inbox_denied(&a.inbox_id, &a.value).await?)
            }
            "allow" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.allow(&a.inbox_id, &a.values).await?)
            }
            "deny" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.deny(&a.inbox_id, &a.values).await?)
            }
            "allowGroups" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.allow_groups(&a.inbox_id, &a.values).await?)
            }
            "denyGroups" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.deny_groups(&a.inbox_id, &a.values).await?)
            }
            "allowInboxes" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.allow_inboxes(&a.inbox_id, &a.values).await?)
            }
            "denyInboxes" => {
                let a: ConsentArgs = parse(args)?;
                reply(self.deny_inboxes(&a.inbox_id, &a.values).await?)
            }
            "refreshConsentList" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.refresh_consent_list(&a.inbox_id).await?)
            }
            "consentList" => {
                let a: IdentityArgs = parse(args)?;
                reply(self.consent_list(&a.inbox_id).await?)
            }
            "conversationConsentState" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.conversation_consent_state(&a.inbox_id, &a.id).await?)
            }
            "groupConsentState" => {
                let a: ContainerArgs = parse(args)?;
                reply(self.group_consent_state(&a.inbox_id, &a.id).await?)
            }
            "updateGroupConsent" => {
                let a: GroupConsentArgs = parse(args)?;
                reply(
                    self.update_group_consent(&a.inbox_id, &a.id, a.state)
                        .await?,
                )
            }

            _ => Err(Error::UnknownMethod(method.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn container_id_accepts_topic_and_group_id() {
        let a: ContainerArgs =
            parse(json!({ "inboxId": "i", "topic": "/xmtp/0/dm/proto" })).unwrap();
        assert_eq!(a.id, "/xmtp/0/dm/proto");
        let a: ContainerArgs = parse(json!({ "address": "0xabc", "groupId": "g1" })).unwrap();
        assert_eq!((a.inbox_id.as_str(), a.id.as_str()), ("0xabc", "g1"));
    }

    #[test]
    fn missing_field_is_invalid_argument() {
        let err = parse::<SendArgs>(json!({ "inboxId": "i", "id": "t" })).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(ref m) if m.contains("content")));
    }

    #[test]
    fn policy_set_makes_a_custom_group() {
        let mut policies = serde_json::to_value(PermissionPolicySet::admin_only()).unwrap();
        policies["addMemberPolicy"] = "allow".into();
        let a: NewGroupArgs = parse(json!({
            "inboxId": "i",
            "peerAddresses": ["0x1"],
            "permissionLevel": "admin_only",
            "permissionPolicySet": policies,
            "name": "crew",
        }))
        .unwrap();
        let options = a.options().unwrap();
        assert_eq!(options.permissions, GroupPermissionsPreset::Custom);
        assert_eq!(options.metadata.name, "crew");
        assert_eq!(
            options.policies().add_member_policy,
            crate::types::PermissionOption::Allow
        );
    }

    #[test]
    fn method_suffixes_map_to_kinds() {
        assert_eq!(
            subscription_kind("Messages"),
            Some(SubscriptionKind::ConversationMessages)
        );
        assert_eq!(subscription_kind("Everything"), None);
        assert_eq!(
            metadata_setter("updateGroupName"),
            Some(MetadataField::Name)
        );
    }
}
