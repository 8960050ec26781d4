//! Bridge types: enumerations with host string forms, entity snapshots, and
//! listing options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};

/// XMTP network environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Env {
    /// Local development node.
    Local,
    /// Shared development environment.
    #[default]
    Dev,
    /// Production environment.
    Production,
}

impl Env {
    /// gRPC API URL for this environment.
    #[must_use]
    pub const fn url(self) -> &'static str {
        match self {
            Self::Local => "http://localhost:5556",
            Self::Dev => "https://grpc.dev.xmtp.network:443",
            Self::Production => "https://grpc.production.xmtp.network:443",
        }
    }

    /// Whether this environment uses TLS.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        !matches!(self, Self::Local)
    }

    /// Host string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Production => "production",
        }
    }

    /// Parse a host environment name, accepting the common aliases.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "localhost" => Some(Self::Local),
            "dev" | "development" => Some(Self::Dev),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }
}

impl Serialize for Env {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Env {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::parse(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "unknown environment: {s} (expected: local, dev, production)"
            ))
        })
    }
}

/// Declare an enum whose values cross the host boundary as fixed strings.
macro_rules! host_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident {
        $($(#[$vm:meta])* $variant:ident = $val:literal),* $(,)?
    }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name { $($(#[$vm])* $variant),* }

        impl $name {
            /// Host string form of this value.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self { $(Self::$variant => $val),* }
            }

            /// Parse the host string form. Returns `None` for unknown values.
            #[must_use]
            pub fn from_host(s: &str) -> Option<Self> {
                match s { $($val => Some(Self::$variant),)* _ => None }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                Self::from_host(&s).ok_or_else(|| {
                    serde::de::Error::custom(format!(concat!("unknown ", stringify!($name), ": {}"), s))
                })
            }
        }
    };
}

host_enum! {
    /// Consent state.
    pub enum ConsentState {
        /// Not yet determined.
        Unknown = "unknown",
        /// Explicitly allowed.
        Allowed = "allowed",
        /// Explicitly denied.
        Denied = "denied",
    }
}

host_enum! {
    /// Subject kind of a consent entry.
    pub enum ConsentEntityType {
        /// Wallet address.
        Address = "address",
        /// Group ID.
        GroupId = "groupId",
        /// Inbox ID.
        InboxId = "inboxId",
    }
}

host_enum! {
    /// Message delivery status.
    pub enum DeliveryStatus {
        /// Not yet published.
        Unpublished = "unpublished",
        /// Published to the network.
        Published = "published",
        /// Failed to publish.
        Failed = "failed",
    }
}

host_enum! {
    /// Sort direction for message listing.
    pub enum SortDirection {
        /// Oldest first.
        Ascending = "ascending",
        /// Newest first.
        Descending = "descending",
    }
}

host_enum! {
    /// Group member permission level.
    pub enum PermissionLevel {
        /// Regular member.
        Member = "member",
        /// Administrator.
        Admin = "admin",
        /// Super administrator.
        SuperAdmin = "super_admin",
    }
}

host_enum! {
    /// Group permissions preset used at creation time.
    pub enum GroupPermissionsPreset {
        /// All members may add others and edit metadata.
        AllMembers = "all_members",
        /// Only admins may modify the group.
        AdminOnly = "admin_only",
        /// Caller-supplied policy set.
        Custom = "custom",
    }
}

host_enum! {
    /// Who may perform a permission-gated group action.
    pub enum PermissionOption {
        /// Any member.
        Allow = "allow",
        /// Nobody.
        Deny = "deny",
        /// Admins and super admins.
        Admin = "admin",
        /// Super admins only.
        SuperAdmin = "superAdmin",
    }
}

impl PermissionOption {
    /// Parse a host permission option, failing with
    /// [`Error::InvalidPermissionOption`].
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_host(s).ok_or_else(|| Error::InvalidPermissionOption(s.to_owned()))
    }

    /// Whether a member at `level` passes this policy.
    #[must_use]
    pub const fn permits(self, level: PermissionLevel) -> bool {
        match self {
            Self::Allow => true,
            Self::Deny => false,
            Self::Admin => matches!(level, PermissionLevel::Admin | PermissionLevel::SuperAdmin),
            Self::SuperAdmin => matches!(level, PermissionLevel::SuperAdmin),
        }
    }
}

host_enum! {
    /// Permission-gated group action.
    pub enum PermissionUpdateType {
        /// Add member.
        AddMember = "addMember",
        /// Remove member.
        RemoveMember = "removeMember",
        /// Add admin.
        AddAdmin = "addAdmin",
        /// Remove admin.
        RemoveAdmin = "removeAdmin",
        /// Update a metadata field.
        UpdateMetadata = "updateMetadata",
    }
}

host_enum! {
    /// Editable group metadata field.
    pub enum MetadataField {
        /// Group name.
        Name = "name",
        /// Group description.
        Description = "description",
        /// Square image URL.
        ImageUrlSquare = "imageUrlSquare",
        /// Pinned frame URL.
        PinnedFrameUrl = "pinnedFrameUrl",
    }
}

host_enum! {
    /// Host action the library pauses on before continuing authentication.
    pub enum PreAction {
        /// Before a new identity is created.
        CreateIdentity = "preCreateIdentityCallback",
        /// Before an identity is enabled.
        EnableIdentity = "preEnableIdentityCallback",
        /// Before the installation authenticates to its inbox.
        AuthenticateToInbox = "preAuthenticateToInboxCallback",
    }
}

/// A single consent preference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentEntry {
    /// Subject kind.
    pub entry_type: ConsentEntityType,
    /// Address, group id or inbox id.
    pub value: String,
    /// Recorded state.
    pub state: ConsentState,
}

/// Snapshot of a group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    /// Member's inbox ID.
    pub inbox_id: String,
    /// Addresses associated with the inbox.
    pub addresses: Vec<String>,
    /// Permission level within the group.
    pub permission_level: PermissionLevel,
    /// Consent state recorded for this inbox.
    pub consent_state: ConsentState,
}

/// Local snapshot of a group's mutable metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMetadata {
    /// Group name.
    pub name: String,
    /// Square image URL.
    pub image_url_square: String,
    /// Group description.
    pub description: String,
    /// Pinned frame URL.
    pub pinned_frame_url: String,
}

impl GroupMetadata {
    /// Read one field.
    #[must_use]
    pub fn get(&self, field: MetadataField) -> &str {
        match field {
            MetadataField::Name => &self.name,
            MetadataField::Description => &self.description,
            MetadataField::ImageUrlSquare => &self.image_url_square,
            MetadataField::PinnedFrameUrl => &self.pinned_frame_url,
        }
    }

    /// Overwrite one field.
    pub fn set(&mut self, field: MetadataField, value: String) {
        match field {
            MetadataField::Name => self.name = value,
            MetadataField::Description => self.description = value,
            MetadataField::ImageUrlSquare => self.image_url_square = value,
            MetadataField::PinnedFrameUrl => self.pinned_frame_url = value,
        }
    }
}

/// Permission policies of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPolicySet {
    /// Who may add members.
    pub add_member_policy: PermissionOption,
    /// Who may remove members.
    pub remove_member_policy: PermissionOption,
    /// Who may promote admins.
    pub add_admin_policy: PermissionOption,
    /// Who may demote admins.
    pub remove_admin_policy: PermissionOption,
    /// Who may rename the group.
    pub update_group_name_policy: PermissionOption,
    /// Who may edit the description.
    pub update_group_description_policy: PermissionOption,
    /// Who may change the image.
    pub update_group_image_policy: PermissionOption,
    /// Who may change the pinned frame.
    pub update_group_pinned_frame_url_policy: PermissionOption,
}

impl PermissionPolicySet {
    /// Policies of the `all_members` preset.
    #[must_use]
    pub const fn all_members() -> Self {
        Self {
            add_member_policy: PermissionOption::Allow,
            remove_member_policy: PermissionOption::Admin,
            add_admin_policy: PermissionOption::SuperAdmin,
            remove_admin_policy: PermissionOption::SuperAdmin,
            update_group_name_policy: PermissionOption::Allow,
            update_group_description_policy: PermissionOption::Allow,
            update_group_image_policy: PermissionOption::Allow,
            update_group_pinned_frame_url_policy: PermissionOption::Allow,
        }
    }

    /// Policies of the `admin_only` preset.
    #[must_use]
    pub const fn admin_only() -> Self {
        Self {
            add_member_policy: PermissionOption::Admin,
            remove_member_policy: PermissionOption::Admin,
            add_admin_policy: PermissionOption::SuperAdmin,
            remove_admin_policy: PermissionOption::SuperAdmin,
            update_group_name_policy: PermissionOption::Admin,
            update_group_description_policy: PermissionOption::Admin,
            update_group_image_policy: PermissionOption::Admin,
            update_group_pinned_frame_url_policy: PermissionOption::Admin,
        }
    }

    /// Parse a host policy object. Every field is required and must be a
    /// known option string.
    pub fn from_json(v: &Value) -> Result<Self> {
        let field = |name: &str| -> Result<PermissionOption> {
            let raw = v
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidArgument(format!("missing {name}")))?;
            PermissionOption::parse(raw)
        };
        Ok(Self {
            add_member_policy: field("addMemberPolicy")?,
            remove_member_policy: field("removeMemberPolicy")?,
            add_admin_policy: field("addAdminPolicy")?,
            remove_admin_policy: field("removeAdminPolicy")?,
            update_group_name_policy: field("updateGroupNamePolicy")?,
            update_group_description_policy: field("updateGroupDescriptionPolicy")?,
            update_group_image_policy: field("updateGroupImagePolicy")?,
            update_group_pinned_frame_url_policy: field("updateGroupPinnedFrameUrlPolicy")?,
        })
    }

    /// The policy gating `update`. `field` selects the metadata policy for
    /// [`PermissionUpdateType::UpdateMetadata`].
    #[must_use]
    pub const fn policy_for(
        &self,
        update: PermissionUpdateType,
        field: Option<MetadataField>,
    ) -> PermissionOption {
        match update {
            PermissionUpdateType::AddMember => self.add_member_policy,
            PermissionUpdateType::RemoveMember => self.remove_member_policy,
            PermissionUpdateType::AddAdmin => self.add_admin_policy,
            PermissionUpdateType::RemoveAdmin => self.remove_admin_policy,
            PermissionUpdateType::UpdateMetadata => match field {
                Some(MetadataField::Description) => self.update_group_description_policy,
                Some(MetadataField::ImageUrlSquare) => self.update_group_image_policy,
                Some(MetadataField::PinnedFrameUrl) => self.update_group_pinned_frame_url_policy,
                Some(MetadataField::Name) | None => self.update_group_name_policy,
            },
        }
    }

    /// Replace the policy gating `update`.
    pub fn set_policy(
        &mut self,
        update: PermissionUpdateType,
        field: Option<MetadataField>,
        option: PermissionOption,
    ) {
        let slot = match update {
            PermissionUpdateType::AddMember => &mut self.add_member_policy,
            PermissionUpdateType::RemoveMember => &mut self.remove_member_policy,
            PermissionUpdateType::AddAdmin => &mut self.add_admin_policy,
            PermissionUpdateType::RemoveAdmin => &mut self.remove_admin_policy,
            PermissionUpdateType::UpdateMetadata => match field {
                Some(MetadataField::Description) => &mut self.update_group_description_policy,
                Some(MetadataField::ImageUrlSquare) => &mut self.update_group_image_policy,
                Some(MetadataField::PinnedFrameUrl) => {
                    &mut self.update_group_pinned_frame_url_policy
                }
                Some(MetadataField::Name) | None => &mut self.update_group_name_policy,
            },
        };
        *slot = option;
    }
}

/// Options for creating a group conversation.
#[derive(Debug, Clone)]
pub struct CreateGroupOptions {
    /// Permission preset.
    pub permissions: GroupPermissionsPreset,
    /// Policies when `permissions` is [`GroupPermissionsPreset::Custom`].
    pub custom_policies: Option<PermissionPolicySet>,
    /// Initial metadata.
    pub metadata: GroupMetadata,
}

impl Default for CreateGroupOptions {
    fn default() -> Self {
        Self {
            permissions: GroupPermissionsPreset::AllMembers,
            custom_policies: None,
            metadata: GroupMetadata::default(),
        }
    }
}

impl CreateGroupOptions {
    /// Effective policy set for the new group.
    #[must_use]
    pub fn policies(&self) -> PermissionPolicySet {
        match self.permissions {
            GroupPermissionsPreset::AdminOnly => PermissionPolicySet::admin_only(),
            GroupPermissionsPreset::Custom => self
                .custom_policies
                .unwrap_or_else(PermissionPolicySet::all_members),
            GroupPermissionsPreset::AllMembers => PermissionPolicySet::all_members(),
        }
    }
}

/// Options for listing messages.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMessagesOptions {
    /// Maximum number of messages to return.
    pub limit: Option<usize>,
    /// Only messages sent before this timestamp (ns).
    pub before_ns: Option<i64>,
    /// Only messages sent after this timestamp (ns).
    pub after_ns: Option<i64>,
    /// Sort direction (default: descending).
    pub direction: Option<SortDirection>,
    /// Filter by delivery status. `None` = all.
    pub delivery_status: Option<DeliveryStatus>,
}

/// Options for listing groups.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListGroupsParams {
    /// Only groups created after this timestamp (ns).
    pub created_after_ns: Option<i64>,
    /// Only groups created before this timestamp (ns).
    pub created_before_ns: Option<i64>,
    /// Maximum number of groups.
    pub limit: Option<usize>,
    /// Only groups with this consent state.
    pub consent_state: Option<ConsentState>,
}

/// Application context attached to a v2 conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationContext {
    /// Application-chosen conversation id.
    pub conversation_id: String,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
}

/// A decrypted message as produced by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Hex-encoded message ID.
    pub id: String,
    /// Topic of the conversation or group the message belongs to.
    pub topic: String,
    /// Sender's wallet address.
    pub sender_address: String,
    /// Sender's inbox ID.
    pub sender_inbox_id: String,
    /// Sent timestamp in nanoseconds.
    pub sent_at_ns: i64,
    /// Protobuf-encoded `EncodedContent` bytes.
    pub content: Vec<u8>,
    /// Delivery status.
    pub delivery_status: DeliveryStatus,
}

/// A message that has been encrypted but not yet published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedEnvelope {
    /// Hex-encoded ID the message will carry once published.
    pub message_id: String,
    /// Topic to publish to.
    pub topic: String,
    /// Opaque envelope bytes.
    pub payload: Vec<u8>,
}

/// Per-identity lifecycle position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityState {
    /// Nothing registered and no authentication running.
    NoIdentity,
    /// Authentication in progress, possibly waiting on the host.
    Authenticating,
    /// A client handle is registered.
    Active,
    /// A client handle is registered but its database connection is released.
    Paused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_strings_round_trip_through_serde() {
        let v = serde_json::to_value(ConsentEntityType::GroupId).unwrap();
        assert_eq!(v, "groupId");
        let back: ConsentEntityType = serde_json::from_value(v).unwrap();
        assert_eq!(back, ConsentEntityType::GroupId);
        assert!(serde_json::from_str::<ConsentState>("\"maybe\"").is_err());
    }

    #[test]
    fn unknown_permission_option_is_rejected() {
        assert_eq!(
            PermissionOption::parse("superAdmin").unwrap(),
            PermissionOption::SuperAdmin
        );
        assert!(matches!(
            PermissionOption::parse("owner"),
            Err(Error::InvalidPermissionOption(v)) if v == "owner"
        ));
    }

    #[test]
    fn policy_set_parses_and_gates_metadata_fields() {
        let mut raw = serde_json::to_value(PermissionPolicySet::all_members()).unwrap();
        raw["updateGroupImagePolicy"] = "deny".into();
        let set = PermissionPolicySet::from_json(&raw).unwrap();
        assert_eq!(
            set.policy_for(
                PermissionUpdateType::UpdateMetadata,
                Some(MetadataField::ImageUrlSquare)
            ),
            PermissionOption::Deny
        );
        raw["addAdminPolicy"] = "everyone".into();
        assert!(matches!(
            PermissionPolicySet::from_json(&raw),
            Err(Error::InvalidPermissionOption(_))
        ));
    }

    #[test]
    fn admin_policy_permits_admins_only() {
        assert!(PermissionOption::Admin.permits(PermissionLevel::SuperAdmin));
        assert!(!PermissionOption::Admin.permits(PermissionLevel::Member));
        assert!(!PermissionOption::Deny.permits(PermissionLevel::SuperAdmin));
    }

    #[test]
    fn env_aliases() {
        assert_eq!(Env::parse("prod"), Some(Env::Production));
        assert!(!Env::Local.is_secure());
        assert_eq!(serde_json::to_value(Env::Dev).unwrap(), "dev");
    }
}
