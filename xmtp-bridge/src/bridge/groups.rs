use super::Bridge;
use crate::error::Result;
use crate::types::{
    GroupMember, MetadataField, PermissionLevel, PermissionOption, PermissionPolicySet,
    PermissionUpdateType,
};

impl Bridge {
    /// Current members of a group.
    ///
    /// # Errors
    ///
    /// [`Error::GroupNotFound`](crate::Error::GroupNotFound),
    /// [`Error::MlsNotEnabled`](crate::Error::MlsNotEnabled) plus the usual
    /// client failures. The same holds for every group operation below.
    pub async fn group_members(&self, identity: &str, id: &str) -> Result<Vec<GroupMember>> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.members().await
    }

    /// Inbox ids of the admins of a group.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn list_admins(&self, identity: &str, id: &str) -> Result<Vec<String>> {
        self.members_at(identity, id, PermissionLevel::Admin).await
    }

    /// Inbox ids of the super admins of a group.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn list_super_admins(&self, identity: &str, id: &str) -> Result<Vec<String>> {
        self.members_at(identity, id, PermissionLevel::SuperAdmin).await
    }

    async fn members_at(
        &self,
        identity: &str,
        id: &str,
        level: PermissionLevel,
    ) -> Result<Vec<String>> {
        Ok(self
            .group_members(identity, id)
            .await?
            .into_iter()
            .filter(|m| m.permission_level == level)
            .map(|m| m.inbox_id)
            .collect())
    }

    /// Add members by address.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn add_group_members(
        &self,
        identity: &str,
        id: &str,
        addresses: &[String],
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.add_members(addresses).await
    }

    /// Remove members by address.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn remove_group_members(
        &self,
        identity: &str,
        id: &str,
        addresses: &[String],
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.remove_members(addresses).await
    }

    /// Add members by inbox id.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn add_group_members_by_inbox_id(
        &self,
        identity: &str,
        id: &str,
        inbox_ids: &[String],
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .add_members_by_inbox_id(inbox_ids)
            .await
    }

    /// Remove members by inbox id.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn remove_group_members_by_inbox_id(
        &self,
        identity: &str,
        id: &str,
        inbox_ids: &[String],
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .remove_members_by_inbox_id(inbox_ids)
            .await
    }

    /// Promote `inbox_id` to admin.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn add_admin(&self, identity: &str, id: &str, inbox_id: &str) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.add_admin(inbox_id).await
    }

    /// Demote `inbox_id` from admin.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn remove_admin(&self, identity: &str, id: &str, inbox_id: &str) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.remove_admin(inbox_id).await
    }

    /// Promote `inbox_id` to super admin.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn add_super_admin(&self, identity: &str, id: &str, inbox_id: &str) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.add_super_admin(inbox_id).await
    }

    /// Demote `inbox_id` from super admin.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn remove_super_admin(
        &self,
        identity: &str,
        id: &str,
        inbox_id: &str,
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .remove_super_admin(inbox_id)
            .await
    }

    /// Overwrite one metadata field.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn update_group_metadata(
        &self,
        identity: &str,
        id: &str,
        field: MetadataField,
        value: &str,
    ) -> Result<()> {
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .update_metadata(field, value)
            .await
    }

    /// Current permission policies.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn permission_policy_set(
        &self,
        identity: &str,
        id: &str,
    ) -> Result<PermissionPolicySet> {
        let client = self.lease(identity).await?;
        self.group(&client, id).await?.permission_policy_set().await
    }

    /// Change the policy gating `update`. `option` is the host string
    /// (`allow`, `deny`, `admin` or `superAdmin`).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPermissionOption`](crate::Error::InvalidPermissionOption)
    /// for any other option string, otherwise as
    /// [`group_members`](Self::group_members).
    pub async fn update_permission(
        &self,
        identity: &str,
        id: &str,
        update: PermissionUpdateType,
        option: &str,
        field: Option<MetadataField>,
    ) -> Result<()> {
        let option = PermissionOption::parse(option)?;
        let client = self.lease(identity).await?;
        self.group(&client, id)
            .await?
            .update_permission_policy(update, option, field)
            .await
    }

    /// Whether this client is still a member.
    ///
    /// # Errors
    ///
    /// As [`group_members`](Self::group_members).
    pub async fn is_group_active(&self, identity: &str, id: &str) -> Result<bool> {
        let client = self.lease(identity).await?;
        Ok(self.group(&client, id).await?.is_active())
    }
}
