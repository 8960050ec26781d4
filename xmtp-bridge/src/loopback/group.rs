use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::NetEvent;
use super::client::ClientCore;
use crate::error::{Error, Result};
use crate::library::{EventStream, GroupRef, MessageContainer};
use crate::types::{
    ConsentEntityType, ConsentState, CreateGroupOptions, DecodedMessage, GroupMember,
    GroupMetadata, ListMessagesOptions, MetadataField, PermissionLevel, PermissionOption,
    PermissionPolicySet, PermissionUpdateType, PreparedEnvelope,
};

#[derive(Debug, Clone)]
struct Member {
    level: PermissionLevel,
    added_by: String,
}

struct Roster {
    members: BTreeMap<String, Member>,
    /// Every inbox that was ever a member. Former members keep read access.
    history: BTreeSet<String>,
    metadata: GroupMetadata,
    policies: PermissionPolicySet,
}

impl Roster {
    fn level_of(&self, group_id: &str, inbox_id: &str) -> Result<PermissionLevel> {
        self.members
            .get(inbox_id)
            .map(|m| m.level)
            .ok_or_else(|| Error::Library(format!("{inbox_id} is not a member of {group_id}")))
    }

    fn authorize(
        &self,
        group_id: &str,
        actor: &str,
        update: PermissionUpdateType,
        field: Option<MetadataField>,
    ) -> Result<()> {
        let level = self.level_of(group_id, actor)?;
        let policy = self.policies.policy_for(update, field);
        if policy.permits(level) {
            Ok(())
        } else {
            Err(Error::Library(format!(
                "{update} requires {policy}, caller is {level}"
            )))
        }
    }

    fn require_super_admin(&self, group_id: &str, actor: &str) -> Result<()> {
        match self.level_of(group_id, actor)? {
            PermissionLevel::SuperAdmin => Ok(()),
            level => Err(Error::Library(format!(
                "only super admins may do that, caller is {level}"
            ))),
        }
    }
}

/// Network-side record of a group.
pub(super) struct GroupState {
    id: String,
    topic: String,
    creator: String,
    created_at_ns: i64,
    roster: Mutex<Roster>,
}

impl GroupState {
    pub(super) fn new(
        id: String,
        creator: &str,
        created_at_ns: i64,
        peers: &[String],
        options: &CreateGroupOptions,
    ) -> Self {
        let mut members = BTreeMap::new();
        for peer in peers {
            members.insert(
                peer.clone(),
                Member {
                    level: PermissionLevel::Member,
                    added_by: creator.to_owned(),
                },
            );
        }
        members.insert(
            creator.to_owned(),
            Member {
                level: PermissionLevel::SuperAdmin,
                added_by: creator.to_owned(),
            },
        );
        let history = members.keys().cloned().collect();
        Self {
            topic: format!("/xmtp/mls/1/g-{id}/proto"),
            id,
            creator: creator.to_owned(),
            created_at_ns,
            roster: Mutex::new(Roster {
                members,
                history,
                metadata: options.metadata.clone(),
                policies: options.policies(),
            }),
        }
    }

    fn roster(&self) -> MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn id(&self) -> &str {
        &self.id
    }

    pub(super) const fn created_at_ns(&self) -> i64 {
        self.created_at_ns
    }

    pub(super) fn is_member(&self, inbox_id: &str) -> bool {
        self.roster().members.contains_key(inbox_id)
    }

    pub(super) fn has_history(&self, inbox_id: &str) -> bool {
        self.roster().history.contains(inbox_id)
    }
}

/// One client's view of a group.
pub(super) struct LoopbackGroup {
    core: Arc<ClientCore>,
    state: Arc<GroupState>,
}

impl fmt::Debug for LoopbackGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackGroup")
            .field("id", &self.state.id)
            .finish_non_exhaustive()
    }
}

impl LoopbackGroup {
    pub(super) const fn new(core: Arc<ClientCore>, state: Arc<GroupState>) -> Self {
        Self { core, state }
    }

    fn me(&self) -> &str {
        self.core.inbox_id()
    }

    fn add(&self, inbox_ids: Vec<String>) -> Result<()> {
        self.core.check()?;
        for id in &inbox_ids {
            if !self.core.net().inboxes.contains_key(id) {
                return Err(Error::Library(format!("{id} is not on the network")));
            }
        }
        let added: Vec<String> = {
            let mut roster = self.state.roster();
            roster.authorize(
                &self.state.id,
                self.me(),
                PermissionUpdateType::AddMember,
                None,
            )?;
            let mut added = Vec::new();
            for id in inbox_ids {
                if roster.members.contains_key(&id) {
                    continue;
                }
                roster.members.insert(
                    id.clone(),
                    Member {
                        level: PermissionLevel::Member,
                        added_by: self.me().to_owned(),
                    },
                );
                roster.history.insert(id.clone());
                added.push(id);
            }
            added
        };
        for inbox_id in added {
            self.core.net().publish(NetEvent::GroupJoined {
                group_id: self.state.id.clone(),
                inbox_id,
            });
        }
        Ok(())
    }

    fn remove(&self, inbox_ids: &[String]) -> Result<()> {
        self.core.check()?;
        let mut roster = self.state.roster();
        roster.authorize(
            &self.state.id,
            self.me(),
            PermissionUpdateType::RemoveMember,
            None,
        )?;
        let actor = roster.level_of(&self.state.id, self.me())?;
        for id in inbox_ids {
            let target = roster.members.get(id).map(|m| m.level);
            if target == Some(PermissionLevel::SuperAdmin) && actor != PermissionLevel::SuperAdmin {
                return Err(Error::Library(format!(
                    "{id} is a super admin and cannot be removed by a {actor}"
                )));
            }
        }
        for id in inbox_ids {
            roster.members.remove(id);
        }
        Ok(())
    }

    fn set_level(
        &self,
        target: &str,
        level: PermissionLevel,
        gate: impl FnOnce(&Roster) -> Result<()>,
    ) -> Result<()> {
        self.core.check()?;
        let mut roster = self.state.roster();
        gate(&roster)?;
        let member = roster.members.get_mut(target).ok_or_else(|| {
            Error::Library(format!("{target} is not a member of {}", self.state.id))
        })?;
        member.level = level;
        Ok(())
    }
}

#[async_trait]
impl MessageContainer for LoopbackGroup {
    fn id(&self) -> &str {
        &self.state.id
    }

    fn topic(&self) -> &str {
        &self.state.topic
    }

    fn created_at_ns(&self) -> i64 {
        self.state.created_at_ns
    }

    async fn send(&self, content: &[u8]) -> Result<String> {
        self.core.check()?;
        if !self.state.is_member(self.me()) {
            return Err(Error::Library(format!("not a member of {}", self.state.id)));
        }
        Ok(self.core.send(&self.state.topic, Some(&self.state.id), content))
    }

    async fn prepare_message(&self, content: &[u8]) -> Result<PreparedEnvelope> {
        self.core.check()?;
        Ok(self.core.seal(&self.state.topic, content))
    }

    async fn send_prepared(&self, envelope: &PreparedEnvelope) -> Result<String> {
        self.core.check()?;
        if !self.state.is_member(self.me()) {
            return Err(Error::Library(format!("not a member of {}", self.state.id)));
        }
        self.core
            .publish_sealed(&self.state.topic, Some(&self.state.id), envelope)
    }

    async fn sync(&self) -> Result<()> {
        self.core.check()
    }

    async fn messages(&self, options: &ListMessagesOptions) -> Result<Vec<DecodedMessage>> {
        self.core.check()?;
        Ok(self.core.stored(&self.state.topic, options))
    }

    async fn stream_messages(&self) -> Result<EventStream<DecodedMessage>> {
        self.core.check()?;
        Ok(self.core.stream_topic(&self.state.topic))
    }

    async fn consent_state(&self) -> Result<ConsentState> {
        self.core.check()?;
        Ok(self
            .core
            .local_consent(ConsentEntityType::GroupId, &self.state.id))
    }
}

#[async_trait]
impl GroupRef for LoopbackGroup {
    fn metadata(&self) -> GroupMetadata {
        self.state.roster().metadata.clone()
    }

    fn is_active(&self) -> bool {
        self.state.is_member(self.me())
    }

    fn added_by_inbox_id(&self) -> String {
        self.state
            .roster()
            .members
            .get(self.me())
            .map(|m| m.added_by.clone())
            .unwrap_or_default()
    }

    fn creator_inbox_id(&self) -> String {
        self.state.creator.clone()
    }

    async fn members(&self) -> Result<Vec<GroupMember>> {
        self.core.check()?;
        let snapshot: Vec<(String, PermissionLevel)> = self
            .state
            .roster()
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.level))
            .collect();
        Ok(snapshot
            .into_iter()
            .map(|(inbox_id, permission_level)| GroupMember {
                addresses: vec![self.core.net().address_of(&inbox_id)],
                consent_state: self
                    .core
                    .local_consent(ConsentEntityType::InboxId, &inbox_id),
                inbox_id,
                permission_level,
            })
            .collect())
    }

    async fn add_members(&self, addresses: &[String]) -> Result<()> {
        let inbox_ids = self.core.net().resolve_all(addresses)?;
        self.add(inbox_ids)
    }

    async fn remove_members(&self, addresses: &[String]) -> Result<()> {
        let inbox_ids = self.core.net().resolve_all(addresses)?;
        self.remove(&inbox_ids)
    }

    async fn add_members_by_inbox_id(&self, inbox_ids: &[String]) -> Result<()> {
        self.add(inbox_ids.to_vec())
    }

    async fn remove_members_by_inbox_id(&self, inbox_ids: &[String]) -> Result<()> {
        self.remove(inbox_ids)
    }

    async fn add_admin(&self, inbox_id: &str) -> Result<()> {
        let (group_id, me) = (&self.state.id, self.me());
        self.set_level(inbox_id, PermissionLevel::Admin, |r| {
            r.authorize(group_id, me, PermissionUpdateType::AddAdmin, None)
        })
    }

    async fn remove_admin(&self, inbox_id: &str) -> Result<()> {
        let (group_id, me) = (&self.state.id, self.me());
        self.set_level(inbox_id, PermissionLevel::Member, |r| {
            r.authorize(group_id, me, PermissionUpdateType::RemoveAdmin, None)
        })
    }

    async fn add_super_admin(&self, inbox_id: &str) -> Result<()> {
        let (group_id, me) = (&self.state.id, self.me());
        self.set_level(inbox_id, PermissionLevel::SuperAdmin, |r| {
            r.require_super_admin(group_id, me)
        })
    }

    async fn remove_super_admin(&self, inbox_id: &str) -> Result<()> {
        let (group_id, me) = (&self.state.id, self.me());
        self.set_level(inbox_id, PermissionLevel::Member, |r| {
            r.require_super_admin(group_id, me)?;
            let supers = r
                .members
                .values()
                .filter(|m| m.level == PermissionLevel::SuperAdmin)
                .count();
            if supers <= 1 {
                return Err(Error::Library("a group keeps at least one super admin".into()));
            }
            Ok(())
        })
    }

    async fn update_metadata(&self, field: MetadataField, value: &str) -> Result<()> {
        self.core.check()?;
        let mut roster = self.state.roster();
        roster.authorize(
            &self.state.id,
            self.me(),
            PermissionUpdateType::UpdateMetadata,
            Some(field),
        )?;
        roster.metadata.set(field, value.to_owned());
        Ok(())
    }

    async fn permission_policy_set(&self) -> Result<PermissionPolicySet> {
        self.core.check()?;
        Ok(self.state.roster().policies)
    }

    async fn update_permission_policy(
        &self,
        update: PermissionUpdateType,
        option: PermissionOption,
        field: Option<MetadataField>,
    ) -> Result<()> {
        self.core.check()?;
        let mut roster = self.state.roster();
        roster.require_super_admin(&self.state.id, self.me())?;
        roster.policies.set_policy(update, field, option);
        Ok(())
    }

    async fn update_consent_state(&self, state: ConsentState) -> Result<()> {
        self.core.check()?;
        self.core.record_consent(
            ConsentEntityType::GroupId,
            std::slice::from_ref(&self.state.id),
            state,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::Network;
    use super::*;
    use crate::config::ClientOptions;

    fn join(net: &Arc<Network>, name: &str) -> Arc<ClientCore> {
        let inbox_id = net.register(&format!("0x{name}"), [7; 32]);
        let record = net.inboxes.get(&inbox_id).unwrap().value().clone();
        ClientCore::new(
            Arc::clone(net),
            inbox_id,
            record,
            name.to_owned(),
            &ClientOptions::default(),
        )
    }

    fn setup(options: &CreateGroupOptions) -> (LoopbackGroup, LoopbackGroup, Arc<ClientCore>) {
        let net = Arc::new(Network::new());
        let alice = join(&net, "a11ce");
        let bob = join(&net, "b0b");
        let carol = join(&net, "ca201");
        let state = Arc::new(GroupState::new(
            "g1".into(),
            alice.inbox_id(),
            net.now_ns(),
            &[bob.inbox_id().to_owned()],
            options,
        ));
        (
            LoopbackGroup::new(alice, Arc::clone(&state)),
            LoopbackGroup::new(bob, state),
            carol,
        )
    }

    #[tokio::test]
    async fn creator_is_the_only_super_admin() {
        let (alice, bob, _) = setup(&CreateGroupOptions::default());
        let members = alice.members().await.unwrap();
        assert_eq!(members.len(), 2);
        let supers: Vec<_> = members
            .iter()
            .filter(|m| m.permission_level == PermissionLevel::SuperAdmin)
            .collect();
        assert_eq!(supers.len(), 1);
        assert_eq!(supers[0].inbox_id, alice.creator_inbox_id());
        assert_eq!(bob.added_by_inbox_id(), alice.creator_inbox_id());
        assert!(alice.remove_super_admin(alice.me()).await.is_err());
    }

    #[tokio::test]
    async fn admin_only_groups_reject_member_edits() {
        let options = CreateGroupOptions {
            permissions: crate::types::GroupPermissionsPreset::AdminOnly,
            ..CreateGroupOptions::default()
        };
        let (alice, bob, _) = setup(&options);
        assert!(bob.update_metadata(MetadataField::Name, "x").await.is_err());
        alice
            .update_metadata(MetadataField::Name, "ops")
            .await
            .unwrap();
        assert_eq!(bob.metadata().name, "ops");

        alice.add_admin(bob.me()).await.unwrap();
        bob.update_metadata(MetadataField::Description, "d")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn removed_members_go_inactive_but_keep_history() {
        let (alice, bob, carol) = setup(&CreateGroupOptions::default());
        let carol_id = carol.inbox_id().to_owned();
        bob.add_members_by_inbox_id(std::slice::from_ref(&carol_id))
            .await
            .unwrap();
        assert!(alice.state.is_member(&carol_id));

        alice
            .remove_members_by_inbox_id(&[bob.me().to_owned()])
            .await
            .unwrap();
        assert!(!bob.is_active());
        assert!(alice.state.has_history(bob.me()));
        assert!(bob.send(b"hi").await.is_err());
    }

    #[tokio::test]
    async fn policy_changes_need_a_super_admin() {
        let (alice, bob, _) = setup(&CreateGroupOptions::default());
        assert!(
            bob.update_permission_policy(
                PermissionUpdateType::AddMember,
                PermissionOption::Deny,
                None
            )
            .await
            .is_err()
        );
        alice
            .update_permission_policy(PermissionUpdateType::AddMember, PermissionOption::Deny, None)
            .await
            .unwrap();
        let set = bob.permission_policy_set().await.unwrap();
        assert_eq!(set.add_member_policy, PermissionOption::Deny);
        assert!(
            alice
                .add_members_by_inbox_id(&["nobody".to_owned()])
                .await
                .is_err()
        );
    }
}
