use std::sync::Arc;

use async_trait::async_trait;

use super::client::ClientCore;
use crate::error::Result;
use crate::library::Contacts;
use crate::types::{ConsentEntityType, ConsentEntry, ConsentState};

/// Consent view of one installation. Writes go to both the local copy and
/// the network; reads only see the local copy until a refresh.
pub(super) struct LoopbackContacts {
    core: Arc<ClientCore>,
}

impl LoopbackContacts {
    pub(super) const fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }
}

#[async_trait]
impl Contacts for LoopbackContacts {
    async fn consent_state(&self, kind: ConsentEntityType, value: &str) -> Result<ConsentState> {
        self.core.check()?;
        Ok(self.core.local_consent(kind, value))
    }

    async fn set_consent(
        &self,
        kind: ConsentEntityType,
        values: &[String],
        state: ConsentState,
    ) -> Result<()> {
        self.core.check()?;
        self.core.record_consent(kind, values, state);
        Ok(())
    }

    async fn consent_list(&self) -> Result<Vec<ConsentEntry>> {
        self.core.check()?;
        Ok(self.core.consent_entries())
    }

    async fn refresh_consent_list(&self) -> Result<Vec<ConsentEntry>> {
        self.core.check()?;
        self.core.pull_consent();
        Ok(self.core.consent_entries())
    }
}
