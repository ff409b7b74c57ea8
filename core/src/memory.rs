//! In-memory storage.
//!
//! Keeps hosts, settings and registrations behind a tokio `RwLock`.
//! Registrations live in a `Vec` so insertion order is preserved for sort
//! ties.

use crate::repository::{HostRepository, RegistrationRepository, RepositoryError};
use crate::types::{
    Host, HostEntity, HostId, HostSettings, Registrant, Registration, RegistrationId,
    RegistrationSort, StatusFilter,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    hosts: HashMap<HostId, HostEntity>,
    settings: HashMap<HostId, HostSettings>,
    registrations: Vec<Registration>,
}

/// In-memory implementation of both repository traits
#[derive(Default)]
pub struct InMemoryRegistrationStore {
    state: RwLock<State>,
}

impl InMemoryRegistrationStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a host together with its settings
    pub async fn insert_host(&self, host: Host) {
        let mut state = self.state.write().await;
        let id = host.id();
        state.hosts.insert(id, host.entity);
        state.settings.insert(id, host.settings);
    }

    /// Store a host entity without registration settings
    pub async fn insert_entity(&self, entity: HostEntity) {
        self.state.write().await.hosts.insert(entity.id, entity);
    }

    /// Replace the settings of a host
    pub async fn update_settings(&self, host_id: HostId, settings: HostSettings) {
        self.state.write().await.settings.insert(host_id, settings);
    }

    /// Every registration for a host, in insertion order
    pub async fn registrations_for(&self, host_id: HostId) -> Vec<Registration> {
        self.state
            .read()
            .await
            .registrations
            .iter()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect()
    }
}

impl HostRepository for InMemoryRegistrationStore {
    fn load_host(&self, id: HostId) -> BoxFuture<'_, Result<Option<HostEntity>, RepositoryError>> {
        Box::pin(async move { Ok(self.state.read().await.hosts.get(&id).cloned()) })
    }

    fn load_settings(
        &self,
        id: HostId,
    ) -> BoxFuture<'_, Result<Option<HostSettings>, RepositoryError>> {
        Box::pin(async move { Ok(self.state.read().await.settings.get(&id).cloned()) })
    }
}

impl RegistrationRepository for InMemoryRegistrationStore {
    fn load(
        &self,
        id: RegistrationId,
    ) -> BoxFuture<'_, Result<Option<Registration>, RepositoryError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.registrations.iter().find(|r| r.id == id).cloned())
        })
    }

    fn save(&self, registration: Registration) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let position = state
                .registrations
                .iter()
                .position(|r| r.id == registration.id);
            match position {
                Some(index) => state.registrations[index] = registration,
                None => state.registrations.push(registration),
            }
            Ok(())
        })
    }

    fn delete(&self, id: RegistrationId) -> BoxFuture<'_, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let before = state.registrations.len();
            state.registrations.retain(|r| r.id != id);
            Ok(state.registrations.len() != before)
        })
    }

    fn sum_spaces(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'_, Result<u32, RepositoryError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .registrations
                .iter()
                .filter(|r| r.host_id == host_id && filter.matches(r.status))
                .filter(|r| Some(r.id) != exclude)
                .fold(0u32, |sum, r| sum.saturating_add(r.spaces_reserved)))
        })
    }

    fn list(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        sort: RegistrationSort,
    ) -> BoxFuture<'_, Result<Vec<Registration>, RepositoryError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            let mut registrations: Vec<Registration> = state
                .registrations
                .iter()
                .filter(|r| r.host_id == host_id && filter.matches(r.status))
                .cloned()
                .collect();
            // `sort_by` is stable: ties stay in insertion order.
            registrations.sort_by(|a, b| sort.compare(a, b));
            Ok(registrations)
        })
    }

    fn registrant_exists<'a>(
        &'a self,
        host_id: HostId,
        registrant: &'a Registrant,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state.registrations.iter().any(|r| {
                r.host_id == host_id
                    && &r.registrant == registrant
                    && !r.status.is_canceled()
                    && Some(r.id) != exclude
            }))
        })
    }
}
