//! `PostgreSQL` storage for Registration Core.
//!
//! Implements [`HostRepository`] and [`RegistrationRepository`] on top of a
//! sqlx connection pool:
//!
//! - Host settings stored as JSONB, one row per configured host
//! - Registrations in a flat table with an insertion sequence for sort ties
//! - Capacity sums computed in the database
//! - [`PostgresHostLock`], a transaction-scoped advisory lock per host that
//!   serializes admissions across every process sharing the database
//!
//! # Example
//!
//! ```ignore
//! use registration_postgres::PostgresRegistrationStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "postgres://localhost/registrations";
//!     let store = PostgresRegistrationStore::connect(url, 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use registration_core::repository::{
    HostGuard, HostLock, HostRepository, RegistrationRepository, RepositoryError,
};
use registration_core::types::{
    Host, HostEntity, HostId, HostSettings, Registrant, Registration, RegistrationId,
    RegistrationSort, RegistrationStatus, SortDirection, SortField, StatusFilter, UserId,
};
use registration_core::service::HostLocks;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use uuid::Uuid;

const REGISTRATION_COLUMNS: &str = "id, host_id, registrant_type, user_id, email, author, \
                                    spaces_reserved, status, created, changed";

/// `PostgreSQL`-backed host and registration storage.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to connect: {e}")))?;
        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Insert or update a host entity.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn save_host(&self, entity: &HostEntity) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO registration_hosts (id, kind, label) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO UPDATE SET kind = EXCLUDED.kind, label = EXCLUDED.label",
        )
        .bind(entity.id.as_uuid())
        .bind(&entity.kind)
        .bind(&entity.label)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save host: {e}")))?;
        Ok(())
    }

    /// Insert or replace the registration settings of a host.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Serialization`] if the settings cannot be
    /// encoded, [`RepositoryError::Database`] if the query fails.
    pub async fn save_settings(
        &self,
        host_id: HostId,
        settings: &HostSettings,
    ) -> Result<(), RepositoryError> {
        let value = serde_json::to_value(settings).map_err(|e| {
            RepositoryError::Serialization(format!("Failed to encode settings: {e}"))
        })?;
        sqlx::query(
            "INSERT INTO registration_settings (host_id, settings) VALUES ($1, $2)
             ON CONFLICT (host_id) DO UPDATE SET settings = EXCLUDED.settings, updated_at = now()",
        )
        .bind(host_id.as_uuid())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save settings: {e}")))?;
        Ok(())
    }

    /// Store a host together with its settings.
    ///
    /// # Errors
    ///
    /// Returns error if either write fails.
    pub async fn save_configured_host(&self, host: &Host) -> Result<(), RepositoryError> {
        self.save_host(&host.entity).await?;
        self.save_settings(host.id(), &host.settings).await
    }

    /// Remove a host's settings, leaving it unconfigured.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the query fails.
    pub async fn clear_settings(&self, host_id: HostId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM registration_settings WHERE host_id = $1")
            .bind(host_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to clear settings: {e}")))?;
        Ok(())
    }
}

/// Storage form of a registrant
fn registrant_columns(registrant: &Registrant) -> (&'static str, Option<Uuid>, Option<&str>) {
    match registrant {
        Registrant::User { id } => ("user", Some(*id.as_uuid()), None),
        Registrant::Anonymous { email } => ("anonymous", None, Some(email.as_str())),
    }
}

fn status_names(filter: StatusFilter) -> Vec<String> {
    filter
        .statuses()
        .into_iter()
        .map(|status| status.as_str().to_string())
        .collect()
}

const fn order_by(sort: RegistrationSort) -> &'static str {
    match (sort.field, sort.direction) {
        (SortField::Created, SortDirection::Asc) => "created ASC, seq ASC",
        (SortField::Created, SortDirection::Desc) => "created DESC, seq ASC",
        (SortField::Changed, SortDirection::Asc) => "changed ASC, seq ASC",
        (SortField::Changed, SortDirection::Desc) => "changed DESC, seq ASC",
        (SortField::SpacesReserved, SortDirection::Asc) => "spaces_reserved ASC, seq ASC",
        (SortField::SpacesReserved, SortDirection::Desc) => "spaces_reserved DESC, seq ASC",
    }
}

#[derive(sqlx::FromRow)]
struct RegistrationRow {
    id: Uuid,
    host_id: Uuid,
    registrant_type: String,
    user_id: Option<Uuid>,
    email: Option<String>,
    author: Option<Uuid>,
    spaces_reserved: i32,
    status: String,
    created: DateTime<Utc>,
    changed: DateTime<Utc>,
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = RepositoryError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let registrant = match (row.registrant_type.as_str(), row.user_id, row.email) {
            ("user", Some(user_id), _) => Registrant::user(UserId::from_uuid(user_id)),
            ("anonymous", _, Some(email)) => Registrant::Anonymous { email },
            (kind, _, _) => {
                return Err(RepositoryError::Serialization(format!(
                    "Registration {} has an incomplete {kind} registrant",
                    row.id
                )));
            }
        };
        let status: RegistrationStatus = row
            .status
            .parse()
            .map_err(|e| RepositoryError::Serialization(format!("{e}")))?;
        let spaces_reserved = u32::try_from(row.spaces_reserved).map_err(|e| {
            RepositoryError::Serialization(format!("Invalid spaces for {}: {e}", row.id))
        })?;

        Ok(Self {
            id: RegistrationId::from_uuid(row.id),
            host_id: HostId::from_uuid(row.host_id),
            registrant,
            author: row.author.map(UserId::from_uuid),
            spaces_reserved,
            status,
            created: row.created,
            changed: row.changed,
        })
    }
}

/// Per-host lock shared by every process using the same database.
///
/// Callers in this process queue on a [`HostLocks`] table first, so only one
/// of them per host holds a connection. That caller then opens a transaction
/// and takes `pg_advisory_xact_lock` for the host. Dropping the guard rolls
/// the transaction back, which releases the advisory lock.
#[derive(Clone)]
pub struct PostgresHostLock {
    pool: PgPool,
    local: Arc<HostLocks>,
}

impl PostgresHostLock {
    /// Lock through connections from `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            local: Arc::new(HostLocks::new()),
        }
    }
}

/// Advisory lock key for a host
fn lock_key(host_id: HostId) -> i64 {
    let (high, low) = host_id.as_uuid().as_u64_pair();
    i64::from_ne_bytes((high ^ low).to_ne_bytes())
}

impl HostLock for PostgresHostLock {
    fn lock(&self, host_id: HostId) -> BoxFuture<'_, Result<HostGuard, RepositoryError>> {
        Box::pin(async move {
            let local = self.local.lock(host_id).await?;
            let mut transaction = self
                .pool
                .begin()
                .await
                .map_err(|e| RepositoryError::Database(format!("Failed to begin lock: {e}")))?;
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(lock_key(host_id))
                .execute(&mut *transaction)
                .await
                .map_err(|e| {
                    RepositoryError::Database(format!("Failed to lock host {host_id}: {e}"))
                })?;
            tracing::trace!(host_id = %host_id, "Host advisory lock acquired");
            Ok(HostGuard::new((transaction, local)))
        })
    }
}

impl HostRepository for PostgresRegistrationStore {
    fn load_host(&self, id: HostId) -> BoxFuture<'_, Result<Option<HostEntity>, RepositoryError>> {
        Box::pin(async move {
            let row: Option<(Uuid, String, String)> =
                sqlx::query_as("SELECT id, kind, label FROM registration_hosts WHERE id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| RepositoryError::Database(format!("Failed to load host: {e}")))?;

            Ok(row.map(|(id, kind, label)| HostEntity::new(HostId::from_uuid(id), kind, label)))
        })
    }

    fn load_settings(
        &self,
        id: HostId,
    ) -> BoxFuture<'_, Result<Option<HostSettings>, RepositoryError>> {
        Box::pin(async move {
            let row: Option<(serde_json::Value,)> =
                sqlx::query_as("SELECT settings FROM registration_settings WHERE host_id = $1")
                    .bind(id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        RepositoryError::Database(format!("Failed to load settings: {e}"))
                    })?;

            row.map(|(value,)| {
                serde_json::from_value(value).map_err(|e| {
                    RepositoryError::Serialization(format!("Invalid settings for host {id}: {e}"))
                })
            })
            .transpose()
        })
    }
}

impl RegistrationRepository for PostgresRegistrationStore {
    fn load(
        &self,
        id: RegistrationId,
    ) -> BoxFuture<'_, Result<Option<Registration>, RepositoryError>> {
        Box::pin(async move {
            let row: Option<RegistrationRow> = sqlx::query_as(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to load registration: {e}")))?;

            row.map(Registration::try_from).transpose()
        })
    }

    fn save(&self, registration: Registration) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            let (registrant_type, user_id, email) = registrant_columns(&registration.registrant);
            let spaces = i32::try_from(registration.spaces_reserved).map_err(|e| {
                RepositoryError::Serialization(format!("Spaces out of range: {e}"))
            })?;

            sqlx::query(
                "INSERT INTO registrations
                     (id, host_id, registrant_type, user_id, email, author,
                      spaces_reserved, status, created, changed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 ON CONFLICT (id) DO UPDATE SET
                     registrant_type = EXCLUDED.registrant_type,
                     user_id = EXCLUDED.user_id,
                     email = EXCLUDED.email,
                     author = EXCLUDED.author,
                     spaces_reserved = EXCLUDED.spaces_reserved,
                     status = EXCLUDED.status,
                     changed = EXCLUDED.changed",
            )
            .bind(registration.id.as_uuid())
            .bind(registration.host_id.as_uuid())
            .bind(registrant_type)
            .bind(user_id)
            .bind(email)
            .bind(registration.author.map(|author| *author.as_uuid()))
            .bind(spaces)
            .bind(registration.status.as_str())
            .bind(registration.created)
            .bind(registration.changed)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to save registration: {e}")))?;

            tracing::debug!(
                registration_id = %registration.id,
                status = %registration.status,
                "Saved registration"
            );
            Ok(())
        })
    }

    fn delete(&self, id: RegistrationId) -> BoxFuture<'_, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM registrations WHERE id = $1")
                .bind(id.as_uuid())
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    RepositoryError::Database(format!("Failed to delete registration: {e}"))
                })?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn sum_spaces(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'_, Result<u32, RepositoryError>> {
        Box::pin(async move {
            let (total,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(SUM(spaces_reserved), 0)::BIGINT FROM registrations
                 WHERE host_id = $1
                   AND status = ANY($2)
                   AND ($3::UUID IS NULL OR id <> $3)",
            )
            .bind(host_id.as_uuid())
            .bind(status_names(filter))
            .bind(exclude.map(|id| *id.as_uuid()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to sum spaces: {e}")))?;

            u32::try_from(total).map_err(|e| {
                RepositoryError::Serialization(format!("Space total out of range: {e}"))
            })
        })
    }

    fn list(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        sort: RegistrationSort,
    ) -> BoxFuture<'_, Result<Vec<Registration>, RepositoryError>> {
        Box::pin(async move {
            let rows: Vec<RegistrationRow> = sqlx::query_as(&format!(
                "SELECT {REGISTRATION_COLUMNS} FROM registrations
                 WHERE host_id = $1 AND status = ANY($2)
                 ORDER BY {}",
                order_by(sort)
            ))
            .bind(host_id.as_uuid())
            .bind(status_names(filter))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to list registrations: {e}")))?;

            rows.into_iter().map(Registration::try_from).collect()
        })
    }

    fn registrant_exists<'a>(
        &'a self,
        host_id: HostId,
        registrant: &'a Registrant,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>> {
        Box::pin(async move {
            let (registrant_type, user_id, email) = registrant_columns(registrant);
            let (exists,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(
                     SELECT 1 FROM registrations
                     WHERE host_id = $1
                       AND registrant_type = $2
                       AND user_id IS NOT DISTINCT FROM $3
                       AND email IS NOT DISTINCT FROM $4
                       AND status <> 'canceled'
                       AND ($5::UUID IS NULL OR id <> $5)
                 )",
            )
            .bind(host_id.as_uuid())
            .bind(registrant_type)
            .bind(user_id)
            .bind(email)
            .bind(exclude.map(|id| *id.as_uuid()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to check registrant: {e}")))?;

            Ok(exists)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_breaks_ties_by_insertion() {
        for field in [SortField::Created, SortField::Changed, SortField::SpacesReserved] {
            for direction in [SortDirection::Asc, SortDirection::Desc] {
                assert!(order_by(RegistrationSort::new(field, direction)).ends_with("seq ASC"));
            }
        }
        assert_eq!(
            order_by(RegistrationSort::new(SortField::SpacesReserved, SortDirection::Desc)),
            "spaces_reserved DESC, seq ASC"
        );
    }

    #[test]
    fn test_registrant_columns() {
        let user = UserId::new();
        assert_eq!(
            registrant_columns(&Registrant::user(user)),
            ("user", Some(*user.as_uuid()), None)
        );
        assert_eq!(
            registrant_columns(&Registrant::anonymous("Guest@Example.org")),
            ("anonymous", None, Some("guest@example.org"))
        );
    }

    #[test]
    fn test_active_filter_names() {
        assert_eq!(
            status_names(StatusFilter::Active),
            vec!["pending", "held", "complete"]
        );
    }

    #[test]
    fn test_incomplete_registrant_row_is_rejected() {
        let row = RegistrationRow {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            registrant_type: "user".to_string(),
            user_id: None,
            email: None,
            author: None,
            spaces_reserved: 1,
            status: "pending".to_string(),
            created: Utc::now(),
            changed: Utc::now(),
        };
        assert!(matches!(
            Registration::try_from(row),
            Err(RepositoryError::Serialization(_))
        ));
    }

    #[test]
    fn test_lock_key_is_stable_per_host() {
        let host = HostId::new();
        assert_eq!(lock_key(host), lock_key(host));
        assert_ne!(lock_key(host), lock_key(HostId::new()));
    }
}
