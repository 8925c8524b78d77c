//! Account directory: read-only behavioral signals for trust scoring

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use prahari_common::{AccountRole, Error, Result};

/// The directory signals the trust scorer consumes for one account.
#[derive(Debug, Clone)]
pub struct AccountSignals {
    pub created_at: DateTime<Utc>,
    pub role: AccountRole,
    pub is_banned: bool,
    pub verified_contact: bool,
}

/// Read-only view of the user/account directory.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Fetch signals for an account, `None` for accounts the directory does
    /// not know (treated as brand-new by the scorer).
    async fn account_signals(&self, user_id: Uuid) -> Result<Option<AccountSignals>>;
}

/// Initialize the directory connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| Error::Configuration(e.to_string()))
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountRow {
    created_at: DateTime<Utc>,
    role: String,
    is_banned: bool,
    email_verified: bool,
}

/// Postgres-backed account directory.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountDirectory for PgDirectory {
    async fn account_signals(&self, user_id: Uuid) -> Result<Option<AccountSignals>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT created_at, role, is_banned, email_verified FROM accounts WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        Ok(row.map(|r| AccountSignals {
            created_at: r.created_at,
            role: parse_role(&r.role),
            is_banned: r.is_banned,
            verified_contact: r.email_verified,
        }))
    }
}

fn parse_role(role: &str) -> AccountRole {
    match role {
        "admin" => AccountRole::Admin,
        "staff" => AccountRole::Staff,
        _ => AccountRole::User,
    }
}

/// Fixed in-memory directory for tests and local development.
#[derive(Default)]
pub struct StaticDirectory {
    accounts: DashMap<Uuid, AccountSignals>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Uuid, signals: AccountSignals) {
        self.accounts.insert(user_id, signals);
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn account_signals(&self, user_id: Uuid) -> Result<Option<AccountSignals>> {
        Ok(self.accounts.get(&user_id).map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn static_directory_round_trips_signals() {
        let directory = StaticDirectory::new();
        let id = Uuid::new_v4();
        directory.insert(
            id,
            AccountSignals {
                created_at: Utc::now() - Duration::days(400),
                role: AccountRole::Staff,
                is_banned: false,
                verified_contact: true,
            },
        );

        let signals = directory.account_signals(id).await.unwrap().unwrap();
        assert_eq!(signals.role, AccountRole::Staff);
        assert!(signals.verified_contact);
        assert!(directory
            .account_signals(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_roles_degrade_to_user() {
        assert_eq!(parse_role("admin"), AccountRole::Admin);
        assert_eq!(parse_role("staff"), AccountRole::Staff);
        assert_eq!(parse_role("moderator"), AccountRole::User);
    }
}
