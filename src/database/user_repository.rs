use crate::database::error::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    Moderator,
    Member,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "ADMIN",
            UserRole::Moderator => "MODERATOR",
            UserRole::Member => "MEMBER",
        }
    }

    /// May review manual payments and refund on behalf of payers
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Moderator)
    }
}

impl FromStr for UserRole {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_uppercase().as_str() {
            "ADMIN" => Ok(UserRole::Admin),
            "MODERATOR" => Ok(UserRole::Moderator),
            "MEMBER" | "USER" => Ok(UserRole::Member),
            other => Err(DatabaseError::decode(format!("unknown user role {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: UserRole,
}

/// Read-only view of the platform's user accounts
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>, DatabaseError>;

    async fn list_by_roles(&self, roles: &[UserRole]) -> Result<Vec<UserProfile>, DatabaseError>;
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: Option<String>,
    display_name: Option<String>,
    role: String,
}

impl TryFrom<UserRow> for UserProfile {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(UserProfile {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            role: row.role.parse()?,
        })
    }
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .map(UserProfile::try_from)
        .transpose()
    }

    async fn list_by_roles(&self, roles: &[UserRole]) -> Result<Vec<UserProfile>, DatabaseError> {
        let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, display_name, role FROM users WHERE role = ANY($1)",
        )
        .bind(&roles)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(UserProfile::try_from).collect()
    }
}
