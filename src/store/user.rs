use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;

use crate::utils::now_utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Instructor => "instructor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown role '{0}'")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "instructor" => Ok(Role::Instructor),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn create_user(
    database: &SqlitePool,
    name: &str,
    email: &str,
    role: Role,
) -> anyhow::Result<i64> {
    let user = sqlx::query("INSERT INTO user (name, email, role, created_at) VALUES (?, ?, ?, ?)")
        .bind(name)
        .bind(email)
        .bind(role.as_str())
        .bind(now_utc())
        .execute(database)
        .await?;
    Ok(user.last_insert_rowid())
}

pub async fn get_user(database: &SqlitePool, id: i64) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, email, role, created_at FROM user WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(database)
    .await?;
    Ok(user)
}

pub async fn list_users(database: &SqlitePool) -> anyhow::Result<Vec<User>> {
    let users =
        sqlx::query_as::<_, User>("SELECT id, name, email, role, created_at FROM user ORDER BY id")
            .fetch_all(database)
            .await?;
    Ok(users)
}
