use anyhow::bail;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use time::OffsetDateTime;

use crate::{money::Money, utils::now_utc};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub instructor_id: i64,
    pub title: String,
    pub price: Money,
    pub is_free: bool,
    /// Cached number of live enrollments, written only by the ledger
    pub enrollment_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourse {
    pub instructor_id: i64,
    pub title: String,
    pub price: Money,
    pub is_free: bool,
}

/// A course whose cached counter disagrees with its enrollment rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct CounterDrift {
    pub course_id: i64,
    pub cached: i64,
    pub actual: i64,
}

pub async fn create_course(database: &SqlitePool, course: &NewCourse) -> anyhow::Result<i64> {
    if course.price.is_negative() {
        bail!("Course price must not be negative, got {}", course.price);
    }
    let result = sqlx::query(
        "INSERT INTO course (instructor_id, title, price, is_free, enrollment_count, created_at) VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(course.instructor_id)
    .bind(&course.title)
    .bind(course.price)
    .bind(course.is_free)
    .bind(now_utc())
    .execute(database)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get_course<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<Option<Course>, sqlx::Error> {
    sqlx::query_as::<_, Course>(
        "SELECT id, instructor_id, title, price, is_free, enrollment_count, created_at FROM course WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub async fn list_courses(database: &SqlitePool) -> anyhow::Result<Vec<Course>> {
    let courses = sqlx::query_as::<_, Course>(
        "SELECT id, instructor_id, title, price, is_free, enrollment_count, created_at FROM course ORDER BY id",
    )
    .fetch_all(database)
    .await?;
    Ok(courses)
}

/// Take the database write lock through a no-op write on the course row.
/// Must be the first statement of a transaction so later reads see every
/// commit that happened before the lock. Returns false if the course is
/// missing.
pub(crate) async fn lock_course<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE course SET enrollment_count = enrollment_count WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn increment_enrollment_count<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE course SET enrollment_count = enrollment_count + 1 WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Decrement floored at zero.
pub(crate) async fn decrement_enrollment_count<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE course SET enrollment_count = MAX(enrollment_count - 1, 0) WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn enrollment_count<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT enrollment_count FROM course WHERE id = ?")
        .bind(id)
        .fetch_one(executor)
        .await
}

pub(crate) async fn set_enrollment_count<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
    count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE course SET enrollment_count = ? WHERE id = ?")
        .bind(count)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn counter_drift<'e, E: SqliteExecutor<'e>>(
    executor: E,
) -> Result<Vec<CounterDrift>, sqlx::Error> {
    sqlx::query_as::<_, CounterDrift>(
        r#"SELECT c.id AS course_id, c.enrollment_count AS cached, COUNT(e.id) AS actual
           FROM course c LEFT JOIN enrollment e ON e.course_id = c.id
           GROUP BY c.id, c.enrollment_count
           HAVING c.enrollment_count != COUNT(e.id)
           ORDER BY c.id"#,
    )
    .fetch_all(executor)
    .await
}
