use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{money::Money, utils::now_utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown payment status '{0}'")]
pub struct UnknownPaymentStatus(String);

impl FromStr for PaymentStatus {
    type Err = UnknownPaymentStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownPaymentStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for PaymentStatus {
    type Error = UnknownPaymentStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The durable record that a student joined a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
    /// Advisory, maintained by the lesson-completion workflow
    pub progress_percentage: f64,
    pub is_completed: bool,
    #[sqlx(try_from = "String")]
    pub payment_status: PaymentStatus,
    /// Price paid at enrollment time, independent of later price changes
    pub payment_amount: Money,
    pub payment_method: String,
}

/// An enrollment joined with the title of its course.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct StudentCourse {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub course_title: String,
}

pub(crate) struct NewEnrollment<'a> {
    pub student_id: i64,
    pub course_id: i64,
    pub payment_amount: Money,
    pub payment_method: &'a str,
    pub payment_status: PaymentStatus,
}

const ENROLLMENT_COLUMNS: &str = "id, student_id, course_id, enrolled_at, progress_percentage, is_completed, payment_status, payment_amount, payment_method";

pub async fn find_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, sqlx::Error> {
    let sql =
        format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollment WHERE student_id = ? AND course_id = ?");
    sqlx::query_as::<_, Enrollment>(&sql)
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(executor)
        .await
}

pub async fn enrollment_exists<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
    course_id: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM enrollment WHERE student_id = ? AND course_id = ?)",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn insert_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    new: &NewEnrollment<'_>,
) -> Result<Enrollment, sqlx::Error> {
    let enrolled_at = now_utc();
    let result = sqlx::query(
        r#"INSERT INTO enrollment
           (student_id, course_id, enrolled_at, progress_percentage, is_completed, payment_status, payment_amount, payment_method)
           VALUES (?, ?, ?, 0, 0, ?, ?, ?)"#,
    )
    .bind(new.student_id)
    .bind(new.course_id)
    .bind(enrolled_at)
    .bind(new.payment_status.as_str())
    .bind(new.payment_amount)
    .bind(new.payment_method)
    .execute(executor)
    .await?;
    Ok(Enrollment {
        id: result.last_insert_rowid(),
        student_id: new.student_id,
        course_id: new.course_id,
        enrolled_at,
        progress_percentage: 0.0,
        is_completed: false,
        payment_status: new.payment_status,
        payment_amount: new.payment_amount,
        payment_method: new.payment_method.to_string(),
    })
}

pub(crate) async fn delete_enrollment<'e, E: SqliteExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM enrollment WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

pub async fn count_course_enrollments<'e, E: SqliteExecutor<'e>>(
    executor: E,
    course_id: i64,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM enrollment WHERE course_id = ?")
        .bind(course_id)
        .fetch_one(executor)
        .await
}

pub async fn list_student_courses<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
) -> Result<Vec<StudentCourse>, sqlx::Error> {
    sqlx::query_as::<_, StudentCourse>(
        r#"SELECT e.id, e.student_id, e.course_id, e.enrolled_at, e.progress_percentage, e.is_completed,
                  e.payment_status, e.payment_amount, e.payment_method, c.title AS course_title
           FROM enrollment e JOIN course c ON c.id = e.course_id
           WHERE e.student_id = ?
           ORDER BY e.enrolled_at DESC, e.id DESC"#,
    )
    .bind(student_id)
    .fetch_all(executor)
    .await
}
