use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor, SqlitePool};
use time::OffsetDateTime;

use crate::utils::now_utc;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lesson {
    pub id: i64,
    pub course_id: i64,
    pub title: String,
    pub position: i64,
    pub is_published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LessonProgress {
    pub id: i64,
    pub student_id: i64,
    pub lesson_id: i64,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

pub async fn create_lesson(
    database: &SqlitePool,
    course_id: i64,
    title: &str,
    position: i64,
    is_published: bool,
) -> anyhow::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO lesson (course_id, title, position, is_published, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(course_id)
    .bind(title)
    .bind(position)
    .bind(is_published)
    .bind(now_utc())
    .execute(database)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn set_lesson_published(
    database: &SqlitePool,
    lesson_id: i64,
    is_published: bool,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE lesson SET is_published = ? WHERE id = ?")
        .bind(is_published)
        .bind(lesson_id)
        .execute(database)
        .await?;
    Ok(())
}

pub async fn list_lessons(database: &SqlitePool, course_id: i64) -> anyhow::Result<Vec<Lesson>> {
    let lessons = sqlx::query_as::<_, Lesson>(
        "SELECT id, course_id, title, position, is_published FROM lesson WHERE course_id = ? ORDER BY position, id",
    )
    .bind(course_id)
    .fetch_all(database)
    .await?;
    Ok(lessons)
}

/// Upsert the student's completion flag for a lesson. Owned by the content
/// service; the ledger never calls this.
pub async fn record_lesson_completion(
    database: &SqlitePool,
    student_id: i64,
    lesson_id: i64,
    is_completed: bool,
) -> anyhow::Result<()> {
    let completed_at = is_completed.then(now_utc);
    sqlx::query(
        r#"INSERT INTO lesson_progress (student_id, lesson_id, is_completed, completed_at) VALUES (?, ?, ?, ?)
           ON CONFLICT (student_id, lesson_id)
           DO UPDATE SET is_completed = excluded.is_completed, completed_at = excluded.completed_at"#,
    )
    .bind(student_id)
    .bind(lesson_id)
    .bind(is_completed)
    .bind(completed_at)
    .execute(database)
    .await?;
    Ok(())
}

/// Every progress row of the student for lessons of the course, completed or not.
pub async fn list_course_progress<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
    course_id: i64,
) -> Result<Vec<LessonProgress>, sqlx::Error> {
    sqlx::query_as::<_, LessonProgress>(
        r#"SELECT lp.id, lp.student_id, lp.lesson_id, lp.is_completed, lp.completed_at
           FROM lesson_progress lp JOIN lesson l ON l.id = lp.lesson_id
           WHERE lp.student_id = ? AND l.course_id = ?
           ORDER BY lp.lesson_id"#,
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn delete_course_progress<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
    course_id: i64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM lesson_progress WHERE student_id = ? AND lesson_id IN (SELECT id FROM lesson WHERE course_id = ?)",
    )
    .bind(student_id)
    .bind(course_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
