use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};
use utoipa::ToSchema;

use crate::error::StorageError;

/// Completion derived from lesson progress rows. Advisory only: the stored
/// `Enrollment::progress_percentage` stays the authoritative figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProgressReport {
    pub completed_lessons: i64,
    pub published_lessons: i64,
    /// 0 to 100, rounded to two decimals
    pub percentage: f64,
}

#[derive(FromRow)]
struct LessonCounts {
    published: i64,
    completed: i64,
}

/// Both counts are read by one statement so they come from the same snapshot.
/// Completions of unpublished lessons are not counted, which keeps the result
/// within 0..=100.
pub async fn compute_progress<'e, E: SqliteExecutor<'e>>(
    executor: E,
    student_id: i64,
    course_id: i64,
) -> Result<ProgressReport, StorageError> {
    let counts = sqlx::query_as::<_, LessonCounts>(
        r#"SELECT
             (SELECT COUNT(*) FROM lesson WHERE course_id = ?1 AND is_published = 1) AS published,
             (SELECT COUNT(*) FROM lesson_progress lp JOIN lesson l ON l.id = lp.lesson_id
               WHERE lp.student_id = ?2 AND l.course_id = ?1
                 AND l.is_published = 1 AND lp.is_completed = 1) AS completed"#,
    )
    .bind(course_id)
    .bind(student_id)
    .fetch_one(executor)
    .await?;
    Ok(ProgressReport {
        completed_lessons: counts.completed,
        published_lessons: counts.published,
        percentage: percentage(counts.completed, counts.published),
    })
}

pub fn percentage(completed: i64, published: i64) -> f64 {
    if published <= 0 {
        return 0.0;
    }
    let raw = 100.0 * completed as f64 / published as f64;
    (raw * 100.0).round() / 100.0
}
