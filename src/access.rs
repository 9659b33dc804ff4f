use sqlx::SqliteExecutor;

use crate::error::StorageError;

/// Whether the user may see the course content: enrolled, or the course's
/// instructor. One statement, so both conditions see the same snapshot.
pub async fn has_access<'e, E: SqliteExecutor<'e>>(
    executor: E,
    user_id: i64,
    course_id: i64,
) -> Result<bool, StorageError> {
    let allowed = sqlx::query_scalar(
        r#"SELECT EXISTS (SELECT 1 FROM enrollment WHERE student_id = ?1 AND course_id = ?2)
               OR EXISTS (SELECT 1 FROM course WHERE id = ?2 AND instructor_id = ?1)"#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_one(executor)
    .await?;
    Ok(allowed)
}
