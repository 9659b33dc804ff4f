use std::time::Duration;

/// Coarse classification shared by every ledger error, for callers that only
/// need to pick a user-facing message or status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyEnrolled,
    NotEnrolled,
    CourseNotFound,
    StorageFailure,
    InvalidInput,
}

/// Failures of the entity store. Any of these inside a transaction means the
/// transaction was rolled back.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Operation exceeded its deadline of {0:?}")]
    Timeout(Duration),
    #[error("Injected failure at {0}")]
    Injected(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Course {0} not found")]
    CourseNotFound(i64),
    #[error("Student {student_id} is already enrolled in course {course_id}")]
    AlreadyEnrolled { student_id: i64, course_id: i64 },
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

impl EnrollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollError::InvalidInput(_) => ErrorKind::InvalidInput,
            EnrollError::CourseNotFound(_) => ErrorKind::CourseNotFound,
            EnrollError::AlreadyEnrolled { .. } => ErrorKind::AlreadyEnrolled,
            EnrollError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }
}

impl From<sqlx::Error> for EnrollError {
    fn from(e: sqlx::Error) -> Self {
        EnrollError::StorageFailure(e.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UnenrollError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Student {student_id} is not enrolled in course {course_id}")]
    NotEnrolled { student_id: i64, course_id: i64 },
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),
}

impl UnenrollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnenrollError::InvalidInput(_) => ErrorKind::InvalidInput,
            UnenrollError::NotEnrolled { .. } => ErrorKind::NotEnrolled,
            UnenrollError::StorageFailure(_) => ErrorKind::StorageFailure,
        }
    }
}

impl From<sqlx::Error> for UnenrollError {
    fn from(e: sqlx::Error) -> Self {
        UnenrollError::StorageFailure(e.into())
    }
}

/// Returns true when the error is a storage-level unique constraint hit.
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}
