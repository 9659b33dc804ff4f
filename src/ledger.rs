//! Enrollment transaction coordinator.
//!
//! The only writer of enrollment rows and of `course.enrollment_count`. Enroll
//! and unenroll each run as one SQLite transaction whose first statement takes
//! the database write lock, so the existence check and the writes that depend
//! on it are serialized against every concurrent enroll/unenroll. The schema's
//! `UNIQUE (student_id, course_id)` backs up the check.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    activity::{ActivityAction, ActivityRecorder},
    config::Config,
    error::{EnrollError, StorageError, UnenrollError, is_foreign_key_violation, is_unique_violation},
    fail_point::{FailPoints, points},
    money::Money,
    store::{
        course::{self, CounterDrift},
        enrollment::{self, Enrollment, NewEnrollment, PaymentStatus, StudentCourse},
        lesson,
    },
};

pub const FREE_PAYMENT_METHOD: &str = "free";

/// What a caller should tell the student before confirming an unenroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnenrollEligibility {
    NotEnrolled,
    /// Completed course: unenrolling drops certificate eligibility
    AllowedCompletedCourseWarning,
    /// Paid course: no refund is issued automatically
    AllowedPaidCourseWarning,
    Allowed,
}

impl UnenrollEligibility {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, UnenrollEligibility::NotEnrolled)
    }

    pub fn warning(&self) -> Option<&'static str> {
        match self {
            UnenrollEligibility::AllowedCompletedCourseWarning => Some(
                "You have completed this course. Unenrolling removes your progress and certificate eligibility.",
            ),
            UnenrollEligibility::AllowedPaidCourseWarning => Some(
                "This is a paid course. Unenrolling does not issue a refund; contact support for refunds.",
            ),
            UnenrollEligibility::NotEnrolled | UnenrollEligibility::Allowed => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnenrollSummary {
    /// Snapshot of the deleted row
    pub enrollment: Enrollment,
    pub lesson_progress_removed: u64,
    /// The cached counter was already 0 while an enrollment row existed
    pub counter_drift_detected: bool,
}

#[derive(Debug, Clone)]
pub struct EnrollmentLedger {
    database: SqlitePool,
    activity: ActivityRecorder,
    deadline: Option<Duration>,
    fail_points: FailPoints,
}

impl EnrollmentLedger {
    pub fn new(database: SqlitePool) -> Self {
        Self {
            activity: ActivityRecorder::new(database.clone()),
            database,
            deadline: None,
            fail_points: FailPoints::default(),
        }
    }

    pub fn from_config(database: SqlitePool, config: &Config) -> Self {
        let ledger = Self::new(database);
        match config.operation_deadline() {
            Some(deadline) => ledger.with_deadline(deadline),
            None => ledger,
        }
    }

    /// Bound every enroll/unenroll. An operation still running at the deadline
    /// is dropped, which rolls its transaction back.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn database(&self) -> &SqlitePool {
        &self.database
    }

    pub fn activity(&self) -> &ActivityRecorder {
        &self.activity
    }

    pub fn fail_points(&self) -> &FailPoints {
        &self.fail_points
    }

    /// Record a paid enrollment after the gateway authorized `payment_amount`,
    /// which must equal the course's current price.
    pub async fn enroll(
        &self,
        student_id: i64,
        course_id: i64,
        payment_amount: Money,
        payment_method: &str,
    ) -> Result<Enrollment, EnrollError> {
        validate_ids(student_id, course_id).map_err(EnrollError::InvalidInput)?;
        if payment_amount.is_negative() {
            return Err(EnrollError::InvalidInput(format!(
                "Payment amount must not be negative, got {}",
                payment_amount
            )));
        }
        let payment_method = payment_method.trim();
        if payment_method.is_empty() {
            return Err(EnrollError::InvalidInput(
                "Payment method is required".to_string(),
            ));
        }
        let new = NewEnrollment {
            student_id,
            course_id,
            payment_amount,
            payment_method,
            payment_status: PaymentStatus::Completed,
        };
        let enrollment = self
            .run_then_commit(self.enroll_tx(&new, false))
            .await
            .inspect_err(|e| debug!(student_id, course_id, "enroll rejected: {}", e))?;
        info!(
            student_id,
            course_id,
            enrollment_id = enrollment.id,
            "course purchased for {} via {}",
            payment_amount,
            payment_method
        );
        self.activity
            .record(
                student_id,
                ActivityAction::CoursePurchased,
                &format!("Purchased course {} for {}", course_id, payment_amount),
            )
            .await;
        Ok(enrollment)
    }

    /// Enroll without payment. Only courses flagged free accept this.
    pub async fn enroll_free(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<Enrollment, EnrollError> {
        validate_ids(student_id, course_id).map_err(EnrollError::InvalidInput)?;
        let new = NewEnrollment {
            student_id,
            course_id,
            payment_amount: Money::ZERO,
            payment_method: FREE_PAYMENT_METHOD,
            payment_status: PaymentStatus::Completed,
        };
        let enrollment = self
            .run_then_commit(self.enroll_tx(&new, true))
            .await
            .inspect_err(|e| debug!(student_id, course_id, "free enroll rejected: {}", e))?;
        info!(student_id, course_id, enrollment_id = enrollment.id, "enrolled in free course");
        self.activity
            .record(
                student_id,
                ActivityAction::CourseEnrolled,
                &format!("Enrolled in free course {}", course_id),
            )
            .await;
        Ok(enrollment)
    }

    async fn enroll_tx(
        &self,
        new: &NewEnrollment<'_>,
        free_only: bool,
    ) -> Result<(Transaction<'static, Sqlite>, Enrollment), EnrollError> {
        let (student_id, course_id) = (new.student_id, new.course_id);
        let mut tx = self.database.begin().await?;
        if !course::lock_course(&mut *tx, course_id).await? {
            return Err(EnrollError::CourseNotFound(course_id));
        }
        let course = course::get_course(&mut *tx, course_id)
            .await?
            .ok_or(EnrollError::CourseNotFound(course_id))?;
        if free_only && !course.is_free {
            return Err(EnrollError::InvalidInput(format!(
                "Course {} is not free",
                course_id
            )));
        }
        if !free_only && new.payment_amount != course.price {
            return Err(EnrollError::InvalidInput(format!(
                "Payment amount {} does not match the price {} of course {}",
                new.payment_amount, course.price, course_id
            )));
        }
        if enrollment::enrollment_exists(&mut *tx, student_id, course_id).await? {
            return Err(EnrollError::AlreadyEnrolled {
                student_id,
                course_id,
            });
        }
        let enrollment = enrollment::insert_enrollment(&mut *tx, new)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EnrollError::AlreadyEnrolled {
                        student_id,
                        course_id,
                    }
                } else if is_foreign_key_violation(&e) {
                    EnrollError::InvalidInput(format!("Student {} does not exist", student_id))
                } else {
                    e.into()
                }
            })?;
        self.fail_points.check(points::AFTER_ENROLLMENT_INSERT)?;
        course::increment_enrollment_count(&mut *tx, course_id).await?;
        Ok((tx, enrollment))
    }

    /// Remove the enrollment together with the student's lesson progress in
    /// the course.
    pub async fn unenroll(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<UnenrollSummary, UnenrollError> {
        validate_ids(student_id, course_id).map_err(UnenrollError::InvalidInput)?;
        let summary = self
            .run_then_commit(self.unenroll_tx(student_id, course_id))
            .await
            .inspect_err(|e| debug!(student_id, course_id, "unenroll rejected: {}", e))?;
        info!(
            student_id,
            course_id,
            enrollment_id = summary.enrollment.id,
            "unenrolled, removed {} lesson progress rows",
            summary.lesson_progress_removed
        );
        self.activity
            .record(
                student_id,
                ActivityAction::CourseUnenrolled,
                &format!("Unenrolled from course {}", course_id),
            )
            .await;
        Ok(summary)
    }

    async fn unenroll_tx(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<(Transaction<'static, Sqlite>, UnenrollSummary), UnenrollError> {
        let not_enrolled = || UnenrollError::NotEnrolled {
            student_id,
            course_id,
        };
        let mut tx = self.database.begin().await?;
        if !course::lock_course(&mut *tx, course_id).await? {
            return Err(not_enrolled());
        }
        let enrollment = enrollment::find_enrollment(&mut *tx, student_id, course_id)
            .await?
            .ok_or_else(not_enrolled)?;
        let lesson_progress_removed =
            lesson::delete_course_progress(&mut *tx, student_id, course_id).await?;
        self.fail_points.check(points::AFTER_PROGRESS_DELETE)?;
        enrollment::delete_enrollment(&mut *tx, enrollment.id).await?;
        self.fail_points.check(points::AFTER_ENROLLMENT_DELETE)?;
        let previous = course::enrollment_count(&mut *tx, course_id).await?;
        let counter_drift_detected = previous <= 0;
        if counter_drift_detected {
            warn!(
                course_id,
                "enrollment counter was {} while enrollment {} existed, keeping it at 0",
                previous,
                enrollment.id
            );
        }
        course::decrement_enrollment_count(&mut *tx, course_id).await?;
        let summary = UnenrollSummary {
            enrollment,
            lesson_progress_removed,
            counter_drift_detected,
        };
        Ok((tx, summary))
    }

    /// Read-only check for the confirmation step before [`Self::unenroll`].
    pub async fn can_unenroll(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<UnenrollEligibility, StorageError> {
        let eligibility =
            match enrollment::find_enrollment(&self.database, student_id, course_id).await? {
                None => UnenrollEligibility::NotEnrolled,
                Some(e) if e.is_completed => UnenrollEligibility::AllowedCompletedCourseWarning,
                Some(e) if e.payment_amount > Money::ZERO => {
                    UnenrollEligibility::AllowedPaidCourseWarning
                }
                Some(_) => UnenrollEligibility::Allowed,
            };
        Ok(eligibility)
    }

    pub async fn is_enrolled(&self, student_id: i64, course_id: i64) -> Result<bool, StorageError> {
        Ok(enrollment::enrollment_exists(&self.database, student_id, course_id).await?)
    }

    pub async fn get_enrollment(
        &self,
        student_id: i64,
        course_id: i64,
    ) -> Result<Option<Enrollment>, StorageError> {
        Ok(enrollment::find_enrollment(&self.database, student_id, course_id).await?)
    }

    /// The student's courses, most recent enrollment first.
    pub async fn list_enrollments(
        &self,
        student_id: i64,
    ) -> Result<Vec<StudentCourse>, StorageError> {
        Ok(enrollment::list_student_courses(&self.database, student_id).await?)
    }

    /// Courses whose cached counter disagrees with their enrollment rows.
    pub async fn counter_drift(&self) -> Result<Vec<CounterDrift>, StorageError> {
        Ok(course::counter_drift(&self.database).await?)
    }

    /// Rewrite every drifted counter to the live row count, in one
    /// transaction. Returns what was fixed.
    pub async fn reconcile_counters(&self) -> Result<Vec<CounterDrift>, StorageError> {
        let mut tx = self.database.begin().await?;
        let drifted = course::counter_drift(&mut *tx).await?;
        for drift in &drifted {
            warn!(
                course_id = drift.course_id,
                "reconciling enrollment counter {} -> {}",
                drift.cached,
                drift.actual
            );
            course::set_enrollment_count(&mut *tx, drift.course_id, drift.actual).await?;
        }
        tx.commit().await?;
        Ok(drifted)
    }

    /// Run the transaction body under the deadline, then commit what it hands
    /// back. COMMIT itself is not bounded: once sent, its outcome is reported
    /// as it is, so a timeout always means nothing was written.
    async fn run_then_commit<T, E>(
        &self,
        body: impl Future<Output = Result<(Transaction<'static, Sqlite>, T), E>>,
    ) -> Result<T, E>
    where
        E: From<StorageError> + From<sqlx::Error>,
    {
        let (tx, value) = self.within_deadline(body).await?;
        tx.commit().await?;
        Ok(value)
    }

    async fn within_deadline<T, E>(
        &self,
        operation: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        match self.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, operation).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(deadline).into()),
            },
            None => operation.await,
        }
    }
}

fn validate_ids(student_id: i64, course_id: i64) -> Result<(), String> {
    if student_id <= 0 {
        return Err(format!("Invalid student id {}", student_id));
    }
    if course_id <= 0 {
        return Err(format!("Invalid course id {}", course_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlx::SqlitePool;

    use super::*;
    use crate::{
        error::ErrorKind,
        store::{
            lesson::{list_course_progress, record_lesson_completion},
            testing::{open_test_db, seed_course, seed_lessons, seed_user},
            user::Role,
        },
    };

    struct Fixture {
        pool: SqlitePool,
        ledger: EnrollmentLedger,
        student: i64,
        course: i64,
    }

    async fn course_count(pool: &SqlitePool, course_id: i64) -> i64 {
        course::enrollment_count(pool, course_id).await.unwrap()
    }

    async fn row_count(pool: &SqlitePool, course_id: i64) -> i64 {
        enrollment::count_course_enrollments(pool, course_id)
            .await
            .unwrap()
    }

    async fn assert_consistent(pool: &SqlitePool) {
        assert_eq!(course::counter_drift(pool).await.unwrap(), vec![]);
    }

    async fn fixture(db: &crate::store::testing::TestDb, price: Money) -> Fixture {
        let pool = db.database.clone();
        let instructor = seed_user(&pool, "ada", Role::Instructor).await;
        let student = seed_user(&pool, "sam", Role::Student).await;
        let course = seed_course(&pool, instructor, price).await;
        Fixture {
            ledger: EnrollmentLedger::new(pool.clone()),
            pool,
            student,
            course,
        }
    }

    #[tokio::test]
    async fn enroll_and_unenroll_paid_course() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(500)).await;
        let before = course_count(&f.pool, f.course).await;

        let enrollment = f
            .ledger
            .enroll(f.student, f.course, Money::from_units(500), "card")
            .await
            .unwrap();
        assert_eq!(enrollment.payment_amount, Money::from_units(500));
        assert_eq!(enrollment.payment_status, PaymentStatus::Completed);
        assert_eq!(enrollment.progress_percentage, 0.0);
        assert!(!enrollment.is_completed);
        assert_eq!(course_count(&f.pool, f.course).await, before + 1);
        assert!(f.ledger.is_enrolled(f.student, f.course).await.unwrap());
        assert_eq!(
            f.ledger.get_enrollment(f.student, f.course).await.unwrap(),
            Some(enrollment.clone())
        );

        let summary = f.ledger.unenroll(f.student, f.course).await.unwrap();
        assert_eq!(summary.enrollment.id, enrollment.id);
        assert!(!summary.counter_drift_detected);
        assert_eq!(course_count(&f.pool, f.course).await, before);
        assert!(!f.ledger.is_enrolled(f.student, f.course).await.unwrap());
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn second_enroll_is_rejected_without_changes() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(40)).await;
        let first = f
            .ledger
            .enroll(f.student, f.course, Money::from_units(40), "card")
            .await
            .unwrap();

        let err = f
            .ledger
            .enroll(f.student, f.course, Money::from_units(40), "card")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyEnrolled);
        assert_eq!(course_count(&f.pool, f.course).await, 1);
        assert_eq!(row_count(&f.pool, f.course).await, 1);
        assert_eq!(
            f.ledger.get_enrollment(f.student, f.course).await.unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn enroll_rejects_bad_input() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(10)).await;
        let cases = [
            (f.student, 9999, Money::from_units(10), "card", ErrorKind::CourseNotFound),
            (9999, f.course, Money::from_units(10), "card", ErrorKind::InvalidInput),
            (f.student, f.course, Money::from_cents(-1), "card", ErrorKind::InvalidInput),
            (f.student, f.course, Money::from_units(10), "  ", ErrorKind::InvalidInput),
            (0, f.course, Money::from_units(10), "card", ErrorKind::InvalidInput),
        ];
        for (student, course, amount, method, kind) in cases {
            let err = f
                .ledger
                .enroll(student, course, amount, method)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{err}");
        }
        assert_eq!(course_count(&f.pool, f.course).await, 0);
        assert_consistent(&f.pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enrolls_create_one_row() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(30)).await;
        let mut handles = Vec::new();
        for _ in 0..4 {
            let ledger = f.ledger.clone();
            let (student, course) = (f.student, f.course);
            handles.push(tokio::spawn(async move {
                ledger
                    .enroll(student, course, Money::from_units(30), "card")
                    .await
            }));
        }
        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::AlreadyEnrolled, "{e}"),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(row_count(&f.pool, f.course).await, 1);
        assert_eq!(course_count(&f.pool, f.course).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_unenrolls_remove_once() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::ZERO).await;
        f.ledger.enroll_free(f.student, f.course).await.unwrap();

        let (a, b) = tokio::join!(
            f.ledger.unenroll(f.student, f.course),
            f.ledger.unenroll(f.student, f.course)
        );
        let kinds: Vec<_> = [a, b]
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.kind()))
            .collect();
        assert_eq!(kinds, vec![ErrorKind::NotEnrolled]);
        assert_eq!(course_count(&f.pool, f.course).await, 0);
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn failure_after_insert_leaves_nothing() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(25)).await;
        f.ledger.fail_points().arm(points::AFTER_ENROLLMENT_INSERT);

        let err = f
            .ledger
            .enroll(f.student, f.course, Money::from_units(25), "card")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrollError::StorageFailure(StorageError::Injected(points::AFTER_ENROLLMENT_INSERT))
        ));
        assert!(!f.ledger.is_enrolled(f.student, f.course).await.unwrap());
        assert_eq!(course_count(&f.pool, f.course).await, 0);

        f.ledger.fail_points().disarm(points::AFTER_ENROLLMENT_INSERT);
        f.ledger
            .enroll(f.student, f.course, Money::from_units(25), "card")
            .await
            .unwrap();
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn unenroll_deletes_progress_of_that_course_only() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(10)).await;
        let instructor = seed_user(&f.pool, "bea", Role::Instructor).await;
        let other_course = seed_course(&f.pool, instructor, Money::from_units(10)).await;
        let lessons = seed_lessons(&f.pool, f.course, 3).await;
        let other_lessons = seed_lessons(&f.pool, other_course, 1).await;

        f.ledger
            .enroll(f.student, f.course, Money::from_units(10), "card")
            .await
            .unwrap();
        f.ledger
            .enroll(f.student, other_course, Money::from_units(10), "card")
            .await
            .unwrap();
        record_lesson_completion(&f.pool, f.student, lessons[0], true).await.unwrap();
        record_lesson_completion(&f.pool, f.student, lessons[1], false).await.unwrap();
        record_lesson_completion(&f.pool, f.student, other_lessons[0], true).await.unwrap();

        let summary = f.ledger.unenroll(f.student, f.course).await.unwrap();
        assert_eq!(summary.lesson_progress_removed, 2);
        assert!(list_course_progress(&f.pool, f.student, f.course).await.unwrap().is_empty());
        assert_eq!(
            list_course_progress(&f.pool, f.student, other_course).await.unwrap().len(),
            1
        );
        assert!(f.ledger.is_enrolled(f.student, other_course).await.unwrap());
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn failed_unenroll_rolls_back_every_step() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(10)).await;
        let lessons = seed_lessons(&f.pool, f.course, 2).await;
        f.ledger
            .enroll(f.student, f.course, Money::from_units(10), "card")
            .await
            .unwrap();
        for lesson in &lessons {
            record_lesson_completion(&f.pool, f.student, *lesson, true).await.unwrap();
        }

        for point in [points::AFTER_PROGRESS_DELETE, points::AFTER_ENROLLMENT_DELETE] {
            f.ledger.fail_points().arm(point);
            let err = f.ledger.unenroll(f.student, f.course).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StorageFailure);
            f.ledger.fail_points().disarm(point);

            assert!(f.ledger.is_enrolled(f.student, f.course).await.unwrap());
            assert_eq!(
                list_course_progress(&f.pool, f.student, f.course).await.unwrap().len(),
                2
            );
            assert_eq!(course_count(&f.pool, f.course).await, 1);
        }
    }

    #[tokio::test]
    async fn unenroll_without_enrollment() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(10)).await;
        let err = f.ledger.unenroll(f.student, f.course).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnrolled);
        let err = f.ledger.unenroll(f.student, 4242).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnrolled);
        let err = f.ledger.unenroll(-1, f.course).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn eligibility_warnings() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(99)).await;
        let free_course = seed_course(&f.pool, f.student, Money::ZERO).await;
        let reader = seed_user(&f.pool, "lee", Role::Student).await;

        assert_eq!(
            f.ledger.can_unenroll(f.student, f.course).await.unwrap(),
            UnenrollEligibility::NotEnrolled
        );

        let paid = f
            .ledger
            .enroll(f.student, f.course, Money::from_units(99), "card")
            .await
            .unwrap();
        let eligibility = f.ledger.can_unenroll(f.student, f.course).await.unwrap();
        assert_eq!(eligibility, UnenrollEligibility::AllowedPaidCourseWarning);
        assert!(eligibility.warning().is_some());

        f.ledger.enroll_free(reader, free_course).await.unwrap();
        assert_eq!(
            f.ledger.can_unenroll(reader, free_course).await.unwrap(),
            UnenrollEligibility::Allowed
        );

        // completion is written by the lesson workflow, outside the ledger
        sqlx::query("UPDATE enrollment SET is_completed = 1 WHERE id = ?")
            .bind(paid.id)
            .execute(&f.pool)
            .await
            .unwrap();
        assert_eq!(
            f.ledger.can_unenroll(f.student, f.course).await.unwrap(),
            UnenrollEligibility::AllowedCompletedCourseWarning
        );
        // still permitted
        f.ledger.unenroll(f.student, f.course).await.unwrap();
    }

    #[tokio::test]
    async fn free_enrollment_requires_free_course() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(15)).await;
        let err = f.ledger.enroll_free(f.student, f.course).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(course_count(&f.pool, f.course).await, 0);

        let free_course = seed_course(&f.pool, f.student, Money::ZERO).await;
        let enrollment = f.ledger.enroll_free(f.student, free_course).await.unwrap();
        assert_eq!(enrollment.payment_amount, Money::ZERO);
        assert_eq!(enrollment.payment_method, FREE_PAYMENT_METHOD);
        let activity = f.ledger.activity().list_for_user(f.student, 10).await.unwrap();
        assert_eq!(activity[0].action, "course_enrolled");
    }

    #[tokio::test]
    async fn activity_is_recorded_and_its_failure_ignored() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(12)).await;
        f.ledger
            .enroll(f.student, f.course, Money::from_units(12), "wallet")
            .await
            .unwrap();
        f.ledger.unenroll(f.student, f.course).await.unwrap();
        let actions: Vec<_> = f
            .ledger
            .activity()
            .list_for_user(f.student, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, ["course_unenrolled", "course_purchased"]);

        sqlx::query("DROP TABLE activity_log")
            .execute(&f.pool)
            .await
            .unwrap();
        f.ledger
            .enroll(f.student, f.course, Money::from_units(12), "wallet")
            .await
            .unwrap();
        assert_eq!(course_count(&f.pool, f.course).await, 1);
        f.ledger.unenroll(f.student, f.course).await.unwrap();
        assert_eq!(course_count(&f.pool, f.course).await, 0);
    }

    #[tokio::test]
    async fn payment_amount_is_a_snapshot() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(50)).await;
        f.ledger
            .enroll(f.student, f.course, Money::from_units(50), "card")
            .await
            .unwrap();
        sqlx::query("UPDATE course SET price = ? WHERE id = ?")
            .bind(Money::from_units(80))
            .bind(f.course)
            .execute(&f.pool)
            .await
            .unwrap();
        let enrollment = f.ledger.get_enrollment(f.student, f.course).await.unwrap().unwrap();
        assert_eq!(enrollment.payment_amount, Money::from_units(50));
    }

    #[tokio::test]
    async fn drifted_counter_is_floored_reported_and_reconciled() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(5)).await;
        let other = seed_user(&f.pool, "kim", Role::Student).await;
        for student in [f.student, other] {
            f.ledger
                .enroll(student, f.course, Money::from_units(5), "card")
                .await
                .unwrap();
        }
        course::set_enrollment_count(&f.pool, f.course, 0).await.unwrap();
        assert_eq!(
            f.ledger.counter_drift().await.unwrap(),
            vec![CounterDrift {
                course_id: f.course,
                cached: 0,
                actual: 2
            }]
        );

        let summary = f.ledger.unenroll(f.student, f.course).await.unwrap();
        assert!(summary.counter_drift_detected);
        assert_eq!(course_count(&f.pool, f.course).await, 0);

        let fixed = f.ledger.reconcile_counters().await.unwrap();
        assert_eq!(fixed.len(), 1);
        assert_eq!(course_count(&f.pool, f.course).await, 1);
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn deadline_expiry_rolls_back() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(7)).await;
        let ledger = f.ledger.clone().with_deadline(Duration::from_millis(200));

        // hold the write lock so the enroll waits past its deadline
        let mut blocker = f.pool.begin().await.unwrap();
        course::lock_course(&mut *blocker, f.course).await.unwrap();
        let err = ledger
            .enroll(f.student, f.course, Money::from_units(7), "card")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EnrollError::StorageFailure(StorageError::Timeout(_))
        ));
        blocker.rollback().await.unwrap();

        assert!(!ledger.is_enrolled(f.student, f.course).await.unwrap());
        assert_eq!(course_count(&f.pool, f.course).await, 0);
        ledger
            .enroll(f.student, f.course, Money::from_units(7), "card")
            .await
            .unwrap();
        assert_consistent(&f.pool).await;
    }

    #[tokio::test]
    async fn commit_is_not_cut_short_by_the_deadline() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(7)).await;
        // a zero deadline still lets an already finished body through
        let ledger = f.ledger.clone().with_deadline(Duration::ZERO);

        let mut tx = f.pool.begin().await.unwrap();
        course::increment_enrollment_count(&mut *tx, f.course).await.unwrap();
        let body = std::future::ready(Ok::<_, EnrollError>((tx, ())));
        ledger.run_then_commit(body).await.unwrap();
        assert_eq!(course_count(&f.pool, f.course).await, 1);
    }

    #[tokio::test]
    async fn payment_must_match_course_price() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(500)).await;
        for amount in [Money::from_cents(1), Money::ZERO, Money::from_units(501)] {
            let err = f
                .ledger
                .enroll(f.student, f.course, amount, "card")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "amount {}", amount);
        }
        assert!(!f.ledger.is_enrolled(f.student, f.course).await.unwrap());
        assert_eq!(course_count(&f.pool, f.course).await, 0);
        let activity = f.ledger.activity().list_for_user(f.student, 10).await.unwrap();
        assert!(activity.is_empty());

        f.ledger
            .enroll(f.student, f.course, Money::from_units(500), "card")
            .await
            .unwrap();
        assert_eq!(
            f.ledger.can_unenroll(f.student, f.course).await.unwrap(),
            UnenrollEligibility::AllowedPaidCourseWarning
        );
    }

    #[tokio::test]
    async fn counters_match_rows_after_mixed_operations() {
        let db = open_test_db().await;
        let f = fixture(&db, Money::from_units(3)).await;
        let mut students = vec![f.student];
        for name in ["kim", "lee", "max"] {
            students.push(seed_user(&f.pool, name, Role::Student).await);
        }
        for student in &students {
            f.ledger
                .enroll(*student, f.course, Money::from_units(3), "card")
                .await
                .unwrap();
        }
        f.ledger.unenroll(students[1], f.course).await.unwrap();
        let _ = f.ledger.unenroll(students[1], f.course).await;
        let _ = f
            .ledger
            .enroll(students[0], f.course, Money::from_units(3), "card")
            .await;
        f.ledger
            .enroll(students[1], f.course, Money::from_units(3), "card")
            .await
            .unwrap();
        f.ledger.unenroll(students[3], f.course).await.unwrap();

        assert_eq!(row_count(&f.pool, f.course).await, 3);
        assert_eq!(course_count(&f.pool, f.course).await, 3);
        let listed = f.ledger.list_enrollments(students[1]).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].course_title, "Ownership in Depth");
        assert_consistent(&f.pool).await;
    }
}
