//! Named failure injection points inside ledger transactions.
//!
//! An armed point makes the transaction fail with
//! [`StorageError::Injected`] at that exact step, so tests can check that
//! nothing written before it survives the rollback. Points are armed per
//! ledger instance; clones share the same set.

use std::sync::Arc;

use dashmap::DashSet;
use tracing::warn;

use crate::error::StorageError;

/// All defined fail point names
pub mod points {
    pub const AFTER_ENROLLMENT_INSERT: &str = "after_enrollment_insert";
    pub const AFTER_PROGRESS_DELETE: &str = "after_progress_delete";
    pub const AFTER_ENROLLMENT_DELETE: &str = "after_enrollment_delete";
}

#[derive(Debug, Clone, Default)]
pub struct FailPoints {
    armed: Arc<DashSet<&'static str>>,
}

impl FailPoints {
    pub fn arm(&self, name: &'static str) {
        self.armed.insert(name);
    }

    pub fn disarm(&self, name: &'static str) {
        self.armed.remove(name);
    }

    #[inline]
    pub fn check(&self, name: &'static str) -> Result<(), StorageError> {
        if self.armed.is_empty() || !self.armed.contains(name) {
            return Ok(());
        }
        warn!("fail point {} triggered", name);
        Err(StorageError::Injected(name))
    }
}
