pub mod access;
pub mod activity;
pub mod api;
pub mod config;
pub mod error;
pub mod fail_point;
pub mod ledger;
pub mod money;
pub mod progress;
pub mod store;
pub mod utils;

pub use error::{EnrollError, ErrorKind, StorageError, UnenrollError};
pub use ledger::{EnrollmentLedger, UnenrollEligibility, UnenrollSummary};
pub use money::Money;
