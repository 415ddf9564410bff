#![forbid(unsafe_code)]
//! tabflow-mem: memory accounting for one query.
//!
//! All buffer growth in the engine flows through an [`Allocator`] so the
//! per-query limit is enforced in one place. Accounting is lock-free; the
//! allocator is the only state operators share with each other.

pub mod allocator;
pub mod error;
pub mod guard;
pub mod tracking;

pub use allocator::Allocator;
pub use error::{Error, Result};
pub use guard::Reservation;
pub use tracking::PeakTracker;
