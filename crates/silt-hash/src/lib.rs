//! Object identity for the silt version control system.
//!
//! This crate provides the `ObjectId` type — the 160-bit content identifier
//! every other silt crate speaks in — together with its hex codec.

mod error;
pub mod hex;
mod oid;

pub use error::HashError;
pub use oid::ObjectId;
