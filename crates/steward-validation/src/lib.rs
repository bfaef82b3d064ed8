//! Steward validators
//!
//! Pure, synchronous checks run before any store access:
//! - [`rules`]: property presence and name/description shape
//! - [`connection`]: per-kind protocol and release-state policy plus
//!   authentication identifier requirements
//! - [`migration`]: the static protocol migration table and the
//!   migrating-connection checks built on it
//!
//! Every validator reports the first failing check and stops.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod connection;
pub mod migration;
pub mod rules;

pub use connection::{ConnectionValidator, KindPolicy};
pub use migration::{MigrationTable, MigrationValidator};
pub use rules::{
    validate_description, validate_name, EntityRuleValidator, MAX_DESCRIPTION_LENGTH,
    MAX_NAME_LENGTH,
};
