//! Crate-level tests shared across modules

pub mod helpers;
