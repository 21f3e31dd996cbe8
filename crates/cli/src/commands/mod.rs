//! Subcommand implementations.
//!
//! Each command returns a serializable output struct; `main` prints it as
//! JSON on stdout.

pub mod image;
pub mod migrate;
pub mod page;
pub mod srcset;
