//! CLI command implementations.

pub mod check;
pub mod classes;
pub mod common;
pub mod run;
