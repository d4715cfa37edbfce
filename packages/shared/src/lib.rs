//! Utilities shared by the Heya packages.

pub mod logger;
pub mod time;
