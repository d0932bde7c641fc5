//! Shoreline Migration CLI support library
//!
//! The binary (main.rs) uses this library; the pieces that do not need a
//! database live here so they can be tested directly.

pub mod scaffold;
pub mod settings;
