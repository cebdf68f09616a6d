//! Domain layer
//!
//! Core types and port traits shared by the reconciler and its adapters.

pub mod ports;
