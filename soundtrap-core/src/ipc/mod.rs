//! Serializable event types for hosts (UI bridges, log shippers, CLIs).
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` with camelCase
//! field names.

pub mod events;
