//! Shared utility modules used across Tessera components.

pub mod concurrent_map;
pub mod id_source;
