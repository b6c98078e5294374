//! Data model for the naming pipeline
//!
//! All pipeline payloads are serde structs with explicit optional fields.
//! Validation happens at deserialization boundaries: a malformed model reply
//! fails `serde_json::from_value` with a field path, which the stage wrappers
//! surface as a schema error.

pub mod candidate;
pub mod events;
pub mod name_card;
pub mod profile;
pub mod result;
pub mod sanity_check;
pub mod selection;
