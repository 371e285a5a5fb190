//! Data models for the Secret Santa backend.
//!
//! Serialized in camelCase to match the web client's JSON contract.

mod group;
mod matching;
mod member;
mod notification;

pub use group::*;
pub use matching::*;
pub use member::*;
pub use notification::*;
