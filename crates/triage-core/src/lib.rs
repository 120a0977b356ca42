//! Shared data model for the referral triage service.
//!
//! Everything that crosses a crate boundary lives here: the client rule
//! model, tool descriptors and payloads, the parsed/final triage artifacts,
//! and the provider-facing LLM types.

pub mod context;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod rules;
pub mod stream;
pub mod tools;
pub mod triage;
