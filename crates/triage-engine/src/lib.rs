//! Referral triage: prompt construction, the model exchange with its tool
//! callbacks, response parsing and the urgency decision.

pub mod analyzer;
pub mod context;
pub mod error;
pub mod parser;
pub mod prompt;
pub mod runner;
pub mod tools;
pub mod urgency;

pub use analyzer::TriageAnalyzer;
pub use error::EngineError;
pub use parser::{MarkerResponseParser, ResponseParser};
pub use runner::{Exchange, ExchangeRunner};
pub use tools::ToolExecutor;
pub use urgency::{decide_urgency, UrgencyDecision};
