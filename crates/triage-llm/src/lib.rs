pub mod converter;
pub mod offline;
pub mod openai;
pub mod reliable;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use offline::KeywordProvider;
pub use openai::{OpenAiConfig, OpenAiProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
