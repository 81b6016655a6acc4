pub mod generator;

pub use generator::{ChatMessage, ChatReplyGenerator};
