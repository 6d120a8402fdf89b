pub mod chain;
pub mod message;
pub mod recognizer;
pub mod transaction;
