pub mod builtin_providers;
pub mod chat_stream;
pub mod config;
pub mod context;
pub mod conversation;
pub mod message;
pub mod persistence;
pub mod providers;
pub mod store;
pub mod usage;
