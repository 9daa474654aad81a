//! Confab is a multi-provider chat client core with a small command-line front end.
//!
//! The crate is organized around a few collaborating layers:
//! - [`providers`] speaks the OpenAI, Anthropic and Gemini streaming protocols
//!   behind one [`providers::ProviderAdapter`] trait.
//! - [`core`] owns conversations: the completion orchestrator, the
//!   conversation store with its metadata index and LRU cache, persistence,
//!   configuration and usage pricing.
//! - [`api`] defines the wire payloads used by the adapters.
//! - [`cli`] is the command-line surface over [`core::store::ConversationStore`].
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod providers;
pub mod utils;
