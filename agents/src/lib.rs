//! OpenAI-backed phase executors.
//!
//! This crate is one implementation of the engine's
//! [`concerto_core::agents::PhaseAgents`] seam: planner, implementor, and
//! reviewer are chat-completion calls that must answer with a single JSON
//! artifact, and the tester runs the planned test command locally. The
//! engine itself has no knowledge of any of this; swap the crate out and
//! the pipeline keeps running.

mod openai;
mod shell_gate;
mod tester;

pub use openai::OpenAiAgents;
pub use openai::OpenAiConfig;
pub use openai::OpenAiSetupError;
