//! The Concerto engine: the queue-and-dispatch core that advances runs
//! through the fixed plan → implement → review → test → pr pipeline.
//!
//! The engine owns the worker loop, the run lease discipline, the handoff
//! document on disk, and the artifact directory. The two collaborators it
//! cannot provide itself (the LLM-backed phase executors and the git
//! workspace) are reached through the [`agents::PhaseAgents`] and
//! [`workspace::WorkspaceOps`] seams and can be swapped without touching
//! the engine.

pub mod agents;
pub mod artifacts;
pub mod cancel;
pub mod config;
pub mod error;
pub mod handoff_io;
pub mod phases;
pub mod status;
pub mod submit;
pub mod worker;
pub mod workspace;

pub use cancel::cancel_run;
pub use config::Config;
pub use error::EngineError;
pub use submit::SubmitParams;
pub use submit::Submission;
pub use submit::submit;
pub use worker::Worker;
pub use worker::WorkerTick;
