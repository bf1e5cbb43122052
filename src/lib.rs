pub mod api;
pub mod collaborators;
pub mod collector;
pub mod config;
pub mod data_models;
pub mod error;
pub mod fan_out;
pub mod gemini;
pub mod keywords;
pub mod notion;
pub mod orchestrator;
pub mod progress;
pub mod selector;
pub mod structured;
pub mod synthesizer;

pub use config::{AppConfig, SearchConfig};
pub use error::{CollaboratorError, PipelineError};
pub use orchestrator::{Collaborators, Orchestrator};
