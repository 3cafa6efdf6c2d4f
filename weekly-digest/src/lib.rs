pub mod app;
pub mod audit;
pub mod bot;
pub mod channels;
pub mod config;
pub mod dedup;
pub mod delivery;
pub mod fetcher;
pub mod generator;
pub mod jobs;
pub mod orchestrator;
pub mod parser;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod types;
pub mod version;

pub use app::App;
pub use config::AppConfig;
pub use delivery::{split_chunks, DeliveryFanout, DeliveryReport};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunStatus, RunSummary, Trigger};
pub use store::Store;
pub use types::*;
