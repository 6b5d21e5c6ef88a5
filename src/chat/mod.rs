pub mod aggregator;
pub mod assistant;
pub mod preferences;
pub mod prompts;
pub mod session;
pub mod sources;
