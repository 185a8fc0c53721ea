// Fleet Control Library - coordination layer for remote coding agents
// Credential routing, fleet orchestration, PR triage and agent handoff

pub mod config;
pub mod fleet;
pub mod github;
pub mod handoff;
pub mod llm;
pub mod polling;
pub mod single_flight;
pub mod telemetry;
pub mod tokens;
pub mod triage;

// Re-export key types for easy access
pub use config::FleetControlConfig;
pub use fleet::{AgentService, FleetCoordinator, FleetError, HttpAgentService};
pub use github::{CodeHost, GitHubError, OctocrabHost};
pub use handoff::{FileHandoffStore, Git2Workspace, HandoffCoordinator, HandoffError};
pub use llm::{ModelPool, ProviderRegistry, StructuredGenerator};
pub use polling::{poll_until, PollError, PollSchedule, Probe};
pub use single_flight::SingleFlight;
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry};
pub use tokens::{Credential, RepoRef, TokenError, TokenRouter};
pub use triage::{Analyzer, TriageEngine, TriageError, TriageResult};
