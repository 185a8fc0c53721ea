//! Remote agent fleet: the service client, the coordinator on top of it and
//! the shared agent types.

pub mod client;
pub mod coordinator;
pub mod http;
pub mod types;

pub use client::{AgentService, AgentServiceError};
pub use coordinator::{FleetCoordinator, FleetError};
pub use http::HttpAgentService;
pub use types::{
    Agent, AgentSource, AgentStatus, AgentTarget, Conversation, ConversationMessage,
    DiamondOutcome, DiamondPlan, FleetResults, MessageKind, Repository, SpawnSpec,
};
