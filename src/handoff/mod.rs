//! Station-to-station handoff of in-progress work between agents.

pub mod coordinator;
pub mod state_machine;
pub mod store;
pub mod types;
pub mod workspace;

pub use coordinator::{
    contains_marker, successor_prompt, validate_branch_name, HandoffCoordinator, HandoffError,
};
pub use state_machine::{HandoffEvent, HandoffFlow};
pub use store::{FileHandoffStore, HandoffStore, MemoryHandoffStore, StoreError};
pub use types::{
    HandoffContext, HandoffOptions, HandoffOutcome, HandoffPhase, TakeoverOptions, TakeoverReport,
};
pub use workspace::{Git2Workspace, Workspace, WorkspaceError};
