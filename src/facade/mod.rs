//! Client-facing orchestration surface

pub mod orchestrator;
pub mod responses;
pub mod routes;

pub use orchestrator::{ContestOrchestrator, OrchestratorDeps, OrchestratorSettings};
pub use responses::{ApiResponse, ContestListResponse, ErrorCode, PrizeBreakupResponse, RoomView};
pub use routes::{contest_routes, ContestRoutesState};
