//! Service layer for the contest service
//!
//! This module contains the application state, component wiring and
//! background task management for the production service.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceContext, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
