//! Taskpush admin API.
//!
//! Endpoints:
//! - GET  /health: Liveness probe
//! - POST /api/users: Create a user (admin only)
//! - GET  /api/users/{uid}/report: Role and task summary of a user (admin only)

pub mod middleware;
pub mod routes;
pub mod state;
