// ABOUTME: Control server for trishul - HTTP API plus the live push channel
// ABOUTME: Thin surface over trishul-core's control plane, relay, and broadcast registry

pub mod auth;
pub mod routes;
pub mod server;
pub mod ws;

pub use auth::{SessionValidator, StaticSessions};
pub use server::{run, AppState, Server};
