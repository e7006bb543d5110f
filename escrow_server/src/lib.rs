//! # Escrow server
//!
//! The HTTP face of the escrow engine. It is responsible for:
//! * taking wallet and booking requests from users (identified by the upstream auth gateway) and handing them to the
//!   engine;
//! * receiving the payment provider's webhooks, checking their signature and reconciling them with the ledger;
//! * running the announcement expiry sweep on a timer;
//! * forwarding notifications to the chat/notification collaborator.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: returns a 200 OK response.
//! * `/api/...`: wallet and booking routes for authenticated users. See [routes].
//! * `/webhooks/provider`: the payment provider's webhook.
//! * `/internal/...`: catalog updates and operator tools, restricted by IP.

pub mod announcement_sweeper;
pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod integrations;
pub mod internal_routes;
pub mod middleware;
pub mod notifications;
pub mod routes;
pub mod server;
pub mod webhook_routes;

#[cfg(test)]
mod endpoint_tests;
