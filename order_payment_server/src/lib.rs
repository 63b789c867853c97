//! # Order payment gateway server
//! The HTTP surface of the order payment engine. It is responsible for:
//! * Creating orders and opening checkout sessions with the configured payment providers.
//! * Receiving buyers returning from checkout and provider webhooks, and settling payments from the provider's
//!   authoritative status.
//! * Periodically reconciling payments that have been pending for too long.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `GET /health`
//! * `POST /orders`, `GET /orders/{order_id}`, `PATCH /orders/{order_id}/status` (admin)
//! * `POST /payments`, `GET /payments/{payment_id}`, `POST /payments/{payment_id}/cancel`,
//!   `POST /payments/{payment_id}/refund` (admin), `GET /payments/{payment_id}/events`
//! * `GET /payments/return?provider=...`, `POST /payments/webhook/{provider}`
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod event_hooks;
pub mod helpers;
pub mod reconciliation_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
