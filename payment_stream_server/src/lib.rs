//! # Payment status stream server
//! This crate hosts the HTTP front end for the payment status pipeline. It is responsible for:
//! Listening for payment status callbacks from the payment provider.
//! Handing each callback to the webhook ingester, which verifies it and publishes the resulting status event.
//! Serving server-sent event streams to clients that are watching a payment order.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/payment/status/{paymentOrderId}/stream`: The live status stream for a payment order.
//! * `/webhook/payment-status`: The webhook route for receiving status callbacks from the payment provider.
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod registry_monitor;
pub mod routes;
pub mod server;
pub mod webhook_routes;

#[cfg(test)]
mod endpoint_tests;
