//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_sweep() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::as_user(server.base_url.clone(), &server.profiles.admin.id);
//!
//!     let response = client.run_activity_sweep().await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

#![allow(dead_code)]

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::TestClient;
pub use constants::*;
pub use fixtures::{add_lesson, add_student, days_from, SeededProfiles};
pub use server::TestServer;
