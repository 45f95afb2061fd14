//! Test utilities for the HTTP storage backends.
//!
//! This module provides a routed HTTP responder that records every request.

pub mod mock_http;

#[allow(unused_imports)]
pub use mock_http::{MockServer, Recorded, Reply};
