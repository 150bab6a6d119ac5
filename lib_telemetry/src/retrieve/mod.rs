//! # Data Retrieval Module
//!
//! Outbound HTTP clients.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: A generic HTTP `ApiClient` built on `reqwest` and
//!   `reqwest-middleware`, featuring automatic retries with exponential
//!   backoff.
//! - **`narrative`**: The AI analysis collaborator. It renders the latest
//!   readings into a prompt, sends it through `ApiClient` and always answers
//!   with text, falling back to a fixed message on any failure.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// Generic HTTP API client with retry middleware for resilient network requests.
pub mod ky_http;
/// Generative-model analysis of the latest readings.
pub mod narrative;

pub use ky_http::{ApiClient, ApiError, ApiResponse};
pub use narrative::{build_prompt, GeminiNarrator, NarrativeOptions, Narrator, FALLBACK_ANALYSIS};
