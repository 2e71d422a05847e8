//! Generation provider implementations for reasonflow.
//!
//! All providers implement the `reasonflow_core::Provider` trait.
//! The router builds them from configuration, each behind a retrying wrapper.

pub mod openai_compat;
pub mod retry;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryProvider};
pub use router::{ProviderRouter, build_from_config};
