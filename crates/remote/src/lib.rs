//! Remote executor client
//!
//! This crate talks to the external worker host that actually runs remote
//! jobs. Job scripts travel inside the start request as a tar.gz multipart
//! part; status and stop are plain JSON endpoints on the job URI returned
//! by start.

pub mod client;

pub use client::HttpRemoteJobExecutor;
