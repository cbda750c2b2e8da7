//! Fleet backend transport

mod client;

pub use client::{BackendClient, UploadResponse};
