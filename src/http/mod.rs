//! HTTP layer: transport, request types, and the middleware-aware client

mod client;
mod transport;

pub(crate) use client::{ApiClient, Middleware};
pub(crate) use transport::{ApiRequest, Method, UreqTransport};
#[cfg(test)]
pub(crate) use transport::{ApiResponse, Transport};
