//! HTTP request pipeline.
//!
//! [`RequestPipeline`] turns a [`RequestDescriptor`] into an
//! [`Envelope`](resilink_proto::Envelope): bearer auth, per-attempt
//! timeout, linear retry of transient failures, and write-through caching
//! of `GET` responses. [`ApiClient`] layers endpoint helpers on top.

mod client;
mod pipeline;
mod transport;

pub use client::{ApiClient, RequestOptions};
pub use pipeline::{
    AuthMode, DEFAULT_TIMEOUT, RequestDescriptor, RequestFailure, RequestPipeline, RetryPolicy,
};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
