//! Parallel request aggregator for a remote JSON API.
//!
//! # Overview
//! Callers register typed requests on a [`Query`], then call
//! [`Query::execute_all`] once. Every request is sent concurrently through a
//! [`Transport`], each response is decoded into its declared type by the
//! [`ResponseRouter`], and the matching handler runs. `execute_all` returns
//! after every operation has succeeded or failed; failures are reported
//! together and never stop unrelated operations.
//!
//! # Design
//! - Requests and responses are plain data (`HttpRequest` / `HttpResponse`);
//!   the network lives behind the `Transport` trait. `UreqTransport` is the
//!   bundled implementation, with one-time bearer credential priming.
//! - The handler registry is owned by one `Query`. There is no global state.
//! - With a [`BatchConfig`], operations are packed into provider batch
//!   envelopes of at most 20 sub-requests and the replies are demultiplexed
//!   back to their operations by sequence id.
//! - [`Query::populate_structured`] and [`Query::populate_by_name`] build the
//!   two common result shapes on top of `execute_all`.

pub mod assemble;
pub mod batch;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod http;
pub mod query;
pub mod router;
pub mod transport;
pub mod types;

pub use assemble::Fields;
pub use batch::BatchPlanner;
pub use client::ApiClient;
pub use codec::{Codec, JsonCodec};
pub use config::{BatchConfig, QueryConfig, DEFAULT_MAX_GROUP_SIZE};
pub use error::{
    CodecError, ConfigError, ErrorClass, ExecuteError, ExecuteSummary, OperationFailure, QueryError,
    TransportError,
};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::Query;
pub use router::{HandlerRegistry, Outcome, ResponseRouter};
pub use transport::{CredentialProvider, StaticToken, Transport, UreqTransport};
