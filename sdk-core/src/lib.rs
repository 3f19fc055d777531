#![deny(
    asm_sub_register,
    deprecated,
    missing_abi,
    unsafe_code,
    unused_macros,
    unused_must_use,
    unused_unsafe
)]
#![deny(clippy::from_over_into, clippy::needless_question_mark)]
#![cfg_attr(
    not(debug_assertions),
    deny(unused_imports, unused_mut, unused_variables,)
)]

//! Transport, authorization and chunked I/O runtime shared by higher level
//! service clients.

pub mod cache;
pub mod connector;
pub mod environment;
pub mod error;
pub mod feedback;
pub mod headers;
pub mod io;
pub mod job;
pub mod oauth;
pub mod retry;
pub mod transport;

pub use cache::Cache;
pub use connector::ApiConnector;
pub use environment::Environment;
pub use error::{AuthFlowError, ChunkedIoError, JobError, ServiceError, TransportError};
pub use feedback::{Feedback, NoFeedback, PartialFeedback};
pub use headers::HeaderDict;
pub use job::{JobClient, JobProgress, JobStatus};
pub use oauth::{AccessToken, Authorizer};
pub use retry::{BackoffMethod, Retry, RetryError};
pub use transport::Transport;
