//! Network layer of the Tether offline stack.
//!
//! This crate provides:
//! - Connectivity tracking with a cached, probe-backed state
//! - Pure retry-policy classification and exponential backoff
//! - The transport and session contracts with external collaborators
//! - The retrying request executor that ties them together

pub mod classify;
pub mod connectivity;
pub mod executor;
pub mod http;
pub mod session;
pub mod transport;

pub use classify::{classify, decide, BackoffPolicy, ErrorClass, RetryDecision};
pub use connectivity::{
    ConnectivityMonitor, ConnectivityState, ManualProbe, ProbeSample, ReachabilityProbe,
};
pub use executor::RequestExecutor;
pub use http::{HttpProbe, HttpTransport};
pub use session::{Session, SessionProvider};
pub use transport::{Method, RequestDescriptor, Response, Transport};
