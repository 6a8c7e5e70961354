//! Connection pool contract for the outbound connection layer
//!
//! Defines the `ConnectionPool` trait every protocol-specific pool satisfies
//! (HTTP/1.1, HTTP/2, HTTP/3, or a mix negotiated over ALPN), together with the
//! callback and cancellation types exchanged when a stream is requested.
//!
//! Everything here is event-loop local: handles are `Rc`, pools use interior
//! mutability, and nothing is `Send`. A pool delivers the outcome of a stream
//! request later, from the event loop, by consuming the boxed `PoolCallbacks`
//! it was given, so a well-typed pool cannot report twice.

mod host;
mod protocol;
mod stream;

pub use host::{
    ConnectionOptions, ConnectivityState, HostDescription, HostHandle, ResourcePriority,
};
pub use protocol::{Protocol, UnknownProtocol};
pub use stream::{RequestEncoder, ResponseDecoder, ResponseDecoderHandle, StreamInfo};

use serde::Deserialize;

/// Why a pool could not produce a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolFailureReason {
    /// Too many pending streams; the pool refused to queue another.
    Overflow,
    /// The local side failed to set up the connection (socket, TLS, QUIC handshake).
    LocalConnectionFailure,
    /// The remote side reset or refused the connection.
    RemoteConnectionFailure,
    /// The connection attempt timed out.
    Timeout,
}

impl PoolFailureReason {
    /// Label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PoolFailureReason::Overflow => "overflow",
            PoolFailureReason::LocalConnectionFailure => "local_connection_failure",
            PoolFailureReason::RemoteConnectionFailure => "remote_connection_failure",
            PoolFailureReason::Timeout => "timeout",
        }
    }
}

/// How aggressively a pool should clean up after a cancelled stream request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Leave any connection that was being set up for the request alone.
    #[default]
    Default,
    /// Close connections that are now in excess of pending demand.
    CloseExcess,
}

/// Receiver of the single outcome of a stream request.
///
/// Both methods take `self: Box<Self>`: delivering an outcome consumes the
/// callbacks.
pub trait PoolCallbacks {
    /// The stream could not be created.
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        transport_failure_reason: &str,
        host: HostHandle,
    );

    /// The stream is ready; ownership of the encoder moves to the callee.
    fn on_pool_ready(
        self: Box<Self>,
        encoder: Box<dyn RequestEncoder>,
        host: HostHandle,
        info: &StreamInfo,
        protocol: Option<Protocol>,
    );
}

/// Handle to abort one in-flight stream request.
///
/// Once `cancel` returns, the pool will not invoke the request's callbacks.
pub trait Cancellable {
    fn cancel(self: Box<Self>, policy: CancelPolicy);
}

/// Invoked once, when a pool has finished draining its connections.
pub type DrainedCallback = Box<dyn FnOnce()>;

/// A pool of upstream connections to a single host.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// `Cell`/`RefCell` and must tolerate re-entrant calls made from inside the
/// callbacks they invoke.
pub trait ConnectionPool {
    /// Whether the pool holds any connection, pending or established.
    fn has_active_connections(&self) -> bool;

    /// Request a new stream.
    ///
    /// Returns a handle to cancel the request, or `None` when the outcome was
    /// already delivered through `callbacks` before this call returned.
    fn new_stream(
        &self,
        decoder: ResponseDecoderHandle,
        callbacks: Box<dyn PoolCallbacks>,
    ) -> Option<Box<dyn Cancellable>>;

    /// Register a callback for when the pool has fully drained.
    fn add_drained_callback(&self, callback: DrainedCallback);

    /// Gracefully close idle connections and stop reusing busy ones. In-flight
    /// streams are left to finish.
    fn drain_connections(&self);

    /// The upstream host this pool connects to.
    fn host(&self) -> HostHandle;

    /// Opportunistically open connections ahead of demand. Returns whether a
    /// connection was started.
    fn maybe_preconnect(&self, ratio: f32) -> bool;
}
