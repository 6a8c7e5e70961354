//! Per-stream handles exchanged between a pool and its caller

use std::rc::Rc;
use std::time::Duration;

use crate::Protocol;

/// Metadata describing the upstream stream a pool just established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Identifier of the upstream connection that carries the stream.
    pub connection_id: u64,
    /// Time spent between the stream request and the stream becoming ready.
    pub connect_duration: Duration,
}

/// Encoder for the request side of an established upstream stream.
///
/// Ownership moves to the caller in `on_pool_ready`.
pub trait RequestEncoder {
    /// Stream identifier, unique within the owning connection.
    fn stream_id(&self) -> u64;

    /// Protocol the stream is actually framed in.
    fn protocol(&self) -> Protocol;
}

/// Consumer of the response side of a stream.
///
/// The same decoder is handed to every tier a request is retried on, hence the
/// shared handle.
pub trait ResponseDecoder {
    fn decode_headers(&self, status: u16, end_stream: bool);

    fn decode_data(&self, data: &[u8], end_stream: bool);
}

/// Shared handle to the caller's response consumer.
pub type ResponseDecoderHandle = Rc<dyn ResponseDecoder>;
