//! Hand-driven pools and recording callbacks for grid tests

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use conn_pool::{
    CancelPolicy, Cancellable, ConnectionPool, DrainedCallback, HostDescription, HostHandle,
    PoolCallbacks, PoolFailureReason, Protocol, RequestEncoder, ResponseDecoder,
    ResponseDecoderHandle, StreamInfo,
};

use crate::tier::{Tier, TierContext, TierFactory};

pub(crate) fn test_host() -> HostHandle {
    Arc::new(HostDescription::new(
        "upstream.test",
        "127.0.0.1:9000".parse().unwrap(),
    ))
}

pub(crate) fn decoder() -> ResponseDecoderHandle {
    Rc::new(NullDecoder)
}

struct NullDecoder;

impl ResponseDecoder for NullDecoder {
    fn decode_headers(&self, _status: u16, _end_stream: bool) {}

    fn decode_data(&self, _data: &[u8], _end_stream: bool) {}
}

pub(crate) struct TestEncoder {
    pub protocol: Protocol,
}

impl RequestEncoder for TestEncoder {
    fn stream_id(&self) -> u64 {
        1
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}

/// What the caller of `new_stream` observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Observed {
    Ready(Option<Protocol>),
    Failure(PoolFailureReason, String),
}

/// Caller-side callbacks that record every outcome delivered to them.
#[derive(Default)]
pub(crate) struct Recorder {
    outcomes: RefCell<Vec<Observed>>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn callbacks(self: &Rc<Self>) -> Box<dyn PoolCallbacks> {
        Box::new(RecordingCallbacks {
            recorder: Rc::clone(self),
        })
    }

    pub fn outcomes(&self) -> Vec<Observed> {
        self.outcomes.borrow().clone()
    }

    pub fn ready_count(&self) -> usize {
        self.outcomes
            .borrow()
            .iter()
            .filter(|o| matches!(o, Observed::Ready(_)))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .borrow()
            .iter()
            .filter(|o| matches!(o, Observed::Failure(..)))
            .count()
    }
}

struct RecordingCallbacks {
    recorder: Rc<Recorder>,
}

impl PoolCallbacks for RecordingCallbacks {
    fn on_pool_failure(
        self: Box<Self>,
        reason: PoolFailureReason,
        transport_failure_reason: &str,
        _host: HostHandle,
    ) {
        self.recorder
            .outcomes
            .borrow_mut()
            .push(Observed::Failure(reason, transport_failure_reason.to_string()));
    }

    fn on_pool_ready(
        self: Box<Self>,
        _encoder: Box<dyn RequestEncoder>,
        _host: HostHandle,
        _info: &StreamInfo,
        protocol: Option<Protocol>,
    ) {
        self.recorder
            .outcomes
            .borrow_mut()
            .push(Observed::Ready(protocol));
    }
}

/// Stream requests a `MockPool` has accepted, shared with its cancel handles.
#[derive(Default)]
pub(crate) struct Streams {
    pending: RefCell<Vec<Option<Box<dyn PoolCallbacks>>>>,
    cancels: RefCell<Vec<CancelPolicy>>,
}

/// A pool whose stream outcomes are driven by the test.
pub(crate) struct MockPool {
    pub tier: Tier,
    host: HostHandle,
    streams: Rc<Streams>,
    drained: RefCell<Vec<DrainedCallback>>,
    drain_requests: Cell<usize>,
    active: Cell<bool>,
    /// When set, the next `new_stream` fails before returning.
    fail_inline: Cell<bool>,
    /// Fire registered drained callbacks when the pool is dropped.
    drain_on_drop: bool,
}

impl MockPool {
    pub fn new(tier: Tier, host: HostHandle, drain_on_drop: bool) -> Self {
        Self {
            tier,
            host,
            streams: Rc::new(Streams::default()),
            drained: RefCell::new(Vec::new()),
            drain_requests: Cell::new(0),
            active: Cell::new(false),
            fail_inline: Cell::new(false),
            drain_on_drop,
        }
    }

    /// Number of `new_stream` calls so far.
    pub fn stream_count(&self) -> usize {
        self.streams.pending.borrow().len()
    }

    /// Cancel policies received, in order.
    pub fn cancels(&self) -> Vec<CancelPolicy> {
        self.streams.cancels.borrow().clone()
    }

    pub fn drain_requests(&self) -> usize {
        self.drain_requests.get()
    }

    pub fn drained_subscriptions(&self) -> usize {
        self.drained.borrow().len()
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    pub fn fail_next_inline(&self) {
        self.fail_inline.set(true);
    }

    fn take(&self, stream: usize) -> Box<dyn PoolCallbacks> {
        self.streams.pending.borrow_mut()[stream]
            .take()
            .expect("stream already completed or cancelled")
    }

    /// Fail the `stream`-th request made to this pool.
    pub fn fail(&self, stream: usize, reason: PoolFailureReason, detail: &str) {
        let callbacks = self.take(stream);
        callbacks.on_pool_failure(reason, detail, Arc::clone(&self.host));
    }

    /// Complete the `stream`-th request made to this pool.
    pub fn ready(&self, stream: usize, protocol: Protocol) {
        let callbacks = self.take(stream);
        let info = StreamInfo {
            connection_id: stream as u64,
            connect_duration: Duration::from_millis(3),
        };
        callbacks.on_pool_ready(
            Box::new(TestEncoder { protocol }),
            Arc::clone(&self.host),
            &info,
            Some(protocol),
        );
    }

    /// Fire the `index`-th drained callback registered on this pool.
    pub fn fire_drained(&self, index: usize) {
        let callback = self.drained.borrow_mut().remove(index);
        callback();
    }
}

impl ConnectionPool for MockPool {
    fn has_active_connections(&self) -> bool {
        self.active.get()
    }

    fn new_stream(
        &self,
        _decoder: ResponseDecoderHandle,
        callbacks: Box<dyn PoolCallbacks>,
    ) -> Option<Box<dyn Cancellable>> {
        if self.fail_inline.replace(false) {
            self.streams.pending.borrow_mut().push(None);
            callbacks.on_pool_failure(
                PoolFailureReason::LocalConnectionFailure,
                "inline failure",
                Arc::clone(&self.host),
            );
            return None;
        }
        let mut pending = self.streams.pending.borrow_mut();
        pending.push(Some(callbacks));
        Some(Box::new(MockCancel {
            streams: Rc::clone(&self.streams),
            index: pending.len() - 1,
        }))
    }

    fn add_drained_callback(&self, callback: DrainedCallback) {
        self.drained.borrow_mut().push(callback);
    }

    fn drain_connections(&self) {
        self.drain_requests.set(self.drain_requests.get() + 1);
    }

    fn host(&self) -> HostHandle {
        Arc::clone(&self.host)
    }

    fn maybe_preconnect(&self, _ratio: f32) -> bool {
        false
    }
}

impl Drop for MockPool {
    fn drop(&mut self) {
        if self.drain_on_drop {
            for callback in self.drained.take() {
                callback();
            }
        }
    }
}

struct MockCancel {
    streams: Rc<Streams>,
    index: usize,
}

impl Cancellable for MockCancel {
    fn cancel(self: Box<Self>, policy: CancelPolicy) {
        self.streams.pending.borrow_mut()[self.index] = None;
        self.streams.cancels.borrow_mut().push(policy);
    }
}

/// Creates `MockPool`s and keeps a handle to each for the test.
#[derive(Default)]
pub(crate) struct MockFactory {
    pools: RefCell<Vec<Rc<MockPool>>>,
    weak_pools: RefCell<Vec<std::rc::Weak<MockPool>>>,
    /// Hand out pools the grid alone owns, firing drains on drop.
    grid_owned: bool,
}

impl MockFactory {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn grid_owned() -> Rc<Self> {
        Rc::new(Self {
            grid_owned: true,
            ..Self::default()
        })
    }

    pub fn pool(&self, index: usize) -> Rc<MockPool> {
        Rc::clone(&self.pools.borrow()[index])
    }

    pub fn created(&self) -> usize {
        self.pools.borrow().len() + self.weak_pools.borrow().len()
    }

    pub fn live_weak(&self, index: usize) -> Option<Rc<MockPool>> {
        self.weak_pools.borrow()[index].upgrade()
    }
}

impl TierFactory for MockFactory {
    fn create_tier(&self, tier: Tier, ctx: &TierContext) -> Rc<dyn ConnectionPool> {
        let pool = Rc::new(MockPool::new(tier, Arc::clone(&ctx.host), self.grid_owned));
        if self.grid_owned {
            self.weak_pools.borrow_mut().push(Rc::downgrade(&pool));
        } else {
            self.pools.borrow_mut().push(Rc::clone(&pool));
        }
        pool
    }
}
