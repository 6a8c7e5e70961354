use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use conn_grid::{Tier, TierContext};
use conn_pool::{
    CancelPolicy, Cancellable, ConnectionPool, ConnectivityState, DrainedCallback, HostHandle,
    PoolCallbacks, PoolFailureReason, Protocol, RequestEncoder, ResponseDecoderHandle, StreamInfo,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{SimOutcome, SimTierConfig};

/// Transport failure detail reported when `connect_delay` exceeds the
/// connect timeout.
pub const CONNECT_TIMEOUT_DETAIL: &str = "simulated connect timeout";

// ---------------------------------------------------------------------------
// SimPool
// ---------------------------------------------------------------------------

/// A `ConnectionPool` that resolves every stream request on a timer.
///
/// Each `new_stream` spawns a task on the current `LocalSet` that sleeps for
/// the tier's `connect_delay` and then delivers the configured outcome. A
/// successful stream keeps its connection open until the pool is drained.
///
/// # Panics
///
/// `new_stream` and `drain_connections` panic outside a `LocalSet`.
pub struct SimPool {
    shared: Rc<Shared>,
}

struct Shared {
    tier: Tier,
    host: HostHandle,
    config: SimTierConfig,
    connect_timeout: Duration,
    state: Rc<ConnectivityState>,
    pending: RefCell<HashMap<u64, PendingStream>>,
    next_stream_id: Cell<u64>,
    streams_started: Cell<usize>,
    open_connections: Cell<usize>,
    drained_callbacks: RefCell<Vec<DrainedCallback>>,
    drain_timer: RefCell<Option<JoinHandle<()>>>,
    /// Set once `drain_delay` has elapsed after the first `drain_connections`.
    drain_elapsed: Cell<bool>,
}

struct PendingStream {
    callbacks: Box<dyn PoolCallbacks>,
    timer: JoinHandle<()>,
    started: Instant,
}

// ---

impl SimPool {
    pub fn new(tier: Tier, ctx: &TierContext, config: SimTierConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                tier,
                host: Arc::clone(&ctx.host),
                config,
                connect_timeout: ctx.options.connect_timeout,
                state: Rc::clone(&ctx.state),
                pending: RefCell::new(HashMap::new()),
                next_stream_id: Cell::new(0),
                streams_started: Cell::new(0),
                open_connections: Cell::new(0),
                drained_callbacks: RefCell::new(Vec::new()),
                drain_timer: RefCell::new(None),
                drain_elapsed: Cell::new(false),
            }),
        }
    }

    pub fn tier(&self) -> Tier {
        self.shared.tier
    }

    /// Stream requests accepted since creation, including cancelled ones.
    pub fn streams_started(&self) -> usize {
        self.shared.streams_started.get()
    }

    /// Stream requests still waiting on their timer.
    pub fn pending_streams(&self) -> usize {
        self.shared.pending.borrow().len()
    }

    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.get()
    }

    /// Whether a drain has run to completion.
    pub fn is_drained(&self) -> bool {
        self.shared.drain_elapsed.get()
            && self.shared.pending.borrow().is_empty()
            && self.shared.open_connections.get() == 0
    }
}

impl ConnectionPool for SimPool {
    fn has_active_connections(&self) -> bool {
        !self.shared.pending.borrow().is_empty() || self.shared.open_connections.get() > 0
    }

    fn new_stream(
        &self,
        _decoder: ResponseDecoderHandle,
        callbacks: Box<dyn PoolCallbacks>,
    ) -> Option<Box<dyn Cancellable>> {
        let shared = &self.shared;
        let id = shared.next_stream_id.get();
        shared.next_stream_id.set(id + 1);
        shared.streams_started.set(shared.streams_started.get() + 1);
        shared.state.incr_pending_streams();

        let connect_delay = shared.config.connect_delay();
        let timed_out = connect_delay > shared.connect_timeout;
        let delay = connect_delay.min(shared.connect_timeout);

        let weak = Rc::downgrade(shared);
        let timer = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.complete(id, timed_out);
            }
        });
        shared.pending.borrow_mut().insert(
            id,
            PendingStream {
                callbacks,
                timer,
                started: Instant::now(),
            },
        );
        debug!(
            host = %shared.host.hostname,
            tier = shared.tier.label(),
            stream = id,
            delay_ms = delay.as_millis() as u64,
            "simulated stream requested"
        );

        Some(Box::new(SimCancel {
            shared: Rc::downgrade(shared),
            id,
        }))
    }

    fn add_drained_callback(&self, callback: DrainedCallback) {
        self.shared.drained_callbacks.borrow_mut().push(callback);
        self.shared.check_drained();
    }

    fn drain_connections(&self) {
        let shared = &self.shared;
        if shared.drain_elapsed.get() || shared.drain_timer.borrow().is_some() {
            return;
        }
        debug!(
            host = %shared.host.hostname,
            tier = shared.tier.label(),
            open = shared.open_connections.get(),
            "simulated drain started"
        );
        let delay = shared.config.drain_delay();
        let weak = Rc::downgrade(shared);
        let timer = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.drain_elapsed.set(true);
                shared.check_drained();
            }
        });
        *shared.drain_timer.borrow_mut() = Some(timer);
    }

    fn host(&self) -> HostHandle {
        Arc::clone(&self.shared.host)
    }

    fn maybe_preconnect(&self, _ratio: f32) -> bool {
        false
    }
}

// ---

impl Shared {
    /// Deliver the outcome of stream `id`, unless it was cancelled meanwhile.
    fn complete(&self, id: u64, timed_out: bool) {
        let stream = self.pending.borrow_mut().remove(&id);
        let Some(stream) = stream else {
            return;
        };
        self.state.decr_pending_streams();
        let host = Arc::clone(&self.host);

        if timed_out {
            warn!(
                host = %host.hostname,
                tier = self.tier.label(),
                stream = id,
                "simulated connect timed out"
            );
            stream
                .callbacks
                .on_pool_failure(PoolFailureReason::Timeout, CONNECT_TIMEOUT_DETAIL, host);
        } else {
            match &self.config.outcome {
                SimOutcome::Ready { protocol } => {
                    let protocol = protocol
                        .or_else(|| self.tier.protocols().last().copied())
                        .unwrap_or(Protocol::Http11);
                    self.open_connections.set(self.open_connections.get() + 1);
                    self.state.incr_active_connections();
                    self.state.incr_active_streams();
                    let info = StreamInfo {
                        connection_id: id,
                        connect_duration: stream.started.elapsed(),
                    };
                    debug!(
                        host = %host.hostname,
                        tier = self.tier.label(),
                        stream = id,
                        protocol = protocol.label(),
                        "simulated stream ready"
                    );
                    stream.callbacks.on_pool_ready(
                        Box::new(SimEncoder {
                            stream_id: id,
                            protocol,
                        }),
                        host,
                        &info,
                        Some(protocol),
                    );
                }
                SimOutcome::Fail { reason, detail } => {
                    debug!(
                        host = %host.hostname,
                        tier = self.tier.label(),
                        stream = id,
                        reason = reason.label(),
                        "simulated stream failed"
                    );
                    stream.callbacks.on_pool_failure(*reason, detail, host);
                }
            }
        }
        self.check_drained();
    }

    /// Once the drain delay has elapsed and no attempt is pending, close every
    /// open connection and notify the drain subscribers.
    fn check_drained(&self) {
        if !self.drain_elapsed.get() || !self.pending.borrow().is_empty() {
            return;
        }
        self.close_connections();

        let callbacks = std::mem::take(&mut *self.drained_callbacks.borrow_mut());
        if callbacks.is_empty() {
            return;
        }
        info!(
            host = %self.host.hostname,
            tier = self.tier.label(),
            subscribers = callbacks.len(),
            "simulated tier drained"
        );
        for callback in callbacks {
            callback();
        }
    }

    fn close_connections(&self) {
        for _ in 0..self.open_connections.replace(0) {
            self.state.decr_active_streams();
            self.state.decr_active_connections();
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for (_, stream) in self.pending.get_mut().drain() {
            stream.timer.abort();
            self.state.decr_pending_streams();
        }
        if let Some(timer) = self.drain_timer.get_mut().take() {
            timer.abort();
        }
        self.close_connections();
    }
}

// ---------------------------------------------------------------------------
// SimCancel / SimEncoder
// ---------------------------------------------------------------------------

struct SimCancel {
    shared: Weak<Shared>,
    id: u64,
}

impl Cancellable for SimCancel {
    fn cancel(self: Box<Self>, policy: CancelPolicy) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let stream = shared.pending.borrow_mut().remove(&self.id);
        let Some(stream) = stream else {
            return;
        };
        stream.timer.abort();
        shared.state.decr_pending_streams();
        debug!(
            host = %shared.host.hostname,
            tier = shared.tier.label(),
            stream = self.id,
            ?policy,
            "simulated stream cancelled"
        );
        drop(stream);
        shared.check_drained();
    }
}

struct SimEncoder {
    stream_id: u64,
    protocol: Protocol,
}

impl RequestEncoder for SimEncoder {
    fn stream_id(&self) -> u64 {
        self.stream_id
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}
