//! Reactor - couples the frame pool, stream multiplexer, keepalive and
//! provider scheduler to the native transport engine.
//!
//! The reactor owns one session: construct it with [`Reactor::init`], use it,
//! then call [`Reactor::shutdown`]. It implements [`CoreCallbacks`]; the
//! engine calls those from its run loop, which runs on a blocking task.
//!
//! # Write path
//!
//! Components with something to send register as [`FrameProvider`]s. On
//! write-ready the reactor pops providers in priority order until one builds
//! a frame, re-queues providers that have more, flips the frame to read mode
//! and hands it to the engine.
//!
//! # Read path
//!
//! The engine fills a pool buffer; the reactor checks the declared length,
//! then routes control frames by `(version, type)` and data frames to the
//! multiplexer. Whatever the handler hands back goes back to the pool.

mod engine;
mod scheduler;
mod state;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{
    check_rc, log_rc, CoreCallbacks, TransportEngine, Yield, RC_BENIGN_YIELD, RC_E_GENERIC, RC_OK,
};
pub use scheduler::Scheduler;
pub use state::{code as state_code, SeacatState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::{ProxyConfig, ReactorConfig};
use crate::error::{Result, SeacatError};
use crate::keepalive::{Keepalive, Ping, PingOutcome};
use crate::protocol::{
    build_frame_version_type, describe_frame, FrameBuf, FrameHeader, FramePool,
    CNTL_FRAME_VERSION_ALX1, CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_PING, CNTL_TYPE_RST_STREAM,
    CNTL_TYPE_SYN_REPLY,
};
use crate::stream::{ControlFrameConsumer, FrameProvider, FrameResult, Multiplexer};

/// Client id reported before the engine assigns one.
pub const DEFAULT_CLIENT_ID: &str = "[AAAAAAAAAAAAAAAA]";

/// CSR subject fields passed to the CSR worker, in this order.
pub const CSR_FIELDS: [&str; 11] = [
    "C",
    "ST",
    "L",
    "O",
    "OU",
    "CN",
    "SN",
    "GN",
    "emailAddress",
    "UID",
    "description",
];

#[derive(Debug, Clone)]
struct Identity {
    client_id: String,
    client_tag: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            client_tag: "0".repeat(96),
        }
    }
}

/// One session with the gateway.
pub struct Reactor {
    me: Weak<Reactor>,
    config: ReactorConfig,
    engine: Arc<dyn TransportEngine>,
    runtime: Handle,

    frame_pool: Arc<FramePool>,
    multiplexer: Arc<Multiplexer>,
    keepalive: Arc<Keepalive>,
    scheduler: Mutex<Scheduler>,
    /// A provider was re-queued without a frame, the pool ran dry.
    stalled: AtomicBool,
    consumers: HashMap<u32, Arc<dyn ControlFrameConsumer>>,

    last_state: Mutex<SeacatState>,
    ready: watch::Sender<bool>,
    identity: Mutex<Identity>,
    proxy: Mutex<Option<ProxyConfig>>,

    event_loop_started: Notify,
    run_task: Mutex<Option<JoinHandle<i32>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Reactor {
    /// Initialize the engine, start its run loop and wait until the loop
    /// reports it has started.
    pub async fn init(engine: Arc<dyn TransportEngine>, config: ReactorConfig) -> Result<Arc<Self>> {
        let multiplexer = Multiplexer::new();
        let keepalive = Keepalive::new();

        let mut consumers: HashMap<u32, Arc<dyn ControlFrameConsumer>> = HashMap::new();
        consumers.insert(
            build_frame_version_type(CNTL_FRAME_VERSION_ALX1, CNTL_TYPE_SYN_REPLY),
            multiplexer.clone(),
        );
        consumers.insert(
            build_frame_version_type(CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_RST_STREAM),
            multiplexer.clone(),
        );
        consumers.insert(
            build_frame_version_type(CNTL_FRAME_VERSION_SPD3, CNTL_TYPE_PING),
            keepalive.clone(),
        );

        let (ready, _) = watch::channel(false);
        let reactor = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            frame_pool: Arc::new(FramePool::new(&config.pool)),
            proxy: Mutex::new(config.proxy.clone()),
            config,
            engine,
            runtime: Handle::current(),
            multiplexer,
            keepalive,
            scheduler: Mutex::new(Scheduler::new()),
            stalled: AtomicBool::new(false),
            consumers,
            last_state: Mutex::new(SeacatState::default()),
            ready,
            identity: Mutex::new(Identity::default()),
            event_loop_started: Notify::new(),
            run_task: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        });

        let storage_dir = reactor.config.engine_storage_dir();
        let callbacks: Arc<dyn CoreCallbacks> = reactor.clone();
        let rc = reactor.engine.init(
            callbacks,
            &reactor.config.app_name,
            reactor.config.app_suffix.as_deref().unwrap_or(""),
            &reactor.config.platform,
            &storage_dir,
        );
        check_rc("seacatcc.init", rc)?;
        *lock(&reactor.last_state) = SeacatState::parse(&reactor.engine.state());

        let started = reactor.event_loop_started.notified();
        let engine = reactor.engine.clone();
        let mut run_task = tokio::task::spawn_blocking(move || {
            let rc = engine.run();
            if rc != RC_OK {
                tracing::debug!(rc, "Return code {} in seacatcc.run", rc);
            }
            rc
        });

        tokio::select! {
            _ = started => {}
            finished = &mut run_task => {
                let rc = finished.unwrap_or(RC_E_GENERIC);
                tracing::error!(rc, "Engine run loop ended before it started");
                return Err(SeacatError::Engine { call: "seacatcc.run", rc });
            }
        }

        *lock(&reactor.run_task) = Some(run_task);
        tracing::info!(app = %reactor.config.app_name, "Reactor started");
        Ok(reactor)
    }

    /// Stop the engine and wait (bounded) for its run loop to finish.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::debug!("Shutdown");
        let rc = self.engine.shutdown();

        for worker in lock(&self.workers).drain(..) {
            worker.abort();
        }
        lock(&self.scheduler).clear();
        check_rc("seacatcc.shutdown", rc)?;

        let run_task = lock(&self.run_task).take();
        if let Some(run_task) = run_task {
            if tokio::time::timeout(self.config.shutdown_timeout, run_task)
                .await
                .is_err()
            {
                tracing::error!("Core thread is still alive");
                return Err(SeacatError::Timeout("engine run loop shutdown"));
            }
        }
        Ok(())
    }

    /// Queue a provider and tell the engine there is data to send.
    ///
    /// With `single`, a provider that is already queued is not queued twice.
    pub fn register_frame_provider(&self, provider: Arc<dyn FrameProvider>, single: bool) -> Result<()> {
        lock(&self.scheduler).push(provider, single);
        self.signal_data_to_send()
    }

    fn signal_data_to_send(&self) -> Result<()> {
        let rc = self.engine.yield_cmd(Yield::DataToSend.as_char());
        if RC_BENIGN_YIELD.contains(&rc) {
            tracing::debug!(rc, "Return code {} in seacatcc.yield", rc);
            return Ok(());
        }
        check_rc("seacatcc.yield", rc)
    }

    /// Ask for another write-ready if a provider stalled and is still queued.
    fn resume_stalled(&self) {
        if !self.stalled.swap(false, Ordering::AcqRel) || lock(&self.scheduler).is_empty() {
            return;
        }
        tracing::debug!("Resuming stalled frame providers");
        if let Err(e) = self.signal_data_to_send() {
            tracing::error!("Failed to resume frame providers: {}", e);
        }
    }

    /// Send a command to the engine.
    pub fn yield_cmd(&self, command: Yield) -> Result<()> {
        tracing::debug!(%command, "Yield");
        check_rc("seacatcc.yield", self.engine.yield_cmd(command.as_char()))
    }

    /// Send a ping; the receiver resolves when it is answered or cancelled.
    pub fn ping(&self) -> Result<tokio::sync::oneshot::Receiver<PingOutcome>> {
        let deadline = self.time() + self.config.ping_timeout.as_secs_f64();
        let (ping, outcome) = Ping::new(deadline);
        self.keepalive.ping(self, ping)?;
        Ok(outcome)
    }

    /// Current engine state.
    pub fn state(&self) -> SeacatState {
        SeacatState::parse(&self.engine.state())
    }

    /// Engine clock in seconds.
    pub fn time(&self) -> f64 {
        self.engine.time()
    }

    /// Whether the key is ready and the gateway signed us in.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until ready. Returns `false` on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let became_ready = tokio::time::timeout(timeout, ready.wait_for(|r| *r))
            .await
            .is_ok_and(|waited| waited.is_ok());
        became_ready
    }

    /// Watch readiness changes.
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn client_id(&self) -> String {
        lock(&self.identity).client_id.clone()
    }

    pub fn client_tag(&self) -> String {
        lock(&self.identity).client_tag.clone()
    }

    /// Store a proxy and apply it now; it is applied again on every connect.
    pub fn set_proxy(&self, host: &str, port: u16) {
        let proxy = ProxyConfig {
            host: host.to_string(),
            port,
        };
        *lock(&self.proxy) = Some(proxy.clone());
        self.apply_proxy(&proxy);
    }

    fn apply_proxy(&self, proxy: &ProxyConfig) {
        if proxy.host.is_empty() {
            return;
        }
        tracing::debug!(host = %proxy.host, port = proxy.port, "Reconfiguring proxy server");
        let rc = self
            .engine
            .set_proxy_server_worker(&proxy.host, &proxy.port.to_string());
        log_rc("seacatcc.set_proxy_server_worker", rc);
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn frame_pool(&self) -> &Arc<FramePool> {
        &self.frame_pool
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer> {
        &self.multiplexer
    }

    pub fn keepalive(&self) -> &Arc<Keepalive> {
        &self.keepalive
    }

    /// Providers waiting in the scheduler.
    pub fn queued_providers(&self) -> usize {
        lock(&self.scheduler).len()
    }

    /// Upgrade to a strong handle. Fails only while the reactor is being dropped.
    pub fn handle(&self) -> Result<Arc<Reactor>> {
        self.me.upgrade().ok_or(SeacatError::ConnectionClosed)
    }

    fn spawn_worker<F>(&self, name: &'static str, work: F)
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let handle = self.runtime.spawn_blocking(move || {
            let rc = work();
            log_rc(name, rc);
        });
        let mut workers = lock(&self.workers);
        workers.retain(|w| !w.is_finished());
        workers.push(handle);
    }

    fn csr_params(&self) -> Vec<String> {
        CSR_FIELDS
            .iter()
            .filter_map(|field| {
                self.config
                    .csr
                    .get(*field)
                    .map(|value| [field.to_string(), value.clone()])
            })
            .flatten()
            .collect()
    }

    fn dispatch(&self, mut frame: FrameBuf) -> Option<FrameBuf> {
        let header = match FrameHeader::read(&mut frame) {
            Ok(header) => header,
            Err(e) => {
                tracing::error!("Truncated frame received: {}", e);
                return Some(frame);
            }
        };

        if !header.matches_limit(frame.limit()) {
            tracing::error!(
                limit = frame.limit(),
                length = header.length(),
                "Incorrect frame received - closing connection"
            );
            log_rc("seacatcc.yield", self.engine.yield_cmd(Yield::Disconnect.as_char()));
            return Some(frame);
        }

        match header {
            FrameHeader::Control(control) => match self.consumers.get(&control.version_type()) {
                Some(consumer) => consumer.on_control_frame(self, frame, &control),
                None => {
                    tracing::error!(
                        version = control.version,
                        kind = control.kind,
                        length = control.length,
                        "Unidentified control frame received"
                    );
                    Some(frame)
                }
            },
            FrameHeader::Data(data) => self.multiplexer.on_data_frame(self, frame, &data),
        }
    }
}

impl CoreCallbacks for Reactor {
    fn log_message(&self, level: char, message: &str) {
        match level {
            'D' => tracing::debug!(target: "seacat::core", "{}", message),
            'W' => tracing::warn!(target: "seacat::core", "{}", message),
            'E' => tracing::error!(target: "seacat::core", "{}", message),
            _ => tracing::info!(target: "seacat::core", "{}", message),
        }
    }

    fn on_write_ready(&self) -> Option<FrameBuf> {
        let mut budget = lock(&self.scheduler).len();

        while budget > 0 {
            budget -= 1;
            let Some(provider) = lock(&self.scheduler).pop() else {
                break;
            };

            let FrameResult { frame, keep } = match provider.build_frame(self) {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(priority = provider.priority(), "Error while building frame: {}", e);
                    continue;
                }
            };

            if keep {
                if frame.is_none() {
                    self.stalled.store(true, Ordering::Release);
                }
                lock(&self.scheduler).push(provider, true);
            }

            if let Some(mut frame) = frame {
                frame.flip();
                tracing::trace!(frame = %describe_frame(&frame), "Frame out");
                return Some(frame);
            }
        }
        None
    }

    fn on_read_ready(&self) -> Option<FrameBuf> {
        match self.frame_pool.borrow("Reactor.read_ready") {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::error!("Error while read ready: {}", e);
                None
            }
        }
    }

    fn on_frame_received(&self, mut frame: FrameBuf, length: usize) {
        let end = frame.position() + length;
        if let Err(e) = frame.set_position(end) {
            tracing::error!(length, "Frame received past its buffer: {}", e);
            self.frame_pool.give_back(frame);
            return;
        }
        frame.flip();
        tracing::trace!(frame = %describe_frame(&frame), "Frame in");

        if let Some(frame) = self.dispatch(frame) {
            self.frame_pool.give_back(frame);
            self.resume_stalled();
        }
    }

    fn on_frame_return(&self, frame: FrameBuf) {
        self.frame_pool.give_back(frame);
        self.resume_stalled();
    }

    fn on_worker_requested(&self, worker: char) {
        tracing::debug!(%worker, "Worker requested");
        match worker {
            'P' => {
                let engine = self.engine.clone();
                self.spawn_worker("seacatcc.ppkgen_worker", move || engine.ppkgen_worker());
            }
            'C' => {
                let engine = self.engine.clone();
                let params = self.csr_params();
                self.spawn_worker("seacatcc.csrgen_worker", move || engine.csrgen_worker(&params));
            }
            other => tracing::error!(worker = %other, "Unknown worker requested"),
        }
    }

    fn on_heartbeat(&self, now: f64) -> f64 {
        self.keepalive.heart_beat(now);
        self.frame_pool.heart_beat(now);
        // Buffers also come back from body readers, outside any callback
        self.resume_stalled();
        self.config.heartbeat_interval.as_secs_f64()
    }

    fn on_event_loop_started(&self) {
        tracing::debug!("Event loop started");
        self.event_loop_started.notify_one();
    }

    fn on_gateway_connected(&self) {
        tracing::info!("Gateway connected");
    }

    fn on_gateway_reset(&self) {
        tracing::info!("Gateway connection reset");
        self.keepalive.reset();
        self.multiplexer.reset();
    }

    fn on_state_changed(&self, state: &str) {
        let state = SeacatState::parse(state);
        tracing::debug!(%state, "State changed: {}", state.describe());

        let was_connecting = {
            let mut last = lock(&self.last_state);
            let was = last.is_connecting();
            *last = state.clone();
            was
        };

        if !was_connecting && state.is_connecting() {
            let proxy = lock(&self.proxy).clone();
            if let Some(proxy) = proxy {
                self.apply_proxy(&proxy);
            }
        }

        self.ready.send_replace(state.is_ready());
    }

    fn on_client_identity_changed(&self, client_id: &str, client_tag: &str) {
        tracing::debug!(client_id, client_tag, "Client identity changed");
        let mut identity = lock(&self.identity);
        identity.client_id = client_id.to_string();
        identity.client_tag = client_tag.to_string();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::testing::TestReactor;
    use super::*;
    use crate::config::PoolConfig;
    use crate::protocol::{decode_ping, encode_ping};

    /// Sends one PING carrying its own priority as the id.
    struct Marker {
        priority: u8,
    }

    impl FrameProvider for Marker {
        fn build_frame(&self, reactor: &Reactor) -> Result<FrameResult> {
            let mut frame = reactor.frame_pool().borrow("Marker")?;
            encode_ping(&mut frame, u32::from(self.priority))?;
            Ok(FrameResult::frame(frame, false))
        }

        fn priority(&self) -> u8 {
            self.priority
        }
    }

    fn ping_id(frame: &mut FrameBuf) -> u32 {
        let header = FrameHeader::read(frame).unwrap();
        assert!(matches!(header, FrameHeader::Control(_)));
        decode_ping(frame).unwrap()
    }

    fn single_frame_pool() -> ReactorConfig {
        ReactorConfig {
            pool: PoolConfig {
                low_water_mark: 1,
                high_water_mark: 1,
                ..PoolConfig::default()
            },
            ..ReactorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_write_ready_drains_in_priority_order() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        for priority in [3, 1, 2] {
            t.reactor
                .register_frame_provider(Arc::new(Marker { priority }), true)
                .unwrap();
        }

        let mut ids = Vec::new();
        while let Some(mut frame) = t.reactor.on_write_ready() {
            ids.push(ping_id(&mut frame));
            t.reactor.on_frame_return(frame);
        }
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(t.engine.yields(), vec!['W', 'W', 'W']);
    }

    #[tokio::test]
    async fn test_stalled_ping_resumes_when_frame_returns() {
        let t = TestReactor::start(single_frame_pool()).await;
        let held = t.reactor.frame_pool().borrow("test").unwrap();
        let _outcome = t.reactor.ping().unwrap();

        assert!(t.reactor.on_write_ready().is_none());
        assert_eq!(t.reactor.keepalive().queued_count(), 1);
        assert_eq!(t.reactor.queued_providers(), 1);
        assert_eq!(t.engine.yields(), vec!['W']);

        t.reactor.on_frame_return(held);
        assert_eq!(t.engine.yields(), vec!['W', 'W']);

        let mut frame = t.reactor.on_write_ready().expect("ping after the pool refilled");
        assert_eq!(ping_id(&mut frame), 1);
        assert_eq!(t.reactor.keepalive().waiting_count(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_resumes_stalled_providers() {
        let t = TestReactor::start(single_frame_pool()).await;
        let held = t.reactor.frame_pool().borrow("test").unwrap();
        let _outcome = t.reactor.ping().unwrap();
        assert!(t.reactor.on_write_ready().is_none());

        // Given back outside any callback, like a body reader does
        t.reactor.frame_pool().give_back(held);
        assert_eq!(t.engine.yields(), vec!['W']);

        t.reactor.on_heartbeat(1.0);
        assert_eq!(t.engine.yields(), vec!['W', 'W']);
        t.reactor.on_heartbeat(2.0);
        assert_eq!(t.engine.yields(), vec!['W', 'W']);
        assert!(t.reactor.on_write_ready().is_some());
    }

    #[tokio::test]
    async fn test_returned_frame_without_stall_does_not_yield() {
        let t = TestReactor::start(ReactorConfig::default()).await;
        let frame = t.reactor.frame_pool().borrow("test").unwrap();
        t.reactor.on_frame_return(frame);
        t.reactor.on_heartbeat(1.0);
        assert!(t.engine.yields().is_empty());
    }
}
