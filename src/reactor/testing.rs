//! Idle engine for unit tests.
//!
//! The run loop only waits for shutdown; tests drive the callbacks by hand
//! through the reactor.

use std::sync::{Arc, Condvar, Mutex};

use super::{CoreCallbacks, Reactor, TransportEngine, RC_OK};
use crate::config::ReactorConfig;

#[derive(Default)]
pub(crate) struct IdleEngine {
    callbacks: Mutex<Option<Arc<dyn CoreCallbacks>>>,
    yields: Mutex<Vec<char>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl IdleEngine {
    pub(crate) fn yields(&self) -> Vec<char> {
        self.yields.lock().unwrap().clone()
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.wake.notify_all();
    }
}

impl TransportEngine for IdleEngine {
    fn init(&self, callbacks: Arc<dyn CoreCallbacks>, _: &str, _: &str, _: &str, _: &str) -> i32 {
        *self.callbacks.lock().unwrap() = Some(callbacks);
        RC_OK
    }

    fn run(&self) -> i32 {
        let callbacks = self.callbacks.lock().unwrap().clone();
        if let Some(callbacks) = callbacks {
            callbacks.on_event_loop_started();
        }
        let mut stopped = self.stopped.lock().unwrap();
        while !*stopped {
            stopped = self.wake.wait(stopped).unwrap();
        }
        RC_OK
    }

    fn yield_cmd(&self, command: char) -> i32 {
        self.yields.lock().unwrap().push(command);
        RC_OK
    }

    fn shutdown(&self) -> i32 {
        self.stop();
        self.callbacks.lock().unwrap().take();
        RC_OK
    }

    fn state(&self) -> String {
        "i*****".to_string()
    }

    fn time(&self) -> f64 {
        0.0
    }

    fn set_proxy_server_worker(&self, _: &str, _: &str) -> i32 {
        RC_OK
    }

    fn ppkgen_worker(&self) -> i32 {
        RC_OK
    }

    fn csrgen_worker(&self, _: &[String]) -> i32 {
        RC_OK
    }
}

/// A started reactor on an [`IdleEngine`]. Dropping it shuts the engine down
/// so the blocking run task ends with the test.
pub(crate) struct TestReactor {
    pub(crate) engine: Arc<IdleEngine>,
    pub(crate) reactor: Arc<Reactor>,
}

impl TestReactor {
    pub(crate) async fn start(config: ReactorConfig) -> Self {
        let engine = Arc::new(IdleEngine::default());
        let reactor = Reactor::init(engine.clone(), config).await.unwrap();
        Self { engine, reactor }
    }
}

impl Drop for TestReactor {
    fn drop(&mut self) {
        self.engine.shutdown();
    }
}
