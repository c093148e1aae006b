/// Simulated control channel for dry runs.
///
/// Build and attach requests never leave the process: each one sleeps for
/// the configured latency and then succeeds or fails according to the
/// injected failure rates. This keeps whole order batches exercisable
/// end to end without a live network.
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use weaver_core::{BuildRefusal, CircuitHandle, ControlChannel, HopTarget, StreamRefusal};

/// Tuning for the simulated channel.
#[derive(Debug, Clone)]
pub struct SimChannelConfig {
    pub build_latency: Duration,
    pub stream_latency: Duration,
    /// Probability in `[0, 1]` that a build attempt is rejected.
    pub build_failure_rate: f64,
    /// Probability in `[0, 1]` that a stream attach is rejected.
    pub stream_failure_rate: f64,
}

impl Default for SimChannelConfig {
    fn default() -> Self {
        Self {
            build_latency: Duration::from_millis(20),
            stream_latency: Duration::from_millis(10),
            build_failure_rate: 0.0,
            stream_failure_rate: 0.0,
        }
    }
}

/// Counters exposed after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub circuits_built: usize,
    pub streams_attached: usize,
    pub teardowns: usize,
}

/// In-process [`ControlChannel`] implementation.
pub struct SimChannel {
    config: SimChannelConfig,
    next_handle: AtomicU64,
    circuits_built: AtomicUsize,
    streams_attached: AtomicUsize,
    teardowns: AtomicUsize,
}

impl SimChannel {
    pub fn new(mut config: SimChannelConfig) -> Self {
        config.build_failure_rate = config.build_failure_rate.clamp(0.0, 1.0);
        config.stream_failure_rate = config.stream_failure_rate.clamp(0.0, 1.0);
        Self {
            config,
            next_handle: AtomicU64::new(1),
            circuits_built: AtomicUsize::new(0),
            streams_attached: AtomicUsize::new(0),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> SimStats {
        SimStats {
            circuits_built: self.circuits_built.load(Ordering::SeqCst),
            streams_attached: self.streams_attached.load(Ordering::SeqCst),
            teardowns: self.teardowns.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ControlChannel for SimChannel {
    async fn build_circuit(&self, hops: [HopTarget; 3]) -> Result<CircuitHandle, BuildRefusal> {
        tokio::time::sleep(self.config.build_latency).await;

        let failed = rand::thread_rng().gen_bool(self.config.build_failure_rate);
        if failed {
            return Err(BuildRefusal::Rejected(
                "simulated mid-build relay failure".to_string(),
            ));
        }

        let handle = CircuitHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.circuits_built.fetch_add(1, Ordering::SeqCst);
        debug!(
            "sim: built {} via {} -> {} -> {}",
            handle, hops[0], hops[1], hops[2]
        );
        Ok(handle)
    }

    async fn attach_stream(
        &self,
        handle: &CircuitHandle,
        host: &str,
        port: u16,
    ) -> Result<(), StreamRefusal> {
        tokio::time::sleep(self.config.stream_latency).await;

        let failed = rand::thread_rng().gen_bool(self.config.stream_failure_rate);
        if failed {
            return Err(StreamRefusal::Rejected(
                "simulated exit refusal".to_string(),
            ));
        }

        self.streams_attached.fetch_add(1, Ordering::SeqCst);
        debug!("sim: {} streaming to {}:{}", handle, host, port);
        Ok(())
    }

    async fn teardown(&self, handle: CircuitHandle) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        debug!("sim: tore down {}", handle);
    }
}
