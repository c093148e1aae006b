use super::aggregator::{CircuitOutcome, OrderReport, ResultAggregator, RunSnapshot};
use super::connector::{plan_stream, StreamPlan};
use super::resolver::HopResolver;
use super::retry::{RetryDecision, RetryPolicy};
use super::types::{Circuit, CircuitId, FailureReason};
use crate::control::{BuildRefusal, CircuitHandle, ControlChannel, HopTarget, StreamRefusal};
use crate::directory::RelayDirectory;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use weaver_common::{Order, OrchestratorConfig, OrderId, WeaverError};

/// Commands accepted by the engine task.
enum Command {
    Submit {
        order: Order,
        reply: oneshot::Sender<OrderId>,
    },
    CancelOrder {
        order: OrderId,
    },
    CancelAll,
    Report {
        order: OrderId,
        reply: oneshot::Sender<Option<OrderReport>>,
    },
    Snapshot {
        reply: oneshot::Sender<RunSnapshot>,
    },
    WaitIdle {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Completion message sent back by a spawned build or attach task.
#[derive(Debug)]
struct CircuitEvent {
    circuit: CircuitId,
    attempt: u32,
    outcome: EventOutcome,
}

#[derive(Debug)]
enum EventOutcome {
    BuiltOk(CircuitHandle),
    BuildFailed(FailureReason),
    StreamOk,
    StreamFailed(FailureReason),
    ChannelLost,
}

struct OrderEntry {
    cancelled: bool,
}

/// Cloneable handle for submitting orders and querying results.
#[derive(Clone)]
pub struct OrchestratorHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    /// Submit an order; circuits are materialized and queued immediately.
    pub async fn submit(&self, order: Order) -> Result<OrderId, WeaverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { order, reply })
            .map_err(|_| WeaverError::internal("orchestrator stopped"))?;
        rx.await
            .map_err(|_| WeaverError::internal("orchestrator stopped"))
    }

    /// Cancel one order: queued circuits are dropped, in-flight ones finish.
    pub fn cancel_order(&self, order: OrderId) {
        let _ = self.cmd_tx.send(Command::CancelOrder { order });
    }

    /// Cancel every order still in progress.
    pub fn cancel_all(&self) {
        let _ = self.cmd_tx.send(Command::CancelAll);
    }

    /// Tallies for one order, if any of its circuits completed yet.
    pub async fn report(&self, order: OrderId) -> Result<Option<OrderReport>, WeaverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Report { order, reply })
            .map_err(|_| WeaverError::internal("orchestrator stopped"))?;
        rx.await
            .map_err(|_| WeaverError::internal("orchestrator stopped"))
    }

    /// Tallies for all orders.
    pub async fn snapshot(&self) -> Result<RunSnapshot, WeaverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { reply })
            .map_err(|_| WeaverError::internal("orchestrator stopped"))?;
        rx.await
            .map_err(|_| WeaverError::internal("orchestrator stopped"))
    }

    /// Resolves once no circuit is queued or in flight.
    pub async fn wait_idle(&self) -> Result<(), WeaverError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::WaitIdle { reply })
            .map_err(|_| WeaverError::internal("orchestrator stopped"))?;
        rx.await
            .map_err(|_| WeaverError::internal("orchestrator stopped"))
    }
}

/// The circuit build orchestrator.
///
/// Owns the engine task which serializes every state transition; all
/// interaction goes through message passing, so no lock is shared with
/// completion callbacks.
pub struct Orchestrator {
    handle: OrchestratorHandle,
    engine: JoinHandle<Result<(), WeaverError>>,
}

impl Orchestrator {
    /// Spawn the engine task. Must be called within a tokio runtime.
    pub fn spawn(
        config: OrchestratorConfig,
        directory: Arc<dyn RelayDirectory>,
        channel: Arc<dyn ControlChannel>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            retry: RetryPolicy::new(config.max_retries),
            config,
            resolver: HopResolver::new(directory),
            channel,
            orders: HashMap::new(),
            circuits: HashMap::new(),
            queue: VecDeque::new(),
            active: 0,
            aggregator: ResultAggregator::new(),
            event_tx,
            idle_waiters: Vec::new(),
            shutdown_reply: None,
            next_order_id: 0,
            next_circuit_id: 0,
            draining: false,
            cmd_closed: false,
            fatal: None,
        };

        let task = tokio::spawn(engine.run(cmd_rx, event_rx));

        Self {
            handle: OrchestratorHandle { cmd_tx },
            engine: task,
        }
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, order: Order) -> Result<OrderId, WeaverError> {
        self.handle.submit(order).await
    }

    pub fn cancel_order(&self, order: OrderId) {
        self.handle.cancel_order(order);
    }

    pub fn cancel_all(&self) {
        self.handle.cancel_all();
    }

    pub async fn report(&self, order: OrderId) -> Result<Option<OrderReport>, WeaverError> {
        self.handle.report(order).await
    }

    pub async fn snapshot(&self) -> Result<RunSnapshot, WeaverError> {
        self.handle.snapshot().await
    }

    pub async fn wait_idle(&self) -> Result<(), WeaverError> {
        self.handle.wait_idle().await
    }

    /// Stop dispatching, let in-flight circuits finish, and join the engine.
    ///
    /// Returns the engine's verdict: `Err` only for process-fatal conditions
    /// such as a lost control channel; per-circuit failures never surface
    /// here.
    pub async fn shutdown(self) -> Result<(), WeaverError> {
        let (reply, rx) = oneshot::channel();
        let _ = self.handle.cmd_tx.send(Command::Shutdown { reply });
        let _ = rx.await;
        self.engine
            .await
            .map_err(|e| WeaverError::internal(format!("engine task panicked: {e}")))?
    }
}

/// Single task owning all orchestrator state.
struct Engine {
    config: OrchestratorConfig,
    resolver: HopResolver,
    channel: Arc<dyn ControlChannel>,
    retry: RetryPolicy,
    orders: HashMap<OrderId, OrderEntry>,
    circuits: HashMap<CircuitId, Circuit>,
    /// FIFO across orders in declaration order, sequence ascending within one.
    queue: VecDeque<CircuitId>,
    /// Circuits currently `Building` or `ExtendingStream`.
    active: usize,
    aggregator: ResultAggregator,
    event_tx: mpsc::UnboundedSender<CircuitEvent>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    shutdown_reply: Option<oneshot::Sender<()>>,
    next_order_id: u64,
    next_circuit_id: u64,
    draining: bool,
    cmd_closed: bool,
    fatal: Option<WeaverError>,
}

impl Engine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<CircuitEvent>,
    ) -> Result<(), WeaverError> {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv(), if !self.cmd_closed => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        // Every handle dropped without a shutdown; wind down.
                        self.cmd_closed = true;
                        self.begin_drain(None);
                    }
                },
                Some(event) = event_rx.recv() => self.on_event(event),
                else => break,
            }

            self.pump();
            self.notify_idle();

            // A fatal drain keeps serving result queries until the caller
            // shuts down or drops every handle.
            let finished = self.shutdown_reply.is_some() || self.cmd_closed;
            if self.draining && self.outstanding() == 0 && finished {
                break;
            }
        }

        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }

        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn outstanding(&self) -> usize {
        self.circuits.len()
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { order, reply } => {
                if self.draining {
                    warn!("order refused: orchestrator is draining");
                    return;
                }
                let id = self.submit_order(order);
                let _ = reply.send(id);
            }
            Command::CancelOrder { order } => self.cancel_order(order),
            Command::CancelAll => {
                let ids: Vec<OrderId> = self
                    .orders
                    .iter()
                    .filter(|(_, entry)| !entry.cancelled)
                    .map(|(id, _)| *id)
                    .collect();
                for id in ids {
                    self.cancel_order(id);
                }
            }
            Command::Report { order, reply } => {
                let _ = reply.send(self.aggregator.report(order));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.aggregator.snapshot());
            }
            Command::WaitIdle { reply } => {
                if self.outstanding() == 0 {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            Command::Shutdown { reply } => {
                self.shutdown_reply = Some(reply);
                self.begin_drain(None);
            }
        }
    }

    fn submit_order(&mut self, order: Order) -> OrderId {
        self.next_order_id += 1;
        let id = OrderId(self.next_order_id);
        let order = Arc::new(order);

        info!("{} accepted: {} circuits", id, order.count);

        for sequence in 0..order.count {
            self.next_circuit_id += 1;
            let cid = CircuitId(self.next_circuit_id);
            self.circuits
                .insert(cid, Circuit::new(cid, id, order.clone(), sequence));
            self.queue.push_back(cid);
        }

        self.orders.insert(id, OrderEntry { cancelled: false });
        id
    }

    fn cancel_order(&mut self, id: OrderId) {
        let Some(entry) = self.orders.get_mut(&id) else {
            return;
        };
        if entry.cancelled {
            return;
        }
        entry.cancelled = true;
        info!("{} cancelled", id);

        self.purge_queued(Some(id));

        // Best-effort teardown for circuits already extending a stream; the
        // attach outcome still arrives and is tallied as partial progress.
        let handles: Vec<CircuitHandle> = self
            .circuits
            .values()
            .filter(|c| c.order_id == id)
            .filter_map(|c| c.handle.clone())
            .collect();
        for handle in handles {
            self.spawn_teardown(handle);
        }
    }

    /// Drop queued circuits (of one order, or all of them) without
    /// dispatching; each is tallied as cancelled.
    fn purge_queued(&mut self, order: Option<OrderId>) {
        let mut keep = VecDeque::with_capacity(self.queue.len());
        while let Some(cid) = self.queue.pop_front() {
            let matches = match order {
                Some(order_id) => self
                    .circuits
                    .get(&cid)
                    .is_some_and(|c| c.order_id == order_id),
                None => true,
            };
            if matches {
                if let Some(circuit) = self.circuits.remove(&cid) {
                    self.aggregator
                        .record(circuit.order_id, CircuitOutcome::Cancelled);
                }
            } else {
                keep.push_back(cid);
            }
        }
        self.queue = keep;
    }

    fn begin_drain(&mut self, fatal: Option<WeaverError>) {
        if let Some(err) = fatal {
            if self.fatal.is_none() {
                self.fatal = Some(err);
            }
        }
        if self.draining {
            return;
        }
        self.draining = true;
        self.purge_queued(None);
    }

    /// Dispatch queued circuits while the concurrency ceiling allows.
    fn pump(&mut self) {
        if self.draining {
            return;
        }
        let ceiling = self.config.max_inflight.max(1);
        while self.active < ceiling {
            let Some(cid) = self.queue.pop_front() else {
                break;
            };
            self.dispatch(cid);
        }
    }

    fn dispatch(&mut self, cid: CircuitId) {
        let (order, tried, attempt, order_id) = match self.circuits.get(&cid) {
            Some(c) => (c.order.clone(), c.tried.clone(), c.attempt, c.order_id),
            None => return,
        };

        if self.orders.get(&order_id).map_or(true, |e| e.cancelled) {
            if let Some(circuit) = self.circuits.remove(&cid) {
                self.aggregator
                    .record(circuit.order_id, CircuitOutcome::Cancelled);
            }
            return;
        }

        match self.resolver.resolve_path(&order, &tried) {
            Err(err) => {
                debug!("{} resolution failed: {}", cid, err);
                self.fail_circuit(cid, FailureReason::NoEligibleRelay);
            }
            Ok(hops) => {
                debug!(
                    "{} building via {} -> {} -> {} (attempt {})",
                    cid, hops[0], hops[1], hops[2], attempt
                );
                if let Some(circuit) = self.circuits.get_mut(&cid) {
                    circuit.mark_building(hops.clone());
                    self.active += 1;
                    self.spawn_build(cid, attempt, hops);
                }
            }
        }
    }

    fn spawn_build(&self, cid: CircuitId, attempt: u32, hops: [HopTarget; 3]) {
        let channel = self.channel.clone();
        let tx = self.event_tx.clone();
        let deadline = self.config.build_timeout();

        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(deadline, channel.build_circuit(hops)).await
            {
                Err(_) => EventOutcome::BuildFailed(FailureReason::BuildTimeout),
                Ok(Ok(handle)) => EventOutcome::BuiltOk(handle),
                Ok(Err(BuildRefusal::Rejected(reason))) => {
                    debug!("{} rejected: {}", cid, reason);
                    EventOutcome::BuildFailed(FailureReason::BuildRejected)
                }
                Ok(Err(BuildRefusal::ChannelLost)) => EventOutcome::ChannelLost,
            };
            let _ = tx.send(CircuitEvent {
                circuit: cid,
                attempt,
                outcome,
            });
        });
    }

    fn spawn_attach(
        &self,
        cid: CircuitId,
        attempt: u32,
        handle: CircuitHandle,
        host: String,
        port: u16,
    ) {
        let channel = self.channel.clone();
        let tx = self.event_tx.clone();
        let deadline = self.config.stream_timeout();

        tokio::spawn(async move {
            let outcome =
                match tokio::time::timeout(deadline, channel.attach_stream(&handle, &host, port))
                    .await
                {
                    Err(_) => EventOutcome::StreamFailed(FailureReason::StreamTimeout),
                    Ok(Ok(())) => EventOutcome::StreamOk,
                    Ok(Err(StreamRefusal::Rejected(reason))) => {
                        debug!("{} stream rejected: {}", cid, reason);
                        EventOutcome::StreamFailed(FailureReason::StreamRejected)
                    }
                    Ok(Err(StreamRefusal::ChannelLost)) => EventOutcome::ChannelLost,
                };
            let _ = tx.send(CircuitEvent {
                circuit: cid,
                attempt,
                outcome,
            });
        });
    }

    fn spawn_teardown(&self, handle: CircuitHandle) {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            channel.teardown(handle).await;
        });
    }

    fn on_event(&mut self, event: CircuitEvent) {
        if let EventOutcome::ChannelLost = event.outcome {
            self.active = self.active.saturating_sub(1);
            if let Some(circuit) = self.circuits.remove(&event.circuit) {
                self.aggregator
                    .record(circuit.order_id, CircuitOutcome::Cancelled);
            }
            warn!("control channel lost; draining");
            self.begin_drain(Some(WeaverError::channel_lost(
                "control channel closed mid-run",
            )));
            return;
        }

        // Events from superseded attempts carry no information.
        let current = self
            .circuits
            .get(&event.circuit)
            .is_some_and(|c| c.attempt == event.attempt);
        if !current {
            return;
        }

        match event.outcome {
            EventOutcome::BuiltOk(handle) => self.on_built(event.circuit, handle),
            EventOutcome::BuildFailed(reason) => {
                self.active = self.active.saturating_sub(1);
                self.fail_circuit(event.circuit, reason);
            }
            EventOutcome::StreamOk => {
                self.active = self.active.saturating_sub(1);
                self.finish(event.circuit, CircuitOutcome::Streamed);
            }
            EventOutcome::StreamFailed(reason) => {
                self.active = self.active.saturating_sub(1);
                // The circuit is spent either way; a retry builds a new one.
                let handle = self
                    .circuits
                    .get_mut(&event.circuit)
                    .and_then(|c| c.handle.take());
                if let Some(handle) = handle {
                    self.spawn_teardown(handle);
                }
                self.fail_circuit(event.circuit, reason);
            }
            EventOutcome::ChannelLost => unreachable!("handled above"),
        }
    }

    fn on_built(&mut self, cid: CircuitId, handle: CircuitHandle) {
        let (order_id, destination) = match self.circuits.get_mut(&cid) {
            Some(circuit) => {
                circuit.mark_built(handle.clone());
                (circuit.order_id, circuit.order.destination.clone())
            }
            None => return,
        };

        let cancelled =
            self.orders.get(&order_id).map_or(true, |e| e.cancelled) || self.draining;
        let plan = if cancelled {
            StreamPlan::Skip
        } else {
            plan_stream(&destination)
        };

        match plan {
            StreamPlan::Skip => {
                self.active = self.active.saturating_sub(1);
                if cancelled {
                    self.spawn_teardown(handle);
                }
                self.finish(cid, CircuitOutcome::BuiltOnly);
            }
            StreamPlan::Attach { host, port } => {
                let attempt = match self.circuits.get_mut(&cid) {
                    Some(circuit) => {
                        circuit.mark_extending();
                        circuit.attempt
                    }
                    None => return,
                };
                debug!("{} extending stream to {}:{}", cid, host, port);
                self.spawn_attach(cid, attempt, handle, host, port);
            }
        }
    }

    /// Route a failed circuit through the retry policy.
    fn fail_circuit(&mut self, cid: CircuitId, reason: FailureReason) {
        let stream = matches!(
            reason,
            FailureReason::StreamRejected | FailureReason::StreamTimeout
        );
        let (order_id, attempt) = match self.circuits.get_mut(&cid) {
            Some(circuit) => {
                circuit.mark_failed(stream);
                (circuit.order_id, circuit.attempt)
            }
            None => return,
        };

        let cancelled =
            self.orders.get(&order_id).map_or(true, |e| e.cancelled) || self.draining;
        let decision = if cancelled {
            RetryDecision::GiveUp
        } else {
            self.retry.decide(reason, attempt)
        };

        match decision {
            RetryDecision::Retry => {
                if let Some(circuit) = self.circuits.get_mut(&cid) {
                    circuit.begin_retry();
                    debug!("{} retrying: {} (attempt {})", cid, reason, circuit.attempt);
                    self.queue.push_back(cid);
                }
            }
            RetryDecision::GiveUp => {
                if self.circuits.remove(&cid).is_some() {
                    warn!(
                        "{} giving up after {} attempt(s): {}",
                        cid, attempt, reason
                    );
                    self.aggregator
                        .record(order_id, CircuitOutcome::Failed(reason));
                }
            }
        }
    }

    /// Record a terminal outcome and destroy the circuit.
    fn finish(&mut self, cid: CircuitId, outcome: CircuitOutcome) {
        if let Some(circuit) = self.circuits.remove(&cid) {
            debug!("{} done: {:?}", cid, outcome);
            self.aggregator.record(circuit.order_id, outcome);
        }
    }

    fn notify_idle(&mut self) {
        if self.outstanding() == 0 && !self.idle_waiters.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{
        ExitPolicy, InMemoryDirectory, RelayDescriptor, RelayFlags,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use weaver_common::{Destination, NodeSpec};

    #[derive(Clone, Copy, PartialEq)]
    enum ChannelMode {
        Ok,
        RejectBuilds,
        RejectStreams,
        LoseChannel,
    }

    /// Control channel double that records everything it is asked to do.
    struct TestChannel {
        mode: ChannelMode,
        delay: Duration,
        next_handle: AtomicU64,
        builds: AtomicUsize,
        attaches: AtomicUsize,
        teardowns: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
        build_requests: Mutex<Vec<[String; 3]>>,
    }

    impl TestChannel {
        fn new(mode: ChannelMode, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                mode,
                delay,
                next_handle: AtomicU64::new(1),
                builds: AtomicUsize::new(0),
                attaches: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
                build_requests: Mutex::new(Vec::new()),
            })
        }

        async fn occupy_slot(&self) {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ControlChannel for TestChannel {
        async fn build_circuit(
            &self,
            hops: [HopTarget; 3],
        ) -> Result<CircuitHandle, BuildRefusal> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.occupy_slot().await;
            self.build_requests.lock().unwrap().push([
                hops[0].address().to_string(),
                hops[1].address().to_string(),
                hops[2].address().to_string(),
            ]);
            match self.mode {
                ChannelMode::RejectBuilds => {
                    Err(BuildRefusal::Rejected("synthetic refusal".to_string()))
                }
                ChannelMode::LoseChannel => Err(BuildRefusal::ChannelLost),
                _ => Ok(CircuitHandle::new(
                    self.next_handle.fetch_add(1, Ordering::SeqCst),
                )),
            }
        }

        async fn attach_stream(
            &self,
            _handle: &CircuitHandle,
            _host: &str,
            _port: u16,
        ) -> Result<(), StreamRefusal> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            self.occupy_slot().await;
            match self.mode {
                ChannelMode::RejectStreams => {
                    Err(StreamRefusal::Rejected("synthetic refusal".to_string()))
                }
                _ => Ok(()),
            }
        }

        async fn teardown(&self, _handle: CircuitHandle) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn usable(guard: bool) -> RelayFlags {
        RelayFlags {
            guard,
            running: true,
            valid: true,
            bad_exit: false,
        }
    }

    fn relay(address: &str, guard: bool, exit_policy: ExitPolicy) -> RelayDescriptor {
        RelayDescriptor {
            nickname: address.replace('.', "-"),
            address: address.to_string(),
            flags: usable(guard),
            exit_policy,
        }
    }

    fn directory(relays: usize) -> Arc<InMemoryDirectory> {
        let relays = (0..relays)
            .map(|i| relay(&format!("10.0.1.{}", i), true, ExitPolicy::accept_all()))
            .collect();
        Arc::new(InMemoryDirectory::new(relays))
    }

    fn config(ceiling: usize, retries: u32) -> OrchestratorConfig {
        OrchestratorConfig::new()
            .with_max_inflight(ceiling)
            .with_max_retries(retries)
    }

    #[tokio::test]
    async fn materializes_count_circuits_and_builds_them_all() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(8, 0), directory(10), channel.clone());

        let order = orchestrator.submit(Order::wildcard(9)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let report = orchestrator.report(order).await.unwrap().unwrap();
        assert_eq!(report.built_only, 9);
        assert_eq!(report.total(), 9);
        assert_eq!(channel.builds.load(Ordering::SeqCst), 9);
        // Destination `*` never attaches a stream.
        assert_eq!(channel.attaches.load(Ordering::SeqCst), 0);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_never_exceeded() {
        for ceiling in [1usize, 3] {
            let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(20));
            let orchestrator =
                Orchestrator::spawn(config(ceiling, 0), directory(10), channel.clone());

            orchestrator.submit(Order::wildcard(12)).await.unwrap();
            orchestrator.wait_idle().await.unwrap();

            assert_eq!(channel.builds.load(Ordering::SeqCst), 12);
            assert!(
                channel.max_concurrent.load(Ordering::SeqCst) <= ceiling,
                "ceiling {} was exceeded",
                ceiling
            );
            orchestrator.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn dispatch_is_fifo_across_orders() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(2));
        let orchestrator = Orchestrator::spawn(config(1, 0), directory(10), channel.clone());

        let mut first = Order::wildcard(3);
        first.guard = NodeSpec::Forced("192.0.2.1".to_string());
        let mut second = Order::wildcard(4);
        second.guard = NodeSpec::Forced("192.0.2.2".to_string());

        orchestrator.submit(first).await.unwrap();
        orchestrator.submit(second).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let paths = channel.build_requests.lock().unwrap().clone();
        let guards: Vec<&str> = paths.iter().map(|p| p[0].as_str()).collect();
        assert_eq!(
            guards,
            vec![
                "192.0.2.1",
                "192.0.2.1",
                "192.0.2.1",
                "192.0.2.2",
                "192.0.2.2",
                "192.0.2.2",
                "192.0.2.2",
            ]
        );

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failing_circuit_stops_after_max_retries_plus_one_attempts() {
        let channel = TestChannel::new(ChannelMode::RejectBuilds, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(4, 2), directory(12), channel.clone());

        let order = orchestrator.submit(Order::wildcard(1)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        assert_eq!(channel.builds.load(Ordering::SeqCst), 3);
        let report = orchestrator.report(order).await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 1);
        assert_eq!(
            report.failure_reasons[&FailureReason::BuildRejected],
            1,
            "only the terminal failure is recorded"
        );

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retries_use_a_fresh_relay_set_for_wildcard_hops() {
        let channel = TestChannel::new(ChannelMode::RejectBuilds, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(1, 1), directory(6), channel.clone());

        orchestrator.submit(Order::wildcard(1)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let paths = channel.build_requests.lock().unwrap().clone();
        assert_eq!(paths.len(), 2);
        for first_hop in &paths[0] {
            assert!(
                !paths[1].contains(first_hop),
                "attempt 2 reused relay {}",
                first_hop
            );
        }

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn forced_hops_are_passed_through_verbatim() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(1));
        // Empty directory: any wildcard resolution would fail loudly.
        let empty = Arc::new(InMemoryDirectory::new(vec![]));
        let orchestrator = Orchestrator::spawn(config(2, 0), empty, channel.clone());

        let mut order = Order::wildcard(2);
        order.guard = NodeSpec::Forced("198.51.100.1".to_string());
        order.middle = NodeSpec::Forced("not-even-an-address".to_string());
        order.exit = NodeSpec::Forced("198.51.100.3".to_string());
        // A forced exit skips feasibility checking even with a port.
        order.destination = Destination::Address {
            host: "93.184.216.34".to_string(),
            port: Some(80),
        };

        let id = orchestrator.submit(order).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.streamed, 2);
        let paths = channel.build_requests.lock().unwrap().clone();
        for path in &paths {
            assert_eq!(
                path,
                &[
                    "198.51.100.1".to_string(),
                    "not-even-an-address".to_string(),
                    "198.51.100.3".to_string(),
                ]
            );
        }

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn wildcard_exits_honor_destination_port_feasibility() {
        let mut relays: Vec<RelayDescriptor> = (0..6)
            .map(|i| relay(&format!("10.0.2.{}", i), true, ExitPolicy::accept_all()))
            .collect();
        relays.extend(
            (0..6).map(|i| relay(&format!("10.0.3.{}", i), true, ExitPolicy::reject_all())),
        );
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(
            config(4, 0),
            Arc::new(InMemoryDirectory::new(relays)),
            channel.clone(),
        );

        let mut order = Order::wildcard(10);
        order.destination = Destination::Address {
            host: "8.8.8.8".to_string(),
            port: Some(80),
        };
        let id = orchestrator.submit(order).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.streamed, 10);

        let paths = channel.build_requests.lock().unwrap().clone();
        for path in &paths {
            assert!(
                path[2].starts_with("10.0.2."),
                "exit {} does not permit port 80",
                path[2]
            );
        }

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stream_failures_retry_and_tear_down_the_spent_circuit() {
        let channel = TestChannel::new(ChannelMode::RejectStreams, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(2, 2), directory(12), channel.clone());

        let mut order = Order::wildcard(1);
        order.destination = Destination::Address {
            host: "93.184.216.34".to_string(),
            port: Some(443),
        };
        let id = orchestrator.submit(order).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        assert_eq!(channel.builds.load(Ordering::SeqCst), 3);
        assert_eq!(channel.attaches.load(Ordering::SeqCst), 3);

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.failure_reasons[&FailureReason::StreamRejected], 1);

        // Teardowns are fired asynchronously; give them a beat.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.teardowns.load(Ordering::SeqCst), 3);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn no_eligible_relay_gives_up_after_a_single_retry() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(1));
        let empty = Arc::new(InMemoryDirectory::new(vec![]));
        let orchestrator = Orchestrator::spawn(config(2, 5), empty, channel.clone());

        let id = orchestrator.submit(Order::wildcard(3)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.failure_reasons[&FailureReason::NoEligibleRelay], 3);
        // Resolution fails before any build request is issued.
        assert_eq!(channel.builds.load(Ordering::SeqCst), 0);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_dispatch_but_keeps_partial_progress() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(100));
        let orchestrator = Orchestrator::spawn(config(2, 0), directory(10), channel.clone());

        let id = orchestrator.submit(Order::wildcard(10)).await.unwrap();
        orchestrator.cancel_order(id);
        orchestrator.wait_idle().await.unwrap();

        // Two circuits were dispatched before the cancel command; the rest
        // never entered Building.
        assert_eq!(channel.builds.load(Ordering::SeqCst), 2);

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.cancelled, 8);
        assert_eq!(report.built_only, 2);
        assert_eq!(report.total(), 10);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn build_timeout_is_a_normal_failure() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_secs(5));
        let orchestrator = Orchestrator::spawn(
            config(1, 0).with_build_timeout(Duration::from_secs(1)),
            directory(6),
            channel.clone(),
        );

        let id = orchestrator.submit(Order::wildcard(1)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.failure_reasons[&FailureReason::BuildTimeout], 1);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn lost_channel_drains_and_surfaces_at_shutdown() {
        let channel = TestChannel::new(ChannelMode::LoseChannel, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(2, 3), directory(10), channel.clone());

        let id = orchestrator.submit(Order::wildcard(6)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        // Partial progress stays queryable: every circuit was accounted for.
        let report = orchestrator.report(id).await.unwrap().unwrap();
        assert_eq!(report.total(), 6);
        assert_eq!(report.cancelled, 6);

        let err = orchestrator.shutdown().await.unwrap_err();
        assert!(matches!(err, WeaverError::ChannelLost(_)));
    }

    #[tokio::test]
    async fn snapshot_keeps_orders_independent() {
        let channel = TestChannel::new(ChannelMode::Ok, Duration::from_millis(1));
        let orchestrator = Orchestrator::spawn(config(4, 0), directory(10), channel.clone());

        let first = orchestrator.submit(Order::wildcard(3)).await.unwrap();
        let second = orchestrator.submit(Order::wildcard(5)).await.unwrap();
        orchestrator.wait_idle().await.unwrap();

        let snapshot = orchestrator.snapshot().await.unwrap();
        assert_eq!(snapshot.orders[&first].total(), 3);
        assert_eq!(snapshot.orders[&second].total(), 5);
        assert_eq!(snapshot.total_circuits(), 8);

        orchestrator.shutdown().await.unwrap();
    }
}
