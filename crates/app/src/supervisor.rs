//! Session supervisor — owns the lifecycle of every adapter.
//!
//! Each started adapter gets its own runner task. The runner drives the
//! session state machine, serves submissions from the router one at a time,
//! and restarts the adapter with bounded exponential backoff when it fails.
//! Shutdown is cooperative: a watch flag is raised, every runner cancels
//! its in-flight work, calls `stop()` and exits, and the supervisor waits
//! for all of them before returning.

mod backoff;
mod tracker;

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use vibelink_domain::error::AdapterError;
use vibelink_domain::event::AdapterEvent;
use vibelink_domain::id::SessionId;
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

use crate::config::SupervisorConfig;
use crate::event_bus::InProcessEventBus;
use crate::ports::{AdapterContext, Capability, ProtocolAdapter};
use crate::router::{Router, SessionHandle, Submission};

pub use backoff::Backoff;
pub use tracker::SessionTracker;

struct Runner {
    protocol: Protocol,
    session: SessionId,
    task: JoinHandle<()>,
}

/// Starts, restarts and stops protocol adapters.
pub struct Supervisor {
    config: SupervisorConfig,
    events: mpsc::Sender<AdapterEvent>,
    bus: InProcessEventBus,
    router: Router,
    shutdown: watch::Sender<bool>,
    runners: Vec<Runner>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        config: SupervisorConfig,
        events: mpsc::Sender<AdapterEvent>,
        bus: InProcessEventBus,
        router: Router,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            events,
            bus,
            router,
            shutdown,
            runners: Vec::new(),
        }
    }

    /// Probe an adapter and, if its transport is available, start running it.
    ///
    /// Unavailable or disabled adapters are logged and skipped; the returned
    /// [`Capability`] tells the caller which case applied.
    pub async fn spawn_adapter<A>(&mut self, adapter: A) -> Capability
    where
        A: ProtocolAdapter + Sync + 'static,
    {
        let protocol = adapter.protocol();
        let capability = adapter.probe().await;
        match &capability {
            Capability::Available => {}
            Capability::Unavailable(reason) => {
                tracing::warn!(%protocol, %reason, "adapter unavailable on this platform, skipping");
                return capability;
            }
            Capability::Disabled(reason) => {
                tracing::info!(%protocol, %reason, "adapter disabled");
                return capability;
            }
        }

        let tracker = SessionTracker::new(protocol, self.events.clone());
        let (outbox, inbox) = mpsc::channel(self.config.outbox_capacity.max(1));
        self.router
            .attach(SessionHandle::new(&tracker, outbox))
            .await;

        let (faults_tx, faults) = mpsc::unbounded_channel();
        let ctx = AdapterContext::new(
            tracker.clone(),
            self.events.clone(),
            faults_tx,
            self.bus.clone(),
        );
        let runner = AdapterRunner {
            backoff: Backoff::new(self.config.backoff_initial(), self.config.backoff_max()),
            adapter,
            ctx,
            tracker: tracker.clone(),
            inbox,
            faults,
            shutdown: self.shutdown.subscribe(),
            config: self.config.clone(),
        };
        let session = tracker.id();
        tracing::info!(%protocol, %session, "adapter session spawned");
        self.runners.push(Runner {
            protocol,
            session,
            task: tokio::spawn(runner.run()),
        });
        capability
    }

    /// Sessions of the running adapters.
    #[must_use]
    pub fn sessions(&self) -> Vec<(Protocol, SessionId)> {
        self.runners
            .iter()
            .map(|runner| (runner.protocol, runner.session))
            .collect()
    }

    /// Stop every adapter and wait for them, up to the stop deadline.
    ///
    /// Runners still busy after the deadline are aborted.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        let deadline = tokio::time::Instant::now() + self.config.stop_timeout();
        for runner in self.runners {
            let abort = runner.task.abort_handle();
            match tokio::time::timeout_at(deadline, runner.task).await {
                Ok(Ok(())) => {
                    tracing::debug!(protocol = %runner.protocol, "adapter runner finished");
                }
                Ok(Err(err)) => {
                    tracing::error!(protocol = %runner.protocol, %err, "adapter runner panicked");
                }
                Err(_) => {
                    tracing::warn!(protocol = %runner.protocol, "adapter did not stop in time, aborting");
                    abort.abort();
                }
            }
            self.router.detach(runner.session).await;
        }
        tracing::info!("all adapters stopped");
    }
}

enum Exit {
    Shutdown,
    Fault(AdapterError),
}

struct AdapterRunner<A> {
    adapter: A,
    ctx: AdapterContext,
    tracker: SessionTracker,
    inbox: mpsc::Receiver<Submission>,
    faults: mpsc::UnboundedReceiver<AdapterError>,
    shutdown: watch::Receiver<bool>,
    config: SupervisorConfig,
    backoff: Backoff,
}

impl<A: ProtocolAdapter> AdapterRunner<A> {
    async fn run(mut self) {
        let protocol = self.tracker.protocol();
        loop {
            match self.run_once().await {
                Exit::Shutdown => break,
                Exit::Fault(AdapterError::CapabilityUnavailable(reason)) => {
                    tracing::warn!(%protocol, %reason, "adapter lost its transport, disabling");
                    self.fail().await;
                    break;
                }
                Exit::Fault(err) => {
                    tracing::warn!(%protocol, error = %err, "adapter session failed");
                    self.fail().await;
                    if self.pause(self.config.error_cooldown()).await {
                        break;
                    }
                    self.set_state(ConnectionState::Disconnected).await;
                    let delay = self.backoff.next_delay();
                    tracing::info!(
                        %protocol,
                        attempt = self.backoff.attempt(),
                        failures = self.tracker.consecutive_failures(),
                        ?delay,
                        "restarting adapter"
                    );
                    if self.pause(delay).await {
                        break;
                    }
                }
            }
        }

        self.adapter.stop().await;
        self.drain();
        self.tracker.release_all();
        self.set_state(ConnectionState::Disconnected).await;
        tracing::info!(%protocol, "adapter stopped");
    }

    async fn run_once(&mut self) -> Exit {
        while self.faults.try_recv().is_ok() {}
        self.drain();
        if *self.shutdown.borrow() {
            return Exit::Shutdown;
        }
        self.set_state(ConnectionState::Discovering).await;

        let connect = self.config.connect_timeout();
        let started = tokio::select! {
            biased;
            () = stop_requested(&mut self.shutdown) => return Exit::Shutdown,
            result = tokio::time::timeout(connect, self.adapter.start(self.ctx.clone())) => result,
        };
        match started {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Exit::Fault(err),
            Err(_) => return Exit::Fault(AdapterError::Timeout(connect)),
        }

        if !self.adapter.connects_in_background()
            && self.tracker.state() != ConnectionState::Connected
        {
            if let Err(err) = self.tracker.set(ConnectionState::Connected).await {
                return Exit::Fault(AdapterError::Protocol(err.to_string()));
            }
        }
        self.backoff.reset();
        self.serve().await
    }

    async fn serve(&mut self) -> Exit {
        loop {
            tokio::select! {
                biased;
                () = stop_requested(&mut self.shutdown) => return Exit::Shutdown,
                Some(fault) = self.faults.recv() => return Exit::Fault(fault),
                submission = self.inbox.recv() => {
                    let Some(Submission { actuation, reply }) = submission else {
                        return Exit::Shutdown;
                    };
                    let write = self.config.write_timeout();
                    let result = tokio::select! {
                        biased;
                        () = stop_requested(&mut self.shutdown) => {
                            let _ = reply.send(Err(AdapterError::Unavailable));
                            return Exit::Shutdown;
                        }
                        result = tokio::time::timeout(write, self.adapter.submit(&actuation)) => {
                            result.unwrap_or(Err(AdapterError::Timeout(write)))
                        }
                    };
                    if let Err(err) = &result {
                        tracing::debug!(device = %actuation.device, %err, "write failed");
                    }
                    let _ = reply.send(result);
                }
            }
        }
    }

    /// Release the transport after a failure and park the session in `Error`.
    async fn fail(&mut self) {
        self.adapter.stop().await;
        self.drain();
        self.tracker.release_all();
        self.set_state(ConnectionState::Error).await;
    }

    /// Answer every queued submission with `Unavailable`.
    fn drain(&mut self) {
        while let Ok(submission) = self.inbox.try_recv() {
            let _ = submission.reply.send(Err(AdapterError::Unavailable));
        }
    }

    /// Sleep for `duration`; returns `true` if shutdown was requested meanwhile.
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            () = stop_requested(&mut self.shutdown) => true,
            () = tokio::time::sleep(duration) => false,
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        if let Err(err) = self.tracker.set(state).await {
            tracing::debug!(protocol = %self.tracker.protocol(), %err, "ignored session transition");
        }
    }
}

/// Resolves once shutdown is requested or the supervisor is gone.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
