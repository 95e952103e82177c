//! Test doubles shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, mpsc};

use vibelink_domain::actuation::ChannelRange;
use vibelink_domain::channel::Channel;
use vibelink_domain::command::{Ack, AckStatus, Actuation};
use vibelink_domain::device::DeviceDescriptor;
use vibelink_domain::error::AdapterError;
use vibelink_domain::event::AdapterEvent;
use vibelink_domain::id::SessionId;
use vibelink_domain::protocol::Protocol;
use vibelink_domain::session::ConnectionState;

use crate::ports::{AdapterContext, Capability, ProtocolAdapter};

#[derive(Default)]
pub(crate) struct FakeLog {
    pub starts: u32,
    pub stops: u32,
    pub submitted: Vec<Actuation>,
    pub announced: Vec<DeviceDescriptor>,
    pub ctx: Option<AdapterContext>,
}

/// In-memory adapter that records every call.
pub(crate) struct FakeAdapter {
    protocol: Protocol,
    capability: Capability,
    start_results: VecDeque<Result<(), AdapterError>>,
    hang_on_start: bool,
    hang_on_submit: bool,
    background_connect: bool,
    log: Arc<Mutex<FakeLog>>,
    submit_started: Arc<Notify>,
}

impl FakeAdapter {
    pub(crate) fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            capability: Capability::Available,
            start_results: VecDeque::new(),
            hang_on_start: false,
            hang_on_submit: false,
            background_connect: false,
            log: Arc::default(),
            submit_started: Arc::default(),
        }
    }

    pub(crate) fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = capability;
        self
    }

    /// Results returned by successive `start` calls; later calls succeed.
    pub(crate) fn with_start_results(
        mut self,
        results: VecDeque<Result<(), AdapterError>>,
    ) -> Self {
        self.start_results = results;
        self
    }

    /// A single-channel device announced on every start.
    pub(crate) fn with_device(self, id: &str, levels: u32) -> Self {
        let descriptor = DeviceDescriptor::builder()
            .id(id)
            .protocol(self.protocol)
            .channel(Channel::vibration(0, ChannelRange::steps(levels)))
            .build()
            .unwrap();
        self.log.lock().unwrap().announced.push(descriptor);
        self
    }

    pub(crate) fn hanging_on_start(mut self) -> Self {
        self.hang_on_start = true;
        self
    }

    pub(crate) fn hanging_on_submit(mut self) -> Self {
        self.hang_on_submit = true;
        self
    }

    /// Leave the session in `Discovering`; the test drives it further
    /// through the recorded context.
    pub(crate) fn connecting_in_background(mut self) -> Self {
        self.background_connect = true;
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<FakeLog>> {
        Arc::clone(&self.log)
    }

    pub(crate) fn submit_started(&self) -> Arc<Notify> {
        Arc::clone(&self.submit_started)
    }
}

impl ProtocolAdapter for FakeAdapter {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn probe(&self) -> Capability {
        self.capability.clone()
    }

    fn connects_in_background(&self) -> bool {
        self.background_connect
    }

    async fn start(&mut self, ctx: AdapterContext) -> Result<(), AdapterError> {
        let announced = {
            let mut log = self.log.lock().unwrap();
            log.starts += 1;
            log.ctx = Some(ctx.clone());
            log.announced.clone()
        };
        if self.hang_on_start {
            std::future::pending::<()>().await;
        }
        if let Some(result) = self.start_results.pop_front() {
            result?;
        }
        for descriptor in announced {
            ctx.discovered(descriptor).await;
        }
        Ok(())
    }

    async fn submit(&mut self, actuation: &Actuation) -> Result<Ack, AdapterError> {
        self.submit_started.notify_one();
        if self.hang_on_submit {
            std::future::pending::<()>().await;
        }
        self.log.lock().unwrap().submitted.push(actuation.clone());
        Ok(Ack::new(actuation, AckStatus::Delivered))
    }

    async fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }
}

/// Skip events until the next session state change and return its target.
pub(crate) async fn next_state(events: &mut mpsc::Receiver<AdapterEvent>) -> ConnectionState {
    loop {
        match events.recv().await {
            Some(AdapterEvent::StateChanged { to, .. }) => return to,
            Some(_) => {}
            None => panic!("adapter event channel closed"),
        }
    }
}

/// Skip events until the next discovery and return the reporting session.
pub(crate) async fn next_discovery(events: &mut mpsc::Receiver<AdapterEvent>) -> SessionId {
    loop {
        match events.recv().await {
            Some(AdapterEvent::DeviceDiscovered { session, .. }) => return session,
            Some(_) => {}
            None => panic!("adapter event channel closed"),
        }
    }
}
