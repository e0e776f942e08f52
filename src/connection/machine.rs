//! Connection state machine and its task

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{Backoff, CommandLink, ConnectionState, Connector, MachineEvent};
use crate::command::CommandRequest;
use crate::config::ClientConfig;
use crate::types::SettingsRequest;
use crate::{Result, SonarError};

/// Number of transitions kept for inspection.
const HISTORY_LEN: usize = 32;

/// Upper bound on chained transitions caused by one event.
const MAX_STEPS_PER_EVENT: usize = 8;

/// Timing parameters for [`ConnectionMachine`].
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub backoff_step: Duration,
    pub backoff_ceiling: Duration,
    pub connect_timeout: Duration,
}

impl MachineConfig {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            backoff_step: config.backoff_step(),
            backoff_ceiling: config.backoff_ceiling(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: Instant,
}

type EventHandler<C> = fn(&mut ConnectionMachine<C>, MachineEvent) -> Dispatch;

/// Outcome of a state's event handler.
enum Dispatch {
    Stay,
    Goto(ConnectionState),
    /// The handler needs the link or connector, which means awaiting
    Attempt(Instant),
    Send(SettingsRequest),
}

/// Handlers for one state.
struct StateHandlers<C: Connector> {
    on_event: EventHandler<C>,
    /// Runs after every event while this state is active
    on_step: fn(&ConnectionMachine<C>) -> Option<ConnectionState>,
}

/// Sequential state machine over the command link.
///
/// Exactly one event is processed at a time. Every transition runs the
/// leave hook of the old state then the enter hook of the new one; moving to
/// the current state does nothing.
pub struct ConnectionMachine<C: Connector> {
    state: ConnectionState,
    connector: C,
    config: MachineConfig,
    target: Option<IpAddr>,
    link: Option<C::Link>,
    backoff: Backoff,
    last_attempt: Option<Instant>,
    latest_settings: Option<SettingsRequest>,
    state_tx: watch::Sender<ConnectionState>,
    history: VecDeque<StateTransition>,
    /// Cuts in-flight connects and sends short once stopping
    interrupt: CancellationToken,
}

impl<C: Connector> ConnectionMachine<C> {
    pub fn new(connector: C, config: MachineConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Start);
        Self {
            state: ConnectionState::Start,
            connector,
            config,
            target: None,
            link: None,
            backoff: Backoff::new(config.backoff_step, config.backoff_ceiling),
            last_attempt: None,
            latest_settings: None,
            state_tx,
            history: VecDeque::with_capacity(HISTORY_LEN),
            interrupt: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn target(&self) -> Option<IpAddr> {
        self.target
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StateTransition> {
        self.history.iter()
    }

    fn handlers(state: ConnectionState) -> StateHandlers<C> {
        match state {
            ConnectionState::Start => {
                StateHandlers { on_event: Self::start_on_event, on_step: Self::no_step }
            }
            ConnectionState::AttemptingConnection => StateHandlers {
                on_event: Self::attempting_on_event,
                on_step: Self::no_step,
            },
            ConnectionState::Connected => StateHandlers {
                on_event: Self::connected_on_event,
                on_step: Self::connected_on_step,
            },
            ConnectionState::ConnectionTerminated => StateHandlers {
                on_event: Self::terminated_on_event,
                on_step: Self::terminated_on_step,
            },
            ConnectionState::End => {
                StateHandlers { on_event: Self::end_on_event, on_step: Self::no_step }
            }
        }
    }

    /// Process one event to completion.
    pub async fn handle(&mut self, event: MachineEvent) {
        trace!(state = %self.state, ?event, "Machine event");

        if let MachineEvent::Stop(ack) = event {
            self.transition(ConnectionState::End).await;
            let _ = ack.send(());
            return;
        }

        let handlers = Self::handlers(self.state);
        match (handlers.on_event)(self, event) {
            Dispatch::Stay => {}
            Dispatch::Goto(next) => self.transition(next).await,
            Dispatch::Attempt(now) => self.attempt_connection(now).await,
            Dispatch::Send(request) => self.send_settings(request).await,
        }

        for _ in 0..MAX_STEPS_PER_EVENT {
            let handlers = Self::handlers(self.state);
            match (handlers.on_step)(self) {
                Some(next) if next != self.state => self.transition(next).await,
                _ => break,
            }
        }
    }

    /// Release everything without waiting for a `Stop` event.
    pub async fn shutdown(&mut self) {
        self.transition(ConnectionState::End).await;
    }

    async fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        let from = self.state;
        self.on_leave(from).await;
        self.state = next;
        self.on_enter(next).await;

        info!(from = %from, to = %next, target = ?self.target, "Connection state changed");
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition { from, to: next, at: Instant::now() });
        self.state_tx.send_replace(next);
    }

    async fn on_leave(&mut self, state: ConnectionState) {
        if state == ConnectionState::AttemptingConnection {
            trace!(failures = self.backoff.failures(), "Leaving connection attempts");
        }
    }

    async fn on_enter(&mut self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                self.backoff.reset();
                if let Some(request) = self.latest_settings.clone() {
                    debug!(cookie = request.cookie, "Re-applying settings after connect");
                    self.send_settings(request).await;
                }
            }
            ConnectionState::ConnectionTerminated | ConnectionState::End => {
                self.release_link().await;
            }
            ConnectionState::Start | ConnectionState::AttemptingConnection => {}
        }
    }

    async fn release_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!("Releasing command link");
            link.close().await;
        }
    }

    /// Record the new target. Returns true if it differs from the old one.
    fn update_target(&mut self, target: Option<IpAddr>) -> bool {
        if self.target == target {
            return false;
        }
        debug!(from = ?self.target, to = ?target, "Target address changed");
        self.target = target;
        self.backoff.reset();
        self.last_attempt = None;
        true
    }

    fn store_settings(&mut self, request: SettingsRequest) {
        if let Some(previous) = &self.latest_settings {
            if previous.cookie > request.cookie {
                debug!(
                    stale = request.cookie,
                    current = previous.cookie,
                    "Ignoring settings older than the latest request"
                );
                return;
            }
        }
        self.latest_settings = Some(request);
    }

    fn start_on_event(&mut self, event: MachineEvent) -> Dispatch {
        match event {
            MachineEvent::AddressChanged(target) => {
                self.update_target(target);
                if self.target.is_some() {
                    Dispatch::Goto(ConnectionState::AttemptingConnection)
                } else {
                    Dispatch::Stay
                }
            }
            MachineEvent::ApplySettings(request) => {
                self.store_settings(request);
                Dispatch::Stay
            }
            MachineEvent::Tick(_) | MachineEvent::Stop(_) => Dispatch::Stay,
        }
    }

    fn attempting_on_event(&mut self, event: MachineEvent) -> Dispatch {
        match event {
            MachineEvent::AddressChanged(target) => {
                if self.update_target(target) {
                    Dispatch::Goto(ConnectionState::ConnectionTerminated)
                } else {
                    Dispatch::Stay
                }
            }
            MachineEvent::Tick(now) => {
                let due = self
                    .last_attempt
                    .is_none_or(|last| now.saturating_duration_since(last) >= self.backoff.current());
                if self.link.is_none() && due { Dispatch::Attempt(now) } else { Dispatch::Stay }
            }
            MachineEvent::ApplySettings(request) => {
                self.store_settings(request);
                Dispatch::Stay
            }
            MachineEvent::Stop(_) => Dispatch::Stay,
        }
    }

    fn connected_on_event(&mut self, event: MachineEvent) -> Dispatch {
        match event {
            MachineEvent::AddressChanged(target) => {
                if self.update_target(target) {
                    Dispatch::Goto(ConnectionState::ConnectionTerminated)
                } else {
                    Dispatch::Stay
                }
            }
            MachineEvent::ApplySettings(request) => Dispatch::Send(request),
            MachineEvent::Tick(_) => {
                // An idle link only learns about a closed peer by looking
                if let Some(link) = self.link.as_mut() {
                    link.poll_closed();
                }
                Dispatch::Stay
            }
            MachineEvent::Stop(_) => Dispatch::Stay,
        }
    }

    fn connected_on_step(&self) -> Option<ConnectionState> {
        match &self.link {
            Some(link) if !link.is_broken() => None,
            _ => Some(ConnectionState::ConnectionTerminated),
        }
    }

    fn terminated_on_event(&mut self, event: MachineEvent) -> Dispatch {
        match event {
            MachineEvent::AddressChanged(target) => {
                self.update_target(target);
                Dispatch::Stay
            }
            MachineEvent::ApplySettings(request) => {
                self.store_settings(request);
                Dispatch::Stay
            }
            MachineEvent::Tick(_) | MachineEvent::Stop(_) => Dispatch::Stay,
        }
    }

    fn terminated_on_step(&self) -> Option<ConnectionState> {
        self.target.map(|_| ConnectionState::AttemptingConnection)
    }

    fn end_on_event(&mut self, event: MachineEvent) -> Dispatch {
        debug!(?event, "Event after end ignored");
        Dispatch::Stay
    }

    fn no_step(&self) -> Option<ConnectionState> {
        None
    }

    async fn attempt_connection(&mut self, now: Instant) {
        let Some(target) = self.target else {
            return;
        };
        self.last_attempt = Some(now);

        let timeout = self.config.connect_timeout;
        let interrupt = self.interrupt.clone();
        let outcome = tokio::select! {
            _ = interrupt.cancelled() => {
                debug!(%target, "Connection attempt interrupted");
                return;
            }
            outcome = tokio::time::timeout(timeout, self.connector.connect(target)) => match outcome {
                Ok(outcome) => outcome,
                Err(_) => Err(SonarError::Timeout { duration: timeout }),
            },
        };

        match outcome {
            Ok(link) => {
                self.link = Some(link);
                self.transition(ConnectionState::Connected).await;
            }
            Err(e) => {
                let delay = self.backoff.record_failure();
                warn!(
                    %target,
                    failures = self.backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Connection attempt failed: {}",
                    e
                );
            }
        }
    }

    async fn send_settings(&mut self, request: SettingsRequest) {
        let cookie = request.cookie;
        self.store_settings(request);
        let Some(latest) = self.latest_settings.as_ref() else {
            return;
        };
        if latest.cookie != cookie {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let command = CommandRequest::settings(&latest.settings, cookie);
        let interrupt = self.interrupt.clone();
        let outcome = tokio::select! {
            _ = interrupt.cancelled() => {
                debug!(cookie, "Settings send interrupted");
                return;
            }
            outcome = link.send(&command) => outcome,
        };
        match outcome {
            Ok(response) if response.is_success() => {
                if let Some(echoed) = response.settings_cookie().filter(|echoed| *echoed != cookie) {
                    warn!(sent = cookie, echoed, "Device echoed a different settings cookie");
                } else {
                    info!(cookie, "Settings accepted");
                }
            }
            Ok(response) => {
                warn!(cookie, status = response.status_line(), "Settings rejected");
            }
            // The step handler sees the broken link and terminates
            Err(e) => warn!(cookie, "Sending settings failed: {}", e),
        }
    }
}

/// Queue sender and state observer for a spawned machine.
pub struct MachineHandle {
    events: mpsc::UnboundedSender<MachineEvent>,
    state: watch::Receiver<ConnectionState>,
    interrupt: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MachineHandle {
    /// Queue an event. Fails once the machine task has ended.
    pub fn send(&self, event: MachineEvent) -> Result<()> {
        self.events.send(event).map_err(|_| SonarError::closed("connection machine"))
    }

    pub fn set_target(&self, target: Option<IpAddr>) -> Result<()> {
        self.send(MachineEvent::AddressChanged(target))
    }

    pub fn apply_settings(&self, request: SettingsRequest) -> Result<()> {
        self.send(MachineEvent::ApplySettings(request))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue sender for tasks that feed the machine on their own.
    pub fn sender(&self) -> mpsc::UnboundedSender<MachineEvent> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ask the machine to stop and wait up to `timeout` for it to confirm.
    ///
    /// A connect or send in flight is abandoned so the `Stop` is reached
    /// without waiting out its timeout. Returns `Ok(())` without waiting if the machine already stopped.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.events.send(MachineEvent::Stop(ack_tx)).is_err() {
            let _ = task.await;
            return Ok(());
        }
        self.interrupt.cancel();

        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(_) => {
                if let Err(e) = task.await {
                    warn!("Connection machine task failed: {}", e);
                }
                Ok(())
            }
            Err(_) => {
                error!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection machine did not acknowledge stop"
                );
                task.abort();
                Err(SonarError::ShutdownTimeout {
                    subsystem: "connection machine".to_string(),
                    duration: timeout,
                })
            }
        }
    }
}

impl Drop for MachineHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run `machine` on its own task.
///
/// The task merges queued events with a tick every `tick_interval`. It ends
/// after a `Stop` event, when every handle is dropped, or when `cancel`
/// fires; in each case the link is released first.
pub fn spawn_machine<C: Connector>(
    mut machine: ConnectionMachine<C>,
    tick_interval: Duration,
    cancel: CancellationToken,
) -> MachineHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let state = machine.subscribe();
    machine.interrupt = cancel.child_token();
    let interrupt = machine.interrupt.clone();
    let task = tokio::spawn(run_machine(machine, events_rx, tick_interval, cancel));
    MachineHandle { events: events_tx, state, interrupt, task: Some(task) }
}

async fn run_machine<C: Connector>(
    mut machine: ConnectionMachine<C>,
    mut events: mpsc::UnboundedReceiver<MachineEvent>,
    tick_interval: Duration,
    cancel: CancellationToken,
) {
    info!("Connection machine started");
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Connection machine cancelled");
                machine.shutdown().await;
                break;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("All machine handles dropped");
                    machine.shutdown().await;
                    break;
                }
            },
            now = ticker.tick() => MachineEvent::Tick(now),
        };

        machine.handle(event).await;
        if machine.state() == ConnectionState::End {
            break;
        }
    }
    info!("Connection machine stopped");
}
