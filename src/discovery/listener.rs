//! Beacon socket and availability tracker tasks

use futures::{Stream, StreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::decoder::decode_beacon;
use super::registry::{AvailabilityChange, DeviceRegistry};
use crate::config::ClientConfig;
use crate::types::Beacon;
use crate::{Result, SonarError};

const MAX_BEACON_SIZE: usize = 2048;
const EVENT_CAPACITY: usize = 64;
const QUEUE_CAPACITY: usize = 256;

/// Inputs to the tracker task, processed strictly in arrival order.
enum TrackerEvent {
    Beacon(Beacon),
    Stop(oneshot::Sender<()>),
}

/// Listens for beacons and reports which devices are available.
///
/// Two tasks run behind the listener. The receive task owns the socket and
/// decodes datagrams. The tracker task owns the [`DeviceRegistry`] and is the
/// only code that touches it; it merges decoded beacons with a periodic tick
/// and publishes changes.
pub struct AvailabilityListener {
    local_addr: SocketAddr,
    queue: mpsc::Sender<TrackerEvent>,
    events: broadcast::Sender<AvailabilityChange>,
    devices: watch::Receiver<Vec<Beacon>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
    stopped: bool,
}

impl AvailabilityListener {
    /// Listen on the configured beacon port on all interfaces.
    pub async fn bind(config: &ClientConfig) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.beacon_port));
        Self::bind_to(addr, config).await
    }

    /// Listen on an explicit address, using `config` for timing.
    pub async fn bind_to(addr: SocketAddr, config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let socket = bind_beacon_socket(addr)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| SonarError::io_error("reading beacon socket address", e))?;

        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (devices_tx, devices_rx) = watch::channel(Vec::new());
        let cancel = CancellationToken::new();

        let registry = DeviceRegistry::new(config.availability_timeout());
        let tracker = tokio::spawn(track_availability(
            registry,
            queue_rx,
            events_tx.clone(),
            devices_tx,
            config.tick_interval(),
        ));
        let receiver = tokio::spawn(receive_beacons(socket, queue_tx.clone(), cancel.clone()));

        info!(
            %local_addr,
            timeout_ms = config.availability_timeout_ms,
            "Availability listener started"
        );

        Ok(Self {
            local_addr,
            queue: queue_tx,
            events: events_tx,
            devices: devices_rx,
            cancel,
            tasks: vec![receiver, tracker],
            shutdown_timeout: config.shutdown_timeout(),
            stopped: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stream of availability changes from now on.
    ///
    /// A subscriber that falls behind skips the events it missed; the
    /// [`devices`](Self::devices) snapshot is always current.
    pub fn events(&self) -> impl Stream<Item = AvailabilityChange> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(change) => Some(change),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Availability subscriber lagged");
                    None
                }
            }
        })
    }

    /// Raw receiver for callers that need to notice lag themselves.
    pub fn subscribe(&self) -> broadcast::Receiver<AvailabilityChange> {
        self.events.subscribe()
    }

    /// Latest beacon of every available device.
    pub fn devices(&self) -> Vec<Beacon> {
        self.devices.borrow().clone()
    }

    /// Watch channel carrying the device snapshot.
    pub fn devices_watch(&self) -> watch::Receiver<Vec<Beacon>> {
        self.devices.clone()
    }

    /// Resolve the latest beacon for `serial_number`, waiting up to `timeout`
    /// for it to appear.
    pub async fn wait_for(&self, serial_number: u32, timeout: Duration) -> Result<Beacon> {
        // Subscribe before reading the snapshot; the tracker updates the
        // snapshot before it publishes.
        let mut events = self.events.subscribe();
        if let Some(beacon) = self.find(serial_number) {
            return Ok(beacon);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(
                        AvailabilityChange::BeginAvailability(beacon)
                        | AvailabilityChange::AddressChanged(beacon),
                    ) if beacon.serial_number == serial_number => return Ok(beacon),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if let Some(beacon) = self.find(serial_number) {
                            return Ok(beacon);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SonarError::closed("availability listener"));
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| SonarError::Timeout { duration: timeout })?
    }

    fn find(&self, serial_number: u32) -> Option<Beacon> {
        self.devices
            .borrow()
            .iter()
            .find(|beacon| beacon.serial_number == serial_number)
            .cloned()
    }

    /// Stop both tasks and release the socket.
    ///
    /// The tracker drains beacons queued ahead of the stop request before
    /// acknowledging. Later calls return `Ok(())` without doing anything.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let (ack_tx, ack_rx) = oneshot::channel();
        let acknowledged = async {
            self.queue.send(TrackerEvent::Stop(ack_tx)).await.ok()?;
            ack_rx.await.ok()
        };
        let outcome = tokio::time::timeout(self.shutdown_timeout, acknowledged).await;

        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Availability task failed: {}", e);
                }
            }
        }

        match outcome {
            Ok(_) => {
                info!("Availability listener stopped");
                Ok(())
            }
            Err(_) => {
                error!(
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "Availability tracker did not acknowledge stop"
                );
                Err(SonarError::ShutdownTimeout {
                    subsystem: "availability tracker".to_string(),
                    duration: self.shutdown_timeout,
                })
            }
        }
    }
}

impl Drop for AvailabilityListener {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn bind_beacon_socket(addr: SocketAddr) -> Result<UdpSocket> {
    let context = || format!("binding beacon socket {}", addr);
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| SonarError::io_error(context(), e))?;
    // Other tools on the same host may also be listening for beacons
    socket.set_reuse_address(true).map_err(|e| SonarError::io_error(context(), e))?;
    socket.set_broadcast(true).map_err(|e| SonarError::io_error(context(), e))?;
    socket.set_nonblocking(true).map_err(|e| SonarError::io_error(context(), e))?;
    socket.bind(&addr.into()).map_err(|e| SonarError::io_error(context(), e))?;
    UdpSocket::from_std(socket.into()).map_err(|e| SonarError::io_error(context(), e))
}

async fn receive_beacons(
    socket: UdpSocket,
    queue: mpsc::Sender<TrackerEvent>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; MAX_BEACON_SIZE];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buffer) => received,
        };

        let (len, source) = match received {
            Ok(received) => received,
            Err(e) => {
                warn!("Beacon socket receive error: {}", e);
                continue;
            }
        };

        match decode_beacon(&buffer[..len], source, Instant::now()) {
            Ok(beacon) => {
                trace!(serial = beacon.serial_number, %source, "Beacon");
                if queue.send(TrackerEvent::Beacon(beacon)).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(%source, len, "Dropping malformed beacon: {}", e),
        }
    }
    debug!("Beacon receiver stopped");
}

async fn track_availability(
    mut registry: DeviceRegistry,
    mut queue: mpsc::Receiver<TrackerEvent>,
    events: broadcast::Sender<AvailabilityChange>,
    devices: watch::Sender<Vec<Beacon>>,
    tick_interval: Duration,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let changes = tokio::select! {
            event = queue.recv() => match event {
                Some(TrackerEvent::Beacon(beacon)) => {
                    let heard_at = beacon.received_at;
                    let change = registry.on_beacon(beacon, heard_at);
                    // Refresh on every beacon so the snapshot carries the latest readings
                    devices.send_replace(registry.devices());
                    change.into_iter().collect::<Vec<_>>()
                }
                Some(TrackerEvent::Stop(ack)) => {
                    let _ = ack.send(());
                    break;
                }
                None => break,
            },
            now = ticker.tick() => {
                let changes = registry.on_tick(now);
                if !changes.is_empty() {
                    devices.send_replace(registry.devices());
                }
                changes
            }
        };

        for change in changes {
            // No subscribers is not an error
            let _ = events.send(change);
        }
    }
    debug!(known = registry.len(), "Availability tracker stopped");
}
