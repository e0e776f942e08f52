//! Controller facade over the frame receiver and the connection machine

use futures::Stream;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::command::ChannelOptions;
use crate::config::ClientConfig;
use crate::connection::{
    ConnectionMachine, ConnectionState, MachineConfig, MachineEvent, MachineHandle, TcpConnector,
    spawn_machine,
};
use crate::discovery::{AvailabilityChange, AvailabilityListener};
use crate::frame::{AssemblerStats, FrameListener};
use crate::types::{AcquisitionSettings, Beacon, Frame, SettingsRequest};

/// Streams frames from one device and keeps its command link alive.
///
/// `start` binds the frame socket and spawns two tasks: the frame receiver
/// and the connection machine. The controller only talks to them through
/// channels.
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use sonarlink::{ClientConfig, Controller};
///
/// # #[tokio::main]
/// # async fn main() -> sonarlink::Result<()> {
/// let mut controller = Controller::start(ClientConfig::default(), None).await?;
/// controller.set_target_address(Some("192.168.1.24".parse().unwrap()))?;
///
/// let mut frames = controller.frames().expect("first call");
/// while let Some(frame) = frames.next().await {
///     println!("frame {} ({} beams)", frame.frame_index(), frame.beam_count());
/// }
/// controller.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Controller {
    config: ClientConfig,
    frames: FrameListener,
    machine: MachineHandle,
    next_cookie: AtomicU32,
    cancel: CancellationToken,
    follower: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Controller {
    /// Bind the frame socket and start connecting to `target` if given.
    pub async fn start(config: ClientConfig, target: Option<IpAddr>) -> Result<Self> {
        config.validate()?;

        let frame_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.frame_port));
        let frames = FrameListener::bind(frame_addr).await?;
        let frame_port = frames.local_addr().port();

        let connector =
            TcpConnector::new(config.command_port, ChannelOptions::from_config(&config, frame_port));
        let machine = ConnectionMachine::new(connector, MachineConfig::from_config(&config));
        let cancel = CancellationToken::new();
        let machine = spawn_machine(machine, config.tick_interval(), cancel.child_token());

        if target.is_some() {
            machine.set_target(target)?;
        }

        info!(frame_port, command_port = config.command_port, ?target, "Controller started");
        Ok(Self {
            config,
            frames,
            machine,
            next_cookie: AtomicU32::new(1),
            cancel,
            follower: None,
            stopped: false,
        })
    }

    /// Queue settings for the device and return the cookie that frames will
    /// echo once they are in effect.
    ///
    /// Settings go out immediately when connected and are re-sent on every
    /// reconnect until newer settings replace them.
    pub fn apply_settings(&self, settings: AcquisitionSettings) -> Result<u32> {
        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
        self.machine.apply_settings(SettingsRequest::new(cookie, settings))?;
        debug!(cookie, "Settings queued");
        Ok(cookie)
    }

    /// Point the controller at a device, or pass `None` to disconnect.
    pub fn set_target_address(&self, target: Option<IpAddr>) -> Result<()> {
        self.machine.set_target(target)
    }

    /// Take the frame stream. Only the first call returns a stream.
    pub fn frames(&mut self) -> Option<impl Stream<Item = Frame> + Send + 'static> {
        self.frames.frames()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.machine.subscribe()
    }

    /// Local UDP port the device streams frames to.
    pub fn frame_port(&self) -> u16 {
        self.frames.local_addr().port()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Keep the target address in sync with the beacons of `serial_number`.
    ///
    /// Replaces any previous follow. The device's current address is used
    /// right away if it is already known.
    pub fn follow(&mut self, listener: &AvailabilityListener, serial_number: u32) {
        if let Some(previous) = self.follower.take() {
            previous.abort();
        }
        let task = tokio::spawn(follow_device(
            serial_number,
            listener.subscribe(),
            listener.devices_watch(),
            self.machine.sender(),
            self.cancel.child_token(),
        ));
        self.follower = Some(task);
    }

    /// Stop the connection machine and the frame receiver.
    ///
    /// Waits up to the configured shutdown timeout for the machine to
    /// acknowledge; I/O tasks are cancelled either way. Returns the frame
    /// receiver counters. Later calls return `Ok(None)`.
    pub async fn stop(&mut self) -> Result<Option<AssemblerStats>> {
        if self.stopped {
            return Ok(None);
        }
        self.stopped = true;

        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
        let machine = self.machine.stop(self.config.shutdown_timeout()).await;
        self.cancel.cancel();
        let stats = self.frames.stop().await;

        machine?;
        info!("Controller stopped");
        Ok(stats)
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(follower) = self.follower.take() {
            follower.abort();
        }
    }
}

async fn follow_device(
    serial_number: u32,
    mut events: broadcast::Receiver<AvailabilityChange>,
    devices: watch::Receiver<Vec<Beacon>>,
    machine: mpsc::UnboundedSender<MachineEvent>,
    cancel: CancellationToken,
) {
    let current = |devices: &watch::Receiver<Vec<Beacon>>| {
        devices
            .borrow()
            .iter()
            .find(|beacon| beacon.serial_number == serial_number)
            .map(|beacon| beacon.source.ip())
    };

    let mut target = current(&devices);
    if target.is_some() && machine.send(MachineEvent::AddressChanged(target)).is_err() {
        return;
    }
    info!(serial_number, ?target, "Following device");

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };

        let next = match received {
            Ok(AvailabilityChange::BeginAvailability(beacon))
            | Ok(AvailabilityChange::AddressChanged(beacon))
                if beacon.serial_number == serial_number =>
            {
                Some(beacon.source.ip())
            }
            Ok(AvailabilityChange::EndAvailability(serial)) if serial == serial_number => None,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Device follower lagged, resyncing from snapshot");
                current(&devices)
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Availability listener closed");
                break;
            }
        };

        if next != target {
            target = next;
            if machine.send(MachineEvent::AddressChanged(target)).is_err() {
                break;
            }
        }
    }
    debug!(serial_number, "Device follower stopped");
}
