//! End-to-end tests against a fake device on loopback
//!
//! The fake device answers the command protocol over TCP and streams frames
//! over UDP to the port announced in the initialize handshake.

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use sonarlink::discovery::encode_beacon;
use sonarlink::frame::encode_packet;
use sonarlink::{
    AcquisitionSettings, AvailabilityListener, Beacon, BeaconVariant, ClientConfig,
    ConnectionAvailability, ConnectionState, Controller, FRAME_HEADER_SIZE, FrameHeader, PingMode,
    SettingsAppliedExt, SoftwareVersion, SystemType,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, UdpSocket};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const WAIT: Duration = Duration::from_secs(5);

struct DeviceSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    frame_target: SocketAddr,
    frames: UdpSocket,
}

impl DeviceSession {
    /// Accept the client and complete the initialize handshake.
    async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept()).await??;
        let (read_half, write_half) = stream.into_split();
        let mut session = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            frame_target: SocketAddr::from((LOCALHOST, 0)),
            frames: UdpSocket::bind((LOCALHOST, 0)).await?,
        };

        let handshake = session.read_request().await?;
        if handshake.first().map(String::as_str) != Some("initialize") {
            bail!("expected initialize, got {:?}", handshake);
        }
        let port: u16 = handshake
            .iter()
            .find_map(|line| line.strip_prefix("rcvr_port "))
            .context("handshake without rcvr_port")?
            .parse()?;
        session.frame_target = SocketAddr::from((LOCALHOST, port));
        session.reply("200 OK").await?;
        Ok(session)
    }

    async fn read_request(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if tokio::time::timeout(WAIT, self.reader.read_line(&mut line)).await?? == 0 {
                bail!("client closed the command channel");
            }
            let line = line.trim_end().to_string();
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    async fn reply(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(format!("{}\n\n", text).as_bytes()).await?;
        Ok(())
    }

    async fn send_frame(&self, index: u32, applied_settings: u32) -> Result<()> {
        let mut header = FrameHeader::new(index, PingMode::Mode1, 128);
        header.applied_settings = applied_settings;
        let samples: Vec<u8> = (0..header.sample_bytes()).map(|i| i as u8).collect();
        let frame_size = (FRAME_HEADER_SIZE + samples.len()) as u32;

        self.frames
            .send_to(&encode_packet(index, 0, frame_size, &header.to_bytes()), self.frame_target)
            .await?;
        for (part, chunk) in samples.chunks(1400).enumerate() {
            let datagram = encode_packet(index, part as u32 + 1, frame_size, chunk);
            self.frames.send_to(&datagram, self.frame_target).await?;
            // Pace the parts so loopback buffers never overflow
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

fn config(command_port: u16) -> ClientConfig {
    ClientConfig {
        command_port,
        tick_interval_ms: 20,
        availability_timeout_ms: 500,
        backoff_step_ms: 50,
        backoff_ceiling_ms: 250,
        ..ClientConfig::default()
    }
}

async fn wait_for_state(controller: &Controller, state: ConnectionState) -> Result<()> {
    let mut states = controller.connection_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == state)).await??;
    Ok(())
}

#[tokio::test]
async fn settings_take_effect_on_streamed_frames() -> Result<()> {
    let device = TcpListener::bind((LOCALHOST, 0)).await?;
    let mut controller =
        Controller::start(config(device.local_addr()?.port()), Some(LOCALHOST)).await?;
    let mut session = DeviceSession::accept(&device).await?;
    wait_for_state(&controller, ConnectionState::Connected).await?;

    let settings = AcquisitionSettings::builder(SystemType::Aris1800)
        .ping_mode(PingMode::Mode1)
        .samples_per_beam(128)
        .build()?;
    let cookie = controller.apply_settings(settings)?;

    let request = session.read_request().await?;
    assert_eq!(request.first().map(String::as_str), Some("set_acquire"));
    assert_eq!(request.last(), Some(&format!("settings_cookie {}", cookie)));
    session.reply(&format!("200 OK\nsettings_cookie {}", cookie)).await?;

    let mut frames = controller.frames().context("frame stream")?.after_cookie(cookie).boxed();
    assert!(controller.frames().is_none());

    session.send_frame(1, 0).await?;
    session.send_frame(2, cookie).await?;

    let frame = tokio::time::timeout(WAIT, frames.next()).await?.context("stream ended")?;
    assert_eq!(frame.frame_index(), 2);
    assert_eq!(frame.header().applied_settings, cookie);
    assert!(frame.header().reordered_samples);
    assert_eq!(frame.beam_count(), 48);

    let stats = controller.stop().await?.context("first stop returns stats")?;
    assert_eq!(stats.completed, 2);
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::End);
    assert!(controller.stop().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn reconnects_after_device_drops_connection() -> Result<()> {
    let device = TcpListener::bind((LOCALHOST, 0)).await?;
    let mut controller =
        Controller::start(config(device.local_addr()?.port()), Some(LOCALHOST)).await?;

    let settings = AcquisitionSettings::builder(SystemType::Aris1800).build()?;
    let cookie = controller.apply_settings(settings)?;

    let mut first = DeviceSession::accept(&device).await?;
    let request = first.read_request().await?;
    assert_eq!(request.last(), Some(&format!("settings_cookie {}", cookie)));
    drop(first);

    // A send on the dead link breaks it, and the machine reconnects
    let refresh = AcquisitionSettings::builder(SystemType::Aris1800).frame_rate(5.0).build()?;
    let second_cookie = controller.apply_settings(refresh)?;
    assert!(second_cookie > cookie);

    // The reconnect re-applies whichever request is latest by then, so the
    // first cookie may be repeated before the second arrives
    let mut second = DeviceSession::accept(&device).await?;
    let expected = format!("settings_cookie {}", second_cookie);
    loop {
        let request = second.read_request().await?;
        second.reply("200 OK").await?;
        if request.last() == Some(&expected) {
            break;
        }
    }
    wait_for_state(&controller, ConnectionState::Connected).await?;

    controller.stop().await?;
    Ok(())
}

#[tokio::test]
async fn idle_connection_closed_by_device_reconnects() -> Result<()> {
    let device = TcpListener::bind((LOCALHOST, 0)).await?;
    let mut controller =
        Controller::start(config(device.local_addr()?.port()), Some(LOCALHOST)).await?;
    let first = DeviceSession::accept(&device).await?;
    wait_for_state(&controller, ConnectionState::Connected).await?;

    // No request is in flight when the device goes away
    drop(first);
    let mut states = controller.connection_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s != ConnectionState::Connected)).await??;

    let _second = DeviceSession::accept(&device).await?;
    wait_for_state(&controller, ConnectionState::Connected).await?;

    controller.stop().await?;
    Ok(())
}

#[tokio::test]
async fn stop_while_device_is_unreachable_is_prompt() -> Result<()> {
    // Accepts nothing and never answers: the handshake hangs until stopped
    let device = TcpListener::bind((LOCALHOST, 0)).await?;
    let config = ClientConfig {
        connect_timeout_ms: 10_000,
        response_timeout_ms: 10_000,
        ..config(device.local_addr()?.port())
    };
    let mut controller = Controller::start(config, Some(LOCALHOST)).await?;
    let mut states = controller.connection_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == ConnectionState::AttemptingConnection))
        .await??;

    tokio::time::timeout(WAIT, controller.stop()).await??;
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::End);
    Ok(())
}

#[tokio::test]
async fn follow_connects_to_announced_device() -> Result<()> {
    let device = TcpListener::bind((LOCALHOST, 0)).await?;
    let config = config(device.local_addr()?.port());

    let mut listener =
        AvailabilityListener::bind_to(SocketAddr::from((LOCALHOST, 0)), &config).await?;
    let mut controller = Controller::start(config, None).await?;
    controller.follow(&listener, 24);
    assert_eq!(*controller.connection_state().borrow(), ConnectionState::Start);

    let beacon = Beacon {
        received_at: tokio::time::Instant::now(),
        source: SocketAddr::from((LOCALHOST, 0)),
        system_type: SystemType::Aris3000,
        serial_number: 24,
        software_version: SoftwareVersion { major: 2, minor: 8, build: 4100 },
        connection_availability: ConnectionAvailability::Available,
        cpu_temp: 38.0,
        variant: BeaconVariant::Voyager,
    };
    let announcer = UdpSocket::bind((LOCALHOST, 0)).await?;
    announcer.send_to(&encode_beacon(&beacon), listener.local_addr()).await?;

    let _session = DeviceSession::accept(&device).await?;
    wait_for_state(&controller, ConnectionState::Connected).await?;

    // Silence ends availability and the follower drops the target
    wait_for_state(&controller, ConnectionState::ConnectionTerminated).await?;

    controller.stop().await?;
    listener.stop().await?;
    Ok(())
}
