//! Link session driver with persistent channels and automatic reconnection

use crate::link::channel::{LinkChannel, LinkConnector};
use crate::link::machine::{Effect, LinkEvent, LinkMachine, LinkState, ReconnectPolicy};
use crate::link::tick::{plan_tick, InputSnapshot, SpeedEnvelope};
use drover_shared::codec;
use drover_shared::{now_ms, timing, CommandFrame, Telemetry, Twist, VideoFrame};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::interval;
use tracing::{debug, info};

/// Which channel of a rover this session drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Command out, telemetry in; runs both send cadences
    Command,
    /// Video frames in; nothing is sent
    Video,
}

/// Events emitted to the session owner
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Channel is up and cadences are running
    Connected,
    /// Channel went down; a reconnect is scheduled unless released
    Disconnected { reason: String },
    /// Valid telemetry from the rover
    Telemetry(Telemetry),
}

/// Configuration for one link session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rover_id: String,
    /// Rover endpoint for this channel kind, for diagnostics
    pub address: String,
    pub kind: ChannelKind,
    pub reconnect: ReconnectPolicy,
    pub envelope: SpeedEnvelope,
}

impl SessionConfig {
    /// Command channel with the standard fixed retry delay
    pub fn command(rover_id: String, address: String) -> Self {
        Self {
            rover_id,
            address,
            kind: ChannelKind::Command,
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(
                timing::LINK_RETRY_DELAY_MS,
            )),
            envelope: SpeedEnvelope::default(),
        }
    }

    /// Video channel with the standard fixed retry delay
    pub fn video(rover_id: String, address: String) -> Self {
        Self {
            rover_id,
            address,
            kind: ChannelKind::Video,
            reconnect: ReconnectPolicy::Fixed(Duration::from_millis(
                timing::LINK_RETRY_DELAY_MS,
            )),
            envelope: SpeedEnvelope::default(),
        }
    }
}

enum Control {
    Release,
}

/// Per-session record shared between the cadence loops, the receive path,
/// and the owner. Single writer per field: the command loop writes
/// `last_send_ms`, the receive path writes `latency_ms` and `last_video`.
#[derive(Default)]
struct SessionShared {
    last_send_ms: AtomicU64,
    latency_ms: AtomicU64,
    connected: AtomicBool,
    last_video: Mutex<Option<VideoFrame>>,
}

/// One owned channel to one rover
///
/// Dropping the handle, or calling [`release`](Self::release), tears the
/// session down; both are safe to race with a remote close.
pub struct LinkSession {
    rover_id: String,
    kind: ChannelKind,
    shared: Arc<SessionShared>,
    input_tx: watch::Sender<InputSnapshot>,
    oneshot_tx: mpsc::UnboundedSender<CommandFrame>,
    control_tx: mpsc::UnboundedSender<Control>,
    event_rx: mpsc::Receiver<SessionEvent>,
}

impl LinkSession {
    /// Open a session and start its connection loop
    pub fn open<C: LinkConnector>(config: SessionConfig, connector: C) -> Self {
        let shared = Arc::new(SessionShared::default());
        let (input_tx, input_rx) = watch::channel(InputSnapshot::default());
        let (oneshot_tx, oneshot_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(100);

        let rover_id = config.rover_id.clone();
        let kind = config.kind;
        let loop_shared = shared.clone();
        tokio::spawn(async move {
            session_loop(
                config, connector, loop_shared, input_rx, oneshot_rx, control_rx, event_tx,
            )
            .await;
        });

        Self {
            rover_id,
            kind,
            shared,
            input_tx,
            oneshot_tx,
            control_tx,
            event_rx,
        }
    }

    /// Publish the latest operator intent; the command loop reads it fresh
    /// each tick
    pub fn update_input(&self, snapshot: InputSnapshot) {
        let _ = self.input_tx.send(snapshot);
    }

    /// Send a single frame outside the cadences (EStopRelease, SetMode)
    pub fn send_frame(&self, frame: CommandFrame) {
        let _ = self.oneshot_tx.send(frame);
    }

    /// Receive the next session event
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Rolling latency estimate in milliseconds
    pub fn latency_ms(&self) -> u64 {
        self.shared.latency_ms.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Latest decoded video frame on a video channel; cleared on close
    pub async fn last_video(&self) -> Option<VideoFrame> {
        self.shared.last_video.lock().await.clone()
    }

    pub fn rover_id(&self) -> &str {
        &self.rover_id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Tear the session down; safe to call more than once
    pub fn release(&self) {
        let _ = self.control_tx.send(Control::Release);
    }
}

/// Outcome of one connected phase
enum ChannelOutcome {
    Closed(String),
    Released,
}

async fn session_loop<C: LinkConnector>(
    config: SessionConfig,
    connector: C,
    shared: Arc<SessionShared>,
    input_rx: watch::Receiver<InputSnapshot>,
    mut oneshot_rx: mpsc::UnboundedReceiver<CommandFrame>,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let mut machine = LinkMachine::new(config.reconnect);
    let mut pending = machine.handle(LinkEvent::ConnectRequested);

    loop {
        let mut open_channel = false;
        let mut retry_after = None;

        for effect in pending.drain(..) {
            match effect {
                Effect::OpenChannel => open_channel = true,
                Effect::ScheduleRetry(delay) => retry_after = Some(delay),
                Effect::StartCadences => shared.connected.store(true, Ordering::Relaxed),
                Effect::StopCadences => shared.connected.store(false, Ordering::Relaxed),
                Effect::DropVideoState => *shared.last_video.lock().await = None,
                Effect::CancelRetry => retry_after = None,
            }
        }

        if machine.state() == LinkState::Released {
            break;
        }

        if open_channel {
            pending = tokio::select! {
                result = connector.connect() => match result {
                    Ok(channel) => {
                        let opened = machine.handle(LinkEvent::ChannelOpened);
                        if opened.contains(&Effect::StartCadences) {
                            shared.connected.store(true, Ordering::Relaxed);
                        }
                        info!("Link up: {} ({} channel)", config.rover_id, connector.name());
                        let _ = event_tx.send(SessionEvent::Connected).await;

                        let outcome = run_channel(
                            channel,
                            &config,
                            &shared,
                            &input_rx,
                            &mut oneshot_rx,
                            &mut control_rx,
                            &event_tx,
                        )
                        .await;

                        match outcome {
                            ChannelOutcome::Closed(reason) => {
                                info!("Link to {} closed: {}", config.rover_id, reason);
                                let _ = event_tx
                                    .send(SessionEvent::Disconnected {
                                        reason: reason.clone(),
                                    })
                                    .await;
                                machine.handle(LinkEvent::ChannelClosed)
                            }
                            ChannelOutcome::Released => machine.handle(LinkEvent::Released),
                        }
                    }
                    Err(error) => {
                        debug!("Connect to {} failed: {}", config.address, error);
                        machine.handle(LinkEvent::ChannelClosed)
                    }
                },
                _ = control_rx.recv() => machine.handle(LinkEvent::Released),
            };
        } else if let Some(delay) = retry_after {
            pending = tokio::select! {
                _ = tokio::time::sleep(delay) => machine.handle(LinkEvent::RetryTimerFired),
                _ = control_rx.recv() => machine.handle(LinkEvent::Released),
            };
        } else {
            // Nothing scheduled; only a release can move the machine now
            let _ = control_rx.recv().await;
            pending = machine.handle(LinkEvent::Released);
        }
    }

    debug!("Link session for {} ended", config.rover_id);
}

/// Drive one live channel until it closes or the owner releases
async fn run_channel<Ch: LinkChannel>(
    mut channel: Ch,
    config: &SessionConfig,
    shared: &SessionShared,
    input_rx: &watch::Receiver<InputSnapshot>,
    oneshot_rx: &mut mpsc::UnboundedReceiver<CommandFrame>,
    control_rx: &mut mpsc::UnboundedReceiver<Control>,
    event_tx: &mpsc::Sender<SessionEvent>,
) -> ChannelOutcome {
    let is_command = config.kind == ChannelKind::Command;

    if is_command {
        // Converge the rover to a stop before the cadences take over
        let frame = codec::encode_command(&CommandFrame::Twist(Twist::zero()));
        if let Err(error) = channel.send(frame).await {
            return ChannelOutcome::Closed(format!("Initial send failed: {}", error));
        }
        shared.last_send_ms.store(now_ms(), Ordering::Relaxed);
    }

    let mut command_tick = interval(Duration::from_millis(timing::COMMAND_INTERVAL_MS));
    let mut heartbeat_tick = interval(Duration::from_millis(timing::HEARTBEAT_INTERVAL_MS));

    loop {
        tokio::select! {
            _ = command_tick.tick(), if is_command => {
                let snapshot = *input_rx.borrow();
                for frame in plan_tick(&snapshot, &config.envelope) {
                    if let Err(error) = channel.send(codec::encode_command(&frame)).await {
                        return ChannelOutcome::Closed(format!("Send failed: {}", error));
                    }
                }
                // Only the command loop writes the send timestamp
                shared.last_send_ms.store(now_ms(), Ordering::Relaxed);
            }

            _ = heartbeat_tick.tick(), if is_command => {
                let frame = codec::encode_command(&CommandFrame::Heartbeat);
                if let Err(error) = channel.send(frame).await {
                    return ChannelOutcome::Closed(format!("Heartbeat failed: {}", error));
                }
            }

            // Out-of-band frames bypass the cadences
            Some(frame) = oneshot_rx.recv(), if is_command => {
                if let Err(error) = channel.send(codec::encode_command(&frame)).await {
                    return ChannelOutcome::Closed(format!("Send failed: {}", error));
                }
            }

            incoming = channel.recv() => {
                match incoming {
                    Some(data) => handle_frame(&data, config, shared, event_tx).await,
                    None => return ChannelOutcome::Closed("Closed by peer".into()),
                }
            }

            _ = control_rx.recv() => {
                channel.close().await;
                return ChannelOutcome::Released;
            }
        }
    }
}

/// Decode one inbound frame; anything undecodable or unexpected is dropped
async fn handle_frame(
    data: &[u8],
    config: &SessionConfig,
    shared: &SessionShared,
    event_tx: &mpsc::Sender<SessionEvent>,
) {
    match config.kind {
        ChannelKind::Command => {
            if let Some(telemetry) = codec::decode_telemetry(data) {
                // Only the receive path writes the latency estimate
                let sent = shared.last_send_ms.load(Ordering::Relaxed);
                if sent > 0 {
                    shared
                        .latency_ms
                        .store(now_ms().saturating_sub(sent), Ordering::Relaxed);
                }
                // A lagging owner loses stale telemetry instead of queueing it
                let _ = event_tx.try_send(SessionEvent::Telemetry(telemetry));
            }
        }
        ChannelKind::Video => {
            if let Some(frame) = codec::decode_video_frame(data) {
                *shared.last_video.lock().await = Some(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use bytes::Bytes;
    use drover_shared::{Mode, Pose, Velocity};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedChannel {
        incoming: mpsc::UnboundedReceiver<Bytes>,
        sent: mpsc::UnboundedSender<Bytes>,
    }

    #[async_trait::async_trait]
    impl LinkChannel for ScriptedChannel {
        async fn send(&mut self, frame: Bytes) -> anyhow::Result<()> {
            self.sent.send(frame).map_err(|_| anyhow!("sink gone"))
        }

        async fn recv(&mut self) -> Option<Bytes> {
            self.incoming.recv().await
        }

        async fn close(&mut self) {}
    }

    struct ScriptedConnector {
        channels: Mutex<VecDeque<ScriptedChannel>>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl LinkConnector for ScriptedConnector {
        type Channel = ScriptedChannel;

        async fn connect(&self) -> anyhow::Result<Self::Channel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.channels
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow!("connection refused"))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct ChannelProbe {
        to_session: mpsc::UnboundedSender<Bytes>,
        from_session: mpsc::UnboundedReceiver<Bytes>,
    }

    fn scripted(count: usize) -> (ScriptedConnector, Vec<ChannelProbe>, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let mut channels = VecDeque::new();
        let mut probes = Vec::new();
        for _ in 0..count {
            let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            channels.push_back(ScriptedChannel {
                incoming: incoming_rx,
                sent: sent_tx,
            });
            probes.push(ChannelProbe {
                to_session: incoming_tx,
                from_session: sent_rx,
            });
        }
        let connector = ScriptedConnector {
            channels: Mutex::new(channels),
            attempts: attempts.clone(),
        };
        (connector, probes, attempts)
    }

    fn drain(probe: &mut ChannelProbe) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Ok(frame) = probe.from_session.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn command_config() -> SessionConfig {
        SessionConfig::command("bvr-01".into(), "ws://test".into())
    }

    fn sample_telemetry() -> Telemetry {
        Telemetry {
            mode: Mode::Teleop,
            pose: Pose::default(),
            battery_voltage: 24.6,
            timestamp_ms: 123,
            velocity: Velocity::default(),
            motor_temps: [30.0; 4],
            motor_currents: [1.0; 4],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_converges_then_runs_cadences() {
        let (connector, mut probes, _) = scripted(1);
        let mut session = LinkSession::open(command_config(), connector);

        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));
        tokio::time::sleep(Duration::from_millis(105)).await;

        let frames = drain(&mut probes[0]);
        assert_eq!(
            codec::decode_command(&frames[0]),
            Some(CommandFrame::Twist(Twist::zero()))
        );

        let twists = frames
            .iter()
            .filter(|f| matches!(codec::decode_command(f), Some(CommandFrame::Twist(_))))
            .count();
        let heartbeats = frames
            .iter()
            .filter(|f| codec::decode_command(f) == Some(CommandFrame::Heartbeat))
            .count();
        assert!(twists >= 10, "expected a 10ms cadence, saw {} twists", twists);
        assert!(heartbeats >= 1);
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_estop_is_the_only_command_on_the_wire() {
        let (connector, mut probes, _) = scripted(1);
        let session = LinkSession::open(command_config(), connector);
        session.update_input(InputSnapshot {
            twist: Twist {
                linear: 1.0,
                angular: 0.4,
                boost: true,
            },
            estop: true,
            attended: true,
            ..Default::default()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;

        let frames = drain(&mut probes[0]);
        let mut estops = 0;
        // Frame 0 is the converge twist sent before the cadences start
        for frame in frames.iter().skip(1) {
            match codec::decode_command(frame) {
                Some(CommandFrame::EStop) => {
                    assert_eq!(frame.len(), 1);
                    estops += 1;
                }
                Some(CommandFrame::Heartbeat) => {}
                other => panic!("unexpected frame during estop: {:?}", other),
            }
        }
        assert!(estops >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_is_forwarded_and_garbage_dropped() {
        let (connector, probes, _) = scripted(1);
        let mut session = LinkSession::open(command_config(), connector);
        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));

        // Garbage must not produce an event or kill the channel
        probes[0]
            .to_session
            .send(Bytes::from_static(&[0xFF, 1, 2, 3]))
            .expect("session alive");
        probes[0]
            .to_session
            .send(codec::encode_telemetry(&sample_telemetry()))
            .expect("session alive");

        match session.recv().await {
            Some(SessionEvent::Telemetry(telemetry)) => {
                assert_eq!(telemetry.battery_voltage, 24.6);
                assert_eq!(telemetry.mode, Mode::Teleop);
            }
            other => panic!("expected telemetry, got {:?}", other),
        }
        assert!(session.latency_ms() < 10_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_fixed_delay() {
        let (connector, mut probes, attempts) = scripted(2);
        let mut session = LinkSession::open(command_config(), connector);
        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));

        // Drop the first channel out from under the session
        probes.remove(0);
        assert!(matches!(
            session.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_stops_reconnect_even_racing_a_close() {
        let (connector, probes, attempts) = scripted(1);
        let session = LinkSession::open(command_config(), connector);
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.release();
        session.release();
        drop(probes);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_video_channel_holds_latest_frame_and_drops_it_on_close() {
        let (connector, mut probes, _) = scripted(1);
        let config = SessionConfig::video("bvr-01".into(), "ws://test".into());
        let mut session = LinkSession::open(config, connector);
        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));

        let first = VideoFrame {
            timestamp_ms: 7,
            width: 640,
            height: 480,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        let second = VideoFrame {
            timestamp_ms: 8,
            ..first.clone()
        };
        probes[0]
            .to_session
            .send(codec::encode_video_frame(&first))
            .expect("session alive");
        probes[0]
            .to_session
            .send(codec::encode_video_frame(&second))
            .expect("session alive");
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(session.last_video().await, Some(second));
        // A video channel never sends
        assert!(drain(&mut probes[0]).is_empty());

        probes.clear();
        assert!(matches!(
            session.recv().await,
            Some(SessionEvent::Disconnected { .. })
        ));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(session.last_video().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_band_frames_reach_the_wire() {
        let (connector, mut probes, _) = scripted(1);
        let mut session = LinkSession::open(command_config(), connector);
        assert!(matches!(session.recv().await, Some(SessionEvent::Connected)));

        session.send_frame(CommandFrame::EStopRelease);
        session.send_frame(CommandFrame::SetMode(Mode::Autonomous));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let frames = drain(&mut probes[0]);
        assert!(frames
            .iter()
            .any(|f| codec::decode_command(f) == Some(CommandFrame::EStopRelease)));
        assert!(frames
            .iter()
            .any(|f| codec::decode_command(f) == Some(CommandFrame::SetMode(Mode::Autonomous))));
    }
}
