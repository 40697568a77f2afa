//! TCP link to the emWave sensor process.
//!
//! [`ConnectionManager`] owns the socket. It connects with bounded linear
//! backoff, splits inbound text into frames for the session, and writes the
//! pulse-sensor commands queued by [`SessionHandle`].

use crate::config::{Config, RetryConfig};
use crate::core::FinalizeOutcome;
use crate::diagnostics::SharedDiagnosticsLog;
use crate::protocol::{FrameAssembler, SensorCommand};
use crate::session::{
    AgentEvent, CoherenceSubscriber, ConnectionStatus, SharedSession, StageError,
    TelemetrySession,
};
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// Lifecycle of the sensor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Attempt number, starting at 1
    Connecting { attempt: u32 },
    Connected,
    /// Retries exhausted; terminal
    PermanentFailure,
}

/// What to do after a connection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp,
}

/// Retry bookkeeping for the sensor link.
///
/// The budget covers the whole life of the manager; a successful connection
/// does not refill it.
#[derive(Debug)]
pub struct ReconnectState {
    failures: u32,
    max_attempts: u32,
    backoff_step: Duration,
    state: ConnectionState,
}

impl ReconnectState {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            failures: 0,
            max_attempts: config.max_attempts,
            backoff_step: config.backoff_step,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn begin_attempt(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting {
            attempt: self.failures + 1,
        };
        self.state
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Record a failure; retry `n` waits `n * backoff_step`.
    pub fn on_error(&mut self) -> RetryDecision {
        if self.state == ConnectionState::PermanentFailure {
            return RetryDecision::GiveUp;
        }

        self.failures += 1;
        if self.failures < self.max_attempts {
            self.state = ConnectionState::Disconnected;
            RetryDecision::Retry {
                attempt: self.failures + 1,
                delay: self.backoff_step * self.failures,
            }
        } else {
            self.state = ConnectionState::PermanentFailure;
            RetryDecision::GiveUp
        }
    }
}

/// Why a served connection ended.
enum LinkEnd {
    Shutdown,
    Lost(io::Error),
}

/// Owns the socket to the sensor process and drives the retry loop.
pub struct ConnectionManager {
    address: String,
    retry: RetryConfig,
    session: SharedSession,
    commands: mpsc::UnboundedReceiver<SensorCommand>,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Create the manager, the host-facing handle and the event stream.
    pub fn new(
        config: &Config,
        diagnostics: SharedDiagnosticsLog,
    ) -> (Self, SessionHandle, Receiver<AgentEvent>) {
        let (events_tx, events_rx) = unbounded();
        let session = Arc::new(Mutex::new(TelemetrySession::new(
            config,
            events_tx,
            diagnostics,
        )));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let handle = SessionHandle {
            session: session.clone(),
            commands: commands_tx,
            shutdown: Arc::new(shutdown_tx),
            state: state_rx,
        };

        let manager = Self {
            address: config.address(),
            retry: config.retry.clone(),
            session,
            commands: commands_rx,
            shutdown: shutdown_rx,
            state: state_tx,
        };

        (manager, handle, events_rx)
    }

    /// Connect over TCP and serve until shutdown or permanent failure.
    pub async fn run(self) -> ConnectionState {
        self.run_with(|address: String| TcpStream::connect(address))
            .await
    }

    /// Run the retry loop with a caller-supplied connect function.
    pub async fn run_with<C, Fut, S>(mut self, mut connect: C) -> ConnectionState
    where
        C: FnMut(String) -> Fut,
        Fut: Future<Output = io::Result<S>>,
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut retry = ReconnectState::new(&self.retry);

        loop {
            if *self.shutdown.borrow() {
                return self.finish(ConnectionState::Disconnected);
            }

            self.publish(retry.begin_attempt());
            let attempt = tokio::select! {
                result = connect(self.address.clone()) => result,
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    return self.finish(ConnectionState::Disconnected);
                }
            };

            match attempt {
                Ok(stream) => {
                    retry.on_connected();
                    self.publish(ConnectionState::Connected);
                    info!(address = %self.address, "connected to sensor");
                    self.session.lock().emit_status(ConnectionStatus::Connected);

                    match self.serve(stream).await {
                        LinkEnd::Shutdown => return self.finish(ConnectionState::Disconnected),
                        LinkEnd::Lost(e) => warn!(error = %e, "sensor connection lost"),
                    }
                }
                // The sensor app is usually still starting on the first try
                Err(e) if retry.failures() == 0 => {
                    debug!(error = %e, "first sensor connection attempt failed")
                }
                Err(e) => warn!(error = %e, "sensor network error"),
            }

            match retry.on_error() {
                RetryDecision::Retry { attempt, delay } => {
                    if attempt > 2 {
                        info!(attempt, delay_secs = delay.as_secs(), "retrying sensor connection");
                    }
                    self.publish(retry.state());
                    if !self.backoff(delay).await {
                        return self.finish(ConnectionState::Disconnected);
                    }
                }
                RetryDecision::GiveUp => {
                    error!(
                        attempts = retry.failures(),
                        address = %self.address,
                        "could not connect to sensor; giving up"
                    );
                    self.session
                        .lock()
                        .emit_status(ConnectionStatus::ConnectionFailure);
                    return self.finish(ConnectionState::PermanentFailure);
                }
            }
        }
    }

    /// Pump frames and commands until the link drops or shutdown is requested.
    async fn serve<S>(&mut self, stream: S) -> LinkEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut assembler = FrameAssembler::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        if let Some(command) = self.latest_queued_command() {
            if let Err(e) = write_command(&mut writer, command).await {
                return LinkEnd::Lost(e);
            }
        }

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => return LinkEnd::Shutdown,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return LinkEnd::Shutdown;
                    };
                    if let Err(e) = write_command(&mut writer, command).await {
                        return LinkEnd::Lost(e);
                    }
                }
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        return LinkEnd::Lost(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "sensor closed the connection",
                        ));
                    }
                    Ok(n) => {
                        let frames = assembler.push(&buf[..n]);
                        if !frames.is_empty() {
                            let mut session = self.session.lock();
                            for frame in &frames {
                                session.handle_frame(frame);
                            }
                        }
                    }
                    Err(e) => return LinkEnd::Lost(e),
                },
            }
        }
    }

    /// Collapse commands queued while disconnected to the most recent one.
    ///
    /// Start and stop set the pulse sensor to a level, so only the last
    /// request still reflects what the host wants.
    fn latest_queued_command(&mut self) -> Option<SensorCommand> {
        let mut latest = None;
        let mut skipped = 0usize;
        while let Ok(command) = self.commands.try_recv() {
            if latest.replace(command).is_some() {
                skipped += 1;
            }
        }
        if skipped > 0 {
            debug!(skipped, "dropped superseded sensor commands queued while disconnected");
        }
        latest
    }

    /// Wait out a retry delay; false if shutdown arrived first.
    async fn backoff(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_for_shutdown(&mut self.shutdown) => false,
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn finish(&self, state: ConnectionState) -> ConnectionState {
        self.publish(state);
        state
    }
}

async fn write_command<W>(writer: &mut W, command: SensorCommand) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    debug!(command = command.as_wire(), "writing sensor command");
    writer.write_all(command.as_wire().as_bytes()).await?;
    writer.flush().await
}

/// Resolves once shutdown is requested or every handle is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Host-facing control surface for a running session.
///
/// Control calls update session state immediately. Pulse-sensor commands are
/// written at once while connected. Commands issued while the link is down are
/// not replayed in full: on (re)connect only the most recent one is written,
/// so a stale start/stop pair never reaches the sensor.
#[derive(Clone)]
pub struct SessionHandle {
    session: SharedSession,
    commands: mpsc::UnboundedSender<SensorCommand>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    pub fn start_collection(&self) {
        self.session.lock().start_collection();
        self.send(SensorCommand::StartPulseSensor);
    }

    pub fn stop_collection(&self) -> FinalizeOutcome {
        let outcome = self.session.lock().stop_collection();
        self.send(SensorCommand::StopPulseSensor);
        outcome
    }

    pub fn regime_changed(&self, session_start_offset_ms: u64, descriptor: serde_json::Value) {
        self.session
            .lock()
            .regime_changed(session_start_offset_ms, descriptor);
    }

    pub fn set_stage(&self, stage: i64) -> Result<(), StageError> {
        self.session.lock().set_stage(stage)
    }

    pub fn subscribe(&self, callback: CoherenceSubscriber) {
        self.session.lock().subscribe(callback);
    }

    pub fn is_collecting(&self) -> bool {
        self.session.lock().is_collecting()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Stop delivering samples and close the socket.
    pub fn shutdown(&self) {
        self.session.lock().deactivate();
        self.shutdown.send_replace(true);
    }

    fn send(&self, command: SensorCommand) {
        if self.commands.send(command).is_err() {
            debug!(command = command.as_wire(), "connection task has exited; command dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::create_shared_log;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::DuplexStream;

    fn fast_config() -> Config {
        Config {
            retry: RetryConfig {
                max_attempts: 7,
                backoff_step: Duration::from_millis(1),
            },
            ..Config::default()
        }
    }

    fn statuses(rx: &Receiver<AgentEvent>) -> Vec<ConnectionStatus> {
        rx.try_iter()
            .filter_map(|event| match event {
                AgentEvent::Status(status) => Some(status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_backoff_schedule() {
        let mut retry = ReconnectState::new(&RetryConfig::default());
        for n in 1..7u32 {
            assert_eq!(
                retry.on_error(),
                RetryDecision::Retry {
                    attempt: n + 1,
                    delay: Duration::from_secs(10 * n as u64),
                }
            );
        }
        assert_eq!(retry.on_error(), RetryDecision::GiveUp);
        assert_eq!(retry.state(), ConnectionState::PermanentFailure);

        // Terminal: no further retries
        assert_eq!(retry.on_error(), RetryDecision::GiveUp);
        assert_eq!(retry.failures(), 7);
    }

    #[test]
    fn test_attempt_numbering() {
        let mut retry = ReconnectState::new(&RetryConfig::default());
        assert_eq!(
            retry.begin_attempt(),
            ConnectionState::Connecting { attempt: 1 }
        );
        retry.on_error();
        assert_eq!(
            retry.begin_attempt(),
            ConnectionState::Connecting { attempt: 2 }
        );
        retry.on_connected();
        assert_eq!(retry.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_seven_failures_emit_one_connection_failure() {
        let (manager, handle, events) = ConnectionManager::new(&fast_config(), create_shared_log());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let state = manager
            .run_with(move |_address| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<DuplexStream, _>(io::Error::from(io::ErrorKind::ConnectionRefused))
                }
            })
            .await;

        assert_eq!(state, ConnectionState::PermanentFailure);
        assert_eq!(attempts.load(Ordering::SeqCst), 7);
        assert_eq!(statuses(&events), vec![ConnectionStatus::ConnectionFailure]);
        assert_eq!(handle.connection_state(), ConnectionState::PermanentFailure);
    }

    #[tokio::test]
    async fn test_success_on_third_attempt() {
        let (manager, handle, events) = ConnectionManager::new(&fast_config(), create_shared_log());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let (client, _sensor) = tokio::io::duplex(1024);
        let client = Arc::new(Mutex::new(Some(client)));

        let task = tokio::spawn(manager.run_with(move |_address| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let stream = if n >= 2 { client.lock().take() } else { None };
            async move {
                stream.ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        }));

        for _ in 0..200 {
            if handle.connection_state() == ConnectionState::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.connection_state(), ConnectionState::Connected);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(statuses(&events), vec![ConnectionStatus::Connected]);

        handle.shutdown();
        let state = task.await.unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_only_latest_queued_command_written_on_connect() {
        let (manager, handle, _events) = ConnectionManager::new(&fast_config(), create_shared_log());
        let (client, mut sensor) = tokio::io::duplex(1024);
        let client = Arc::new(Mutex::new(Some(client)));

        // Issued before the link is up
        handle.start_collection();
        handle.stop_collection();
        handle.start_collection();

        let task = tokio::spawn(manager.run_with(move |_address| {
            let stream = client.lock().take();
            async move {
                stream.ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        }));

        let mut wire = [0u8; 12];
        sensor.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire, b"<CMD ID=2 />");

        // Live commands follow directly, with nothing stale in between
        handle.stop_collection();
        sensor.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire, b"<CMD ID=3 />");

        handle.shutdown();
        assert_eq!(task.await.unwrap(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let config = Config {
            retry: RetryConfig {
                max_attempts: 7,
                backoff_step: Duration::from_secs(3600),
            },
            ..Config::default()
        };
        let (manager, handle, events) = ConnectionManager::new(&config, create_shared_log());

        let task = tokio::spawn(manager.run_with(|_address| async {
            Err::<DuplexStream, _>(io::Error::from(io::ErrorKind::ConnectionRefused))
        }));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();

        let state = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("backoff did not block shutdown")
            .unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(statuses(&events).is_empty());
    }
}
