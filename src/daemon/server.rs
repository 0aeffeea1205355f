//! Daemon server - IPC listener and main event loop
//!
//! Each client connection gets its own task. Connection tasks never touch
//! engine state; they forward requests over a channel to the main loop,
//! which is the only writer, and wait for the reply.

use std::time::{Duration, Instant};

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::common::error::IpcError;
use crate::common::{config::Config, paths, Result};
use crate::engine::{ControllerEvent, ControllerSettings, RunController, StoryTree, WatchController};
use crate::ipc::{
    protocol::{Command, Request, Response},
    transport,
};
use crate::runner::{HeadlessRunner, ProcessRunner, RecordingRunner, RunnerExit};

use super::handler::{self, DaemonState};

/// Timer resolution for grace, dwell and debounce
const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Idle connections are dropped after this long
const CLIENT_TIMEOUT: Duration = Duration::from_secs(300);

/// A request on its way from a connection task to the main loop
struct Envelope {
    id: u64,
    command: Command,
    reply: oneshot::Sender<Reply>,
}

enum Reply {
    Response(Response),
    /// Response followed by a stream of events on the same connection
    Subscribed(Response, broadcast::Receiver<ControllerEvent>),
}

/// Main daemon server
pub struct Daemon {
    config: Config,
    state: DaemonState,
    envelopes_tx: mpsc::Sender<Envelope>,
    envelopes_rx: mpsc::Receiver<Envelope>,
    exits_rx: mpsc::UnboundedReceiver<RunnerExit>,
    /// Last activity timestamp for idle timeout
    last_activity: Instant,
    /// Whether shutdown was requested
    shutdown_requested: bool,
}

impl Daemon {
    /// Load config and the story index, and pick a runner
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        let tree = StoryTree::load(&config.index.path)?;
        tracing::info!(
            index = %config.index.path.display(),
            stories = tree.len(),
            "Loaded story index"
        );

        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        let runner: Box<dyn HeadlessRunner> = match ProcessRunner::from_config(&config, exits_tx) {
            Ok(runner) => Box::new(runner),
            Err(e) => {
                tracing::warn!(error = %e, "No headless runner, results must be reported by hand");
                Box::new(RecordingRunner::new())
            }
        };

        let controller = RunController::new(tree, runner, ControllerSettings::from(&config));
        let watch = WatchController::new(config.watch.debounce());
        let (envelopes_tx, envelopes_rx) = mpsc::channel(64);

        Ok(Self {
            config,
            state: DaemonState::new(controller, watch),
            envelopes_tx,
            envelopes_rx,
            exits_rx,
            last_activity: Instant::now(),
            shutdown_requested: false,
        })
    }

    /// Run the daemon main loop
    pub async fn run(&mut self) -> Result<()> {
        let listener = transport::create_listener().await?;
        tracing::info!("Daemon listening on {}", paths::socket_name());

        let idle_timeout = Duration::from_secs(self.config.daemon.idle_timeout_minutes * 60);
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        #[cfg(unix)]
        let mut signals = Signals::new()?;

        loop {
            if self.state.is_quiet() && self.last_activity.elapsed() > idle_timeout {
                tracing::info!("Idle timeout reached, shutting down daemon");
                break;
            }

            if self.shutdown_requested {
                tracing::info!("Shutdown requested, exiting");
                break;
            }

            #[cfg(unix)]
            let stop = self.run_select_loop(&listener, &mut ticker, &mut signals).await;
            #[cfg(not(unix))]
            let stop = self.run_select_loop(&listener, &mut ticker).await;

            if stop {
                break;
            }
        }

        tracing::info!("Cleaning up daemon resources");
        paths::remove_socket()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }

    /// Run one iteration of the select loop, returns true if should break
    #[cfg(unix)]
    async fn run_select_loop(
        &mut self,
        listener: &transport::platform::Listener,
        ticker: &mut tokio::time::Interval,
        signals: &mut Signals,
    ) -> bool {
        tokio::select! {
            _ = signals.sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                true
            }
            _ = signals.sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully");
                true
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                false
            }
            Some(envelope) = self.envelopes_rx.recv() => {
                self.dispatch(envelope);
                false
            }
            Some(exit) = self.exits_rx.recv() => {
                self.state.controller.runner_exited_at(exit, Instant::now());
                false
            }
            _ = ticker.tick() => {
                self.state.tick(Instant::now());
                false
            }
        }
    }

    /// Run one iteration of the select loop (Windows version)
    #[cfg(not(unix))]
    async fn run_select_loop(
        &mut self,
        listener: &transport::platform::Listener,
        ticker: &mut tokio::time::Interval,
    ) -> bool {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down gracefully");
                true
            }
            accept_result = listener.accept() => {
                self.accept(accept_result);
                false
            }
            Some(envelope) = self.envelopes_rx.recv() => {
                self.dispatch(envelope);
                false
            }
            Some(exit) = self.exits_rx.recv() => {
                self.state.controller.runner_exited_at(exit, Instant::now());
                false
            }
            _ = ticker.tick() => {
                self.state.tick(Instant::now());
                false
            }
        }
    }

    fn accept(&mut self, accept_result: std::io::Result<transport::platform::Stream>) {
        match accept_result {
            Ok(stream) => {
                self.last_activity = Instant::now();
                let envelopes = self.envelopes_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = serve_client(stream, envelopes).await {
                        tracing::error!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            }
        }
    }

    /// Apply one request to the engine
    fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { id, command, reply } = envelope;
        let now = Instant::now();
        self.last_activity = now;
        tracing::debug!(command = command.name(), "Received command");

        let reply_value = match command {
            Command::Shutdown => {
                self.shutdown_requested = true;
                Reply::Response(Response::ok(id))
            }
            Command::Subscribe => {
                let events = self.state.controller.subscribe();
                Reply::Subscribed(Response::success(id, self.state.status(now)), events)
            }
            command => Reply::Response(handler::handle_command(&mut self.state, id, command, now)),
        };

        if reply.send(reply_value).is_err() {
            tracing::debug!(id, "Client went away before the reply");
        }
    }
}

#[cfg(unix)]
struct Signals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }
}

/// Handle a single client connection until it disconnects or subscribes
async fn serve_client(stream: transport::platform::Stream, envelopes: mpsc::Sender<Envelope>) -> Result<()> {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    loop {
        let request_data = tokio::select! {
            result = transport::recv_message(&mut reader) => {
                match result {
                    Ok(data) => data,
                    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        tracing::debug!("Client disconnected");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading request: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(CLIENT_TIMEOUT) => {
                tracing::debug!("Client timeout");
                break;
            }
        };

        let request: Request = match serde_json::from_slice(&request_data) {
            Ok(req) => req,
            Err(e) => {
                tracing::error!("Invalid request: {}", e);
                let response = Response::error(
                    0,
                    IpcError {
                        code: "INVALID_REQUEST".to_string(),
                        message: e.to_string(),
                    },
                );
                transport::send_json(&mut writer, &response).await?;
                continue;
            }
        };

        let is_shutdown = matches!(request.command, Command::Shutdown);
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope {
            id: request.id,
            command: request.command,
            reply: reply_tx,
        };
        if envelopes.send(envelope).await.is_err() {
            tracing::debug!("Daemon loop gone, dropping client");
            break;
        }
        let Ok(reply) = reply_rx.await else {
            break;
        };

        match reply {
            Reply::Response(response) => {
                transport::send_json(&mut writer, &response).await?;
                if is_shutdown {
                    break;
                }
            }
            Reply::Subscribed(response, events) => {
                transport::send_json(&mut writer, &response).await?;
                stream_events(&mut writer, events).await;
                break;
            }
        }
    }

    Ok(())
}

/// Push events to a subscriber until it hangs up or the daemon stops
async fn stream_events<W>(writer: &mut W, mut events: broadcast::Receiver<ControllerEvent>)
where
    W: tokio::io::AsyncWriteExt + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = transport::send_json(writer, &event).await {
                    tracing::debug!("Subscriber gone: {}", e);
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // The next snapshot supersedes whatever was missed
                tracing::warn!(skipped, "Subscriber lagging, skipped events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}
