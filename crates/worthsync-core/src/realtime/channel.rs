use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, warn};
use url::Url;

use crate::dispatch::Dispatcher;
use crate::error::SyncError;

use super::machine::{ChannelEvent, ChannelMachine, ChannelState, Command};
use super::transport::{Connector, Socket, TransportEvent};

type Connecting = BoxFuture<'static, Result<Box<dyn Socket>, SyncError>>;

/// Long-lived push connection that feeds invalidations to a `Dispatcher`.
///
/// Owns at most one socket and at most one reconnect timer at any time.
/// Transport failures never reach consumers; they only move the channel to
/// `Disconnected` until the fixed reconnect delay elapses.
pub struct RealtimeChannel;

impl RealtimeChannel {
    /// Start the channel on the current tokio runtime.
    pub fn spawn(
        url: Url,
        connector: Arc<dyn Connector>,
        dispatcher: Arc<Dispatcher>,
        reconnect_delay: Duration,
    ) -> ChannelHandle {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (stop_tx, stop_rx) = oneshot::channel();

        let driver = Driver {
            url,
            connector,
            dispatcher,
            machine: ChannelMachine::new(reconnect_delay),
            state_tx,
            socket: None,
            connecting: None,
            reconnect: None,
        };
        let task = tokio::spawn(driver.run(stop_rx));

        ChannelHandle {
            state_rx,
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Control handle for a running `RealtimeChannel`.
pub struct ChannelHandle {
    state_rx: watch::Receiver<ChannelState>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Wait until the channel reaches `state`. Returns `false` if the
    /// channel task ended first.
    pub async fn wait_for(&mut self, state: ChannelState) -> bool {
        self.state_rx.wait_for(|current| *current == state).await.is_ok()
    }

    /// Cancel any pending reconnect, close the socket and wait for the
    /// channel task to finish.
    pub async fn stop(mut self) {
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Realtime channel task failed");
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        // Without an explicit stop the task still sees the sender drop
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

enum Wake {
    Stop,
    Timer,
    Connected(Result<Box<dyn Socket>, SyncError>),
    Transport(Option<TransportEvent>),
}

struct Driver {
    url: Url,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<Dispatcher>,
    machine: ChannelMachine,
    state_tx: watch::Sender<ChannelState>,
    socket: Option<Box<dyn Socket>>,
    connecting: Option<Connecting>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl Driver {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        let commands = self.machine.start();
        self.execute(commands).await;

        while self.machine.state() != ChannelState::Stopped {
            let wake = tokio::select! {
                biased;
                _ = &mut stop_rx => Wake::Stop,
                _ = wait_timer(&mut self.reconnect) => Wake::Timer,
                result = wait_connect(&mut self.connecting) => Wake::Connected(result),
                event = next_event(&mut self.socket) => Wake::Transport(event),
            };

            let event = match wake {
                Wake::Stop => ChannelEvent::Stop,
                Wake::Timer => {
                    self.reconnect = None;
                    ChannelEvent::TimerFired
                }
                Wake::Connected(Ok(socket)) => {
                    self.connecting = None;
                    self.socket = Some(socket);
                    ChannelEvent::Opened
                }
                Wake::Connected(Err(error)) => {
                    self.connecting = None;
                    debug!(url = %self.url, error = %error, "Realtime connect failed");
                    ChannelEvent::Errored
                }
                Wake::Transport(Some(TransportEvent::Text(text))) => ChannelEvent::Message(text),
                Wake::Transport(Some(TransportEvent::Closed) | None) => {
                    self.socket = None;
                    ChannelEvent::Closed
                }
                Wake::Transport(Some(TransportEvent::Error(error))) => {
                    warn!(url = %self.url, error = %error, "Realtime transport error");
                    ChannelEvent::Errored
                }
            };

            let commands = self.machine.handle(event);
            self.execute(commands).await;
            let next = self.machine.state();
            self.state_tx.send_if_modified(|state| {
                let changed = *state != next;
                *state = next;
                changed
            });
        }
    }

    async fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::OpenSocket => {
                    debug!(url = %self.url, "Opening realtime socket");
                    let connector = Arc::clone(&self.connector);
                    let url = self.url.clone();
                    self.connecting = Some(async move { connector.connect(&url).await }.boxed());
                }
                Command::Dispatch(message) => {
                    self.dispatcher.dispatch(&message);
                }
                Command::ScheduleReconnect(delay) => {
                    self.reconnect = Some(Box::pin(sleep(delay)));
                }
                Command::CancelReconnect => {
                    self.reconnect = None;
                }
                Command::CloseSocket => {
                    self.connecting = None;
                    if let Some(mut socket) = self.socket.take() {
                        socket.close().await;
                    }
                }
            }
        }
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn wait_connect(connecting: &mut Option<Connecting>) -> Result<Box<dyn Socket>, SyncError> {
    match connecting {
        Some(connecting) => connecting.as_mut().await,
        None => pending().await,
    }
}

async fn next_event(socket: &mut Option<Box<dyn Socket>>) -> Option<TransportEvent> {
    match socket {
        Some(socket) => socket.next_event().await,
        None => pending().await,
    }
}
