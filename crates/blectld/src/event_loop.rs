//! Command dispatcher.
//!
//! Drains the command queue in arrival order and hands each command to the
//! adapter as a task in a [`JoinSet`]. The loop never waits for a command
//! to finish before taking the next one, so a 5 second scan does not hold
//! up a STOP_SCAN queued behind it. Completion order is up to the adapter.

use std::sync::Arc;
use std::time::Duration;

use blectl_core::{Command, CommandKind};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapter::Adapter;
use crate::log_stream::LogStream;
use crate::queue::QueueReceiver;
use crate::radio::Radio;

/// How long shutdown waits for in-flight commands
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(6);

pub struct EventLoop<R: Radio> {
    commands: QueueReceiver<Command>,
    adapter: Arc<Adapter<R>>,
    logs: LogStream,
    cancel: CancellationToken,
    tasks: JoinSet<CommandKind>,
}

impl<R: Radio> EventLoop<R> {
    pub fn new(
        commands: QueueReceiver<Command>,
        adapter: Arc<Adapter<R>>,
        logs: LogStream,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            commands,
            adapter,
            logs,
            cancel,
            tasks: JoinSet::new(),
        }
    }

    /// Runs until cancelled or until every command sender is gone.
    pub async fn run(mut self) {
        info!("Event loop started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Event loop cancelled");
                    break;
                }

                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(result).await;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => {
                        debug!("Command queue closed");
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
        info!("Event loop stopped");
    }

    #[cfg(test)]
    pub(crate) fn try_next_command(&mut self) -> Option<Command> {
        self.commands.try_recv()
    }

    fn dispatch(&mut self, command: Command) {
        let kind = command.kind();
        debug!(command = %command, in_flight = self.tasks.len(), "Dispatching command");

        let adapter = Arc::clone(&self.adapter);
        self.tasks.spawn(async move {
            adapter.execute(command).await;
            kind
        });
    }

    async fn reap(&self, result: Result<CommandKind, JoinError>) {
        match result {
            Ok(kind) => debug!(command = %kind, "Command finished"),
            Err(e) if e.is_panic() => {
                error!(error = %e, "Command task panicked");
                self.logs.error("Internal error while running command.").await;
            }
            Err(e) => debug!(error = %e, "Command task cancelled"),
        }
    }

    async fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }

        info!(in_flight = self.tasks.len(), "Waiting for in-flight commands");
        self.adapter.halt().await;

        let drain = async {
            while let Some(result) = self.tasks.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "Command task panicked during shutdown");
                    }
                }
            }
        };

        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!(remaining = self.tasks.len(), "In-flight commands did not finish, aborting");
            self.tasks.abort_all();
        }
    }
}
