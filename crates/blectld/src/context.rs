//! Process-wide daemon state.
//!
//! [`AppContext`] owns everything the HTTP handlers and both workers share:
//! the two queues, both registries and the adapter. It is built once by
//! [`AppContext::start`], which also spawns the workers, and is handed to
//! the router as an `Arc`. Tests build a fresh one per case.

use std::sync::Arc;

use blectl_core::{Command, LogEntry};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::Adapter;
use crate::broadcast::BroadcastLoop;
use crate::config::{ConfigError, DaemonConfig};
use crate::event_loop::EventLoop;
use crate::log_stream::LogStream;
use crate::queue::{bounded, QueueError, QueueSender};
use crate::radio::{Radio, RadioError};
use crate::registry::{ClientError, ClientRegistry, DeviceRegistry, Subscriber, Subscription};

/// Fatal errors while bringing the daemon up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to enable radio: {0}")]
    RadioEnable(#[source] RadioError),
}

/// The two long-running workers, built but not yet running.
pub struct Workers<R: Radio> {
    pub event_loop: EventLoop<R>,
    pub broadcast: BroadcastLoop,
}

impl<R: Radio> Workers<R> {
    pub fn spawn(self) -> WorkerHandles {
        WorkerHandles {
            event_loop: tokio::spawn(self.event_loop.run()),
            broadcast: tokio::spawn(self.broadcast.run()),
        }
    }
}

/// Join handles of the two long-running workers.
#[derive(Debug)]
pub struct WorkerHandles {
    pub event_loop: JoinHandle<()>,
    pub broadcast: JoinHandle<()>,
}

impl WorkerHandles {
    /// Waits for both workers to exit.
    pub async fn join(self) {
        for (name, handle) in [("event loop", self.event_loop), ("broadcast", self.broadcast)] {
            if let Err(e) = handle.await {
                warn!(worker = name, error = %e, "Worker ended abnormally");
            }
        }
    }
}

pub struct AppContext<R: Radio> {
    config: DaemonConfig,
    devices: Arc<DeviceRegistry>,
    clients: Arc<ClientRegistry>,
    adapter: Arc<Adapter<R>>,
    logs: LogStream,
    commands: QueueSender<Command>,
}

impl<R: Radio> AppContext<R> {
    /// Validates `config`, enables the radio and spawns the event and
    /// broadcast loops.
    ///
    /// Both loops stop when `cancel` fires.
    pub async fn start(
        config: DaemonConfig,
        radio: R,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, WorkerHandles), StartupError> {
        config.validate()?;

        let radio = Arc::new(radio);
        let enabling = Arc::clone(&radio);
        tokio::task::spawn_blocking(move || enabling.enable())
            .await
            .map_err(|e| StartupError::RadioEnable(RadioError::driver(e)))?
            .map_err(StartupError::RadioEnable)?;
        info!("Radio enabled");

        let (ctx, workers) = Self::new(config, radio, cancel);
        Ok((ctx, workers.spawn()))
    }

    /// Wires up the context around an already enabled radio without
    /// starting the workers.
    pub fn new(
        config: DaemonConfig,
        radio: Arc<R>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, Workers<R>) {
        let (command_tx, command_rx) = bounded::<Command>(config.command_capacity);
        let (log_tx, log_rx) = bounded::<LogEntry>(config.log_capacity);
        let logs = LogStream::new(log_tx);

        let devices = Arc::new(DeviceRegistry::new());
        let clients = Arc::new(ClientRegistry::new(
            config.max_subscribers,
            config.write_timeout,
        ));
        let adapter = Arc::new(Adapter::new(
            radio,
            Arc::clone(&devices),
            logs.clone(),
            config.adapter_settings(),
        ));

        let workers = Workers {
            event_loop: EventLoop::new(command_rx, Arc::clone(&adapter), logs.clone(), cancel.clone()),
            broadcast: BroadcastLoop::new(log_rx, Arc::clone(&clients), cancel),
        };

        let ctx = Arc::new(Self {
            config,
            devices,
            clients,
            adapter,
            logs,
            commands: command_tx,
        });
        (ctx, workers)
    }

    /// Queues a command without waiting for capacity.
    pub fn enqueue(&self, command: Command) -> Result<(), QueueError> {
        let kind = command.kind();
        match self.commands.try_send(command) {
            Ok(()) => {
                debug!(command = %kind, "Command accepted");
                Ok(())
            }
            Err(e) => {
                warn!(command = %kind, error = %e, "Command rejected");
                Err(e)
            }
        }
    }

    /// Opens a new event stream.
    ///
    /// Registers the subscriber, discards every pending command and log
    /// entry, then replays the known devices as DEVICE entries on the
    /// shared log stream. A rejected subscriber leaves both queues alone.
    pub fn subscribe(&self) -> Result<Subscription, ClientError> {
        let (subscriber, frames) = Subscriber::new(self.config.subscriber_buffer);
        let id = subscriber.id();
        let cancel = subscriber.cancel_token();
        self.clients.add(subscriber)?;

        self.commands.purge();
        self.logs.purge();
        info!(client_id = %id, clients = self.clients.len(), "Event stream opened");

        // Replayed from a task: the subscriber's buffer is only read once
        // the response starts streaming.
        let devices = self.devices.snapshot();
        if !devices.is_empty() {
            let logs = self.logs.clone();
            tokio::spawn(async move {
                for device in &devices {
                    logs.device(device).await;
                }
            });
        }

        Ok(Subscription::new(id, frames, Arc::clone(&self.clients), cancel))
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn devices(&self) -> &Arc<DeviceRegistry> {
        &self.devices
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn adapter(&self) -> &Arc<Adapter<R>> {
        &self.adapter
    }

    pub fn logs(&self) -> &LogStream {
        &self.logs
    }
}
