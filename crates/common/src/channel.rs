//! Async channel bridge between Tokio runtime and the output worker thread

use async_channel::{Receiver, Sender, TrySendError, bounded};
use protocol::OutputSummary;

/// Commands from Tokio runtime to the output worker
#[derive(Debug)]
pub enum OutputCommand {
    /// List all outputs (one per universe)
    ListOutputs {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<OutputSummary>>,
    },

    /// Start streaming an output
    OpenOutput {
        /// Output index as listed
        output: u32,
        /// Channel to send response back (false if the device could not be opened)
        response: tokio::sync::oneshot::Sender<bool>,
    },

    /// Stop streaming an output
    CloseOutput {
        /// Output index as listed
        output: u32,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<()>,
    },

    /// Replace the channel data of an output
    WriteUniverse {
        /// Output index as listed
        output: u32,
        /// Up to 512 channel values
        data: Vec<u8>,
    },

    /// Get the info text of an output
    OutputInfo {
        /// Output index as listed
        output: u32,
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<String>,
    },

    /// Reconcile tracked devices against the bus
    Rescan {
        /// Channel to send response back (true if the device set changed)
        response: tokio::sync::oneshot::Sender<bool>,
    },

    /// Shutdown the worker thread gracefully
    Shutdown,
}

/// Events from the output worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The set of devices changed; output indices were reassigned
    ConfigurationChanged {
        /// New output names, in index order
        outputs: Vec<String>,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct OutputBridge {
    cmd_tx: Sender<OutputCommand>,
    event_rx: Receiver<OutputEvent>,
}

impl OutputBridge {
    /// Send a command to the output worker
    pub async fn send_command(&self, cmd: OutputCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the output worker
    pub async fn recv_event(&self) -> crate::Result<OutputEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the output worker thread (blocking)
pub struct OutputWorker {
    pub(crate) cmd_rx: Receiver<OutputCommand>,
    event_tx: Sender<OutputEvent>,
}

impl OutputWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<OutputCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<OutputCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Publish an event without blocking
    ///
    /// Events are dropped when nobody drains the queue.
    pub fn send_event(&self, event: OutputEvent) -> crate::Result<()> {
        match self.event_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Event queue full, dropping event");
                Ok(())
            }
            Err(e) => Err(crate::Error::Channel(e.to_string())),
        }
    }
}

/// Create the channel bridge between Tokio and the output worker
///
/// Returns (OutputBridge for Tokio, OutputWorker for the worker thread)
pub fn create_output_bridge() -> (OutputBridge, OutputWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(64);

    (
        OutputBridge { cmd_tx, event_rx },
        OutputWorker { cmd_rx, event_tx },
    )
}
