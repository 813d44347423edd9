//! Output worker thread
//!
//! Dedicated thread owning the device registry and the output map.
//! Communicates with the Tokio runtime via channels.
//!
//! Commands are handled one at a time, so reconciliations never overlap and
//! output indices never change under a running command. Device I/O itself
//! happens on the per-device pacing threads.

use crate::outputs::OutputMap;
use crate::usb::session::SessionConfig;
use common::{OutputCommand, OutputEvent, OutputWorker, UsbBus};
use tracing::{debug, error, info, warn};

/// Output worker thread
///
/// Processes commands from the Tokio runtime and sends events back.
pub struct OutputWorkerThread<B: UsbBus> {
    /// Outputs of all tracked devices
    outputs: OutputMap<B>,
    /// Communication channel with Tokio runtime
    worker: OutputWorker,
}

impl<B: UsbBus> OutputWorkerThread<B> {
    /// Create a new worker; no devices are tracked until the first rescan
    pub fn new(worker: OutputWorker, bus: B, config: SessionConfig) -> Self {
        Self {
            outputs: OutputMap::new(bus, config),
            worker,
        }
    }

    /// Run the worker loop until Shutdown or until the bridge is dropped
    ///
    /// All devices are closed before returning.
    pub fn run(mut self) {
        info!("Output worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(OutputCommand::Shutdown) => {
                    info!("Output worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(e) => {
                    debug!("Command channel closed: {}", e);
                    break;
                }
            }
        }

        self.outputs.shutdown();
        info!("Output worker thread stopped");
    }

    /// Handle a command from the Tokio runtime
    fn handle_command(&mut self, cmd: OutputCommand) {
        // Wrap in catch_unwind to prevent panics from crashing the worker
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in output command handler: {:?}", e);
        }
    }

    /// Inner command handler (can panic, caught by handle_command)
    fn handle_command_inner(&mut self, cmd: OutputCommand) {
        match cmd {
            OutputCommand::ListOutputs { response } => {
                let outputs = self.outputs.summaries();
                debug!("Listing {} outputs", outputs.len());
                let _ = response.send(outputs);
            }

            OutputCommand::OpenOutput { output, response } => {
                let _ = response.send(self.outputs.open_output(output));
            }

            OutputCommand::CloseOutput { output, response } => {
                self.outputs.close_output(output);
                let _ = response.send(());
            }

            OutputCommand::WriteUniverse { output, data } => {
                // Rejections are logged by the output map
                let _ = self.outputs.write_universe(output, &data);
            }

            OutputCommand::OutputInfo { output, response } => {
                let _ = response.send(self.outputs.output_info(output));
            }

            OutputCommand::Rescan { response } => {
                let changed = match self.outputs.rescan() {
                    Ok(changed) => changed,
                    Err(e) => {
                        warn!("Unable to enumerate USB devices: {}", e);
                        false
                    }
                };

                if changed {
                    let event = OutputEvent::ConfigurationChanged {
                        outputs: self.outputs.outputs(),
                    };
                    if let Err(e) = self.worker.send_event(event) {
                        warn!("Failed to publish configuration change: {}", e);
                    }
                }
                let _ = response.send(changed);
            }

            OutputCommand::Shutdown => {
                // Handled in run()
                debug!("Ignoring nested shutdown request");
            }
        }
    }
}

/// Spawn the output worker thread
///
/// The thread runs until a Shutdown command is received or the bridge is
/// dropped.
pub fn spawn_output_worker<B: UsbBus>(
    worker: OutputWorker,
    bus: B,
    config: SessionConfig,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("output-worker".to_string())
        .spawn(move || OutputWorkerThread::new(worker, bus, config).run())
}
