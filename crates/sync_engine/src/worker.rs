//! Pairing worker: drains a device's frame channels into its capture queue.
//!
//! Runs on a dedicated OS thread with a current-thread runtime so driver
//! callbacks never touch the assembler and the assembler never needs a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use contracts::{AssemblerStats, Capture, ContractError, FrameResult, StreamFault, StreamKind};
use ingestion::{BoundedQueue, FrameReceiver};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::assembler::CaptureAssembler;

/// State the worker publishes to its device
#[derive(Debug, Default)]
pub struct WorkerShared {
    fault: Mutex<Option<StreamFault>>,
    stats: Mutex<AssemblerStats>,
    ended: AtomicBool,
}

impl WorkerShared {
    /// First stream failure seen
    pub fn fault(&self) -> Option<StreamFault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> AssemblerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every frame channel closed: the source will produce nothing more
    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn record_fault(&self, fault: StreamFault) {
        let mut slot = self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(fault);
        }
    }
}

/// Everything a worker owns
pub struct PairingWorker {
    pub serial: String,
    pub assembler: CaptureAssembler,
    pub color: Option<FrameReceiver>,
    pub depth: Option<FrameReceiver>,
    pub output: Arc<BoundedQueue<Capture>>,
    pub shared: Arc<WorkerShared>,
}

enum Event {
    Frame(FrameResult),
    Closed(StreamKind),
    Shutdown,
}

impl PairingWorker {
    /// Start the worker thread; it exits when `shutdown` fires or every channel closes
    pub fn spawn(self, shutdown: oneshot::Receiver<()>) -> Result<JoinHandle<()>, ContractError> {
        let name = format!("{}-pairing", self.serial);
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;

        thread::Builder::new()
            .name(name)
            .spawn(move || runtime.block_on(self.run(shutdown)))
            .map_err(ContractError::from)
    }

    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        let mut color_open = self.color.is_some();
        let mut depth_open = self.depth.is_some();
        debug!(serial = %self.serial, color_open, depth_open, "pairing worker started");

        while color_open || depth_open {
            let event = tokio::select! {
                _ = &mut shutdown => Event::Shutdown,
                frame = next_frame(self.color.as_ref()), if color_open => {
                    frame.map_or(Event::Closed(StreamKind::Color), Event::Frame)
                }
                frame = next_frame(self.depth.as_ref()), if depth_open => {
                    frame.map_or(Event::Closed(StreamKind::DepthIr), Event::Frame)
                }
            };

            match event {
                Event::Frame(result) => self.handle(result),
                Event::Closed(StreamKind::Color) => color_open = false,
                Event::Closed(StreamKind::DepthIr) => depth_open = false,
                Event::Shutdown => {
                    debug!(serial = %self.serial, "pairing worker shut down");
                    return;
                }
            }
        }

        self.shared.ended.store(true, Ordering::Release);
        info!(serial = %self.serial, "frame source ended");
    }

    fn handle(&mut self, result: FrameResult) {
        match self.assembler.push(result) {
            Ok(Some(capture)) => {
                observability::record_capture_emitted(&self.serial, capture.image_count());
                self.output.push(capture);
                observability::record_queue_depth(&self.serial, self.output.len());
            }
            Ok(None) => {}
            Err(ContractError::UnexpectedData { stream, message }) => {
                warn!(serial = %self.serial, %stream, %message, "malformed frame block discarded");
                observability::record_malformed_block(&self.serial, &stream.to_string());
            }
            Err(ContractError::StreamFailed(fault)) => {
                warn!(serial = %self.serial, stream = %fault.stream, reason = %fault.message, "stream failed");
                observability::record_stream_failure(&self.serial, &fault.stream.to_string());
                self.shared.record_fault(fault);
                if self.assembler.is_starved() {
                    // wakes consumers blocked in get_capture with Failed
                    self.output.stop();
                }
            }
            Err(e) => {
                warn!(serial = %self.serial, error = %e, "pairing error");
            }
        }

        let before = *self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let after = self.assembler.stats();
        self.report_drops(&before, &after);
        *self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner) = after;
    }

    fn report_drops(&self, before: &AssemblerStats, after: &AssemblerStats) {
        for _ in before.color_dropped..after.color_dropped {
            observability::record_image_dropped(&self.serial, "color");
        }
        for _ in before.depth_dropped..after.depth_dropped {
            observability::record_image_dropped(&self.serial, "depth_ir");
        }
    }
}

async fn next_frame(rx: Option<&FrameReceiver>) -> Option<FrameResult> {
    match rx {
        Some(rx) => rx.recv().await.ok(),
        None => std::future::pending().await,
    }
}
