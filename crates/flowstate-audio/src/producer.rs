//! Producer loop: decode, process, enqueue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{QueueFull, SharedBlockQueue};
use crate::chain::SharedChain;
use crate::control::{Command, SharedControl, Step};
use crate::decode::{BlockRead, StreamDecoder};
use crate::metrics::EngineMetrics;
use crate::tap::VisualizationTap;

/// Why the producer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    /// Told to stop.
    Stopped,
    /// Source exhausted.
    EndOfStream,
    /// Mid-stream decode failure, treated as end of stream.
    DecodeFailed,
}

/// Notification from the producer thread to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerEvent {
    /// Identifies the producer session that sent it.
    pub session: u64,
    pub exit: ProducerExit,
    pub message: Option<String>,
}

/// Everything one producer session needs.
pub struct Producer {
    pub session: u64,
    pub decoder: StreamDecoder,
    pub chain: SharedChain,
    pub queue: SharedBlockQueue,
    pub control: SharedControl,
    pub tap: Option<VisualizationTap>,
    pub metrics: Arc<EngineMetrics>,
    /// Last decoded frame, published for position reporting before the sink catches up.
    pub decoded_frame: Arc<AtomicU64>,
    pub events: Sender<ProducerEvent>,
    pub block_size: usize,
    pub push_timeout: Duration,
}

/// Returned to the controller after the thread finishes.
pub struct ProducerOutcome {
    pub decoder: StreamDecoder,
    pub exit: ProducerExit,
}

impl Producer {
    /// Run until stopped or the source ends. Hands the decoder back.
    pub fn run(mut self) -> ProducerOutcome {
        info!(
            "Producer {} started for {}",
            self.session,
            self.decoder.path().display()
        );
        let exit = self.run_loop();
        debug!("Producer {} finished: {exit:?}", self.session);
        ProducerOutcome {
            decoder: self.decoder,
            exit,
        }
    }

    fn run_loop(&mut self) -> ProducerExit {
        loop {
            let (seek, epoch) = match self.control.next_step(&self.queue) {
                Step::Stop => return ProducerExit::Stopped,
                Step::SeekOnly(position) => {
                    self.seek(position);
                    continue;
                }
                Step::Run { seek, epoch } => (seek, epoch),
            };
            if let Some(position) = seek {
                self.seek(position);
            }

            let block = match self.decoder.read_block(self.block_size) {
                Ok(BlockRead::Block(block)) => block,
                Ok(BlockRead::EndOfStream) => {
                    if !self.control.finish() {
                        trace!("Seek arrived at end of stream, continuing");
                        continue;
                    }
                    self.notify(ProducerExit::EndOfStream, None);
                    return ProducerExit::EndOfStream;
                }
                Err(e) => {
                    error!("Decode failed mid-stream, ending track: {e}");
                    if !self.control.finish() {
                        continue;
                    }
                    self.notify(ProducerExit::DecodeFailed, Some(e.to_string()));
                    return ProducerExit::DecodeFailed;
                }
            };
            self.decoded_frame
                .store(self.decoder.position_frames(), Ordering::Relaxed);

            let block = self.chain.lock().process(block);
            if let Some(tap) = &self.tap {
                tap.offer(&block);
            }
            self.metrics.record_block();

            if self.push(block, epoch) == Some(ProducerExit::Stopped) {
                return ProducerExit::Stopped;
            }
        }
    }

    /// Push with backpressure, rechecking the control signal between attempts.
    fn push(&self, mut block: flowstate_core::AudioBlock, epoch: u64) -> Option<ProducerExit> {
        loop {
            match self.queue.push(block, epoch, self.push_timeout) {
                Ok(()) => return None,
                Err(QueueFull(returned)) => {
                    block = returned;
                    self.metrics.record_backpressure();
                    trace!("Queue full, retrying push");
                }
            }
            if self.control.has_pending_seek() || self.queue.epoch() != epoch {
                // Block belongs to the old position
                return None;
            }
            match self.control.command() {
                Command::Stop => return Some(ProducerExit::Stopped),
                Command::Pause => {
                    if self.control.wait_unpaused(self.push_timeout) == Command::Stop {
                        return Some(ProducerExit::Stopped);
                    }
                }
                Command::Run => {}
            }
        }
    }

    fn seek(&mut self, position: f64) {
        match self.decoder.seek(position) {
            Ok(()) => {
                self.decoded_frame
                    .store(self.decoder.position_frames(), Ordering::Relaxed);
                debug!("Producer {} seeked to {position:.3}s", self.session);
            }
            Err(e) => warn!("Seek to {position:.3}s failed: {e}"),
        }
    }

    fn notify(&self, exit: ProducerExit, message: Option<String>) {
        let event = ProducerEvent {
            session: self.session,
            exit,
            message,
        };
        if self.events.send(event).is_err() {
            trace!("Controller gone; dropping producer event");
        }
    }
}
