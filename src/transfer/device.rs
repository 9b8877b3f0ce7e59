//! Device driver
//!
//! Binds a [`TransferMachine`] to concrete storage and a renderer. Effects run
//! in order; anything they produce (a refused store, a decode result) is fed
//! back as an event before control returns to the caller.

use super::{DecodeRequest, Effect, Event, TransferMachine, TransmitState};
use crate::config::Config;
use crate::container::{Renderer, UnpackSummary, Unpacker};
use crate::error::{Error, Result};
use crate::storage::{BlockReader, BlockStorage, BlockStream, StorageOp};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, error, info};

/// Receiving device: transfer machine, image storage and display
pub struct Device<S: BlockStorage, R: Renderer> {
    config: Config,
    machine: TransferMachine,
    storage: S,
    renderer: R,
    unpacker: Unpacker,
    reports: Vec<TransmitState>,
    decodes: usize,
    last_decode: Option<UnpackSummary>,
}

impl<S: BlockStorage, R: Renderer> Device<S, R> {
    /// Create the device and start the boot-time clear
    pub fn new(config: Config, storage: S, renderer: R) -> Result<Self> {
        config.validate()?;

        if storage.block_size() != config.storage.block_size
            || storage.block_count() != config.storage.block_count
        {
            return Err(Error::InvalidConfig(format!(
                "storage has {} blocks of {} bytes, configuration expects {} of {}",
                storage.block_count(),
                storage.block_size(),
                config.storage.block_count,
                config.storage.block_size
            )));
        }

        let machine = TransferMachine::new(&config.storage, &config.link);
        let mut device = Device {
            config,
            machine,
            storage,
            renderer,
            unpacker: Unpacker::new(),
            reports: Vec::new(),
            decodes: 0,
            last_decode: None,
        };

        let effects = device.machine.boot();
        let mut queue = VecDeque::new();
        for effect in effects {
            device.execute(effect, &mut queue);
        }
        device.drain(queue);

        Ok(device)
    }

    /// Sender wrote the status characteristic
    pub fn on_status(&mut self, state: TransmitState) {
        self.dispatch(Event::Status(state));
    }

    /// Sender wrote a payload fragment
    pub fn on_fragment(&mut self, fragment: impl Into<Bytes>) {
        self.dispatch(Event::Fragment(fragment.into()));
    }

    /// Deliver at most one storage completion; false when none was ready
    pub fn pump_one(&mut self) -> bool {
        let Some(done) = self.storage.poll_completion() else {
            return false;
        };

        let event = match done.op {
            StorageOp::Store { block, tag } => Event::StoreCompleted {
                session: tag,
                block,
                success: done.success,
            },
            StorageOp::Clear => Event::ClearCompleted {
                success: done.success,
            },
        };
        self.dispatch(event);
        true
    }

    /// Deliver every ready storage completion
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while self.pump_one() {
            delivered += 1;
        }
        delivered
    }

    /// Status reports sent since the last call
    pub fn take_reports(&mut self) -> Vec<TransmitState> {
        std::mem::take(&mut self.reports)
    }

    pub fn state(&self) -> TransmitState {
        self.machine.state()
    }

    pub fn machine(&self) -> &TransferMachine {
        &self.machine
    }

    /// Times the decode pipeline ran
    pub fn decodes(&self) -> usize {
        self.decodes
    }

    /// Summary of the most recent successful decode
    pub fn last_decode(&self) -> Option<&UnpackSummary> {
        self.last_decode.as_ref()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::new();
        queue.push_back(event);
        self.drain(queue);
    }

    fn drain(&mut self, mut queue: VecDeque<Event>) {
        while let Some(event) = queue.pop_front() {
            for effect in self.machine.handle(event) {
                self.execute(effect, &mut queue);
            }
        }
    }

    fn execute(&mut self, effect: Effect, queue: &mut VecDeque<Event>) {
        match effect {
            Effect::Report(state) => {
                info!("report {} ({})", state, state.code());
                self.reports.push(state);
            }
            Effect::Store {
                session,
                block,
                data,
            } => {
                let submitted = self
                    .storage
                    .block_id(block)
                    .and_then(|id| self.storage.store(id, &data, 0, session));

                match submitted {
                    Ok(()) => debug!("store of block {} issued ({} bytes)", block, data.len()),
                    Err(e) => {
                        error!("store of block {} refused: {}", block, e);
                        queue.push_back(Event::StoreCompleted {
                            session,
                            block,
                            success: false,
                        });
                    }
                }
            }
            Effect::Clear => {
                if let Err(e) = self.storage.clear() {
                    error!("clear refused: {}", e);
                    queue.push_back(Event::ClearCompleted { success: false });
                }
            }
            Effect::Decode(request) => {
                let outcome = self.decode(&request);
                self.decodes += 1;
                if let Ok(summary) = &outcome {
                    self.last_decode = Some(summary.clone());
                }
                queue.push_back(Event::DecodeFinished {
                    session: request.session,
                    outcome,
                });
            }
        }
    }

    fn decode(&mut self, request: &DecodeRequest) -> Result<UnpackSummary> {
        let final_block = if self.config.storage.patch_final_byte {
            request.final_block
        } else {
            None
        };

        let reader = BlockReader::new(&self.storage).with_final_block(final_block);
        let mut stream = BlockStream::new(reader);
        self.unpacker
            .unpack(&mut stream, request.received as u64, &mut self.renderer)
    }
}
