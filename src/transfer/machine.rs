//! Transfer state machine

use super::{DecodeRequest, Effect, Event, SessionId, TransmitState};
use crate::config::{LinkConfig, StorageConfig};
use crate::container::UnpackSummary;
use crate::error::{Error, Result};
use crate::ingest::{IngestAssembler, IngestStatus};
use bytes::Bytes;
use tracing::{debug, error, info, warn};

/// What an outstanding clear finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClearReason {
    /// Start-up erase, finishes silently
    Boot,
    /// End of a transfer, finishes with COMPLETE
    SessionEnd,
}

/// Per-transfer state
struct Session {
    id: SessionId,
    /// Dropped once ingest is over, which frees both buffers
    assembler: Option<IngestAssembler>,
    outstanding: usize,
    decoding: bool,
}

/// Event-driven transfer controller
pub struct TransferMachine {
    storage: StorageConfig,
    link: LinkConfig,
    state: TransmitState,
    session: Option<Session>,
    /// Id the next session gets
    next_session: SessionId,
    clear_pending: bool,
    clear_reason: ClearReason,
}

impl TransferMachine {
    pub fn new(storage: &StorageConfig, link: &LinkConfig) -> Self {
        TransferMachine {
            storage: storage.clone(),
            link: link.clone(),
            state: TransmitState::None,
            session: None,
            next_session: 1,
            clear_pending: false,
            clear_reason: ClearReason::Boot,
        }
    }

    /// Erase the region before the first transfer
    pub fn boot(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.request_clear(ClearReason::Boot, &mut effects);
        effects
    }

    pub fn state(&self) -> TransmitState {
        self.state
    }

    /// Whether a clear is outstanding; fragments are dropped meanwhile
    pub fn is_clear_pending(&self) -> bool {
        self.clear_pending
    }

    /// Id of the transfer in progress
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Process one event and return the effects to execute in order
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            Event::Status(TransmitState::Transmitting | TransmitState::Start) => self.begin(),
            Event::Status(TransmitState::Cancel) => self.cancel(&mut effects),
            Event::Status(other) => debug!("status {} from sender ignored", other),
            Event::Fragment(bytes) => self.on_fragment(bytes, &mut effects),
            Event::StoreCompleted {
                session,
                block,
                success,
            } => self.on_store_completed(session, block, success, &mut effects),
            Event::DecodeFinished { session, outcome } => {
                self.on_decode_finished(session, outcome, &mut effects)
            }
            Event::ClearCompleted { success } => self.on_clear_completed(success, &mut effects),
        }

        effects
    }

    fn set_state(&mut self, state: TransmitState) {
        if self.state != state {
            debug!("transfer state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn report(&mut self, state: TransmitState, effects: &mut Vec<Effect>) {
        self.set_state(state);
        effects.push(Effect::Report(state));
    }

    fn request_clear(&mut self, reason: ClearReason, effects: &mut Vec<Effect>) {
        if self.clear_pending {
            // One clear covers both; a session end wins over boot
            if reason == ClearReason::SessionEnd {
                self.clear_reason = reason;
            }
            return;
        }

        self.clear_pending = true;
        self.clear_reason = reason;
        effects.push(Effect::Clear);
    }

    fn begin(&mut self) {
        if self.clear_pending {
            warn!("transfer start ignored, storage clear in progress");
            return;
        }
        if self.state == TransmitState::Cancel {
            warn!("transfer start ignored while cancelling");
            return;
        }
        if self.session.is_some() {
            warn!("transfer start ignored, transfer already in progress");
            return;
        }

        info!("transfer started");
        self.set_state(TransmitState::Transmitting);
    }

    fn cancel(&mut self, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session.take() {
            info!(
                "transfer {} cancelled with {} stores outstanding",
                session.id, session.outstanding
            );
        } else {
            info!("transfer cancelled");
        }

        self.set_state(TransmitState::Cancel);
        self.request_clear(ClearReason::SessionEnd, effects);
    }

    fn abort(&mut self, reason: &Error, effects: &mut Vec<Effect>) {
        if let Some(session) = self.session.take() {
            error!("transfer {} aborted: {}", session.id, reason);
        }
        self.report(TransmitState::Error, effects);
        self.request_clear(ClearReason::SessionEnd, effects);
    }

    fn on_fragment(&mut self, bytes: Bytes, effects: &mut Vec<Effect>) {
        if self.clear_pending {
            debug!("fragment of {} bytes dropped, clear in progress", bytes.len());
            return;
        }
        if !self.state.accepts_fragments() {
            debug!("fragment of {} bytes dropped in state {}", bytes.len(), self.state);
            return;
        }

        let Some(session) = self.session.as_mut() else {
            self.open_session(&bytes, effects);
            return;
        };

        let Some(assembler) = session.assembler.as_mut() else {
            return;
        };
        if assembler.is_finished() {
            warn!("fragment of {} bytes after ingest finished, dropped", bytes.len());
            return;
        }

        let outcome = match assembler.push(&bytes) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.abort(&e, effects);
                return;
            }
        };

        for store in outcome.stores {
            session.outstanding += 1;
            effects.push(Effect::Store {
                session: session.id,
                block: store.block,
                data: store.data,
            });
        }

        match outcome.status {
            IngestStatus::Receiving => {}
            IngestStatus::WindowComplete => self.report(TransmitState::Ok, effects),
            IngestStatus::Finished => {
                self.report(TransmitState::Ok, effects);
                self.maybe_decode(effects);
            }
        }
    }

    fn open_session(&mut self, prefix: &[u8], effects: &mut Vec<Effect>) {
        match IngestAssembler::start(prefix, &self.storage, &self.link) {
            Ok(assembler) => {
                let id = self.next_session;
                self.next_session += 1;
                info!(
                    "transfer {}: expecting {} bytes in at most {} fragments",
                    id,
                    assembler.declared_length(),
                    assembler.fragment_budget()
                );
                self.session = Some(Session {
                    id,
                    assembler: Some(assembler),
                    outstanding: 0,
                    decoding: false,
                });
            }
            Err(e) => {
                // Nothing was committed, so there is nothing to clear
                warn!("transfer rejected: {}", e);
                self.report(TransmitState::Error, effects);
            }
        }
    }

    fn on_store_completed(
        &mut self,
        id: SessionId,
        block: usize,
        success: bool,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == id) else {
            debug!("store of block {} for stale transfer {} ignored", block, id);
            return;
        };

        session.outstanding = session.outstanding.saturating_sub(1);

        if !success {
            let err = Error::write_failure(block, "store completed with failure");
            self.abort(&err, effects);
            return;
        }

        debug!("block {} stored", block);
        self.maybe_decode(effects);
    }

    fn maybe_decode(&mut self, effects: &mut Vec<Effect>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.outstanding > 0 || session.decoding {
            return;
        }
        if !session
            .assembler
            .as_ref()
            .is_some_and(IngestAssembler::is_finished)
        {
            return;
        }

        let Some(assembler) = session.assembler.take() else {
            return;
        };

        session.decoding = true;
        info!(
            "transfer {}: {} bytes committed, decoding",
            session.id,
            assembler.received()
        );

        effects.push(Effect::Decode(DecodeRequest {
            session: session.id,
            received: assembler.received(),
            final_block: assembler.final_block(),
        }));
    }

    fn on_decode_finished(
        &mut self,
        id: SessionId,
        outcome: Result<UnpackSummary>,
        effects: &mut Vec<Effect>,
    ) {
        if self.session_id() != Some(id) {
            debug!("decode result for stale transfer {} ignored", id);
            return;
        }
        self.session = None;

        match outcome {
            Ok(summary) => info!(
                "transfer {} decoded: {} spans, {} bytes",
                id, summary.spans, summary.bytes_rendered
            ),
            Err(e) => {
                error!("transfer {} decode failed: {}", id, e);
                self.report(TransmitState::Error, effects);
            }
        }

        self.request_clear(ClearReason::SessionEnd, effects);
    }

    fn on_clear_completed(&mut self, success: bool, effects: &mut Vec<Effect>) {
        if !self.clear_pending {
            warn!("unexpected clear completion ignored");
            return;
        }
        self.clear_pending = false;

        if !success {
            error!("storage clear failed, continuing without erase");
        }

        match self.clear_reason {
            ClearReason::Boot => info!("storage ready"),
            ClearReason::SessionEnd => self.report(TransmitState::Complete, effects),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> TransferMachine {
        let mut machine = TransferMachine::new(&StorageConfig::default(), &LinkConfig::default());
        assert_eq!(machine.boot(), vec![Effect::Clear]);
        assert!(machine.handle(Event::ClearCompleted { success: true }).is_empty());
        machine
    }

    fn fragment(bytes: &[u8]) -> Event {
        Event::Fragment(Bytes::copy_from_slice(bytes))
    }

    fn reports(effects: &[Effect]) -> Vec<TransmitState> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Report(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fragments_dropped_until_boot_clear() {
        let mut machine = TransferMachine::new(&StorageConfig::default(), &LinkConfig::default());
        machine.boot();

        machine.handle(Event::Status(TransmitState::Start));
        assert_eq!(machine.state(), TransmitState::None);
        assert!(machine.handle(fragment(&[0x00, 0x2C])).is_empty());
        assert_eq!(machine.session_id(), None);

        assert!(machine.handle(Event::ClearCompleted { success: true }).is_empty());
        machine.handle(Event::Status(TransmitState::Start));
        assert_eq!(machine.state(), TransmitState::Transmitting);
    }

    #[test]
    fn test_scenario_44_bytes() {
        let mut machine = booted();
        machine.handle(Event::Status(TransmitState::Transmitting));

        assert!(machine.handle(fragment(&[0x00, 0x2C])).is_empty());
        let session = machine.session_id().unwrap();

        assert!(machine.handle(fragment(&[1u8; 20])).is_empty());
        assert!(machine.handle(fragment(&[2u8; 20])).is_empty());

        let effects = machine.handle(fragment(&[3u8; 4]));
        assert_eq!(reports(&effects), vec![TransmitState::Ok]);
        assert!(matches!(effects[0], Effect::Store { block: 0, .. }));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Decode(_))));

        let effects = machine.handle(Event::StoreCompleted {
            session,
            block: 0,
            success: true,
        });
        let decode = match effects.as_slice() {
            [Effect::Decode(req)] => *req,
            other => panic!("expected a decode, got {:?}", other),
        };
        assert_eq!(decode.received, 44);
        assert_eq!(decode.final_block.unwrap().last_value, 3);

        let effects = machine.handle(Event::DecodeFinished {
            session,
            outcome: Ok(UnpackSummary::default()),
        });
        assert_eq!(effects, vec![Effect::Clear]);

        // New transfers wait for the clear
        machine.handle(Event::Status(TransmitState::Start));
        assert_eq!(machine.state(), TransmitState::Ok);

        let effects = machine.handle(Event::ClearCompleted { success: true });
        assert_eq!(reports(&effects), vec![TransmitState::Complete]);
        assert_eq!(machine.state(), TransmitState::Complete);
    }

    #[test]
    fn test_malformed_prefix_reports_error_without_clear() {
        let mut machine = booted();
        machine.handle(Event::Status(TransmitState::Start));

        let effects = machine.handle(fragment(&[0x00, 0x2C, 0x01]));
        assert_eq!(effects, vec![Effect::Report(TransmitState::Error)]);
        assert!(!machine.is_clear_pending());

        // Idle until the sender starts over
        assert!(machine.handle(fragment(&[0x00, 0x10])).is_empty());
        machine.handle(Event::Status(TransmitState::Start));
        machine.handle(fragment(&[0x00, 0x10]));
        assert!(machine.session_id().is_some());
    }

    #[test]
    fn test_cancel_ignores_late_store() {
        let mut machine = booted();
        machine.handle(Event::Status(TransmitState::Start));
        machine.handle(fragment(&[0x08, 0x00]));
        let old = machine.session_id().unwrap();

        // 2048 bytes in 18-byte fragments, the first block flushes on the 57th
        for _ in 0..57 {
            machine.handle(fragment(&[0xEE; 18]));
        }

        assert_eq!(machine.handle(Event::Status(TransmitState::Cancel)), vec![Effect::Clear]);
        assert_eq!(machine.state(), TransmitState::Cancel);
        assert_eq!(machine.session_id(), None);

        machine.handle(Event::Status(TransmitState::Start));
        assert_eq!(machine.state(), TransmitState::Cancel);

        let late = machine.handle(Event::StoreCompleted {
            session: old,
            block: 0,
            success: true,
        });
        assert!(late.is_empty());

        let effects = machine.handle(Event::ClearCompleted { success: true });
        assert_eq!(reports(&effects), vec![TransmitState::Complete]);

        machine.handle(Event::Status(TransmitState::Start));
        machine.handle(fragment(&[0x00, 0x04]));
        let effects = machine.handle(fragment(&[1, 2, 3, 4]));
        assert_ne!(machine.session_id(), Some(old));
        assert!(matches!(effects[0], Effect::Store { block: 0, .. }));
    }

    #[test]
    fn test_store_failure_aborts() {
        let mut machine = booted();
        machine.handle(Event::Status(TransmitState::Start));
        machine.handle(fragment(&[0x00, 0x04]));
        let session = machine.session_id().unwrap();
        machine.handle(fragment(&[1, 2, 3, 4]));

        let effects = machine.handle(Event::StoreCompleted {
            session,
            block: 0,
            success: false,
        });
        assert_eq!(
            effects,
            vec![Effect::Report(TransmitState::Error), Effect::Clear]
        );
        assert_eq!(machine.session_id(), None);
    }

    #[test]
    fn test_decode_failure_still_clears() {
        let mut machine = booted();
        machine.handle(Event::Status(TransmitState::Start));
        machine.handle(fragment(&[0x00, 0x04]));
        let session = machine.session_id().unwrap();
        machine.handle(fragment(&[1, 2, 3, 4]));
        machine.handle(Event::StoreCompleted {
            session,
            block: 0,
            success: true,
        });

        let effects = machine.handle(Event::DecodeFinished {
            session,
            outcome: Err(Error::NotAContainer),
        });
        assert_eq!(
            effects,
            vec![Effect::Report(TransmitState::Error), Effect::Clear]
        );

        let effects = machine.handle(Event::ClearCompleted { success: false });
        assert_eq!(reports(&effects), vec![TransmitState::Complete]);
    }
}
