use std::sync::atomic::{AtomicU8, Ordering};

/// The ingest client state machine:
///
/// ```text
/// idle → dialing → describing → setup → playing ⇄ reconnecting → closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IngestState {
    Idle = 0,
    Dialing = 1,
    Describing = 2,
    Setup = 3,
    Playing = 4,
    Reconnecting = 5,
    Closed = 6,
}

impl IngestState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Dialing,
            2 => Self::Describing,
            3 => Self::Setup,
            4 => Self::Playing,
            5 => Self::Reconnecting,
            _ => Self::Closed,
        }
    }
}

/// Lock-free holder for the current state, readable from the stream
/// manager's ensure-live poll without contending with the ingest task's own
/// transitions.
pub struct StateCell(AtomicU8);

impl StateCell {
    #[must_use]
    pub fn new(initial: IngestState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    #[must_use]
    pub fn get(&self) -> IngestState {
        IngestState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: IngestState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(IngestState::Idle)
    }
}
