use crate::models::Slot;
use crate::transcoder::TranscoderHandle;

/// Per-channel runtime state. Lives inside the engine task and is never
/// shared; external callers see it only through status snapshots.
pub struct RuntimeState {
    active: Slot,
    pub is_playing: bool,
    pub playing_ad: bool,
    pub preload_ready: bool,
    pub is_preloading: bool,
    /// Transcoder on the active slot, if any.
    pub current: Option<TranscoderHandle>,
    /// Transcoder warming the next slot, if any.
    pub next: Option<TranscoderHandle>,
}

impl RuntimeState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Slot::A,
            is_playing: false,
            playing_ad: false,
            preload_ready: false,
            is_preloading: false,
            current: None,
            next: None,
        }
    }

    #[must_use]
    pub const fn active(&self) -> Slot {
        self.active
    }

    /// The slot preloads land on; always the other one.
    #[must_use]
    pub const fn next_slot(&self) -> Slot {
        self.active.other()
    }

    /// Flip the slots. The caller moves the transcoder handles.
    pub fn swap(&mut self) {
        self.active = self.active.other();
    }

    /// True when the active slot is occupied by an ad transcoder,
    /// whether or not it has been published yet.
    #[must_use]
    pub fn ad_occupies_active(&self) -> bool {
        self.current.as_ref().is_some_and(TranscoderHandle::is_ad)
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_always_partition() {
        let mut state = RuntimeState::new();
        assert_eq!(state.active(), Slot::A);
        assert_eq!(state.next_slot(), Slot::B);

        state.swap();
        assert_eq!(state.active(), Slot::B);
        assert_eq!(state.next_slot(), Slot::A);
    }

    #[test]
    fn slot_parity_holds_under_event_fuzz() {
        // Drive the slot/flag state through a long pseudo-random event
        // sequence and check the invariants at every step.
        let mut state = RuntimeState::new();
        let mut rng: u64 = 0x9e3779b97f4a7c15;

        for _ in 0..10_000 {
            rng ^= rng << 13;
            rng ^= rng >> 7;
            rng ^= rng << 17;

            match rng % 5 {
                0 => {
                    // transition: swap, promote preload
                    state.swap();
                    state.preload_ready = false;
                    state.is_playing = true;
                    state.playing_ad = false;
                }
                1 => {
                    // preload spawned
                    if !state.preload_ready {
                        state.is_preloading = true;
                    }
                }
                2 => {
                    // preload became ready
                    if state.is_preloading {
                        state.is_preloading = false;
                        state.preload_ready = true;
                    }
                }
                3 => {
                    // current exited
                    state.is_playing = false;
                    state.playing_ad = false;
                }
                _ => {
                    // ad published
                    if !state.is_playing {
                        state.is_playing = true;
                        state.playing_ad = true;
                    }
                }
            }

            // activeSlot and nextSlot always cover {A, B} and differ.
            assert_ne!(state.active(), state.next_slot());
            assert_eq!(state.active().other(), state.next_slot());
            // preloadReady and isPreloading never hold together.
            assert!(!(state.preload_ready && state.is_preloading));
            // playingAd implies isPlaying.
            assert!(!state.playing_ad || state.is_playing);
        }
    }
}
