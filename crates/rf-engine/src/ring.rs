//! Ingestion ring buffers
//!
//! Single-producer / multi-consumer byte arena with monotone 64-bit
//! cursors under one mutex. The producer is the RF callback and must never
//! block on a consumer; a full ring silently drops the incoming fragment,
//! which the orchestrator later observes as acquisition starvation.
//!
//! Index into the arena is `cursor % size`; `head - tail <= size` holds
//! whenever the lock is held.

use parking_lot::Mutex;

use rf_audio::AudioSource;
use rf_core::AUDIO_CHUNK_SAMPLES;

/// Default main-ring capacity (holds well over one acquisition).
pub const MAIN_RING_BYTES: usize = 100 * 1024 * 1024;

/// Default audio-ring capacity: eight chunks of interleaved I/Q.
pub const AUDIO_RING_BYTES: usize = 8 * AUDIO_CHUNK_SAMPLES * 2;

struct RingState {
    arena: Vec<u8>,
    head: u64,
    tail: u64,
}

impl Drop for RingState {
    fn drop(&mut self) {
        // Defensive erase before release.
        self.arena.fill(0);
    }
}

/// Lock-guarded byte ring.
pub struct IngestionRing {
    size: usize,
    state: Mutex<RingState>,
}

impl IngestionRing {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            state: Mutex::new(RingState {
                arena: vec![0u8; size],
                head: 0,
                tail: 0,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Copies as much of `src` as fits, splitting around the physical end.
    /// Returns the bytes actually written; zero free space drops the
    /// fragment entirely.
    pub fn write(&self, src: &[u8]) -> usize {
        let mut state = self.state.lock();
        let free = self.size - (state.head - state.tail) as usize;
        let to_write = src.len().min(free);
        if to_write == 0 {
            return 0;
        }

        let head_idx = (state.head % self.size as u64) as usize;
        let chunk1 = to_write.min(self.size - head_idx);
        let chunk2 = to_write - chunk1;

        state.arena[head_idx..head_idx + chunk1].copy_from_slice(&src[..chunk1]);
        if chunk2 > 0 {
            state.arena[..chunk2].copy_from_slice(&src[chunk1..to_write]);
        }

        state.head += to_write as u64;
        to_write
    }

    /// Copies up to `dst.len()` bytes out, returning how many were read.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let available = (state.head - state.tail) as usize;
        let to_read = dst.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let tail_idx = (state.tail % self.size as u64) as usize;
        let chunk1 = to_read.min(self.size - tail_idx);
        let chunk2 = to_read - chunk1;

        dst[..chunk1].copy_from_slice(&state.arena[tail_idx..tail_idx + chunk1]);
        if chunk2 > 0 {
            dst[chunk1..to_read].copy_from_slice(&state.arena[..chunk2]);
        }

        state.tail += to_read as u64;
        to_read
    }

    /// Bytes ready for reading.
    pub fn available(&self) -> usize {
        let state = self.state.lock();
        (state.head - state.tail) as usize
    }

    /// Zeroes cursors and the arena (used across retunes so no pre-tune
    /// sample survives into the new epoch).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.arena.fill(0);
        state.head = 0;
        state.tail = 0;
    }

    #[cfg(test)]
    fn cursors(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.head, state.tail)
    }

    #[cfg(test)]
    fn arena_is_zeroed(&self) -> bool {
        let state = self.state.lock();
        state.arena.iter().all(|&b| b == 0)
    }
}

impl AudioSource for IngestionRing {
    fn available(&self) -> usize {
        IngestionRing::available(self)
    }

    fn read(&self, dst: &mut [u8]) -> usize {
        IngestionRing::read(self, dst)
    }
}
