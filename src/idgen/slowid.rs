//! Low-rate ids that stay below 2^53
//!
//! ```text
//! | 37 bits: seconds since epoch | 10 bits: worker | 6 bits: sequence |
//! ```
//!
//! Safe to hand to clients that parse numbers as IEEE doubles. At most 64
//! ids per second per worker; bursts borrow upcoming seconds.

use chrono::Utc;
use std::sync::{Mutex, PoisonError};

use super::snowflake::{EPOCH_MS, MAX_WORKER_ID};

const EPOCH_SECS: i64 = EPOCH_MS / 1000;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 6;
const SEQUENCE_MASK: u32 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct State {
    last_secs: i64,
    sequence: u32,
}

/// Per-namespace id generator
#[derive(Debug)]
pub struct SlowId {
    worker_id: u32,
    state: Mutex<State>,
}

impl SlowId {
    /// `worker_id` is masked to 10 bits; callers validate it beforehand
    pub fn new(worker_id: u32) -> Self {
        Self {
            worker_id: worker_id & MAX_WORKER_ID,
            state: Mutex::new(State {
                last_secs: -1,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut secs = now.max(state.last_secs);
        if secs == state.last_secs {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                secs += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_secs = secs;

        ((secs - EPOCH_SECS) << (WORKER_BITS + SEQUENCE_BITS))
            | (i64::from(self.worker_id) << SEQUENCE_BITS)
            | i64::from(state.sequence)
    }
}

/// Split an id into (unix seconds, worker, sequence)
pub fn decompose(id: i64) -> (i64, u32, u32) {
    let secs = (id >> (WORKER_BITS + SEQUENCE_BITS)) + EPOCH_SECS;
    let worker = ((id >> SEQUENCE_BITS) as u32) & MAX_WORKER_ID;
    let sequence = (id as u32) & SEQUENCE_MASK;
    (secs, worker, sequence)
}
