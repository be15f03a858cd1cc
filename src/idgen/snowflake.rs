//! Time-ordered 63-bit ids
//!
//! ```text
//! | 41 bits: ms since epoch | 10 bits: worker | 12 bits: sequence |
//! ```

use chrono::Utc;
use std::sync::{Mutex, PoisonError};

use super::IdError;

/// 2010-11-04T01:42:54.657Z
pub const EPOCH_MS: i64 = 1_288_834_974_657;

const WORKER_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_WORKER_ID: u32 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: u32 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
struct State {
    last_ms: i64,
    sequence: u32,
}

/// Continuous id generator for one worker
#[derive(Debug)]
pub struct Snowflake {
    worker_id: u32,
    state: Mutex<State>,
}

impl Snowflake {
    pub fn new(worker_id: u32) -> Result<Self, IdError> {
        if worker_id > MAX_WORKER_ID {
            return Err(IdError::WorkerIdOutOfRange {
                worker_id: u64::from(worker_id),
                max: MAX_WORKER_ID,
            });
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(State {
                last_ms: -1,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Strictly increasing for this generator.
    ///
    /// When the sequence wraps within one millisecond, or the wall clock
    /// steps back, the timestamp advances past the last one used.
    pub fn next_id(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ms = now.max(state.last_ms);
        if ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                ms += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = ms;

        compose(ms, self.worker_id, state.sequence)
    }
}

fn compose(ms: i64, worker_id: u32, sequence: u32) -> i64 {
    ((ms - EPOCH_MS) << (WORKER_BITS + SEQUENCE_BITS))
        | (i64::from(worker_id) << SEQUENCE_BITS)
        | i64::from(sequence)
}

/// Split an id into (unix ms, worker, sequence)
pub fn decompose(id: i64) -> (i64, u32, u32) {
    let ms = (id >> (WORKER_BITS + SEQUENCE_BITS)) + EPOCH_MS;
    let worker = ((id >> SEQUENCE_BITS) as u32) & MAX_WORKER_ID;
    let sequence = (id as u32) & SEQUENCE_MASK;
    (ms, worker, sequence)
}
