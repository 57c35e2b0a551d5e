//! Probe tracer — records the internal path of a single simulated
//! operation without mutating the engine.
//!
//! A trace wraps a shared borrow of an engine and replays the probe logic
//! of a `get` or `put`, capturing every slot or bucket position inspected:
//! its state, whether the occupant matched, and a hex rendering of the
//! occupant's key. The terminal tells how the walk ended — a match, an
//! empty slot, a Robin Hood cutoff, or (for put simulations) where the
//! entry would land and whether it would displace an occupant.
//!
//! Tracing is strictly side-effect-free: no counters move, no histogram
//! observation is recorded, no slot changes. Diagnostic tools consume the
//! raw trace data; rendering is out of scope here. The store applies the
//! traced operation afterwards when the caller asks for it.


use crate::hash::{HexKey, hash_key};
use crate::table::{ChainTable, Engine, RobinHoodTable, Slot};

// ------------------------------------------------------------------------------------------------
// Trace data model
// ------------------------------------------------------------------------------------------------

/// Which operation is being simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    /// Simulate a lookup.
    Get,

    /// Simulate an insert (or in-place replace).
    Put,
}

/// State of an inspected slot or bucket position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    /// Nothing stored at this position.
    Empty,

    /// A live entry.
    Occupied,

    /// A Robin Hood tombstone.
    Tombstone,
}

/// One inspected position along the probe path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceStep {
    /// 1-based position in the walk.
    pub step: usize,

    /// Slot index (Robin Hood) or bucket index (chaining).
    pub index: usize,

    /// What the position held.
    pub state: TraceState,

    /// Whether the occupant's key equals the probed key.
    pub matches: bool,

    /// Hex rendering of the occupant's key, when occupied.
    pub key_repr: Option<String>,
}

/// How the probe walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceTerminal {
    /// The probed key was found.
    Match,

    /// The walk ran into an empty slot (or exhausted the bucket).
    Empty,

    /// A richer occupant proved the key absent before any empty slot.
    AbsentByRobinHoodCutoff,

    /// A put simulation: the entry would be placed at this index.
    WouldInsertAt(usize),

    /// A put simulation: the entry would displace the occupant of this
    /// index and start a displacement chain.
    WouldDisplace(usize),
}

/// The ordered record of one simulated operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTrace {
    /// The simulated operation.
    pub op: TraceOp,

    /// Hex rendering of the probed key.
    pub key_repr: String,

    /// Every inspected position, in probe order.
    pub steps: Vec<TraceStep>,

    /// How the walk ended.
    pub terminal: TraceTerminal,
}

impl ProbeTrace {
    /// Number of positions inspected.
    pub fn path_len(&self) -> usize {
        self.steps.len()
    }
}

// ------------------------------------------------------------------------------------------------
// Engine dispatch
// ------------------------------------------------------------------------------------------------

/// Record the probe path the given operation would take on `engine`.
pub(crate) fn trace_engine(engine: &Engine, op: TraceOp, key: &[u8]) -> ProbeTrace {
    match engine {
        Engine::Chaining(table) => trace_chaining(table, op, key),
        Engine::RobinHood(table) => trace_robinhood(table, op, key),
    }
}

// ------------------------------------------------------------------------------------------------
// Chaining walks
// ------------------------------------------------------------------------------------------------

fn trace_chaining(table: &ChainTable, op: TraceOp, key: &[u8]) -> ProbeTrace {
    let hash = hash_key(table.seed(), key);
    let (bucket_idx, bucket) = table.bucket_for(hash);
    let mut steps = Vec::new();

    if bucket.is_empty() {
        steps.push(TraceStep {
            step: 1,
            index: bucket_idx,
            state: TraceState::Empty,
            matches: false,
            key_repr: None,
        });
        let terminal = match op {
            TraceOp::Get => TraceTerminal::Empty,
            TraceOp::Put => TraceTerminal::WouldInsertAt(bucket_idx),
        };
        return ProbeTrace {
            op,
            key_repr: HexKey(key).to_string(),
            steps,
            terminal,
        };
    }

    let mut matched = false;
    for entry in bucket {
        let matches = entry.hash == hash && entry.key.as_slice() == key;
        steps.push(TraceStep {
            step: steps.len() + 1,
            index: bucket_idx,
            state: TraceState::Occupied,
            matches,
            key_repr: Some(HexKey(&entry.key).to_string()),
        });
        if matches {
            matched = true;
            break;
        }
    }

    let terminal = if matched {
        TraceTerminal::Match
    } else {
        match op {
            TraceOp::Get => TraceTerminal::Empty,
            TraceOp::Put => TraceTerminal::WouldInsertAt(bucket_idx),
        }
    };

    ProbeTrace {
        op,
        key_repr: HexKey(key).to_string(),
        steps,
        terminal,
    }
}

// ------------------------------------------------------------------------------------------------
// Robin Hood walks
// ------------------------------------------------------------------------------------------------

fn trace_robinhood(table: &RobinHoodTable, op: TraceOp, key: &[u8]) -> ProbeTrace {
    let hash = hash_key(table.seed(), key);
    let slots = table.slots();
    let capacity = slots.len();
    let mask = capacity - 1;
    let ideal = (hash as usize) & mask;

    let mut steps = Vec::new();
    let mut idx = ideal;
    let mut dist = 0usize;
    let mut first_tombstone: Option<usize> = None;

    let terminal = loop {
        let (state, matches, key_repr, occupant_dist) = match &slots[idx] {
            Slot::Empty => (TraceState::Empty, false, None, None),
            Slot::Tombstone => (TraceState::Tombstone, false, None, None),
            Slot::Occupied(entry) => {
                let matches = entry.hash == hash && entry.key.as_slice() == key;
                let occupant_ideal = (entry.hash as usize) & mask;
                let occupant_dist = (idx + capacity - occupant_ideal) & mask;
                (
                    TraceState::Occupied,
                    matches,
                    Some(HexKey(&entry.key).to_string()),
                    Some(occupant_dist),
                )
            }
        };
        steps.push(TraceStep {
            step: steps.len() + 1,
            index: idx,
            state,
            matches,
            key_repr,
        });

        match state {
            TraceState::Empty => {
                break match op {
                    TraceOp::Get => TraceTerminal::Empty,
                    TraceOp::Put => TraceTerminal::WouldInsertAt(first_tombstone.unwrap_or(idx)),
                };
            }
            TraceState::Tombstone => {
                if first_tombstone.is_none() {
                    first_tombstone = Some(idx);
                }
            }
            TraceState::Occupied => {
                if matches {
                    break TraceTerminal::Match;
                }
                if let Some(occupant_dist) = occupant_dist {
                    match op {
                        TraceOp::Get => {
                            if occupant_dist < dist {
                                break TraceTerminal::AbsentByRobinHoodCutoff;
                            }
                        }
                        TraceOp::Put => {
                            if dist > occupant_dist {
                                break match first_tombstone {
                                    Some(t) => TraceTerminal::WouldInsertAt(t),
                                    None => TraceTerminal::WouldDisplace(idx),
                                };
                            }
                        }
                    }
                }
            }
        }

        idx = (idx + 1) & mask;
        dist += 1;
        if dist >= capacity {
            // A full wrap without resolution can only happen on a table
            // with no empty slots; report it as a cutoff-style absence.
            break TraceTerminal::AbsentByRobinHoodCutoff;
        }
    };

    ProbeTrace {
        op,
        key_repr: HexKey(key).to_string(),
        steps,
        terminal,
    }
}
