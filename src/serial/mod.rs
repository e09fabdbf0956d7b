//! Decoding of the breadboard's `"<cell>,<ohms>"` line protocol into city operations.

mod link;

pub use link::{ConnectionStatus, SerialLink, SerialSource, SharedCity};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    buildings::{BuildingKind, RESISTANCE_BANDS},
    city::{CityError, CityState, GRID_SIZE},
};

pub const DEFAULT_MAX_LINE_BYTES: usize = 256;

const CELL_COUNT: i64 = (GRID_SIZE * GRID_SIZE) as i64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed record '{0}'")]
    MalformedRecord(String),
    #[error("cell index {0} is outside 0..=24")]
    InvalidCellIndex(i64),
    #[error("no building matches a resistance of {0} ohms")]
    UnrecognizedResistance(f64),
    #[error("discarded {0} buffered bytes without a line terminator")]
    LineTooLong(usize),
}

/// What became of one framed record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Placed { x: usize, z: usize, kind: BuildingKind },
    Cleared { x: usize, z: usize },
    AlreadyEmpty { x: usize, z: usize },
    /// The city refused the operation; the record is consumed anyway.
    Rejected(CityError),
    Dropped(DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecoderState {
    #[default]
    Idle,
    Reading,
    Closed,
}

#[derive(Debug)]
pub struct SerialInputDecoder {
    buffer: String,
    state: DecoderState,
    max_line_bytes: usize,
    // Set after an overlong line is dropped; input is skipped through the next newline.
    discarding: bool,
}

impl SerialInputDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            state: DecoderState::Idle,
            max_line_bytes,
            discarding: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Starts (or restarts after a reconnect) reading with an empty buffer.
    pub fn open(&mut self) {
        self.buffer.clear();
        self.discarding = false;
        self.state = DecoderState::Reading;
    }

    /// Stops reading. An unterminated trailing record is discarded, never processed.
    pub fn close(&mut self) {
        if !self.buffer.is_empty() {
            debug!(partial = %self.buffer, "discarding unterminated serial record");
        }
        self.buffer.clear();
        self.discarding = false;
        self.state = DecoderState::Closed;
    }

    pub fn feed(&mut self, chunk: &str, city: &mut CityState) -> Vec<RecordOutcome> {
        let mut outcomes = Vec::new();
        if self.state != DecoderState::Reading {
            debug!(state = ?self.state, "ignoring serial input while not reading");
            return outcomes;
        }

        self.buffer.push_str(chunk);
        if self.discarding {
            match self.buffer.find('\n') {
                Some(end) => {
                    self.buffer.drain(..=end);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return outcomes;
                }
            }
        }
        while let Some(end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=end).collect();
            let record = line.trim();
            if record.is_empty() {
                continue;
            }
            outcomes.push(self.process_record(record, city));
        }

        if self.buffer.len() > self.max_line_bytes {
            let err = DecodeError::LineTooLong(self.buffer.len());
            warn!("{err}");
            self.buffer.clear();
            self.discarding = true;
            outcomes.push(RecordOutcome::Dropped(err));
        }
        outcomes
    }

    pub fn process_record(&self, record: &str, city: &mut CityState) -> RecordOutcome {
        let (index, ohms) = match parse_record(record) {
            Ok(parsed) => parsed,
            Err(err) => return dropped(err),
        };
        let (x, z) = match convert_cell_index(index) {
            Ok(position) => position,
            Err(err) => return dropped(err),
        };

        if ohms == 0.0 {
            if city.cell(x, z).is_some_and(|cell| cell.is_empty()) {
                debug!(index, x, z, "cell already empty");
                return RecordOutcome::AlreadyEmpty { x, z };
            }
            info!(index, x, z, "device cleared cell");
            return match city.clear_cell(x as i32, z as i32) {
                Ok(()) => RecordOutcome::Cleared { x, z },
                Err(err) => RecordOutcome::Rejected(err),
            };
        }

        let Some(kind) = identify_building_kind(ohms) else {
            return dropped(DecodeError::UnrecognizedResistance(ohms));
        };
        info!(index, x, z, %kind, ohms, "device placed building");
        match city.place_building(x as i32, z as i32, kind) {
            Ok(()) => RecordOutcome::Placed { x, z, kind },
            Err(err) => {
                debug!(index, "placement from device refused: {err}");
                RecordOutcome::Rejected(err)
            }
        }
    }
}

impl Default for SerialInputDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn dropped(err: DecodeError) -> RecordOutcome {
    warn!("{err}");
    RecordOutcome::Dropped(err)
}

// Fields must parse whole: trailing junk such as "300ohm" makes the record
// malformed instead of being cut off at the first non-digit.
fn parse_record(record: &str) -> Result<(i64, f64), DecodeError> {
    let malformed = || DecodeError::MalformedRecord(record.to_string());
    let fields: Vec<&str> = record.trim().split(',').collect();
    let [index, ohms] = fields.as_slice() else {
        return Err(malformed());
    };
    let index = index.trim().parse::<i64>().map_err(|_| malformed())?;
    let ohms = ohms
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(malformed)?;
    Ok((index, ohms))
}

/// Maps a board cell number to grid `(x, z)`. The board counts rows from the
/// bottom, so the row is flipped onto the z axis.
pub fn convert_cell_index(index: i64) -> Result<(usize, usize), DecodeError> {
    if !(0..CELL_COUNT).contains(&index) {
        return Err(DecodeError::InvalidCellIndex(index));
    }
    let size = GRID_SIZE as i64;
    let row = index / size;
    let col = index % size;
    Ok((col as usize, (size - 1 - row) as usize))
}

pub fn identify_building_kind(ohms: f64) -> Option<BuildingKind> {
    RESISTANCE_BANDS
        .iter()
        .find(|band| band.contains(ohms))
        .map(|band| band.kind)
}
