//! Fixed-width, text-encoded request header (§4.4.1) and the global,
//! immutable-after-startup request-size limits (§3).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{RequestError, ServerError};

/// Maximum size of the serialized request header, including the trailing
/// newline.
pub const REQUEST_BUFFER_SIZE: usize = 512;

/// Maximum number of methylome names accepted in a single request,
/// independent of the header byte budget.
pub const MAX_METHYLOMES_PER_REQUEST: usize = 50;

const MAX_INTERVALS_DEFAULT: u32 = 2_000_000;
const MIN_BIN_SIZE_DEFAULT: u32 = 100;
const MIN_WINDOW_SIZE_DEFAULT: u32 = 100;
const MIN_WINDOW_STEP_DEFAULT: u32 = 50;

static MAX_INTERVALS: AtomicU32 = AtomicU32::new(MAX_INTERVALS_DEFAULT);
static MIN_BIN_SIZE: AtomicU32 = AtomicU32::new(MIN_BIN_SIZE_DEFAULT);
static MIN_WINDOW_SIZE: AtomicU32 = AtomicU32::new(MIN_WINDOW_SIZE_DEFAULT);
static MIN_WINDOW_STEP: AtomicU32 = AtomicU32::new(MIN_WINDOW_STEP_DEFAULT);

/// Process-wide request-size limits, set once at server startup from the
/// parsed config file and read on every subsequent request. Never mutated
/// after startup, so the relaxed-looking atomics here carry no ordering risk
/// in practice; `SeqCst` is used anyway since these are cold, low-frequency
/// accesses rather than a hot loop.
pub mod limits {
    use super::{
        Ordering, MAX_INTERVALS, MAX_INTERVALS_DEFAULT, MIN_BIN_SIZE, MIN_BIN_SIZE_DEFAULT,
        MIN_WINDOW_SIZE, MIN_WINDOW_SIZE_DEFAULT, MIN_WINDOW_STEP, MIN_WINDOW_STEP_DEFAULT,
    };

    pub fn set_max_intervals(v: u32) {
        MAX_INTERVALS.store(v, Ordering::SeqCst);
    }
    pub fn max_intervals() -> u32 {
        MAX_INTERVALS.load(Ordering::SeqCst)
    }
    pub fn set_min_bin_size(v: u32) {
        MIN_BIN_SIZE.store(v, Ordering::SeqCst);
    }
    pub fn min_bin_size() -> u32 {
        MIN_BIN_SIZE.load(Ordering::SeqCst)
    }
    pub fn set_min_window_size(v: u32) {
        MIN_WINDOW_SIZE.store(v, Ordering::SeqCst);
    }
    pub fn min_window_size() -> u32 {
        MIN_WINDOW_SIZE.load(Ordering::SeqCst)
    }
    pub fn set_min_window_step(v: u32) {
        MIN_WINDOW_STEP.store(v, Ordering::SeqCst);
    }
    pub fn min_window_step() -> u32 {
        MIN_WINDOW_STEP.load(Ordering::SeqCst)
    }

    /// Reset all limits to their defaults. Exists for test isolation, since
    /// the limits are process-wide statics.
    pub fn reset_to_defaults() {
        MAX_INTERVALS.store(MAX_INTERVALS_DEFAULT, Ordering::SeqCst);
        MIN_BIN_SIZE.store(MIN_BIN_SIZE_DEFAULT, Ordering::SeqCst);
        MIN_WINDOW_SIZE.store(MIN_WINDOW_SIZE_DEFAULT, Ordering::SeqCst);
        MIN_WINDOW_STEP.store(MIN_WINDOW_STEP_DEFAULT, Ordering::SeqCst);
    }
}

/// The six request kinds carried by `request_type` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Intervals = 0,
    IntervalsCovered = 1,
    Bins = 2,
    BinsCovered = 3,
    Windows = 4,
    WindowsCovered = 5,
}

impl RequestType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Intervals),
            1 => Some(Self::IntervalsCovered),
            2 => Some(Self::Bins),
            3 => Some(Self::BinsCovered),
            4 => Some(Self::Windows),
            5 => Some(Self::WindowsCovered),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_covered(self) -> bool {
        matches!(self, Self::IntervalsCovered | Self::BinsCovered | Self::WindowsCovered)
    }

    #[must_use]
    pub fn is_intervals(self) -> bool {
        matches!(self, Self::Intervals | Self::IntervalsCovered)
    }

    #[must_use]
    pub fn is_bins(self) -> bool {
        matches!(self, Self::Bins | Self::BinsCovered)
    }

    #[must_use]
    pub fn is_windows(self) -> bool {
        matches!(self, Self::Windows | Self::WindowsCovered)
    }
}

/// A parsed request: `(request_type, index_hash, aux_value,
/// methylome_names)`. `aux_value` means `n_intervals`, `bin_size`, or
/// `(window_size << 32) | window_step` depending on `request_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub request_type: RequestType,
    pub index_hash: u64,
    pub aux_value: u64,
    pub methylome_names: Vec<String>,
}

impl Request {
    #[must_use]
    pub fn new_intervals(covered: bool, index_hash: u64, n_intervals: u32, methylome_names: Vec<String>) -> Self {
        Self {
            request_type: if covered {
                RequestType::IntervalsCovered
            } else {
                RequestType::Intervals
            },
            index_hash,
            aux_value: u64::from(n_intervals),
            methylome_names,
        }
    }

    #[must_use]
    pub fn new_bins(covered: bool, index_hash: u64, bin_size: u32, methylome_names: Vec<String>) -> Self {
        Self {
            request_type: if covered { RequestType::BinsCovered } else { RequestType::Bins },
            index_hash,
            aux_value: u64::from(bin_size),
            methylome_names,
        }
    }

    #[must_use]
    pub fn new_windows(
        covered: bool,
        index_hash: u64,
        window_size: u32,
        window_step: u32,
        methylome_names: Vec<String>,
    ) -> Self {
        Self {
            request_type: if covered {
                RequestType::WindowsCovered
            } else {
                RequestType::Windows
            },
            index_hash,
            aux_value: get_aux_for_windows(window_size, window_step),
            methylome_names,
        }
    }

    #[must_use]
    pub fn n_intervals(&self) -> u32 {
        self.aux_value as u32
    }

    #[must_use]
    pub fn bin_size(&self) -> u32 {
        self.aux_value as u32
    }

    #[must_use]
    pub fn window_size(&self) -> u32 {
        (self.aux_value >> 32) as u32
    }

    #[must_use]
    pub fn window_step(&self) -> u32 {
        (self.aux_value & 0xffff_ffff) as u32
    }

    /// Validation per §4.5's `handle_request` rules, resolving the
    /// ambiguous window-size/step ternary per §9's Open Questions: report
    /// `window_size_too_small` if the size is below the minimum, else
    /// `window_step_too_small`.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.methylome_names.is_empty() {
            return Err(ServerError::BadRequest);
        }
        if self.methylome_names.len() > MAX_METHYLOMES_PER_REQUEST {
            return Err(ServerError::BadRequest);
        }
        if !self.methylome_names.iter().all(|n| is_valid_methylome_name(n)) {
            return Err(ServerError::InvalidMethylomeName);
        }
        if self.request_type.is_intervals() && self.n_intervals() > limits::max_intervals() {
            return Err(ServerError::TooManyIntervals);
        }
        if self.request_type.is_bins() && self.bin_size() < limits::min_bin_size() {
            return Err(ServerError::BinSizeTooSmall);
        }
        if self.request_type.is_windows() {
            if self.window_size() < limits::min_window_size() {
                return Err(ServerError::WindowSizeTooSmall);
            }
            if self.window_step() < limits::min_window_step() {
                return Err(ServerError::WindowStepTooSmall);
            }
        }
        Ok(())
    }

    /// Serialize as `<request_type>\t<index_hash>\t<aux_value>\t<name>[\t<name>...]\n`.
    #[must_use]
    pub fn to_wire_string(&self) -> String {
        let mut s = format!(
            "{}\t{}\t{}",
            self.request_type as u8, self.index_hash, self.aux_value
        );
        for name in &self.methylome_names {
            s.push('\t');
            s.push_str(name);
        }
        s.push('\n');
        s
    }

    /// §4.4.1: serialize into a fixed-size buffer, failing with
    /// `request_too_large` if the encoded form (plus terminator) exceeds
    /// [`REQUEST_BUFFER_SIZE`].
    pub fn compose(&self) -> Result<[u8; REQUEST_BUFFER_SIZE], RequestError> {
        let s = self.to_wire_string();
        if s.len() > REQUEST_BUFFER_SIZE {
            return Err(RequestError::RequestTooLarge);
        }
        let mut buf = [0u8; REQUEST_BUFFER_SIZE];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        Ok(buf)
    }

    /// Parse a request header from a byte buffer terminated by `\n`,
    /// matching the original's hand-rolled scanner: integers up to the next
    /// `\t`, then delimiter-bounded methylome names restricted to
    /// `[A-Za-z0-9_]`. Two delimiters in a row is a parse error.
    pub fn parse(buf: &[u8]) -> Result<Self, RequestError> {
        let term = buf
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(RequestError::ParseErrorMethylomeNames)?;
        let buf = &buf[..term];

        let mut cursor = 0usize;

        let (request_type_raw, next) = scan_u64(buf, cursor).ok_or(RequestError::ParseErrorRequestType)?;
        cursor = next;
        let request_type =
            RequestType::from_u8(u8::try_from(request_type_raw).map_err(|_| RequestError::ParseErrorRequestType)?)
                .ok_or(RequestError::ParseErrorRequestType)?;

        if buf.get(cursor) != Some(&b'\t') {
            return Err(RequestError::ParseErrorIndexHash);
        }
        cursor += 1;
        let (index_hash, next) = scan_u64(buf, cursor).ok_or(RequestError::ParseErrorIndexHash)?;
        cursor = next;

        if buf.get(cursor) != Some(&b'\t') {
            return Err(RequestError::ParseErrorAuxValue);
        }
        cursor += 1;
        let (aux_value, next) = scan_u64(buf, cursor).ok_or(RequestError::ParseErrorAuxValue)?;
        cursor = next;

        let mut methylome_names = Vec::new();
        loop {
            if buf.get(cursor) != Some(&b'\t') {
                break;
            }
            cursor += 1;
            if buf.get(cursor) == Some(&b'\t') {
                // two delimiters in a row
                return Err(RequestError::ParseErrorMethylomeNames);
            }
            let name_start = cursor;
            while cursor < buf.len() && is_name_byte(buf[cursor]) {
                cursor += 1;
            }
            if name_start == cursor {
                return Err(RequestError::ParseErrorMethylomeNames);
            }
            let name = std::str::from_utf8(&buf[name_start..cursor])
                .map_err(|_| RequestError::ParseErrorMethylomeNames)?
                .to_string();
            methylome_names.push(name);
        }
        if cursor != buf.len() {
            return Err(RequestError::ParseErrorMethylomeNames);
        }

        Ok(Self {
            request_type,
            index_hash,
            aux_value,
            methylome_names,
        })
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let names: Vec<String> = self.methylome_names.iter().map(|n| format!("\"{n}\"")).collect();
        format!(
            r#"{{"request_type": {}, "index_hash": {}, "aux_value": {}, "methylome_names": [{}]}}"#,
            self.request_type as u8,
            self.index_hash,
            self.aux_value,
            names.join(",")
        )
    }
}

/// `aux_value` packing for window requests: `window_size << 32 | window_step`.
#[must_use]
pub fn get_aux_for_windows(window_size: u32, window_step: u32) -> u64 {
    (u64::from(window_size) << 32) | u64::from(window_step)
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_valid_methylome_name(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_name_byte)
}

fn scan_u64(buf: &[u8], start: usize) -> Option<(u64, usize)> {
    let mut cursor = start;
    let digits_start = cursor;
    while cursor < buf.len() && buf[cursor].is_ascii_digit() {
        cursor += 1;
    }
    if cursor == digits_start {
        return None;
    }
    let s = std::str::from_utf8(&buf[digits_start..cursor]).ok()?;
    let v: u64 = s.parse().ok()?;
    Some((v, cursor))
}
