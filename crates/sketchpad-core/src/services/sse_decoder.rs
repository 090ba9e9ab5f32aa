use thiserror::Error;

/// Largest protocol unit accepted before the stream is declared malformed.
pub const DEFAULT_MAX_UNIT_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("protocol unit exceeds {limit} bytes")]
    UnitTooLarge { limit: usize },

    #[error("protocol unit is not valid UTF-8")]
    InvalidUtf8,
}

/// One server-sent event: its optional name and the joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseUnit {
    pub event: Option<String>,
    pub data: String,
}

/// Push-based server-sent-events framer.
///
/// Bytes arrive in frames of any size. Complete units are handed back as soon
/// as their terminating blank line is seen and their bytes are dropped, so at
/// most one partial unit is ever buffered.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a boundary.
    scanned: usize,
    max_unit_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_unit_bytes(DEFAULT_MAX_UNIT_BYTES)
    }

    pub fn with_max_unit_bytes(max_unit_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_unit_bytes,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one frame and collect every unit it completes.
    pub fn push(&mut self, frame: &[u8]) -> Result<Vec<SseUnit>, SseError> {
        // CR only ever appears as half of a CRLF line ending; JSON escapes it inside strings.
        self.buffer.extend(frame.iter().copied().filter(|b| *b != b'\r'));

        let mut units = Vec::new();
        while let Some(end) = self.find_boundary() {
            if end > self.max_unit_bytes {
                return Err(SseError::UnitTooLarge {
                    limit: self.max_unit_bytes,
                });
            }
            let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
            self.scanned = 0;
            if let Some(unit) = parse_unit(&raw[..end])? {
                units.push(unit);
            }
        }

        if self.buffer.len() > self.max_unit_bytes {
            return Err(SseError::UnitTooLarge {
                limit: self.max_unit_bytes,
            });
        }
        Ok(units)
    }

    /// Flush at end of stream: a trailing unit without its blank line still counts.
    pub fn finish(&mut self) -> Result<Option<SseUnit>, SseError> {
        let raw = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        parse_unit(&raw)
    }

    fn find_boundary(&mut self) -> Option<usize> {
        let start = self.scanned.saturating_sub(1);
        let found = self.buffer[start..]
            .windows(2)
            .position(|w| w == b"\n\n")
            .map(|pos| start + pos);
        if found.is_none() {
            self.scanned = self.buffer.len();
        }
        found
    }
}

fn parse_unit(raw: &[u8]) -> Result<Option<SseUnit>, SseError> {
    let text = std::str::from_utf8(raw).map_err(|_| SseError::InvalidUtf8)?;

    let mut event = None;
    let mut data: Option<String> = None;
    for line in text.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            "event" => event = Some(value.to_string()),
            // id and retry carry nothing we need.
            _ => {}
        }
    }

    Ok(data.map(|data| SseUnit { event, data }))
}
