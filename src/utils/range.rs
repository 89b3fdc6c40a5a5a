/// A satisfiable single byte range, both ends inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// Header is not of the form `bytes=start-[end]`
    Malformed,
    /// Range lies outside the file
    NotSatisfiable,
}

/// Parses a single `bytes=start-[end]` range against a file of `size` bytes.
///
/// Only the first range of a multi-range header is honoured. Suffix ranges
/// (`bytes=-500`) are not supported and count as malformed.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, RangeError> {
    let spec = header
        .trim()
        .strip_prefix("bytes=")
        .ok_or(RangeError::Malformed)?;
    let first = spec.split(',').next().unwrap_or("").trim();
    let (start, end) = first.split_once('-').ok_or(RangeError::Malformed)?;

    let start: u64 = start.trim().parse().map_err(|_| RangeError::Malformed)?;
    let end: u64 = match end.trim() {
        "" => size.checked_sub(1).ok_or(RangeError::NotSatisfiable)?,
        e => e.parse().map_err(|_| RangeError::Malformed)?,
    };

    if start >= size || end >= size || start > end {
        return Err(RangeError::NotSatisfiable);
    }

    Ok(ByteRange { start, end })
}
