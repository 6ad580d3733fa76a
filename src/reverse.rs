use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::iter::FusedIterator;

/// Number of bytes read per step unless configured otherwise.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// A line yielded by [`ReverseLineReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Position in emission order. `0` is the last line of the file.
    pub index: u64,
    /// Line content without its trailing `\n`.
    ///
    /// Invalid UTF-8 is replaced with `U+FFFD`.
    pub text: String,
}

/// Reads the lines of a seekable stream last-to-first.
///
/// Reads fixed-size blocks backward from the end of the stream, so memory use
/// is bounded by the buffer size plus the longest line, regardless of how
/// large the stream is. Every line is yielded, empty ones included; a single
/// trailing `\n` at the end of the stream does not produce an empty last line.
/// Reversing the output reconstructs the stream's lines exactly.
///
/// The reader is a single pass: once exhausted (or after an I/O error) it
/// keeps returning `None`. Dropping it early is fine. The stream itself is
/// never closed by the reader; pass `&mut File` to keep ownership of the
/// handle, or use [`into_inner`](Self::into_inner) to get it back.
///
/// # Examples
///
/// ```
/// use kernscan::ReverseLineReader;
/// use std::io::Cursor;
///
/// let reader = ReverseLineReader::new(Cursor::new("first\nsecond\nthird\n")).unwrap();
/// let lines: Vec<String> = reader.map(|line| line.unwrap().text).collect();
/// assert_eq!(lines, ["third", "second", "first"]);
/// ```
pub struct ReverseLineReader<R> {
    inner: R,
    buf: Vec<u8>,
    size: u64,
    /// Start of the region already read; bytes at or past it are consumed.
    pos: u64,
    /// Tail of a line whose beginning lies in a block not read yet.
    carry: Vec<u8>,
    /// Complete lines from the current block, in emission order.
    pending: VecDeque<Vec<u8>>,
    seen_newline: bool,
    emitted: u64,
    failed: bool,
}

impl<R: Read + Seek> ReverseLineReader<R> {
    /// Create a reader using [`DEFAULT_BUFFER_SIZE`].
    ///
    /// # Errors
    ///
    /// Returns an error if seeking to the end of the stream fails.
    pub fn new(inner: R) -> io::Result<Self> {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    /// Create a reader that reads `buffer_size` bytes per step.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] if `buffer_size` is zero, or the
    /// underlying error if seeking to the end of the stream fails.
    pub fn with_buffer_size(mut inner: R, buffer_size: usize) -> io::Result<Self> {
        if buffer_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer size must be non-zero",
            ));
        }

        let size = inner.seek(SeekFrom::End(0))?;

        Ok(ReverseLineReader {
            inner,
            buf: vec![0u8; buffer_size],
            size,
            pos: size,
            carry: Vec::new(),
            pending: VecDeque::new(),
            seen_newline: false,
            emitted: 0,
            failed: false,
        })
    }

    /// Size of the stream when the reader was created.
    pub fn stream_len(&self) -> u64 {
        self.size
    }

    /// Number of bytes read from the end of the stream so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.size - self.pos
    }

    /// Give back the underlying stream, discarding any buffered state.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the block ending at `pos` and split it into complete lines.
    fn fill(&mut self) -> io::Result<()> {
        let len = self.pos.min(self.buf.len() as u64) as usize;
        let start = self.pos - len as u64;

        self.inner.seek(SeekFrom::Start(start))?;
        let block = &mut self.buf[..len];
        self.inner.read_exact(block)?;
        self.pos = start;

        let mut end = len;
        while let Some(newline) = block[..end].iter().rposition(|&b| b == b'\n') {
            let mut line = block[newline + 1..end].to_vec();
            line.append(&mut self.carry);
            end = newline;

            // The bytes after the stream's final newline are not a line.
            if !self.seen_newline {
                self.seen_newline = true;
                if line.is_empty() {
                    continue;
                }
            }
            self.pending.push_back(line);
        }

        let mut head = block[..end].to_vec();
        head.append(&mut self.carry);
        self.carry = head;

        if self.pos == 0 {
            self.pending.push_back(std::mem::take(&mut self.carry));
        }
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for ReverseLineReader<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(bytes) = self.pending.pop_front() {
                let text = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
                };
                let line = RawLine {
                    index: self.emitted,
                    text,
                };
                self.emitted += 1;
                return Some(Ok(line));
            }

            if self.failed || self.pos == 0 {
                return None;
            }

            if let Err(e) = self.fill() {
                self.failed = true;
                self.carry = Vec::new();
                return Some(Err(e));
            }
        }
    }
}

impl<R: Read + Seek> FusedIterator for ReverseLineReader<R> {}
