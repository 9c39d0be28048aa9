//! Memory-backed streams crossing the FFI boundary.
//!
//! `MemReader` presents a caller-owned byte region as a sequential input
//! stream without copying; `OutputSink` is the growable buffer an engine
//! writes its result into. Together they carry the run/copy/free buffer
//! protocol in `ffi`.

use std::io::{self, BufRead, Cursor, Read, Seek, SeekFrom, Write};

/// Read-only sequential stream over a borrowed byte region.
///
/// Positioned at the start on construction. Reading past the end reports
/// end of stream (`Ok(0)`), never an error. Seeking past the end is allowed
/// and leaves the reader at end of stream; seeking before position zero is
/// an `InvalidInput` error. The region is borrowed for the lifetime of the
/// reader and never copied or mutated.
#[derive(Debug)]
pub struct MemReader<'a> {
    data: &'a [u8],
    pos: u64,
}

impl<'a> MemReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        MemReader { data, pos: 0 }
    }

    /// Bytes left before end of stream.
    pub fn remaining(&self) -> usize {
        (self.data.len() as u64).saturating_sub(self.pos) as usize
    }

    fn tail(&self) -> &'a [u8] {
        let start = self.pos.min(self.data.len() as u64) as usize;
        &self.data[start..]
    }
}

impl Read for MemReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let tail = self.tail();
        let n = buf.len().min(tail.len());
        buf[..n].copy_from_slice(&tail[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl BufRead for MemReader<'_> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        Ok(self.tail())
    }

    fn consume(&mut self, amt: usize) {
        self.pos = self.pos.saturating_add(amt as u64);
    }
}

impl Seek for MemReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let (base, offset) = match pos {
            SeekFrom::Start(n) => {
                self.pos = n;
                return Ok(self.pos);
            }
            SeekFrom::End(n) => (self.data.len() as u64, n),
            SeekFrom::Current(n) => (self.pos, n),
        };
        let next = if offset >= 0 {
            base.checked_add(offset as u64)
        } else {
            base.checked_sub(offset.unsigned_abs())
        };
        match next {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

/// Growable in-memory byte buffer that receives an engine's run output.
///
/// Created empty per invocation; the engine appends through `Write`. Once
/// the producing run returns, the sink is complete: `measure` reports the
/// total size and `copy_to` re-reads the content from the start as many
/// times as the caller asks.
#[derive(Debug, Default)]
pub struct OutputSink {
    buf: Cursor<Vec<u8>>,
}

impl OutputSink {
    pub fn new() -> Self {
        OutputSink {
            buf: Cursor::new(Vec::new()),
        }
    }

    /// Total size in bytes, measured by seeking to the end of the buffer.
    pub fn measure(&mut self) -> u64 {
        let end = self.buf.get_ref().len() as u64;
        self.buf.set_position(end);
        self.buf.position()
    }

    /// Copy from the start of the buffer into `dest`, returning the number
    /// of bytes copied. The read cursor is repositioned to the start first,
    /// so repeated calls yield identical bytes.
    pub fn copy_to(&mut self, dest: &mut [u8]) -> io::Result<usize> {
        self.buf.set_position(0);
        let mut copied = 0;
        while copied < dest.len() {
            let n = self.buf.read(&mut dest[copied..])?;
            if n == 0 {
                break;
            }
            copied += n;
        }
        Ok(copied)
    }

    pub fn len(&self) -> usize {
        self.buf.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.get_ref().is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.get_ref()
    }
}

impl Write for OutputSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buf.flush()
    }
}

impl Read for OutputSink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.buf.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_reads_region_to_end() {
        let mut reader = MemReader::new(b"hello world");
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_partial_reads() {
        let mut reader = MemReader::new(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        // Past the end: end of stream, not an error
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_reader_lines() {
        let reader = MemReader::new(b"one\ntwo\nthree");
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_reader_seek() {
        let mut reader = MemReader::new(b"0123456789");
        assert_eq!(reader.seek(SeekFrom::End(0)).unwrap(), 10);
        assert_eq!(reader.seek(SeekFrom::Current(-4)).unwrap(), 6);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "6789");

        assert_eq!(reader.seek(SeekFrom::Start(20)).unwrap(), 20);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        reader.seek(SeekFrom::Start(0)).unwrap();
        assert!(reader.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn test_reader_empty_region() {
        let mut reader = MemReader::new(&[]);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_sink_write_then_measure() {
        let mut sink = OutputSink::new();
        sink.write_all(b"some engine output").unwrap();
        assert_eq!(sink.measure(), 18);
        assert_eq!(sink.len(), 18);
    }

    #[test]
    fn test_sink_copy_is_repeatable() {
        let mut sink = OutputSink::new();
        sink.write_all(b"abcdef").unwrap();
        let len = sink.measure() as usize;

        let mut first = vec![0u8; len];
        assert_eq!(sink.copy_to(&mut first).unwrap(), len);
        let mut second = vec![0u8; len];
        assert_eq!(sink.copy_to(&mut second).unwrap(), len);
        assert_eq!(first, second);
        assert_eq!(&first, b"abcdef");
    }

    #[test]
    fn test_sink_copy_shorter_than_content() {
        let mut sink = OutputSink::new();
        sink.write_all(b"abcdef").unwrap();
        let mut out = vec![0u8; 3];
        assert_eq!(sink.copy_to(&mut out).unwrap(), 3);
        assert_eq!(&out, b"abc");
    }

    #[test]
    fn test_sink_starts_empty() {
        let mut sink = OutputSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.measure(), 0);
    }
}
