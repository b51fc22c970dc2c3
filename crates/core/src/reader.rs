//! Sequential reader over a stream of packed trace records.

use crate::record::{RecordError, Result, TraceRecord, RECORD_SIZE};
use std::io::{ErrorKind, Read};

/// Iterates over records in an already-decompressed byte stream.
///
/// A clean end of stream on a record boundary ends iteration. A stream that
/// ends in the middle of a record yields [`RecordError::Truncated`] once.
pub struct TraceReader<R> {
    inner: R,
    records_read: u64,
    done: bool,
}

impl<R: Read> TraceReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            records_read: 0,
            done: false,
        }
    }

    /// Number of records successfully read so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next record, `Ok(None)` at end of stream.
    pub fn read_record(&mut self) -> Result<Option<TraceRecord>> {
        if self.done {
            return Ok(None);
        }

        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Err(e.into());
                }
            }
        }

        match filled {
            0 => {
                self.done = true;
                Ok(None)
            }
            RECORD_SIZE => {
                let record = TraceRecord::from_bytes(&buf)?;
                self.records_read += 1;
                Ok(Some(record))
            }
            actual => {
                self.done = true;
                Err(RecordError::Truncated {
                    expected: RECORD_SIZE,
                    actual,
                })
            }
        }
    }
}

impl<R: Read> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(addr: u64) -> TraceRecord {
        TraceRecord {
            instruction_addr: addr,
            size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_read_all_records() {
        let mut stream = Vec::new();
        for addr in [0x1000, 0x1004, 0x1008] {
            record(addr).encode_into(&mut stream).unwrap();
        }

        let records: Vec<_> = TraceReader::new(stream.as_slice())
            .collect::<Result<_>>()
            .unwrap();
        let addrs: Vec<u64> = records.iter().map(|r| r.instruction_addr).collect();
        assert_eq!(addrs, vec![0x1000, 0x1004, 0x1008]);
    }

    #[test]
    fn test_empty_stream() {
        let mut reader = TraceReader::new(&[][..]);
        assert!(reader.read_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 0);
    }

    #[test]
    fn test_truncated_tail() {
        let mut stream = Vec::new();
        record(0x1000).encode_into(&mut stream).unwrap();
        record(0x1004).encode_into(&mut stream).unwrap();
        stream.truncate(RECORD_SIZE + 10);

        let mut reader = TraceReader::new(stream.as_slice());
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(RecordError::Truncated { actual: 10, .. }))
        ));
        assert!(reader.next().is_none());
        assert_eq!(reader.records_read(), 1);
    }
}
