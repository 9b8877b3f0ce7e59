//! Sequential byte sources the decoder reads chunks from

use crate::error::{Error, Result};

/// A readable, append-only byte stream with a logical position
pub trait ChunkStream {
    /// Read exactly `len` bytes at the current position and advance past them
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Logical offset of the next byte from the start of the container
    fn position(&self) -> u64;

    /// Read `len` bytes at logical offset `at` without moving the position
    fn peek_at(&mut self, at: u64, len: usize) -> Result<Vec<u8>>;

    /// Advance past `len` bytes
    fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }
}

/// Stream over a contiguous in-memory container
pub struct SliceStream<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceStream { data, pos: 0 }
    }

    /// Total bytes behind the stream
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn range(&self, at: usize, len: usize) -> Result<&'a [u8]> {
        let end = at
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::OutOfRange(format!(
                    "read of {} bytes at {} past end of {} byte container",
                    len,
                    at,
                    self.data.len()
                ))
            })?;
        Ok(&self.data[at..end])
    }
}

impl ChunkStream for SliceStream<'_> {
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let bytes = self.range(self.pos, len)?.to_vec();
        self.pos += len;
        Ok(bytes)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn peek_at(&mut self, at: u64, len: usize) -> Result<Vec<u8>> {
        let at = usize::try_from(at).map_err(|_| Error::OutOfRange(format!("offset {}", at)))?;
        Ok(self.range(at, len)?.to_vec())
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.range(self.pos, len)?;
        self.pos += len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_reads() {
        let data = [1u8, 2, 3, 4, 5];
        let mut stream = SliceStream::new(&data);

        assert_eq!(stream.read_bytes(2).unwrap(), vec![1, 2]);
        assert_eq!(stream.position(), 2);
        assert_eq!(stream.read_bytes(3).unwrap(), vec![3, 4, 5]);
        assert!(stream.read_bytes(1).is_err());
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [9u8, 8, 7];
        let mut stream = SliceStream::new(&data);

        assert_eq!(stream.peek_at(1, 2).unwrap(), vec![8, 7]);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_skip_past_end_fails_without_moving() {
        let data = [0u8; 4];
        let mut stream = SliceStream::new(&data);

        assert!(stream.skip(5).is_err());
        assert_eq!(stream.position(), 0);
    }
}
