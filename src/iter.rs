//! Chunk and line views of a body.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::mem;

use crate::Error;

/// Chunks of at most a fixed size read from a stream.
///
/// The stream is dropped as soon as it is found exhausted, and the iterator
/// then stays ended.
pub struct ChunkIter<R> {
    reader: Option<BufReader<R>>,
    chunk_size: usize,
}

impl<R: Read> ChunkIter<R> {
    /// A `chunk_size` of 0 is treated as 1.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        ChunkIter {
            reader: Some(BufReader::with_capacity(chunk_size.max(1024), reader)),
            chunk_size,
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

impl<R: Read> Iterator for ChunkIter<R> {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;

        // Look ahead without consuming.
        let at_end = reader.fill_buf().map(|b| b.is_empty());

        match at_end {
            Ok(false) => {}
            Ok(true) => {
                self.close();
                return None;
            }
            Err(e) => {
                self.close();
                return Some(Err(e.into()));
            }
        }

        let mut chunk = Vec::with_capacity(self.chunk_size);
        let result = reader
            .by_ref()
            .take(self.chunk_size as u64)
            .read_to_end(&mut chunk);

        match result {
            Ok(_) => Some(Ok(chunk)),
            Err(e) => {
                self.close();
                Some(Err(e.into()))
            }
        }
    }
}

/// Records split from a sequence of chunks.
///
/// Split on a delimiter, or on `\n`, `\r\n` and `\r` when there is none.
/// Records may span any number of chunks.
pub struct LineIter<I> {
    chunks: I,
    delimiter: Option<Vec<u8>>,
    carry: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    done: bool,
}

impl<I> LineIter<I>
where
    I: Iterator<Item = Result<Vec<u8>, Error>>,
{
    /// An empty delimiter means generic newlines.
    pub fn new(chunks: I, delimiter: Option<&[u8]>) -> Self {
        LineIter {
            chunks,
            delimiter: delimiter.filter(|d| !d.is_empty()).map(<[u8]>::to_vec),
            carry: vec![],
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn split(&mut self, buf: Vec<u8>, at_end: bool) {
        self.carry = match &self.delimiter {
            Some(d) => split_delimited(buf, d, &mut self.pending),
            None => split_lines(buf, at_end, &mut self.pending),
        };
    }
}

impl<I> Iterator for LineIter<I>
where
    I: Iterator<Item = Result<Vec<u8>, Error>>,
{
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }

            if self.done {
                return None;
            }

            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    let mut buf = mem::take(&mut self.carry);
                    buf.extend_from_slice(&chunk);
                    self.split(buf, false);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;

                    let buf = mem::take(&mut self.carry);
                    self.split(buf, true);

                    let rest = mem::take(&mut self.carry);
                    if !rest.is_empty() {
                        self.pending.push_back(rest);
                    }
                }
            }
        }
    }
}

/// Queue every complete line of `buf`, returning the incomplete rest.
///
/// A `\r` last in `buf` is held back since a `\n` might follow in the next
/// chunk, unless this is the end of input.
fn split_lines(buf: Vec<u8>, at_end: bool, out: &mut VecDeque<Vec<u8>>) -> Vec<u8> {
    let mut start = 0;
    let mut i = 0;

    while i < buf.len() {
        match buf[i] {
            b'\n' => {
                out.push_back(buf[start..i].to_vec());
                i += 1;
                start = i;
            }
            b'\r' => {
                if i + 1 < buf.len() {
                    out.push_back(buf[start..i].to_vec());
                    i += if buf[i + 1] == b'\n' { 2 } else { 1 };
                    start = i;
                } else if at_end {
                    out.push_back(buf[start..i].to_vec());
                    i += 1;
                    start = i;
                } else {
                    break;
                }
            }
            _ => i += 1,
        }
    }

    buf[start..].to_vec()
}

fn split_delimited(buf: Vec<u8>, delimiter: &[u8], out: &mut VecDeque<Vec<u8>>) -> Vec<u8> {
    let mut rest = &buf[..];

    while let Some(pos) = find(rest, delimiter) {
        out.push_back(rest[..pos].to_vec());
        rest = &rest[pos + delimiter.len()..];
    }

    rest.to_vec()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn lines(input: &[u8], chunk_size: usize, delimiter: Option<&[u8]>) -> Vec<String> {
        let chunks = ChunkIter::new(Cursor::new(input), chunk_size);
        LineIter::new(chunks, delimiter)
            .map(|l| String::from_utf8(l.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn chunks_of_size() {
        let chunks: Vec<Vec<u8>> = ChunkIter::new(Cursor::new(b"abcdefg"), 3)
            .map(Result::unwrap)
            .collect();
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"g".to_vec()]);
    }

    #[test]
    fn chunk_iter_ends_for_good() {
        let mut it = ChunkIter::new(Cursor::new(b""), 4);
        assert!(it.next().is_none());
        assert!(it.reader.is_none());
        assert!(it.next().is_none());
    }

    #[test]
    fn zero_chunk_size() {
        let n = ChunkIter::new(Cursor::new(b"ab"), 0).count();
        assert_eq!(n, 2);
    }

    #[test]
    fn generic_newlines_any_chunk_size() {
        for size in 1..12 {
            assert_eq!(lines(b"ab\r\ncd\r\ne", size, None), ["ab", "cd", "e"], "{}", size);
        }
    }

    #[test]
    fn mixed_newlines() {
        for size in 1..10 {
            assert_eq!(
                lines(b"a\nb\rc\r\n\nd\r", size, None),
                ["a", "b", "c", "", "d"],
                "{}",
                size
            );
        }
    }

    #[test]
    fn delimiter_spanning_chunks() {
        for size in 1..8 {
            assert_eq!(
                lines(b"one||two||||three", size, Some(&b"||"[..])),
                ["one", "two", "", "three"]
            );
        }
    }

    #[test]
    fn delimiter_at_the_end() {
        assert_eq!(lines(b"x;y;", 2, Some(&b";"[..])), ["x", "y"]);
        assert_eq!(lines(b"x;y", 64, Some(&b""[..])), ["x;y"]);
    }

    #[test]
    fn empty_input() {
        assert!(lines(b"", 4, None).is_empty());
    }
}
