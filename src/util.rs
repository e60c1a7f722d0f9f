use std::fmt;
use std::io;
use std::sync::OnceLock;

use crate::Error;

/// A value evaluated at most once.
///
/// The outcome of the first evaluation is kept for the life of the memo,
/// also when that outcome is an error. Concurrent first reads block on the
/// one evaluation in progress.
pub(crate) struct Memo<T> {
    cell: OnceLock<Result<T, Error>>,
}

impl<T> Memo<T> {
    pub fn new() -> Self {
        Memo {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_try_init<F>(&self, f: F) -> Result<&T, Error>
    where
        F: FnOnce() -> Result<T, Error>,
    {
        match self.cell.get_or_init(f) {
            Ok(v) => Ok(v),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get().and_then(|r| r.as_ref().ok())
    }

    pub fn is_evaluated(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.cell.get() {
            None => "Unevaluated",
            Some(Ok(_)) => "Evaluated",
            Some(Err(_)) => "Failed",
        };
        write!(f, "Memo({})", state)
    }
}

pub(crate) fn compare_lowercase_ascii(a: &str, lowercased: &str) -> bool {
    if a.len() != lowercased.len() {
        return false;
    }

    for (a, b) in a.chars().zip(lowercased.chars()) {
        if !a.is_ascii() {
            return false;
        }
        let norm = a.to_ascii_lowercase();
        if norm != b {
            return false;
        }
    }

    true
}

pub(crate) fn find_crlf(b: &[u8]) -> Option<usize> {
    let cr = b.iter().position(|c| *c == b'\r')?;
    let maybe_lf = b.get(cr + 1)?;
    if *maybe_lf == b'\n' {
        Some(cr)
    } else {
        None
    }
}

const INCREMENT: usize = 4096;
const THRESHOLD: usize = 100;

/// Read buffer that grows as more input is needed.
///
/// Bytes stay in the buffer until explicitly consumed, which lets a parser
/// retry on a longer input until it has enough.
pub(crate) struct FillMoreBuffer<R> {
    buffer: Vec<u8>,
    pos: usize,
    reader: Option<R>,
}

impl<R: io::Read> FillMoreBuffer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            buffer: vec![0; INCREMENT],
            pos: 0,
            reader: Some(reader),
        }
    }

    pub fn fill_more(&mut self) -> io::Result<&[u8]> {
        let Some(reader) = &mut self.reader else {
            return Ok(self.buffer());
        };

        if self.pos > self.buffer.len() - THRESHOLD {
            self.buffer.resize(self.buffer.len() + INCREMENT, 0);
        }

        let n = reader.read(&mut self.buffer[self.pos..])?;
        self.pos += n;

        if n == 0 {
            // Free readers as soon as possible.
            self.reader = None;
        }

        Ok(self.buffer())
    }

    pub fn consume(&mut self, amount: usize) {
        let max = amount.min(self.pos);
        self.buffer.copy_within(max..self.pos, 0);
        self.pos -= max;
    }

    pub fn is_ended(&self) -> bool {
        self.reader.is_none()
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer[..self.pos]
    }
}

impl<R> fmt::Debug for FillMoreBuffer<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FillMoreBuffer")
            .field("buffered", &self.pos)
            .field("ended", &self.reader.is_none())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"\r"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b" \r"), None);
        assert_eq!(find_crlf(b" \r\n"), Some(1));
    }

    #[test]
    fn memo_evaluates_once() {
        let calls = Cell::new(0);
        let memo = Memo::new();

        for _ in 0..3 {
            let v = memo
                .get_or_try_init(|| {
                    calls.set(calls.get() + 1);
                    Ok(42)
                })
                .unwrap();
            assert_eq!(*v, 42);
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(format!("{:?}", memo), "Memo(Evaluated)");
    }

    #[test]
    fn memo_keeps_failure() {
        let memo: Memo<u8> = Memo::new();
        assert_eq!(format!("{:?}", memo), "Memo(Unevaluated)");

        let err = memo.get_or_try_init(|| Err(Error::NoLocationHeader));
        assert!(matches!(err, Err(Error::NoLocationHeader)));

        // A second evaluation is never attempted.
        let err = memo.get_or_try_init(|| Ok(1));
        assert!(matches!(err, Err(Error::NoLocationHeader)));
        assert!(memo.is_evaluated());
        assert!(memo.get().is_none());
    }

    #[test]
    fn fill_more_and_consume() {
        let input: &[u8] = b"hello world";
        let mut buf = FillMoreBuffer::new(input);

        assert_eq!(buf.fill_more().unwrap(), b"hello world");
        buf.consume(6);
        assert_eq!(buf.buffer(), b"world");

        // the reader is exhausted on the next read.
        assert_eq!(buf.fill_more().unwrap(), b"world");
        assert!(buf.is_ended());
    }
}
