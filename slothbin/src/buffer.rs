use std::io;
use std::ops::Deref;

const READ_SIZE: usize = 4096;

/// Accumulates input until there is enough to parse.
pub struct InputBuffer<T> {
    inner: Option<T>,
    buffer: Vec<u8>,
}

impl<T: io::Read> InputBuffer<T> {
    pub fn new(inner: T) -> Self {
        InputBuffer {
            inner: Some(inner),
            buffer: Vec::with_capacity(READ_SIZE),
        }
    }

    pub fn fill_more(&mut self) -> io::Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(());
        };

        let len = self.buffer.len();
        self.buffer.resize(len + READ_SIZE, 0);

        let amount = match inner.read(&mut self.buffer[len..]) {
            Ok(n) => n,
            Err(e) => {
                self.buffer.truncate(len);
                return Err(e);
            }
        };

        if amount == 0 {
            // inner is done reading
            self.inner = None;
        }
        self.buffer.truncate(len + amount);

        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.inner.is_none()
    }

    pub fn consume(&mut self, amount: usize) {
        assert!(amount <= self.buffer.len(), "consume more than buffer len");
        self.buffer.drain(..amount);
    }

    /// Fill until at least `n` bytes are buffered.
    pub fn require(&mut self, n: usize) -> io::Result<()> {
        while self.buffer.len() < n {
            if self.is_ended() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input ended before body",
                ));
            }
            self.fill_more()?;
        }
        Ok(())
    }

    /// Fill until a CRLF is buffered, returning the index of the CR.
    pub fn require_line(&mut self) -> io::Result<usize> {
        loop {
            if let Some(i) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                return Ok(i);
            }
            if self.is_ended() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "input ended before line",
                ));
            }
            self.fill_more()?;
        }
    }
}

impl<T> Deref for InputBuffer<T> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}
