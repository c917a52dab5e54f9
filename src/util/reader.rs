use std::{fmt::Display, io};

use futures::Stream;

use crate::util::poll;

/// Blocking `Read` over a stream of downloaded chunks.
pub struct ChunkReader<S> {
    stream: S,
    chunk: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<S> ChunkReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            chunk: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl<S, B, E> io::Read for ChunkReader<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            if self.done {
                return Ok(0);
            }

            match poll::poll_next(&mut self.stream) {
                None => self.done = true,
                Some(Err(err)) => {
                    self.done = true;
                    return Err(io::Error::new(io::ErrorKind::Other, err.to_string()));
                }
                Some(Ok(bytes)) => {
                    self.chunk = bytes.as_ref().to_vec();
                    self.pos = 0;
                }
            }
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }
}
