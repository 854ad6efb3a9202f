//! Wire buffers for interface exchanges.
//!
//! Values are written as their raw in-memory bytes (`bytemuck::Pod`), lengths as `u64`.
//! There is no endianness or version negotiation: all ranks are assumed to share one
//! architecture.

use bytemuck::Pod;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::PmgError;

/// Growable send buffer.
#[derive(Debug, Default)]
pub struct BufferWriter {
    buf: BytesMut,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Pod>(&mut self, value: &T) {
        self.buf.put_slice(bytemuck::bytes_of(value));
    }

    pub fn write_len(&mut self, len: usize) {
        self.write(&(len as u64));
    }

    /// Length prefix followed by the elements.
    pub fn write_slice<T: Pod>(&mut self, values: &[T]) {
        self.write_len(values.len());
        self.buf.put_slice(bytemuck::cast_slice(values));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received buffer.
#[derive(Debug, Clone)]
pub struct BufferReader {
    buf: Bytes,
}

impl BufferReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn read<T: Pod>(&mut self) -> Result<T, PmgError> {
        let needed = std::mem::size_of::<T>();
        if self.buf.remaining() < needed {
            return Err(PmgError::BufferUnderflow { needed, remaining: self.buf.remaining() });
        }
        let value = bytemuck::pod_read_unaligned(&self.buf[..needed]);
        self.buf.advance(needed);
        Ok(value)
    }

    pub fn read_len(&mut self) -> Result<usize, PmgError> {
        Ok(self.read::<u64>()? as usize)
    }

    pub fn read_vec<T: Pod>(&mut self) -> Result<Vec<T>, PmgError> {
        let n = self.read_len()?;
        (0..n).map(|_| self.read()).collect()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
