//! Collect/extract policies and the driver that moves them along layouts.
//!
//! A [`CommunicationPolicy`] serializes values at an interface's indices (`collect`) and applies
//! received values at the matching interface (`extract`), both in interface order. The
//! [`InterfaceCommunicator`] sends one message per target rank, containing that rank's
//! interfaces in level order, then receives and extracts one message per source rank. It returns
//! only after every expected message has been extracted.

use bytemuck::Pod;
use log::trace;

use super::buffer::{BufferReader, BufferWriter};
use super::layout::{IndexLayout, Interface};
use super::{Comm, CommTag};
use crate::core::Scalar;
use crate::error::PmgError;

pub trait CommunicationPolicy {
    /// Serialize the values at `interface` into `buf`.
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError>;
    /// Read and apply the values for `interface` from `buf`.
    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError>;
}

/// Drives point-to-point exchanges along layouts.
pub struct InterfaceCommunicator<'a> {
    comm: &'a dyn Comm,
}

impl<'a> InterfaceCommunicator<'a> {
    pub fn new(comm: &'a dyn Comm) -> Self {
        Self { comm }
    }

    /// Collect along `send_layout`, extract along `recv_layout`.
    ///
    /// Either layout may be empty, which turns the call into a pure send or pure receive.
    pub fn exchange<P>(
        &self,
        send_layout: &IndexLayout,
        recv_layout: &IndexLayout,
        policy: &mut P,
        tag: CommTag,
    ) -> Result<(), PmgError>
    where
        P: CommunicationPolicy + ?Sized,
    {
        for rank in send_layout.target_ranks() {
            let mut writer = BufferWriter::new();
            for itf in send_layout.interfaces_for(rank) {
                policy.collect(&mut writer, itf)?;
            }
            trace!("rank {} -> {}: {} bytes on {:?}", self.comm.rank(), rank, writer.len(), tag);
            self.comm.send(rank, tag, writer.freeze())?;
        }
        for rank in recv_layout.target_ranks() {
            let mut reader = BufferReader::new(self.comm.recv(rank, tag)?);
            for itf in recv_layout.interfaces_for(rank) {
                policy.extract(&mut reader, itf)?;
            }
            if !reader.is_empty() {
                return Err(PmgError::LayoutMismatch(format!(
                    "{} unread bytes from rank {} on {:?}",
                    reader.remaining(),
                    rank,
                    tag
                )));
            }
        }
        Ok(())
    }
}

/// Overwrites receiver values with sender values.
pub struct VecCopy<'a, T> {
    values: &'a mut [T],
}

impl<'a, T: Pod> VecCopy<'a, T> {
    pub fn new(values: &'a mut [T]) -> Self {
        Self { values }
    }
}

impl<T: Pod> CommunicationPolicy for VecCopy<'_, T> {
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            buf.write(&self.values[i]);
        }
        Ok(())
    }

    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            self.values[i] = buf.read()?;
        }
        Ok(())
    }
}

/// Adds sender values onto receiver values.
pub struct VecAdd<'a, T> {
    values: &'a mut [T],
}

impl<'a, T: Scalar> VecAdd<'a, T> {
    pub fn new(values: &'a mut [T]) -> Self {
        Self { values }
    }
}

impl<T: Scalar> CommunicationPolicy for VecAdd<'_, T> {
    fn collect(&mut self, buf: &mut BufferWriter, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            buf.write(&self.values[i]);
        }
        Ok(())
    }

    fn extract(&mut self, buf: &mut BufferReader, interface: &Interface) -> Result<(), PmgError> {
        for i in interface.iter() {
            let v: T = buf.read()?;
            self.values[i] += v;
        }
        Ok(())
    }
}

/// Set every entry listed in `layout` to `value`.
pub fn set_on_layout<T: Copy>(values: &mut [T], layout: &IndexLayout, value: T) {
    for (_, itf) in layout.iter() {
        for i in itf.iter() {
            values[i] = value;
        }
    }
}
