//! Storage types.
//!
//! These traits describe the flash devices the bootloader core runs
//! against.  They are deliberately small: byte reads at arbitrary
//! alignment, writes and erases constrained by the device geometry, and
//! enough geometry reporting (write size, erase size, erased byte value)
//! for callers to lay data out safely.
//!
//! Argument validation rides along as provided methods, so a device
//! implementation checks callers against its own geometry without
//! restating the rules.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotAligned,
    OutOfBounds,
    NotWritten,
    NotErased,
    /// The device itself reported a failure.
    Failed,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Read only interface into flash.
pub trait ReadFlash {
    /// What is the read size (alignment and size multiple).
    fn read_size(&self) -> usize;
    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> Result<()>;
    fn capacity(&self) -> usize;
    /// The value every byte of this device holds after an erase.
    fn erased_value(&self) -> u8;

    /// Validate the arguments of a read against this device's geometry.
    fn check_read(&self, offset: usize, length: usize) -> Result<()> {
        check_args(self.capacity(), self.read_size(), offset, length)
    }
}

/// Flash that can be written to.
pub trait Flash: ReadFlash {
    /// Write size (alignment and size multiple).
    fn write_size(&self) -> usize;
    /// Erase size (alignment and size multiple).
    fn erase_size(&self) -> usize;

    fn erase(&mut self, from: usize, to: usize) -> Result<()>;
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()>;

    /// Validate the arguments of a write against this device's geometry.
    fn check_write(&self, offset: usize, length: usize) -> Result<()> {
        check_args(self.capacity(), self.write_size(), offset, length)
    }

    /// Validate the bounds of an erase.  Both ends must sit on an erase
    /// boundary.
    fn check_erase(&self, from: usize, to: usize) -> Result<()> {
        if self.erase_size() == 0 {
            return Err(Error::Failed);
        }
        if from > to || to > self.capacity() {
            return Err(Error::OutOfBounds);
        }
        if from % self.erase_size() != 0 || to % self.erase_size() != 0 {
            return Err(Error::NotAligned);
        }
        Ok(())
    }
}

// The bounds and alignment law behind the provided checks, in the shape
// embedded-storage popularized.
fn check_args(capacity: usize, align: usize, offset: usize, length: usize) -> Result<()> {
    // A device reporting a zero alignment cannot be used at all.
    if align == 0 {
        return Err(Error::Failed);
    }
    if length > capacity || offset > capacity - length {
        return Err(Error::OutOfBounds);
    }
    if offset % align != 0 || length % align != 0 {
        return Err(Error::NotAligned);
    }
    Ok(())
}
