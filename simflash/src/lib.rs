//! Simulated flash
//!
//! The NOR-type flashes used in microcontrollers differ quite a bit in terms
//! of capabilities provided.  This simulator attempts to capture the diversity
//! of these devices: write and erase granularity, the byte value the device
//! presents after an erase (most parts read 0xff, some read 0x00), and the
//! rule that a programmed region cannot be programmed again without an
//! intervening erase.
//!
//! The simulator also tracks operation counts and can be told to fail, so
//! tests can assert that an operation performed no writes, or see how the
//! caller behaves when the driver reports errors.
//!
//! There are a couple of different families of devices that are common:
//!
//! - Old style: ERASE_SIZE is 4k-128k, WRITE_SIZE is typically 1-8, sometimes
//!   as much as 16 or 32.
//! - Large write: ERASE_SIZE is 128k, WRITE_SIZE is 32.  Large to write, but
//!   also large erase sizes.
//! - Paged: ERASE_SIZE is 512, WRITE_SIZE is 512.  The write size is much
//!   larger than the others, but the smaller erases allow us to treat the
//!   device more like blocks.
//!
//! See [`styles`] for concrete geometries modeled on real parts.

use anyhow::{anyhow, bail, Result};

use storage::{Flash, ReadFlash};

pub mod gen;
pub mod styles;

/// A simulated NOR flash device.
pub struct SimFlash {
    read_size: usize,
    write_size: usize,
    erase_size: usize,
    erased: u8,
    data: Vec<u8>,
    /// One flag per write unit, set once that unit has been programmed.
    programmed: Vec<bool>,
    writes: usize,
    erases: usize,
    failing: bool,
    strict_reads: bool,
}

impl SimFlash {
    /// Construct a device from its geometry.  The write and erase sizes must
    /// be powers of two, with the erase size a multiple of the write size.
    pub fn new(
        read_size: usize,
        write_size: usize,
        erase_size: usize,
        sectors: usize,
    ) -> Result<SimFlash> {
        if read_size == 0 || write_size == 0 || erase_size == 0 || sectors == 0 {
            bail!("flash geometry values must be nonzero");
        }
        if !write_size.is_power_of_two() || !erase_size.is_power_of_two() {
            bail!("write and erase sizes must be powers of two");
        }
        if erase_size % write_size != 0 {
            bail!("erase size must be a multiple of the write size");
        }

        let capacity = erase_size * sectors;
        Ok(SimFlash {
            read_size,
            write_size,
            erase_size,
            erased: 0xff,
            data: vec![0xff; capacity],
            programmed: vec![false; capacity / write_size],
            writes: 0,
            erases: 0,
            failing: false,
            strict_reads: false,
        })
    }

    /// Change the erased byte value.  Resets the device to fully erased.
    pub fn with_erased(mut self, erased: u8) -> SimFlash {
        self.erased = erased;
        self.data.fill(erased);
        self.programmed.fill(false);
        self
    }

    /// When set, every subsequent read, write, and erase fails with
    /// [`storage::Error::Failed`], as if the driver itself were broken.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// When set, reads covering never-programmed write units return
    /// [`storage::Error::NotWritten`].  Some parts (the LPC55 family, for
    /// one) fault on reads of unprogrammed flash; their drivers surface an
    /// error instead.
    pub fn set_strict_reads(&mut self, strict: bool) {
        self.strict_reads = strict;
    }

    /// Number of successful write operations so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of successful erase operations so far.
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    /// Erase the covered sectors and program a payload at `offset`.  The
    /// tail of the payload is padded out to the write alignment with the
    /// erased value.  Intended for test setup.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        let from = offset - offset % self.erase_size;
        let to = (offset + data.len()).div_ceil(self.erase_size) * self.erase_size;
        self.erase(from, to)
            .map_err(|e| anyhow!("install: erase failed: {:?}", e))?;

        let mut padded = data.to_vec();
        padded.resize(data.len().div_ceil(self.write_size) * self.write_size, self.erased);
        self.write(offset, &padded)
            .map_err(|e| anyhow!("install: write failed: {:?}", e))?;
        Ok(())
    }

    fn unit_range(&self, offset: usize, len: usize) -> core::ops::Range<usize> {
        let first = offset / self.write_size;
        let last = (offset + len).div_ceil(self.write_size);
        first..last
    }
}

impl ReadFlash for SimFlash {
    fn read_size(&self) -> usize {
        self.read_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn erased_value(&self) -> u8 {
        self.erased
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        if self.failing {
            return Err(storage::Error::Failed);
        }
        self.check_read(offset, bytes.len())?;
        if self.strict_reads
            && self.unit_range(offset, bytes.len()).any(|u| !self.programmed[u])
        {
            return Err(storage::Error::NotWritten);
        }
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }
}

impl Flash for SimFlash {
    fn write_size(&self) -> usize {
        self.write_size
    }

    fn erase_size(&self) -> usize {
        self.erase_size
    }

    fn erase(&mut self, from: usize, to: usize) -> storage::Result<()> {
        if self.failing {
            return Err(storage::Error::Failed);
        }
        self.check_erase(from, to)?;
        self.data[from..to].fill(self.erased);
        for unit in self.unit_range(from, to - from) {
            self.programmed[unit] = false;
        }
        self.erases += 1;
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        if self.failing {
            return Err(storage::Error::Failed);
        }
        self.check_write(offset, bytes.len())?;
        let units = self.unit_range(offset, bytes.len());
        if units.clone().any(|u| self.programmed[u]) {
            return Err(storage::Error::NotErased);
        }
        for unit in units {
            self.programmed[unit] = true;
        }
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(())
    }
}
