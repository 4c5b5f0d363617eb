//! Image trailers.
//!
//! The last few write-alignment units of each slot hold the trailer: a
//! 16-byte magic marking the trailer as present, and three single-byte
//! fields recording the state of the update process.  Offsets grow
//! downward from the end of the slot:
//!
//! ```text
//! +--------------------+ <- capacity
//! | magic (16 bytes)   |
//! | image_ok  + pad    |
//! | copy_done + pad    |
//! | swap_info + pad    |
//! +--------------------+
//! ```
//!
//! Fields sit [`BOOT_MAX_ALIGN`] apart regardless of the device, and each
//! single-byte field is padded out to the device write alignment with the
//! erased value.  A field therefore goes through exactly one program
//! operation between erases, and a reset can only leave it erased, intact,
//! or recognizably bad.

use log::debug;

use storage::{Flash, ReadFlash};

use crate::area::{AreaId, FlashMap};
use crate::swap::SwapType;
use crate::{Error, Result};

/// Value of the trailer magic, fixed by the on-flash format.  The words
/// f395c277 7fefd260 0f505235 8079b62c, little endian.
pub const BOOT_IMG_MAGIC: [u8; 16] = [
    0x77, 0xc2, 0x95, 0xf3, 0x60, 0xd2, 0xef, 0x7f,
    0x35, 0x52, 0x50, 0x0f, 0x2c, 0xb6, 0x79, 0x80,
];

/// Size of the trailer magic, in bytes.
pub const BOOT_MAGIC_SZ: usize = 16;

/// Largest write alignment the trailer layout supports.  Also the distance
/// between trailer fields, so the layout is the same across devices.
pub const BOOT_MAX_ALIGN: usize = 8;

/// Byte value of a flag that has been set.
pub const BOOT_FLAG_SET: u8 = 0x01;

/// Decoded state of a trailer magic field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MagicState {
    /// Exact match of the canonical value.
    Good,
    /// Every byte still holds the erased value.
    Unset,
    /// Anything else.
    Bad,
}

impl MagicState {
    /// Decode a magic field already known not to be erased.
    pub fn decode(raw: &[u8]) -> MagicState {
        if raw == BOOT_IMG_MAGIC {
            MagicState::Good
        } else {
            MagicState::Bad
        }
    }

    /// Decode a magic field as it came off the given device.
    pub fn from_flash<F: ReadFlash>(flash: &F, raw: &[u8]) -> MagicState {
        if buffer_is_erased(flash, raw) {
            MagicState::Unset
        } else {
            MagicState::decode(raw)
        }
    }
}

/// Decoded state of a single-byte trailer flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FlagState {
    Set,
    Unset,
    Bad,
}

impl FlagState {
    pub fn decode(raw: u8, erased: u8) -> FlagState {
        if raw == erased {
            FlagState::Unset
        } else if raw == BOOT_FLAG_SET {
            FlagState::Set
        } else {
            FlagState::Bad
        }
    }
}

/// Everything one slot's trailer says about the update process.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SwapState {
    pub magic: MagicState,
    pub swap_type: SwapType,
    pub copy_done: FlagState,
    pub image_ok: FlagState,
    pub image_num: u8,
}

impl SwapState {
    /// What a freshly erased slot reads as.
    pub const ERASED: SwapState = SwapState {
        magic: MagicState::Unset,
        swap_type: SwapType::None,
        copy_done: FlagState::Unset,
        image_ok: FlagState::Unset,
        image_num: 0,
    };
}

/// Pack an image number and swap type into a swap_info byte.  Low nibble
/// is the swap type, high nibble the image number.
pub fn pack_swap_info(image_num: u8, swap_type: u8) -> u8 {
    (image_num << 4) | (swap_type & 0x0f)
}

/// Split a swap_info byte into its (image_num, swap_type) nibbles.
pub fn unpack_swap_info(info: u8) -> (u8, u8) {
    (info >> 4, info & 0x0f)
}

/// True if every byte of `buf` equals `fill`.  An empty buffer is not
/// considered filled.
pub fn buffer_is_filled(buf: &[u8], fill: u8) -> bool {
    !buf.is_empty() && buf.iter().all(|&b| b == fill)
}

/// True if every byte of `buf` equals the erased value of `flash`.
pub fn buffer_is_erased<F: ReadFlash>(flash: &F, buf: &[u8]) -> bool {
    buffer_is_filled(buf, flash.erased_value())
}

/// Offset of the trailer magic within a slot.
pub fn magic_off<F: ReadFlash>(flash: &F) -> usize {
    flash.capacity() - BOOT_MAGIC_SZ
}

/// Offset of the image_ok flag.
pub fn image_ok_off<F: ReadFlash>(flash: &F) -> usize {
    magic_off(flash) - BOOT_MAX_ALIGN
}

/// Offset of the copy_done flag.
pub fn copy_done_off<F: ReadFlash>(flash: &F) -> usize {
    image_ok_off(flash) - BOOT_MAX_ALIGN
}

/// Offset of the swap_info byte.
pub fn swap_info_off<F: ReadFlash>(flash: &F) -> usize {
    copy_done_off(flash) - BOOT_MAX_ALIGN
}

/// Write trailer data; status bytes, swap_info, etc.
///
/// The payload is padded out to the device write alignment with the
/// erased value, so the rest of the field's alignment unit is left
/// programmable.
pub fn write_trailer<F: Flash>(flash: &mut F, off: usize, payload: &[u8]) -> Result<()> {
    let align = flash.write_size();
    if align == 0 {
        return Err(Error::Flash(storage::Error::Failed));
    }
    let aligned = (payload.len() + align - 1) & !(align - 1);
    if aligned > BOOT_MAX_ALIGN {
        return Err(Error::Flash(storage::Error::NotAligned));
    }

    let mut buf = [0u8; BOOT_MAX_ALIGN];
    buf[..payload.len()].copy_from_slice(payload);
    buf[payload.len()..aligned].fill(flash.erased_value());

    flash.write(off, &buf[..aligned])?;
    Ok(())
}

/// Write a single trailer flag.
pub fn write_trailer_flag<F: Flash>(flash: &mut F, off: usize, flag: u8) -> Result<()> {
    write_trailer(flash, off, &[flag])
}

fn read_flag<F: ReadFlash>(flash: &mut F, off: usize) -> Result<FlagState> {
    let mut raw = [0u8; 1];
    flash.read(off, &mut raw)?;
    Ok(FlagState::decode(raw[0], flash.erased_value()))
}

/// Read the image_ok flag.
pub fn read_image_ok<F: ReadFlash>(flash: &mut F) -> Result<FlagState> {
    let off = image_ok_off(flash);
    read_flag(flash, off)
}

/// Read the copy_done flag.
pub fn read_copy_done<F: ReadFlash>(flash: &mut F) -> Result<FlagState> {
    let off = copy_done_off(flash);
    read_flag(flash, off)
}

/// Write the trailer magic.
pub fn write_magic<F: Flash>(flash: &mut F) -> Result<()> {
    let off = magic_off(flash);
    debug!("writing magic; off=0x{:x}", off);
    flash.write(off, &BOOT_IMG_MAGIC)?;
    Ok(())
}

/// Set the image_ok flag.
pub fn write_image_ok<F: Flash>(flash: &mut F) -> Result<()> {
    let off = image_ok_off(flash);
    debug!("writing image_ok; off=0x{:x}", off);
    write_trailer_flag(flash, off, BOOT_FLAG_SET)
}

/// Write the swap_info field.  The value is persisted so the loader knows
/// which swap operation to resume after an unexpected reset.
pub fn write_swap_info<F: Flash>(flash: &mut F, swap_type: SwapType, image_num: u8) -> Result<()> {
    let info = pack_swap_info(image_num, swap_type.into());
    let off = swap_info_off(flash);
    debug!(
        "writing swap_info; off=0x{:x} swap_type={:?} image_num={}",
        off, swap_type, image_num
    );
    write_trailer(flash, off, &[info])
}

/// Read one slot's full trailer.
pub fn read_swap_state<F: ReadFlash>(flash: &mut F) -> Result<SwapState> {
    let erased = flash.erased_value();

    let mut raw_magic = [0u8; BOOT_MAGIC_SZ];
    let off = magic_off(flash);
    flash.read(off, &mut raw_magic)?;
    let magic = MagicState::from_flash(flash, &raw_magic);

    let mut raw_info = [0u8; 1];
    let off = swap_info_off(flash);
    flash.read(off, &mut raw_info)?;
    let (image_num, swap_type) = unpack_swap_info(raw_info[0]);

    // An erased byte, or a type past Revert, means no swap is in progress.
    let (swap_type, image_num) = if raw_info[0] == erased || swap_type > u8::from(SwapType::Revert)
    {
        (SwapType::None, 0)
    } else {
        // Nibbles 0 through 3 always decode.
        (SwapType::try_from(swap_type).unwrap_or(SwapType::None), image_num)
    };

    let copy_done = read_copy_done(flash)?;
    let image_ok = read_image_ok(flash)?;

    Ok(SwapState {
        magic,
        swap_type,
        copy_done,
        image_ok,
        image_num,
    })
}

/// Read the swap state of the area with the given id.
pub fn read_swap_state_by_id<M: FlashMap>(map: &mut M, id: AreaId) -> Result<SwapState> {
    let flash = map.open(id)?;
    read_swap_state(flash)
}
