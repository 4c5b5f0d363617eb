//! Image trailer and swap decision support for a two-slot bootloader.
//!
//! Each firmware slot ends in a trailer recording where an update stands.
//! This crate reads and writes those trailers and decides, on each boot,
//! which swap operation the loader should perform.  The actual moving of
//! image bytes, and validation of the images themselves, live elsewhere.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod area;
mod swap;
mod trailer;

pub use area::{AreaId, FlashMap};
pub use swap::{
    set_confirmed, set_confirmed_multi, set_pending, set_pending_multi, swap_type,
    swap_type_multi, swap_type_multi_with_hook, FlagMatch, MagicMatch, SwapStateHook, SwapType,
};
pub use trailer::{
    buffer_is_erased, buffer_is_filled, copy_done_off, image_ok_off, magic_off, pack_swap_info,
    read_copy_done, read_image_ok, read_swap_state, read_swap_state_by_id, swap_info_off,
    unpack_swap_info, write_image_ok, write_magic, write_swap_info, write_trailer,
    write_trailer_flag, FlagState, MagicState, SwapState, BOOT_FLAG_SET, BOOT_IMG_MAGIC,
    BOOT_MAGIC_SZ, BOOT_MAX_ALIGN,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// A flash driver operation failed.
    Flash(storage::Error),
    /// Trailer magic is bad where only good or unset is acceptable.
    BadImage,
    /// Trailer magic in the primary slot is bad during confirmation.
    BadVect,
}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Flash(e)
    }
}

impl Error {
    /// Stable numeric identity of this error kind, for callers that report
    /// results over a wire or into C-shaped interfaces.
    pub const fn code(&self) -> i32 {
        match self {
            Error::Flash(_) => 1,
            Error::BadImage => 3,
            Error::BadVect => 4,
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
