//! Flash areas.
//!
//! The core works against a pair of well-known flash areas per image: the
//! primary slot the loader jumps into, and the secondary slot where a new
//! image is staged.  Which device (or which part of a device) backs an
//! area is the platform's business; the core asks for an area by id and
//! uses whatever handle it gets back.

use storage::Flash;

/// Identity of one flash area.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AreaId {
    /// The slot the bootloader runs from, for the given image index.
    Primary(u8),
    /// The staging slot, for the given image index.
    Secondary(u8),
}

/// Access to the platform's flash areas by id.
///
/// `open` hands out a handle borrowing the map.  That borrow is the
/// classic open/close pairing: the area is released when the borrow ends,
/// on every exit path.
pub trait FlashMap {
    type Flash: Flash;

    fn open(&mut self, id: AreaId) -> storage::Result<&mut Self::Flash>;
}
