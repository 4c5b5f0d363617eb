//! Swap type decisions.
//!
//! On each boot the loader must answer one question: given the two slot
//! trailers, which swap operation, if any, is being asked for?  The answer
//! comes from a small table mapping trailer contents to a swap type,
//! searched in order.  The table is data rather than code, so the states a
//! power loss can leave behind stay covered as rows are added.
//!
//! This module also carries the operations an application uses to drive an
//! update: marking the staged image pending, and confirming the running
//! image after a test boot.

use log::info;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use storage::{Flash, ReadFlash};

use crate::area::{AreaId, FlashMap};
use crate::trailer::{
    read_swap_state, read_swap_state_by_id, write_image_ok, write_magic, write_swap_info,
    FlagState, MagicState, SwapState,
};
use crate::{Error, Result};

/// The operation the bootloader should perform before jumping to the
/// application.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SwapType {
    /// Boot the primary image as it stands.
    None = 0,
    /// Swap in the secondary image for a one-time test boot.
    Test = 1,
    /// Swap in the secondary image permanently.
    Perm = 2,
    /// Swap back; the tested image never confirmed itself.
    Revert = 3,
    /// A swap operation failed.
    Fail = 4,
    /// Slot state could not be determined; the boot must be aborted.
    Panic = 0xff,
}

/// Magic predicate in a decision table row.
#[derive(Debug, Copy, Clone)]
pub enum MagicMatch {
    Any,
    /// Anything except a good magic.
    NotGood,
    Is(MagicState),
}

impl MagicMatch {
    /// Is a table entry satisfied by the observed magic state?
    pub fn matches(self, observed: MagicState) -> bool {
        match self {
            MagicMatch::Any => true,
            MagicMatch::NotGood => observed != MagicState::Good,
            MagicMatch::Is(want) => want == observed,
        }
    }
}

/// Flag predicate in a decision table row.
#[derive(Debug, Copy, Clone)]
pub enum FlagMatch {
    Any,
    Is(FlagState),
}

impl FlagMatch {
    pub fn matches(self, observed: FlagState) -> bool {
        match self {
            FlagMatch::Any => true,
            FlagMatch::Is(want) => want == observed,
        }
    }
}

struct SwapRule {
    magic_primary: MagicMatch,
    magic_secondary: MagicMatch,
    image_ok_primary: FlagMatch,
    image_ok_secondary: FlagMatch,
    copy_done_primary: FlagMatch,
    swap_type: SwapType,
}

impl SwapRule {
    fn matches(&self, primary: &SwapState, secondary: &SwapState) -> bool {
        self.magic_primary.matches(primary.magic)
            && self.magic_secondary.matches(secondary.magic)
            && self.image_ok_primary.matches(primary.image_ok)
            && self.image_ok_secondary.matches(secondary.image_ok)
            && self.copy_done_primary.matches(primary.copy_done)
    }
}

/// Maps image trailer contents to swap operation type.  Searched
/// sequentially; the first matching row wins.
///
/// The row order is load bearing: settings in the secondary slot take
/// priority over the primary slot, and sit earlier in the table.  Only
/// states that require action are listed; everything else falls through
/// to no swap at all.
static SWAP_TABLES: [SwapRule; 3] = [
    SwapRule {
        magic_primary: MagicMatch::Any,
        magic_secondary: MagicMatch::Is(MagicState::Good),
        image_ok_primary: FlagMatch::Any,
        image_ok_secondary: FlagMatch::Is(FlagState::Unset),
        copy_done_primary: FlagMatch::Any,
        swap_type: SwapType::Test,
    },
    SwapRule {
        magic_primary: MagicMatch::Any,
        magic_secondary: MagicMatch::Is(MagicState::Good),
        image_ok_primary: FlagMatch::Any,
        image_ok_secondary: FlagMatch::Is(FlagState::Set),
        copy_done_primary: FlagMatch::Any,
        swap_type: SwapType::Perm,
    },
    SwapRule {
        magic_primary: MagicMatch::Is(MagicState::Good),
        magic_secondary: MagicMatch::Is(MagicState::Unset),
        image_ok_primary: FlagMatch::Is(FlagState::Unset),
        image_ok_secondary: FlagMatch::Any,
        copy_done_primary: FlagMatch::Is(FlagState::Set),
        swap_type: SwapType::Revert,
    },
];

/// Override for where the primary slot's state comes from.
///
/// A platform that keeps the running image's state somewhere other than
/// its trailer answers here.  Answering `None` falls through to the
/// regular trailer read.
pub trait SwapStateHook {
    fn primary_swap_state(&mut self, image_index: u8) -> Option<Result<SwapState>> {
        let _ = image_index;
        None
    }
}

/// The hookless hook.
impl SwapStateHook for () {}

fn log_swap_state(label: &str, state: &SwapState) {
    info!(
        "{}: magic={:?}, swap_type={:?}, copy_done={:?}, image_ok={:?}",
        label, state.magic, state.swap_type, state.copy_done, state.image_ok
    );
}

/// Determine the swap operation for an image pair.
pub fn swap_type_multi<M: FlashMap>(map: &mut M, image_index: u8) -> SwapType {
    swap_type_multi_with_hook(map, &mut (), image_index)
}

/// [`swap_type_multi`], with an explicit primary-state hook.
pub fn swap_type_multi_with_hook<M, H>(map: &mut M, hook: &mut H, image_index: u8) -> SwapType
where
    M: FlashMap,
    H: SwapStateHook,
{
    let primary = match hook.primary_swap_state(image_index) {
        Some(state) => state,
        None => read_swap_state_by_id(map, AreaId::Primary(image_index)),
    };
    let primary = match primary {
        Ok(state) => state,
        Err(_) => return SwapType::Panic,
    };

    let secondary = match read_swap_state_by_id(map, AreaId::Secondary(image_index)) {
        Ok(state) => state,
        Err(Error::Flash(_)) => {
            info!(
                "Secondary image of image pair ({}.) is unreachable. Treat it as empty",
                image_index
            );
            SwapState::ERASED
        }
        Err(_) => return SwapType::Panic,
    };

    log_swap_state("swap_type_multi: Primary image", &primary);
    log_swap_state("swap_type_multi: Secondary image", &secondary);

    for rule in &SWAP_TABLES {
        if rule.matches(&primary, &secondary) {
            info!("Swap type: {:?}", rule.swap_type);
            return match rule.swap_type {
                SwapType::Test | SwapType::Perm | SwapType::Revert => rule.swap_type,
                _ => SwapType::Panic,
            };
        }
    }

    info!("Swap type: none");
    SwapType::None
}

/// Determine the swap operation for image pair 0.
///
/// Not used by the bootloader itself, but required by external tooling.
pub fn swap_type<M: FlashMap>(map: &mut M) -> SwapType {
    swap_type_multi(map, 0)
}

/// Mark the staged image of a pair as pending.  On the next boot the
/// loader will swap it in: once for a test boot, or permanently.
pub fn set_pending_multi<M: FlashMap>(map: &mut M, image_index: u8, permanent: bool) -> Result<()> {
    let flash = map.open(AreaId::Secondary(image_index))?;
    let state = read_swap_state(flash)?;

    match state.magic {
        MagicState::Good => {
            // Swap already scheduled.
            Ok(())
        }
        MagicState::Unset => {
            // A reset between these writes leaves a good magic with no
            // swap_info, which the decision table reads as a test request.
            // For a permanent install that downgrades the request to the
            // conservative interpretation.
            write_magic(flash)?;
            if permanent {
                write_image_ok(flash)?;
            }
            let swap_type = if permanent { SwapType::Perm } else { SwapType::Test };
            write_swap_info(flash, swap_type, 0)
        }
        MagicState::Bad => {
            // The slot is corrupt.  There is no way to recover, so erase
            // it to allow future upgrades.
            let end = flash.capacity();
            let _ = flash.erase(0, end);
            Err(Error::BadImage)
        }
    }
}

/// [`set_pending_multi`] for image pair 0, kept for compatibility.
pub fn set_pending<M: FlashMap>(map: &mut M, permanent: bool) -> Result<()> {
    set_pending_multi(map, 0, permanent)
}

/// Mark the running image of a pair as confirmed, ending the revert
/// window after a test boot.
pub fn set_confirmed_multi<M: FlashMap>(map: &mut M, image_index: u8) -> Result<()> {
    let flash = map.open(AreaId::Primary(image_index))?;
    let state = read_swap_state(flash)?;

    match state.magic {
        MagicState::Good => (),
        // No swap ever happened; nothing to confirm.
        MagicState::Unset => return Ok(()),
        MagicState::Bad => return Err(Error::BadVect),
    }

    // copy_done is deliberately not checked, so an image placed with a
    // programming interface rather than a swap can still be confirmed.

    if state.image_ok != FlagState::Unset {
        // Already confirmed.
        return Ok(());
    }

    write_image_ok(flash)
}

/// [`set_confirmed_multi`] for image pair 0, kept for compatibility.
pub fn set_confirmed<M: FlashMap>(map: &mut M) -> Result<()> {
    set_confirmed_multi(map, 0)
}
