// Swap decision and trailer operation testing.

use bootutil::{
    copy_done_off, image_ok_off, magic_off, pack_swap_info, read_swap_state_by_id, set_confirmed,
    set_confirmed_multi, set_pending, set_pending_multi, swap_info_off, swap_type,
    swap_type_multi, swap_type_multi_with_hook, AreaId, Error, FlagState, FlashMap, MagicState,
    SwapState, SwapStateHook, SwapType, BOOT_FLAG_SET, BOOT_IMG_MAGIC, BOOT_MAX_ALIGN,
};
use simflash::gen::GenBuilder;
use simflash::{styles, SimFlash};
use storage::{Flash, ReadFlash};

/// A two-slot flash map over simulated devices.
struct SimMap {
    primary: SimFlash,
    secondary: SimFlash,
}

impl FlashMap for SimMap {
    type Flash = SimFlash;

    fn open(&mut self, id: AreaId) -> storage::Result<&mut SimFlash> {
        match id {
            AreaId::Primary(0) => Ok(&mut self.primary),
            AreaId::Secondary(0) => Ok(&mut self.secondary),
            _ => Err(storage::Error::OutOfBounds),
        }
    }
}

impl SimMap {
    /// A 64k-slot pair with 8 byte writes, so expected offsets are easy to
    /// state exactly.
    fn plain() -> SimMap {
        SimMap {
            primary: SimFlash::new(1, 8, 4096, 16).unwrap(),
            secondary: SimFlash::new(1, 8, 4096, 16).unwrap(),
        }
    }

    /// Every style pair whose write alignment the trailer layout supports.
    fn all_trailer_capable() -> Vec<SimMap> {
        styles::all_flashes()
            .map(|pair| pair.unwrap())
            .filter(|(p, s)| {
                p.write_size() <= BOOT_MAX_ALIGN && s.write_size() <= BOOT_MAX_ALIGN
            })
            .map(|(primary, secondary)| SimMap { primary, secondary })
            .collect()
    }
}

fn read_vec(flash: &mut SimFlash, off: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    flash.read(off, &mut buf).unwrap();
    buf
}

fn write_bad_magic(flash: &mut SimFlash) {
    let mut bad = BOOT_IMG_MAGIC;
    bad[..4].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
    let off = magic_off(flash);
    flash.write(off, &bad).unwrap();
}

/// Put a slot trailer into an arbitrary decoded state.
fn build_slot(flash: &mut SimFlash, magic: MagicState, image_ok: FlagState, copy_done: FlagState) {
    match magic {
        MagicState::Good => bootutil::write_magic(flash).unwrap(),
        MagicState::Bad => write_bad_magic(flash),
        MagicState::Unset => (),
    }
    let fields = [(image_ok, image_ok_off(flash)), (copy_done, copy_done_off(flash))];
    for (state, off) in fields {
        match state {
            FlagState::Set => bootutil::write_trailer_flag(flash, off, BOOT_FLAG_SET).unwrap(),
            FlagState::Bad => bootutil::write_trailer_flag(flash, off, 0x5a).unwrap(),
            FlagState::Unset => (),
        }
    }
}

#[test]
fn erased_slots_read_as_erased() {
    // Every device style, including the large-write ones: reads are byte
    // granular everywhere.
    for pair in styles::all_flashes() {
        let (primary, secondary) = pair.unwrap();
        let mut map = SimMap { primary, secondary };

        let state = read_swap_state_by_id(&mut map, AreaId::Primary(0)).unwrap();
        assert_eq!(state, SwapState::ERASED);
        let state = read_swap_state_by_id(&mut map, AreaId::Secondary(0)).unwrap();
        assert_eq!(state, SwapState::ERASED);

        assert_eq!(swap_type_multi(&mut map, 0), SwapType::None);
    }
}

#[test]
fn fresh_test_install() {
    let mut map = SimMap::plain();
    set_pending_multi(&mut map, 0, false).unwrap();

    let flash = &mut map.secondary;
    assert_eq!(read_vec(flash, 0xfff0, 16), BOOT_IMG_MAGIC);
    // swap_info holds TEST for image 0, padded with erased bytes.
    assert_eq!(
        read_vec(flash, 0xffd8, 8),
        [0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
    // image_ok untouched.
    assert_eq!(read_vec(flash, 0xffe8, 8), [0xff; 8]);
    assert_eq!(flash.write_count(), 2);

    assert_eq!(swap_type_multi(&mut map, 0), SwapType::Test);
}

#[test]
fn fresh_permanent_install() {
    let mut map = SimMap::plain();
    set_pending_multi(&mut map, 0, true).unwrap();

    let flash = &mut map.secondary;
    assert_eq!(read_vec(flash, 0xfff0, 16), BOOT_IMG_MAGIC);
    assert_eq!(
        read_vec(flash, 0xffe8, 8),
        [0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
    assert_eq!(
        read_vec(flash, 0xffd8, 8),
        [0x02, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );
    assert_eq!(flash.write_count(), 3);

    assert_eq!(swap_type_multi(&mut map, 0), SwapType::Perm);
}

#[test]
fn install_flow_across_devices() {
    // The same flows on every supported geometry, 0x00-erased parts
    // included.
    for mut map in SimMap::all_trailer_capable() {
        set_pending_multi(&mut map, 0, false).unwrap();
        assert_eq!(swap_type_multi(&mut map, 0), SwapType::Test);

        // Field padding is erased-value bytes up to the write alignment.
        let flash = &mut map.secondary;
        let erased = flash.erased_value();
        let align = flash.write_size();
        let off = swap_info_off(flash);
        let unit = read_vec(flash, off, align);
        assert_eq!(unit[0], pack_swap_info(0, SwapType::Test.into()));
        assert!(unit[1..].iter().all(|&b| b == erased));
    }

    for mut map in SimMap::all_trailer_capable() {
        set_pending_multi(&mut map, 0, true).unwrap();
        assert_eq!(swap_type_multi(&mut map, 0), SwapType::Perm);
    }
}

#[test]
fn pending_is_idempotent() {
    let mut map = SimMap::plain();
    set_pending_multi(&mut map, 0, false).unwrap();
    let writes = map.secondary.write_count();

    // Already scheduled; nothing more to write.
    set_pending_multi(&mut map, 0, false).unwrap();
    set_pending_multi(&mut map, 0, true).unwrap();
    assert_eq!(map.secondary.write_count(), writes);
}

#[test]
fn pending_on_corrupt_slot_erases_it() {
    let mut map = SimMap::plain();

    // A payload and a mangled magic in the staging slot.
    let img = GenBuilder::default().size(9000).build();
    map.secondary.install(&img.data, 0).unwrap();
    write_bad_magic(&mut map.secondary);

    let erases = map.secondary.erase_count();
    assert_eq!(set_pending_multi(&mut map, 0, false), Err(Error::BadImage));
    assert_eq!(Error::BadImage.code(), 3);

    // The whole slot is back to erased, ready for a future upgrade.
    assert!(map.secondary.erase_count() > erases);
    let cap = map.secondary.capacity();
    assert_eq!(read_vec(&mut map.secondary, 0, 256), vec![0xff; 256]);
    assert_eq!(read_vec(&mut map.secondary, cap - 256, 256), vec![0xff; 256]);
    assert_eq!(
        read_swap_state_by_id(&mut map, AreaId::Secondary(0)).unwrap(),
        SwapState::ERASED
    );
}

#[test]
fn revert_after_unconfirmed_swap() {
    for mut map in SimMap::all_trailer_capable() {
        // A swap completed into the primary slot, and the new image never
        // confirmed itself.
        build_slot(&mut map.primary, MagicState::Good, FlagState::Unset, FlagState::Set);

        assert_eq!(swap_type_multi(&mut map, 0), SwapType::Revert);

        // Confirming closes the revert window.
        set_confirmed_multi(&mut map, 0).unwrap();
        assert_eq!(swap_type_multi(&mut map, 0), SwapType::None);
    }
}

#[test]
fn confirm_writes_image_ok_once() {
    let mut map = SimMap::plain();
    build_slot(&mut map.primary, MagicState::Good, FlagState::Unset, FlagState::Set);
    let writes = map.primary.write_count();

    set_confirmed_multi(&mut map, 0).unwrap();
    assert_eq!(map.primary.write_count(), writes + 1);
    assert_eq!(
        read_vec(&mut map.primary, 0xffe8, 8),
        [0x01, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
    );

    // The second confirmation is a no-op.
    set_confirmed_multi(&mut map, 0).unwrap();
    assert_eq!(map.primary.write_count(), writes + 1);
}

#[test]
fn confirm_without_any_swap_is_a_no_op() {
    // An image flashed by a programmer has no trailer at all; confirming
    // it succeeds without touching flash.
    let mut map = SimMap::plain();
    set_confirmed_multi(&mut map, 0).unwrap();
    assert_eq!(map.primary.write_count(), 0);
}

#[test]
fn confirm_rejects_corrupt_primary() {
    let mut map = SimMap::plain();
    write_bad_magic(&mut map.primary);

    assert_eq!(set_confirmed_multi(&mut map, 0), Err(Error::BadVect));
    assert_eq!(Error::BadVect.code(), 4);
}

#[test]
fn unreachable_secondary_is_treated_as_empty() {
    let mut map = SimMap::plain();
    build_slot(&mut map.primary, MagicState::Good, FlagState::Unset, FlagState::Unset);
    map.secondary.set_failing(true);

    // Not a panic: the pair just has nothing staged.
    assert_eq!(swap_type_multi(&mut map, 0), SwapType::None);
}

#[test]
fn unreachable_primary_panics() {
    let mut map = SimMap::plain();
    map.primary.set_failing(true);

    assert_eq!(swap_type_multi(&mut map, 0), SwapType::Panic);

    // An image pair this map does not have at all panics the same way.
    let mut map = SimMap::plain();
    assert_eq!(swap_type_multi(&mut map, 1), SwapType::Panic);
}

struct FixedHook(SwapState);

impl SwapStateHook for FixedHook {
    fn primary_swap_state(&mut self, _image_index: u8) -> Option<bootutil::Result<SwapState>> {
        Some(Ok(self.0))
    }
}

/// A hook that declines, asking for regular processing.
struct DecliningHook;

impl SwapStateHook for DecliningHook {}

#[test]
fn hook_overrides_primary_state() {
    // The primary flash is unreadable, but the hook knows its state.
    let mut map = SimMap::plain();
    map.primary.set_failing(true);

    let mut hook = FixedHook(SwapState {
        magic: MagicState::Good,
        swap_type: SwapType::None,
        copy_done: FlagState::Set,
        image_ok: FlagState::Unset,
        image_num: 0,
    });
    assert_eq!(
        swap_type_multi_with_hook(&mut map, &mut hook, 0),
        SwapType::Revert
    );
}

#[test]
fn declining_hook_falls_through_to_flash() {
    let mut map = SimMap::plain();
    set_pending_multi(&mut map, 0, false).unwrap();

    let mut hook = DecliningHook;
    assert_eq!(
        swap_type_multi_with_hook(&mut map, &mut hook, 0),
        SwapType::Test
    );
}

#[test]
fn legacy_single_image_interface() {
    let mut map = SimMap::plain();

    set_pending(&mut map, false).unwrap();
    assert_eq!(swap_type(&mut map), SwapType::Test);

    build_slot(&mut map.primary, MagicState::Good, FlagState::Unset, FlagState::Set);
    set_confirmed(&mut map).unwrap();
    assert_eq!(
        read_swap_state_by_id(&mut map, AreaId::Primary(0)).unwrap().image_ok,
        FlagState::Set
    );
}

#[test]
fn decision_is_total_over_reachable_states() {
    // Any combination either hits a table row or falls through to None;
    // nothing the trailers can hold produces Fail or a stuck state.
    let magics = [MagicState::Good, MagicState::Unset, MagicState::Bad];
    let flags = [FlagState::Set, FlagState::Unset, FlagState::Bad];

    for p_magic in magics {
        for p_ok in flags {
            for p_done in flags {
                for s_magic in magics {
                    for s_ok in flags {
                        for s_done in flags {
                            let mut map = SimMap::plain();
                            build_slot(&mut map.primary, p_magic, p_ok, p_done);
                            build_slot(&mut map.secondary, s_magic, s_ok, s_done);

                            let decision = swap_type_multi(&mut map, 0);
                            assert!(
                                matches!(
                                    decision,
                                    SwapType::None
                                        | SwapType::Test
                                        | SwapType::Perm
                                        | SwapType::Revert
                                ),
                                "undefined decision {:?} for p={:?}/{:?}/{:?} s={:?}/{:?}/{:?}",
                                decision, p_magic, p_ok, p_done, s_magic, s_ok, s_done
                            );
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn interrupted_pending_write_still_decides_safely() {
    // Power loss between the magic and swap_info writes of a permanent
    // install: the slot shows a good magic and nothing else, which reads
    // back as a (conservative) test request.
    let mut map = SimMap::plain();
    bootutil::write_magic(&mut map.secondary).unwrap();

    assert_eq!(swap_type_multi(&mut map, 0), SwapType::Test);
}
