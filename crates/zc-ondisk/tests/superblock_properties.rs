#![forbid(unsafe_code)]

use zc_lexicon::BlockSizeIssue;
use zc_ondisk::{Endian, ExtentField, Issue, Superblock, role_extents};
use zc_types::{
    CacheMode, ComponentRole, Extent, Role, SetId, ZC_SB_CKSUM_WORD, ZC_SB_SIZE, ZC_SB_WORDS,
};

const BLOCK_SIZE: u64 = 256 * 1024;

fn set_id() -> SetId {
    SetId::from_bytes([
        0x3c, 0x1f, 0x9a, 0x02, 0x55, 0x7e, 0x4b, 0x11, 0x8d, 0x60, 0xa4, 0xe2, 0x19, 0xc7, 0x0b,
        0xf3,
    ])
}

fn extent_for(component: ComponentRole) -> Extent {
    match component {
        ComponentRole::Origin => Extent::new(4096, 64 << 30),
        ComponentRole::Metadata => Extent::new(4096, 8 << 20),
        ComponentRole::Cache => Extent::new(4096 + (8 << 20), 4 << 30),
    }
}

/// A sealed, valid record for `role`.
fn valid(role: Role) -> Superblock {
    role_extents(role)
        .iter()
        .fold(
            Superblock::new(role, set_id(), 259, BLOCK_SIZE, CacheMode::Writethrough),
            |sb, &component| sb.with_extent(component, extent_for(component)),
        )
        .sealed()
}

// ── Codec ───────────────────────────────────────────────────────────────────

#[test]
fn every_field_bit_affects_checksum() {
    let base = valid(Role::Combined);
    let reference = base.compute_checksum();
    let words = base.to_words();

    for index in (0..ZC_SB_WORDS).filter(|&i| i != ZC_SB_CKSUM_WORD) {
        for bit in 0..64 {
            let mut flipped = words;
            flipped[index] ^= 1 << bit;
            let checksum = Superblock::from_words(flipped).compute_checksum();
            assert_ne!(
                checksum, reference,
                "flipping bit {bit} of word {index} left the checksum unchanged"
            );
        }
    }
}

#[test]
fn checksum_slot_does_not_feed_checksum() {
    let base = valid(Role::Origin);
    let mut words = base.to_words();
    words[ZC_SB_CKSUM_WORD] = u64::MAX;
    assert_eq!(
        Superblock::from_words(words).compute_checksum(),
        base.checksum
    );
}

/// Bytes of `words` laid out the way a host of order `host` holds them.
fn memory_image(words: [u64; ZC_SB_WORDS], host: Endian) -> [u8; ZC_SB_SIZE] {
    let mut out = [0_u8; ZC_SB_SIZE];
    for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
        let bytes = match host {
            Endian::Little => word.to_le_bytes(),
            Endian::Big => word.to_be_bytes(),
        };
        chunk.copy_from_slice(&bytes);
    }
    out
}

#[test]
fn big_endian_host_writes_little_endian_words() {
    for role in Role::ALL {
        let sb = valid(role);
        let words = sb.to_words();
        let reference = memory_image(words, Endian::Little);

        // What a big-endian host holds in memory is not the disk format...
        let unswapped = memory_image(words, Endian::Big);
        assert_ne!(unswapped, reference, "{role}");
        // ...but its memory image of the swapped words is.
        let swapped = memory_image(words.map(u64::swap_bytes), Endian::Big);
        assert_eq!(swapped, reference, "{role}");

        assert_eq!(sb.encode_for(Endian::Big), reference, "{role}");
        assert_eq!(sb.encode_for(Endian::Little), reference, "{role}");
    }
}

#[test]
fn big_endian_host_swaps_words_back_on_read() {
    for role in Role::ALL {
        let sb = valid(role);
        let on_disk = memory_image(sb.to_words(), Endian::Little);

        let decoded = Superblock::decode_for(&on_disk, Endian::Big);
        assert_eq!(decoded, sb, "{role}");
        assert!(decoded.is_valid());
        assert_eq!(Superblock::decode_for(&on_disk, Endian::Little), sb);

        // A big-endian record written without swapping reads back garbled.
        // The magic number is a byte palindrome and survives; the rest does not.
        let raw = memory_image(sb.to_words(), Endian::Big);
        let garbled = Superblock::decode_for(&raw, Endian::Little);
        assert_eq!(garbled.magic, sb.magic);
        assert_eq!(garbled.size, sb.size.swap_bytes());
        assert!(!garbled.is_valid(), "{role}");
    }
}

// ── Validator ───────────────────────────────────────────────────────────────

#[test]
fn independent_violations_are_all_reported_in_order() {
    let mut sb = Superblock::new(
        Role::Origin,
        set_id(),
        259,
        16384,
        CacheMode::Writeback,
    )
    .with_extent(ComponentRole::Cache, Extent::new(4096, 8192));
    sb.magic = 0;
    sb.version = 1;
    sb.size = 64;
    sb.cache_mode = 5;
    sb.checksum = 0;

    let unset = |field| Issue::ExtentUnset {
        role: Role::Origin,
        component: ComponentRole::Origin,
        field,
    };
    let set = |field| Issue::ExtentSet {
        role: Role::Origin,
        component: ComponentRole::Cache,
        field,
    };

    let expected = vec![
        Issue::Magic,
        Issue::Checksum,
        Issue::Version,
        Issue::Size,
        Issue::BlockSize(BlockSizeIssue::TooSmall),
        Issue::BlockSize(BlockSizeIssue::Misaligned),
        Issue::CacheMode,
        unset(ExtentField::Offset),
        unset(ExtentField::Size),
        set(ExtentField::Offset),
        set(ExtentField::Size),
    ];
    assert_eq!(sb.issues().collect::<Vec<_>>(), expected);
    assert_eq!(sb.issues().take(3).count(), 3);
}

#[test]
fn role_table_holds_for_every_role() {
    for role in Role::ALL {
        let sb = valid(role);
        assert!(sb.is_valid(), "{role}: {:?}", sb.issues().collect::<Vec<_>>());

        for component in ComponentRole::ALL {
            let required = role_extents(role).contains(&component);
            let mut broken = if required {
                sb.with_extent(component, Extent::ZERO)
            } else {
                sb.with_extent(component, extent_for(component))
            };
            broken.seal();

            let issues: Vec<_> = broken.issues().collect();
            let expected: Vec<_> = [ExtentField::Offset, ExtentField::Size]
                .into_iter()
                .map(|field| {
                    if required {
                        Issue::ExtentUnset {
                            role,
                            component,
                            field,
                        }
                    } else {
                        Issue::ExtentSet {
                            role,
                            component,
                            field,
                        }
                    }
                })
                .collect();
            assert_eq!(issues, expected, "{role} / {component}");
        }
    }
}

#[test]
fn two_pairs_set_is_rejected_for_single_roles() {
    let cases = [
        (Role::Origin, ComponentRole::Cache),
        (Role::Cache, ComponentRole::Metadata),
        (Role::Metadata, ComponentRole::Origin),
    ];
    for (role, extra) in cases {
        let sb = valid(role)
            .with_extent(extra, extent_for(extra))
            .sealed();
        assert!(!sb.is_valid(), "{role} with {extra} also set");
        assert!(
            sb.issues()
                .all(|issue| matches!(issue, Issue::ExtentSet { component, .. } if component == extra))
        );
    }
}

#[test]
fn half_set_pair_reports_only_missing_half() {
    let sb = valid(Role::Metadata)
        .with_extent(ComponentRole::Metadata, Extent::new(4096, 0))
        .sealed();
    let issues: Vec<String> = sb.issues().map(|issue| issue.to_string()).collect();
    assert_eq!(
        issues,
        vec!["metadata size not set for (non-combined) metadata device".to_owned()]
    );
}
