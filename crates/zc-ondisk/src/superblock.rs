#![forbid(unsafe_code)]

use serde::Serialize;
use zc_types::{
    CacheMode, ComponentRole, Extent, ParseError, Role, SetId, ZC_SB_CKSUM_WORD, ZC_SB_MAGIC,
    ZC_SB_SIZE, ZC_SB_VERSION, ZC_SB_WORDS,
};

/// Largest prime below 2^32, the modulus of both checksum accumulators.
const CKSUM_MODULUS: u64 = 4_294_967_291;

/// Byte order of the host whose memory image is being encoded or decoded.
///
/// The on-disk image is always little-endian per 64-bit word. Encoding a
/// word is two steps: convert it to disk order ([`Endian::to_disk`], a byte
/// swap on a big-endian host), then lay it out the way the host stores a
/// word in memory ([`Endian::store`]). Decoding runs the inverse steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub const HOST: Self = if cfg!(target_endian = "big") {
        Self::Big
    } else {
        Self::Little
    };

    /// Host-order word to disk-order word.
    #[must_use]
    pub const fn to_disk(self, word: u64) -> u64 {
        match self {
            Self::Little => word,
            Self::Big => word.swap_bytes(),
        }
    }

    /// Disk-order word to host-order word.
    #[must_use]
    pub const fn to_host(self, word: u64) -> u64 {
        self.to_disk(word)
    }

    /// Bytes of `word` as they sit in this host's memory.
    #[must_use]
    pub const fn store(self, word: u64) -> [u8; 8] {
        match self {
            Self::Little => word.to_le_bytes(),
            Self::Big => word.to_be_bytes(),
        }
    }

    /// Word held in this host's memory as `bytes`.
    #[must_use]
    pub const fn load(self, bytes: [u8; 8]) -> u64 {
        match self {
            Self::Little => u64::from_le_bytes(bytes),
            Self::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// In-memory (host order) v0 superblock.
///
/// `role` and `cache_mode` keep their raw word values so that a record
/// carrying an unknown value still decodes and can be reported on; use
/// [`Superblock::role`] and [`Superblock::cache_mode`] for typed access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Superblock {
    pub magic: u64,
    pub checksum: u64,
    pub version: u64,
    pub size: u64,
    pub role: u64,
    pub device_major: u64,
    pub set_id: SetId,
    pub block_size: u64,
    pub cache_mode: u64,
    pub origin: Extent,
    pub cache: Extent,
    pub metadata: Extent,
}

impl Superblock {
    /// Unsealed superblock for `role` with all extents zero.
    #[must_use]
    pub fn new(
        role: Role,
        set_id: SetId,
        device_major: u64,
        block_size: u64,
        cache_mode: CacheMode,
    ) -> Self {
        Self {
            magic: ZC_SB_MAGIC,
            checksum: 0,
            version: ZC_SB_VERSION,
            size: ZC_SB_SIZE as u64,
            role: role.code(),
            device_major,
            set_id,
            block_size,
            cache_mode: cache_mode.code(),
            origin: Extent::ZERO,
            cache: Extent::ZERO,
            metadata: Extent::ZERO,
        }
    }

    #[must_use]
    pub fn with_extent(mut self, component: ComponentRole, extent: Extent) -> Self {
        *self.extent_mut(component) = extent;
        self
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        Role::from_code(self.role)
    }

    #[must_use]
    pub fn cache_mode(&self) -> Option<CacheMode> {
        CacheMode::from_code(self.cache_mode)
    }

    #[must_use]
    pub fn extent(&self, component: ComponentRole) -> Extent {
        match component {
            ComponentRole::Origin => self.origin,
            ComponentRole::Cache => self.cache,
            ComponentRole::Metadata => self.metadata,
        }
    }

    fn extent_mut(&mut self, component: ComponentRole) -> &mut Extent {
        match component {
            ComponentRole::Origin => &mut self.origin,
            ComponentRole::Cache => &mut self.cache,
            ComponentRole::Metadata => &mut self.metadata,
        }
    }

    /// Fields as host-order words, in declaration order.
    #[must_use]
    pub fn to_words(&self) -> [u64; ZC_SB_WORDS] {
        let (uuid_lo, uuid_hi) = self.set_id.to_words();
        [
            self.magic,
            self.checksum,
            self.version,
            self.size,
            self.role,
            self.device_major,
            uuid_lo,
            uuid_hi,
            self.block_size,
            self.cache_mode,
            self.origin.offset,
            self.origin.size,
            self.cache.offset,
            self.cache.size,
            self.metadata.offset,
            self.metadata.size,
        ]
    }

    #[must_use]
    pub fn from_words(w: [u64; ZC_SB_WORDS]) -> Self {
        Self {
            magic: w[0],
            checksum: w[1],
            version: w[2],
            size: w[3],
            role: w[4],
            device_major: w[5],
            set_id: SetId::from_words(w[6], w[7]),
            block_size: w[8],
            cache_mode: w[9],
            origin: Extent::new(w[10], w[11]),
            cache: Extent::new(w[12], w[13]),
            metadata: Extent::new(w[14], w[15]),
        }
    }

    /// Rolling two-accumulator checksum over every word except the checksum
    /// itself. `s2` still absorbs `s1` at the checksum position.
    #[must_use]
    pub fn compute_checksum(&self) -> u64 {
        let mut s1 = 0_u64;
        let mut s2 = 0_u64;

        for (i, word) in self.to_words().into_iter().enumerate() {
            let skip = i == ZC_SB_CKSUM_WORD;

            if !skip {
                s1 = (s1 + (word & 0xFFFF_FFFF)) % CKSUM_MODULUS;
            }
            s2 = (s2 + s1) % CKSUM_MODULUS;

            if !skip {
                s1 = (s1 + (word >> 32)) % CKSUM_MODULUS;
            }
            s2 = (s2 + s1) % CKSUM_MODULUS;
        }

        (s2 << 32) | s1
    }

    /// Store the freshly computed checksum.
    pub fn seal(&mut self) {
        self.checksum = self.compute_checksum();
    }

    #[must_use]
    pub fn sealed(mut self) -> Self {
        self.seal();
        self
    }

    /// On-disk image for this host.
    #[must_use]
    pub fn encode(&self) -> [u8; ZC_SB_SIZE] {
        self.encode_for(Endian::HOST)
    }

    /// On-disk image as produced by a host of byte order `host`.
    #[must_use]
    pub fn encode_for(&self, host: Endian) -> [u8; ZC_SB_SIZE] {
        let mut out = [0_u8; ZC_SB_SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.to_words()) {
            chunk.copy_from_slice(&host.store(host.to_disk(word)));
        }
        out
    }

    #[must_use]
    pub fn decode(image: &[u8; ZC_SB_SIZE]) -> Self {
        Self::decode_for(image, Endian::HOST)
    }

    #[must_use]
    pub fn decode_for(image: &[u8; ZC_SB_SIZE], host: Endian) -> Self {
        let mut words = [0_u64; ZC_SB_WORDS];
        for (word, chunk) in words.iter_mut().zip(image.chunks_exact(8)) {
            let mut bytes = [0_u8; 8];
            bytes.copy_from_slice(chunk);
            *word = host.to_host(host.load(bytes));
        }
        Self::from_words(words)
    }

    /// Decode the record at the start of a header region.
    ///
    /// The region must hold at least one full record; trailing bytes (the
    /// rest of the reserved header) are ignored.
    pub fn parse_region(region: &[u8]) -> Result<Self, ParseError> {
        let bytes = zc_types::ensure_slice(region, 0, ZC_SB_SIZE)?;
        let mut image = [0_u8; ZC_SB_SIZE];
        image.copy_from_slice(bytes);
        Ok(Self::decode(&image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_word(image: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(image[offset..offset + 8].try_into().expect("word"))
    }

    fn origin_fixture() -> Superblock {
        let set_id = SetId::from_bytes(core::array::from_fn(|i| 0x10 + i as u8));
        Superblock::new(Role::Origin, set_id, 8, 262_144, CacheMode::Writeback)
            .with_extent(ComponentRole::Origin, Extent::new(4096, (1 << 30) - 4096))
            .sealed()
    }

    #[test]
    fn checksum_of_magic_only_record() {
        let mut words = [0_u64; ZC_SB_WORDS];
        words[0] = ZC_SB_MAGIC;
        let sb = Superblock::from_words(words);
        assert_eq!(sb.compute_checksum(), 0xD054_699B_AF89_88AE);
    }

    #[test]
    fn checksum_of_all_zero_record_is_zero() {
        let sb = Superblock::from_words([0; ZC_SB_WORDS]);
        assert_eq!(sb.compute_checksum(), 0);
    }

    #[test]
    fn checksum_ignores_checksum_slot() {
        let sb = origin_fixture();
        let mut other = sb;
        other.checksum = !sb.checksum;
        assert_eq!(sb.compute_checksum(), other.compute_checksum());
    }

    #[test]
    fn known_origin_image() {
        let sb = origin_fixture();
        assert_eq!(sb.checksum, 0x7D77_2FC5_53ED_E593);

        let image = sb.encode();
        assert_eq!(le_word(&image, 0), ZC_SB_MAGIC);
        assert_eq!(le_word(&image, 8), sb.checksum);
        assert_eq!(le_word(&image, 24), 128);
        assert_eq!(&image[48..64], sb.set_id.as_bytes());
        assert_eq!(le_word(&image, 80), 4096);
    }

    #[test]
    fn big_endian_host_swaps_each_word() {
        assert_eq!(Endian::Big.to_disk(0x0102_0304_0506_0708), 0x0807_0605_0403_0201);
        assert_eq!(Endian::Little.to_disk(0x0102_0304_0506_0708), 0x0102_0304_0506_0708);
        assert_eq!(Endian::Big.store(ZC_SB_MAGIC), ZC_SB_MAGIC.to_be_bytes());

        // Unswapped, a big-endian host's memory image of a word is not what
        // goes to disk.
        let size = ZC_SB_SIZE as u64;
        let on_disk = Endian::Big.store(Endian::Big.to_disk(size));
        assert_eq!(on_disk, size.to_le_bytes());
        assert_ne!(on_disk, Endian::Big.store(size));
        assert_eq!(Endian::Big.to_host(Endian::Big.load(on_disk)), size);
    }

    #[test]
    fn encode_is_host_independent() {
        let sb = origin_fixture();
        assert_eq!(sb.encode_for(Endian::Little), sb.encode_for(Endian::Big));
    }

    #[test]
    fn decode_round_trips_on_both_hosts() {
        let sb = origin_fixture();
        for host in [Endian::Little, Endian::Big] {
            let image = sb.encode_for(host);
            assert_eq!(Superblock::decode_for(&image, host), sb, "host {host:?}");
        }
    }

    #[test]
    fn parse_region_requires_full_record() {
        let sb = origin_fixture();
        let mut region = vec![0_u8; 4096];
        region[..ZC_SB_SIZE].copy_from_slice(&sb.encode());
        assert_eq!(Superblock::parse_region(&region), Ok(sb));

        assert_eq!(
            Superblock::parse_region(&region[..100]),
            Err(ParseError::InsufficientData {
                needed: ZC_SB_SIZE,
                offset: 0,
                actual: 100,
            })
        );
    }

    #[test]
    fn unknown_role_and_mode_still_decode() {
        let mut sb = origin_fixture();
        sb.role = 9;
        sb.cache_mode = 7;
        let decoded = Superblock::decode(&sb.encode());
        assert_eq!(decoded.role, 9);
        assert_eq!(decoded.role(), None);
        assert_eq!(decoded.cache_mode(), None);
    }
}
