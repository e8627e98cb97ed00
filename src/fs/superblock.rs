use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::fs::node::INODE_SIZE;

/// Magic value marking a formatted image.
pub const MAGIC: u32 = 0xDEAD_BEEF;

/// Fixed data block size in bytes.
pub const BLOCK_SIZE: u32 = 1024;

/// Fixed ratio of data blocks to inodes.
pub const BLOCKS_PER_INODE: u32 = 4;

/// [Superblock] size.
pub const SUPERBLOCK_SIZE: usize = size_of::<Superblock>();

/// Represents metadata about the filesystem, stored at offset 0.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Superblock {
    pub magic: U32,
    pub block_size: U32,
    pub block_count: U32,
    pub inode_count: U32,
    pub image_size: U32,
    pub inode_bitmap_offset: U32,
    pub block_bitmap_offset: U32,
    pub inode_table_offset: U32,
    pub data_offset: U32,
    pub root_id: U32,
}

impl Superblock {
    /// Constructs a superblock for an image of `image_size` bytes holding
    /// the given geometry. The root inode id starts at 0.
    pub fn new(image_size: u32, geometry: &Geometry) -> Self {
        let inode_bitmap_offset = SUPERBLOCK_SIZE as u32;
        let block_bitmap_offset = inode_bitmap_offset + geometry.inodes.div_ceil(8);
        let inode_table_offset = block_bitmap_offset + geometry.blocks.div_ceil(8);
        let data_offset = inode_table_offset + geometry.inodes * INODE_SIZE as u32;

        Self {
            magic: U32::new(MAGIC),
            block_size: U32::new(BLOCK_SIZE),
            block_count: U32::new(geometry.blocks),
            inode_count: U32::new(geometry.inodes),
            image_size: U32::new(image_size),
            inode_bitmap_offset: U32::new(inode_bitmap_offset),
            block_bitmap_offset: U32::new(block_bitmap_offset),
            inode_table_offset: U32::new(inode_table_offset),
            data_offset: U32::new(data_offset),
            root_id: U32::new(0),
        }
    }

    /// Byte offset of data block `block` within the image.
    pub fn block_offset(&self, block: u32) -> u64 {
        self.data_offset.get() as u64 + block as u64 * self.block_size.get() as u64
    }

    /// Byte offset of the inode table slot for `id`.
    pub fn inode_offset(&self, id: u32) -> u64 {
        self.inode_table_offset.get() as u64 + id as u64 * INODE_SIZE as u64
    }

    /// Checks that the regions are ordered, sized consistently and fit
    /// inside the recorded image size.
    pub fn is_consistent(&self) -> bool {
        let blocks = self.block_count.get();
        let inodes = self.inode_count.get();
        if self.block_size.get() == 0 || blocks == 0 || inodes == 0 {
            return false;
        }
        let inode_bitmap_end = SUPERBLOCK_SIZE as u64 + inodes.div_ceil(8) as u64;
        let block_bitmap_end = inode_bitmap_end + blocks.div_ceil(8) as u64;
        let table_end = block_bitmap_end + inodes as u64 * INODE_SIZE as u64;
        let data_end = table_end + blocks as u64 * self.block_size.get() as u64;

        self.inode_bitmap_offset.get() == SUPERBLOCK_SIZE as u32
            && self.block_bitmap_offset.get() as u64 == inode_bitmap_end
            && self.inode_table_offset.get() as u64 == block_bitmap_end
            && self.data_offset.get() as u64 == table_end
            && data_end <= self.image_size.get() as u64
            && self.root_id.get() < inodes
    }
}

/// Block and inode counts that fit an image of a requested size.
pub struct Geometry {
    pub blocks: u32,
    pub inodes: u32,
}

impl Geometry {
    /// Finds the largest block count whose metadata footprint and data
    /// region fit inside `bytes`, keeping the 4:1 block-to-inode ratio.
    pub fn fit(bytes: u32) -> Option<Self> {
        let mut blocks = bytes / BLOCK_SIZE;
        while blocks > 0 {
            let inodes = blocks / BLOCKS_PER_INODE;
            let metadata = SUPERBLOCK_SIZE as u64
                + inodes.div_ceil(8) as u64
                + blocks.div_ceil(8) as u64
                + inodes as u64 * INODE_SIZE as u64;
            if metadata + blocks as u64 * BLOCK_SIZE as u64 <= bytes as u64 {
                if inodes == 0 {
                    return None;
                }
                return Some(Self { blocks, inodes });
            }
            blocks -= 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_40_bytes() {
        assert_eq!(SUPERBLOCK_SIZE, 40);
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let geometry = Geometry::fit(1_048_576).unwrap();
        let superblock = Superblock::new(1_048_576, &geometry);
        let bytes = superblock.as_bytes().to_vec();
        let restored = Superblock::read_from_bytes(&bytes).unwrap();
        assert_eq!(restored.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn magic_serializes_little_endian() {
        let geometry = Geometry::fit(1_048_576).unwrap();
        let superblock = Superblock::new(1_048_576, &geometry);
        assert_eq!(&superblock.as_bytes()[..4], &[0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn one_mebibyte_geometry() {
        // 1024 raw blocks do not fit next to their own metadata; the loop
        // settles at 1013 blocks and 253 inodes.
        let geometry = Geometry::fit(1_048_576).unwrap();
        assert_eq!(geometry.blocks, 1013);
        assert_eq!(geometry.inodes, 253);

        let superblock = Superblock::new(1_048_576, &geometry);
        assert_eq!(superblock.inode_bitmap_offset.get(), 40);
        assert_eq!(superblock.block_bitmap_offset.get(), 72);
        assert_eq!(superblock.inode_table_offset.get(), 199);
        assert_eq!(superblock.data_offset.get(), 199 + 253 * 41);
        assert!(superblock.is_consistent());
    }

    #[test]
    fn tiny_images_are_rejected() {
        assert!(Geometry::fit(0).is_none());
        assert!(Geometry::fit(1024).is_none());
        // Large enough for blocks but not for a single inode.
        assert!(Geometry::fit(4096).is_none());
    }

    #[test]
    fn fitted_geometry_is_consistent() {
        for bytes in [20_000u32, 100_000, 1_048_576, 10_000_000] {
            let geometry = Geometry::fit(bytes).unwrap();
            assert!(Superblock::new(bytes, &geometry).is_consistent());
        }
    }
}
