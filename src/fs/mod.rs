use std::path::Path as HostPath;

use log::{info, warn};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::fs::bitmap::Bitmap;
use crate::fs::node::{INODE_SIZE, Inode, NodeKind};
use crate::fs::path::Path;
use crate::fs::superblock::{Geometry, MAGIC, SUPERBLOCK_SIZE, Superblock};
use crate::image::{Image, Mode};

pub mod bitmap;
pub mod dir;
pub mod node;
mod ops;
pub mod path;
pub mod superblock;

/// An in-memory view of the filesystem inside one image file.
///
/// The engine is the single authority over consistency: bitmap updates,
/// inode writes and block writes for one operation are issued here. Inode
/// and block writes go to disk eagerly; the bitmaps and superblock are
/// flushed on teardown.
pub struct Filesystem {
    image: Image,
    superblock: Superblock,
    inode_map: Bitmap,
    block_map: Bitmap,
    current_id: u32,
    formatted: bool,
}

impl Filesystem {
    /// Opens an image file, mounting the filesystem when a valid superblock
    /// is present. Otherwise the value stays unformatted and only
    /// [Filesystem::format] is accepted.
    pub fn open(path: &HostPath) -> Result<Self> {
        let mut image = Image::open(path, Mode::ReadWrite)?;
        let raw = image.read_at(0, SUPERBLOCK_SIZE)?;

        let mut fs = Self {
            image,
            superblock: Superblock::new_zeroed(),
            inode_map: Bitmap::new(0),
            block_map: Bitmap::new(0),
            current_id: 0,
            formatted: false,
        };

        let Ok(superblock) = Superblock::read_from_bytes(&raw) else {
            return Ok(fs);
        };
        if superblock.magic.get() != MAGIC {
            return Ok(fs);
        }
        if !superblock.is_consistent() {
            return Err(Error::InvalidSuperblock);
        }
        let data_end = superblock.block_offset(superblock.block_count.get());
        if fs.image.len()? < data_end {
            return Err(Error::InvalidSuperblock);
        }

        let inode_bytes = fs.image.read_at(
            superblock.inode_bitmap_offset.get() as u64,
            superblock.inode_count.get().div_ceil(8) as usize,
        )?;
        let block_bytes = fs.image.read_at(
            superblock.block_bitmap_offset.get() as u64,
            superblock.block_count.get().div_ceil(8) as usize,
        )?;

        fs.inode_map = Bitmap::from_bytes(inode_bytes, superblock.inode_count.get());
        fs.block_map = Bitmap::from_bytes(block_bytes, superblock.block_count.get());
        fs.current_id = superblock.root_id.get();
        fs.superblock = superblock;
        fs.formatted = true;
        info!(
            "mounted filesystem: {} blocks, {} inodes",
            superblock.block_count.get(),
            superblock.inode_count.get()
        );
        Ok(fs)
    }

    /// Formats the image to `bytes` total size, destroying any previous
    /// contents. The root directory becomes inode 0 and its `..` entry
    /// points at itself.
    pub fn format(&mut self, bytes: u32) -> Result<()> {
        let geometry = Geometry::fit(bytes).ok_or(Error::InvalidSize)?;
        self.image.resize(bytes as u64)?;
        if self.image.len()? != bytes as u64 {
            return Err(Error::ResizeMismatch);
        }

        self.superblock = Superblock::new(bytes, &geometry);
        self.inode_map = Bitmap::new(geometry.inodes);
        self.block_map = Bitmap::new(geometry.blocks);

        let mut root = self.allocate_node(NodeKind::Dir)?;
        self.superblock.root_id = U32::new(root.id());
        self.current_id = root.id();
        let root_id = root.id();
        self.add_child(&mut root, ".", root_id)?;
        self.add_child(&mut root, "..", root_id)?;

        self.write_superblock()?;
        self.write_bitmaps()?;
        self.formatted = true;
        info!(
            "formatted filesystem: {} blocks, {} inodes",
            geometry.blocks, geometry.inodes
        );
        Ok(())
    }

    pub fn is_formatted(&self) -> bool {
        self.formatted
    }

    pub(crate) fn ensure_formatted(&self) -> Result<()> {
        if self.formatted {
            Ok(())
        } else {
            Err(Error::NotFormatted)
        }
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn inode_map(&self) -> &Bitmap {
        &self.inode_map
    }

    pub fn block_map(&self) -> &Bitmap {
        &self.block_map
    }

    /// Reads the inode record for `id` from the inode table.
    pub(crate) fn read_inode(&mut self, id: u32) -> Result<Inode> {
        let offset = self.superblock.inode_offset(id);
        let bytes = self.image.read_at(offset, INODE_SIZE)?;
        Ok(Inode::read_from(&bytes)?)
    }

    /// Writes the inode record to its inode table slot.
    pub(crate) fn write_inode(&mut self, node: &Inode) -> Result<()> {
        let offset = self.superblock.inode_offset(node.id());
        self.image.write_at(offset, node.as_bytes())?;
        Ok(())
    }

    /// Allocates an inode with a link count of 1. Directory inodes get one
    /// content block, filled with `0xFF` so every slot reads as unused.
    /// The inode bitmap bit is rolled back if that block cannot be
    /// allocated.
    pub(crate) fn allocate_node(&mut self, kind: NodeKind) -> Result<Inode> {
        let id = self.inode_map.find_first_free().ok_or(Error::NoFreeInodes)?;
        self.inode_map.set(id, true);
        let mut node = Inode::new(id, kind);
        if kind == NodeKind::Dir {
            let block = match self.allocate_block() {
                Ok(block) => block,
                Err(e) => {
                    self.inode_map.set(id, false);
                    return Err(e);
                }
            };
            self.fill_block(block, 0xFF)?;
            self.attach_block(&mut node, block)?;
        }
        self.write_inode(&node)?;
        Ok(node)
    }

    /// Frees the inode, every block reachable from it, and zeroes its
    /// table slot.
    pub(crate) fn free_node(&mut self, node: &Inode) -> Result<()> {
        let blocks = self.reachable_blocks(node)?;
        self.inode_map.set(node.id(), false);
        for block in blocks {
            self.free_block(block)?;
        }
        let offset = self.superblock.inode_offset(node.id());
        self.image.write_at(offset, &[0u8; INODE_SIZE])?;
        Ok(())
    }

    /// Reserves a free block. The caller initializes its contents.
    pub(crate) fn allocate_block(&mut self) -> Result<u32> {
        let block = self.block_map.find_first_free().ok_or(Error::NoFreeBlocks)?;
        self.block_map.set(block, true);
        Ok(block)
    }

    /// Releases a block and zeroes its contents.
    pub(crate) fn free_block(&mut self, block: u32) -> Result<()> {
        self.block_map.set(block, false);
        let size = self.superblock.block_size.get() as usize;
        self.image
            .write_at(self.superblock.block_offset(block), &vec![0u8; size])?;
        Ok(())
    }

    /// Overwrites a whole block with `byte`.
    pub(crate) fn fill_block(&mut self, block: u32, byte: u8) -> Result<()> {
        let size = self.superblock.block_size.get() as usize;
        self.image
            .write_at(self.superblock.block_offset(block), &vec![byte; size])?;
        Ok(())
    }

    fn write_superblock(&mut self) -> Result<()> {
        self.image.write_at(0, self.superblock.as_bytes())?;
        Ok(())
    }

    fn write_bitmaps(&mut self) -> Result<()> {
        self.image.write_at(
            self.superblock.inode_bitmap_offset.get() as u64,
            self.inode_map.as_bytes(),
        )?;
        self.image.write_at(
            self.superblock.block_bitmap_offset.get() as u64,
            self.block_map.as_bytes(),
        )?;
        Ok(())
    }

    /// Produces a human-readable description of the node at `path`.
    pub fn node_info(&mut self, path: &str) -> Result<String> {
        self.ensure_formatted()?;
        let node = self.resolve(path)?;
        let name = Path::new(path)
            .split_last()
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut out = format!("{name} - {} B - inode {}", node.size(), node.id());
        let direct: Vec<String> = node
            .direct_links()
            .iter()
            .filter_map(|link| link.get())
            .map(|block| block.to_string())
            .collect();
        if direct.is_empty() {
            out.push_str(" - direct blocks none");
        } else {
            out.push_str(&format!(" - direct blocks {}", direct.join(", ")));
        }
        if let Some(block) = node.single_indirect().get() {
            out.push_str(&format!(" - single indirect {block}"));
        }
        if let Some(block) = node.double_indirect().get() {
            out.push_str(&format!(" - double indirect {block}"));
        }
        out.push_str(&format!(" - links {}", node.links()));
        Ok(out)
    }

    /// Produces human-readable filesystem statistics.
    pub fn stats(&mut self) -> Result<String> {
        self.ensure_formatted()?;
        let superblock = self.superblock;
        let cwd = self.current_path()?;
        let cwd = if cwd.is_empty() {
            "/".to_string()
        } else {
            format!("/{}", cwd.join("/"))
        };

        let total_blocks = superblock.block_count.get();
        let free_blocks = self.block_map.free_count();
        let total_inodes = superblock.inode_count.get();
        let free_inodes = self.inode_map.free_count();
        Ok(format!(
            "Filesystem size: {} B\n\
             Block size: {} B\n\
             Blocks: {} total, {} used, {} free\n\
             Inodes: {} total, {} used, {} free\n\
             Root inode: {}\n\
             Current directory: {}\n",
            superblock.image_size.get(),
            superblock.block_size.get(),
            total_blocks,
            total_blocks - free_blocks,
            free_blocks,
            total_inodes,
            total_inodes - free_inodes,
            free_inodes,
            superblock.root_id.get(),
            cwd,
        ))
    }
}

impl Drop for Filesystem {
    fn drop(&mut self) {
        if !self.formatted {
            return;
        }
        let flushed = self
            .write_superblock()
            .and_then(|_| self.write_bitmaps())
            .and_then(|_| self.image.flush().map_err(Error::from));
        if let Err(e) = flushed {
            warn!("failed to flush filesystem metadata: {e}");
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("filesystem is not formatted")]
    NotFormatted,
    #[error("filesystem size is invalid")]
    InvalidSize,
    #[error("image resize produced the wrong length")]
    ResizeMismatch,
    #[error("superblock geometry is inconsistent")]
    InvalidSuperblock,
    #[error("could not read block {0}")]
    InvalidBlockSize(u32),
    #[error("failed to read file data")]
    DataReadFailed,
    #[error("no free inodes")]
    NoFreeInodes,
    #[error("no free blocks")]
    NoFreeBlocks,
    #[error("file too large")]
    FileTooLarge,
    #[error("empty path")]
    EmptyPath,
    #[error("path not found: {0}")]
    PathNotFound(String),
    #[error("not a directory")]
    NotADirectory,
    #[error("no parent directory")]
    NoParentDirectory,
    #[error("child {0} not found")]
    ChildNotFound(u32),
    #[error("block {0} not attached to inode")]
    BlockNotAttached(u32),
    #[error("destination already exists: {0}")]
    AlreadyExists(String),
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("cannot remove root directory")]
    RemoveRoot,
    #[error("cannot remove current directory")]
    RemoveCurrent,
    #[error("node is missing from its parent directory")]
    OrphanedNode,
    #[error(transparent)]
    Image(#[from] crate::image::Error),
    #[error(transparent)]
    Node(#[from] node::Error),
    #[error(transparent)]
    Name(#[from] dir::Error),
    #[error(transparent)]
    Codec(#[from] crate::codec::Error),
}
