//! Block map maintenance, directory entry storage, path resolution and the
//! file operations built on top of them.

use zerocopy::{FromBytes, IntoBytes};

use crate::codec;
use crate::fs::dir::{DirEntry, ENTRY_SIZE, EntryName};
use crate::fs::node::{DIRECT_LINKS, Inode, NodeKind, UNUSED_LINK};
use crate::fs::path::Path;
use crate::fs::{Error, Filesystem, Result};

impl Filesystem {
    fn ids_per_block(&self) -> u32 {
        self.superblock.block_size.get() / size_of::<u32>() as u32
    }

    fn entries_per_block(&self) -> u32 {
        self.superblock.block_size.get() / ENTRY_SIZE as u32
    }

    /// Reads one whole data block.
    fn read_block(&mut self, block: u32) -> Result<Vec<u8>> {
        let size = self.superblock.block_size.get() as usize;
        let data = self
            .image
            .read_at(self.superblock.block_offset(block), size)?;
        if data.len() != size {
            return Err(Error::InvalidBlockSize(block));
        }
        Ok(data)
    }

    /// Interprets a block as a table of block ids, up to the first unused
    /// sentinel.
    pub(crate) fn read_block_ids(&mut self, table: u32) -> Result<Vec<u32>> {
        let data = self.read_block(table)?;
        let mut ids = Vec::new();
        for chunk in data.chunks_exact(size_of::<u32>()) {
            let id = codec::read_u32(chunk)?;
            if id == UNUSED_LINK {
                break;
            }
            ids.push(id);
        }
        Ok(ids)
    }

    /// Interprets a block as directory entries, up to the first terminator.
    fn read_entries(&mut self, block: u32) -> Result<Vec<DirEntry>> {
        let data = self.read_block(block)?;
        let slots =
            <[DirEntry]>::ref_from_bytes(data.as_slice()).map_err(|_| Error::InvalidBlockSize(block))?;
        Ok(slots
            .iter()
            .take_while(|entry| !entry.is_terminator())
            .copied()
            .collect())
    }

    fn write_entry(&mut self, block: u32, index: u32, entry: &DirEntry) -> Result<()> {
        let offset = self.superblock.block_offset(block) + index as u64 * ENTRY_SIZE as u64;
        self.image.write_at(offset, entry.as_bytes())?;
        Ok(())
    }

    fn write_table_slot(&mut self, table: u32, index: u32, value: u32) -> Result<()> {
        let offset = self.superblock.block_offset(table) + index as u64 * size_of::<u32>() as u64;
        self.image.write_at(offset, &codec::write_u32(value))?;
        Ok(())
    }

    fn clear_table_slot(&mut self, table: u32, index: u32) -> Result<()> {
        let offset = self.superblock.block_offset(table) + index as u64 * size_of::<u32>() as u64;
        self.image.write_at(offset, &[0xFFu8; size_of::<u32>()])?;
        Ok(())
    }

    /// Appends `block` to the inode's logical block list, allocating
    /// indirect tables on demand.
    pub fn attach_block(&mut self, node: &mut Inode, block: u32) -> Result<()> {
        if node.add_direct_link(block).is_ok() {
            self.write_inode(node)?;
            return Ok(());
        }

        let table = match node.single_indirect().get() {
            Some(table) => table,
            None => {
                let table = self.allocate_block()?;
                self.fill_block(table, 0xFF)?;
                node.set_single_indirect(table)?;
                self.write_inode(node)?;
                table
            }
        };
        let ids = self.read_block_ids(table)?;
        if (ids.len() as u32) < self.ids_per_block() {
            self.write_table_slot(table, ids.len() as u32, block)?;
            return Ok(());
        }

        let outer = match node.double_indirect().get() {
            Some(outer) => outer,
            None => {
                let outer = self.allocate_block()?;
                self.fill_block(outer, 0xFF)?;
                node.set_double_indirect(outer)?;
                self.write_inode(node)?;
                outer
            }
        };
        let ptrs = self.read_block_ids(outer)?;
        for &ptr in &ptrs {
            let ids = self.read_block_ids(ptr)?;
            if (ids.len() as u32) < self.ids_per_block() {
                self.write_table_slot(ptr, ids.len() as u32, block)?;
                return Ok(());
            }
        }
        if (ptrs.len() as u32) < self.ids_per_block() {
            let leaf = self.allocate_block()?;
            self.fill_block(leaf, 0xFF)?;
            self.write_table_slot(outer, ptrs.len() as u32, leaf)?;
            self.write_table_slot(leaf, 0, block)?;
            return Ok(());
        }
        Err(Error::FileTooLarge)
    }

    /// Removes `block` from the inode's block map, freeing it along with
    /// any indirect table the removal empties.
    pub fn detach_block(&mut self, node: &mut Inode, block: u32) -> Result<()> {
        if node.direct_links().iter().any(|link| link.get() == Some(block)) {
            node.remove_direct_link(block)?;
            self.free_block(block)?;
            self.write_inode(node)?;
            return Ok(());
        }

        if let Some(table) = node.single_indirect().get() {
            if self.remove_from_table(table, block)? {
                self.free_block(block)?;
                if self.read_block_ids(table)?.is_empty() {
                    self.free_block(table)?;
                    node.clear_single_indirect();
                }
                self.write_inode(node)?;
                return Ok(());
            }
        }

        if let Some(outer) = node.double_indirect().get() {
            for ptr in self.read_block_ids(outer)? {
                if self.remove_from_table(ptr, block)? {
                    self.free_block(block)?;
                    if self.read_block_ids(ptr)?.is_empty() {
                        self.remove_from_table(outer, ptr)?;
                        self.free_block(ptr)?;
                    }
                    if self.read_block_ids(outer)?.is_empty() {
                        self.free_block(outer)?;
                        node.clear_double_indirect();
                    }
                    self.write_inode(node)?;
                    return Ok(());
                }
            }
        }

        Err(Error::BlockNotAttached(block))
    }

    /// Removes `value` from a block-id table with swap-with-last
    /// compaction. Returns whether the value was present.
    fn remove_from_table(&mut self, table: u32, value: u32) -> Result<bool> {
        let ids = self.read_block_ids(table)?;
        let Some(target) = ids.iter().position(|&id| id == value) else {
            return Ok(false);
        };
        let last = ids.len() - 1;
        if target != last {
            self.write_table_slot(table, target as u32, ids[last])?;
        }
        self.clear_table_slot(table, last as u32)?;
        Ok(true)
    }

    /// Returns every block reachable from the inode, indirect tables
    /// included.
    pub(crate) fn reachable_blocks(&mut self, node: &Inode) -> Result<Vec<u32>> {
        let mut blocks: Vec<u32> = node.direct_links().iter().filter_map(|link| link.get()).collect();
        if let Some(table) = node.single_indirect().get() {
            blocks.push(table);
            blocks.extend(self.read_block_ids(table)?);
        }
        if let Some(outer) = node.double_indirect().get() {
            blocks.push(outer);
            for ptr in self.read_block_ids(outer)? {
                blocks.push(ptr);
                blocks.extend(self.read_block_ids(ptr)?);
            }
        }
        Ok(blocks)
    }

    /// Returns the inode's content blocks in canonical order: directs,
    /// then single-indirect contents, then double-indirect leaf contents.
    fn content_blocks(&mut self, node: &Inode) -> Result<Vec<u32>> {
        let mut blocks = Vec::new();
        for link in node.direct_links() {
            match link.get() {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        if let Some(table) = node.single_indirect().get() {
            blocks.extend(self.read_block_ids(table)?);
        }
        if let Some(outer) = node.double_indirect().get() {
            for ptr in self.read_block_ids(outer)? {
                blocks.extend(self.read_block_ids(ptr)?);
            }
        }
        Ok(blocks)
    }

    /// Adds a `(name, child)` entry to the directory, walking content
    /// blocks in the same order as [Filesystem::attach_block] and
    /// allocating new ones on demand.
    pub(crate) fn add_child(&mut self, dir: &mut Inode, name: &str, child: u32) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let entry = DirEntry::new(EntryName::new(name), child);
        let per_block = self.entries_per_block();

        for slot in 0..DIRECT_LINKS {
            let block = match dir.direct_links()[slot].get() {
                Some(block) => block,
                None => {
                    let block = self.allocate_block()?;
                    self.fill_block(block, 0xFF)?;
                    dir.add_direct_link(block)?;
                    self.write_inode(dir)?;
                    block
                }
            };
            let live = self.read_entries(block)?.len() as u32;
            if live < per_block {
                self.write_entry(block, live, &entry)?;
                self.write_inode(dir)?;
                return Ok(());
            }
        }

        let table = match dir.single_indirect().get() {
            Some(table) => table,
            None => {
                let table = self.allocate_block()?;
                self.fill_block(table, 0xFF)?;
                dir.set_single_indirect(table)?;
                self.write_inode(dir)?;
                table
            }
        };
        let ids = self.read_block_ids(table)?;
        for &block in &ids {
            let live = self.read_entries(block)?.len() as u32;
            if live < per_block {
                self.write_entry(block, live, &entry)?;
                self.write_inode(dir)?;
                return Ok(());
            }
        }
        if (ids.len() as u32) < self.ids_per_block() {
            let block = self.allocate_block()?;
            self.fill_block(block, 0xFF)?;
            self.write_table_slot(table, ids.len() as u32, block)?;
            self.write_entry(block, 0, &entry)?;
            self.write_inode(dir)?;
            return Ok(());
        }

        let outer = match dir.double_indirect().get() {
            Some(outer) => outer,
            None => {
                let outer = self.allocate_block()?;
                self.fill_block(outer, 0xFF)?;
                dir.set_double_indirect(outer)?;
                self.write_inode(dir)?;
                outer
            }
        };
        let ptrs = self.read_block_ids(outer)?;
        for &ptr in &ptrs {
            let ids = self.read_block_ids(ptr)?;
            for &block in &ids {
                let live = self.read_entries(block)?.len() as u32;
                if live < per_block {
                    self.write_entry(block, live, &entry)?;
                    self.write_inode(dir)?;
                    return Ok(());
                }
            }
            if (ids.len() as u32) < self.ids_per_block() {
                let block = self.allocate_block()?;
                self.fill_block(block, 0xFF)?;
                self.write_table_slot(ptr, ids.len() as u32, block)?;
                self.write_entry(block, 0, &entry)?;
                self.write_inode(dir)?;
                return Ok(());
            }
        }
        if (ptrs.len() as u32) < self.ids_per_block() {
            let mid = self.allocate_block()?;
            self.fill_block(mid, 0xFF)?;
            self.write_table_slot(outer, ptrs.len() as u32, mid)?;
            let block = self.allocate_block()?;
            self.fill_block(block, 0xFF)?;
            self.write_table_slot(mid, 0, block)?;
            self.write_entry(block, 0, &entry)?;
            self.write_inode(dir)?;
            return Ok(());
        }
        Err(Error::FileTooLarge)
    }

    /// Removes the entry matching `name` and `child` with swap-with-last
    /// compaction; the last live entry is taken across all content blocks
    /// in scan order. Matching on the name as well as the id keeps hard
    /// links to one inode within the same directory apart.
    pub(crate) fn remove_child(&mut self, dir: &Inode, child: u32, name: &str) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let name = EntryName::new(name);
        let mut target = None;
        let mut last = None;
        for block in self.content_blocks(dir)? {
            let entries = self.read_entries(block)?;
            for (index, entry) in entries.iter().enumerate() {
                if target.is_none() && entry.id() == child && *entry.name() == name {
                    target = Some((block, index as u64));
                }
                last = Some((block, index as u64));
            }
        }
        let (Some(target), Some(last)) = (target, last) else {
            return Err(Error::ChildNotFound(child));
        };

        let last_offset = self.superblock.block_offset(last.0) + last.1 * ENTRY_SIZE as u64;
        if target == last {
            self.image.write_at(last_offset, &[0xFFu8; ENTRY_SIZE])?;
            return Ok(());
        }
        let moved = self.image.read_at(last_offset, ENTRY_SIZE)?;
        if moved.len() != ENTRY_SIZE {
            return Err(Error::DataReadFailed);
        }
        let target_offset = self.superblock.block_offset(target.0) + target.1 * ENTRY_SIZE as u64;
        self.image.write_at(target_offset, &moved)?;
        self.image.write_at(last_offset, &[0xFFu8; ENTRY_SIZE])?;
        Ok(())
    }

    /// Returns the live `(name, inode id)` pairs of a directory across all
    /// three tiers.
    pub(crate) fn children(&mut self, dir: &Inode) -> Result<Vec<(String, u32)>> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let mut children = Vec::new();
        for block in self.content_blocks(dir)? {
            for entry in self.read_entries(block)? {
                children.push((entry.name().as_str()?.to_string(), entry.id()));
            }
        }
        Ok(children)
    }

    pub(crate) fn find_child(&mut self, dir: &Inode, name: &str) -> Result<Option<u32>> {
        Ok(self
            .children(dir)?
            .into_iter()
            .find(|(child, _)| child.as_str() == name)
            .map(|(_, id)| id))
    }

    fn anchor(&mut self, path: &Path) -> Result<Inode> {
        if path.is_absolute() {
            self.read_inode(self.superblock.root_id.get())
        } else {
            self.read_inode(self.current_id)
        }
    }

    fn walk(&mut self, mut node: Inode, parts: &[&str]) -> Result<Inode> {
        for &part in parts {
            match part {
                "." => continue,
                ".." => {
                    let parent = self
                        .find_child(&node, "..")?
                        .ok_or(Error::NoParentDirectory)?;
                    node = self.read_inode(parent)?;
                }
                name => {
                    if !node.is_dir() {
                        return Err(Error::NotADirectory);
                    }
                    let child = self
                        .find_child(&node, name)?
                        .ok_or_else(|| Error::PathNotFound(name.to_string()))?;
                    node = self.read_inode(child)?;
                }
            }
        }
        Ok(node)
    }

    /// Resolves a path to its inode. A leading `/` anchors at the root;
    /// otherwise resolution starts at the current directory.
    pub fn resolve(&mut self, path: &str) -> Result<Inode> {
        self.ensure_formatted()?;
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        let path = Path::new(path);
        let start = self.anchor(&path)?;
        let parts: Vec<&str> = path.parts().collect();
        self.walk(start, &parts)
    }

    /// Resolves a path up to its final segment, returning the parent inode
    /// and that segment.
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(Inode, &'p str)> {
        self.ensure_formatted()?;
        if path.is_empty() {
            return Err(Error::EmptyPath);
        }
        let path = Path::new(path);
        let (_, name) = path.split_last().ok_or(Error::EmptyPath)?;
        let start = self.anchor(&path)?;
        let parts: Vec<&str> = path.parts().collect();
        let node = self.walk(start, &parts[..parts.len() - 1])?;
        Ok((node, name))
    }

    /// Writes `data` to the file at `path`, creating it when missing and
    /// replacing its contents when present.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let (mut parent, name) = self.resolve_parent(path)?;
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }

        let mut file = match self.find_child(&parent, name)? {
            Some(id) => {
                let mut file = self.read_inode(id)?;
                if file.is_dir() {
                    return Err(Error::NotADirectory);
                }
                self.release_blocks(&mut file)?;
                file
            }
            None => {
                let node = self.allocate_node(NodeKind::File)?;
                self.add_child(&mut parent, name, node.id())?;
                self.write_inode(&parent)?;
                node
            }
        };

        let block_size = self.superblock.block_size.get() as usize;
        for chunk in data.chunks(block_size) {
            let block = self.allocate_block()?;
            self.image
                .write_at(self.superblock.block_offset(block), chunk)?;
            self.attach_block(&mut file, block)?;
        }
        file.add_size(data.len() as u32);
        self.write_inode(&file)?;
        Ok(())
    }

    /// Frees every block reachable from the file and resets its block map
    /// and size.
    fn release_blocks(&mut self, file: &mut Inode) -> Result<()> {
        for link in file.direct_links() {
            if let Some(block) = link.get() {
                self.free_block(block)?;
            }
        }
        file.clear_direct_links();
        if let Some(table) = file.single_indirect().get() {
            for block in self.read_block_ids(table)? {
                self.free_block(block)?;
            }
            self.free_block(table)?;
            file.clear_single_indirect();
        }
        if let Some(outer) = file.double_indirect().get() {
            for ptr in self.read_block_ids(outer)? {
                for block in self.read_block_ids(ptr)? {
                    self.free_block(block)?;
                }
                self.free_block(ptr)?;
            }
            self.free_block(outer)?;
            file.clear_double_indirect();
        }
        let size = file.size();
        file.remove_size(size)?;
        Ok(())
    }

    /// Reads the whole contents of the file at `path`.
    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        let file = self.resolve(path)?;
        if file.is_dir() {
            return Err(Error::NotADirectory);
        }
        let block_size = self.superblock.block_size.get() as usize;
        let mut remaining = file.size() as usize;
        let mut data = Vec::with_capacity(remaining);
        for block in self.content_blocks(&file)? {
            if remaining == 0 {
                break;
            }
            let to_read = remaining.min(block_size);
            let chunk = self
                .image
                .read_at(self.superblock.block_offset(block), to_read)?;
            if chunk.len() != to_read {
                return Err(Error::DataReadFailed);
            }
            data.extend_from_slice(&chunk);
            remaining -= to_read;
        }
        Ok(data)
    }

    pub fn copy_file(&mut self, src: &str, dst: &str) -> Result<()> {
        let data = self.read_file(src)?;
        self.write_file(dst, &data)
    }

    /// Moves a file by copying it and removing the source; the destination
    /// gets a new inode. Moving a path onto itself is a no-op.
    pub fn move_file(&mut self, src: &str, dst: &str) -> Result<()> {
        self.ensure_formatted()?;
        if src == dst {
            return Ok(());
        }
        let node = self.resolve(src)?;
        if node.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.copy_file(src, dst)?;
        self.remove_file(src)
    }

    /// Removes the directory entry for the file; the inode and its blocks
    /// are freed once the last link is gone.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.resolve_parent(path)?;
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        let id = self
            .find_child(&parent, name)?
            .ok_or_else(|| Error::PathNotFound(name.to_string()))?;
        let mut file = self.read_inode(id)?;
        if file.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.remove_child(&parent, id, name)?;
        self.write_inode(&parent)?;
        if file.links() == 1 {
            self.free_node(&file)?;
        } else {
            file.remove_link();
            self.write_inode(&file)?;
        }
        Ok(())
    }

    /// Creates a hard link to `original` at `link`. Both paths end up as
    /// directory entries sharing one inode.
    pub fn link_file(&mut self, original: &str, link: &str) -> Result<()> {
        let mut node = self.resolve(original)?;
        if node.is_dir() {
            return Err(Error::NotADirectory);
        }
        let (mut parent, name) = self.resolve_parent(link)?;
        if !parent.is_dir() {
            return Err(Error::NotADirectory);
        }
        if self.find_child(&parent, name)?.is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        self.add_child(&mut parent, name, node.id())?;
        node.add_link();
        self.write_inode(&node)?;
        self.write_inode(&parent)?;
        Ok(())
    }

    /// Creates a directory, wiring its `.` and `..` entries. The reserved
    /// inode is freed again if any entry insertion fails.
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        let (mut parent, name) = self.resolve_parent(path)?;
        let mut node = self.allocate_node(NodeKind::Dir)?;
        if let Err(e) = self.wire_directory(&mut parent, name, &mut node) {
            self.free_node(&node)?;
            return Err(e);
        }
        Ok(())
    }

    fn wire_directory(&mut self, parent: &mut Inode, name: &str, node: &mut Inode) -> Result<()> {
        self.add_child(parent, name, node.id())?;
        self.add_child(node, ".", node.id())?;
        self.add_child(node, "..", parent.id())
    }

    /// Removes an empty directory. The root and the current working
    /// directory cannot be removed.
    pub fn remove_directory(&mut self, path: &str) -> Result<()> {
        self.ensure_formatted()?;
        if path == "/" {
            return Err(Error::RemoveRoot);
        }
        let (parent, name) = self.resolve_parent(path)?;
        let id = self
            .find_child(&parent, name)?
            .ok_or_else(|| Error::PathNotFound(name.to_string()))?;
        if id == self.current_id {
            return Err(Error::RemoveCurrent);
        }
        let dir = self.read_inode(id)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        if self.children(&dir)?.len() > 2 {
            return Err(Error::DirectoryNotEmpty);
        }
        self.remove_child(&parent, id, name)?;
        self.write_inode(&parent)?;
        self.free_node(&dir)?;
        Ok(())
    }

    pub fn change_directory(&mut self, path: &str) -> Result<()> {
        let node = self.resolve(path)?;
        if !node.is_dir() {
            return Err(Error::NotADirectory);
        }
        self.current_id = node.id();
        Ok(())
    }

    /// Returns the path components of the current directory, walking `..`
    /// entries up to the root.
    pub fn current_path(&mut self) -> Result<Vec<String>> {
        self.ensure_formatted()?;
        let mut parts = Vec::new();
        let mut node = self.read_inode(self.current_id)?;
        if node.id() == self.superblock.root_id.get() {
            return Ok(parts);
        }
        loop {
            let parent_id = self
                .find_child(&node, "..")?
                .ok_or(Error::NoParentDirectory)?;
            let parent = self.read_inode(parent_id)?;
            if parent.id() == node.id() {
                break;
            }
            let name = self
                .children(&parent)?
                .into_iter()
                .find(|(name, id)| {
                    *id == node.id() && name.as_str() != "." && name.as_str() != ".."
                })
                .map(|(name, _)| name)
                .ok_or(Error::OrphanedNode)?;
            parts.push(name);
            node = parent;
        }
        parts.reverse();
        Ok(parts)
    }

    /// Lists `(name, is_directory)` pairs for all children of a directory,
    /// excluding `.` and `..`.
    pub fn subdirectories(&mut self, path: &str) -> Result<Vec<(String, bool)>> {
        let dir = self.resolve(path)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory);
        }
        let mut listing = Vec::new();
        for (name, id) in self.children(&dir)? {
            if name == "." || name == ".." {
                continue;
            }
            let node = self.read_inode(id)?;
            listing.push((name, node.is_dir()));
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    struct TempImage(PathBuf);

    impl TempImage {
        fn new(name: &str) -> Self {
            let path =
                std::env::temp_dir().join(format!("imgfs-ops-{}-{name}.img", std::process::id()));
            let _ = std::fs::remove_file(&path);
            Self(path)
        }
    }

    impl Drop for TempImage {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn format_fs(image: &TempImage, bytes: u32) -> Filesystem {
        let mut fs = Filesystem::open(&image.0).unwrap();
        fs.format(bytes).unwrap();
        fs
    }

    #[test]
    fn attach_fills_directs_before_indirect() {
        let image = TempImage::new("attach");
        let mut fs = format_fs(&image, 1_048_576);
        let mut node = fs.allocate_node(NodeKind::File).unwrap();

        for _ in 0..DIRECT_LINKS {
            let block = fs.allocate_block().unwrap();
            fs.attach_block(&mut node, block).unwrap();
        }
        assert!(node.direct_links().iter().all(|link| !link.is_unused()));
        assert!(node.single_indirect().is_unused());

        let block = fs.allocate_block().unwrap();
        fs.attach_block(&mut node, block).unwrap();
        let table = node.single_indirect().get().unwrap();
        assert_eq!(fs.read_block_ids(table).unwrap(), vec![block]);
        assert!(node.double_indirect().is_unused());
    }

    #[test]
    fn detach_frees_an_emptied_table() {
        let image = TempImage::new("detach");
        let mut fs = format_fs(&image, 1_048_576);
        let mut node = fs.allocate_node(NodeKind::File).unwrap();

        let mut blocks = Vec::new();
        for _ in 0..DIRECT_LINKS + 1 {
            let block = fs.allocate_block().unwrap();
            fs.attach_block(&mut node, block).unwrap();
            blocks.push(block);
        }
        let table = node.single_indirect().get().unwrap();
        let spilled = *blocks.last().unwrap();

        fs.detach_block(&mut node, spilled).unwrap();
        assert!(node.single_indirect().is_unused());
        assert!(!fs.block_map().get(spilled));
        assert!(!fs.block_map().get(table));

        let persisted = fs.read_inode(node.id()).unwrap();
        assert!(persisted.single_indirect().is_unused());
    }

    #[test]
    fn detach_rejects_foreign_blocks() {
        let image = TempImage::new("detach-missing");
        let mut fs = format_fs(&image, 1_048_576);
        let mut node = fs.allocate_node(NodeKind::File).unwrap();
        assert!(matches!(
            fs.detach_block(&mut node, 42),
            Err(Error::BlockNotAttached(42))
        ));
    }

    #[test]
    fn directory_entries_spill_across_blocks() {
        let image = TempImage::new("spill");
        let mut fs = format_fs(&image, 1_048_576);
        let mut dir = fs.allocate_node(NodeKind::Dir).unwrap();

        let count = fs.entries_per_block() + 6;
        for i in 0..count {
            fs.add_child(&mut dir, &format!("e{i}"), 1000 + i).unwrap();
        }
        assert!(dir.direct_links()[1].get().is_some());
        assert_eq!(fs.children(&dir).unwrap().len(), count as usize);
    }

    #[test]
    fn swap_with_last_keeps_the_entry_set() {
        let image = TempImage::new("swap");
        let mut fs = format_fs(&image, 1_048_576);
        let mut dir = fs.allocate_node(NodeKind::Dir).unwrap();

        let count = fs.entries_per_block() + 6;
        for i in 0..count {
            fs.add_child(&mut dir, &format!("e{i}"), 1000 + i).unwrap();
        }
        // Remove an entry in the first block; the hole is filled from the
        // second block.
        fs.remove_child(&dir, 1003, "e3").unwrap();

        let expected: HashSet<(String, u32)> = (0..count)
            .filter(|&i| i != 3)
            .map(|i| (format!("e{i}"), 1000 + i))
            .collect();
        let actual: HashSet<(String, u32)> = fs.children(&dir).unwrap().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn remove_child_requires_presence() {
        let image = TempImage::new("remove-missing");
        let mut fs = format_fs(&image, 1_048_576);
        let mut dir = fs.allocate_node(NodeKind::Dir).unwrap();
        fs.add_child(&mut dir, "only", 7).unwrap();
        assert!(matches!(
            fs.remove_child(&dir, 8, "only"),
            Err(Error::ChildNotFound(8))
        ));
        assert!(matches!(
            fs.remove_child(&dir, 7, "other"),
            Err(Error::ChildNotFound(7))
        ));
    }

    #[test]
    fn removing_an_alias_keeps_the_other_names() {
        let image = TempImage::new("alias");
        let mut fs = format_fs(&image, 1_048_576);
        let mut dir = fs.allocate_node(NodeKind::Dir).unwrap();
        // Three hard links to one inode living in the same directory.
        fs.add_child(&mut dir, "f", 42).unwrap();
        fs.add_child(&mut dir, "g", 42).unwrap();
        fs.add_child(&mut dir, "h", 42).unwrap();

        fs.remove_child(&dir, 42, "g").unwrap();

        let expected: HashSet<(String, u32)> =
            [("f".to_string(), 42), ("h".to_string(), 42)].into();
        let actual: HashSet<(String, u32)> = fs.children(&dir).unwrap().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn allocate_node_rolls_back_without_blocks() {
        let image = TempImage::new("rollback");
        let mut fs = format_fs(&image, 20_000);
        while fs.allocate_block().is_ok() {}
        let free_inodes = fs.inode_map().free_count();
        assert!(matches!(
            fs.allocate_node(NodeKind::Dir),
            Err(Error::NoFreeBlocks)
        ));
        assert_eq!(fs.inode_map().free_count(), free_inodes);
    }

    #[test]
    fn dot_and_dotdot_resolution() {
        let image = TempImage::new("resolve");
        let mut fs = format_fs(&image, 1_048_576);
        fs.create_directory("/a").unwrap();
        fs.create_directory("/a/b").unwrap();
        fs.change_directory("/a/b").unwrap();

        let here = fs.resolve(".").unwrap();
        assert_eq!(fs.current_path().unwrap(), vec!["a", "b"]);
        let parent = fs.resolve("..").unwrap();
        let root = fs.resolve("../..").unwrap();
        assert_ne!(here.id(), parent.id());
        assert_eq!(root.id(), fs.superblock().root_id.get());

        let beyond_root = fs.resolve("/..").unwrap();
        assert_eq!(beyond_root.id(), root.id());
    }

    #[test]
    fn resolving_through_a_file_fails() {
        let image = TempImage::new("through-file");
        let mut fs = format_fs(&image, 1_048_576);
        fs.write_file("/f", b"data").unwrap();
        assert!(matches!(
            fs.resolve("/f/child"),
            Err(Error::NotADirectory)
        ));
        assert!(matches!(
            fs.resolve("/nope"),
            Err(Error::PathNotFound(_))
        ));
    }
}
