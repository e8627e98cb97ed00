use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, TryFromBytes, Unaligned};

/// [Inode] size.
pub const INODE_SIZE: usize = size_of::<Inode>();

/// How many direct block links an [Inode] holds.
pub const DIRECT_LINKS: usize = 5;

/// On-disk marker for a link field that points at no block.
pub const UNUSED_LINK: u32 = u32::MAX;

/// A block reference that may be unset.
///
/// On disk the unset state is the `0xFFFFFFFF` sentinel; in memory it is
/// lifted to an `Option` through [Link::get].
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Link(U32);

impl Link {
    /// Constructs a link to `block`.
    pub fn new(block: u32) -> Self {
        Self(U32::new(block))
    }

    /// Constructs a link that points at no block.
    pub fn unused() -> Self {
        Self(U32::new(UNUSED_LINK))
    }

    /// Returns the linked block, or `None` for an unused link.
    pub fn get(&self) -> Option<u32> {
        match self.0.get() {
            UNUSED_LINK => None,
            block => Some(block),
        }
    }

    pub fn is_unused(&self) -> bool {
        self.0.get() == UNUSED_LINK
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::unused()
    }
}

/// Kind of object an inode describes.
///
/// Decoding validates the on-disk byte: anything but 0 or 1 is rejected.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[derive(TryFromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub enum NodeKind {
    #[default]
    File = 0,
    Dir = 1,
}

/// Represents one filesystem object in the inode table.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(TryFromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Inode {
    id: U32,
    links: U32,
    size: U32,
    direct: [Link; DIRECT_LINKS],
    single_indirect: Link,
    double_indirect: Link,
    kind: NodeKind,
}

impl Inode {
    /// Constructs a freshly allocated inode with a link count of 1.
    pub fn new(id: u32, kind: NodeKind) -> Self {
        Self {
            id: U32::new(id),
            links: U32::new(1),
            size: U32::new(0),
            direct: [Link::unused(); DIRECT_LINKS],
            single_indirect: Link::unused(),
            double_indirect: Link::unused(),
            kind,
        }
    }

    /// Decodes an inode from its on-disk record.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != INODE_SIZE {
            return Err(Error::Truncated { actual: bytes.len() });
        }
        Self::try_read_from_bytes(bytes).map_err(|_| Error::InvalidKind)
    }

    pub fn id(&self) -> u32 {
        self.id.get()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    pub fn links(&self) -> u32 {
        self.links.get()
    }

    pub fn size(&self) -> u32 {
        self.size.get()
    }

    pub fn direct_links(&self) -> [Link; DIRECT_LINKS] {
        self.direct
    }

    pub fn single_indirect(&self) -> Link {
        self.single_indirect
    }

    pub fn double_indirect(&self) -> Link {
        self.double_indirect
    }

    /// Stores `block` in the first unused direct slot.
    pub fn add_direct_link(&mut self, block: u32) -> Result<()> {
        let slot = self
            .direct
            .iter_mut()
            .find(|slot| slot.is_unused())
            .ok_or(Error::NoFreeSlot)?;
        *slot = Link::new(block);
        Ok(())
    }

    /// Clears the direct slot holding `block`.
    pub fn remove_direct_link(&mut self, block: u32) -> Result<()> {
        let slot = self
            .direct
            .iter_mut()
            .find(|slot| slot.get() == Some(block))
            .ok_or(Error::LinkNotFound(block))?;
        *slot = Link::unused();
        Ok(())
    }

    pub fn clear_direct_links(&mut self) {
        self.direct = [Link::unused(); DIRECT_LINKS];
    }

    /// Sets the single-indirect table link; the field must be unused.
    pub fn set_single_indirect(&mut self, block: u32) -> Result<()> {
        if !self.single_indirect.is_unused() {
            return Err(Error::IndirectInUse);
        }
        self.single_indirect = Link::new(block);
        Ok(())
    }

    pub fn clear_single_indirect(&mut self) {
        self.single_indirect = Link::unused();
    }

    /// Sets the double-indirect table link; the field must be unused.
    pub fn set_double_indirect(&mut self, block: u32) -> Result<()> {
        if !self.double_indirect.is_unused() {
            return Err(Error::IndirectInUse);
        }
        self.double_indirect = Link::new(block);
        Ok(())
    }

    pub fn clear_double_indirect(&mut self) {
        self.double_indirect = Link::unused();
    }

    pub fn add_link(&mut self) {
        self.links = U32::new(self.links.get() + 1);
    }

    /// Decrements the link count, returning whether it reached zero.
    pub fn remove_link(&mut self) -> bool {
        let count = self.links.get().saturating_sub(1);
        self.links = U32::new(count);
        count == 0
    }

    pub fn add_size(&mut self, bytes: u32) {
        self.size = U32::new(self.size.get() + bytes);
    }

    pub fn remove_size(&mut self, bytes: u32) -> Result<()> {
        let size = self.size.get();
        if bytes > size {
            return Err(Error::SizeUnderflow);
        }
        self.size = U32::new(size - bytes);
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("inode record truncated to {actual} bytes")]
    Truncated { actual: usize },
    #[error("inode kind byte is neither file nor directory")]
    InvalidKind,
    #[error("all direct links are in use")]
    NoFreeSlot,
    #[error("block {0} is not a direct link")]
    LinkNotFound(u32),
    #[error("indirect link already set")]
    IndirectInUse,
    #[error("size would drop below zero")]
    SizeUnderflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_41_bytes() {
        assert_eq!(INODE_SIZE, 41);
    }

    #[test]
    fn round_trips_byte_for_byte() {
        let mut node = Inode::new(7, NodeKind::Dir);
        node.add_direct_link(3).unwrap();
        node.set_single_indirect(9).unwrap();
        node.add_size(123);
        let bytes = node.as_bytes().to_vec();
        let restored = Inode::read_from(&bytes).unwrap();
        assert_eq!(restored.as_bytes(), bytes.as_slice());
        assert_eq!(restored.id(), 7);
        assert!(restored.is_dir());
        assert_eq!(restored.size(), 123);
    }

    #[test]
    fn layout_matches_disk_format() {
        let mut node = Inode::new(0x0102_0304, NodeKind::File);
        node.add_direct_link(0x0A0B_0C0D).unwrap();
        let bytes = node.as_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(&bytes[16..20], &[0xFF; 4]);
        assert_eq!(bytes[40], 0);
    }

    #[test]
    fn kind_byte_is_validated() {
        let mut bytes = Inode::new(1, NodeKind::File).as_bytes().to_vec();
        bytes[40] = 2;
        assert!(matches!(Inode::read_from(&bytes), Err(Error::InvalidKind)));
        assert!(matches!(
            Inode::read_from(&bytes[..40]),
            Err(Error::Truncated { actual: 40 })
        ));
    }

    #[test]
    fn direct_links_fill_left_to_right() {
        let mut node = Inode::new(0, NodeKind::File);
        for block in 0..DIRECT_LINKS as u32 {
            node.add_direct_link(block).unwrap();
        }
        assert!(matches!(node.add_direct_link(99), Err(Error::NoFreeSlot)));
        node.remove_direct_link(2).unwrap();
        assert!(node.direct_links()[2].is_unused());
        assert!(matches!(
            node.remove_direct_link(2),
            Err(Error::LinkNotFound(2))
        ));
    }

    #[test]
    fn indirect_links_set_once() {
        let mut node = Inode::new(0, NodeKind::File);
        node.set_single_indirect(5).unwrap();
        assert!(matches!(
            node.set_single_indirect(6),
            Err(Error::IndirectInUse)
        ));
        node.clear_single_indirect();
        node.set_single_indirect(6).unwrap();
        assert_eq!(node.single_indirect().get(), Some(6));
    }

    #[test]
    fn link_count_reaches_zero() {
        let mut node = Inode::new(0, NodeKind::File);
        node.add_link();
        assert!(!node.remove_link());
        assert!(node.remove_link());
    }

    #[test]
    fn size_cannot_underflow() {
        let mut node = Inode::new(0, NodeKind::File);
        node.add_size(10);
        assert!(matches!(node.remove_size(11), Err(Error::SizeUnderflow)));
        node.remove_size(10).unwrap();
        assert_eq!(node.size(), 0);
    }
}
