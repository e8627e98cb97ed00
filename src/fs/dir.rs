use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::fs::node::UNUSED_LINK;

/// Length of the fixed name field.
pub const NAME_LEN: usize = 12;

/// [DirEntry] size.
pub const ENTRY_SIZE: usize = size_of::<DirEntry>();

/// Represents one child of a directory: a fixed-width name followed by the
/// child's inode id. An entry whose id is the unused sentinel terminates
/// the logical sequence within a block.
#[repr(C)]
#[derive(Clone, Copy)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DirEntry {
    name: EntryName,
    id: U32,
}

impl DirEntry {
    /// Constructs an entry pointing at inode `id`.
    pub fn new(name: EntryName, id: u32) -> Self {
        Self {
            name,
            id: U32::new(id),
        }
    }

    pub fn id(&self) -> u32 {
        self.id.get()
    }

    pub fn name(&self) -> &EntryName {
        &self.name
    }

    /// Checks whether the entry ends the live sequence of its block.
    pub fn is_terminator(&self) -> bool {
        self.id.get() == UNUSED_LINK
    }
}

/// Represents the name of a directory entry: up to [NAME_LEN] bytes,
/// NUL-padded on the right. Longer names are truncated.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct EntryName {
    bytes: [u8; NAME_LEN],
}

impl EntryName {
    /// Constructs an entry name from a string, truncating to [NAME_LEN]
    /// bytes.
    pub fn new(name: &str) -> Self {
        let raw = name.as_bytes();
        let len = raw.len().min(NAME_LEN);
        let mut bytes = [0u8; NAME_LEN];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self { bytes }
    }

    /// Returns the `.` entry name.
    pub fn itself() -> Self {
        Self::new(".")
    }

    /// Returns the `..` entry name.
    pub fn parent() -> Self {
        Self::new("..")
    }

    /// Returns the name as a string slice, up to the first NUL byte.
    ///
    /// # Errors
    /// Returns `Err` if the stored bytes are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        let len = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        str::from_utf8(&self.bytes[..len]).map_err(|_| Error::CorruptedName)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("directory entry name is not valid UTF-8")]
    CorruptedName,
}
