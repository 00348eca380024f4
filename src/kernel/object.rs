//! Kernel object manager structures.
//!
//! [`ObjectNamespace`] is the seam between the path resolver and whatever
//! actually holds the object directories. [`KernelObjects`] implements it
//! over a live or captured Windows kernel, decoding `_OBJECT_HEADER` for
//! both the pre-Windows 7 layout (`NameInfoOffset`/`Type`) and the
//! `InfoMask`/`TypeIndex` layout, including the type index cookie that
//! appeared with build 10074.

use std::cell::Cell;
use std::fmt;

use thiserror::Error;

use crate::core::memory::MemoryError;
use crate::debug::{DebugTarget, TargetError};

/// Number of hash buckets in an `_OBJECT_DIRECTORY`
pub const NUMBER_HASH_BUCKETS: usize = 37;

/// First build that obfuscates `_OBJECT_HEADER.TypeIndex`
pub const TYPE_INDEX_COOKIE_BUILD: u16 = 10074;

pub const OBJECT_HEADER: &str = "nt!_OBJECT_HEADER";
pub const OBJECT_HEADER_NAME_INFO: &str = "nt!_OBJECT_HEADER_NAME_INFO";
pub const OBJECT_DIRECTORY: &str = "nt!_OBJECT_DIRECTORY";
pub const OBJECT_DIRECTORY_ENTRY: &str = "nt!_OBJECT_DIRECTORY_ENTRY";

/// Object namespace errors
#[derive(Error, Debug)]
pub enum ObjectError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("Invalid object path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("'{name}' is not a directory, cannot resolve '{remaining}'")]
    NotADirectory { name: String, remaining: String },

    #[error("Bucket {bucket} chain exceeds {limit} entries")]
    ChainTooLong { bucket: usize, limit: usize },

    #[error("Bucket index {0} out of range")]
    BucketOutOfRange(usize),
}

/// Address of an object body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

/// Address of an `_OBJECT_DIRECTORY_ENTRY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryRef(pub u64);

/// Address of an `_OBJECT_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub u64);

impl fmt::LowerHex for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// One link of a bucket chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub object: ObjectHandle,
    pub next: Option<EntryRef>,
}

/// Decoded object header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Address of the `_OBJECT_HEADER`
    pub address: u64,
    pub type_ref: TypeRef,
    /// Address of the `_OBJECT_HEADER_NAME_INFO`, if the object is named
    pub name_info: Option<u64>,
}

/// Read access to an object directory tree
pub trait ObjectNamespace {
    /// The `\` directory
    fn root_directory(&self) -> Result<ObjectHandle, ObjectError>;

    /// First entry of bucket `index` of `directory`
    fn bucket_head(
        &self,
        directory: ObjectHandle,
        index: usize,
    ) -> Result<Option<EntryRef>, ObjectError>;

    fn read_entry(&self, entry: EntryRef) -> Result<DirectoryEntry, ObjectError>;

    fn read_header(&self, object: ObjectHandle) -> Result<ObjectHeader, ObjectError>;

    fn is_directory_type(&self, type_ref: TypeRef) -> Result<bool, ObjectError>;

    /// Object name, or `""` for unnamed objects
    fn display_name(&self, header: &ObjectHeader) -> Result<String, ObjectError>;
}

/// Which `_OBJECT_HEADER` generation the target uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderLayout {
    /// `NameInfoOffset` byte and a `Type` pointer
    Legacy { name_info_offset: u64, type_ptr: u64 },
    /// `InfoMask` and `TypeIndex` bytes
    Indexed { info_mask: u64, type_index: u64 },
}

/// Object namespace of a Windows kernel target
pub struct KernelObjects<'t> {
    target: &'t dyn DebugTarget,
    layout: HeaderLayout,
    body_offset: u64,
    cookie: Option<u8>,
    directory_type: Cell<Option<TypeRef>>,
}

impl<'t> KernelObjects<'t> {
    /// Probe the target's header layout and type index cookie
    pub fn new(target: &'t dyn DebugTarget) -> Result<Self, ObjectError> {
        let body_offset = target.require_field(OBJECT_HEADER, "Body")?;

        let legacy = target.field_offset(OBJECT_HEADER, "NameInfoOffset")?;
        let layout = match legacy {
            Some(name_info_offset) => HeaderLayout::Legacy {
                name_info_offset,
                type_ptr: target.require_field(OBJECT_HEADER, "Type")?,
            },
            None => HeaderLayout::Indexed {
                info_mask: target.require_field(OBJECT_HEADER, "InfoMask")?,
                type_index: target.require_field(OBJECT_HEADER, "TypeIndex")?,
            },
        };

        let cookie = match layout {
            HeaderLayout::Indexed { .. } => {
                let build = target.read_u16(target.symbol("nt!NtBuildNumber")?)?;
                if build >= TYPE_INDEX_COOKIE_BUILD {
                    Some(target.read_u8(target.symbol("nt!ObHeaderCookie")?)?)
                } else {
                    None
                }
            }
            HeaderLayout::Legacy { .. } => None,
        };

        log::debug!("Object header layout {:?}, cookie {:?}", layout, cookie);

        Ok(Self {
            target,
            layout,
            body_offset,
            cookie,
            directory_type: Cell::new(None),
        })
    }

    pub fn target(&self) -> &'t dyn DebugTarget {
        self.target
    }

    fn directory_type(&self) -> Result<TypeRef, ObjectError> {
        if let Some(cached) = self.directory_type.get() {
            return Ok(cached);
        }
        let symbol = self.target.symbol("nt!ObpDirectoryObjectType")?;
        let type_ref = TypeRef(self.target.read_ptr(symbol)?);
        self.directory_type.set(Some(type_ref));
        Ok(type_ref)
    }

    fn name_info_address(&self, header: u64) -> Result<Option<u64>, ObjectError> {
        let offset = match self.layout {
            HeaderLayout::Legacy {
                name_info_offset, ..
            } => u64::from(self.target.read_u8(header + name_info_offset)?),
            HeaderLayout::Indexed { info_mask, .. } => {
                let mask = self.target.read_u8(header + info_mask)?;
                if mask & 2 == 0 {
                    return Ok(None);
                }
                let table = self.target.symbol("nt!ObpInfoMaskToOffset")?;
                u64::from(self.target.read_u8(table + u64::from(mask & 3))?)
            }
        };

        if offset == 0 {
            return Ok(None);
        }
        Ok(Some(header.wrapping_sub(offset)))
    }

    fn object_type(&self, header: u64) -> Result<TypeRef, ObjectError> {
        match self.layout {
            HeaderLayout::Legacy { type_ptr, .. } => {
                Ok(TypeRef(self.target.read_ptr(header + type_ptr)?))
            }
            HeaderLayout::Indexed { type_index, .. } => {
                let mut index = self.target.read_u8(header + type_index)?;
                if let Some(cookie) = self.cookie {
                    index ^= ((header >> 8) & 0xff) as u8 ^ cookie;
                }
                let table = self.target.symbol("nt!ObTypeIndexTable")?;
                let slot = table + self.target.pointer_size() as u64 * u64::from(index);
                Ok(TypeRef(self.target.read_ptr(slot)?))
            }
        }
    }
}

impl ObjectNamespace for KernelObjects<'_> {
    fn root_directory(&self) -> Result<ObjectHandle, ObjectError> {
        let symbol = self.target.symbol("nt!ObpRootDirectoryObject")?;
        Ok(ObjectHandle(self.target.read_ptr(symbol)?))
    }

    fn bucket_head(
        &self,
        directory: ObjectHandle,
        index: usize,
    ) -> Result<Option<EntryRef>, ObjectError> {
        if index >= NUMBER_HASH_BUCKETS {
            return Err(ObjectError::BucketOutOfRange(index));
        }
        let buckets = self.target.require_field(OBJECT_DIRECTORY, "HashBuckets")?;
        let slot = directory.0 + buckets + (index * self.target.pointer_size()) as u64;
        let head = self.target.read_ptr(slot)?;
        Ok((head != 0).then_some(EntryRef(head)))
    }

    fn read_entry(&self, entry: EntryRef) -> Result<DirectoryEntry, ObjectError> {
        let chain = self
            .target
            .require_field(OBJECT_DIRECTORY_ENTRY, "ChainLink")?;
        let object = self.target.require_field(OBJECT_DIRECTORY_ENTRY, "Object")?;

        let next = self.target.read_ptr(entry.0 + chain)?;
        Ok(DirectoryEntry {
            object: ObjectHandle(self.target.read_ptr(entry.0 + object)?),
            next: (next != 0).then_some(EntryRef(next)),
        })
    }

    fn read_header(&self, object: ObjectHandle) -> Result<ObjectHeader, ObjectError> {
        let address = object.0.wrapping_sub(self.body_offset);
        Ok(ObjectHeader {
            address,
            type_ref: self.object_type(address)?,
            name_info: self.name_info_address(address)?,
        })
    }

    fn is_directory_type(&self, type_ref: TypeRef) -> Result<bool, ObjectError> {
        Ok(type_ref == self.directory_type()?)
    }

    fn display_name(&self, header: &ObjectHeader) -> Result<String, ObjectError> {
        let Some(name_info) = header.name_info else {
            return Ok(String::new());
        };
        let name = self.target.require_field(OBJECT_HEADER_NAME_INFO, "Name")?;
        Ok(self.target.read_unicode_string(name_info + name)?)
    }
}
