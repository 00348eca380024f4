#![allow(dead_code)]

use kdwalk::core::memory::SnapshotMemory;
use kdwalk::debug::types::{Profile, Snapshot, TypeLayout};
use kdwalk::debug::ProfileTarget;
use kdwalk::kernel::object::NUMBER_HASH_BUCKETS;

pub const DIRECTORY_TYPE_INDEX: u8 = 3;
pub const DRIVER_TYPE_INDEX: u8 = 4;
pub const DEVICE_TYPE_INDEX: u8 = 5;

const NAME_INFO_SIZE: u64 = 0x20;
const CREATOR_INFO_SIZE: u64 = 0x20;
const GLOBALS_SIZE: u64 = 0x1000;

/// How object headers are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStyle {
    /// `NameInfoOffset` + `Type` pointer
    Legacy,
    /// `InfoMask` + `TypeIndex`, optionally salted with `ObHeaderCookie`
    Indexed { build: u16, cookie: u8 },
}

/// Object kinds known to the fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Directory,
    Driver,
    Device,
}

/// Builds a synthetic Windows kernel image
pub struct KernelImage {
    pub profile: Profile,
    pub memory: SnapshotMemory,
    pub style: HeaderStyle,
    pub root: u64,
    globals: u64,
    next: u64,
    type_objects: [u64; 3],
}

impl KernelImage {
    /// Windows 10 style x64 kernel with type index cookie
    pub fn win10() -> Self {
        Self::new(8, HeaderStyle::Indexed {
            build: 19041,
            cookie: 0x5a,
        })
    }

    pub fn new(pointer_size: usize, style: HeaderStyle) -> Self {
        let p = pointer_size as u64;
        let base = if pointer_size == 8 {
            0xfffff800_10000000
        } else {
            0x8100_0000
        };

        let mut profile = Profile::new(pointer_size, true);

        let header = match style {
            HeaderStyle::Legacy => TypeLayout::new(4 * p + 8)
                .field("Type", p)
                .field("NameInfoOffset", 2 * p + 4)
                .field("Body", 4 * p),
            HeaderStyle::Indexed { .. } => TypeLayout::new(6 * p + 8)
                .field("TypeIndex", 3 * p)
                .field("InfoMask", 3 * p + 2)
                .field("Body", 6 * p),
        };
        profile.types.insert("nt!_OBJECT_HEADER".into(), header);
        profile.types.insert(
            "nt!_OBJECT_HEADER_NAME_INFO".into(),
            TypeLayout::new(NAME_INFO_SIZE)
                .field("Directory", 0)
                .field("Name", p),
        );
        profile.types.insert(
            "nt!_OBJECT_DIRECTORY".into(),
            TypeLayout::new(NUMBER_HASH_BUCKETS as u64 * p + 0x20).field("HashBuckets", 0),
        );
        profile.types.insert(
            "nt!_OBJECT_DIRECTORY_ENTRY".into(),
            TypeLayout::new(3 * p)
                .field("ChainLink", 0)
                .field("Object", p),
        );
        profile.types.insert(
            "nt!_DRIVER_OBJECT".into(),
            TypeLayout::new(14 * p + 28 * p).field("MajorFunction", 14 * p),
        );

        let globals = base;
        let symbols = [
            ("nt!NtBuildNumber", 0x00),
            ("nt!ObHeaderCookie", 0x10),
            ("nt!ObpRootDirectoryObject", 0x20),
            ("nt!ObpDirectoryObjectType", 0x30),
            ("nt!ObpInfoMaskToOffset", 0x40),
            ("nt!ObTypeIndexTable", 0x200),
            ("nt!KeServiceDescriptorTable", 0x400),
        ];
        for (name, offset) in symbols {
            profile.symbols.insert(name.into(), globals + offset);
        }

        let mut memory = SnapshotMemory::new();
        memory.map(globals, vec![0; GLOBALS_SIZE as usize]).unwrap();

        let mut image = Self {
            profile,
            memory,
            style,
            root: 0,
            globals,
            next: base + GLOBALS_SIZE,
            type_objects: [0; 3],
        };

        // Checked builds set the top nibble; only the low word is the build
        let build = match style {
            HeaderStyle::Indexed { build, .. } => build,
            HeaderStyle::Legacy => 6001,
        };
        image.write_u32(globals, 0xf000_0000 | u32::from(build));
        if let HeaderStyle::Indexed { cookie, .. } = style {
            image.write(globals + 0x10, &[cookie]);
        }

        // ObpInfoMaskToOffset[mask]: creator info sits right below the
        // header, name info below that
        let mut mask_table = vec![0u8; 256];
        for (mask, slot) in mask_table.iter_mut().enumerate() {
            let mut offset = 0;
            if mask & 1 != 0 {
                offset += CREATOR_INFO_SIZE;
            }
            if mask & 2 != 0 {
                offset += NAME_INFO_SIZE;
            }
            *slot = offset as u8;
        }
        image.write(globals + 0x40, &mask_table);

        for (i, index) in [DIRECTORY_TYPE_INDEX, DRIVER_TYPE_INDEX, DEVICE_TYPE_INDEX]
            .into_iter()
            .enumerate()
        {
            let type_object = image.alloc(0x80);
            image.type_objects[i] = type_object;
            image.write_ptr(globals + 0x200 + p * u64::from(index), type_object);
        }
        image.write_ptr(globals + 0x30, image.type_objects[0]);

        let root = image.object(Some(""), Kind::Directory, false);
        image.root = root;
        image.write_ptr(globals + 0x20, root);
        image
    }

    pub fn pointer_size(&self) -> u64 {
        self.profile.pointer_size as u64
    }

    pub fn symbol(&self, name: &str) -> u64 {
        self.profile.symbols[name]
    }

    pub fn add_symbol(&mut self, name: &str, address: u64) {
        self.profile.symbols.insert(name.into(), address);
    }

    /// Map a fresh zeroed region
    pub fn alloc(&mut self, size: u64) -> u64 {
        let address = self.next;
        let size = (size + 0x3f) & !0x3f;
        self.memory.map(address, vec![0; size as usize]).unwrap();
        self.next = address + size + 0x40;
        address
    }

    pub fn write(&mut self, address: u64, data: &[u8]) {
        self.memory.write(address, data).unwrap();
    }

    pub fn write_u16(&mut self, address: u64, value: u16) {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, address: u64, value: u32) {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_ptr(&mut self, address: u64, value: u64) {
        if self.pointer_size() == 8 {
            self.write(address, &value.to_le_bytes());
        } else {
            self.write(address, &(value as u32).to_le_bytes());
        }
    }

    fn field(&self, ty: &str, field: &str) -> u64 {
        self.profile.types[ty].fields[field]
    }

    /// Create an object and return its body address.
    ///
    /// `name: None` creates an unnamed object. `with_creator` adds creator
    /// info between the name info and the header.
    pub fn object(&mut self, name: Option<&str>, kind: Kind, with_creator: bool) -> u64 {
        let p = self.pointer_size();
        let body_offset = self.field("nt!_OBJECT_HEADER", "Body");
        let body_size = match kind {
            Kind::Directory => self.profile.types["nt!_OBJECT_DIRECTORY"].size,
            Kind::Driver => self.profile.types["nt!_DRIVER_OBJECT"].size,
            Kind::Device => 0x40,
        };

        let creator = if with_creator { CREATOR_INFO_SIZE } else { 0 };
        let name_info = if name.is_some() { NAME_INFO_SIZE } else { 0 };
        let name_units: Vec<u16> = name.unwrap_or("").encode_utf16().collect();
        let name_bytes = name_units.len() as u64 * 2;

        let region = self.alloc(creator + name_info + body_offset + body_size + name_bytes + 8);
        let header = region + creator + name_info;
        let body = header + body_offset;
        let buffer = body + body_size;

        let type_index = match kind {
            Kind::Directory => DIRECTORY_TYPE_INDEX,
            Kind::Driver => DRIVER_TYPE_INDEX,
            Kind::Device => DEVICE_TYPE_INDEX,
        };

        match self.style {
            HeaderStyle::Legacy => {
                let type_ptr = self.type_objects[(type_index - DIRECTORY_TYPE_INDEX) as usize];
                let type_field = self.field("nt!_OBJECT_HEADER", "Type");
                self.write_ptr(header + type_field, type_ptr);
                let offset = self.field("nt!_OBJECT_HEADER", "NameInfoOffset");
                let distance = if name.is_some() { name_info + creator } else { 0 };
                self.write(header + offset, &[distance as u8]);
            }
            HeaderStyle::Indexed { build, cookie } => {
                let stored = if build >= 10074 {
                    type_index ^ ((header >> 8) & 0xff) as u8 ^ cookie
                } else {
                    type_index
                };
                let index_field = self.field("nt!_OBJECT_HEADER", "TypeIndex");
                self.write(header + index_field, &[stored]);

                let mut mask = 0u8;
                if with_creator {
                    mask |= 1;
                }
                if name.is_some() {
                    mask |= 2;
                }
                let mask_field = self.field("nt!_OBJECT_HEADER", "InfoMask");
                self.write(header + mask_field, &[mask]);
            }
        }

        if name.is_some() {
            let unicode = region + self.field("nt!_OBJECT_HEADER_NAME_INFO", "Name");
            self.write_u16(unicode, name_bytes as u16);
            self.write_u16(unicode + 2, name_bytes as u16);
            self.write_ptr(unicode + p, if name_bytes == 0 { 0 } else { buffer });

            let raw: Vec<u8> = name_units.iter().flat_map(|u| u.to_le_bytes()).collect();
            self.write(buffer, &raw);
        }

        body
    }

    /// Push `object` at the head of `bucket` in `directory`
    pub fn link(&mut self, directory: u64, bucket: usize, object: u64) -> u64 {
        let p = self.pointer_size();
        let entry = self.alloc(3 * p);
        let slot = directory + self.field("nt!_OBJECT_DIRECTORY", "HashBuckets") + bucket as u64 * p;

        let mut head = [0u8; 8];
        self.memory_read(slot, &mut head[..p as usize]);
        let head = u64::from_le_bytes(head);

        let chain = self.field("nt!_OBJECT_DIRECTORY_ENTRY", "ChainLink");
        let obj = self.field("nt!_OBJECT_DIRECTORY_ENTRY", "Object");
        self.write_ptr(entry + chain, head);
        self.write_ptr(entry + obj, object);
        self.write_ptr(slot, entry);
        entry
    }

    fn memory_read(&self, address: u64, buf: &mut [u8]) {
        use kdwalk::core::memory::MemorySource;
        self.memory.read_exact(address, buf).unwrap();
    }

    /// Named subdirectory linked into `parent`
    pub fn directory(&mut self, parent: u64, bucket: usize, name: &str) -> u64 {
        let dir = self.object(Some(name), Kind::Directory, false);
        self.link(parent, bucket, dir);
        dir
    }

    /// Driver object with the given dispatch routines, linked into `parent`
    pub fn driver(&mut self, parent: u64, bucket: usize, name: &str, routines: &[u64]) -> u64 {
        let drv = self.object(Some(name), Kind::Driver, true);
        let table = drv + self.field("nt!_DRIVER_OBJECT", "MajorFunction");
        for (i, routine) in routines.iter().enumerate() {
            self.write_ptr(table + i as u64 * self.pointer_size(), *routine);
        }
        self.link(parent, bucket, drv);
        drv
    }

    /// Install a service table of raw 32-bit entries: signed offsets on
    /// x64, absolute pointers on x86
    pub fn service_table(&mut self, entries: &[u32]) -> u64 {
        let p = self.pointer_size();
        let table = self.alloc(entries.len() as u64 * 4 + p);
        for (i, value) in entries.iter().enumerate() {
            self.write_u32(table + i as u64 * 4, *value);
        }

        let descriptor = self.symbol("nt!KeServiceDescriptorTable");
        self.write_ptr(descriptor, table);
        self.write_ptr(descriptor + 2 * p, entries.len() as u64);
        table
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.profile.clone(), &self.memory)
    }

    pub fn into_target(self) -> ProfileTarget<SnapshotMemory> {
        ProfileTarget::new(self.profile, self.memory)
    }
}
