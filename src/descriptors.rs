// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! GDT and IDT entry encode/decode helpers, plus the gate-descriptor system
//! types that determine whether a GDT entry must be read/written as the
//! eight-byte basic form or the sixteen-byte IA-32e-extended form.

use byteorder::{ByteOrder, LittleEndian};

/// Granularity flag: when set, `GdtEntry::limit()` is expressed in 4 KiB
/// units rather than bytes.
pub const GDT_FL_GRANULARITY: u8 = 1 << 3;
/// Default operand size flag (D/B).
pub const GDT_FL_DEFAULT_SIZE: u8 = 1 << 2;
/// Long-mode code segment flag (L).
pub const GDT_FL_LONG_MODE: u8 = 1 << 1;
/// Available-for-system-use flag (AVL).
pub const GDT_FL_AVAILABLE: u8 = 1;

/// Access-byte bit for "present".
pub const GDT_ACCESS_PRESENT: u8 = 1 << 7;
/// Access-byte bit for "non-system segment" (S).
pub const GDT_ACCESS_NON_SYSTEM: u8 = 1 << 4;

/// System-segment descriptor type values (access byte bits [3:0]) relevant
/// to the IA-32e 16-byte-extension decision in [`requires_extended_form`].
pub mod system_type {
    /// 32-bit/64-bit available LDT.
    pub const LDT: u8 = 0b0010;
    /// 32-bit available TSS (64-bit available TSS in IA-32e mode).
    pub const TSS_AVAILABLE: u8 = 0b1001;
    /// 32-bit busy TSS (64-bit busy TSS in IA-32e mode).
    pub const TSS_BUSY: u8 = 0b1011;
    /// Call gate.
    pub const CALL_GATE: u8 = 0b1100;
    /// Interrupt gate.
    pub const INTERRUPT_GATE: u8 = 0b1110;
    /// Trap gate.
    pub const TRAP_GATE: u8 = 0b1111;

    /// Reserved in every mode (Intel SDM Vol. 3, Table 3-2).
    pub const RESERVED_0: u8 = 0b0000;
    /// Reserved in every mode.
    pub const RESERVED_8: u8 = 0b1000;
    /// Reserved in every mode.
    pub const RESERVED_A: u8 = 0b1010;
    /// Reserved in every mode.
    pub const RESERVED_D: u8 = 0b1101;
}

/// True for the four system-descriptor type encodings that are reserved
/// regardless of execution mode; every other system type is a valid
/// eight-byte descriptor outside IA-32e mode (16-bit TSS, task gates, and
/// 16-bit call/interrupt/trap gates included) even though only LDT, TSS,
/// and the three gate types named in [`system_type`] are loadable once the
/// CPU is in IA-32e mode.
pub fn is_reserved_system_type(ty: u8) -> bool {
    matches!(ty, system_type::RESERVED_0 | system_type::RESERVED_8 | system_type::RESERVED_A | system_type::RESERVED_D)
}

/// True if `access` describes a system descriptor whose type requires the
/// sixteen-byte IA-32e extended form (LDT, TSS, and the three gate types).
/// Other system types are rejected by the caller as `InvalidSelector`.
pub fn requires_extended_form(access: u8) -> bool {
    if access & GDT_ACCESS_NON_SYSTEM != 0 {
        return false;
    }
    let ty = access & 0xF;
    matches!(
        ty,
        system_type::LDT
            | system_type::TSS_AVAILABLE
            | system_type::TSS_BUSY
            | system_type::CALL_GATE
            | system_type::INTERRUPT_GATE
            | system_type::TRAP_GATE
    )
}

/// A single eight-byte GDT (or basic IDT) descriptor.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GdtEntry {
    /// The raw eight bytes, little-endian as they appear in guest memory.
    pub raw: [u8; 8],
}

impl GdtEntry {
    /// Builds an entry from base/limit/access/flags, matching the classic
    /// segment-descriptor layout.
    pub fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        let base_low = (base & 0xFFFF) as u16;
        let base_mid = ((base >> 16) & 0xFF) as u8;
        let base_high = (base >> 24) as u8;
        let limit_low = (limit & 0xFFFF) as u16;
        let limit_high = ((limit >> 16) & 0xF) as u8;
        let flags = flags & 0xF;

        let mut raw = [0u8; 8];
        LittleEndian::write_u16(&mut raw[0..2], limit_low);
        LittleEndian::write_u16(&mut raw[2..4], base_low);
        raw[4] = base_mid;
        raw[5] = access;
        raw[6] = limit_high | (flags << 4);
        raw[7] = base_high;
        GdtEntry { raw }
    }

    /// Decodes an entry from its raw eight bytes.
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        GdtEntry { raw }
    }

    fn limit_high(&self) -> u8 {
        self.raw[6] & 0xF
    }
    fn flags_nibble(&self) -> u8 {
        self.raw[6] >> 4
    }

    /// The access byte (present, DPL, S, type).
    pub fn access(&self) -> u8 {
        self.raw[5]
    }

    /// The flags nibble (AVL, L, D/B, G).
    pub fn flags(&self) -> u8 {
        self.flags_nibble()
    }

    /// Reconstructs the 32-bit base address.
    pub fn base(&self) -> u32 {
        let base_low = LittleEndian::read_u16(&self.raw[2..4]) as u32;
        let base_mid = self.raw[4] as u32;
        let base_high = self.raw[7] as u32;
        base_low | (base_mid << 16) | (base_high << 24)
    }

    /// Reconstructs the segment limit, scaling by 4 KiB if the granularity
    /// flag is set (matching the original's `(limit << 12) | 0xfff`).
    pub fn limit(&self) -> u32 {
        let limit_low = LittleEndian::read_u16(&self.raw[0..2]) as u32;
        let mut limit = limit_low | ((self.limit_high() as u32) << 16);
        if self.flags_nibble() & GDT_FL_GRANULARITY != 0 {
            limit = (limit << 12) | 0xFFF;
        }
        limit
    }
}

/// The additional eight bytes appended to a system descriptor in IA-32e
/// mode (base[63:32] plus reserved bytes), making it sixteen bytes total.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GdtEntryExtension {
    /// Bits [63:32] of the base address.
    pub base_upper: u32,
    /// Architecturally reserved; must be preserved on read-modify-write.
    pub reserved: u32,
}

impl GdtEntryExtension {
    /// Decodes the trailing eight bytes of a sixteen-byte descriptor.
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        GdtEntryExtension {
            base_upper: LittleEndian::read_u32(&raw[0..4]),
            reserved: LittleEndian::read_u32(&raw[4..8]),
        }
    }

    /// Encodes the trailing eight bytes of a sixteen-byte descriptor.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut raw = [0u8; 8];
        LittleEndian::write_u32(&mut raw[0..4], self.base_upper);
        LittleEndian::write_u32(&mut raw[4..8], self.reserved);
        raw
    }
}

/// A fully decoded sixty-four-bit base address, combining a basic entry
/// with its IA-32e extension.
pub fn extended_base(entry: &GdtEntry, ext: &GdtEntryExtension) -> u64 {
    (entry.base() as u64) | ((ext.base_upper as u64) << 32)
}

/// IDT gate type field (access-byte bits [3:0]), matching the values the
/// original's `IDTType` enum used.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum IdtType {
    /// 32-bit task gate.
    TaskGate32 = 0b0101,
    /// 16-bit interrupt gate.
    InterruptGate16 = 0b0110,
    /// 16-bit trap gate.
    TrapGate16 = 0b0111,
    /// 32/64-bit interrupt gate.
    InterruptGate32 = 0b1110,
    /// 32/64-bit trap gate.
    TrapGate32 = 0b1111,
}

/// A single eight-byte IDT descriptor (interrupt/trap/task gate).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IdtEntry {
    /// The raw eight bytes, little-endian as they appear in guest memory.
    pub raw: [u8; 8],
}

impl IdtEntry {
    /// Builds an entry from a 32-bit offset, selector, gate type, and
    /// attribute byte (storage-segment bit, 2-bit DPL, present bit packed
    /// as the source does: `attributes = present<<3 | dpl<<1 | storage`).
    pub fn new(offset: u32, selector: u16, ty: IdtType, attributes: u8) -> Self {
        let offset_low = (offset & 0xFFFF) as u16;
        let offset_high = (offset >> 16) as u16;
        let type_nibble = (ty as u8) & 0xF;
        let storage_segment = attributes & 0x1;
        let privilege_level = (attributes >> 1) & 0x3;
        let present = (attributes >> 3) & 0x1;

        let access = type_nibble
            | (storage_segment << 4)
            | (privilege_level << 5)
            | (present << 7);

        let mut raw = [0u8; 8];
        LittleEndian::write_u16(&mut raw[0..2], offset_low);
        LittleEndian::write_u16(&mut raw[2..4], selector);
        raw[4] = 0; // reserved
        raw[5] = access;
        LittleEndian::write_u16(&mut raw[6..8], offset_high);
        IdtEntry { raw }
    }

    /// Decodes an entry from its raw eight bytes.
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        IdtEntry { raw }
    }

    /// The segment selector the gate transfers control into.
    pub fn selector(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[2..4])
    }

    /// The access byte.
    pub fn access(&self) -> u8 {
        self.raw[5]
    }

    /// Reconstructs the 32-bit target offset.
    pub fn offset(&self) -> u32 {
        let low = LittleEndian::read_u16(&self.raw[0..2]) as u32;
        let high = LittleEndian::read_u16(&self.raw[6..8]) as u32;
        low | (high << 16)
    }

    /// Rewrites only the offset field, leaving selector/access untouched.
    pub fn set_offset(&mut self, offset: u32) {
        let offset_low = (offset & 0xFFFF) as u16;
        let offset_high = (offset >> 16) as u16;
        LittleEndian::write_u16(&mut self.raw[0..2], offset_low);
        LittleEndian::write_u16(&mut self.raw[6..8], offset_high);
    }
}

/// Segment-register width classification derived from a segment
/// descriptor's attributes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentSize {
    /// Descriptor was not present or otherwise unusable.
    Invalid,
    /// 16-bit segment.
    Bits16,
    /// 32-bit segment.
    Bits32,
    /// 64-bit segment (IA-32e long-mode code segment).
    Bits64,
}

/// Decodes a [`GdtEntry`]'s access byte and flags nibble into the named
/// [`crate::registers::SegmentAttributes`] fields a segment register caches
/// alongside its selector, base, and limit.
pub fn segment_attributes_from_entry(entry: &GdtEntry) -> crate::registers::SegmentAttributes {
    let access = entry.access();
    let flags = entry.flags();
    crate::registers::SegmentAttributes {
        segment_type: access & 0xF,
        non_system: access & GDT_ACCESS_NON_SYSTEM != 0,
        privilege_level: (access >> 5) & 0x3,
        present: access & GDT_ACCESS_PRESENT != 0,
        available: flags & GDT_FL_AVAILABLE != 0,
        long_mode: flags & GDT_FL_LONG_MODE != 0,
        default_size: flags & GDT_FL_DEFAULT_SIZE != 0,
        granularity: flags & GDT_FL_GRANULARITY != 0,
    }
}

/// Classifies a segment's width from its decoded attributes, per
/// `get_segment_size`.
pub fn classify_segment_size(attrs: &crate::registers::SegmentAttributes) -> SegmentSize {
    if !attrs.present {
        return SegmentSize::Invalid;
    }
    if attrs.long_mode {
        SegmentSize::Bits64
    } else if attrs.default_size {
        SegmentSize::Bits32
    } else {
        SegmentSize::Bits16
    }
}
