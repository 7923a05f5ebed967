// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The neutral register model: a backend-independent name for every x86
//! register a VCPU exposes, a polymorphic value that can carry any of their
//! contents, and the sub-width write rules the architecture mandates
//! (lane-splicing into a wider carrier rather than clobbering it).

/// Every register name the core knows how to address, independent of any
/// backend's concrete struct layout.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Reg {
    // 64-bit general purpose
    Rax, Rcx, Rdx, Rbx, Rsp, Rbp, Rsi, Rdi,
    R8, R9, R10, R11, R12, R13, R14, R15,
    // 32-bit aliases
    Eax, Ecx, Edx, Ebx, Esp, Ebp, Esi, Edi,
    R8d, R9d, R10d, R11d, R12d, R13d, R14d, R15d,
    // 16-bit aliases
    Ax, Cx, Dx, Bx, Sp, Bp, Si, Di,
    R8w, R9w, R10w, R11w, R12w, R13w, R14w, R15w,
    // 8-bit aliases (low byte)
    Al, Cl, Dl, Bl, Spl, Bpl, Sil, Dil,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
    // 8-bit high-byte aliases (only exist for the original four)
    Ah, Ch, Dh, Bh,

    // instruction pointer
    Ip, Eip, Rip,
    // flags
    Flags, Eflags, Rflags,

    // segment registers
    Es, Cs, Ss, Ds, Fs, Gs,
    // table registers
    Gdtr, Idtr, Ldtr, Tr,

    // control registers
    Cr0, Cr2, Cr3, Cr4, Cr8,
    Efer, Xcr0,

    // debug registers
    Dr0, Dr1, Dr2, Dr3, Dr6, Dr7,

    // x87
    St0, St1, St2, St3, St4, St5, St6, St7,
    // MMX
    Mm0, Mm1, Mm2, Mm3, Mm4, Mm5, Mm6, Mm7,
    // XMM
    Xmm0, Xmm1, Xmm2, Xmm3, Xmm4, Xmm5, Xmm6, Xmm7,
    Xmm8, Xmm9, Xmm10, Xmm11, Xmm12, Xmm13, Xmm14, Xmm15,
    Xmm16, Xmm17, Xmm18, Xmm19, Xmm20, Xmm21, Xmm22, Xmm23,
    Xmm24, Xmm25, Xmm26, Xmm27, Xmm28, Xmm29, Xmm30, Xmm31,
    // YMM
    Ymm0, Ymm1, Ymm2, Ymm3, Ymm4, Ymm5, Ymm6, Ymm7,
    Ymm8, Ymm9, Ymm10, Ymm11, Ymm12, Ymm13, Ymm14, Ymm15,
    Ymm16, Ymm17, Ymm18, Ymm19, Ymm20, Ymm21, Ymm22, Ymm23,
    Ymm24, Ymm25, Ymm26, Ymm27, Ymm28, Ymm29, Ymm30, Ymm31,
    // ZMM
    Zmm0, Zmm1, Zmm2, Zmm3, Zmm4, Zmm5, Zmm6, Zmm7,
    Zmm8, Zmm9, Zmm10, Zmm11, Zmm12, Zmm13, Zmm14, Zmm15,
    Zmm16, Zmm17, Zmm18, Zmm19, Zmm20, Zmm21, Zmm22, Zmm23,
    Zmm24, Zmm25, Zmm26, Zmm27, Zmm28, Zmm29, Zmm30, Zmm31,
}

/// Segment descriptor attributes, as packed into the 16-bit attributes
/// field of [`SegmentValue`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SegmentAttributes {
    /// Descriptor type field, bits [3:0] of the access byte.
    pub segment_type: u8,
    /// True for a code/data (non-system) segment.
    pub non_system: bool,
    /// Descriptor privilege level, 0-3.
    pub privilege_level: u8,
    /// Present bit.
    pub present: bool,
    /// "Available for system use" bit.
    pub available: bool,
    /// Long-mode code segment bit (L).
    pub long_mode: bool,
    /// Default operation size bit (D/B).
    pub default_size: bool,
    /// Granularity bit (G): limit is in 4 KiB units when set.
    pub granularity: bool,
}

impl SegmentAttributes {
    /// Packs the fields into the 16-bit wire representation used by most
    /// backends' segment-register structs.
    pub fn to_u16(self) -> u16 {
        let mut v: u16 = 0;
        v |= (self.segment_type as u16 & 0xF) << 0;
        v |= (self.non_system as u16) << 4;
        v |= (self.privilege_level as u16 & 0x3) << 5;
        v |= (self.present as u16) << 7;
        v |= (self.available as u16) << 12;
        v |= (self.long_mode as u16) << 13;
        v |= (self.default_size as u16) << 14;
        v |= (self.granularity as u16) << 15;
        v
    }

    /// Unpacks the 16-bit wire representation into named fields.
    pub fn from_u16(v: u16) -> Self {
        SegmentAttributes {
            segment_type: (v & 0xF) as u8,
            non_system: (v >> 4) & 1 != 0,
            privilege_level: ((v >> 5) & 0x3) as u8,
            present: (v >> 7) & 1 != 0,
            available: (v >> 12) & 1 != 0,
            long_mode: (v >> 13) & 1 != 0,
            default_size: (v >> 14) & 1 != 0,
            granularity: (v >> 15) & 1 != 0,
        }
    }
}

/// A segment or LDT/TSS-loaded register's full descriptor state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SegmentValue {
    /// The selector loaded into the visible register.
    pub selector: u16,
    /// The segment base address, cached from the descriptor.
    pub base: u64,
    /// The segment limit, cached from the descriptor (already scaled by
    /// granularity if applicable).
    pub limit: u32,
    /// The decoded attribute bits.
    pub attributes: SegmentAttributes,
}

/// A table register's value (GDTR/IDTR): base address and limit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TableValue {
    /// Linear base address of the table.
    pub base: u64,
    /// Table limit, in bytes, one less than the table's size.
    pub limit: u16,
}

/// An x87 stack register's value: 64-bit significand and the 16-bit word
/// that carries the sign bit and exponent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct X87Value {
    /// Significand bits.
    pub significand: u64,
    /// Sign and exponent bits.
    pub exponent_sign: u16,
}

/// A packed 64-bit MMX register, viewable at several widths.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MmxValue(pub [u8; 8]);

/// A packed 128-bit XMM register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct XmmValue(pub [u8; 16]);

/// A packed 256-bit YMM register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct YmmValue(pub [u8; 32]);

/// A packed 512-bit ZMM register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ZmmValue(pub [u8; 64]);

impl Default for XmmValue {
    fn default() -> Self {
        XmmValue([0; 16])
    }
}
impl Default for YmmValue {
    fn default() -> Self {
        YmmValue([0; 32])
    }
}
impl Default for ZmmValue {
    fn default() -> Self {
        ZmmValue([0; 64])
    }
}

/// A polymorphic register value: whichever shape the addressed [`Reg`]
/// requires.
#[derive(Clone, Copy, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum RegValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Segment(SegmentValue),
    Table(TableValue),
    X87(X87Value),
    Mmx(MmxValue),
    Xmm(XmmValue),
    Ymm(YmmValue),
    Zmm(ZmmValue),
}

impl RegValue {
    /// Extracts a 64-bit value, if this is one of the scalar variants;
    /// narrower scalars are zero-extended.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            RegValue::U8(v) => Some(v as u64),
            RegValue::U16(v) => Some(v as u64),
            RegValue::U32(v) => Some(v as u64),
            RegValue::U64(v) => Some(v),
            _ => None,
        }
    }
}

/// Splices a low-byte write (e.g. AL) into a 64-bit carrier (e.g. RAX),
/// leaving bits [63:8] unchanged.
pub fn splice_low_byte(carrier: u64, value: u8) -> u64 {
    (carrier & !0xFFu64) | value as u64
}

/// Splices a high-byte write (e.g. AH) into a 64-bit carrier, leaving bits
/// [63:16] and [7:0] unchanged apart from the byte written.
pub fn splice_high_byte(carrier: u64, value: u8) -> u64 {
    (carrier & !0xFF00u64) | ((value as u64) << 8)
}

/// Splices a 16-bit write (e.g. AX) into a 64-bit carrier, leaving bits
/// [63:16] unchanged.
pub fn splice_word(carrier: u64, value: u16) -> u64 {
    (carrier & !0xFFFFu64) | value as u64
}

/// A 32-bit write (e.g. EAX) zero-extends into the full 64-bit register;
/// this is a distinct operation from the lane splices above, not a splice.
pub fn zero_extend_dword(value: u32) -> u64 {
    value as u64
}

/// Which lane of a 64-bit GPR carrier a register alias addresses.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GprWidth {
    /// Low byte (AL, CL, ...).
    Byte,
    /// High byte of the low word (AH, CH, BH, DH only).
    HighByte,
    /// Low 16 bits (AX, CX, ...).
    Word,
    /// Low 32 bits, zero-extended on write (EAX, ECX, ...).
    Dword,
    /// The full 64-bit carrier (RAX, RCX, ...).
    Qword,
}

/// Maps a GPR alias to its parent 64-bit register and the lane it
/// addresses. Returns `None` for registers with no sub-width aliasing
/// (segment, control/debug, x87/MMX/XMM/YMM/ZMM).
pub fn gpr_lane(reg: Reg) -> Option<(Reg, GprWidth)> {
    use GprWidth::*;
    use Reg::*;
    Some(match reg {
        Rax => (Rax, Qword), Eax => (Rax, Dword), Ax => (Rax, Word), Al => (Rax, Byte), Ah => (Rax, HighByte),
        Rcx => (Rcx, Qword), Ecx => (Rcx, Dword), Cx => (Rcx, Word), Cl => (Rcx, Byte), Ch => (Rcx, HighByte),
        Rdx => (Rdx, Qword), Edx => (Rdx, Dword), Dx => (Rdx, Word), Dl => (Rdx, Byte), Dh => (Rdx, HighByte),
        Rbx => (Rbx, Qword), Ebx => (Rbx, Dword), Bx => (Rbx, Word), Bl => (Rbx, Byte), Bh => (Rbx, HighByte),
        Rsp => (Rsp, Qword), Esp => (Rsp, Dword), Sp => (Rsp, Word), Spl => (Rsp, Byte),
        Rbp => (Rbp, Qword), Ebp => (Rbp, Dword), Bp => (Rbp, Word), Bpl => (Rbp, Byte),
        Rsi => (Rsi, Qword), Esi => (Rsi, Dword), Si => (Rsi, Word), Sil => (Rsi, Byte),
        Rdi => (Rdi, Qword), Edi => (Rdi, Dword), Di => (Rdi, Word), Dil => (Rdi, Byte),
        R8 => (R8, Qword), R8d => (R8, Dword), R8w => (R8, Word), R8b => (R8, Byte),
        R9 => (R9, Qword), R9d => (R9, Dword), R9w => (R9, Word), R9b => (R9, Byte),
        R10 => (R10, Qword), R10d => (R10, Dword), R10w => (R10, Word), R10b => (R10, Byte),
        R11 => (R11, Qword), R11d => (R11, Dword), R11w => (R11, Word), R11b => (R11, Byte),
        R12 => (R12, Qword), R12d => (R12, Dword), R12w => (R12, Word), R12b => (R12, Byte),
        R13 => (R13, Qword), R13d => (R13, Dword), R13w => (R13, Word), R13b => (R13, Byte),
        R14 => (R14, Qword), R14d => (R14, Dword), R14w => (R14, Word), R14b => (R14, Byte),
        R15 => (R15, Qword), R15d => (R15, Dword), R15w => (R15, Word), R15b => (R15, Byte),
        Rip => (Rip, Qword), Eip => (Rip, Dword), Ip => (Rip, Word),
        Rflags => (Rflags, Qword), Eflags => (Rflags, Dword), Flags => (Rflags, Word),
        _ => return None,
    })
}

/// Reads the lane named by `width` out of a canonical 64-bit carrier value.
pub fn read_lane(carrier: u64, width: GprWidth) -> RegValue {
    match width {
        GprWidth::Qword => RegValue::U64(carrier),
        GprWidth::Dword => RegValue::U32(carrier as u32),
        GprWidth::Word => RegValue::U16(carrier as u16),
        GprWidth::Byte => RegValue::U8(carrier as u8),
        GprWidth::HighByte => RegValue::U8((carrier >> 8) as u8),
    }
}

/// Splices a write of `value` at `width` into `carrier`, per the
/// architectural lane-preservation rules documented on the `splice_*`
/// functions above. Returns `None` if `value`'s variant doesn't match the
/// width (e.g. writing a `U32` into a `Byte` lane).
pub fn write_lane(carrier: u64, width: GprWidth, value: RegValue) -> Option<u64> {
    Some(match (width, value) {
        (GprWidth::Qword, RegValue::U64(v)) => v,
        (GprWidth::Dword, RegValue::U32(v)) => zero_extend_dword(v),
        (GprWidth::Word, RegValue::U16(v)) => splice_word(carrier, v),
        (GprWidth::Byte, RegValue::U8(v)) => splice_low_byte(carrier, v),
        (GprWidth::HighByte, RegValue::U8(v)) => splice_high_byte(carrier, v),
        _ => return None,
    })
}

/// Bit-field constants and per-index helpers for the architectural control
/// and debug registers, mirroring the layout the x86 SDM documents.
pub mod bits {
    /// Protected Mode Enable.
    pub const CR0_PE: u64 = 1 << 0;
    /// Monitor Co-Processor.
    pub const CR0_MP: u64 = 1 << 1;
    /// Emulation.
    pub const CR0_EM: u64 = 1 << 2;
    /// Task Switched.
    pub const CR0_TS: u64 = 1 << 3;
    /// Extension Type.
    pub const CR0_ET: u64 = 1 << 4;
    /// Numeric Error.
    pub const CR0_NE: u64 = 1 << 5;
    /// Write Protect.
    pub const CR0_WP: u64 = 1 << 16;
    /// Alignment Mask.
    pub const CR0_AM: u64 = 1 << 18;
    /// Not Write-through.
    pub const CR0_NW: u64 = 1 << 29;
    /// Cache Disable.
    pub const CR0_CD: u64 = 1 << 30;
    /// Paging.
    pub const CR0_PG: u64 = 1 << 31;

    /// Virtual-8086 Mode Extensions.
    pub const CR4_VME: u64 = 1 << 0;
    /// Protected-Mode Virtual Interrupts.
    pub const CR4_PVI: u64 = 1 << 1;
    /// Time Stamp Disable.
    pub const CR4_TSD: u64 = 1 << 2;
    /// Debugging Extensions.
    pub const CR4_DE: u64 = 1 << 3;
    /// Page Size Extension.
    pub const CR4_PSE: u64 = 1 << 4;
    /// Physical Address Extension.
    pub const CR4_PAE: u64 = 1 << 5;
    /// Machine-Check Enable.
    pub const CR4_MCE: u64 = 1 << 6;
    /// Page Global Enable.
    pub const CR4_PGE: u64 = 1 << 7;
    /// Performance-Monitoring Counter Enable.
    pub const CR4_PCE: u64 = 1 << 8;
    /// OS support for FXSAVE/FXRSTOR.
    pub const CR4_OSFXSR: u64 = 1 << 9;
    /// OS support for unmasked SIMD exceptions.
    pub const CR4_OSXMMEXCPT: u64 = 1 << 10;
    /// User-Mode Instruction Prevention.
    pub const CR4_UMIP: u64 = 1 << 11;
    /// Virtual Machine Extensions Enable.
    pub const CR4_VMXE: u64 = 1 << 13;
    /// Safer Mode Extensions Enable.
    pub const CR4_SMXE: u64 = 1 << 14;
    /// FSGSBASE instructions enable.
    pub const CR4_FSGSBASE: u64 = 1 << 16;
    /// PCID Enable.
    pub const CR4_PCIDE: u64 = 1 << 17;
    /// XSAVE and Processor Extended States Enable.
    pub const CR4_OSXSAVE: u64 = 1 << 18;
    /// Supervisor Mode Execution Protection Enable.
    pub const CR4_SMEP: u64 = 1 << 20;
    /// Supervisor Mode Access Protection Enable.
    pub const CR4_SMAP: u64 = 1 << 21;
    /// Protection Keys Enable for user-mode pages.
    pub const CR4_PKE: u64 = 1 << 22;

    /// Task Priority Register alias, CR8[3:0].
    pub const CR8_TPL_MASK: u64 = 0xF;

    /// System Call Extensions.
    pub const EFER_SCE: u64 = 1 << 0;
    /// Long Mode Enable.
    pub const EFER_LME: u64 = 1 << 8;
    /// Long Mode Active.
    pub const EFER_LMA: u64 = 1 << 10;
    /// No-Execute Enable.
    pub const EFER_NXE: u64 = 1 << 11;

    /// Virtual-8086 Mode RFLAGS bit.
    pub const RFLAGS_VM: u64 = 1 << 17;
    /// Carry flag.
    pub const RFLAGS_CF: u64 = 1 << 0;
    /// Zero flag.
    pub const RFLAGS_ZF: u64 = 1 << 6;
    /// Trap flag (single-step).
    pub const RFLAGS_TF: u64 = 1 << 8;
    /// Interrupt-enable flag.
    pub const RFLAGS_IF: u64 = 1 << 9;

    /// x87 state, when XCR0[0] is clear (it is always implicitly set).
    pub const XCR0_X87: u64 = 1 << 0;
    /// SSE state enable.
    pub const XCR0_SSE: u64 = 1 << 1;
    /// AVX (YMM) state enable.
    pub const XCR0_AVX: u64 = 1 << 2;

    /// DR6 breakpoint-condition-detected bit for breakpoint `i` (0-3).
    pub fn dr6_b(i: u32) -> u64 {
        1 << i
    }
    /// DR6 single-step bit.
    pub const DR6_BS: u64 = 1 << 14;

    /// DR7 local-enable bit for breakpoint `i` (0-3).
    pub fn dr7_local(i: u32) -> u64 {
        1 << (i * 2)
    }
    /// DR7 global-enable bit for breakpoint `i` (0-3).
    pub fn dr7_global(i: u32) -> u64 {
        1 << (i * 2 + 1)
    }
    /// Bit offset of the 2-bit "break on" condition field for breakpoint
    /// `i` within DR7.
    pub fn dr7_cond_shift(i: u32) -> u32 {
        16 + i * 4
    }
    /// The 2-bit condition field itself, extracted from `dr7`.
    pub fn dr7_cond(dr7: u64, i: u32) -> u64 {
        (dr7 >> dr7_cond_shift(i)) & 0x3
    }
    /// Bit offset of the 2-bit length field for breakpoint `i` within DR7.
    pub fn dr7_size_shift(i: u32) -> u32 {
        18 + i * 4
    }
    /// The 2-bit length field itself, extracted from `dr7`.
    pub fn dr7_size(dr7: u64, i: u32) -> u64 {
        (dr7 >> dr7_size_shift(i)) & 0x3
    }
}
