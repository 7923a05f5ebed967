// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed bit-sets over the core's capability and classification
//! enumerations. Built on [`bitflags`] rather than a hand-rolled bitset, with
//! explicit `any_of`/`all_of`/`none_of` queries layered on top to match the
//! vocabulary the original design used for its scoped-enum bitmask template.

use bitflags::bitflags;

/// Adds the vocabulary the design calls for on top of whatever
/// `bitflags!`-generated type backs it.
pub trait FlagQuery: Copy {
    /// True if any bit of `other` is set in `self`.
    fn any_of(self, other: Self) -> bool;
    /// True if every bit of `other` is set in `self`.
    fn all_of(self, other: Self) -> bool;
    /// True if no bit of `other` is set in `self`.
    fn none_of(self, other: Self) -> bool;
}

macro_rules! impl_flag_query {
    ($ty:ty) => {
        impl FlagQuery for $ty {
            fn any_of(self, other: Self) -> bool {
                self.intersects(other)
            }
            fn all_of(self, other: Self) -> bool {
                self.contains(other)
            }
            fn none_of(self, other: Self) -> bool {
                !self.intersects(other)
            }
        }
    };
}

bitflags! {
    /// Permissions and tracking requested for a guest-physical memory
    /// mapping. `NONE` alone is rejected; unsupported combinations may be
    /// rejected per backend.
    #[derive(Default)]
    pub struct MemoryFlags: u32 {
        /// No permissions (invalid on its own).
        const NONE = 0;
        /// Guest may read.
        const READ = 1 << 0;
        /// Guest may write.
        const WRITE = 1 << 1;
        /// Guest may execute.
        const EXECUTE = 1 << 2;
        /// Backend should track writes to this region in the dirty bitmap.
        const DIRTY_PAGE_TRACKING = 1 << 3;
    }
}
impl_flag_query!(MemoryFlags);

bitflags! {
    /// x86 exception vectors that can be armed for exit-on-exception.
    #[derive(Default)]
    pub struct ExceptionCode: u32 {
        /// #DE
        const DIVIDE_ERROR = 1 << 0;
        /// #DB
        const DEBUG = 1 << 1;
        /// NMI
        const NON_MASKABLE_INTERRUPT = 1 << 2;
        /// #BP
        const BREAKPOINT = 1 << 3;
        /// #OF
        const OVERFLOW = 1 << 4;
        /// #BR
        const BOUND_RANGE_EXCEEDED = 1 << 5;
        /// #UD
        const INVALID_OPCODE = 1 << 6;
        /// #NM
        const DEVICE_NOT_AVAILABLE = 1 << 7;
        /// #DF
        const DOUBLE_FAULT = 1 << 8;
        /// #TS
        const INVALID_TSS = 1 << 10;
        /// #NP
        const SEGMENT_NOT_PRESENT = 1 << 11;
        /// #SS
        const STACK_SEGMENT_FAULT = 1 << 12;
        /// #GP
        const GENERAL_PROTECTION_FAULT = 1 << 13;
        /// #PF
        const PAGE_FAULT = 1 << 14;
        /// #MF
        const X87_FLOATING_POINT = 1 << 16;
        /// #AC
        const ALIGNMENT_CHECK = 1 << 17;
        /// #MC
        const MACHINE_CHECK = 1 << 18;
        /// #XM
        const SIMD_FLOATING_POINT = 1 << 19;
        /// #VE
        const VIRTUALIZATION = 1 << 20;
        /// #SX
        const SECURITY = 1 << 30;
    }
}
impl_flag_query!(ExceptionCode);

bitflags! {
    /// Floating-point / SIMD instruction set extensions, as detected from
    /// CPUID leaves 1, 7, and 8000_0001h (see `host::probe_fp_extensions`).
    /// Deliberately fine-grained rather than the coarser classification a
    /// capability-summary table might use, since translation and FPU-state
    /// sizing both depend on the precise extension set.
    #[derive(Default)]
    pub struct FloatingPointExtension: u64 {
        /// MMX
        const MMX = 1 << 0;
        /// SSE
        const SSE = 1 << 1;
        /// SSE2
        const SSE2 = 1 << 2;
        /// SSE3
        const SSE3 = 1 << 3;
        /// SSSE3
        const SSSE3 = 1 << 4;
        /// SSE4.1
        const SSE4_1 = 1 << 5;
        /// SSE4.2
        const SSE4_2 = 1 << 6;
        /// SSE4a (AMD)
        const SSE4A = 1 << 7;
        /// XOP (AMD)
        const XOP = 1 << 8;
        /// F16C
        const F16C = 1 << 9;
        /// FMA4 (AMD)
        const FMA4 = 1 << 10;
        /// AVX
        const AVX = 1 << 11;
        /// FMA3
        const FMA3 = 1 << 12;
        /// AVX2
        const AVX2 = 1 << 13;
        /// AVX-512 Foundation
        const AVX512F = 1 << 14;
        /// AVX-512 Doubleword and Quadword
        const AVX512DQ = 1 << 15;
        /// AVX-512 Integer Fused Multiply-Add
        const AVX512IFMA = 1 << 16;
        /// AVX-512 Prefetch
        const AVX512PF = 1 << 17;
        /// AVX-512 Exponential and Reciprocal
        const AVX512ER = 1 << 18;
        /// AVX-512 Conflict Detection
        const AVX512CD = 1 << 19;
        /// AVX-512 Byte and Word
        const AVX512BW = 1 << 20;
        /// AVX-512 Vector Length Extensions
        const AVX512VL = 1 << 21;
        /// AVX-512 Vector Bit Manipulation
        const AVX512VBMI = 1 << 22;
        /// AVX-512 Vector Bit Manipulation 2
        const AVX512VBMI2 = 1 << 23;
        /// AVX-512 Galois Field
        const AVX512GFNI = 1 << 24;
        /// AVX-512 Vector AES
        const AVX512VAES = 1 << 25;
        /// AVX-512 Vector Neural Network Instructions
        const AVX512VNNI = 1 << 26;
        /// AVX-512 Bit Algorithms
        const AVX512BITALG = 1 << 27;
        /// AVX-512 Vector Population Count Double/Quadword
        const AVX512VPOPCNTDQ = 1 << 28;
        /// AVX-512 4VNNIW (Knights Mill)
        const AVX512QVNNIW = 1 << 29;
        /// AVX-512 4FMAPS (Knights Mill)
        const AVX512QFMA = 1 << 30;
        /// FXSAVE/FXRSTOR
        const FXSAVE = 1 << 31;
        /// XSAVE/XRSTOR and the XSAVE feature set
        const XSAVE = 1 << 32;
    }
}
impl_flag_query!(FloatingPointExtension);

bitflags! {
    /// Extended control registers a backend may let the guest access beyond
    /// the baseline CR0/CR2/CR3/CR4/CR8.
    #[derive(Default)]
    pub struct ExtendedControlRegister: u32 {
        /// CR8 / TPR
        const CR8 = 1 << 0;
        /// XCR0
        const XCR0 = 1 << 1;
    }
}
impl_flag_query!(ExtendedControlRegister);

bitflags! {
    /// Additional VM-exit reasons a backend can be asked to arm beyond the
    /// unconditional set (HLT, PIO, MMIO, shutdown, ...).
    #[derive(Default)]
    pub struct ExtendedVmExit: u32 {
        /// Exit on CPUID execution.
        const CPUID = 1 << 0;
        /// Exit on MSR read/write.
        const MSR = 1 << 1;
        /// Exit on the exception codes armed in `VmSpecifications`.
        const EXCEPTION = 1 << 2;
    }
}
impl_flag_query!(ExtendedVmExit);
