// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host CPU probing: the guest-physical address width and the set of
//! floating-point/SIMD extensions a backend can advertise, both read
//! directly off CPUID rather than guessed from a table of known CPU
//! models.

use crate::flags::FloatingPointExtension;

/// Guest-physical address space geometry, derived from CPUID 8000_0008h.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GpaInfo {
    /// Number of physical address bits the host CPU implements.
    pub bits: u32,
    /// `1 << bits`.
    pub max_address: u64,
    /// `max_address - 1`; every mapped guest-physical range must satisfy
    /// `addr & !mask == 0`.
    pub mask: u64,
}

impl GpaInfo {
    fn from_bits(bits: u32) -> Self {
        let max_address = 1u64.checked_shl(bits).unwrap_or(0);
        GpaInfo { bits, max_address, mask: max_address.wrapping_sub(1) }
    }
}

#[cfg(target_arch = "x86_64")]
fn cpuid(leaf: u32, subleaf: u32) -> (u32, u32, u32, u32) {
    // SAFETY: CPUID is unconditionally available on any x86_64 host; the
    // intrinsic takes no pointer arguments and cannot fault.
    unsafe {
        let result = core::arch::x86_64::__cpuid_count(leaf, subleaf);
        (result.eax, result.ebx, result.ecx, result.edx)
    }
}

#[cfg(target_arch = "x86")]
fn cpuid(leaf: u32, subleaf: u32) -> (u32, u32, u32, u32) {
    // SAFETY: see the x86_64 arm above; identical contract on 32-bit.
    unsafe {
        let result = core::arch::x86::__cpuid_count(leaf, subleaf);
        (result.eax, result.ebx, result.ecx, result.edx)
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn cpuid(_leaf: u32, _subleaf: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

/// Raw CPUID access for backends that decode the `CPUID` instruction
/// themselves (see `backend::stub`); everything else in this module only
/// ever needs the derived, structured results.
pub(crate) fn raw_cpuid(leaf: u32, subleaf: u32) -> (u32, u32, u32, u32) {
    cpuid(leaf, subleaf)
}

/// Reads CPUID 8000_0008h EAX to derive the guest-physical address
/// geometry: bits [23:16] hold the physical-address width if non-zero,
/// otherwise bits [7:0] are the fallback (older CPUID leaf without the
/// dedicated field).
pub fn probe_gpa() -> GpaInfo {
    let (eax, _, _, _) = cpuid(0x8000_0008, 0);
    let high = (eax >> 16) & 0xFF;
    let bits = if high != 0 { high } else { eax & 0xFF };
    GpaInfo::from_bits(if bits == 0 { 36 } else { bits })
}

/// Reads CPUID leaves 1, 7, and 8000_0001h to build the bit-set of
/// floating-point/SIMD extensions the host CPU supports.
pub fn probe_fp_extensions() -> FloatingPointExtension {
    use FloatingPointExtension as Fpe;
    let mut exts = Fpe::empty();

    let (_, _, ecx1, edx1) = cpuid(1, 0);
    if edx1 & (1 << 23) != 0 {
        exts |= Fpe::MMX;
    }
    if edx1 & (1 << 25) != 0 {
        exts |= Fpe::SSE;
    }
    if edx1 & (1 << 26) != 0 {
        exts |= Fpe::SSE2;
    }
    if ecx1 & (1 << 0) != 0 {
        exts |= Fpe::SSE3;
    }
    if ecx1 & (1 << 9) != 0 {
        exts |= Fpe::SSSE3;
    }
    if ecx1 & (1 << 19) != 0 {
        exts |= Fpe::SSE4_1;
    }
    if ecx1 & (1 << 20) != 0 {
        exts |= Fpe::SSE4_2;
    }
    if ecx1 & (1 << 29) != 0 {
        exts |= Fpe::F16C;
    }
    if ecx1 & (1 << 28) != 0 {
        exts |= Fpe::AVX;
    }
    if ecx1 & (1 << 12) != 0 {
        exts |= Fpe::FMA3;
    }
    if ecx1 & (1 << 24) != 0 {
        exts |= Fpe::FXSAVE;
    }
    if ecx1 & (1 << 26) != 0 {
        exts |= Fpe::XSAVE;
    }

    let (_, ebx7, ecx7, edx7) = cpuid(7, 0);
    if ebx7 & (1 << 5) != 0 {
        exts |= Fpe::AVX2;
    }
    if ebx7 & (1 << 16) != 0 {
        exts |= Fpe::AVX512F;
    }
    if ebx7 & (1 << 17) != 0 {
        exts |= Fpe::AVX512DQ;
    }
    if ebx7 & (1 << 21) != 0 {
        exts |= Fpe::AVX512IFMA;
    }
    if ebx7 & (1 << 26) != 0 {
        exts |= Fpe::AVX512PF;
    }
    if ebx7 & (1 << 27) != 0 {
        exts |= Fpe::AVX512ER;
    }
    if ebx7 & (1 << 28) != 0 {
        exts |= Fpe::AVX512CD;
    }
    if ebx7 & (1 << 30) != 0 {
        exts |= Fpe::AVX512BW;
    }
    if ebx7 & (1 << 31) != 0 {
        exts |= Fpe::AVX512VL;
    }
    if ecx7 & (1 << 1) != 0 {
        exts |= Fpe::AVX512VBMI;
    }
    if ecx7 & (1 << 6) != 0 {
        exts |= Fpe::AVX512VBMI2;
    }
    if ecx7 & (1 << 8) != 0 {
        exts |= Fpe::AVX512GFNI;
    }
    if ecx7 & (1 << 9) != 0 {
        exts |= Fpe::AVX512VAES;
    }
    if ecx7 & (1 << 11) != 0 {
        exts |= Fpe::AVX512VNNI;
    }
    if ecx7 & (1 << 12) != 0 {
        exts |= Fpe::AVX512BITALG;
    }
    if ecx7 & (1 << 14) != 0 {
        exts |= Fpe::AVX512VPOPCNTDQ;
    }
    if edx7 & (1 << 2) != 0 {
        exts |= Fpe::AVX512QVNNIW;
    }
    if edx7 & (1 << 3) != 0 {
        exts |= Fpe::AVX512QFMA;
    }

    let (_, _, ecx81, _) = cpuid(0x8000_0001, 0);
    if ecx81 & (1 << 6) != 0 {
        exts |= Fpe::SSE4A;
    }
    if ecx81 & (1 << 11) != 0 {
        exts |= Fpe::XOP;
    }
    if ecx81 & (1 << 16) != 0 {
        exts |= Fpe::FMA4;
    }

    exts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpa_info_derives_max_address_and_mask() {
        let gpa = GpaInfo::from_bits(36);
        assert_eq!(gpa.max_address, 1u64 << 36);
        assert_eq!(gpa.mask, (1u64 << 36) - 1);
    }

    #[test]
    fn gpa_defaults_to_36_bits_when_cpuid_leaf_is_absent() {
        // On any host where the extended leaf is unreadable (eax == 0
        // entirely), probing still returns a usable, non-zero width.
        let gpa = GpaInfo::from_bits(0);
        assert_eq!(gpa.bits, 0);
        assert_eq!(gpa.max_address, 1);
    }
}
