// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! x86 paging-entry bit layouts and the linear-to-physical walker for the
//! three paging modes (32-bit non-PAE, PAE, 4-level / long-mode).
//!
//! The walker is decoupled from [`crate::vm::VirtualMachine`]: it is handed
//! a physical-memory reader closure so it can be unit tested against a bare
//! byte buffer without a whole VM/VCPU stack.

/// A 32-bit page-table entry (leaf, non-PAE).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pte32(pub u32);

impl Pte32 {
    /// Present bit.
    pub fn present(self) -> bool {
        self.0 & 1 != 0
    }
    /// Writable bit.
    pub fn write(self) -> bool {
        self.0 & (1 << 1) != 0
    }
    /// User-accessible bit.
    pub fn owner(self) -> bool {
        self.0 & (1 << 2) != 0
    }
    /// Page-frame number, bits [31:12], already shifted into a byte address.
    pub fn page_frame(self) -> u32 {
        self.0 & 0xFFFF_F000
    }
}

/// A 32-bit page-directory entry (non-PAE); may point at a page table or,
/// with PSE and the large-page bit, directly at a 4 MiB page.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pde32(pub u32);

impl Pde32 {
    /// Present bit.
    pub fn present(self) -> bool {
        self.0 & 1 != 0
    }
    /// Large-page bit (PS).
    pub fn large_page(self) -> bool {
        self.0 & (1 << 7) != 0
    }
    /// Page-table base address (non-large-page form).
    pub fn table_base(self) -> u32 {
        self.0 & 0xFFFF_F000
    }
    /// 4 MiB large-page physical base: `(addrHigh << 32) | (addrLow << 22)`
    /// per the documented bit split (`addrHigh` bits [20:13], `addrLow`
    /// bits [31:22]).
    pub fn large_page_base(self) -> u64 {
        let addr_high = ((self.0 >> 13) & 0xFF) as u64;
        let addr_low = (self.0 & 0xFFC0_0000) as u64;
        (addr_high << 32) | addr_low
    }
}

/// A 64-bit page-table entry shape shared by PAE and 4-level paging (PTE,
/// PDE, PDPTE, PML4E all share this layout; only which bits are
/// architecturally meaningful at a given level differs).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Pte64(pub u64);

impl Pte64 {
    /// Present bit.
    pub fn present(self) -> bool {
        self.0 & 1 != 0
    }
    /// Writable bit.
    pub fn write(self) -> bool {
        self.0 & (1 << 1) != 0
    }
    /// User-accessible bit.
    pub fn owner(self) -> bool {
        self.0 & (1 << 2) != 0
    }
    /// Page-size bit (PS); meaningless at the PTE level itself.
    pub fn large_page(self) -> bool {
        self.0 & (1 << 7) != 0
    }
    /// Protection-key field, bits [62:59]. Decoded but never consulted
    /// during translation (see design notes).
    pub fn protection_key(self) -> u8 {
        ((self.0 >> 59) & 0xF) as u8
    }
    /// Execute-disable bit, bit 63.
    pub fn execute_disable(self) -> bool {
        self.0 & (1 << 63) != 0
    }
    /// Table/page address field, bits [51:12], already masked to a byte
    /// address. Valid regardless of page size; callers truncate further
    /// bits for large pages as required by each level.
    pub fn address_field(self) -> u64 {
        self.0 & 0x000F_FFFF_FFFF_F000
    }
}

/// Alias used where a 64-bit PDE is expected, purely for call-site clarity.
pub type Pde64 = Pte64;
/// Alias used where a page-directory-pointer-table entry is expected.
pub type Pdpte = Pte64;
/// Alias used where a PML4 entry is expected.
pub type Pml4e = Pte64;

/// The three x86 paging-mode families, matching CR0.PG / CR4.PAE /
/// EFER.LME decoding.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PagingMode {
    /// Paging disabled.
    None,
    /// Paging disabled, but CR4.PAE was set (reported for completeness;
    /// behaves identically to `None` for translation).
    NonePae,
    /// Paging disabled, but EFER.LME was set.
    NoneLme,
    /// Paging disabled, with both CR4.PAE and EFER.LME set.
    NonePaeLme,
    /// 32-bit, two-level, non-PAE paging.
    ThirtyTwoBit,
    /// PAE, three-level paging.
    Pae,
    /// 4-level (long-mode) paging.
    FourLevel,
    /// An architecturally invalid combination (e.g. CR4.PAE=0 with
    /// EFER.LME=1 and CR0.PG=1).
    Invalid,
}

/// Derives the paging mode from the relevant control-register bits, per
/// the design's corrected (non-buggy) decoding.
pub fn derive_paging_mode(cr0_pg: bool, cr4_pae: bool, efer_lme: bool) -> PagingMode {
    if !cr0_pg {
        return match (cr4_pae, efer_lme) {
            (false, false) => PagingMode::None,
            (true, false) => PagingMode::NonePae,
            (false, true) => PagingMode::NoneLme,
            (true, true) => PagingMode::NonePaeLme,
        };
    }
    match (cr4_pae, efer_lme) {
        (false, false) => PagingMode::ThirtyTwoBit,
        (true, false) => PagingMode::Pae,
        (true, true) => PagingMode::FourLevel,
        (false, true) => PagingMode::Invalid,
    }
}

/// The two x86 execution modes not already implied by paging, derived from
/// CR0.PE, RFLAGS.VM, and EFER.LMA.
///
/// This is the corrected decoding: `VM=1` always means Virtual-8086 mode
/// regardless of `EFER.LMA`, and IA-32e requires `VM=0`. The original
/// source's helper ANDed `rflags_vm` into the IA-32e check
/// (`cr0_pe && rflags_vm && efer_lma`), which cannot be architecturally
/// correct since Virtual-8086 mode and IA-32e mode are mutually exclusive;
/// that mistake is not reproduced here.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionMode {
    /// CR0.PE = 0.
    RealAddress,
    /// CR0.PE = 1, RFLAGS.VM = 1.
    Virtual8086,
    /// CR0.PE = 1, RFLAGS.VM = 0, EFER.LMA = 0.
    Protected,
    /// CR0.PE = 1, RFLAGS.VM = 0, EFER.LMA = 1.
    IA32e,
}

/// Derives the execution mode per the corrected decoding described above.
pub fn derive_execution_mode(cr0_pe: bool, rflags_vm: bool, efer_lma: bool) -> ExecutionMode {
    if !cr0_pe {
        ExecutionMode::RealAddress
    } else if rflags_vm {
        ExecutionMode::Virtual8086
    } else if efer_lma {
        ExecutionMode::IA32e
    } else {
        ExecutionMode::Protected
    }
}

/// Control-register inputs to the linear-to-physical walker.
#[derive(Clone, Copy, Debug, Default)]
pub struct PagingState {
    /// CR0 register value.
    pub cr0: u64,
    /// CR3 register value (page-table root).
    pub cr3: u64,
    /// CR4 register value.
    pub cr4: u64,
    /// EFER register value.
    pub efer: u64,
}

/// Why a linear-to-physical translation failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranslationError {
    /// A paging-structure entry along the walk had its present bit clear.
    NotPresent,
    /// A paging-structure entry could not be read from guest-physical
    /// memory (e.g. the address is not currently mapped).
    UnreadableEntry,
    /// The control-register combination does not describe a valid paging
    /// mode (see [`PagingMode::Invalid`]).
    InvalidPagingMode,
}

use crate::registers::bits;

fn read_entry32(
    read_phys: &mut dyn FnMut(u64, &mut [u8]) -> bool,
    addr: u64,
) -> Result<u32, TranslationError> {
    let mut buf = [0u8; 4];
    if !read_phys(addr, &mut buf) {
        return Err(TranslationError::UnreadableEntry);
    }
    Ok(u32::from_le_bytes(buf))
}

fn read_entry64(
    read_phys: &mut dyn FnMut(u64, &mut [u8]) -> bool,
    addr: u64,
) -> Result<u64, TranslationError> {
    let mut buf = [0u8; 8];
    if !read_phys(addr, &mut buf) {
        return Err(TranslationError::UnreadableEntry);
    }
    Ok(u64::from_le_bytes(buf))
}

/// Walks guest page tables to translate `laddr` to a guest-physical
/// address, per §4.5. `read_phys` must read `buf.len()` bytes of guest
/// physical memory starting at its first argument, returning `false` if
/// the address is not currently backed by any mapped region.
pub fn linear_to_physical(
    state: &PagingState,
    laddr: u64,
    mut read_phys: impl FnMut(u64, &mut [u8]) -> bool,
) -> Result<u64, TranslationError> {
    let cr0_pg = state.cr0 & bits::CR0_PG != 0;
    if !cr0_pg {
        return Ok(laddr & 0xFFFF_FFFF);
    }

    let cr4_pae = state.cr4 & bits::CR4_PAE != 0;
    let efer_lme = state.efer & bits::EFER_LME != 0;

    match derive_paging_mode(cr0_pg, cr4_pae, efer_lme) {
        PagingMode::ThirtyTwoBit => translate_32bit(state, laddr, &mut read_phys),
        PagingMode::Pae => translate_pae(state, laddr, &mut read_phys),
        PagingMode::FourLevel => translate_4level(state, laddr, &mut read_phys),
        PagingMode::Invalid => Err(TranslationError::InvalidPagingMode),
        _ => unreachable!("cr0_pg was checked true above"),
    }
}

fn translate_32bit(
    state: &PagingState,
    laddr: u64,
    read_phys: &mut dyn FnMut(u64, &mut [u8]) -> bool,
) -> Result<u64, TranslationError> {
    let laddr = laddr as u32;
    let pse = state.cr4 & bits::CR4_PSE != 0;

    let pd_base = (state.cr3 as u32) & 0xFFFF_F000;
    let pde_addr = (pd_base as u64) | (((laddr >> 22) as u64) << 2);
    let pde = Pde32(read_entry32(read_phys, pde_addr)?);
    if !pde.present() {
        return Err(TranslationError::NotPresent);
    }

    if pse && pde.large_page() {
        let base = pde.large_page_base();
        return Ok(base | (laddr & 0x003F_FFFF) as u64);
    }

    let pt_base = pde.table_base();
    let pte_addr = (pt_base as u64) | ((((laddr >> 12) & 0x3FF) as u64) << 2);
    let pte = Pte32(read_entry32(read_phys, pte_addr)?);
    if !pte.present() {
        return Err(TranslationError::NotPresent);
    }

    Ok((pte.page_frame() as u64) | (laddr & 0xFFF) as u64)
}

fn translate_pae(
    state: &PagingState,
    laddr: u64,
    read_phys: &mut dyn FnMut(u64, &mut [u8]) -> bool,
) -> Result<u64, TranslationError> {
    // PAE still uses a 3-level walk rooted at a 32-byte, 4-entry PDPT
    // pointed to by CR3[31:5]; the PDPTE/PDE/PTE themselves are 64-bit.
    let pdpt_base = state.cr3 & 0xFFFF_FFE0;
    let pdpte_index = (laddr >> 30) & 0x3;
    let pdpte_addr = pdpt_base + pdpte_index * 8;
    let pdpte = Pdpte(read_entry64(read_phys, pdpte_addr)?);
    if !pdpte.present() {
        return Err(TranslationError::NotPresent);
    }

    let pd_base = pdpte.address_field();
    let pde_index = (laddr >> 21) & 0x1FF;
    let pde_addr = pd_base + pde_index * 8;
    let pde = Pde64(read_entry64(read_phys, pde_addr)?);
    if !pde.present() {
        return Err(TranslationError::NotPresent);
    }

    if pde.large_page() {
        let base = pde.address_field() & !0x1F_FFFF;
        return Ok(base | (laddr & 0x1F_FFFF));
    }

    let pt_base = pde.address_field();
    let pte_index = (laddr >> 12) & 0x1FF;
    let pte_addr = pt_base + pte_index * 8;
    let pte = Pte64(read_entry64(read_phys, pte_addr)?);
    if !pte.present() {
        return Err(TranslationError::NotPresent);
    }

    Ok(pte.address_field() | (laddr & 0xFFF))
}

fn translate_4level(
    state: &PagingState,
    laddr: u64,
    read_phys: &mut dyn FnMut(u64, &mut [u8]) -> bool,
) -> Result<u64, TranslationError> {
    let pml4_base = state.cr3 & 0x000F_FFFF_FFFF_F000;
    let pml4_index = (laddr >> 39) & 0x1FF;
    let pml4e = Pml4e(read_entry64(read_phys, pml4_base + pml4_index * 8)?);
    if !pml4e.present() {
        return Err(TranslationError::NotPresent);
    }

    let pdpt_base = pml4e.address_field();
    let pdpte_index = (laddr >> 30) & 0x1FF;
    let pdpte = Pdpte(read_entry64(read_phys, pdpt_base + pdpte_index * 8)?);
    if !pdpte.present() {
        return Err(TranslationError::NotPresent);
    }

    if pdpte.large_page() {
        let base = pdpte.address_field() & !0x3FFF_FFFF;
        return Ok(base | (laddr & 0x3FFF_FFFF));
    }

    let pd_base = pdpte.address_field();
    let pde_index = (laddr >> 21) & 0x1FF;
    let pde = Pde64(read_entry64(read_phys, pd_base + pde_index * 8)?);
    if !pde.present() {
        return Err(TranslationError::NotPresent);
    }

    if pde.large_page() {
        let base = pde.address_field() & !0x1F_FFFF;
        return Ok(base | (laddr & 0x1F_FFFF));
    }

    let pt_base = pde.address_field();
    let pte_index = (laddr >> 12) & 0x1FF;
    let pte = Pte64(read_entry64(read_phys, pt_base + pte_index * 8)?);
    if !pte.present() {
        return Err(TranslationError::NotPresent);
    }

    Ok(pte.address_field() | (laddr & 0xFFF))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A sparse byte-addressable physical memory backed by 4 KiB pages, for
    /// constructing page-table hierarchies in tests without a real VM.
    struct FakePhys {
        pages: HashMap<u64, [u8; 4096]>,
    }

    impl FakePhys {
        fn new() -> Self {
            FakePhys { pages: HashMap::new() }
        }

        fn write_u32(&mut self, addr: u64, value: u32) {
            self.write(addr, &value.to_le_bytes());
        }
        fn write_u64(&mut self, addr: u64, value: u64) {
            self.write(addr, &value.to_le_bytes());
        }
        fn write(&mut self, addr: u64, data: &[u8]) {
            let page = addr & !0xFFF;
            let off = (addr & 0xFFF) as usize;
            let entry = self.pages.entry(page).or_insert([0u8; 4096]);
            entry[off..off + data.len()].copy_from_slice(data);
        }

        fn reader(&self) -> impl FnMut(u64, &mut [u8]) -> bool + '_ {
            move |addr: u64, buf: &mut [u8]| {
                let page = addr & !0xFFF;
                let off = (addr & 0xFFF) as usize;
                match self.pages.get(&page) {
                    Some(data) => {
                        buf.copy_from_slice(&data[off..off + buf.len()]);
                        true
                    }
                    None => false,
                }
            }
        }
    }

    #[test]
    fn no_paging_is_identity() {
        let state = PagingState { cr0: 0, cr3: 0, cr4: 0, efer: 0 };
        let result = linear_to_physical(&state, 0x1234_5678, |_, _| false).unwrap();
        assert_eq!(result, 0x1234_5678);
    }

    #[test]
    fn thirty_two_bit_walk_matches_scenario() {
        // PD at 0x3000, entry 0 -> PT at 0x4000; PT entry 0 -> page 0x5000.
        let mut mem = FakePhys::new();
        mem.write_u32(0x3000, 0x4000 | 1 | (1 << 1));
        mem.write_u32(0x4000, 0x5000 | 1 | (1 << 1));

        let state = PagingState {
            cr0: bits::CR0_PG,
            cr3: 0x3000,
            cr4: 0,
            efer: 0,
        };
        let result = linear_to_physical(&state, 0x0000_0ABC, mem.reader()).unwrap();
        assert_eq!(result, 0x0000_5ABC);
    }

    #[test]
    fn thirty_two_bit_not_present_fails() {
        let mem = FakePhys::new();
        let state = PagingState { cr0: bits::CR0_PG, cr3: 0x3000, cr4: 0, efer: 0 };
        let err = linear_to_physical(&state, 0x1000, mem.reader()).unwrap_err();
        assert_eq!(err, TranslationError::NotPresent);
    }

    #[test]
    fn thirty_two_bit_large_page() {
        let mut mem = FakePhys::new();
        // PDE for a 4 MiB page at physical base 0x0040_0000: addrLow bits[31:22].
        let pde = 0x0040_0000u32 | 1 | (1 << 1) | (1 << 7);
        mem.write_u32(0x3000, pde);
        let state = PagingState {
            cr0: bits::CR0_PG,
            cr3: 0x3000,
            cr4: bits::CR4_PSE,
            efer: 0,
        };
        let result = linear_to_physical(&state, 0x0012_3456, mem.reader()).unwrap();
        assert_eq!(result, 0x0040_0000 | 0x0012_3456);
    }

    #[test]
    fn pae_walk_four_kib_page() {
        let mut mem = FakePhys::new();
        mem.write_u64(0x1000, 0x2000 | 1); // PDPTE[0]
        mem.write_u64(0x2000, 0x3000 | 1); // PDE[0]
        mem.write_u64(0x3000, 0x9000 | 1); // PTE[0]
        let state = PagingState {
            cr0: bits::CR0_PG,
            cr3: 0x1000,
            cr4: bits::CR4_PAE,
            efer: 0,
        };
        let result = linear_to_physical(&state, 0xABC, mem.reader()).unwrap();
        assert_eq!(result, 0x9ABC);
    }

    #[test]
    fn four_level_walk_one_gib_page() {
        let mut mem = FakePhys::new();
        mem.write_u64(0x1000, 0x2000 | 1); // PML4E[0]
        let pdpte = 0x4000_0000u64 | 1 | (1 << 7); // 1 GiB page
        mem.write_u64(0x2000, pdpte);
        let state = PagingState {
            cr0: bits::CR0_PG,
            cr3: 0x1000,
            cr4: bits::CR4_PAE,
            efer: bits::EFER_LME,
        };
        let result = linear_to_physical(&state, 0x1234, mem.reader()).unwrap();
        assert_eq!(result, 0x4000_1234);
    }

    #[test]
    fn execution_mode_derivation() {
        assert_eq!(derive_execution_mode(false, false, false), ExecutionMode::RealAddress);
        assert_eq!(derive_execution_mode(true, true, false), ExecutionMode::Virtual8086);
        assert_eq!(derive_execution_mode(true, true, true), ExecutionMode::Virtual8086);
        assert_eq!(derive_execution_mode(true, false, false), ExecutionMode::Protected);
        assert_eq!(derive_execution_mode(true, false, true), ExecutionMode::IA32e);
    }

    #[test]
    fn paging_mode_derivation() {
        assert_eq!(derive_paging_mode(false, false, false), PagingMode::None);
        assert_eq!(derive_paging_mode(true, false, false), PagingMode::ThirtyTwoBit);
        assert_eq!(derive_paging_mode(true, true, false), PagingMode::Pae);
        assert_eq!(derive_paging_mode(true, true, true), PagingMode::FourLevel);
        assert_eq!(derive_paging_mode(true, false, true), PagingMode::Invalid);
    }
}
