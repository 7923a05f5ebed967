// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An in-process software backend: guest-physical memory is a region list
//! shared with every VCPU the owning VM creates, and each VCPU carries its
//! own register file and a small fetch/decode/execute loop recognizing just
//! enough of the instruction set (`HLT`, `IN`/`OUT`, `CPUID`, `RDMSR`/
//! `WRMSR`, `INT3`) to drive this crate's own exit paths without a real
//! hypervisor underneath. Not a backend any production caller should
//! select.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};

use crate::backend::{Backend, VcpuBackend, VmBackend};
use crate::error::{MemoryMappingStatus, PlatformInitStatus, VpExecutionStatus, VpOperationStatus};
use crate::exit::VmExitInfo;
use crate::flags::{ExceptionCode, ExtendedControlRegister, ExtendedVmExit, FlagQuery, MemoryFlags};
use crate::host;
use crate::memory::{MemoryRegion, MemoryRegionList};
use crate::paging::{self, PagingState};
use crate::platform::Features;
use crate::registers::{
    bits, gpr_lane, read_lane, write_lane, zero_extend_dword, MmxValue, Reg, RegValue, SegmentValue, TableValue,
    X87Value, XmmValue, YmmValue, ZmmValue,
};
use crate::vm::{CpuidResult, IoHandlers, VmSpecifications};

/// Upper bound on instructions decoded per `run` call; without it a guest
/// program that never reaches an exit-causing instruction would hang the
/// caller's thread forever.
const MAX_INSTRUCTIONS_PER_RUN: u32 = 1_000_000;

/// The in-process reference backend. One instance per [`crate::platform::Platform`].
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    /// Creates a fresh reference backend.
    pub fn new() -> Self {
        StubBackend
    }
}

impl Backend for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn initialize(&mut self) -> (PlatformInitStatus, Features) {
        let gpa = host::probe_gpa();
        let floating_point_extensions = host::probe_fp_extensions();
        let features = Features {
            max_processors_per_vm: 256,
            max_processors_global: 256,
            gpa,
            unrestricted_guest: true,
            ept: false,
            guest_debugging: true,
            guest_memory_protection: false,
            dirty_page_tracking: false,
            partial_dirty_bitmap: false,
            large_memory_allocation: true,
            memory_aliasing: true,
            memory_unmapping: true,
            partial_unmapping: true,
            partial_mmio_instructions: false,
            guest_tsc_scaling: true,
            custom_cpuids: true,
            floating_point_extensions,
            extended_control_registers: ExtendedControlRegister::CR8 | ExtendedControlRegister::XCR0,
            extended_vm_exits: ExtendedVmExit::CPUID | ExtendedVmExit::MSR,
            exception_exits: ExceptionCode::empty(),
            supported_cpuid_results: Vec::new(),
        };
        (PlatformInitStatus::Ok, features)
    }

    fn create_vm(&mut self, spec: &VmSpecifications) -> Option<Box<dyn VmBackend>> {
        Some(Box::new(StubVm::new(spec.clone())))
    }
}

/// Backend-level VM state: the spec this VM was created from, and the
/// guest-physical region list mirrored from [`crate::vm::VirtualMachine`]'s
/// own bookkeeping so that each VCPU's fetch loop can read guest memory
/// without this crate's `VcpuBackend::run` signature having to carry a VM
/// reference down to every backend.
struct StubVm {
    spec: VmSpecifications,
    regions: Arc<Mutex<MemoryRegionList>>,
}

impl StubVm {
    fn new(spec: VmSpecifications) -> Self {
        StubVm { spec, regions: Arc::new(Mutex::new(MemoryRegionList::new())) }
    }
}

impl VmBackend for StubVm {
    fn map_guest(&mut self, base: u64, size: u64, flags: MemoryFlags, host_ptr: *mut u8) -> MemoryMappingStatus {
        self.regions.lock().expect("stub region list poisoned").insert(MemoryRegion { base, size, host_ptr, flags });
        trace!("stub backend: mapped {:#x}..{:#x}", base, base + size);
        MemoryMappingStatus::Ok
    }

    fn unmap_guest(&mut self, base: u64, size: u64) -> MemoryMappingStatus {
        self.regions.lock().expect("stub region list poisoned").subtract(base, size);
        trace!("stub backend: unmapped {:#x}..{:#x}", base, base + size);
        MemoryMappingStatus::Ok
    }

    fn query_dirty_pages(&mut self, _base: u64, _size: u64, bitmap: &mut [u64]) -> MemoryMappingStatus {
        // Writes to guest memory go straight through the host pointer
        // (`VirtualMachine::mem_write`); this backend is never in the
        // path, so it has nothing real to report here. Report an
        // all-clear bitmap of the right shape rather than refusing the
        // call outright.
        for word in bitmap.iter_mut() {
            *word = 0;
        }
        MemoryMappingStatus::Ok
    }

    fn clear_dirty_pages(&mut self, _base: u64, _size: u64) -> MemoryMappingStatus {
        MemoryMappingStatus::Ok
    }

    fn create_vcpu(&mut self, index: usize) -> Box<dyn VcpuBackend> {
        Box::new(StubVcpu::new(index, self.regions.clone(), &self.spec))
    }
}

fn default_for(reg: Reg) -> RegValue {
    use Reg::*;
    match reg {
        Es | Cs | Ss | Ds | Fs | Gs | Ldtr | Tr => RegValue::Segment(SegmentValue::default()),
        Gdtr | Idtr => RegValue::Table(TableValue::default()),
        St0 | St1 | St2 | St3 | St4 | St5 | St6 | St7 => RegValue::X87(X87Value::default()),
        Mm0 | Mm1 | Mm2 | Mm3 | Mm4 | Mm5 | Mm6 | Mm7 => RegValue::Mmx(MmxValue::default()),
        Xmm0 | Xmm1 | Xmm2 | Xmm3 | Xmm4 | Xmm5 | Xmm6 | Xmm7 | Xmm8 | Xmm9 | Xmm10 | Xmm11 | Xmm12 | Xmm13 | Xmm14
        | Xmm15 | Xmm16 | Xmm17 | Xmm18 | Xmm19 | Xmm20 | Xmm21 | Xmm22 | Xmm23 | Xmm24 | Xmm25 | Xmm26 | Xmm27
        | Xmm28 | Xmm29 | Xmm30 | Xmm31 => RegValue::Xmm(XmmValue::default()),
        Ymm0 | Ymm1 | Ymm2 | Ymm3 | Ymm4 | Ymm5 | Ymm6 | Ymm7 | Ymm8 | Ymm9 | Ymm10 | Ymm11 | Ymm12 | Ymm13 | Ymm14
        | Ymm15 | Ymm16 | Ymm17 | Ymm18 | Ymm19 | Ymm20 | Ymm21 | Ymm22 | Ymm23 | Ymm24 | Ymm25 | Ymm26 | Ymm27
        | Ymm28 | Ymm29 | Ymm30 | Ymm31 => RegValue::Ymm(YmmValue::default()),
        Zmm0 | Zmm1 | Zmm2 | Zmm3 | Zmm4 | Zmm5 | Zmm6 | Zmm7 | Zmm8 | Zmm9 | Zmm10 | Zmm11 | Zmm12 | Zmm13 | Zmm14
        | Zmm15 | Zmm16 | Zmm17 | Zmm18 | Zmm19 | Zmm20 | Zmm21 | Zmm22 | Zmm23 | Zmm24 | Zmm25 | Zmm26 | Zmm27
        | Zmm28 | Zmm29 | Zmm30 | Zmm31 => RegValue::Zmm(ZmmValue::default()),
        _ => RegValue::U64(0),
    }
}

enum StepOutcome {
    Continue,
    Exit(VmExitInfo),
    Fail,
}

/// Backend-level VCPU state: a register file, a private MSR map, and the
/// small amount of debug/interrupt bookkeeping the `VcpuBackend` contract
/// calls for.
struct StubVcpu {
    index: usize,
    regions: Arc<Mutex<MemoryRegionList>>,
    regs: HashMap<Reg, RegValue>,
    msrs: HashMap<u32, u64>,
    custom_cpuid: Vec<CpuidResult>,
    vm_exit_cpuid_functions: Vec<u32>,
    extended_vm_exits: ExtendedVmExit,
    fpu_control: u16,
    mxcsr: u32,
    tsc_offset: u64,
    hw_breakpoints: [Option<u64>; 4],
    last_breakpoint_addr: Option<u64>,
    window_requested: bool,
    halted: bool,
}

impl StubVcpu {
    fn new(index: usize, regions: Arc<Mutex<MemoryRegionList>>, spec: &VmSpecifications) -> Self {
        let mut regs = HashMap::new();
        regs.insert(Reg::Rax, RegValue::U64(0));
        regs.insert(Reg::Rbx, RegValue::U64(0));
        regs.insert(Reg::Rcx, RegValue::U64(0));
        regs.insert(Reg::Rdx, RegValue::U64(0));
        regs.insert(Reg::Rsi, RegValue::U64(0));
        regs.insert(Reg::Rdi, RegValue::U64(0));
        regs.insert(Reg::Rsp, RegValue::U64(0));
        regs.insert(Reg::Rbp, RegValue::U64(0));
        regs.insert(Reg::Rip, RegValue::U64(0));
        regs.insert(Reg::Rflags, RegValue::U64(0x2));
        regs.insert(Reg::Cr0, RegValue::U64(0));
        regs.insert(Reg::Cr2, RegValue::U64(0));
        regs.insert(Reg::Cr3, RegValue::U64(0));
        regs.insert(Reg::Cr4, RegValue::U64(0));
        regs.insert(Reg::Cr8, RegValue::U64(0));
        regs.insert(Reg::Efer, RegValue::U64(0));
        regs.insert(Reg::Xcr0, RegValue::U64(bits::XCR0_X87));
        for seg in [Reg::Cs, Reg::Ds, Reg::Es, Reg::Fs, Reg::Gs, Reg::Ss, Reg::Ldtr, Reg::Tr] {
            regs.insert(seg, RegValue::Segment(SegmentValue::default()));
        }
        regs.insert(Reg::Gdtr, RegValue::Table(TableValue::default()));
        regs.insert(Reg::Idtr, RegValue::Table(TableValue::default()));

        StubVcpu {
            index,
            regions,
            regs,
            msrs: HashMap::new(),
            custom_cpuid: spec.custom_cpuid_results.clone(),
            vm_exit_cpuid_functions: spec.vm_exit_cpuid_functions.clone(),
            extended_vm_exits: spec.extended_vm_exits,
            fpu_control: 0x037F,
            mxcsr: 0x1F80,
            tsc_offset: 0,
            hw_breakpoints: [None; 4],
            last_breakpoint_addr: None,
            window_requested: false,
            halted: false,
        }
    }

    fn reg_u64(&self, reg: Reg) -> u64 {
        self.regs.get(&reg).and_then(RegValue::as_u64).unwrap_or(0)
    }

    fn paging_state(&self) -> PagingState {
        PagingState {
            cr0: self.reg_u64(Reg::Cr0),
            cr3: self.reg_u64(Reg::Cr3),
            cr4: self.reg_u64(Reg::Cr4),
            efer: self.reg_u64(Reg::Efer),
        }
    }

    fn cs_base(&self) -> u64 {
        match self.regs.get(&Reg::Cs) {
            Some(RegValue::Segment(seg)) => seg.base,
            _ => 0,
        }
    }

    fn read_phys(&self, addr: u64, buf: &mut [u8]) -> bool {
        self.regions.lock().expect("stub region list poisoned").read(addr, buf)
    }

    fn fetch_byte(&self, laddr: u64) -> Option<u8> {
        let state = self.paging_state();
        let paddr = paging::linear_to_physical(&state, laddr, |a, b| self.read_phys(a, b)).ok()?;
        let mut byte = [0u8; 1];
        if self.read_phys(paddr, &mut byte) {
            Some(byte[0])
        } else {
            None
        }
    }

    fn advance_rip(&mut self, old_rip: u64, len: u64) {
        self.regs.insert(Reg::Rip, RegValue::U64(old_rip + len));
    }

    fn hit_hardware_breakpoint(&self) -> Option<u64> {
        let rip = self.reg_u64(Reg::Rip);
        self.hw_breakpoints.iter().flatten().find(|&&addr| addr == rip).copied()
    }

    fn exec_cpuid(&mut self, rip: u64) -> StepOutcome {
        let function = self.reg_u64(Reg::Rax) as u32;
        let subfunction = self.reg_u64(Reg::Rcx) as u32;
        let (d_eax, d_ebx, d_ecx, d_edx) = host::raw_cpuid(function, subfunction);
        let (eax, ebx, ecx, edx) = self
            .custom_cpuid
            .iter()
            .find(|c| c.function == function)
            .map(|c| (c.eax, c.ebx, c.ecx, c.edx))
            .unwrap_or((d_eax, d_ebx, d_ecx, d_edx));
        self.regs.insert(Reg::Rax, RegValue::U64(zero_extend_dword(eax)));
        self.regs.insert(Reg::Rbx, RegValue::U64(zero_extend_dword(ebx)));
        self.regs.insert(Reg::Rcx, RegValue::U64(zero_extend_dword(ecx)));
        self.regs.insert(Reg::Rdx, RegValue::U64(zero_extend_dword(edx)));
        self.advance_rip(rip, 2);
        if self.extended_vm_exits.any_of(ExtendedVmExit::CPUID) && self.vm_exit_cpuid_functions.contains(&function) {
            StepOutcome::Exit(VmExitInfo::Cpuid {
                rax: eax as u64,
                rbx: ebx as u64,
                rcx: ecx as u64,
                rdx: edx as u64,
                default_rax: d_eax as u64,
                default_rbx: d_ebx as u64,
                default_rcx: d_ecx as u64,
                default_rdx: d_edx as u64,
            })
        } else {
            StepOutcome::Continue
        }
    }

    fn exec_wrmsr(&mut self, rip: u64) -> StepOutcome {
        let msr = self.reg_u64(Reg::Rcx) as u32;
        let eax = self.reg_u64(Reg::Rax) as u32;
        let edx = self.reg_u64(Reg::Rdx) as u32;
        self.msrs.insert(msr, ((edx as u64) << 32) | eax as u64);
        self.advance_rip(rip, 2);
        if self.extended_vm_exits.any_of(ExtendedVmExit::MSR) {
            StepOutcome::Exit(VmExitInfo::MsrAccess { is_write: true, msr, rax: eax as u64, rdx: edx as u64 })
        } else {
            StepOutcome::Continue
        }
    }

    fn exec_rdmsr(&mut self, rip: u64) -> StepOutcome {
        let msr = self.reg_u64(Reg::Rcx) as u32;
        let value = self.msrs.get(&msr).copied().unwrap_or(0);
        let eax = value as u32;
        let edx = (value >> 32) as u32;
        self.regs.insert(Reg::Rax, RegValue::U64(zero_extend_dword(eax)));
        self.regs.insert(Reg::Rdx, RegValue::U64(zero_extend_dword(edx)));
        self.advance_rip(rip, 2);
        if self.extended_vm_exits.any_of(ExtendedVmExit::MSR) {
            StepOutcome::Exit(VmExitInfo::MsrAccess { is_write: false, msr, rax: eax as u64, rdx: edx as u64 })
        } else {
            StepOutcome::Continue
        }
    }

    fn step_one(&mut self, io: &IoHandlers) -> StepOutcome {
        let rip = self.reg_u64(Reg::Rip);
        let laddr = self.cs_base() + rip;
        let opcode = match self.fetch_byte(laddr) {
            Some(b) => b,
            None => {
                warn!("stub vcpu {}: instruction fetch at {:#x} failed", self.index, laddr);
                return StepOutcome::Fail;
            }
        };
        match opcode {
            0xF4 => {
                self.advance_rip(rip, 1);
                self.halted = true;
                StepOutcome::Exit(VmExitInfo::Hlt)
            }
            0xCC => {
                self.advance_rip(rip, 1);
                self.last_breakpoint_addr = Some(laddr);
                StepOutcome::Exit(VmExitInfo::SoftwareBreakpoint)
            }
            0xE4 | 0xE5 => {
                let port = match self.fetch_byte(laddr + 1) {
                    Some(b) => b,
                    None => return StepOutcome::Fail,
                };
                let size = if opcode == 0xE4 { 1 } else { 4 };
                let value = io.read_port(port as u16, size);
                if size == 1 {
                    self.reg_write(Reg::Al, RegValue::U8(value as u8));
                } else {
                    self.regs.insert(Reg::Rax, RegValue::U64(zero_extend_dword(value)));
                }
                self.advance_rip(rip, 2);
                StepOutcome::Exit(VmExitInfo::Pio)
            }
            0xE6 | 0xE7 => {
                let port = match self.fetch_byte(laddr + 1) {
                    Some(b) => b,
                    None => return StepOutcome::Fail,
                };
                let rax = self.reg_u64(Reg::Rax);
                if opcode == 0xE6 {
                    io.write_port(port as u16, 1, rax as u8 as u32);
                } else {
                    io.write_port(port as u16, 4, rax as u32);
                }
                self.advance_rip(rip, 2);
                StepOutcome::Exit(VmExitInfo::Pio)
            }
            0x0F => {
                let second = match self.fetch_byte(laddr + 1) {
                    Some(b) => b,
                    None => return StepOutcome::Fail,
                };
                match second {
                    0xA2 => self.exec_cpuid(rip),
                    0x30 => self.exec_wrmsr(rip),
                    0x32 => self.exec_rdmsr(rip),
                    _ => {
                        debug!("stub vcpu {}: unhandled opcode 0F {:02X} at {:#x}", self.index, second, laddr);
                        StepOutcome::Exit(VmExitInfo::Unhandled)
                    }
                }
            }
            _ => {
                debug!("stub vcpu {}: unhandled opcode {:02X} at {:#x}", self.index, opcode, laddr);
                StepOutcome::Exit(VmExitInfo::Unhandled)
            }
        }
    }
}

impl VcpuBackend for StubVcpu {
    fn run(&mut self, io: &IoHandlers) -> (VpExecutionStatus, VmExitInfo) {
        if self.window_requested {
            self.window_requested = false;
            return (VpExecutionStatus::Ok, VmExitInfo::Interrupt);
        }
        if self.halted {
            return (VpExecutionStatus::Ok, VmExitInfo::Hlt);
        }
        for _ in 0..MAX_INSTRUCTIONS_PER_RUN {
            if let Some(addr) = self.hit_hardware_breakpoint() {
                self.last_breakpoint_addr = Some(addr);
                return (VpExecutionStatus::Ok, VmExitInfo::HardwareBreakpoint);
            }
            match self.step_one(io) {
                StepOutcome::Continue => continue,
                StepOutcome::Exit(exit) => return (VpExecutionStatus::Ok, exit),
                StepOutcome::Fail => return (VpExecutionStatus::Failed, VmExitInfo::Error),
            }
        }
        warn!("stub vcpu {}: exceeded {} instructions without an exit condition", self.index, MAX_INSTRUCTIONS_PER_RUN);
        (VpExecutionStatus::Ok, VmExitInfo::Normal)
    }

    fn step(&mut self, io: &IoHandlers) -> (VpExecutionStatus, VmExitInfo) {
        if self.window_requested {
            self.window_requested = false;
            return (VpExecutionStatus::Ok, VmExitInfo::Interrupt);
        }
        if self.halted {
            return (VpExecutionStatus::Ok, VmExitInfo::Hlt);
        }
        if let Some(addr) = self.hit_hardware_breakpoint() {
            self.last_breakpoint_addr = Some(addr);
            return (VpExecutionStatus::Ok, VmExitInfo::HardwareBreakpoint);
        }
        match self.step_one(io) {
            // A single step that didn't land on anything more specific still
            // traps, the same way real hardware reports the trap flag as a
            // #DB after the stepped instruction completes.
            StepOutcome::Continue => (VpExecutionStatus::Ok, VmExitInfo::SoftwareBreakpoint),
            StepOutcome::Exit(exit) => (VpExecutionStatus::Ok, exit),
            StepOutcome::Fail => (VpExecutionStatus::Failed, VmExitInfo::Error),
        }
    }

    fn supports_guest_debugging(&self) -> bool {
        true
    }

    fn can_inject_interrupt(&self) -> bool {
        self.reg_u64(Reg::Rflags) & bits::RFLAGS_IF != 0
    }

    fn prepare_interrupt(&mut self, vector: u8, _cancel: &AtomicBool) {
        // Nothing to cancel: `run`/`step` never block past the instruction
        // they're currently decoding, so there is no in-flight execution to
        // interrupt.
        trace!("stub vcpu {}: preparing interrupt vector {:#x}", self.index, vector);
    }

    fn inject_interrupt(&mut self, vector: u8) -> VpOperationStatus {
        self.halted = false;
        trace!("stub vcpu {}: injecting vector {:#x}", self.index, vector);
        VpOperationStatus::Ok
    }

    fn request_interrupt_window(&mut self) {
        self.window_requested = true;
    }

    fn reg_read(&self, reg: Reg) -> Result<RegValue, VpOperationStatus> {
        if let Some((parent, width)) = gpr_lane(reg) {
            return Ok(read_lane(self.reg_u64(parent), width));
        }
        Ok(self.regs.get(&reg).copied().unwrap_or_else(|| default_for(reg)))
    }

    fn reg_write(&mut self, reg: Reg, value: RegValue) -> VpOperationStatus {
        if let Some((parent, width)) = gpr_lane(reg) {
            let carrier = self.reg_u64(parent);
            return match write_lane(carrier, width, value) {
                Some(spliced) => {
                    self.regs.insert(parent, RegValue::U64(spliced));
                    VpOperationStatus::Ok
                }
                None => VpOperationStatus::InvalidArguments,
            };
        }
        self.regs.insert(reg, value);
        VpOperationStatus::Ok
    }

    fn get_msr(&self, msr: u32) -> Result<u64, VpOperationStatus> {
        Ok(self.msrs.get(&msr).copied().unwrap_or(0))
    }

    fn set_msr(&mut self, msr: u32, value: u64) -> VpOperationStatus {
        self.msrs.insert(msr, value);
        VpOperationStatus::Ok
    }

    fn get_fpu_control(&self) -> Result<u16, VpOperationStatus> {
        Ok(self.fpu_control)
    }
    fn set_fpu_control(&mut self, value: u16) -> VpOperationStatus {
        self.fpu_control = value;
        VpOperationStatus::Ok
    }
    fn get_mxcsr(&self) -> Result<u32, VpOperationStatus> {
        Ok(self.mxcsr)
    }
    fn set_mxcsr(&mut self, value: u32) -> VpOperationStatus {
        self.mxcsr = value;
        VpOperationStatus::Ok
    }
    fn get_mxcsr_mask(&self) -> Result<u32, VpOperationStatus> {
        Ok(0xFFFF)
    }

    fn get_virtual_tsc_offset(&self) -> Result<u64, VpOperationStatus> {
        Ok(self.tsc_offset)
    }
    fn set_virtual_tsc_offset(&mut self, offset: u64) -> VpOperationStatus {
        self.tsc_offset = offset;
        VpOperationStatus::Ok
    }

    fn enable_software_breakpoints(&mut self, _enable: bool) -> VpOperationStatus {
        // `INT3` always traps in this decoder regardless of this toggle;
        // there is no instruction-patching path to gate.
        VpOperationStatus::Ok
    }

    fn set_hardware_breakpoints(&mut self, addresses: &[u64]) -> VpOperationStatus {
        if addresses.len() > self.hw_breakpoints.len() {
            return VpOperationStatus::InvalidArguments;
        }
        self.hw_breakpoints = [None; 4];
        for (slot, addr) in self.hw_breakpoints.iter_mut().zip(addresses) {
            *slot = Some(*addr);
        }
        VpOperationStatus::Ok
    }

    fn clear_hardware_breakpoints(&mut self) -> VpOperationStatus {
        self.hw_breakpoints = [None; 4];
        VpOperationStatus::Ok
    }

    fn get_breakpoint_address(&self) -> Result<u64, VpOperationStatus> {
        self.last_breakpoint_addr.ok_or(VpOperationStatus::BreakpointNeverHit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::MemoryFlags;
    use crate::memory::PAGE_SIZE;
    use crate::platform::Platform;
    use crate::vm::VmSpecifications;
    use std::ffi::c_void;

    fn init_logging() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    fn one_page() -> (Vec<u8>, *mut u8) {
        let mut page = vec![0u8; PAGE_SIZE as usize];
        let ptr = page.as_mut_ptr();
        (page, ptr)
    }

    fn set_cs_base(vm: &mut crate::vm::VirtualMachine, base: u64) {
        let vp = vm.virtual_processor_mut(0).unwrap();
        vp.reg_write(
            Reg::Cs,
            RegValue::Segment(SegmentValue { selector: 0, base, limit: 0xFFFF_FFFF, attributes: Default::default() }),
        );
    }

    #[test]
    fn hlt_exit_after_single_instruction() {
        init_logging();
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0xF4; // HLT
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);
        let status = vm.run_vcpu(0).unwrap();
        assert_eq!(status, VpExecutionStatus::Ok);
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::Hlt);
    }

    #[test]
    fn pio_out_round_trip() {
        static mut RECORDED: Vec<(u16, u8, u32)> = Vec::new();
        fn write_cb(_ctx: *mut c_void, port: u16, size: u8, value: u32) {
            // SAFETY: the test runs single-threaded and only this callback
            // touches `RECORDED`.
            unsafe { RECORDED.push((port, size, value)) };
        }

        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0xE6; // OUT imm8, AL
        page[1] = 0x42;
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);
        vm.virtual_processor_mut(0).unwrap().reg_write(Reg::Rax, RegValue::U64(0xAB));
        vm.register_io_write_callback(Some(write_cb));

        let status = vm.run_vcpu(0).unwrap();
        assert_eq!(status, VpExecutionStatus::Ok);
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::Pio);
        // SAFETY: single-threaded test, callback already returned.
        unsafe { assert_eq!(RECORDED, vec![(0x42, 1, 0xAB)]) };
    }

    #[test]
    fn cpuid_passes_through_silently_when_not_armed() {
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0x0F;
        page[1] = 0xA2; // CPUID
        page[2] = 0xF4; // HLT
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);
        vm.virtual_processor_mut(0).unwrap().reg_write(Reg::Rax, RegValue::U64(0));

        let status = vm.run_vcpu(0).unwrap();
        assert_eq!(status, VpExecutionStatus::Ok);
        // CPUID itself didn't exit; execution continued to the HLT.
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::Hlt);
    }

    #[test]
    fn cpuid_exits_when_function_is_armed() {
        let mut spec = VmSpecifications::default();
        spec.extended_vm_exits = ExtendedVmExit::CPUID;
        spec.vm_exit_cpuid_functions = vec![1];
        spec.custom_cpuid_results = vec![CpuidResult { function: 1, eax: 0x11, ebx: 0x22, ecx: 0x33, edx: 0x44 }];

        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(spec).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0x0F;
        page[1] = 0xA2;
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);
        vm.virtual_processor_mut(0).unwrap().reg_write(Reg::Rax, RegValue::U64(1));

        vm.run_vcpu(0).unwrap();
        match vm.virtual_processor(0).unwrap().exit_info() {
            VmExitInfo::Cpuid { rax, rbx, rcx, rdx, .. } => {
                assert_eq!((rax, rbx, rcx, rdx), (0x11, 0x22, 0x33, 0x44));
            }
            other => panic!("expected Cpuid exit, got {:?}", other),
        }
    }

    #[test]
    fn unknown_opcode_is_unhandled() {
        init_logging();
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0x0F;
        page[1] = 0xFF; // not decoded
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);

        vm.run_vcpu(0).unwrap();
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::Unhandled);
    }

    #[test]
    fn interrupts_inject_in_fifo_order_once_the_guest_opens_the_window() {
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        vm.virtual_processor_mut(0).unwrap().reg_write(Reg::Rflags, RegValue::U64(bits::RFLAGS_IF));
        vm.virtual_processor(0).unwrap().enqueue_interrupt(0x20);
        vm.virtual_processor(0).unwrap().enqueue_interrupt(0x21);
        vm.virtual_processor(0).unwrap().enqueue_interrupt(0x22);

        // With IF set the backend can accept an injection immediately on
        // every `run`, so the three enqueued vectors drain in order.
        for _ in 0..3 {
            vm.run_vcpu(0).unwrap();
        }
    }

    #[test]
    fn step_reports_a_breakpoint_shaped_exit_for_a_plain_instruction() {
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (mut page, ptr) = one_page();
        page[0] = 0x0F;
        page[1] = 0xA2; // CPUID, not armed for exit
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);

        let status = vm.step_vcpu(0).unwrap();
        assert_eq!(status, VpExecutionStatus::Ok);
        // the vcpu layer rewrites SoftwareBreakpoint exits from `step` to Step.
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::Step);
    }

    #[test]
    fn hardware_breakpoint_fires_when_rip_matches() {
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let (page, ptr) = one_page();
        assert_eq!(vm.map_guest_memory(0x1000, PAGE_SIZE, MemoryFlags::READ | MemoryFlags::EXECUTE, ptr), MemoryMappingStatus::Ok);
        set_cs_base(vm, 0x1000);
        assert_eq!(vm.virtual_processor_mut(0).unwrap().set_hardware_breakpoints(&[0x1000]), VpOperationStatus::Ok);

        vm.run_vcpu(0).unwrap();
        assert_eq!(vm.virtual_processor(0).unwrap().exit_info(), VmExitInfo::HardwareBreakpoint);
        assert_eq!(vm.virtual_processor(0).unwrap().get_breakpoint_address().unwrap(), 0x1000);
    }

    #[test]
    fn reg_write_splices_al_without_clobbering_rax() {
        let mut platform = Platform::new(Box::new(StubBackend::new()));
        let handle = platform.create_vm(VmSpecifications::default()).unwrap();
        let vm = platform.vm_mut(handle).unwrap();
        let vp = vm.virtual_processor_mut(0).unwrap();
        vp.reg_write(Reg::Rax, RegValue::U64(0x1122_3344_5566_7788));
        vp.reg_write(Reg::Al, RegValue::U8(0xAB));
        assert_eq!(vp.reg_read(Reg::Rax).unwrap(), RegValue::U64(0x1122_3344_5566_77AB));
    }
}
