// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The abstract hooks a backend supplies to the core. Each level of the
//! Platform/VirtualMachine/VirtualProcessor hierarchy is backed by a trait
//! object of the matching level here, standing in for the pure-virtual
//! base classes the source used for the same purpose.
//!
//! All alignment and bounds validation happens in `vm`/`vcpu` before any of
//! these methods run; implementations may assume their preconditions hold.

use std::sync::atomic::AtomicBool;

use crate::error::{MemoryMappingStatus, PlatformInitStatus, VpExecutionStatus, VpOperationStatus};
use crate::exit::VmExitInfo;
use crate::flags::MemoryFlags;
use crate::platform::Features;
use crate::registers::{Reg, RegValue};
use crate::vm::{IoHandlers, VmSpecifications};

pub mod stub;

/// The hooks a backend supplies at the platform level. `Send` so that a
/// `Platform`, and every VM/VCPU it creates, can be handed to a worker
/// thread — matching the design's one-owner-per-instance, many-owners-
/// across-threads concurrency model.
pub trait Backend: Send {
    /// A human-readable name for this backend (e.g. `"KVM"`, `"HAXM"`).
    fn name(&self) -> &str;

    /// Runs one-time initialization and returns the resulting status and
    /// capability record. Called exactly once, from [`crate::platform::Platform::new`].
    fn initialize(&mut self) -> (PlatformInitStatus, Features);

    /// The backend's version string. Only consulted after a successful
    /// [`Backend::initialize`].
    fn version(&self) -> &str {
        ""
    }

    /// Creates backend-level state for a new VM, or `None` if the backend
    /// rejects `spec`.
    fn create_vm(&mut self, spec: &VmSpecifications) -> Option<Box<dyn VmBackend>>;
}

/// The hooks a backend supplies at the VM level.
pub trait VmBackend: Send {
    /// Maps host memory at `host_ptr` into `[base, base+size)`.
    fn map_guest(&mut self, base: u64, size: u64, flags: MemoryFlags, host_ptr: *mut u8) -> MemoryMappingStatus;

    /// Unmaps `[base, base+size)`.
    fn unmap_guest(&mut self, base: u64, size: u64) -> MemoryMappingStatus;

    /// Changes the access flags of `[base, base+size)`.
    fn set_guest_flags(&mut self, _base: u64, _size: u64, _flags: MemoryFlags) -> MemoryMappingStatus {
        MemoryMappingStatus::Unsupported
    }

    /// Reads the dirty-page bitmap for `[base, base+size)`.
    fn query_dirty_pages(&mut self, _base: u64, _size: u64, _bitmap: &mut [u64]) -> MemoryMappingStatus {
        MemoryMappingStatus::Unsupported
    }

    /// Clears the dirty-page bitmap for `[base, base+size)`.
    fn clear_dirty_pages(&mut self, _base: u64, _size: u64) -> MemoryMappingStatus {
        MemoryMappingStatus::Unsupported
    }

    /// Creates backend-level state for VCPU `index`.
    fn create_vcpu(&mut self, index: usize) -> Box<dyn VcpuBackend>;
}

/// The hooks a backend supplies at the VCPU level.
pub trait VcpuBackend: Send {
    /// Runs the guest until the next VM exit. `io` is the owning VM's I/O
    /// handler table; a backend that decodes PIO/MMIO instructions itself
    /// (rather than handing them to hardware-assisted dispatch) invokes the
    /// matching callback synchronously, before returning the coarse
    /// [`VmExitInfo::Pio`]/[`VmExitInfo::Mmio`] reason.
    fn run(&mut self, io: &IoHandlers) -> (VpExecutionStatus, VmExitInfo);

    /// Runs exactly one guest instruction. Only called when
    /// [`VcpuBackend::supports_guest_debugging`] is true.
    fn step(&mut self, _io: &IoHandlers) -> (VpExecutionStatus, VmExitInfo) {
        (VpExecutionStatus::Unsupported, VmExitInfo::Unhandled)
    }

    /// Whether `step`, software breakpoints, and hardware breakpoints are
    /// available on this backend.
    fn supports_guest_debugging(&self) -> bool {
        false
    }

    /// Whether an interrupt can be injected right now (roughly, whether
    /// `RFLAGS.IF` is set and no higher-priority event is pending).
    fn can_inject_interrupt(&self) -> bool {
        false
    }

    /// Tells the backend an interrupt is now pending, so it can cancel an
    /// in-flight `run` and reach the injection point sooner. `cancel` is a
    /// cross-thread one-shot signal; backends without a blocking run loop
    /// to interrupt may ignore it.
    fn prepare_interrupt(&mut self, _vector: u8, _cancel: &AtomicBool) {}

    /// Injects `vector` into the guest. Called only when
    /// [`VcpuBackend::can_inject_interrupt`] returned true.
    fn inject_interrupt(&mut self, vector: u8) -> VpOperationStatus;

    /// Asks the backend to exit with [`VmExitInfo::Interrupt`] as soon as
    /// an injection window opens.
    fn request_interrupt_window(&mut self) {}

    /// Reads one register.
    fn reg_read(&self, reg: Reg) -> Result<RegValue, VpOperationStatus>;

    /// Writes one register.
    fn reg_write(&mut self, reg: Reg, value: RegValue) -> VpOperationStatus;

    /// Reads several registers; the default loops over [`VcpuBackend::reg_read`].
    fn reg_read_bulk(&self, regs: &[Reg]) -> Vec<Result<RegValue, VpOperationStatus>> {
        regs.iter().map(|&r| self.reg_read(r)).collect()
    }

    /// Writes several registers; the default loops over [`VcpuBackend::reg_write`].
    fn reg_write_bulk(&mut self, writes: &[(Reg, RegValue)]) -> Vec<VpOperationStatus> {
        writes.iter().map(|&(r, v)| self.reg_write(r, v)).collect()
    }

    /// Reads one MSR.
    fn get_msr(&self, _msr: u32) -> Result<u64, VpOperationStatus> {
        Err(VpOperationStatus::InvalidRegister)
    }

    /// Writes one MSR.
    fn set_msr(&mut self, _msr: u32, _value: u64) -> VpOperationStatus {
        VpOperationStatus::InvalidRegister
    }

    /// Reads several MSRs; the default loops over [`VcpuBackend::get_msr`].
    fn get_msr_bulk(&self, msrs: &[u32]) -> Vec<Result<u64, VpOperationStatus>> {
        msrs.iter().map(|&m| self.get_msr(m)).collect()
    }

    /// Writes several MSRs; the default loops over [`VcpuBackend::set_msr`].
    fn set_msr_bulk(&mut self, writes: &[(u32, u64)]) -> Vec<VpOperationStatus> {
        writes.iter().map(|&(m, v)| self.set_msr(m, v)).collect()
    }

    /// Reads the x87 FPU control word.
    fn get_fpu_control(&self) -> Result<u16, VpOperationStatus> {
        Err(VpOperationStatus::Unsupported)
    }
    /// Writes the x87 FPU control word.
    fn set_fpu_control(&mut self, _value: u16) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }
    /// Reads MXCSR.
    fn get_mxcsr(&self) -> Result<u32, VpOperationStatus> {
        Err(VpOperationStatus::Unsupported)
    }
    /// Writes MXCSR.
    fn set_mxcsr(&mut self, _value: u32) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }
    /// Reads the MXCSR valid-bits mask, if the backend publishes one.
    fn get_mxcsr_mask(&self) -> Result<u32, VpOperationStatus> {
        Err(VpOperationStatus::Unsupported)
    }

    /// Reads the per-VCPU guest TSC offset.
    fn get_virtual_tsc_offset(&self) -> Result<u64, VpOperationStatus> {
        Err(VpOperationStatus::Unsupported)
    }
    /// Writes the per-VCPU guest TSC offset.
    fn set_virtual_tsc_offset(&mut self, _offset: u64) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }

    /// Enables or disables software-breakpoint (`INT3`) trapping.
    fn enable_software_breakpoints(&mut self, _enable: bool) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }
    /// Programs up to four hardware breakpoint addresses.
    fn set_hardware_breakpoints(&mut self, _addresses: &[u64]) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }
    /// Clears all programmed hardware breakpoints.
    fn clear_hardware_breakpoints(&mut self) -> VpOperationStatus {
        VpOperationStatus::Unsupported
    }
    /// Returns the address of the breakpoint that produced the most recent
    /// `HardwareBreakpoint` exit.
    fn get_breakpoint_address(&self) -> Result<u64, VpOperationStatus> {
        Err(VpOperationStatus::Unsupported)
    }
}
