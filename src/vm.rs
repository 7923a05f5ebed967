// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The virtual machine: guest-memory region bookkeeping, the I/O handler
//! table, and the owned sequence of virtual processors. A `VirtualMachine`
//! is created by, and lives only as long as, its owning
//! [`crate::platform::Platform`].

use std::ffi::c_void;

use log::{debug, trace};

use crate::backend::VmBackend;
use crate::error::{MemoryMappingStatus, VpExecutionStatus};
use crate::flags::{ExceptionCode, ExtendedVmExit, FlagQuery, MemoryFlags};
use crate::host::GpaInfo;
use crate::memory::{MemoryRegion, MemoryRegionList, PAGE_SIZE};
use crate::vcpu::VirtualProcessor;

/// A single custom CPUID result a caller wants a VM to report in place of
/// whatever the host CPU would natively return.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CpuidResult {
    /// The CPUID leaf (`eax` on entry).
    pub function: u32,
    /// Reported `eax`.
    pub eax: u32,
    /// Reported `ebx`.
    pub ebx: u32,
    /// Reported `ecx`.
    pub ecx: u32,
    /// Reported `edx`.
    pub edx: u32,
}

/// Backend-specific hints a `VmSpecifications` may carry. Every field is
/// advisory: a backend that does not use a given hint ignores it silently.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BackendHints {
    /// KVM-specific hint: guest-physical page to use for the identity-map
    /// region some KVM configurations require.
    pub kvm_identity_map_page_address: Option<u64>,
}

/// Input to [`crate::platform::Platform::create_vm`].
#[derive(Clone, Debug)]
pub struct VmSpecifications {
    /// Number of virtual processors to create, at least 1.
    pub num_processors: u32,
    /// Extended VM-exit reasons to arm, where the backend supports them.
    pub extended_vm_exits: ExtendedVmExit,
    /// CPUID function numbers whose execution should cause an exit.
    pub vm_exit_cpuid_functions: Vec<u32>,
    /// Exception codes that should cause an exit.
    pub vm_exit_exceptions: ExceptionCode,
    /// Custom CPUID results to report in place of the host's native values.
    pub custom_cpuid_results: Vec<CpuidResult>,
    /// Guest TSC frequency in Hz; 0 means no adjustment is requested.
    pub guest_tsc_frequency: u64,
    /// Backend-specific hints, ignored by backends that do not use them.
    pub backend_hints: BackendHints,
}

impl Default for VmSpecifications {
    fn default() -> Self {
        VmSpecifications {
            num_processors: 1,
            extended_vm_exits: ExtendedVmExit::empty(),
            vm_exit_cpuid_functions: Vec::new(),
            vm_exit_exceptions: ExceptionCode::empty(),
            custom_cpuid_results: Vec::new(),
            guest_tsc_frequency: 0,
            backend_hints: BackendHints::default(),
        }
    }
}

/// Port-read callback: `(context, port, size in bytes) -> value`.
pub type IoReadFn = fn(*mut c_void, u16, u8) -> u32;
/// Port-write callback: `(context, port, size in bytes, value)`.
pub type IoWriteFn = fn(*mut c_void, u16, u8, u32);
/// MMIO-read callback: `(context, address, size in bytes) -> value`.
pub type MmioReadFn = fn(*mut c_void, u64, u8) -> u64;
/// MMIO-write callback: `(context, address, size in bytes, value)`.
pub type MmioWriteFn = fn(*mut c_void, u64, u8, u64);

/// The four I/O callback slots and the opaque context passed to each. An
/// unset slot behaves as a no-op: reads return zero, writes are dropped.
#[derive(Default)]
pub struct IoHandlers {
    io_read: Option<IoReadFn>,
    io_write: Option<IoWriteFn>,
    mmio_read: Option<MmioReadFn>,
    mmio_write: Option<MmioWriteFn>,
    context: *mut c_void,
}

// SAFETY: `context` is an opaque cookie handed back verbatim to whichever
// callback the embedder registered; the embedder is responsible for its
// thread-safety, same as the raw host pointers in `MemoryRegion`.
unsafe impl Send for IoHandlers {}

impl IoHandlers {
    /// Installs (or, with `None`, clears) the port-read callback.
    pub fn set_io_read(&mut self, f: Option<IoReadFn>) {
        self.io_read = f;
    }
    /// Installs (or clears) the port-write callback.
    pub fn set_io_write(&mut self, f: Option<IoWriteFn>) {
        self.io_write = f;
    }
    /// Installs (or clears) the MMIO-read callback.
    pub fn set_mmio_read(&mut self, f: Option<MmioReadFn>) {
        self.mmio_read = f;
    }
    /// Installs (or clears) the MMIO-write callback.
    pub fn set_mmio_write(&mut self, f: Option<MmioWriteFn>) {
        self.mmio_write = f;
    }
    /// Sets the opaque context pointer passed to every callback.
    pub fn set_context(&mut self, context: *mut c_void) {
        self.context = context;
    }

    /// Invokes the port-read callback, or returns 0 if none is registered.
    pub fn read_port(&self, port: u16, size: u8) -> u32 {
        self.io_read.map_or(0, |f| f(self.context, port, size))
    }
    /// Invokes the port-write callback, or drops the write if none is
    /// registered.
    pub fn write_port(&self, port: u16, size: u8, value: u32) {
        if let Some(f) = self.io_write {
            f(self.context, port, size, value);
        }
    }
    /// Invokes the MMIO-read callback, or returns 0 if none is registered.
    pub fn read_mmio(&self, addr: u64, size: u8) -> u64 {
        self.mmio_read.map_or(0, |f| f(self.context, addr, size))
    }
    /// Invokes the MMIO-write callback, or drops the write if none is
    /// registered.
    pub fn write_mmio(&self, addr: u64, size: u8, value: u64) {
        if let Some(f) = self.mmio_write {
            f(self.context, addr, size, value);
        }
    }
}

fn check_alignment(base: u64, size: u64) -> Option<MemoryMappingStatus> {
    if size == 0 {
        return Some(MemoryMappingStatus::EmptyRange);
    }
    if base % PAGE_SIZE != 0 {
        return Some(MemoryMappingStatus::MisalignedAddress);
    }
    if size % PAGE_SIZE != 0 {
        return Some(MemoryMappingStatus::MisalignedSize);
    }
    None
}

/// A virtual machine: a VCPU registry, the guest-physical memory-region
/// list, and the I/O handler table shared by every VCPU it owns.
pub struct VirtualMachine {
    spec: VmSpecifications,
    regions: MemoryRegionList,
    io: IoHandlers,
    vcpus: Vec<VirtualProcessor>,
    backend: Box<dyn VmBackend>,
    gpa: GpaInfo,
    large_memory_allocation: bool,
}

impl VirtualMachine {
    pub(crate) fn new(
        spec: VmSpecifications,
        mut backend: Box<dyn VmBackend>,
        gpa: GpaInfo,
        large_memory_allocation: bool,
    ) -> Self {
        let vcpus = (0..spec.num_processors)
            .map(|i| VirtualProcessor::new(i as usize, backend.create_vcpu(i as usize)))
            .collect();
        VirtualMachine {
            spec,
            regions: MemoryRegionList::new(),
            io: IoHandlers::default(),
            vcpus,
            backend,
            gpa,
            large_memory_allocation,
        }
    }

    /// The immutable specification this VM was created from.
    pub fn get_specifications(&self) -> &VmSpecifications {
        &self.spec
    }

    /// Number of VCPUs owned by this VM.
    pub fn virtual_processor_count(&self) -> usize {
        self.vcpus.len()
    }

    /// Borrows VCPU `index`, if it exists.
    pub fn virtual_processor(&self, index: usize) -> Option<&VirtualProcessor> {
        self.vcpus.get(index)
    }

    /// Mutably borrows VCPU `index`, if it exists.
    pub fn virtual_processor_mut(&mut self, index: usize) -> Option<&mut VirtualProcessor> {
        self.vcpus.get_mut(index)
    }

    /// The I/O handler table, for invoking callbacks from backend exit
    /// handling.
    pub fn io_handlers(&self) -> &IoHandlers {
        &self.io
    }

    /// Runs VCPU `index` until the next VM exit, threading this VM's I/O
    /// handler table down to the backend. Splits the borrow of `self`
    /// between `vcpus` and `io` so callers don't have to juggle the two
    /// separately. Returns `None` if `index` is out of range.
    pub fn run_vcpu(&mut self, index: usize) -> Option<VpExecutionStatus> {
        let VirtualMachine { vcpus, io, .. } = self;
        vcpus.get_mut(index).map(|vp| vp.run(io))
    }

    /// Runs exactly one guest instruction on VCPU `index`, if its backend
    /// supports it. Returns `None` if `index` is out of range.
    pub fn step_vcpu(&mut self, index: usize) -> Option<VpExecutionStatus> {
        let VirtualMachine { vcpus, io, .. } = self;
        vcpus.get_mut(index).map(|vp| vp.step(io))
    }

    /// Installs the port-read callback.
    pub fn register_io_read_callback(&mut self, f: Option<IoReadFn>) {
        self.io.set_io_read(f);
    }
    /// Installs the port-write callback.
    pub fn register_io_write_callback(&mut self, f: Option<IoWriteFn>) {
        self.io.set_io_write(f);
    }
    /// Installs the MMIO-read callback.
    pub fn register_io_mmio_read_callback(&mut self, f: Option<MmioReadFn>) {
        self.io.set_mmio_read(f);
    }
    /// Installs the MMIO-write callback.
    pub fn register_io_mmio_write_callback(&mut self, f: Option<MmioWriteFn>) {
        self.io.set_mmio_write(f);
    }
    /// Sets the opaque context passed to every I/O callback.
    pub fn register_io_context(&mut self, context: *mut c_void) {
        self.io.set_context(context);
    }

    fn out_of_bounds(&self, base: u64, size: u64) -> bool {
        let end = match base.checked_add(size) {
            Some(e) => e - 1,
            None => return true,
        };
        base & !self.gpa.mask != 0 || end & !self.gpa.mask != 0
    }

    /// Maps `size` bytes of host memory at `host_ptr` into the guest-physical
    /// address range `[base, base+size)`.
    pub fn map_guest_memory(
        &mut self,
        base: u64,
        size: u64,
        flags: MemoryFlags,
        host_ptr: *mut u8,
    ) -> MemoryMappingStatus {
        if let Some(status) = check_alignment(base, size) {
            debug!("map_guest_memory({:#x}, {:#x}) rejected: {}", base, size, status);
            return status;
        }
        if (host_ptr as u64) % PAGE_SIZE != 0 {
            debug!("map_guest_memory({:#x}, {:#x}) rejected: misaligned host pointer", base, size);
            return MemoryMappingStatus::MisalignedHostMemory;
        }
        if flags.none_of(MemoryFlags::READ | MemoryFlags::WRITE | MemoryFlags::EXECUTE) {
            debug!("map_guest_memory({:#x}, {:#x}) rejected: no access flags", base, size);
            return MemoryMappingStatus::InvalidFlags;
        }
        if size > 0x1_0000_0000 && !self.large_memory_allocation {
            debug!("map_guest_memory({:#x}, {:#x}) rejected: exceeds 4 GiB", base, size);
            return MemoryMappingStatus::Unsupported;
        }
        if self.out_of_bounds(base, size) {
            debug!("map_guest_memory({:#x}, {:#x}) rejected: out of bounds", base, size);
            return MemoryMappingStatus::OutOfBounds;
        }

        let status = self.backend.map_guest(base, size, flags, host_ptr);
        if status == MemoryMappingStatus::Ok {
            self.regions.insert(MemoryRegion { base, size, host_ptr, flags });
            trace!(
                "map_guest_memory({:#x}, {:#x}) succeeded; {} region(s) tracked",
                base,
                size,
                self.regions.len()
            );
        } else {
            debug!("map_guest_memory({:#x}, {:#x}) rejected by backend: {}", base, size, status);
        }
        status
    }

    /// Unmaps `[base, base+size)`, splitting any overlapping region per the
    /// subtraction rule.
    pub fn unmap_guest_memory(&mut self, base: u64, size: u64) -> MemoryMappingStatus {
        if let Some(status) = check_alignment(base, size) {
            debug!("unmap_guest_memory({:#x}, {:#x}) rejected: {}", base, size, status);
            return status;
        }
        let status = self.backend.unmap_guest(base, size);
        if status == MemoryMappingStatus::Ok {
            self.regions.subtract(base, size);
            trace!(
                "unmap_guest_memory({:#x}, {:#x}) succeeded; {} region(s) remain",
                base,
                size,
                self.regions.len()
            );
        } else {
            debug!("unmap_guest_memory({:#x}, {:#x}) rejected by backend: {}", base, size, status);
        }
        status
    }

    /// Changes the access flags of an existing mapping without altering its
    /// backing memory.
    pub fn set_guest_memory_flags(&mut self, base: u64, size: u64, flags: MemoryFlags) -> MemoryMappingStatus {
        if let Some(status) = check_alignment(base, size) {
            debug!("set_guest_memory_flags({:#x}, {:#x}) rejected: {}", base, size, status);
            return status;
        }
        let status = self.backend.set_guest_flags(base, size, flags);
        if status != MemoryMappingStatus::Ok {
            debug!("set_guest_memory_flags({:#x}, {:#x}) rejected by backend: {}", base, size, status);
        }
        status
    }

    /// Reads the dirty-page bitmap for `[base, base+size)` into `bitmap`,
    /// which must hold at least `ceil(size / PAGE_SIZE / 64)` 64-bit words.
    pub fn query_dirty_pages(&mut self, base: u64, size: u64, bitmap: &mut [u64]) -> MemoryMappingStatus {
        if let Some(status) = check_alignment(base, size) {
            return status;
        }
        let pages = size / PAGE_SIZE;
        let required_words = ((pages + 63) / 64).max(1) as usize;
        if bitmap.len() < required_words {
            return MemoryMappingStatus::InvalidRange;
        }
        self.backend.query_dirty_pages(base, size, bitmap)
    }

    /// Clears the dirty-page bitmap for `[base, base+size)`.
    pub fn clear_dirty_pages(&mut self, base: u64, size: u64) -> MemoryMappingStatus {
        if let Some(status) = check_alignment(base, size) {
            return status;
        }
        self.backend.clear_dirty_pages(base, size)
    }

    /// Reads `buf.len()` bytes of guest-physical memory, per the
    /// latest-mapping-wins / strict-containment rule.
    pub fn mem_read(&self, addr: u64, buf: &mut [u8]) -> bool {
        self.regions.read(addr, buf)
    }

    /// Writes `buf` to guest-physical memory, under the same rule.
    pub fn mem_write(&mut self, addr: u64, buf: &[u8]) -> bool {
        self.regions.write(addr, buf)
    }

    /// The tracked memory regions, in insertion order, for diagnostics.
    pub fn memory_regions(&self) -> &[MemoryRegion] {
        self.regions.regions()
    }
}
