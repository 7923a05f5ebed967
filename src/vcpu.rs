// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The virtual processor: the per-VCPU register/execution surface layered
//! over a [`crate::backend::VcpuBackend`], plus the pending-interrupt queue
//! that lets [`VirtualProcessor::enqueue_interrupt`] be called from any
//! thread while `run`/`step` execute on the VCPU's own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, trace};

use crate::backend::VcpuBackend;
use crate::descriptors::{self, system_type, GdtEntry, GdtEntryExtension, IdtEntry, SegmentSize};
use crate::error::{VpExecutionStatus, VpOperationStatus};
use crate::exit::VmExitInfo;
use crate::paging::{self, ExecutionMode, PagingMode, PagingState, TranslationError};
use crate::registers::{bits, Reg, RegValue, SegmentValue, TableValue};
use crate::vm::{IoHandlers, VirtualMachine};

/// One guest CPU core: register/execution state delegated to a backend,
/// plus the VM-memory-dependent operations (paging walk, descriptor-table
/// reads, segment loading) that the core itself implements against an
/// explicit [`VirtualMachine`] parameter rather than a stored parent
/// reference.
pub struct VirtualProcessor {
    index: usize,
    exit_info: VmExitInfo,
    pending: Mutex<VecDeque<u8>>,
    cancel_requested: Arc<AtomicBool>,
    backend: Box<dyn VcpuBackend>,
}

impl VirtualProcessor {
    pub(crate) fn new(index: usize, backend: Box<dyn VcpuBackend>) -> Self {
        VirtualProcessor {
            index,
            exit_info: VmExitInfo::default(),
            pending: Mutex::new(VecDeque::new()),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            backend,
        }
    }

    /// This VCPU's index within its owning VM.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The exit reason left behind by the most recent `run`/`step` call.
    pub fn exit_info(&self) -> VmExitInfo {
        self.exit_info
    }

    /// Queues `vector` for injection on the next `run`, and asks the
    /// backend to cancel any in-flight run so the vector is delivered
    /// promptly. Safe to call from any thread while another thread is
    /// inside `run`/`step`: this only ever touches `pending` and
    /// `cancel_requested`, never `backend`.
    ///
    /// Panics if the pending-interrupt queue's mutex is poisoned (a prior
    /// holder panicked while holding it) rather than silently dropping the
    /// interrupt.
    pub fn enqueue_interrupt(&self, vector: u8) {
        self.pending.lock().expect("pending-interrupt queue poisoned").push_back(vector);
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// If an interrupt is pending and the backend can accept it right now,
    /// injects it immediately; otherwise arms the backend's
    /// interrupt-window request so the next exit reports it.
    fn drain_pending_before_run(&mut self) {
        let head = { self.pending.lock().expect("pending-interrupt queue poisoned").front().copied() };
        let Some(vector) = head else {
            return;
        };
        if self.backend.can_inject_interrupt() {
            self.pending.lock().expect("pending-interrupt queue poisoned").pop_front();
            self.backend.inject_interrupt(vector);
        } else {
            self.backend.prepare_interrupt(vector, &self.cancel_requested);
            self.backend.request_interrupt_window();
        }
    }

    /// Runs the guest until the next VM exit. `io` is normally the owning
    /// VM's handler table ([`VirtualMachine::io_handlers`]); see
    /// [`VirtualMachine::run_vcpu`] for the common case where the caller
    /// already has the owning VM in hand.
    pub fn run(&mut self, io: &IoHandlers) -> VpExecutionStatus {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.drain_pending_before_run();
        let (status, exit) = self.backend.run(io);
        self.exit_info = exit;
        trace!("vcpu {} run exited: {:?}", self.index, exit);
        if status == VpExecutionStatus::Failed {
            error!("vcpu {} run failed", self.index);
        }
        status
    }

    /// Runs exactly one guest instruction, if the backend supports it.
    pub fn step(&mut self, io: &IoHandlers) -> VpExecutionStatus {
        if !self.backend.supports_guest_debugging() {
            return VpExecutionStatus::Unsupported;
        }
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.drain_pending_before_run();
        let (status, exit) = self.backend.step(io);
        // a step lands as a software breakpoint exit on backends that
        // implement single-step via a temporary INT3; normalize it.
        self.exit_info = if exit == VmExitInfo::SoftwareBreakpoint { VmExitInfo::Step } else { exit };
        trace!("vcpu {} step exited: {:?}", self.index, self.exit_info);
        if status == VpExecutionStatus::Failed {
            error!("vcpu {} step failed", self.index);
        }
        status
    }

    /// The exit reason left behind by the most recent `run`/`step` call.
    /// Equivalent to [`VirtualProcessor::exit_info`]; kept under this name
    /// to match the rest of the accessor surface.
    pub fn get_vm_exit_info(&self) -> VmExitInfo {
        self.exit_info
    }

    fn reg_u64(&self, reg: Reg) -> Result<u64, VpOperationStatus> {
        self.backend.reg_read(reg)?.as_u64().ok_or(VpOperationStatus::InvalidRegister)
    }

    fn paging_state(&self) -> PagingState {
        PagingState {
            cr0: self.reg_u64(Reg::Cr0).unwrap_or(0),
            cr3: self.reg_u64(Reg::Cr3).unwrap_or(0),
            cr4: self.reg_u64(Reg::Cr4).unwrap_or(0),
            efer: self.reg_u64(Reg::Efer).unwrap_or(0),
        }
    }

    /// Derives the current execution mode from CR0/RFLAGS/EFER.
    pub fn get_execution_mode(&self) -> Result<ExecutionMode, VpOperationStatus> {
        let cr0 = self.reg_u64(Reg::Cr0)?;
        let rflags = self.reg_u64(Reg::Rflags)?;
        let efer = self.reg_u64(Reg::Efer)?;
        Ok(paging::derive_execution_mode(
            cr0 & bits::CR0_PE != 0,
            rflags & bits::RFLAGS_VM != 0,
            efer & bits::EFER_LMA != 0,
        ))
    }

    /// Derives the current paging mode from CR0/CR4/EFER.
    pub fn get_paging_mode(&self) -> Result<PagingMode, VpOperationStatus> {
        let cr0 = self.reg_u64(Reg::Cr0)?;
        let cr4 = self.reg_u64(Reg::Cr4)?;
        let efer = self.reg_u64(Reg::Efer)?;
        Ok(paging::derive_paging_mode(cr0 & bits::CR0_PG != 0, cr4 & bits::CR4_PAE != 0, efer & bits::EFER_LME != 0))
    }

    /// Reads `buf.len()` bytes of guest-physical memory.
    pub fn mem_read(&self, vm: &VirtualMachine, addr: u64, buf: &mut [u8]) -> bool {
        vm.mem_read(addr, buf)
    }

    /// Writes `buf` to guest-physical memory.
    pub fn mem_write(&self, vm: &mut VirtualMachine, addr: u64, buf: &[u8]) -> bool {
        vm.mem_write(addr, buf)
    }

    /// Walks the guest's current page tables to translate `laddr`.
    pub fn linear_to_physical(&self, vm: &VirtualMachine, laddr: u64) -> Result<u64, TranslationError> {
        let state = self.paging_state();
        paging::linear_to_physical(&state, laddr, |addr, buf| vm.mem_read(addr, buf))
    }

    /// Reads `buf.len()` bytes starting at linear address `laddr`, walking
    /// page tables and splitting the transfer at page boundaries as needed.
    pub fn lmem_read(&self, vm: &VirtualMachine, laddr: u64, buf: &mut [u8]) -> Result<usize, TranslationError> {
        let state = self.paging_state();
        let mut transferred = 0usize;
        for (chunk_laddr, offset, chunk_len) in page_chunks(laddr, buf.len()) {
            let paddr = paging::linear_to_physical(&state, chunk_laddr, |addr, b| vm.mem_read(addr, b))?;
            if !vm.mem_read(paddr, &mut buf[offset..offset + chunk_len]) {
                return Err(TranslationError::UnreadableEntry);
            }
            transferred += chunk_len;
        }
        Ok(transferred)
    }

    /// Writes `buf` starting at linear address `laddr`, walking page tables
    /// and splitting the transfer at page boundaries as needed.
    pub fn lmem_write(&self, vm: &mut VirtualMachine, laddr: u64, buf: &[u8]) -> Result<usize, TranslationError> {
        let state = self.paging_state();
        let mut transferred = 0usize;
        for (chunk_laddr, offset, chunk_len) in page_chunks(laddr, buf.len()) {
            let paddr = paging::linear_to_physical(&state, chunk_laddr, |addr, b| vm.mem_read(addr, b))?;
            if !vm.mem_write(paddr, &buf[offset..offset + chunk_len]) {
                return Err(TranslationError::UnreadableEntry);
            }
            transferred += chunk_len;
        }
        Ok(transferred)
    }

    /// Reads one register.
    pub fn reg_read(&self, reg: Reg) -> Result<RegValue, VpOperationStatus> {
        self.backend.reg_read(reg)
    }

    /// Writes one register.
    pub fn reg_write(&mut self, reg: Reg, value: RegValue) -> VpOperationStatus {
        self.backend.reg_write(reg, value)
    }

    /// Reads several registers at once.
    pub fn reg_read_bulk(&self, regs: &[Reg]) -> Vec<Result<RegValue, VpOperationStatus>> {
        self.backend.reg_read_bulk(regs)
    }

    /// Writes several registers at once.
    pub fn reg_write_bulk(&mut self, writes: &[(Reg, RegValue)]) -> Vec<VpOperationStatus> {
        self.backend.reg_write_bulk(writes)
    }

    /// Copies the value of `from` into `to`.
    pub fn reg_copy(&mut self, from: Reg, to: Reg) -> VpOperationStatus {
        match self.backend.reg_read(from) {
            Ok(value) => self.backend.reg_write(to, value),
            Err(status) => status,
        }
    }

    /// Reads one Model-Specific Register.
    pub fn get_msr(&self, msr: u32) -> Result<u64, VpOperationStatus> {
        self.backend.get_msr(msr)
    }
    /// Writes one Model-Specific Register.
    pub fn set_msr(&mut self, msr: u32, value: u64) -> VpOperationStatus {
        self.backend.set_msr(msr, value)
    }
    /// Reads several Model-Specific Registers at once.
    pub fn get_msr_bulk(&self, msrs: &[u32]) -> Vec<Result<u64, VpOperationStatus>> {
        self.backend.get_msr_bulk(msrs)
    }
    /// Writes several Model-Specific Registers at once.
    pub fn set_msr_bulk(&mut self, writes: &[(u32, u64)]) -> Vec<VpOperationStatus> {
        self.backend.set_msr_bulk(writes)
    }

    /// Reads the x87 FPU control word.
    pub fn get_fpu_control(&self) -> Result<u16, VpOperationStatus> {
        self.backend.get_fpu_control()
    }
    /// Writes the x87 FPU control word.
    pub fn set_fpu_control(&mut self, value: u16) -> VpOperationStatus {
        self.backend.set_fpu_control(value)
    }
    /// Reads MXCSR.
    pub fn get_mxcsr(&self) -> Result<u32, VpOperationStatus> {
        self.backend.get_mxcsr()
    }
    /// Writes MXCSR.
    pub fn set_mxcsr(&mut self, value: u32) -> VpOperationStatus {
        self.backend.set_mxcsr(value)
    }
    /// Reads the MXCSR valid-bits mask, if the backend publishes one.
    pub fn get_mxcsr_mask(&self) -> Result<u32, VpOperationStatus> {
        self.backend.get_mxcsr_mask()
    }

    /// Reads the per-VCPU guest TSC offset.
    pub fn get_virtual_tsc_offset(&self) -> Result<u64, VpOperationStatus> {
        self.backend.get_virtual_tsc_offset()
    }
    /// Writes the per-VCPU guest TSC offset.
    pub fn set_virtual_tsc_offset(&mut self, offset: u64) -> VpOperationStatus {
        self.backend.set_virtual_tsc_offset(offset)
    }

    /// Enables or disables software-breakpoint (`INT3`) trapping.
    pub fn enable_software_breakpoints(&mut self, enable: bool) -> VpOperationStatus {
        self.backend.enable_software_breakpoints(enable)
    }
    /// Programs up to four hardware breakpoint addresses.
    pub fn set_hardware_breakpoints(&mut self, addresses: &[u64]) -> VpOperationStatus {
        self.backend.set_hardware_breakpoints(addresses)
    }
    /// Clears all programmed hardware breakpoints.
    pub fn clear_hardware_breakpoints(&mut self) -> VpOperationStatus {
        self.backend.clear_hardware_breakpoints()
    }
    /// Returns the address of the breakpoint that produced the most recent
    /// `HardwareBreakpoint` exit.
    pub fn get_breakpoint_address(&self) -> Result<u64, VpOperationStatus> {
        self.backend.get_breakpoint_address()
    }

    fn table_reg(&self, reg: Reg) -> Result<TableValue, VpOperationStatus> {
        match self.backend.reg_read(reg)? {
            RegValue::Table(t) => Ok(t),
            _ => Err(VpOperationStatus::InvalidRegister),
        }
    }

    /// Reads the GDT entry named by `selector`, bounds-checked against
    /// GDTR's limit. Returns the trailing eight-byte extension too when the
    /// descriptor is a system descriptor requiring the sixteen-byte IA-32e
    /// form and the VCPU is currently in IA-32e mode. Outside IA-32e mode
    /// any system type is accepted except the four reserved encodings;
    /// loadability of a given system type by [`VirtualProcessor::read_segment`]
    /// is a separate, narrower check.
    pub fn get_gdt_entry(
        &self,
        vm: &VirtualMachine,
        selector: u16,
    ) -> Result<(GdtEntry, Option<GdtEntryExtension>), VpOperationStatus> {
        let gdtr = self.table_reg(Reg::Gdtr)?;
        let offset = (selector >> 3) as u64 * 8;
        if offset + 7 > gdtr.limit as u64 {
            return Err(VpOperationStatus::InvalidSelector);
        }
        let mut raw = [0u8; 8];
        if !vm.mem_read(gdtr.base + offset, &mut raw) {
            return Err(VpOperationStatus::Failed);
        }
        let entry = GdtEntry::from_bytes(raw);

        let access = entry.access();
        let is_system = access & descriptors::GDT_ACCESS_NON_SYSTEM == 0;
        let exec_mode = self.get_execution_mode().map_err(|_| VpOperationStatus::Failed)?;
        if is_system {
            let ty = access & 0xF;
            if exec_mode == ExecutionMode::IA32e {
                let known = matches!(
                    ty,
                    system_type::LDT
                        | system_type::TSS_AVAILABLE
                        | system_type::TSS_BUSY
                        | system_type::CALL_GATE
                        | system_type::INTERRUPT_GATE
                        | system_type::TRAP_GATE
                );
                if !known {
                    return Err(VpOperationStatus::InvalidSelector);
                }
            } else if descriptors::is_reserved_system_type(ty) {
                return Err(VpOperationStatus::InvalidSelector);
            }
        }

        if is_system && exec_mode == ExecutionMode::IA32e {
            if offset + 15 > gdtr.limit as u64 {
                return Err(VpOperationStatus::InvalidSelector);
            }
            let mut ext_raw = [0u8; 8];
            if !vm.mem_read(gdtr.base + offset + 8, &mut ext_raw) {
                return Err(VpOperationStatus::Failed);
            }
            Ok((entry, Some(GdtEntryExtension::from_bytes(ext_raw))))
        } else {
            Ok((entry, None))
        }
    }

    /// Writes a GDT entry named by `selector`, bounds-checked against
    /// GDTR's limit. Writes the trailing extension too when `extension` is
    /// supplied. Applies the same mode-scoped system-type rejection as
    /// [`VirtualProcessor::get_gdt_entry`], so a selector this crate refuses
    /// to read is also refused on write.
    pub fn set_gdt_entry(
        &self,
        vm: &mut VirtualMachine,
        selector: u16,
        entry: GdtEntry,
        extension: Option<GdtEntryExtension>,
    ) -> VpOperationStatus {
        let gdtr = match self.table_reg(Reg::Gdtr) {
            Ok(t) => t,
            Err(status) => return status,
        };
        let offset = (selector >> 3) as u64 * 8;
        if offset + 7 > gdtr.limit as u64 {
            return VpOperationStatus::InvalidSelector;
        }

        let access = entry.access();
        let is_system = access & descriptors::GDT_ACCESS_NON_SYSTEM == 0;
        if is_system {
            let ty = access & 0xF;
            let exec_mode = match self.get_execution_mode() {
                Ok(mode) => mode,
                Err(_) => return VpOperationStatus::Failed,
            };
            if exec_mode == ExecutionMode::IA32e {
                let known = matches!(
                    ty,
                    system_type::LDT
                        | system_type::TSS_AVAILABLE
                        | system_type::TSS_BUSY
                        | system_type::CALL_GATE
                        | system_type::INTERRUPT_GATE
                        | system_type::TRAP_GATE
                );
                if !known {
                    return VpOperationStatus::InvalidSelector;
                }
            } else if descriptors::is_reserved_system_type(ty) {
                return VpOperationStatus::InvalidSelector;
            }
        }

        if !vm.mem_write(gdtr.base + offset, &entry.raw) {
            return VpOperationStatus::Failed;
        }
        if let Some(extension) = extension {
            if offset + 15 > gdtr.limit as u64 {
                return VpOperationStatus::InvalidSelector;
            }
            if !vm.mem_write(gdtr.base + offset + 8, &extension.to_bytes()) {
                return VpOperationStatus::Failed;
            }
        }
        VpOperationStatus::Ok
    }

    /// Reads the IDT entry for `vector`, bounds-checked against IDTR's
    /// limit.
    pub fn get_idt_entry(&self, vm: &VirtualMachine, vector: u8) -> Result<IdtEntry, VpOperationStatus> {
        let idtr = self.table_reg(Reg::Idtr)?;
        let offset = vector as u64 * 8;
        if offset + 7 > idtr.limit as u64 {
            return Err(VpOperationStatus::InvalidSelector);
        }
        let mut raw = [0u8; 8];
        if !vm.mem_read(idtr.base + offset, &mut raw) {
            return Err(VpOperationStatus::Failed);
        }
        Ok(IdtEntry::from_bytes(raw))
    }

    /// Writes the IDT entry for `vector`, bounds-checked against IDTR's
    /// limit.
    pub fn set_idt_entry(&self, vm: &mut VirtualMachine, vector: u8, entry: IdtEntry) -> VpOperationStatus {
        let idtr = match self.table_reg(Reg::Idtr) {
            Ok(t) => t,
            Err(status) => return status,
        };
        let offset = vector as u64 * 8;
        if offset + 7 > idtr.limit as u64 {
            return VpOperationStatus::InvalidSelector;
        }
        if !vm.mem_write(idtr.base + offset, &entry.raw) {
            return VpOperationStatus::Failed;
        }
        VpOperationStatus::Ok
    }

    /// Loads a segment descriptor named by `selector` from the GDT. A null
    /// selector (index 0) yields the default, unusable segment value.
    pub fn read_segment(&self, vm: &VirtualMachine, selector: u16) -> Result<SegmentValue, VpOperationStatus> {
        if selector >> 3 == 0 {
            return Ok(SegmentValue::default());
        }
        let (entry, ext) = self.get_gdt_entry(vm, selector)?;
        let access = entry.access();
        let is_system = access & descriptors::GDT_ACCESS_NON_SYSTEM == 0;
        if is_system {
            let ty = access & 0xF;
            let loadable = matches!(
                ty,
                system_type::LDT | system_type::TSS_AVAILABLE | system_type::TSS_BUSY
            );
            if !loadable {
                return Err(VpOperationStatus::InvalidSelector);
            }
        }
        let attributes = descriptors::segment_attributes_from_entry(&entry);
        let base = match ext {
            Some(ext) => descriptors::extended_base(&entry, &ext),
            None => entry.base() as u64,
        };
        Ok(SegmentValue { selector, base, limit: entry.limit(), attributes })
    }

    /// Classifies the operand-size width of the segment named by
    /// `selector` (16/32/64-bit, or invalid).
    pub fn get_segment_size(&self, vm: &VirtualMachine, selector: u16) -> Result<SegmentSize, VpOperationStatus> {
        let segment = self.read_segment(vm, selector)?;
        Ok(descriptors::classify_segment_size(&segment.attributes))
    }
}

/// Splits a `[laddr, laddr+len)` transfer into page-aligned chunks, each
/// `(chunk_start_laddr, buffer_offset, chunk_len)`.
fn page_chunks(laddr: u64, len: usize) -> Vec<(u64, usize, usize)> {
    const PAGE_SIZE: u64 = 4096;
    let mut chunks = Vec::new();
    let mut remaining = len;
    let mut cur = laddr;
    let mut offset = 0usize;
    while remaining > 0 {
        let page_off = (cur & (PAGE_SIZE - 1)) as usize;
        let chunk_len = remaining.min((PAGE_SIZE as usize) - page_off);
        chunks.push((cur, offset, chunk_len));
        cur += chunk_len as u64;
        offset += chunk_len;
        remaining -= chunk_len;
    }
    chunks
}
