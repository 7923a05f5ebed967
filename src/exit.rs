// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The VM-exit reason a [`crate::vcpu::VirtualProcessor::run`] or
//! [`crate::vcpu::VirtualProcessor::step`] call leaves behind.

use crate::flags::ExceptionCode;

/// Why the guest stopped running and control returned to the caller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VmExitInfo {
    /// The guest ran without reaching any condition the caller asked to be
    /// told about (a full time slice, on backends that have one).
    Normal,
    /// An enqueued interrupt caused the backend to cancel an in-flight run.
    Cancelled,
    /// An interrupt injection window opened; the pending-interrupt vector
    /// is delivered on the caller's next `run`.
    Interrupt,
    /// The guest executed a port I/O instruction; the registered I/O
    /// handler, if any, already ran synchronously before this exit was
    /// returned.
    Pio,
    /// The guest accessed an MMIO address; same timing as `Pio`.
    Mmio,
    /// A single `step()` call completed (rewritten from
    /// `SoftwareBreakpoint` once guest debugging confirms the step landed).
    Step,
    /// A software breakpoint (e.g. `INT3`) was hit.
    SoftwareBreakpoint,
    /// A hardware (debug-register) breakpoint was hit.
    HardwareBreakpoint,
    /// The guest executed `HLT`.
    Hlt,
    /// The guest executed `CPUID`; both what it would have seen natively
    /// and what the backend actually supplied are reported.
    Cpuid {
        /// RAX value returned to the guest.
        rax: u64,
        /// RBX value returned to the guest.
        rbx: u64,
        /// RCX value returned to the guest.
        rcx: u64,
        /// RDX value returned to the guest.
        rdx: u64,
        /// RAX value the host CPU would have returned natively.
        default_rax: u64,
        /// RBX value the host CPU would have returned natively.
        default_rbx: u64,
        /// RCX value the host CPU would have returned natively.
        default_rcx: u64,
        /// RDX value the host CPU would have returned natively.
        default_rdx: u64,
    },
    /// The guest executed `RDMSR`/`WRMSR` on an armed MSR.
    MsrAccess {
        /// True for `WRMSR`, false for `RDMSR`.
        is_write: bool,
        /// The MSR index.
        msr: u32,
        /// RAX at the time of access (the low dword written, or read back).
        rax: u64,
        /// RDX at the time of access (the high dword written, or read back).
        rdx: u64,
    },
    /// The guest raised an armed exception.
    Exception {
        /// Which exception vector fired.
        code: ExceptionCode,
    },
    /// The guest triple-faulted or otherwise shut itself down.
    Shutdown,
    /// The backend itself failed; see the returned
    /// [`crate::error::VpExecutionStatus`] for the status code.
    Error,
    /// The backend reported an exit reason this core does not recognize.
    Unhandled,
}

impl Default for VmExitInfo {
    fn default() -> Self {
        VmExitInfo::Normal
    }
}
