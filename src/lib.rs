// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![deny(missing_docs)]

//! A generic, OS- and hypervisor-agnostic abstraction over x86
//! virtualization.
//!
//! This crate provides the neutral `Platform` / `VirtualMachine` /
//! `VirtualProcessor` hierarchy, a trait-based [`backend`] contract a
//! concrete hypervisor integration implements, and the x86-specific
//! plumbing (register model, descriptor tables, linear-to-physical
//! translation, memory-region bookkeeping) that every such integration
//! needs and would otherwise have to duplicate.
//!
//! # Layering
//!
//! - [`platform::Platform`] owns zero or more VMs over one backend.
//! - [`vm::VirtualMachine`] owns guest-memory region bookkeeping, the I/O
//!   handler table, and its VCPUs.
//! - [`vcpu::VirtualProcessor`] owns one guest CPU core's register and
//!   execution surface, plus the pending-interrupt queue that is the
//!   crate's one sanctioned cross-thread VCPU operation.
//!
//! None of these types talk to real hardware or a real hypervisor
//! themselves; they delegate to a [`backend::Backend`]/[`backend::VmBackend`]/
//! [`backend::VcpuBackend`] implementation. [`backend::stub`] ships an
//! in-process software implementation of that contract, useful for tests
//! and for exercising the core without a hypervisor underneath.
//!
//! # Platform support
//!
//! x86/x86_64 hosts. [`kvm_compat`] additionally carries Linux/Windows
//! struct layouts for anyone wiring up a concrete KVM- or WHPX-backed
//! implementation of [`backend::Backend`].

/// The abstract backend contract (`Backend`/`VmBackend`/`VcpuBackend`)
/// and the in-process reference implementation of it.
pub mod backend;
/// Descriptor-table entry layouts (GDT/IDT) and segment-size
/// classification.
pub mod descriptors;
/// The status/error sum types shared across the core.
pub mod error;
/// The VM-exit reason a `run`/`step` call leaves behind.
pub mod exit;
/// Typed bit-sets over the core's capability and classification
/// enumerations.
pub mod flags;
/// Host CPU probing (guest-physical address width, FP/SIMD extensions).
pub mod host;
/// Concrete KVM/WHPX struct layouts, for backend implementors.
pub mod kvm_compat;
/// Guest-physical memory-region bookkeeping.
pub mod memory;
/// x86 linear-to-physical address translation.
pub mod paging;
/// The platform façade: one backend, its capability record, and the VMs
/// it owns.
pub mod platform;
/// The neutral register model shared by every backend.
pub mod registers;
/// The virtual processor: register/execution surface and interrupt
/// queue layered over a `VcpuBackend`.
pub mod vcpu;
/// The virtual machine: memory bookkeeping, I/O handlers, and VCPUs.
pub mod vm;

pub use backend::{Backend, VcpuBackend, VmBackend};
pub use error::{MemoryMappingStatus, PlatformInitStatus, VpExecutionStatus, VpOperationStatus};
pub use exit::VmExitInfo;
pub use platform::{Features, Platform, VmHandle};
pub use registers::{Reg, RegValue};
pub use vcpu::VirtualProcessor;
pub use vm::{CpuidResult, IoHandlers, VirtualMachine, VmSpecifications};
