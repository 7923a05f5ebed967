// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The platform façade: a process-wide handle on one backend, its
//! capability record, and the VMs it has created.

use log::{debug, info, warn};

use crate::backend::Backend;
use crate::error::PlatformInitStatus;
use crate::flags::{ExceptionCode, ExtendedControlRegister, ExtendedVmExit, FloatingPointExtension};
use crate::host::GpaInfo;
use crate::vm::{CpuidResult, VmSpecifications};
use crate::vm::VirtualMachine;

/// The capability record a [`Platform`] publishes once initialization
/// succeeds.
#[derive(Clone, Debug, Default)]
pub struct Features {
    /// Maximum VCPUs a single VM may have.
    pub max_processors_per_vm: u32,
    /// Maximum VCPUs across every VM this platform may create.
    pub max_processors_global: u32,
    /// Host guest-physical address geometry.
    pub gpa: GpaInfo,
    /// Backend never requires manual EPT/NPT identity maps.
    pub unrestricted_guest: bool,
    /// Backend uses hardware-assisted nested paging (EPT/NPT).
    pub ept: bool,
    /// Backend supports single-step and breakpoints.
    pub guest_debugging: bool,
    /// Backend supports per-page guest memory protection changes.
    pub guest_memory_protection: bool,
    /// Backend supports dirty-page bitmap tracking.
    pub dirty_page_tracking: bool,
    /// Backend supports tracking a sub-range of a mapped region.
    pub partial_dirty_bitmap: bool,
    /// Backend supports mappings larger than 4 GiB.
    pub large_memory_allocation: bool,
    /// Backend supports overlapping (aliased) mappings.
    pub memory_aliasing: bool,
    /// Backend supports unmapping guest memory at all.
    pub memory_unmapping: bool,
    /// Backend supports unmapping part of a previously mapped region.
    pub partial_unmapping: bool,
    /// Backend supports MMIO instructions whose access spans a page
    /// boundary.
    pub partial_mmio_instructions: bool,
    /// Backend supports adjusting the guest TSC frequency.
    pub guest_tsc_scaling: bool,
    /// Backend supports reporting custom CPUID results to the guest.
    pub custom_cpuids: bool,
    /// Floating-point/SIMD extensions visible to the guest.
    pub floating_point_extensions: FloatingPointExtension,
    /// Extended control registers the backend exposes.
    pub extended_control_registers: ExtendedControlRegister,
    /// Extended VM-exit reasons the backend can arm.
    pub extended_vm_exits: ExtendedVmExit,
    /// Exception codes the backend can arm for exit-on-exception.
    pub exception_exits: ExceptionCode,
    /// CPUID results this backend reports for the host, in probe order.
    pub supported_cpuid_results: Vec<CpuidResult>,
}

/// A process-wide façade over one virtualization backend: name, version,
/// initialization status, published features, and the VMs it owns.
pub struct Platform {
    name: String,
    version: String,
    init_status: PlatformInitStatus,
    features: Features,
    backend: Box<dyn Backend>,
    vms: Vec<Option<VirtualMachine>>,
}

/// An opaque handle to a VM owned by a [`Platform`]. Stable across VM
/// creation/destruction of *other* VMs; invalid once the VM it names has
/// been freed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct VmHandle(usize);

impl Platform {
    /// Constructs a platform over `backend` and runs its one-time
    /// initialization.
    pub fn new(mut backend: Box<dyn Backend>) -> Self {
        let name = backend.name().to_string();
        let (init_status, features) = backend.initialize();
        match init_status {
            PlatformInitStatus::Ok => {
                info!("platform '{}' initialized ({:?})", name, init_status);
            }
            _ => {
                warn!("platform '{}' initialization reported {:?}", name, init_status);
            }
        }
        let version = if init_status == PlatformInitStatus::Ok {
            backend.version().to_string()
        } else {
            String::new()
        };
        Platform { name, version, init_status, features, backend, vms: Vec::new() }
    }

    /// The backend's human-readable display name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// The backend's version string; empty until initialization succeeds.
    pub fn get_version(&self) -> &str {
        &self.version
    }

    /// The result of this platform's one-time initialization.
    pub fn get_init_status(&self) -> PlatformInitStatus {
        self.init_status
    }

    /// The capability record populated at initialization time.
    pub fn get_features(&self) -> &Features {
        &self.features
    }

    /// Creates a new VM from `spec`. Returns `None` if the backend rejects
    /// the specification.
    pub fn create_vm(&mut self, spec: VmSpecifications) -> Option<VmHandle> {
        let vm_backend = self.backend.create_vm(&spec)?;
        let vm = VirtualMachine::new(
            spec,
            vm_backend,
            self.features.gpa,
            self.features.large_memory_allocation,
        );
        self.vms.push(Some(vm));
        Some(VmHandle(self.vms.len() - 1))
    }

    /// Releases a VM previously created by this platform. Returns `false`
    /// if `handle` does not name one of this platform's currently live VMs.
    pub fn free_vm(&mut self, handle: VmHandle) -> bool {
        match self.vms.get_mut(handle.0) {
            Some(slot @ Some(_)) => {
                *slot = None;
                debug!("freed VM {}", handle.0);
                true
            }
            _ => false,
        }
    }

    /// Borrows the VM named by `handle`, if it is still live.
    pub fn vm(&self, handle: VmHandle) -> Option<&VirtualMachine> {
        self.vms.get(handle.0).and_then(|v| v.as_ref())
    }

    /// Mutably borrows the VM named by `handle`, if it is still live.
    pub fn vm_mut(&mut self, handle: VmHandle) -> Option<&mut VirtualMachine> {
        self.vms.get_mut(handle.0).and_then(|v| v.as_mut())
    }
}
