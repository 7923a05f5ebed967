// Copyright 2018-2019 CrowdStrike, Inc.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The status/error sum types shared across the core. Each category is its
//! own type; none of them unify, and none of them wrap a lower-level source
//! error, since a backend's failure is reported only as whichever one of
//! these variants best categorizes it, never with synthesized detail the
//! backend did not provide.

use thiserror::Error;

/// Result of [`crate::platform::Platform`] initialization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum PlatformInitStatus {
    /// Initialization has not yet run.
    #[error("platform not yet initialized")]
    Uninitialized,
    /// Initialization completed and the platform is usable.
    #[error("platform initialized")]
    Ok,
    /// The backend is not present on this host (e.g. kernel module absent).
    #[error("platform unavailable on this host")]
    Unavailable,
    /// The backend is present but this host/CPU does not support it.
    #[error("platform unsupported on this host")]
    Unsupported,
    /// Initialization was attempted and the backend reported an error.
    #[error("platform initialization failed")]
    Failed,
}

/// Result of a guest-memory mapping operation (map / unmap / protect /
/// dirty-page query / dirty-page clear).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum MemoryMappingStatus {
    /// The operation completed successfully.
    #[error("memory operation succeeded")]
    Ok,
    /// The backend does not implement this operation.
    #[error("memory operation unsupported by backend")]
    Unsupported,
    /// The host memory pointer is not page-aligned.
    #[error("host memory pointer is misaligned")]
    MisalignedHostMemory,
    /// The guest-physical base address is not page-aligned.
    #[error("guest-physical base address is misaligned")]
    MisalignedAddress,
    /// The region size is not a multiple of the page size.
    #[error("region size is misaligned")]
    MisalignedSize,
    /// The region size is zero.
    #[error("region size is empty")]
    EmptyRange,
    /// The backend does not support unmapping part of a previously mapped
    /// region.
    #[error("partial unmap is unsupported by backend")]
    PartialUnmapUnsupported,
    /// The region is already fully mapped (used by backends that reject
    /// re-mapping without an intervening unmap).
    #[error("region already mapped")]
    AlreadyAllocated,
    /// The requested memory flags are not a valid combination.
    #[error("invalid memory flags")]
    InvalidFlags,
    /// The requested range is invalid (e.g. end precedes start).
    #[error("invalid memory range")]
    InvalidRange,
    /// The backend attempted and failed the operation.
    #[error("memory operation failed")]
    Failed,
    /// The range falls outside the host's guest-physical address mask.
    #[error("range is out of bounds of the guest-physical address space")]
    OutOfBounds,
}

/// Result of a VCPU register/state operation (not execution itself).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum VpOperationStatus {
    /// The operation completed successfully.
    #[error("operation succeeded")]
    Ok,
    /// The backend attempted and failed the operation.
    #[error("operation failed")]
    Failed,
    /// One or more arguments were invalid.
    #[error("invalid arguments")]
    InvalidArguments,
    /// A selector was out of bounds of its descriptor table.
    #[error("invalid selector")]
    InvalidSelector,
    /// A register name was not recognized, or not addressable this way.
    #[error("invalid register")]
    InvalidRegister,
    /// A requested hardware breakpoint address was never hit.
    #[error("breakpoint was never hit")]
    BreakpointNeverHit,
    /// The backend does not implement this operation.
    #[error("operation unsupported by backend")]
    Unsupported,
}

/// Result of [`crate::vcpu::VirtualProcessor::run`] / `step`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum VpExecutionStatus {
    /// The guest ran and exited normally; consult the stored exit info.
    #[error("execution succeeded")]
    Ok,
    /// The backend failed to execute the guest.
    #[error("execution failed")]
    Failed,
    /// The backend does not implement this operation (e.g. `step` without
    /// guest-debugging support).
    #[error("execution unsupported by backend")]
    Unsupported,
}
