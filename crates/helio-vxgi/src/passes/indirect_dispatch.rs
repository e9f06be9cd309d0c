//! GPU-side dispatch sizing.
//!
//! The fragment count is only known once voxelization has run on the GPU.
//! The Parameterize kernel turns the counter into indirect dispatch
//! arguments so the consumer launches exactly enough groups without a
//! CPU readback.

use crate::backend::{BackendCapabilities, BufferDesc, BufferHandle, BufferKind, ComputeKernel, GpuBackend};
use crate::kernels::{group_count, KernelId};
use crate::uniforms::{DispatchIndirectArgs, DispatchParams};
use crate::{Error, Result};

/// Dispatch arguments covering `count` threads in groups of `group_size`.
///
/// Always at least one group. Counts beyond `max_groups` groups spill into Y;
/// consumers linearize `(x, y)` and guard against the real count.
pub fn indirect_args(count: u32, group_size: u32, max_groups: u32) -> DispatchIndirectArgs {
    let max_groups = max_groups.max(1);
    let groups = group_count(count, group_size).max(1);
    if groups <= max_groups {
        DispatchIndirectArgs { x: groups, y: 1, z: 1 }
    } else {
        DispatchIndirectArgs { x: max_groups, y: groups.div_ceil(max_groups), z: 1 }
    }
}

pub struct DispatchSizer {
    args: Option<BufferHandle>,
    indirect: bool,
    max_groups: u32,
}

impl DispatchSizer {
    pub fn new() -> Self {
        Self { args: None, indirect: true, max_groups: 65535 }
    }

    pub fn allocate<B: GpuBackend + ?Sized>(&mut self, backend: &mut B, capabilities: &BackendCapabilities) -> Result<()> {
        self.indirect = capabilities.supports_indirect_dispatch;
        self.max_groups = capabilities.max_workgroups_per_dimension;
        if self.indirect {
            let args = backend.allocate_buffer(&BufferDesc {
                label: "VXGI Indirect Args".into(),
                kind: BufferKind::IndirectArgs,
            })?;
            self.args = Some(args);
        } else {
            log::info!("Indirect dispatch unsupported, sizing fragment dispatches by capacity");
        }
        Ok(())
    }

    pub fn release<B: GpuBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(args) = self.args.take() {
            backend.release_buffer(args);
        }
    }

    pub fn uses_indirect(&self) -> bool {
        self.indirect
    }

    pub fn args_buffer(&self) -> Option<BufferHandle> {
        self.args
    }

    /// Launch `kernel` over the first `counter` elements (at most `capacity`).
    pub fn dispatch_counted<B: GpuBackend + ?Sized>(
        &self,
        backend: &mut B,
        counter: BufferHandle,
        capacity: u32,
        kernel: &ComputeKernel,
    ) -> Result<()> {
        let group_size = kernel.id().workgroup_size()[0];

        if !self.indirect {
            let args = indirect_args(capacity, group_size, self.max_groups);
            return backend.dispatch(kernel, [args.x, args.y, args.z]);
        }

        let args = self
            .args
            .ok_or_else(|| Error::Backend("dispatch sizer used before allocation".into()))?;
        let parameterize = ComputeKernel::Parameterize {
            counter,
            args,
            params: DispatchParams { group_size, max_groups: self.max_groups, capacity, _pad: 0 },
        };
        debug_assert_eq!(parameterize.id(), KernelId::Parameterize);
        backend.dispatch(&parameterize, [1, 1, 1])?;
        backend.dispatch_indirect(kernel, args, 0)
    }
}

impl Default for DispatchSizer {
    fn default() -> Self {
        Self::new()
    }
}
