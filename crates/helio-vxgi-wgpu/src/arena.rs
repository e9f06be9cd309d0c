//! Per-submission uniform arena.
//!
//! `queue.write_buffer` lands before the next submit, so two dispatches in one
//! encoder cannot share a parameter buffer. Every recorded kernel gets its own
//! aligned slot instead and binds it with a dynamic offset. When the arena
//! runs out the backend submits what it has and starts over.

use bytemuck::Pod;

/// Largest parameter block any kernel binds
const MAX_PARAM_SIZE: u64 = 256;

pub(crate) struct ParamArena {
    buffer: wgpu::Buffer,
    stride: u64,
    slots: u32,
    next: u32,
}

impl ParamArena {
    pub fn new(device: &wgpu::Device, slots: u32) -> Self {
        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let stride = crate::resources::align_to(MAX_PARAM_SIZE, align);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vxgi_param_arena"),
            size: stride * slots as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self { buffer, stride, slots, next: 0 }
    }

    /// Stage `value` in the next free slot, returning its dynamic offset
    pub fn push<T: Pod>(&mut self, queue: &wgpu::Queue, value: &T) -> Option<u32> {
        debug_assert!(std::mem::size_of::<T>() as u64 <= MAX_PARAM_SIZE);
        if self.next >= self.slots {
            return None;
        }
        let offset = self.next as u64 * self.stride;
        queue.write_buffer(&self.buffer, offset, bytemuck::bytes_of(value));
        self.next += 1;
        Some(offset as u32)
    }

    /// Binding of one `T`-sized slot; the offset is supplied at bind time
    pub fn binding<T: Pod>(&self) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: wgpu::BufferSize::new(std::mem::size_of::<T>() as u64),
        })
    }

    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn used(&self) -> u32 {
        self.next
    }
}
