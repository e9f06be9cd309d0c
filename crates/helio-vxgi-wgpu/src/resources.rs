//! Handle registry for the buffers and textures the cache allocates

use std::collections::HashMap;

use helio_vxgi::{BufferHandle, BufferKind, Error, Result, TextureDesc, TextureFormat, TextureHandle};

pub(crate) struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub kind: BufferKind,
}

pub(crate) struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub desc: TextureDesc,
}

#[derive(Default)]
pub(crate) struct ResourceRegistry {
    buffers: HashMap<BufferHandle, GpuBuffer>,
    textures: HashMap<TextureHandle, GpuTexture>,
}

impl ResourceRegistry {
    pub fn insert_buffer(&mut self, label: &str, buffer: GpuBuffer) -> BufferHandle {
        let id = BufferHandle::next();
        log::debug!("Created buffer '{}' ({} bytes) with id {:?}", label, buffer.buffer.size(), id);
        self.buffers.insert(id, buffer);
        id
    }

    pub fn insert_texture(&mut self, texture: GpuTexture) -> TextureHandle {
        let id = TextureHandle::next();
        log::debug!("Created texture '{}' {:?} with id {:?}", texture.desc.label, texture.desc.extent, id);
        self.textures.insert(id, texture);
        id
    }

    pub fn buffer(&self, id: BufferHandle) -> Result<&GpuBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", id)))
    }

    pub fn texture(&self, id: TextureHandle) -> Result<&GpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| Error::UnknownResource(format!("{:?}", id)))
    }

    pub fn remove_buffer(&mut self, id: BufferHandle) -> Option<GpuBuffer> {
        self.buffers.remove(&id)
    }

    pub fn remove_texture(&mut self, id: TextureHandle) -> Option<GpuTexture> {
        self.textures.remove(&id)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }
}

pub(crate) fn buffer_usage(kind: BufferKind) -> wgpu::BufferUsages {
    let base = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    match kind {
        BufferKind::IndirectArgs => base | wgpu::BufferUsages::INDIRECT,
        _ => base,
    }
}

pub(crate) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

pub(crate) fn align_to(val: u64, alignment: u64) -> u64 {
    (val + alignment - 1) / alignment * alignment
}
