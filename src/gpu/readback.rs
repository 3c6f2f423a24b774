//! GPU-to-CPU Pixel Transfer
//!
//! Synchronous rectangle read-back of an 8-bit RGBA texture. The copy pads
//! rows to the 256-byte alignment wgpu requires, blocks on the buffer map,
//! then repacks the rows tightly in bottom-up order (the contract of
//! [`crate::backend::RenderBackend::read_target`]).

use std::sync::mpsc::channel;

use crate::backend::ViewRect;
use crate::error::{CompositorError, Result};

const BYTES_PER_PIXEL: u32 = 4;

pub(super) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rect: ViewRect,
) -> Result<Vec<u8>> {
    let row_bytes = rect.width * BYTES_PER_PIXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let padded = row_bytes.div_ceil(align) * align;
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("pick-readback"),
        size: u64::from(padded) * u64::from(rect.height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("pick-readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d {
                x: rect.left,
                y: rect.top,
                z: 0,
            },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(rect.height),
            },
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit([encoder.finish()]);

    let slice = buffer.slice(..);
    let (sender, receiver) = channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        drop(sender.send(result));
    });
    loop {
        drop(device.poll(wgpu::PollType::wait_indefinitely()));
        if let Ok(result) = receiver.try_recv() {
            result.map_err(|err| CompositorError::ReadBack(err.to_string()))?;
            break;
        }
    }

    let mapped = slice.get_mapped_range();
    let row_bytes = row_bytes as usize;
    let height = rect.height as usize;
    let mut data = vec![0u8; row_bytes * height];
    // The texture is stored top-down; flip while stripping the row padding.
    for row in 0..height {
        let src = row * padded as usize;
        let dst = (height - 1 - row) * row_bytes;
        data[dst..dst + row_bytes].copy_from_slice(&mapped[src..src + row_bytes]);
    }
    drop(mapped);
    buffer.unmap();
    Ok(data)
}
