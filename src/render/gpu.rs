//! WebGPU image backend

use std::sync::Arc;

use tracing::{info, instrument, warn};
use wgpu::*;

use super::backend::{ImageBackend, ImageDescriptor, Pixels};
use super::format::DisplayFormat;
use super::request::FilterMode;
use crate::error::{Error, Result};

/// Display image resident on the GPU
#[derive(Debug)]
pub struct GpuImage {
    pub texture: Texture,
    pub view: TextureView,
    pub sampler: Sampler,
    pub desc: ImageDescriptor,
}

/// Image backend on a headless wgpu device
pub struct WgpuBackend {
    device: Device,
    queue: Queue,
    r16_format: TextureFormat,
    /// Reused for formats that need repacking before upload
    scratch: Vec<u8>,
}

impl WgpuBackend {
    /// Open the preferred adapter without a surface
    #[instrument]
    pub async fn new(power_preference: PowerPreference) -> Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| Error::Backend("no suitable GPU adapter found".into()))?;

        info!("GPU: {}", adapter.get_info().name);

        // 16-bit normalized textures are native-only
        let required_features = adapter.features() & Features::TEXTURE_FORMAT_16BIT_NORM;

        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: Some("streamtex device"),
                    required_features,
                    required_limits: Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        Ok(Self::from_device(device, queue))
    }

    pub fn blocking_new(power_preference: PowerPreference) -> Result<Self> {
        pollster::block_on(Self::new(power_preference))
    }

    /// Use an existing device, e.g. the one a windowed renderer owns
    pub fn from_device(device: Device, queue: Queue) -> Self {
        let r16_format = if device.features().contains(Features::TEXTURE_FORMAT_16BIT_NORM) {
            TextureFormat::R16Unorm
        } else {
            warn!("R16Unorm unavailable, 16-bit images use R16Uint");
            TextureFormat::R16Uint
        };
        Self {
            device,
            queue,
            r16_format,
            scratch: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn texture_format(&self, format: DisplayFormat) -> TextureFormat {
        match format {
            DisplayFormat::R8 => TextureFormat::R8Unorm,
            DisplayFormat::R16 => self.r16_format,
            // No 24-bit texture format exists; rows are expanded on upload
            DisplayFormat::Rgb24 => TextureFormat::Rgba8Unorm,
            DisplayFormat::Rgba32 => TextureFormat::Rgba8Unorm,
            DisplayFormat::Bgra32 => TextureFormat::Bgra8Unorm,
        }
    }

    fn check_errors(&self, fail: impl FnOnce(String) -> Error) -> Result<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(fail(err.to_string())),
            None => Ok(()),
        }
    }
}

impl ImageBackend for WgpuBackend {
    type Image = Arc<GpuImage>;

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<Self::Image> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(Error::Backend(format!(
                "cannot create {}x{} texture (limit {max})",
                desc.width, desc.height
            )));
        }

        self.device.push_error_scope(ErrorFilter::Validation);
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some("Stream Texture"),
            size: Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: self.texture_format(desc.format),
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        let filter = match desc.filter {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let sampler = self.device.create_sampler(&SamplerDescriptor {
            label: Some("Stream Sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            mag_filter: filter,
            min_filter: filter,
            ..Default::default()
        });
        self.check_errors(Error::Backend)?;

        Ok(Arc::new(GpuImage {
            texture,
            view,
            sampler,
            desc: *desc,
        }))
    }

    fn destroy_image(&mut self, image: Self::Image) {
        image.texture.destroy();
    }

    fn upload(&mut self, image: &Self::Image, pixels: Pixels<'_>) -> Result<()> {
        let desc = image.desc;
        pixels.check(&desc)?;

        let (data, bytes_per_row) = match desc.format {
            DisplayFormat::Rgb24 => {
                self.scratch.clear();
                self.scratch.reserve(desc.width as usize * desc.height as usize * 4);
                for row in pixels.rows(desc.format.row_bytes(desc.width)) {
                    for rgb in row.chunks_exact(3) {
                        self.scratch.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
                    }
                }
                (&self.scratch[..], 4 * desc.width)
            }
            _ => (pixels.data, pixels.stride as u32),
        };

        self.device.push_error_scope(ErrorFilter::Validation);
        self.queue.write_texture(
            ImageCopyTexture {
                texture: &image.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            data,
            ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.check_errors(|reason| Error::UploadFailure {
            width: desc.width,
            height: desc.height,
            reason,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.queue.submit(std::iter::empty());
        Ok(())
    }
}
