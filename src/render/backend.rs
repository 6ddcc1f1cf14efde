//! Display image backends

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::format::DisplayFormat;
use super::request::FilterMode;
use crate::error::{Error, Result};

/// Shape and sampling of a display image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: DisplayFormat,
    pub filter: FilterMode,
}

/// Borrowed pixel rows about to be uploaded
#[derive(Debug, Clone, Copy)]
pub struct Pixels<'a> {
    pub data: &'a [u8],
    /// Bytes per row in `data`, may exceed the packed row size
    pub stride: usize,
    pub width: u32,
    pub height: u32,
}

impl Pixels<'_> {
    /// Reject pixels that do not describe exactly one image of `desc`
    pub fn check(&self, desc: &ImageDescriptor) -> Result<()> {
        let fail = |reason: String| Error::UploadFailure {
            width: desc.width,
            height: desc.height,
            reason,
        };
        if self.width != desc.width || self.height != desc.height {
            return Err(fail(format!("pixels are {}x{}", self.width, self.height)));
        }
        let row = desc.format.row_bytes(desc.width);
        if self.stride < row {
            return Err(fail(format!("stride {} is shorter than a row of {row} bytes", self.stride)));
        }
        let expected = self.stride * self.height as usize;
        if self.data.len() != expected {
            return Err(fail(format!("{} bytes staged, {expected} expected", self.data.len())));
        }
        Ok(())
    }

    /// Iterate over the packed portion of each row
    pub fn rows(&self, row_bytes: usize) -> impl Iterator<Item = &[u8]> + '_ {
        self.data
            .chunks(self.stride)
            .take(self.height as usize)
            .map(move |row| &row[..row_bytes])
    }
}

/// Allocates display images and uploads pixels into them.
///
/// All methods are called from the render thread only.
pub trait ImageBackend {
    /// Handle given to consumers when an image is bound
    type Image: Clone;

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<Self::Image>;

    fn destroy_image(&mut self, image: Self::Image);

    fn upload(&mut self, image: &Self::Image, pixels: Pixels<'_>) -> Result<()>;

    /// Make queued uploads visible to the display
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// CPU-resident image with tightly packed rows
#[derive(Debug)]
pub struct MemoryImage {
    id: u64,
    desc: ImageDescriptor,
    pixels: Mutex<Vec<u8>>,
    uploads: AtomicU64,
    destroyed: AtomicBool,
}

impl MemoryImage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.desc
    }

    pub fn pixels(&self) -> Vec<u8> {
        self.pixels.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::Relaxed)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

/// Backend keeping images in system memory. Used headless and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    next_id: u64,
    live: usize,
    created: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images created and not yet destroyed
    pub fn live_images(&self) -> usize {
        self.live
    }

    pub fn images_created(&self) -> u64 {
        self.created
    }
}

impl ImageBackend for MemoryBackend {
    type Image = Arc<MemoryImage>;

    fn create_image(&mut self, desc: &ImageDescriptor) -> Result<Self::Image> {
        if desc.width == 0 || desc.height == 0 {
            return Err(Error::Backend(format!(
                "cannot create {}x{} image",
                desc.width, desc.height
            )));
        }
        self.next_id += 1;
        self.live += 1;
        self.created += 1;
        let len = desc.format.row_bytes(desc.width) * desc.height as usize;
        debug!(id = self.next_id, ?desc, "Memory image created");
        Ok(Arc::new(MemoryImage {
            id: self.next_id,
            desc: *desc,
            pixels: Mutex::new(vec![0; len]),
            uploads: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }))
    }

    fn destroy_image(&mut self, image: Self::Image) {
        if !image.destroyed.swap(true, Ordering::AcqRel) {
            self.live -= 1;
        }
    }

    fn upload(&mut self, image: &Self::Image, pixels: Pixels<'_>) -> Result<()> {
        if image.is_destroyed() {
            return Err(Error::Backend(format!("image {} was destroyed", image.id)));
        }
        pixels.check(&image.desc)?;

        let row = image.desc.format.row_bytes(image.desc.width);
        let mut target = image.pixels.lock().unwrap_or_else(PoisonError::into_inner);
        for (dst, src) in target.chunks_mut(row).zip(pixels.rows(row)) {
            dst.copy_from_slice(src);
        }
        image.uploads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(width: u32, height: u32) -> ImageDescriptor {
        ImageDescriptor {
            width,
            height,
            format: DisplayFormat::R16,
            filter: FilterMode::Nearest,
        }
    }

    #[test]
    fn upload_compacts_padded_rows() {
        let mut backend = MemoryBackend::new();
        let image = backend.create_image(&desc(2, 2)).unwrap();

        // 4 bytes of pixels + 2 bytes of padding per row
        let data = [1, 2, 3, 4, 0xAA, 0xAA, 5, 6, 7, 8, 0xAA, 0xAA];
        let pixels = Pixels {
            data: &data,
            stride: 6,
            width: 2,
            height: 2,
        };
        backend.upload(&image, pixels).unwrap();

        assert_eq!(image.pixels(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(image.upload_count(), 1);
    }

    #[test]
    fn wrong_byte_count_is_an_upload_failure() {
        let mut backend = MemoryBackend::new();
        let image = backend.create_image(&desc(2, 2)).unwrap();
        let data = [0u8; 7];
        let pixels = Pixels {
            data: &data,
            stride: 4,
            width: 2,
            height: 2,
        };
        let err = backend.upload(&image, pixels).unwrap_err();
        assert!(matches!(err, Error::UploadFailure { .. }), "{err}");
    }

    #[test]
    fn wrong_dimensions_are_an_upload_failure() {
        let mut backend = MemoryBackend::new();
        let image = backend.create_image(&desc(2, 2)).unwrap();
        let data = [0u8; 12];
        let pixels = Pixels {
            data: &data,
            stride: 4,
            width: 2,
            height: 3,
        };
        assert!(matches!(
            backend.upload(&image, pixels),
            Err(Error::UploadFailure { .. })
        ));
    }

    #[test]
    fn destroy_releases_image() {
        let mut backend = MemoryBackend::new();
        let image = backend.create_image(&desc(2, 2)).unwrap();
        assert_eq!(backend.live_images(), 1);

        backend.destroy_image(image.clone());
        assert_eq!(backend.live_images(), 0);
        assert!(image.is_destroyed());

        let data = [0u8; 8];
        let pixels = Pixels {
            data: &data,
            stride: 4,
            width: 2,
            height: 2,
        };
        assert!(backend.upload(&image, pixels).is_err());
    }

    #[test]
    fn zero_sized_images_are_refused() {
        let mut backend = MemoryBackend::new();
        assert!(backend.create_image(&desc(0, 480)).is_err());
    }
}
