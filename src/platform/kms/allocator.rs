// src/platform/kms/allocator.rs

use crate::error::{RendererError, Result};
use crate::platform::{BufferAllocator, BufferDescriptor, ScanoutBuffer};

use drm::buffer::DrmFourcc;
use gbm::{AsRaw, BufferObject, BufferObjectFlags, Device as GbmDevice, Surface};
use log::{debug, info, trace};
use std::ffi::c_void;
use std::fs::File;

const FORMAT: DrmFourcc = DrmFourcc::Xrgb8888;

/// A buffer object locked out of the GBM surface. Dropping it hands it back
/// to the surface.
pub struct GbmBuffer {
    bo: BufferObject<()>,
    descriptor: BufferDescriptor,
}

impl ScanoutBuffer for GbmBuffer {
    fn descriptor(&self) -> BufferDescriptor {
        self.descriptor
    }
}

/// GBM device plus one scanout-capable, renderable surface sized to the mode.
///
/// Field order is the teardown order: surface, then device.
pub struct GbmAllocator {
    surface: Surface<()>,
    device: GbmDevice<File>,
    width: u32,
    height: u32,
}

impl GbmAllocator {
    /// Builds the device on `device_file`, a descriptor for the controller
    /// node that the allocator takes ownership of.
    pub fn create(device_file: File, width: u32, height: u32) -> Result<Self> {
        let device = GbmDevice::new(device_file).map_err(RendererError::AllocatorInitFailed)?;
        debug!("GbmAllocator: backend {:?}", device.backend_name());

        let usage = BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING;
        let surface = device
            .create_surface::<()>(width, height, FORMAT, usage)
            .map_err(|source| RendererError::SurfaceCreateFailed {
                width,
                height,
                source,
            })?;

        info!(
            "GbmAllocator: {}x{} {:?} surface ({:?})",
            width, height, FORMAT, usage
        );
        Ok(Self {
            surface,
            device,
            width,
            height,
        })
    }

    /// Native display handle for the rendering context.
    pub(crate) fn raw_device(&self) -> *mut c_void {
        self.device.as_raw() as *mut c_void
    }

    /// Native window handle for the rendering context.
    pub(crate) fn raw_surface(&self) -> *mut c_void {
        self.surface.as_raw() as *mut c_void
    }
}

impl BufferAllocator for GbmAllocator {
    type Buffer = GbmBuffer;

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn lock_front_buffer(&mut self) -> Option<GbmBuffer> {
        // SAFETY: only called after a buffer swap on the surface's context.
        let bo = match unsafe { self.surface.lock_front_buffer() } {
            Ok(bo) => bo,
            Err(e) => {
                debug!("GbmAllocator: no front buffer: {}", e);
                return None;
            }
        };
        // SAFETY: the DRM backend stores the GEM handle in the 32-bit member.
        let handle = unsafe { bo.handle().u32_ };
        let stride = bo.stride();
        trace!("GbmAllocator: locked bo (handle {}, stride {})", handle, stride);
        Some(GbmBuffer {
            bo,
            descriptor: BufferDescriptor {
                width: self.width,
                height: self.height,
                format: FORMAT,
                handle,
                stride,
            },
        })
    }

    fn release_buffer(&mut self, buffer: GbmBuffer) {
        trace!("GbmAllocator: releasing bo handle {}", buffer.descriptor.handle);
        drop(buffer.bo);
    }
}

impl Drop for GbmAllocator {
    fn drop(&mut self) {
        debug!("GbmAllocator: destroying surface and device");
    }
}
