// testutil.rs -- shared test doubles and fixtures

use crate::gpu::{GpuBackend, ProgramHandle, TextureFormat, TextureHandle};
use crate::RenderConfig;
use anox_common::qfiles::{PCX_HEADER_SIZE, PCX_PALETTE_SIZE};

/// Config with identity gamma/intensity so uploaded bytes are
/// predictable in assertions.
pub fn test_config() -> RenderConfig {
    RenderConfig {
        gamma: 1.0,
        intensity: 1.0,
        ..RenderConfig::default()
    }
}

pub struct UploadRecord {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub pixels: Vec<u8>,
}

/// GPU backend that records every call and hands out sequential
/// handles.
pub struct RecordingGpu {
    next: u32,
    pub textures_created: u32,
    pub textures_destroyed: Vec<TextureHandle>,
    pub uploads: Vec<UploadRecord>,
    pub programs_created: u32,
    pub programs_destroyed: Vec<ProgramHandle>,
}

impl RecordingGpu {
    pub fn new() -> Self {
        RecordingGpu {
            next: 0,
            textures_created: 0,
            textures_destroyed: Vec::new(),
            uploads: Vec::new(),
            programs_created: 0,
            programs_destroyed: Vec::new(),
        }
    }

    pub fn last_upload(&self) -> &UploadRecord {
        self.uploads.last().expect("no upload recorded")
    }
}

impl GpuBackend for RecordingGpu {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> TextureHandle {
        assert_eq!(
            pixels.len(),
            width as usize * height as usize * format.bytes_per_pixel(),
            "upload size mismatch"
        );
        self.next += 1;
        self.textures_created += 1;
        self.uploads.push(UploadRecord {
            width,
            height,
            format,
            pixels: pixels.to_vec(),
        });
        TextureHandle(self.next)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.textures_destroyed.push(handle);
    }

    fn create_program(&mut self, _vertex: &[u8], _fragment: &[u8]) -> ProgramHandle {
        self.next += 1;
        self.programs_created += 1;
        ProgramHandle(self.next)
    }

    fn destroy_program(&mut self, handle: ProgramHandle) {
        self.programs_destroyed.push(handle);
    }
}

/// A valid 1x1 colormap pcx whose palette entry i has r = i, g = b = 0.
/// Entry 0 is therefore opaque black.
pub fn colormap_pcx() -> Vec<u8> {
    let mut buf = vec![0u8; PCX_HEADER_SIZE];
    buf[0] = 0x0a; // manufacturer
    buf[1] = 5; // version
    buf[2] = 1; // encoding
    buf[3] = 8; // bits_per_pixel
    // xmin/ymin/xmax/ymax all zero -> 1x1

    buf.push(0); // the single pixel

    let mut palette = [0u8; PCX_PALETTE_SIZE];
    for i in 0..256 {
        palette[i * 3] = i as u8;
    }
    buf.extend_from_slice(&palette);
    buf
}
