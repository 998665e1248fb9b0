// gpu.rs -- opaque GPU resource capability
//
// The renderer-resource layer never talks to a graphics API directly;
// it asks a backend for texture and program handles and hands them
// back when resources die. Device setup, samplers, and draw submission
// live entirely behind this trait.

/// Backend texture identifier. Zero is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Backend shader program identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 3 bytes per pixel, opaque
    Rgb8,
    /// 4 bytes per pixel
    Rgba8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgb8 => 3,
            TextureFormat::Rgba8 => 4,
        }
    }
}

pub trait GpuBackend {
    /// Create a 2D texture from tightly packed pixel rows.
    /// `pixels.len()` must equal `width * height * format.bytes_per_pixel()`.
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> TextureHandle;

    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Link a program from compiled vertex and fragment shader blobs.
    fn create_program(&mut self, vertex: &[u8], fragment: &[u8]) -> ProgramHandle;

    fn destroy_program(&mut self, handle: ProgramHandle);
}

/// A linked shader program. Holds the backend handle until explicitly
/// destroyed; programs outlive registration sequences, so nothing here
/// is stamped.
pub struct ShaderProgram {
    handle: ProgramHandle,
}

impl ShaderProgram {
    pub fn new(gpu: &mut dyn GpuBackend, vertex: &[u8], fragment: &[u8]) -> Self {
        ShaderProgram {
            handle: gpu.create_program(vertex, fragment),
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn destroy(self, gpu: &mut dyn GpuBackend) {
        gpu.destroy_program(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingGpu;

    #[test]
    fn test_format_bytes_per_pixel() {
        assert_eq!(TextureFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(TextureFormat::Rgba8.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_shader_program_lifecycle() {
        let mut gpu = RecordingGpu::new();
        let prog = ShaderProgram::new(&mut gpu, b"vs blob", b"fs blob");
        assert_eq!(gpu.programs_created, 1);

        let handle = prog.handle();
        prog.destroy(&mut gpu);
        assert_eq!(gpu.programs_destroyed, vec![handle]);
    }
}
