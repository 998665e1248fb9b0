// image_cache.rs -- image/texture loading and management
//
// The cache owns every GPU texture the asset layer creates. Images are
// deduplicated by their requested name (case-sensitive); whatever
// format candidate actually decoded is an implementation detail. All
// state lives in the ImageCache value -- construct one at renderer
// init, drop it at shutdown.

use anox_common::error::{DropError, DropResult};
use anox_common::files::FileSystem;
use anox_common::q_shared::MAX_QPATH;
use anox_common::qfiles::{pcx_decode, PCX_PALETTE_SIZE};
use log::warn;
use rayon::prelude::*;

use crate::gpu::{GpuBackend, TextureFormat, TextureHandle};
use crate::RenderConfig;

pub const MAX_IMAGES: usize = 1024;

/// Textures never upload larger than this on either axis.
pub const MAX_UPLOAD_DIM: i32 = 256;

// ============================================================
// Image records
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// 2D UI picture; never resampled down, never evicted
    Pic,
    Sky,
    Wall,
    Skin,
    Sprite,
    Particle,
}

impl ImageKind {
    /// Tiled kinds go through the full sizing policy (round-down,
    /// picmip) and gamma/intensity scaling; UI pics and sky do not.
    pub fn mipmapped(self) -> bool {
        !matches!(self, ImageKind::Pic | ImageKind::Sky)
    }

    fn list_letter(self) -> char {
        match self {
            ImageKind::Skin => 'M',
            ImageKind::Sprite => 'S',
            ImageKind::Wall => 'W',
            ImageKind::Pic => 'P',
            _ => ' ',
        }
    }
}

/// Slot index into the cache. Stable for the lifetime of the image;
/// slots are recycled after eviction, so ids must not be held across
/// `end_registration` for images that were not touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(pub(crate) u32);

#[derive(Debug)]
pub struct Image {
    /// game path as requested, including extension
    pub name: String,
    pub kind: ImageKind,
    /// source dimensions
    pub width: i32,
    pub height: i32,
    /// after power of two and picmip
    pub upload_width: i32,
    pub upload_height: i32,
    pub has_alpha: bool,
    pub texture: TextureHandle,
    pub registration_sequence: i32,
}

/// Pixels decoded off the GPU thread, waiting for upload.
struct DecodedPixels {
    pixels: Vec<u8>,
    width: i32,
    height: i32,
    /// 8 for palette-indexed, 32 for RGBA
    bits: i32,
}

/// Palette entry as four memory bytes r,g,b,a packed native-endian, so
/// byte views of a staging buffer always read r,g,b,a in order.
fn palette_entry(r: u8, g: u8, b: u8, a: u8) -> u32 {
    u32::from_ne_bytes([r, g, b, a])
}

// ============================================================
// The cache
// ============================================================

pub struct ImageCache {
    slots: Vec<Option<Image>>,
    registration_sequence: i32,

    /// 256-entry palette, rgba byte order in memory
    palette: [u32; 256],
    gammatable: [u8; 256],
    intensitytable: [u8; 256],

    round_down: bool,
    picmip: i32,

    notexture: ImageId,
    particle: ImageId,
}

impl ImageCache {
    /// Build the cache: palette from graphics/colormap.pcx (fatal if
    /// missing), gamma/intensity tables from config, and the generated
    /// reserved textures.
    pub fn init(
        fs: &dyn FileSystem,
        gpu: &mut dyn GpuBackend,
        config: &RenderConfig,
    ) -> DropResult<ImageCache> {
        let palette = load_palette(fs)?;

        let g = config.gamma;
        let intensity = config.intensity.max(1.0);

        let mut gammatable = [0u8; 256];
        let mut intensitytable = [0u8; 256];
        for i in 0..256 {
            if g == 1.0 {
                gammatable[i] = i as u8;
            } else {
                let inf = (255.0 * ((i as f32 + 0.5) / 255.5).powf(g) + 0.5) as i32;
                gammatable[i] = inf.clamp(0, 255) as u8;
            }
            intensitytable[i] = ((i as f32 * intensity) as i32).min(255) as u8;
        }

        let mut cache = ImageCache {
            slots: Vec::new(),
            registration_sequence: 1,
            palette,
            gammatable,
            intensitytable,
            round_down: config.round_down,
            picmip: config.picmip.max(0),
            notexture: ImageId(0),
            particle: ImageId(0),
        };

        cache.notexture = cache.load_pic(
            gpu,
            "***r_notexture***",
            &notexture_pixels(),
            16,
            16,
            ImageKind::Wall,
            32,
        )?;
        cache.particle = cache.load_pic(
            gpu,
            "***particle***",
            &particle_pixels(),
            16,
            16,
            ImageKind::Particle,
            32,
        )?;

        Ok(cache)
    }

    pub fn registration_sequence(&self) -> i32 {
        self.registration_sequence
    }

    pub fn set_registration_sequence(&mut self, seq: i32) {
        self.registration_sequence = seq;
    }

    /// The reserved placeholder substituted for unresolvable textures.
    pub fn notexture(&self) -> ImageId {
        self.notexture
    }

    pub fn particle(&self) -> ImageId {
        self.particle
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.slots.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    /// Stamp an image as referenced by the current sequence.
    pub fn touch(&mut self, id: ImageId) {
        if let Some(img) = self.slots.get_mut(id.0 as usize).and_then(|s| s.as_mut()) {
            img.registration_sequence = self.registration_sequence;
        }
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn lookup_touch(&mut self, name: &str) -> Option<ImageId> {
        let seq = self.registration_sequence;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(img) = slot {
                if img.name == name {
                    img.registration_sequence = seq;
                    return Some(ImageId(i as u32));
                }
            }
        }
        None
    }

    // ============================================================
    // Find or load
    // ============================================================

    /// Find or load an image. A name that resolves to no file in any
    /// candidate format is not an error: one warning, `Ok(None)`, and
    /// nothing is cached. A present 32-bpp file the decoder rejects is
    /// fatal; a malformed pcx is discarded and treated as absent.
    pub fn find_image(
        &mut self,
        fs: &dyn FileSystem,
        gpu: &mut dyn GpuBackend,
        name: &str,
        kind: ImageKind,
    ) -> DropResult<Option<ImageId>> {
        if name.len() < 5 {
            // too short to carry "x.ext"
            return Ok(None);
        }

        if let Some(id) = self.lookup_touch(name) {
            return Ok(Some(id));
        }

        match decode_candidates(fs, name)? {
            Some(decoded) => {
                let id = self.load_pic(
                    gpu,
                    name,
                    &decoded.pixels,
                    decoded.width,
                    decoded.height,
                    kind,
                    decoded.bits,
                )?;
                Ok(Some(id))
            }
            None => {
                warn!("couldn't find image {}", name);
                Ok(None)
            }
        }
    }

    pub fn register_skin(
        &mut self,
        fs: &dyn FileSystem,
        gpu: &mut dyn GpuBackend,
        name: &str,
    ) -> DropResult<Option<ImageId>> {
        self.find_image(fs, gpu, name, ImageKind::Skin)
    }

    /// Batch lookup/load for map textures: cache hits first, then the
    /// misses are decoded in parallel and uploaded in order. Results
    /// line up with `names`; a `None` hole is an unresolvable name.
    pub fn batch_find_images(
        &mut self,
        fs: &dyn FileSystem,
        gpu: &mut dyn GpuBackend,
        names: &[String],
        kind: ImageKind,
    ) -> DropResult<Vec<Option<ImageId>>> {
        let mut results: Vec<Option<ImageId>> = vec![None; names.len()];
        let mut to_load: Vec<usize> = Vec::new();

        for (i, name) in names.iter().enumerate() {
            if name.len() < 5 {
                continue;
            }
            match self.lookup_touch(name) {
                Some(id) => results[i] = Some(id),
                None => to_load.push(i),
            }
        }

        if to_load.is_empty() {
            return Ok(results);
        }

        // CPU decode in parallel; the cache is untouched until the
        // sequential upload pass below.
        let decoded: Vec<DropResult<Option<DecodedPixels>>> = to_load
            .par_iter()
            .map(|&i| decode_candidates(fs, &names[i]))
            .collect();

        for (&i, dec) in to_load.iter().zip(decoded) {
            match dec? {
                Some(d) => {
                    let id =
                        self.load_pic(gpu, &names[i], &d.pixels, d.width, d.height, kind, d.bits)?;
                    results[i] = Some(id);
                }
                None => warn!("couldn't find image {}", names[i]),
            }
        }

        Ok(results)
    }

    // ============================================================
    // Load decoded pixels
    // ============================================================

    /// Build and upload an image from already-decoded pixels. This is
    /// also the entry point for the generated reserved textures.
    pub fn load_pic(
        &mut self,
        gpu: &mut dyn GpuBackend,
        name: &str,
        pic: &[u8],
        width: i32,
        height: i32,
        kind: ImageKind,
        bits: i32,
    ) -> DropResult<ImageId> {
        if name.len() >= MAX_QPATH {
            return Err(DropError::new(format!("load_pic: \"{}\" is too long", name)));
        }
        if width < 1 || height < 1 {
            return Err(DropError::new(format!(
                "load_pic: {} has bad dimensions {}x{}",
                name, width, height
            )));
        }
        let expected = width as usize * height as usize * if bits == 8 { 1 } else { 4 };
        if pic.len() < expected {
            return Err(DropError::new(format!(
                "load_pic: {} pixel data too short ({} < {})",
                name,
                pic.len(),
                expected
            )));
        }

        let slot = match self.slots.iter().position(|s| s.is_none()) {
            Some(i) => i,
            None => {
                if self.slots.len() == MAX_IMAGES {
                    return Err(DropError::new("MAX_IMAGES"));
                }
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        let mipmap = kind.mipmapped();

        let (texture, upload_width, upload_height, has_alpha) = if bits == 8 {
            let mut indexed = pic[..expected].to_vec();
            if kind == ImageKind::Skin {
                self.flood_fill_skin(&mut indexed, width, height);
            }
            self.upload8(gpu, &indexed, width, height, mipmap)
        } else {
            self.upload32(gpu, &pic[..expected], width, height, mipmap)
        };

        self.slots[slot] = Some(Image {
            name: name.to_string(),
            kind,
            width,
            height,
            upload_width,
            upload_height,
            has_alpha,
            texture,
            registration_sequence: self.registration_sequence,
        });

        Ok(ImageId(slot as u32))
    }

    // ============================================================
    // Upload paths
    // ============================================================

    /// Expand 8-bit indexed pixels through the palette and upload.
    /// Index 255 is transparent; its RGB is replaced by a neighboring
    /// opaque color so filtering does not bleed fringes.
    fn upload8(
        &self,
        gpu: &mut dyn GpuBackend,
        data: &[u8],
        width: i32,
        height: i32,
        mipmap: bool,
    ) -> (TextureHandle, i32, i32, bool) {
        let s = width as usize * height as usize;
        let w = width as usize;
        let mut trans = vec![0u32; s];

        for i in 0..s {
            let p = data[i] as usize;
            trans[i] = self.palette[p];

            if p == 255 {
                // scan around for another color to avoid alpha fringes
                let r = if i > w && data[i - w] != 255 {
                    data[i - w] as usize
                } else if i < s - w && data[i + w] != 255 {
                    data[i + w] as usize
                } else if i > 0 && data[i - 1] != 255 {
                    data[i - 1] as usize
                } else if i < s - 1 && data[i + 1] != 255 {
                    data[i + 1] as usize
                } else {
                    0
                };
                // keep alpha 0, take the neighbor's rgb
                let rgb = self.palette[r].to_ne_bytes();
                let a = trans[i].to_ne_bytes()[3];
                trans[i] = palette_entry(rgb[0], rgb[1], rgb[2], a);
            }
        }

        self.upload32(gpu, bytemuck::cast_slice(&trans), width, height, mipmap)
    }

    /// Size, resample, scale, and hand an RGBA byte buffer to the GPU.
    fn upload32(
        &self,
        gpu: &mut dyn GpuBackend,
        data: &[u8],
        width: i32,
        height: i32,
        mipmap: bool,
    ) -> (TextureHandle, i32, i32, bool) {
        let scaled_width = self.scaled_dimension(width, mipmap);
        let scaled_height = self.scaled_dimension(height, mipmap);

        // scan the source for any non-255 alpha
        let has_alpha = data.iter().skip(3).step_by(4).any(|&a| a != 255);

        let mut staging: Option<Vec<u8>> = if scaled_width != width || scaled_height != height {
            let mut out = vec![0u8; scaled_width as usize * scaled_height as usize * 4];
            resample_texture(data, width, height, &mut out, scaled_width, scaled_height);
            Some(out)
        } else if mipmap {
            Some(data.to_vec())
        } else {
            None
        };

        if mipmap {
            self.light_scale(staging.as_mut().expect("mipmap path owns its buffer"));
        }

        let pixels: &[u8] = staging.as_deref().unwrap_or(data);

        let handle = if has_alpha {
            gpu.create_texture(
                scaled_width as u32,
                scaled_height as u32,
                TextureFormat::Rgba8,
                pixels,
            )
        } else {
            // repack to 3 bytes per pixel
            let mut rgb = Vec::with_capacity(pixels.len() / 4 * 3);
            for px in pixels.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            gpu.create_texture(
                scaled_width as u32,
                scaled_height as u32,
                TextureFormat::Rgb8,
                &rgb,
            )
        };

        (handle, scaled_width, scaled_height, has_alpha)
    }

    /// Upload dimension for a source dimension: smallest power of two
    /// not below it, optionally rounded down instead, shifted by the
    /// detail reduction for tiled textures, clamped to [1, 256].
    fn scaled_dimension(&self, dim: i32, mipmap: bool) -> i32 {
        let mut scaled = 1i32;
        while scaled < dim {
            scaled <<= 1;
        }
        if self.round_down && scaled > dim && mipmap {
            scaled >>= 1;
        }
        // let people sample down the world textures for speed
        if mipmap {
            scaled >>= self.picmip.min(30);
        }
        scaled.clamp(1, MAX_UPLOAD_DIM)
    }

    /// Gamma and intensity scale rgb bytes in place; alpha untouched.
    fn light_scale(&self, data: &mut [u8]) {
        for px in data.chunks_exact_mut(4) {
            px[0] = self.gammatable[self.intensitytable[px[0] as usize] as usize];
            px[1] = self.gammatable[self.intensitytable[px[1] as usize] as usize];
            px[2] = self.gammatable[self.intensitytable[px[2] as usize] as usize];
        }
    }

    // ============================================================
    // Flood fill
    // ============================================================

    /// Fill background pixels of an 8-bit skin so mipmapping doesn't
    /// produce haloes. The pixel at (0,0) picks the fill color; every
    /// 4-connected pixel reachable from there with that color is
    /// replaced by the last differing neighbor seen.
    pub fn flood_fill_skin(&self, skin: &mut [u8], skinwidth: i32, skinheight: i32) {
        const FIFO_SIZE: usize = 0x1000; // must be a power of 2
        const FIFO_MASK: usize = FIFO_SIZE - 1;

        let fillcolor = skin[0];

        // attempt to find opaque black
        let filledcolor = (0..256)
            .find(|&i| self.palette[i].to_ne_bytes() == [0, 0, 0, 255])
            .unwrap_or(0) as u8;

        // can't fill to the filled color or to the transparent color
        // (255 doubles as the visited marker)
        if fillcolor == filledcolor || fillcolor == 255 {
            return;
        }

        let w = skinwidth as isize;
        let h = skinheight as isize;

        let mut fifo = [(0i16, 0i16); FIFO_SIZE];
        let mut inpt = 1usize;
        let mut outpt = 0usize;

        while outpt != inpt {
            let (x, y) = (fifo[outpt].0 as isize, fifo[outpt].1 as isize);
            outpt = (outpt + 1) & FIFO_MASK;

            let mut fdc = filledcolor;
            let pos = (x + w * y) as usize;

            let mut step = |off: isize, dx: isize, dy: isize, skin: &mut [u8]| {
                let idx = (pos as isize + off) as usize;
                if skin[idx] == fillcolor {
                    skin[idx] = 255;
                    fifo[inpt] = ((x + dx) as i16, (y + dy) as i16);
                    inpt = (inpt + 1) & FIFO_MASK;
                } else if skin[idx] != 255 {
                    fdc = skin[idx];
                }
            };

            if x > 0 {
                step(-1, -1, 0, skin);
            }
            if x < w - 1 {
                step(1, 1, 0, skin);
            }
            if y > 0 {
                step(-w, 0, -1, skin);
            }
            if y < h - 1 {
                step(w, 0, 1, skin);
            }

            skin[pos] = fdc;
        }
    }

    // ============================================================
    // Lifecycle
    // ============================================================

    /// Free every image not touched by the current registration
    /// sequence. UI pics and the generated textures survive.
    pub fn free_unused(&mut self, gpu: &mut dyn GpuBackend) {
        let seq = self.registration_sequence;
        self.touch(self.notexture);
        self.touch(self.particle);

        for slot in self.slots.iter_mut() {
            let evict = match slot {
                Some(img) => img.registration_sequence != seq && img.kind != ImageKind::Pic,
                None => false,
            };
            if evict {
                let img = slot.take().unwrap();
                gpu.destroy_texture(img.texture);
            }
        }
    }

    /// Release every GPU handle and clear the registry.
    pub fn shutdown(&mut self, gpu: &mut dyn GpuBackend) {
        for slot in self.slots.iter_mut() {
            if let Some(img) = slot.take() {
                gpu.destroy_texture(img.texture);
            }
        }
        self.slots.clear();
    }

    /// Body of the imagelist console command.
    pub fn image_list(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut texels: i64 = 0;

        out.push_str("------------------\n");
        for img in self.slots.iter().flatten() {
            texels += img.upload_width as i64 * img.upload_height as i64;
            let _ = writeln!(
                out,
                "{} {:3} {:3}: {}",
                img.kind.list_letter(),
                img.upload_width,
                img.upload_height,
                img.name
            );
        }
        let _ = writeln!(out, "Total texel count (not counting mipmaps): {}", texels);
        out
    }
}

// ============================================================
// Palette
// ============================================================

/// Load the global palette from graphics/colormap.pcx. Entry 255 is
/// forced transparent.
fn load_palette(fs: &dyn FileSystem) -> DropResult<[u32; 256]> {
    let raw = fs
        .load_file("graphics/colormap.pcx")
        .ok_or_else(|| DropError::new("couldn't load graphics/colormap.pcx"))?;
    let decoded = pcx_decode(&raw)
        .ok_or_else(|| DropError::new("graphics/colormap.pcx is not a valid pcx"))?;

    let pal: &[u8; PCX_PALETTE_SIZE] = &decoded.palette;
    let mut table = [0u32; 256];
    for i in 0..256 {
        table[i] = palette_entry(pal[i * 3], pal[i * 3 + 1], pal[i * 3 + 2], 255);
    }
    // 255 is transparent
    let rgb = table[255].to_ne_bytes();
    table[255] = palette_entry(rgb[0], rgb[1], rgb[2], 0);

    Ok(table)
}

// ============================================================
// Resampling
// ============================================================

/// Box-filter resample of tightly packed RGBA rows: each output pixel
/// averages a 2x2 sample of the source at quarter offsets.
fn resample_texture(
    input: &[u8],
    inwidth: i32,
    inheight: i32,
    output: &mut [u8],
    outwidth: i32,
    outheight: i32,
) {
    let inwidth = inwidth as usize;
    let inheight = inheight as usize;
    let outwidth = outwidth as usize;
    let outheight = outheight as usize;

    let fracstep = (inwidth as u32).wrapping_mul(0x10000) / outwidth as u32;

    // byte offsets of the two horizontal sample columns
    let mut p1 = vec![0usize; outwidth];
    let mut p2 = vec![0usize; outwidth];

    let mut frac = fracstep >> 2;
    for p in p1.iter_mut() {
        *p = 4 * (frac >> 16) as usize;
        frac = frac.wrapping_add(fracstep);
    }
    frac = 3 * (fracstep >> 2);
    for p in p2.iter_mut() {
        *p = 4 * (frac >> 16) as usize;
        frac = frac.wrapping_add(fracstep);
    }

    for i in 0..outheight {
        let inrow = 4 * inwidth * ((i as f32 + 0.25) * inheight as f32 / outheight as f32) as usize;
        let inrow2 =
            4 * inwidth * ((i as f32 + 0.75) * inheight as f32 / outheight as f32) as usize;
        for j in 0..outwidth {
            let out = (i * outwidth + j) * 4;
            for k in 0..4 {
                output[out + k] = ((input[inrow + p1[j] + k] as u32
                    + input[inrow + p2[j] + k] as u32
                    + input[inrow2 + p1[j] + k] as u32
                    + input[inrow2 + p2[j] + k] as u32)
                    >> 2) as u8;
            }
        }
    }
}

// ============================================================
// External pixel decoders
// ============================================================

/// Try the candidate formats for `name` in order, substituting the
/// extension: tga, png, bmp (32-bpp), then pcx (8-bit indexed). The
/// first candidate whose file exists wins. A 32-bpp file that fails to
/// decode is fatal; a malformed pcx is discarded.
fn decode_candidates(fs: &dyn FileSystem, name: &str) -> DropResult<Option<DecodedPixels>> {
    let stem = match name.rfind('.') {
        Some(i) => &name[..i],
        None => name,
    };

    for ext in ["tga", "png", "bmp", "pcx"] {
        let candidate = format!("{}.{}", stem, ext);
        let Some(raw) = fs.load_file(&candidate) else {
            continue;
        };

        if ext == "pcx" {
            match pcx_decode(&raw) {
                Some(res) => {
                    return Ok(Some(DecodedPixels {
                        pixels: res.pixels,
                        width: res.width as i32,
                        height: res.height as i32,
                        bits: 8,
                    }));
                }
                None => {
                    warn!("malformed pcx file {}", candidate);
                    continue;
                }
            }
        }

        let format = match ext {
            "tga" => image::ImageFormat::Tga,
            "png" => image::ImageFormat::Png,
            _ => image::ImageFormat::Bmp,
        };
        let img = image::load_from_memory_with_format(&raw, format)
            .map_err(|e| DropError::new(format!("failed to read {}: {}", candidate, e)))?;
        let rgba = img.to_rgba8();
        let (w, h) = (rgba.width() as i32, rgba.height() as i32);
        return Ok(Some(DecodedPixels {
            pixels: rgba.into_raw(),
            width: w,
            height: h,
            bits: 32,
        }));
    }

    Ok(None)
}

// ============================================================
// Generated textures
// ============================================================

/// 16x16 red/black checker used when a texture cannot be resolved.
fn notexture_pixels() -> Vec<u8> {
    let mut data = vec![0u8; 16 * 16 * 4];
    for y in 0..16usize {
        for x in 0..16usize {
            let p = (y * 16 + x) * 4;
            let on = ((x / 4) + (y / 4)) % 2 == 0;
            data[p] = if on { 255 } else { 0 };
            data[p + 3] = 255;
        }
    }
    data
}

/// 16x16 radial-falloff dot for particles.
fn particle_pixels() -> Vec<u8> {
    let mut data = vec![0u8; 16 * 16 * 4];
    for y in 0..16i32 {
        for x in 0..16i32 {
            let p = ((y * 16 + x) * 4) as usize;
            let alpha = 255 - 4 * ((x - 8) * (x - 8) + (y - 8) * (y - 8));
            if alpha > 0 {
                data[p] = 255;
                data[p + 1] = 255;
                data[p + 2] = 255;
                data[p + 3] = alpha as u8;
            }
        }
    }
    data
}
