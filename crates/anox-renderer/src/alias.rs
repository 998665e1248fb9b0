// alias.rs -- keyframe (alias) model loading
//
// Alias models carry per-frame compressed vertex positions in one of
// three encodings, selected by the header's resolution field. The
// decode widens everything to a common vertex form; only the on-disk
// packing differs.

use anox_common::error::{DropError, DropResult};
use anox_common::q_shared::MAX_LBM_HEIGHT;
use anox_common::qfiles::{
    DMdl, DStVert, DTriVertx, DTriangle, FrameResolution, ALIAS_FRAME_HEADER_SIZE, ALIAS_VERSION,
    MAX_MD2SKINS, MAX_SKINNAME, MAX_VERTS,
};
use anox_common::wire::{name_str, Reader};

use crate::model_types::{AliasData, AliasFrame};

/// Generic bounds for alias models; the format stores none.
pub const ALIAS_BOUNDS: f32 = 32.0;

/// Rewrite an embedded skin name onto the model's own directory, the
/// way the original data expects: everything after the model path's
/// last slash is replaced by the embedded name.
pub fn skin_path_for(model_name: &str, embedded: &str) -> String {
    match model_name.rfind('/') {
        Some(i) => format!("{}/{}", &model_name[..i], embedded),
        None => embedded.to_string(),
    }
}

/// Reader over one header-addressed section; negative offsets are a
/// format error.
fn section<'a>(
    buf: &'a [u8],
    ofs: i32,
    len: usize,
    name: &str,
    what: &str,
) -> DropResult<Reader<'a>> {
    if ofs < 0 {
        return Err(DropError::new(format!(
            "model {} has bad {} offset",
            name, what
        )));
    }
    Reader::at(buf, ofs as usize, len)
}

pub fn load_alias_model(name: &str, buf: &[u8]) -> DropResult<AliasData> {
    let header = DMdl::parse(buf)?;

    if header.version != ALIAS_VERSION {
        // tools write stray versions often enough that debug builds
        // push on; release builds refuse
        #[cfg(debug_assertions)]
        log::warn!(
            "{} has wrong version number ({} should be {})",
            name,
            header.version,
            ALIAS_VERSION
        );
        #[cfg(not(debug_assertions))]
        return Err(DropError::new(format!(
            "{} has wrong version number ({} should be {})",
            name, header.version, ALIAS_VERSION
        )));
    }

    if header.skinheight > MAX_LBM_HEIGHT {
        return Err(DropError::new(format!(
            "model {} has a skin taller than {}",
            name, MAX_LBM_HEIGHT
        )));
    }
    if header.num_xyz <= 0 {
        return Err(DropError::new(format!("model {} has no vertices", name)));
    }
    if header.num_xyz > MAX_VERTS as i32 {
        return Err(DropError::new(format!("model {} has too many vertices", name)));
    }
    if header.num_st <= 0 {
        return Err(DropError::new(format!("model {} has no st vertices", name)));
    }
    if header.num_tris <= 0 {
        return Err(DropError::new(format!("model {} has no triangles", name)));
    }
    if header.num_frames <= 0 {
        return Err(DropError::new(format!("model {} has no frames", name)));
    }
    if header.num_glcmds < 0 {
        return Err(DropError::new(format!("model {} has bad command count", name)));
    }
    if header.num_skins < 0 || header.num_skins > MAX_MD2SKINS as i32 {
        return Err(DropError::new(format!("model {} has bad skin count", name)));
    }

    let resolution = FrameResolution::from_i32(header.resolution).ok_or_else(|| {
        DropError::new(format!("model {} has invalid resolution", name))
    })?;

    // load base s and t vertices
    let mut r = section(
        buf,
        header.ofs_st,
        header.num_st as usize * DStVert::ON_DISK_SIZE,
        name,
        "st",
    )?;
    let mut st = Vec::with_capacity(header.num_st as usize);
    for _ in 0..header.num_st {
        st.push(DStVert::parse(&mut r)?);
    }

    // load triangle lists
    let mut r = section(
        buf,
        header.ofs_tris,
        header.num_tris as usize * DTriangle::ON_DISK_SIZE,
        name,
        "triangle",
    )?;
    let mut tris = Vec::with_capacity(header.num_tris as usize);
    for _ in 0..header.num_tris {
        tris.push(DTriangle::parse(&mut r)?);
    }

    // load the frames
    let vertex_bytes = header.num_xyz as usize * resolution.vertex_size();
    let framesize = header.framesize.max(0) as usize;
    if framesize < ALIAS_FRAME_HEADER_SIZE + vertex_bytes {
        return Err(DropError::new(format!("model {} has bad framesize", name)));
    }
    if header.ofs_frames < 0 {
        return Err(DropError::new(format!(
            "model {} has bad frame offset",
            name
        )));
    }

    let mut frames = Vec::with_capacity(header.num_frames as usize);
    for i in 0..header.num_frames as usize {
        let ofs = header.ofs_frames as usize + i * framesize;
        let mut r = Reader::at(buf, ofs, framesize)?;

        let scale = r.vec3()?;
        let translate = r.vec3()?;
        let frame_name = name_str(&r.bytes::<16>()?).to_string();

        let mut verts = Vec::with_capacity(header.num_xyz as usize);
        for _ in 0..header.num_xyz {
            verts.push(DTriVertx::parse(&mut r, resolution)?);
        }

        frames.push(AliasFrame {
            name: frame_name,
            scale,
            translate,
            verts,
        });
    }

    // load the render command stream
    let mut r = section(buf, header.ofs_glcmds, header.num_glcmds as usize * 4, name, "command")?;
    let mut glcmds = Vec::with_capacity(header.num_glcmds as usize);
    for _ in 0..header.num_glcmds {
        glcmds.push(r.i32()?);
    }

    // skin names, rewritten onto the model's directory
    let mut r = section(
        buf,
        header.ofs_skins,
        header.num_skins as usize * MAX_SKINNAME,
        name,
        "skin",
    )?;
    let mut skin_paths = Vec::with_capacity(header.num_skins as usize);
    for _ in 0..header.num_skins {
        let raw = r.bytes::<MAX_SKINNAME>()?;
        skin_paths.push(skin_path_for(name, name_str(&raw)));
    }

    Ok(AliasData {
        skinwidth: header.skinwidth,
        skinheight: header.skinheight,
        st,
        tris,
        frames,
        glcmds,
        skin_paths,
    })
}
