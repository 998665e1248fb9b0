// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// bsp.rs -- brush model (world) loading
//
// The level file is a chunked container: a fixed header of lump
// descriptors, each lump an array of fixed-size little-endian records
// with indices into sibling lumps. Loading is strictly sequential in
// dependency order; any size, version, or index violation aborts the
// whole load.

use std::rc::Rc;

use anox_common::error::{DropError, DropResult};
use anox_common::files::FileSystem;
use anox_common::q_shared::{vector_length, Contents, Plane, SurfFlags, Vec3};
use anox_common::qfiles::*;
use anox_common::wire::{name_str, Reader};

use crate::gpu::GpuBackend;
use crate::image_cache::{ImageCache, ImageKind};
use crate::model_types::*;

// ============================================================
// Surface build collaborator
// ============================================================

/// Builds renderable per-surface data as the world loads: lightmap
/// blocks, polygon meshes, and warp subdivisions. The loader only
/// decides *which* surfaces get which build step.
pub trait SurfaceBuilder {
    fn begin_lightmaps(&mut self) {}
    fn end_lightmaps(&mut self) {}
    fn build_lightmap(&mut self, _data: &BrushData, _surface: usize) {}
    fn build_polygon(&mut self, _data: &BrushData, _surface: usize) {}
    /// cut up a warp polygon into subdivided pieces
    fn subdivide_surface(&mut self, _data: &BrushData, _surface: usize) {}
}

/// Builder that produces nothing; used by tools that only need the
/// data graph.
pub struct NullSurfaceBuilder;

impl SurfaceBuilder for NullSurfaceBuilder {}

// ============================================================
// Lump plumbing
// ============================================================

/// Reader positioned over one lump, plus its record count.
/// `filelen % record_size != 0` is the classic funny-lump-size error.
fn lump_reader<'a>(
    buf: &'a [u8],
    lump: &Lump,
    record_size: usize,
    name: &str,
) -> DropResult<(Reader<'a>, usize)> {
    if lump.fileofs < 0 || lump.filelen < 0 {
        return Err(DropError::new(format!("negative lump bounds in {}", name)));
    }
    let len = lump.filelen as usize;
    if len % record_size != 0 {
        return Err(DropError::new(format!("funny lump size in {}", name)));
    }
    Ok((Reader::at(buf, lump.fileofs as usize, len)?, len / record_size))
}

fn lump_bytes<'a>(buf: &'a [u8], lump: &Lump, name: &str) -> DropResult<&'a [u8]> {
    let (mut r, len) = lump_reader(buf, lump, 1, name)?;
    r.byte_slice(len)
}

// ============================================================
// Lump loaders
// ============================================================

fn load_vertexes(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Vec<Vec3>> {
    let (mut r, count) = lump_reader(buf, lump, DVertex::ON_DISK_SIZE, name)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(DVertex::parse(&mut r)?.point);
    }
    Ok(out)
}

fn load_edges(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Vec<Edge>> {
    let (mut r, count) = lump_reader(buf, lump, DEdge::ON_DISK_SIZE, name)?;
    if count >= MAX_MAP_EDGES {
        return Err(DropError::new(format!("too many edges in {}", name)));
    }
    let mut out = Vec::with_capacity(count + 1);
    for _ in 0..count {
        let e = DEdge::parse(&mut r)?;
        out.push(Edge { v: e.v });
    }
    // one spare slot at the end, a historical pad
    out.push(Edge::default());
    Ok(out)
}

fn load_surfedges(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Vec<i32>> {
    let (mut r, count) = lump_reader(buf, lump, 4, name)?;
    if count < 1 || count >= MAX_MAP_SURFEDGES {
        return Err(DropError::new(format!(
            "bad surfedges count in {}: {}",
            name, count
        )));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(r.i32()?);
    }
    Ok(out)
}

fn load_planes(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Vec<Plane>> {
    let (mut r, count) = lump_reader(buf, lump, DPlane::ON_DISK_SIZE, name)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let p = DPlane::parse(&mut r)?;
        let mut bits = 0u8;
        for j in 0..3 {
            if p.normal[j] < 0.0 {
                bits |= 1 << j;
            }
        }
        out.push(Plane {
            normal: p.normal,
            dist: p.dist,
            kind: p.plane_type as u8,
            signbits: bits,
        });
    }
    Ok(out)
}

fn load_texinfo(
    buf: &[u8],
    lump: &Lump,
    name: &str,
    fs: &dyn FileSystem,
    gpu: &mut dyn GpuBackend,
    images: &mut ImageCache,
) -> DropResult<Vec<TexInfo>> {
    let (mut r, count) = lump_reader(buf, lump, DTexInfo::ON_DISK_SIZE, name)?;

    let mut out = Vec::with_capacity(count);
    let mut texture_names = Vec::with_capacity(count);

    for _ in 0..count {
        let t = DTexInfo::parse(&mut r)?;

        let next = if t.nexttexinfo > 0 {
            if t.nexttexinfo as usize >= count {
                return Err(DropError::new(format!(
                    "bad nexttexinfo in {}: {}",
                    name, t.nexttexinfo
                )));
            }
            Some(t.nexttexinfo as u32)
        } else {
            None
        };

        texture_names.push(format!("textures/{}.tga", name_str(&t.texture)));
        out.push(TexInfo {
            vecs: t.vecs,
            flags: SurfFlags::from_bits_retain(t.flags),
            numframes: 1,
            next,
            image: images.notexture(),
        });
    }

    // resolve every texture in one batch: cache hits, parallel decode
    // of the misses, sequential upload
    let resolved = images.batch_find_images(fs, gpu, &texture_names, ImageKind::Wall)?;
    for (ti, id) in out.iter_mut().zip(resolved) {
        match id {
            Some(id) => ti.image = id,
            None => {
                // batch already warned about the missing file
                ti.image = images.notexture();
            }
        }
    }

    // count animation frames
    for i in 0..count {
        let mut frames = 1;
        let mut step = out[i].next;
        while let Some(n) = step {
            if n as usize == i {
                break;
            }
            frames += 1;
            if frames as usize > count {
                return Err(DropError::new(format!(
                    "texinfo animation chain does not close in {}",
                    name
                )));
            }
            step = out[n as usize].next;
        }
        out[i].numframes = frames;
    }

    Ok(out)
}

/// Vertex referenced by a signed surfedge: the sign selects which end
/// of the edge.
fn surfedge_vertex<'a>(data: &'a BrushData, index: i32, name: &str) -> DropResult<&'a Vec3> {
    let e = *data
        .surfedges
        .get(index as usize)
        .ok_or_else(|| DropError::new(format!("bad surfedge index in {}", name)))?;
    let (edge_index, end) = if e >= 0 { (e as usize, 0) } else { (-e as usize, 1) };
    let edge = data
        .edges
        .get(edge_index)
        .ok_or_else(|| DropError::new(format!("bad edge index in {}", name)))?;
    data.vertices
        .get(edge.v[end] as usize)
        .ok_or_else(|| DropError::new(format!("bad vertex index in {}", name)))
}

/// Fill in texturemins and extents: project every face vertex onto the
/// texinfo basis, take min/max, snap outward to the 16-unit grid.
fn calc_surface_extents(data: &BrushData, s: &mut Surface, name: &str) -> DropResult<()> {
    let mut mins = [999999.0f32; 2];
    let mut maxs = [-99999.0f32; 2];

    let tex = &data.texinfo[s.texinfo as usize];

    for i in 0..s.numedges {
        let v = surfedge_vertex(data, s.firstedge + i, name)?;
        for j in 0..2 {
            let val = v[0] * tex.vecs[j][0]
                + v[1] * tex.vecs[j][1]
                + v[2] * tex.vecs[j][2]
                + tex.vecs[j][3];
            if val < mins[j] {
                mins[j] = val;
            }
            if val > maxs[j] {
                maxs[j] = val;
            }
        }
    }

    for i in 0..2 {
        let bmins = (mins[i] / 16.0).floor() as i32;
        let bmaxs = (maxs[i] / 16.0).ceil() as i32;
        s.texturemins[i] = (bmins * 16) as i16;
        s.extents[i] = ((bmaxs - bmins) * 16) as i16;
    }
    Ok(())
}

fn load_faces(data: &mut BrushData, buf: &[u8], lump: &Lump, name: &str) -> DropResult<()> {
    let (mut r, count) = lump_reader(buf, lump, DFace::ON_DISK_SIZE, name)?;

    let mut surfaces = Vec::with_capacity(count);
    for _ in 0..count {
        let f = DFace::parse(&mut r)?;

        if f.planenum as usize >= data.planes.len() {
            return Err(DropError::new(format!("bad plane number in {}", name)));
        }
        let ti = f.texinfo as i32;
        if ti < 0 || ti as usize >= data.texinfo.len() {
            return Err(DropError::new(format!("bad texinfo number in {}", name)));
        }
        if f.numedges < 0
            || f.firstedge < 0
            || f.firstedge as usize + f.numedges as usize > data.surfedges.len()
        {
            return Err(DropError::new(format!("bad face edge range in {}", name)));
        }

        let mut flags = SurfaceFlags::empty();
        if f.side != 0 {
            flags |= SurfaceFlags::PLANEBACK;
        }

        let samples = if f.lightofs == -1 {
            None
        } else {
            if f.lightofs < 0 || f.lightofs as usize >= data.lightdata.len() {
                return Err(DropError::new(format!("bad light offset in {}", name)));
            }
            Some(f.lightofs as u32)
        };

        let mut surf = Surface {
            plane: f.planenum as u32,
            flags,
            firstedge: f.firstedge,
            numedges: f.numedges as i32,
            texturemins: [0; 2],
            extents: [0; 2],
            texinfo: ti as u32,
            styles: f.styles,
            samples,
        };

        calc_surface_extents(data, &mut surf, name)?;

        let tex_flags = data.texinfo[surf.texinfo as usize].flags;
        if tex_flags.contains(SurfFlags::SKY) {
            surf.flags |= SurfaceFlags::DRAWSKY;
        }
        if tex_flags.contains(SurfFlags::WARP) {
            surf.flags |= SurfaceFlags::DRAWTURB;
            for i in 0..2 {
                surf.extents[i] = 16384;
                surf.texturemins[i] = -8192;
            }
        }

        surfaces.push(surf);
    }

    data.surfaces = surfaces;
    Ok(())
}

/// Run the surface build steps now that the face table is complete:
/// warps get subdivided, lit opaque surfaces get lightmaps, everything
/// but warps gets a renderable polygon.
fn build_surfaces(data: &BrushData, builder: &mut dyn SurfaceBuilder) {
    builder.begin_lightmaps();

    for (i, surf) in data.surfaces.iter().enumerate() {
        let tex_flags = data.texinfo[surf.texinfo as usize].flags;

        if tex_flags.contains(SurfFlags::WARP) {
            // cut up polygon for warps
            builder.subdivide_surface(data, i);
        }

        if !tex_flags.intersects(
            SurfFlags::SKY | SurfFlags::TRANS33 | SurfFlags::TRANS66 | SurfFlags::WARP,
        ) {
            builder.build_lightmap(data, i);
        }

        if !tex_flags.contains(SurfFlags::WARP) {
            builder.build_polygon(data, i);
        }
    }

    builder.end_lightmaps();
}

fn load_marksurfaces(buf: &[u8], lump: &Lump, name: &str, numsurfaces: usize) -> DropResult<Vec<u16>> {
    let (mut r, count) = lump_reader(buf, lump, 2, name)?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let j = r.i16()?;
        if j < 0 || j as usize >= numsurfaces {
            return Err(DropError::new(format!("bad surface number in {}", name)));
        }
        out.push(j as u16);
    }
    Ok(out)
}

fn load_visibility(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Option<VisData>> {
    if lump.filelen == 0 {
        return Ok(None);
    }
    let bytes = lump_bytes(buf, lump, name)?;
    let mut r = Reader::new(bytes);

    let numclusters = r.i32()?;
    if numclusters < 0 || numclusters as usize > MAX_MAP_LEAFS {
        return Err(DropError::new(format!(
            "bad visibility cluster count in {}: {}",
            name, numclusters
        )));
    }

    let mut bitofs = Vec::with_capacity(numclusters as usize);
    for _ in 0..numclusters {
        bitofs.push([r.i32()?, r.i32()?]);
    }

    Ok(Some(VisData {
        numclusters,
        bitofs,
        data: bytes.to_vec(),
    }))
}

fn load_leafs(data: &mut BrushData, buf: &[u8], lump: &Lump, name: &str) -> DropResult<()> {
    let (mut r, count) = lump_reader(buf, lump, DLeaf::ON_DISK_SIZE, name)?;

    let mut leafs = Vec::with_capacity(count);
    for _ in 0..count {
        let l = DLeaf::parse(&mut r)?;

        let first = l.firstleafface as u32;
        let num = l.numleaffaces as u32;
        if (first + num) as usize > data.marksurfaces.len() {
            return Err(DropError::new(format!("bad leafface range in {}", name)));
        }

        let contents = Contents::from_bits_retain(l.contents);

        // underwater surfaces get flagged for the warp view effect
        if contents.is_liquid() {
            for &surf in &data.marksurfaces[first as usize..(first + num) as usize] {
                data.surfaces[surf as usize].flags |= SurfaceFlags::UNDERWATER;
            }
        }

        let mut minmaxs = [0.0f32; 6];
        for j in 0..3 {
            minmaxs[j] = l.mins[j] as f32;
            minmaxs[3 + j] = l.maxs[j] as f32;
        }

        leafs.push(Leaf {
            contents,
            cluster: l.cluster as i32,
            area: l.area as i32,
            minmaxs,
            first_marksurface: first,
            num_marksurfaces: num,
            parent: None,
        });
    }

    data.leafs = leafs;
    Ok(())
}

fn load_nodes(data: &mut BrushData, buf: &[u8], lump: &Lump, name: &str) -> DropResult<()> {
    let (mut r, count) = lump_reader(buf, lump, DNode::ON_DISK_SIZE, name)?;

    let mut nodes = Vec::with_capacity(count);
    for i in 0..count {
        let n = DNode::parse(&mut r)?;

        if n.planenum < 0 || n.planenum as usize >= data.planes.len() {
            return Err(DropError::new(format!("bad node plane in {}", name)));
        }

        let mut children = [NodeChild::Leaf(0); 2];
        for j in 0..2 {
            let child = NodeChild::from_disk(n.children[j]);
            match child {
                // children always come after their parent, which is
                // also what makes the tree walk finite
                NodeChild::Node(c) if c as usize <= i || c as usize >= count => {
                    return Err(DropError::new(format!("bad node children in {}", name)));
                }
                NodeChild::Leaf(c) if c as usize >= data.leafs.len() => {
                    return Err(DropError::new(format!("bad leaf index in {}", name)));
                }
                _ => {}
            }
            children[j] = child;
        }

        let mut minmaxs = [0.0f32; 6];
        for j in 0..3 {
            minmaxs[j] = n.mins[j] as f32;
            minmaxs[3 + j] = n.maxs[j] as f32;
        }

        nodes.push(Node {
            plane: n.planenum as u32,
            children,
            minmaxs,
            firstsurface: n.firstface,
            numsurfaces: n.numfaces,
            parent: None,
        });
    }

    data.nodes = nodes;
    set_parents(data);
    Ok(())
}

/// Walk from the root assigning parent back-references to nodes and
/// leaves. The child ordering check at load time makes this a tree.
fn set_parents(data: &mut BrushData) {
    if data.nodes.is_empty() {
        return;
    }
    let mut stack: Vec<(u32, Option<u32>)> = vec![(0, None)];
    while let Some((index, parent)) = stack.pop() {
        data.nodes[index as usize].parent = parent;
        for child in data.nodes[index as usize].children {
            match child {
                NodeChild::Node(c) => stack.push((c, Some(index))),
                NodeChild::Leaf(c) => data.leafs[c as usize].parent = Some(index),
            }
        }
    }
}

pub fn radius_from_bounds(mins: &Vec3, maxs: &Vec3) -> f32 {
    let mut corner = [0.0f32; 3];
    for i in 0..3 {
        corner[i] = mins[i].abs().max(maxs[i].abs());
    }
    vector_length(&corner)
}

fn load_submodels(buf: &[u8], lump: &Lump, name: &str) -> DropResult<Vec<Submodel>> {
    let (mut r, count) = lump_reader(buf, lump, DModel::ON_DISK_SIZE, name)?;
    if count < 1 || count > MAX_MAP_MODELS {
        return Err(DropError::new(format!(
            "bad submodel count in {}: {}",
            name, count
        )));
    }

    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let m = DModel::parse(&mut r)?;
        let mut sub = Submodel {
            headnode: m.headnode,
            firstface: m.firstface,
            numfaces: m.numfaces,
            ..Submodel::default()
        };
        for j in 0..3 {
            // spread the mins / maxs by a unit
            sub.mins[j] = m.mins[j] - 1.0;
            sub.maxs[j] = m.maxs[j] + 1.0;
            sub.origin[j] = m.origin[j];
        }
        sub.radius = radius_from_bounds(&sub.mins, &sub.maxs);
        out.push(sub);
    }
    Ok(out)
}

// ============================================================
// Whole-file load
// ============================================================

/// Load a brush model from a raw level file. The returned arena is
/// shared by the world and its inline submodels; the registry builds
/// Model records around it.
pub fn load_brush_model(
    name: &str,
    buf: &[u8],
    fs: &dyn FileSystem,
    gpu: &mut dyn GpuBackend,
    images: &mut ImageCache,
    builder: &mut dyn SurfaceBuilder,
) -> DropResult<Rc<BrushData>> {
    let header = DHeader::parse(buf)?;

    if header.ident != IDBSPHEADER {
        return Err(DropError::new(format!("{} is not a level file", name)));
    }
    if header.version != BSPVERSION {
        return Err(DropError::new(format!(
            "{} has wrong version number ({} should be {})",
            name, header.version, BSPVERSION
        )));
    }

    let mut data = BrushData::default();

    // load into the arena, leaves-first dependency order
    data.vertices = load_vertexes(buf, &header.lumps[LUMP_VERTEXES], name)?;
    data.edges = load_edges(buf, &header.lumps[LUMP_EDGES], name)?;
    data.surfedges = load_surfedges(buf, &header.lumps[LUMP_SURFEDGES], name)?;
    data.lightdata = lump_bytes(buf, &header.lumps[LUMP_LIGHTING], name)?.to_vec();
    data.planes = load_planes(buf, &header.lumps[LUMP_PLANES], name)?;
    data.texinfo = load_texinfo(buf, &header.lumps[LUMP_TEXINFO], name, fs, gpu, images)?;
    load_faces(&mut data, buf, &header.lumps[LUMP_FACES], name)?;
    data.marksurfaces = load_marksurfaces(
        buf,
        &header.lumps[LUMP_LEAFFACES],
        name,
        data.surfaces.len(),
    )?;
    data.vis = load_visibility(buf, &header.lumps[LUMP_VISIBILITY], name)?;
    load_leafs(&mut data, buf, &header.lumps[LUMP_LEAFS], name)?;
    load_nodes(&mut data, buf, &header.lumps[LUMP_NODES], name)?;
    data.submodels = load_submodels(buf, &header.lumps[LUMP_MODELS], name)?;

    for sub in &data.submodels {
        if sub.headnode >= data.nodes.len() as i32 {
            return Err(DropError::new(format!(
                "inline model in {} has bad headnode",
                name
            )));
        }
    }

    build_surfaces(&data, builder);

    Ok(Rc::new(data))
}

/// View record for submodel `index` of a loaded arena. Index 0 is the
/// world's own view.
pub fn submodel_view(data: &BrushData, index: usize) -> SubmodelView {
    let sub = &data.submodels[index];
    SubmodelView {
        first_surface: sub.firstface,
        num_surfaces: sub.numfaces,
        headnode: sub.headnode,
        // only the world sees the leaf table
        numleafs: if index == 0 { data.leafs.len() as i32 } else { 0 },
    }
}

// ============================================================
// Spatial queries
// ============================================================

/// Descend the node tree from the root to the leaf containing `p`.
pub fn point_in_leaf<'a>(data: &'a BrushData, p: &Vec3) -> DropResult<&'a Leaf> {
    if data.nodes.is_empty() {
        return Err(DropError::new("point_in_leaf: bad model"));
    }

    let mut node = &data.nodes[0];
    loop {
        let plane = &data.planes[node.plane as usize];
        let child = if plane.distance_to(p) > 0.0 {
            node.children[0]
        } else {
            node.children[1]
        };
        match child {
            NodeChild::Node(n) => node = &data.nodes[n as usize],
            NodeChild::Leaf(l) => return Ok(&data.leafs[l as usize]),
        }
    }
}

// ============================================================
// Visibility decompression
// ============================================================

/// Expand a run-length compressed visibility row into `out`. A zero
/// byte is followed by a repeat count; anything else copies through.
/// `None` input produces an all-visible row. The output is exactly
/// ceil(numclusters / 8) bytes.
pub fn decompress_vis(
    input: Option<&[u8]>,
    numclusters: i32,
    out: &mut Vec<u8>,
) -> DropResult<()> {
    let row = ((numclusters + 7) >> 3) as usize;
    out.clear();

    let Some(input) = input else {
        // no vis info, so make all visible
        out.resize(row, 0xFF);
        return Ok(());
    };

    let mut i = 0usize;
    while out.len() < row {
        if i >= input.len() {
            return Err(DropError::new("visibility stream ends mid-row"));
        }
        if input[i] != 0 {
            out.push(input[i]);
            i += 1;
            continue;
        }
        if i + 1 >= input.len() {
            return Err(DropError::new("visibility stream ends mid-run"));
        }
        let c = input[i + 1] as usize;
        i += 2;
        for _ in 0..c {
            if out.len() < row {
                out.push(0);
            }
        }
    }
    Ok(())
}

/// Decompress the PVS row for a cluster into `scratch` and return it.
/// Cluster -1 (or a model without visibility data) sees everything.
/// The scratch buffer is reused; the returned slice dies at the next
/// call.
pub fn cluster_pvs<'a>(
    data: &BrushData,
    cluster: i32,
    scratch: &'a mut Vec<u8>,
) -> DropResult<&'a [u8]> {
    match &data.vis {
        Some(vis) if cluster != -1 => {
            if cluster < 0 || cluster >= vis.numclusters {
                return Err(DropError::new(format!("bad cluster number {}", cluster)));
            }
            let ofs = vis.bitofs[cluster as usize][DVIS_PVS];
            if ofs < 0 || ofs as usize >= vis.data.len() {
                return Err(DropError::new(format!("bad visibility offset {}", ofs)));
            }
            decompress_vis(Some(&vis.data[ofs as usize..]), vis.numclusters, scratch)?;
        }
        Some(vis) => decompress_vis(None, vis.numclusters, scratch)?,
        None => decompress_vis(None, MAX_MAP_LEAFS as i32, scratch)?,
    }
    Ok(scratch)
}
