// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// model_types.rs -- in-memory model representations
//
// On-disk records live in anox_common::qfiles; everything here is the
// decoded, cross-linked form the renderer consumes. Cross-references
// are indices into the sibling tables of the owning BrushData, so a
// model can be moved or shared without a relocation pass.

use std::mem::size_of;
use std::rc::Rc;

use anox_common::q_shared::{Contents, Plane, SurfFlags, Vec3};
use anox_common::qfiles::{DTriVertx, DTriangle, DStVert, MAXLIGHTMAPS};
use bitflags::bitflags;

use crate::image_cache::ImageId;

bitflags! {
    /// Per-surface drawing flags, computed at load time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceFlags: u32 {
        const PLANEBACK  = 0x02;
        const DRAWSKY    = 0x04;
        const DRAWTURB   = 0x10;
        const UNDERWATER = 0x80;
    }
}

// ============================================================================
// Brush models
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct Edge {
    pub v: [u16; 2],
}

#[derive(Debug, Clone)]
pub struct TexInfo {
    /// [s,t][xyz + offset] texture projection basis
    pub vecs: [[f32; 4]; 2],
    pub flags: SurfFlags,
    pub numframes: i32,
    /// next texinfo in the animation chain, circular
    pub next: Option<u32>,
    pub image: ImageId,
}

#[derive(Debug, Clone)]
pub struct Surface {
    pub plane: u32,
    pub flags: SurfaceFlags,

    /// look up in BrushData::surfedges; negative entries are backwards edges
    pub firstedge: i32,
    pub numedges: i32,

    pub texturemins: [i16; 2],
    pub extents: [i16; 2],

    pub texinfo: u32,

    pub styles: [u8; MAXLIGHTMAPS],
    /// byte offset into BrushData::lightdata, None when unlit
    pub samples: Option<u32>,
}

/// A node child is either another node or a leaf. The on-disk form
/// packs this into the sign of the index; decoded it is explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChild {
    Node(u32),
    Leaf(u32),
}

impl NodeChild {
    /// Decode the signed on-disk child index.
    pub fn from_disk(v: i32) -> Self {
        if v >= 0 {
            NodeChild::Node(v as u32)
        } else {
            NodeChild::Leaf((-1 - v) as u32)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub plane: u32,
    pub children: [NodeChild; 2],
    /// mins then maxs, for bounding box culling
    pub minmaxs: [f32; 6],
    pub firstsurface: u16,
    pub numsurfaces: u16,
    pub parent: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub contents: Contents,
    pub cluster: i32,
    pub area: i32,
    pub minmaxs: [f32; 6],
    /// range into BrushData::marksurfaces, not owned
    pub first_marksurface: u32,
    pub num_marksurfaces: u32,
    pub parent: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Submodel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3,
    pub radius: f32,
    pub headnode: i32,
    pub visleafs: i32,
    pub firstface: i32,
    pub numfaces: i32,
}

/// Visibility lump kept compressed; rows are expanded on demand.
#[derive(Debug, Clone)]
pub struct VisData {
    pub numclusters: i32,
    /// per-cluster [PVS, PHS] byte offsets from the start of `data`
    pub bitofs: Vec<[i32; 2]>,
    /// the raw lump, offsets index into it
    pub data: Vec<u8>,
}

/// The geometry arena of a loaded level. Inline submodels hold an Rc
/// to the same arena with their own view of it.
#[derive(Debug, Default)]
pub struct BrushData {
    pub planes: Vec<Plane>,
    pub vertices: Vec<Vec3>,
    pub edges: Vec<Edge>,
    pub surfedges: Vec<i32>,
    pub lightdata: Vec<u8>,
    pub texinfo: Vec<TexInfo>,
    pub surfaces: Vec<Surface>,
    pub marksurfaces: Vec<u16>,
    pub vis: Option<VisData>,
    pub leafs: Vec<Leaf>,
    pub nodes: Vec<Node>,
    pub submodels: Vec<Submodel>,
}

impl BrushData {
    /// Resident size in bytes, for the modellist report.
    pub fn heap_size(&self) -> usize {
        self.planes.len() * size_of::<Plane>()
            + self.vertices.len() * size_of::<Vec3>()
            + self.edges.len() * size_of::<Edge>()
            + self.surfedges.len() * size_of::<i32>()
            + self.lightdata.len()
            + self.texinfo.len() * size_of::<TexInfo>()
            + self.surfaces.len() * size_of::<Surface>()
            + self.marksurfaces.len() * size_of::<u16>()
            + self
                .vis
                .as_ref()
                .map(|v| v.data.len() + v.bitofs.len() * 8 + 4)
                .unwrap_or(0)
            + self.leafs.len() * size_of::<Leaf>()
            + self.nodes.len() * size_of::<Node>()
            + self.submodels.len() * size_of::<Submodel>()
    }
}

/// One submodel's view of a shared BrushData. Submodel 0 is the world;
/// the rest are the inline "*N" models.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmodelView {
    pub first_surface: i32,
    pub num_surfaces: i32,
    pub headnode: i32,
    pub numleafs: i32,
}

// ============================================================================
// Alias models
// ============================================================================

#[derive(Debug, Clone)]
pub struct AliasFrame {
    pub name: String,
    pub scale: Vec3,
    pub translate: Vec3,
    pub verts: Vec<DTriVertx>,
}

#[derive(Debug, Clone)]
pub struct AliasData {
    pub skinwidth: i32,
    pub skinheight: i32,
    pub st: Vec<DStVert>,
    pub tris: Vec<DTriangle>,
    pub frames: Vec<AliasFrame>,
    pub glcmds: Vec<i32>,
    /// skin paths after rewriting onto the model's own directory
    pub skin_paths: Vec<String>,
}

impl AliasData {
    pub fn heap_size(&self) -> usize {
        self.st.len() * size_of::<DStVert>()
            + self.tris.len() * size_of::<DTriangle>()
            + self
                .frames
                .iter()
                .map(|f| f.verts.len() * size_of::<DTriVertx>() + f.name.len() + 24)
                .sum::<usize>()
            + self.glcmds.len() * 4
            + self.skin_paths.iter().map(|s| s.len()).sum::<usize>()
    }
}

// ============================================================================
// Sprite models
// ============================================================================

#[derive(Debug, Clone)]
pub struct SpriteFrame {
    pub width: i32,
    pub height: i32,
    pub origin_x: i32,
    pub origin_y: i32,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpriteData {
    pub frames: Vec<SpriteFrame>,
}

impl SpriteData {
    pub fn heap_size(&self) -> usize {
        self.frames
            .iter()
            .map(|f| size_of::<SpriteFrame>() + f.name.len())
            .sum()
    }
}

// ===================================================================
// Whole model
// ===================================================================

#[derive(Debug)]
pub enum ModelKind {
    Brush {
        data: Rc<BrushData>,
        sub: SubmodelView,
    },
    Alias(AliasData),
    Sprite(SpriteData),
}

#[derive(Debug)]
pub struct Model {
    pub name: String,
    pub registration_sequence: i32,
    pub numframes: i32,

    // volume occupied by the model graphics
    pub mins: Vec3,
    pub maxs: Vec3,
    pub radius: f32,

    pub skins: Vec<Option<ImageId>>,

    pub kind: ModelKind,
}

impl Model {
    pub fn heap_size(&self) -> usize {
        match &self.kind {
            // inline views report the shared arena once each, like the
            // old per-slot extradatasize did
            ModelKind::Brush { data, .. } => data.heap_size(),
            ModelKind::Alias(a) => a.heap_size(),
            ModelKind::Sprite(s) => s.heap_size(),
        }
    }

    pub fn brush_data(&self) -> Option<&Rc<BrushData>> {
        match &self.kind {
            ModelKind::Brush { data, .. } => Some(data),
            _ => None,
        }
    }
}
