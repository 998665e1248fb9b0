// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// model.rs -- model registry and registration sequencing
//
// Name-keyed cache of every loaded model. The world always sits in
// slot zero; its inline "*N" submodels live in a side table sharing
// the world's geometry arena. A registration pass brackets level
// loads: begin bumps the sequence, register stamps what the level
// uses, end evicts everything stale.

use std::rc::Rc;

use anox_common::error::{DropError, DropResult};
use anox_common::files::FileSystem;
use anox_common::q_shared::Vec3;
use anox_common::qfiles::{file_ident, IDALIASHEADER, IDBSPHEADER, IDSPRITEHEADER};
use log::warn;

use crate::alias::{self, ALIAS_BOUNDS};
use crate::bsp::{self, SurfaceBuilder};
use crate::gpu::GpuBackend;
use crate::image_cache::{ImageCache, ImageId, ImageKind};
use crate::model_types::*;
use crate::sprite;
use crate::RenderConfig;

pub const MAX_MOD_KNOWN: usize = 512;

/// Everything a load or registration pass needs besides the registry
/// itself.
pub struct RegistrationCtx<'a> {
    pub fs: &'a dyn FileSystem,
    pub gpu: &'a mut dyn GpuBackend,
    pub images: &'a mut ImageCache,
    pub builder: &'a mut dyn SurfaceBuilder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelId {
    /// slot in the named-model table
    Known(u32),
    /// index into the inline submodel table
    Inline(u32),
}

pub struct ModelRegistry {
    models: Vec<Option<Model>>,
    /// inline models from the current map, kept separate
    inline: Vec<Model>,
    registration_sequence: i32,
    flush_map: bool,
    /// single reuse buffer for PVS decompression
    vis_scratch: Vec<u8>,
}

enum ImageRefresh {
    Sprite(Vec<String>),
    Alias(Vec<String>),
    Brush(Vec<ImageId>),
}

impl ModelRegistry {
    pub fn new(config: &RenderConfig) -> Self {
        ModelRegistry {
            models: Vec::new(),
            inline: Vec::new(),
            registration_sequence: 1,
            flush_map: config.flush_map,
            vis_scratch: Vec::new(),
        }
    }

    pub fn registration_sequence(&self) -> i32 {
        self.registration_sequence
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        match id {
            ModelId::Known(i) => self.models.get(i as usize).and_then(|s| s.as_ref()),
            ModelId::Inline(i) => self.inline.get(i as usize),
        }
    }

    fn model_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        match id {
            ModelId::Known(i) => self.models.get_mut(i as usize).and_then(|s| s.as_mut()),
            ModelId::Inline(i) => self.inline.get_mut(i as usize),
        }
    }

    /// The current world model, if a map is loaded.
    pub fn world(&self) -> Option<&Model> {
        self.models.first().and_then(|s| s.as_ref())
    }

    fn world_data(&self) -> Option<&Rc<BrushData>> {
        self.world().and_then(|m| m.brush_data())
    }

    pub fn live_count(&self) -> usize {
        self.models.iter().filter(|s| s.is_some()).count()
    }

    // ============================================================
    // Lookup / load
    // ============================================================

    /// Find a model by name, loading it on a miss. With `crash` a
    /// missing file is fatal; otherwise it logs and returns `None`.
    pub fn get_by_name(
        &mut self,
        ctx: &mut RegistrationCtx,
        name: &str,
        crash: bool,
    ) -> DropResult<Option<ModelId>> {
        if name.is_empty() {
            return Err(DropError::new("get_by_name: empty name"));
        }

        // inline models are grabbed only from the worldmodel
        if let Some(rest) = name.strip_prefix('*') {
            let i: usize = rest
                .parse()
                .map_err(|_| DropError::new("bad inline model number"))?;
            let numsubmodels = self
                .world_data()
                .map(|d| d.submodels.len())
                .unwrap_or(0);
            if i < 1 || i >= numsubmodels {
                return Err(DropError::new("bad inline model number"));
            }
            return Ok(Some(ModelId::Inline(i as u32)));
        }

        // search the currently loaded models
        for (i, slot) in self.models.iter().enumerate() {
            if let Some(m) = slot {
                if m.name == name {
                    return Ok(Some(ModelId::Known(i as u32)));
                }
            }
        }

        // find a free model slot
        let slot = match self.models.iter().position(|s| s.is_none()) {
            Some(i) => i,
            None => {
                if self.models.len() == MAX_MOD_KNOWN {
                    return Err(DropError::new("model cache is full"));
                }
                self.models.push(None);
                self.models.len() - 1
            }
        };

        // load the file
        let Some(buf) = ctx.fs.load_file(name) else {
            if crash {
                return Err(DropError::new(format!("get_by_name: {} not found", name)));
            }
            warn!("model {} not found", name);
            return Ok(None);
        };

        // call the appropriate loader based on file magic
        let model = match file_ident(&buf)? {
            IDALIASHEADER => self.load_alias(ctx, name, &buf)?,
            IDSPRITEHEADER => self.load_sprite(ctx, name, &buf)?,
            IDBSPHEADER => {
                if slot != 0 {
                    return Err(DropError::new("loaded a brush model after the world"));
                }
                self.load_brush(ctx, name, &buf)?
            }
            _ => {
                return Err(DropError::new(format!(
                    "get_by_name: unknown fileid for {}",
                    name
                )));
            }
        };

        self.models[slot] = Some(model);
        Ok(Some(ModelId::Known(slot as u32)))
    }

    fn load_alias(
        &mut self,
        ctx: &mut RegistrationCtx,
        name: &str,
        buf: &[u8],
    ) -> DropResult<Model> {
        let data = alias::load_alias_model(name, buf)?;

        let mut skins = Vec::with_capacity(data.skin_paths.len());
        for path in &data.skin_paths {
            skins.push(ctx.images.register_skin(ctx.fs, ctx.gpu, path)?);
        }

        let mins = [-ALIAS_BOUNDS; 3];
        let maxs = [ALIAS_BOUNDS; 3];
        Ok(Model {
            name: name.to_string(),
            registration_sequence: self.registration_sequence,
            numframes: data.frames.len() as i32,
            mins,
            maxs,
            radius: bsp::radius_from_bounds(&mins, &maxs),
            skins,
            kind: ModelKind::Alias(data),
        })
    }

    fn load_sprite(
        &mut self,
        ctx: &mut RegistrationCtx,
        name: &str,
        buf: &[u8],
    ) -> DropResult<Model> {
        let data = sprite::load_sprite_model(name, buf)?;

        let mut skins = Vec::with_capacity(data.frames.len());
        for frame in &data.frames {
            skins.push(ctx.images.find_image(ctx.fs, ctx.gpu, &frame.name, ImageKind::Sprite)?);
        }

        Ok(Model {
            name: name.to_string(),
            registration_sequence: self.registration_sequence,
            numframes: data.frames.len() as i32,
            mins: [0.0; 3],
            maxs: [0.0; 3],
            radius: 0.0,
            skins,
            kind: ModelKind::Sprite(data),
        })
    }

    fn load_brush(
        &mut self,
        ctx: &mut RegistrationCtx,
        name: &str,
        buf: &[u8],
    ) -> DropResult<Model> {
        let data = bsp::load_brush_model(name, buf, ctx.fs, ctx.gpu, ctx.images, ctx.builder)?;

        // set up the inline submodels
        self.inline = (0..data.submodels.len())
            .map(|i| {
                let sub = &data.submodels[i];
                Model {
                    name: format!("*{}", i),
                    registration_sequence: self.registration_sequence,
                    numframes: 2,
                    mins: sub.mins,
                    maxs: sub.maxs,
                    radius: sub.radius,
                    skins: Vec::new(),
                    kind: ModelKind::Brush {
                        data: Rc::clone(&data),
                        sub: bsp::submodel_view(&data, i),
                    },
                }
            })
            .collect();

        let world_sub = data.submodels[0];
        Ok(Model {
            name: name.to_string(),
            registration_sequence: self.registration_sequence,
            numframes: 2, // regular and alternate animation
            mins: world_sub.mins,
            maxs: world_sub.maxs,
            radius: world_sub.radius,
            skins: Vec::new(),
            kind: ModelKind::Brush {
                sub: bsp::submodel_view(&data, 0),
                data,
            },
        })
    }

    // ============================================================
    // Registration
    // ============================================================

    /// Start a registration pass for a new map. Bumps the sequence,
    /// frees the old world when the name changed (or flushing is
    /// forced), and loads the world into slot zero.
    pub fn begin_registration(
        &mut self,
        ctx: &mut RegistrationCtx,
        map_name: &str,
    ) -> DropResult<ModelId> {
        self.registration_sequence += 1;
        ctx.images
            .set_registration_sequence(self.registration_sequence);

        let fullname = format!("maps/{}.bsp", map_name);

        // explicitly free the old map if different; this guarantees
        // the world is always slot zero
        let stale = match self.world() {
            Some(world) => self.flush_map || world.name != fullname,
            None => false,
        };
        if stale {
            self.free_world();
        }

        let id = self
            .get_by_name(ctx, &fullname, true)?
            .ok_or_else(|| DropError::new("get_by_name: crash load returned nothing"))?;

        // the world itself counts as touched by this pass
        let seq = self.registration_sequence;
        if let Some(world) = self.model_mut(id) {
            world.registration_sequence = seq;
        }

        Ok(id)
    }

    /// Find or load a model and stamp it, along with every image it
    /// references, as live for the current pass.
    pub fn register_model(
        &mut self,
        ctx: &mut RegistrationCtx,
        name: &str,
    ) -> DropResult<Option<ModelId>> {
        let Some(id) = self.get_by_name(ctx, name, false)? else {
            return Ok(None);
        };

        let seq = self.registration_sequence;
        let refresh = {
            let model = self.model_mut(id).expect("id from lookup is live");
            model.registration_sequence = seq;
            match &model.kind {
                ModelKind::Sprite(s) => {
                    ImageRefresh::Sprite(s.frames.iter().map(|f| f.name.clone()).collect())
                }
                ModelKind::Alias(a) => ImageRefresh::Alias(a.skin_paths.clone()),
                ModelKind::Brush { data, .. } => {
                    ImageRefresh::Brush(data.texinfo.iter().map(|ti| ti.image).collect())
                }
            }
        };

        // re-resolve referenced images so they get this pass's stamp
        match refresh {
            ImageRefresh::Sprite(names) => {
                let mut skins = Vec::with_capacity(names.len());
                for n in &names {
                    skins.push(ctx.images.find_image(ctx.fs, ctx.gpu, n, ImageKind::Sprite)?);
                }
                self.model_mut(id).expect("still live").skins = skins;
            }
            ImageRefresh::Alias(paths) => {
                let mut skins = Vec::with_capacity(paths.len());
                for p in &paths {
                    skins.push(ctx.images.register_skin(ctx.fs, ctx.gpu, p)?);
                }
                self.model_mut(id).expect("still live").skins = skins;
            }
            ImageRefresh::Brush(ids) => {
                for image in ids {
                    ctx.images.touch(image);
                }
            }
        }

        Ok(Some(id))
    }

    /// Close the registration pass: every model and image not stamped
    /// by it is freed.
    pub fn end_registration(&mut self, ctx: &mut RegistrationCtx) {
        let seq = self.registration_sequence;

        let mut world_freed = false;
        for (i, slot) in self.models.iter_mut().enumerate() {
            let stale = matches!(slot, Some(m) if m.registration_sequence != seq);
            if stale {
                *slot = None;
                if i == 0 {
                    world_freed = true;
                }
            }
        }
        if world_freed {
            self.inline.clear();
        }

        ctx.images.free_unused(ctx.gpu);
    }

    // ============================================================
    // Freeing
    // ============================================================

    fn free_world(&mut self) {
        if let Some(slot) = self.models.first_mut() {
            *slot = None;
        }
        self.inline.clear();
    }

    /// Drop one model; its arena goes with it (inline views keep a
    /// shared world arena alive until the world itself goes).
    pub fn free(&mut self, id: ModelId) {
        match id {
            ModelId::Known(0) => self.free_world(),
            ModelId::Known(i) => {
                if let Some(slot) = self.models.get_mut(i as usize) {
                    *slot = None;
                }
            }
            // inline models die with the world
            ModelId::Inline(_) => {}
        }
    }

    pub fn free_all(&mut self) {
        self.models.clear();
        self.inline.clear();
    }

    // ============================================================
    // Queries
    // ============================================================

    /// Leaf of the world containing `p`. Fatal when no world model is
    /// loaded.
    pub fn point_in_leaf(&self, p: &Vec3) -> DropResult<&Leaf> {
        let data = self
            .world_data()
            .ok_or_else(|| DropError::new("point_in_leaf: bad model"))?;
        bsp::point_in_leaf(data, p)
    }

    /// PVS row for a world cluster. The returned slice borrows the
    /// registry's scratch buffer and dies at the next call.
    pub fn cluster_pvs(&mut self, cluster: i32) -> DropResult<&[u8]> {
        let data = Rc::clone(
            self.world_data()
                .ok_or_else(|| DropError::new("cluster_pvs: no world model"))?,
        );
        bsp::cluster_pvs(&data, cluster, &mut self.vis_scratch)
    }

    /// Body of the modellist console command.
    pub fn model_list(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut total = 0usize;

        out.push_str("Loaded models:\n");
        for model in self.models.iter().flatten() {
            let size = model.heap_size();
            total += size;
            let _ = writeln!(out, "{:8} : {}", size, model.name);
        }
        let _ = writeln!(out, "Total resident: {}", total);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::tests::Md2Fixture;
    use crate::bsp::tests::BspFixture;
    use crate::bsp::NullSurfaceBuilder;
    use crate::sprite::tests::Sp2Fixture;
    use crate::testutil::{colormap_pcx, test_config, RecordingGpu};
    use anox_common::files::MemFileSystem;
    use anox_common::qfiles::{DModel, LUMP_MODELS};

    fn base_fs() -> MemFileSystem {
        let mut fs = MemFileSystem::new();
        fs.insert("graphics/colormap.pcx", colormap_pcx());
        fs.insert("maps/demo1.bsp", BspFixture::new().build());
        fs
    }

    /// Fixture world with a second (inline) submodel.
    fn two_submodel_bsp() -> Vec<u8> {
        let mut fixture = BspFixture::new();
        let mut models = Vec::new();
        for _ in 0..2 {
            for v in [0.0f32, 0.0, -16.0, 64.0, 64.0, 16.0, 0.0, 0.0, 0.0] {
                models.extend_from_slice(&v.to_le_bytes());
            }
            for v in [0i32, 0, 1] {
                models.extend_from_slice(&v.to_le_bytes());
            }
        }
        assert_eq!(models.len(), 2 * DModel::ON_DISK_SIZE);
        fixture.set_lump(LUMP_MODELS, models);
        fixture.build()
    }

    macro_rules! test_env {
        ($fs:expr => $gpu:ident, $images:ident, $builder:ident, $registry:ident, $ctx:ident) => {
            let mut $gpu = RecordingGpu::new();
            let mut $images = ImageCache::init(&$fs, &mut $gpu, &test_config()).unwrap();
            let mut $builder = NullSurfaceBuilder;
            let mut $registry = ModelRegistry::new(&test_config());
            let mut $ctx = RegistrationCtx {
                fs: &$fs,
                gpu: &mut $gpu,
                images: &mut $images,
                builder: &mut $builder,
            };
            let _ = &mut $ctx;
        };
    }

    // ---------------------------------------------------------
    //  Loading and lookup
    // ---------------------------------------------------------

    #[test]
    fn test_begin_registration_loads_world_into_slot_zero() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);

        let id = registry.begin_registration(&mut ctx, "demo1").unwrap();
        assert_eq!(id, ModelId::Known(0));

        let world = registry.world().unwrap();
        assert_eq!(world.name, "maps/demo1.bsp");
        assert_eq!(world.numframes, 2);
        assert_eq!(world.registration_sequence, 2);
        assert!(matches!(world.kind, ModelKind::Brush { .. }));
    }

    #[test]
    fn test_begin_registration_missing_map_is_fatal() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        assert!(registry.begin_registration(&mut ctx, "nosuchmap").is_err());
    }

    #[test]
    fn test_wrong_version_world_registers_nothing() {
        let mut fs = base_fs();
        fs.insert("maps/old.bsp", BspFixture::new().build_with_version(29));
        test_env!(fs => gpu, images, builder, registry, ctx);

        assert!(registry.begin_registration(&mut ctx, "old").is_err());
        assert!(registry.world().is_none(), "no partial model registered");
    }

    #[test]
    fn test_get_by_name_dedup() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let a = registry
            .get_by_name(&mut ctx, "maps/demo1.bsp", true)
            .unwrap();
        let b = registry
            .get_by_name(&mut ctx, "maps/demo1.bsp", true)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_get_by_name_missing_soft_and_crash() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);

        assert!(registry
            .get_by_name(&mut ctx, "models/nothing.md2", false)
            .unwrap()
            .is_none());
        assert!(registry
            .get_by_name(&mut ctx, "models/nothing.md2", true)
            .is_err());
    }

    #[test]
    fn test_unknown_magic_is_fatal() {
        let mut fs = base_fs();
        fs.insert("models/bad.mdl", b"WHAT????".to_vec());
        test_env!(fs => gpu, images, builder, registry, ctx);
        let err = registry
            .get_by_name(&mut ctx, "models/bad.mdl", false)
            .unwrap_err();
        assert!(err.message().contains("unknown fileid"));
    }

    #[test]
    fn test_brush_model_after_world_is_fatal() {
        let mut fs = base_fs();
        fs.insert("maps/demo2.bsp", BspFixture::new().build());
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let err = registry
            .get_by_name(&mut ctx, "maps/demo2.bsp", true)
            .unwrap_err();
        assert!(err.message().contains("after the world"));
    }

    // ---------------------------------------------------------
    //  Inline models
    // ---------------------------------------------------------

    #[test]
    fn test_inline_model_lookup() {
        let mut fs = base_fs();
        fs.insert("maps/demo1.bsp", two_submodel_bsp());
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let id = registry.get_by_name(&mut ctx, "*1", false).unwrap().unwrap();
        assert_eq!(id, ModelId::Inline(1));

        let inline = registry.model(id).unwrap();
        assert_eq!(inline.name, "*1");
        // inline views do not own the leaf table
        match &inline.kind {
            ModelKind::Brush { sub, data } => {
                assert_eq!(sub.numleafs, 0);
                assert_eq!(data.submodels.len(), 2);
            }
            _ => panic!("inline model is not brush"),
        }
    }

    #[test]
    fn test_inline_model_bad_numbers() {
        let mut fs = base_fs();
        fs.insert("maps/demo1.bsp", two_submodel_bsp());
        test_env!(fs => gpu, images, builder, registry, ctx);

        // no world yet
        assert!(registry.get_by_name(&mut ctx, "*1", false).is_err());

        registry.begin_registration(&mut ctx, "demo1").unwrap();
        assert!(registry.get_by_name(&mut ctx, "*0", false).is_err());
        assert!(registry.get_by_name(&mut ctx, "*2", false).is_err());
        assert!(registry.get_by_name(&mut ctx, "*junk", false).is_err());
    }

    // ---------------------------------------------------------
    //  Alias and sprite models through the registry
    // ---------------------------------------------------------

    #[test]
    fn test_register_alias_model_resolves_skins() {
        let mut fs = base_fs();
        fs.insert("models/grunt/tris.md2", Md2Fixture::default().build());
        // skin base.pcx resolves through the png candidate
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png).unwrap();
        fs.insert("models/grunt/base.png", png.into_inner());

        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let id = registry
            .register_model(&mut ctx, "models/grunt/tris.md2")
            .unwrap()
            .unwrap();
        let model = registry.model(id).unwrap();

        assert_eq!(model.numframes, 1);
        assert_eq!(model.mins, [-32.0; 3]);
        assert_eq!(model.maxs, [32.0; 3]);
        assert_eq!(model.skins.len(), 1);
        assert!(model.skins[0].is_some(), "skin resolved");
        assert_eq!(model.registration_sequence, 2);
    }

    #[test]
    fn test_register_sprite_model() {
        let mut fs = base_fs();
        fs.insert("sprites/s_bubble.sp2", Sp2Fixture::default().build());
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let id = registry
            .register_model(&mut ctx, "sprites/s_bubble.sp2")
            .unwrap()
            .unwrap();
        let model = registry.model(id).unwrap();
        assert_eq!(model.numframes, 1);
        // frame skin file does not exist in this fs
        assert_eq!(model.skins, vec![None]);
    }

    #[test]
    fn test_register_missing_model_is_none() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        assert!(registry
            .register_model(&mut ctx, "models/gone.md2")
            .unwrap()
            .is_none());
    }

    // ---------------------------------------------------------
    //  Eviction across registration passes
    // ---------------------------------------------------------

    #[test]
    fn test_end_registration_frees_untouched_models() {
        let mut fs = base_fs();
        fs.insert("models/grunt/tris.md2", Md2Fixture::default().build());
        test_env!(fs => gpu, images, builder, registry, ctx);

        // pass 1: world + alias model
        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let alias = registry
            .register_model(&mut ctx, "models/grunt/tris.md2")
            .unwrap()
            .unwrap();
        registry.end_registration(&mut ctx);
        assert_eq!(registry.live_count(), 2);

        // pass 2: only the world is touched
        registry.begin_registration(&mut ctx, "demo1").unwrap();
        registry.end_registration(&mut ctx);

        assert_eq!(registry.live_count(), 1);
        assert!(registry.model(alias).is_none(), "stale alias evicted");
        assert!(registry.world().is_some(), "world survives");
    }

    #[test]
    fn test_same_map_keeps_world_arena() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);

        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let first = Rc::as_ptr(registry.world_data().unwrap());
        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let second = Rc::as_ptr(registry.world_data().unwrap());
        assert_eq!(first, second, "same map is not reloaded");
    }

    #[test]
    fn test_flush_map_reloads_world() {
        let fs = base_fs();
        let mut gpu = RecordingGpu::new();
        let mut images = ImageCache::init(&fs, &mut gpu, &test_config()).unwrap();
        let mut builder = NullSurfaceBuilder;
        let mut registry = ModelRegistry::new(&RenderConfig {
            flush_map: true,
            ..test_config()
        });
        let mut ctx = RegistrationCtx {
            fs: &fs,
            gpu: &mut gpu,
            images: &mut images,
            builder: &mut builder,
        };

        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let first = Rc::as_ptr(registry.world_data().unwrap());
        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let second = Rc::as_ptr(registry.world_data().unwrap());
        assert_ne!(first, second, "flush forces a reload");
    }

    #[test]
    fn test_free_all() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        registry.free_all();
        assert_eq!(registry.live_count(), 0);
        assert!(registry.world().is_none());
        assert!(registry.point_in_leaf(&[0.0, 0.0, 0.0]).is_err());
    }

    // ---------------------------------------------------------
    //  Queries
    // ---------------------------------------------------------

    #[test]
    fn test_point_in_leaf_requires_world() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        assert!(registry.point_in_leaf(&[0.0, 0.0, 0.0]).is_err());

        registry.begin_registration(&mut ctx, "demo1").unwrap();
        let leaf = registry.point_in_leaf(&[32.0, 32.0, -8.0]).unwrap();
        assert_eq!(leaf.cluster, 0);
    }

    #[test]
    fn test_cluster_pvs_through_registry() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        assert_eq!(registry.cluster_pvs(0).unwrap(), &[0x01]);
        assert_eq!(registry.cluster_pvs(-1).unwrap(), &[0xFF]);
    }

    // ---------------------------------------------------------
    //  Console listing
    // ---------------------------------------------------------

    #[test]
    fn test_model_list_reports_names_and_total() {
        let fs = base_fs();
        test_env!(fs => gpu, images, builder, registry, ctx);
        registry.begin_registration(&mut ctx, "demo1").unwrap();

        let listing = registry.model_list();
        assert!(listing.contains("maps/demo1.bsp"));
        assert!(listing.contains("Total resident:"));
    }
}
