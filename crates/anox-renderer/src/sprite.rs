// sprite.rs -- sprite model loading

use anox_common::error::{DropError, DropResult};
use anox_common::qfiles::{DSprFrame, DSprite, MAX_MD2SKINS, SPRITE_VERSION};
use anox_common::wire::{name_str, Reader};

use crate::model_types::{SpriteData, SpriteFrame};

pub fn load_sprite_model(name: &str, buf: &[u8]) -> DropResult<SpriteData> {
    let mut r = Reader::new(buf);
    let header = DSprite::parse(&mut r)?;

    if header.version != SPRITE_VERSION {
        return Err(DropError::new(format!(
            "{} has wrong version number ({} should be {})",
            name, header.version, SPRITE_VERSION
        )));
    }
    if header.numframes < 0 || header.numframes > MAX_MD2SKINS as i32 {
        return Err(DropError::new(format!(
            "{} has too many frames ({} > {})",
            name, header.numframes, MAX_MD2SKINS
        )));
    }

    let mut frames = Vec::with_capacity(header.numframes as usize);
    for _ in 0..header.numframes {
        let f = DSprFrame::parse(&mut r)?;
        frames.push(SpriteFrame {
            width: f.width,
            height: f.height,
            origin_x: f.origin_x,
            origin_y: f.origin_y,
            name: name_str(&f.name).to_string(),
        });
    }

    Ok(SpriteData { frames })
}
