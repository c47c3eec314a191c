//! Built-in procedural scene: a colour gradient with a disc moving across
//! it, so blur, fields and full-sample can be tried without scene files.

use std::sync::Arc;

use tessel_core::{PassType, RenderResult, RenderSettings, TesselResult};
use tessel_render::{ConvertContext, Scene, SceneDatabase, SceneLibrary, ShadingDatabase, TileContext};

pub const DEMO_SCENE: &str = "Demo";

/// Frames for the disc to cross the frame once.
const CYCLE: f64 = 48.0;

const DISC_COLOR: [f32; 4] = [1.0, 0.8, 0.2, 1.0];
const DISC_DEPTH: f32 = 1.0;
const BACKGROUND_DEPTH: f32 = 10.0;

pub struct DemoDatabase;

impl SceneDatabase for DemoDatabase {
    fn convert(&self, ctx: &ConvertContext) -> TesselResult<Box<dyn ShadingDatabase>> {
        tracing::debug!("converting demo scene at frame {:.3}", ctx.frame);
        let phase = (ctx.frame.rem_euclid(CYCLE) / CYCLE) as f32;
        Ok(Box::new(DemoShader {
            disc_x: 0.2 + 0.6 * phase,
            disc_y: 0.5,
            radius: 1.0 / 6.0,
        }))
    }
}

/// Disc position and size in fractions of the frame height.
struct DemoShader {
    disc_x: f32,
    disc_y: f32,
    radius: f32,
}

impl DemoShader {
    fn sample(&self, x: f32, y: f32, winx: f32, winy: f32) -> ([f32; 4], f32) {
        let dx = (x - self.disc_x * winx) / winy;
        let dy = (y - self.disc_y * winy) / winy;
        if dx * dx + dy * dy <= self.radius * self.radius {
            (DISC_COLOR, DISC_DEPTH)
        } else {
            ([x / winx, y / winy, 0.3, 1.0], BACKGROUND_DEPTH)
        }
    }
}

impl ShadingDatabase for DemoShader {
    fn shade_tile(&self, tile: &TileContext, result: &mut RenderResult) -> TesselResult<()> {
        let rect = tile.rect;
        let width = rect.width().max(0) as usize;
        let (winx, winy) = (tile.winx.max(1) as f32, tile.winy.max(1) as f32);
        let (jx, jy) = tile.jitter;

        let mut color = Vec::with_capacity(width * rect.height().max(0) as usize * 4);
        let mut depth = Vec::with_capacity(width * rect.height().max(0) as usize);
        for y in rect.ymin..rect.ymax {
            for x in rect.xmin..rect.xmax {
                let (c, z) = self.sample(x as f32 + 0.5 + jx, y as f32 + 0.5 + jy, winx, winy);
                color.extend_from_slice(&c);
                depth.push(z);
            }
        }

        for layer in result.layers.iter_mut() {
            if let Some(pass) = layer.pass_mut(PassType::Combined, tile.view_id) {
                if pass.rect.len() == color.len() {
                    pass.rect.copy_from_slice(&color);
                }
            }
            if let Some(pass) = layer.pass_mut(PassType::Z, tile.view_id) {
                if pass.rect.len() == depth.len() {
                    pass.rect.copy_from_slice(&depth);
                }
            }
        }
        Ok(())
    }
}

/// Library holding only the demo scene.
pub fn library(settings: RenderSettings) -> SceneLibrary {
    SceneLibrary::new().with_scene(Scene::new(DEMO_SCENE, settings, Arc::new(DemoDatabase)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disc_moves_with_frame() {
        let shader = DemoShader {
            disc_x: 0.2,
            disc_y: 0.5,
            radius: 1.0 / 6.0,
        };
        let (centre, z) = shader.sample(20.0, 50.0, 100.0, 100.0);
        assert_eq!(centre, DISC_COLOR);
        assert_eq!(z, DISC_DEPTH);
        let (corner, z) = shader.sample(99.0, 0.0, 100.0, 100.0);
        assert_eq!(corner, [0.99, 0.0, 0.3, 1.0]);
        assert_eq!(z, BACKGROUND_DEPTH);
    }

    #[test]
    fn test_library_has_demo_scene() {
        let lib = library(RenderSettings::with_size(32, 18));
        let scene = lib.scene(DEMO_SCENE).unwrap();
        assert!(scene.camera.is_some());
        assert_eq!(scene.settings.window_size(), (32, 18));
    }
}
