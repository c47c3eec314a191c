//! Scenes as the pipeline sees them: settings, camera, compositor tree,
//! sequence strips and a handle to the scene's render data.

use std::sync::Arc;

use tessel_core::{RenderSettings, ViewPlane};

use crate::external::{Compositor, RenderEngine, SceneDatabase, Sequencer, StrokeRenderer};
use crate::render::{Mat4, IDENTITY};

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub name: String,
    pub viewplane: ViewPlane,
    pub clip_start: f32,
    pub clip_end: f32,
    pub ortho: bool,
    pub panorama: bool,
    pub view_matrix: Mat4,
}

impl Camera {
    /// Perspective camera looking down -Z with a view plane fitted to
    /// `aspect` (width / height).
    pub fn perspective(name: impl Into<String>, aspect: f32) -> Self {
        let (hx, hy) = if aspect >= 1.0 {
            (0.5, 0.5 / aspect)
        } else {
            (0.5 * aspect, 0.5)
        };
        Self {
            name: name.into(),
            viewplane: ViewPlane::new(-hx, hx, -hy, hy),
            clip_start: 0.1,
            clip_end: 100.0,
            ortho: false,
            panorama: false,
            view_matrix: IDENTITY,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.clip_start > 0.0
            && self.clip_end > self.clip_start
            && self.viewplane.width() > 0.0
            && self.viewplane.height() > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompositeNode {
    /// Reads the render layers of `scene`, or of the owning scene when
    /// `None`.
    RenderLayers { scene: Option<String> },
    Composite,
    OutputFile { path: String },
    Group(NodeTree),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeTree {
    pub nodes: Vec<CompositeNode>,
}

impl NodeTree {
    /// True when the tree, or a group inside it, writes a result.
    pub fn has_composite_output(&self) -> bool {
        self.nodes.iter().any(|node| match node {
            CompositeNode::Composite | CompositeNode::OutputFile { .. } => true,
            CompositeNode::Group(tree) => tree.has_composite_output(),
            _ => false,
        })
    }

    /// Scene names of render-layer nodes; `None` entries read the owning
    /// scene.
    pub fn render_layer_scenes(&self) -> impl Iterator<Item = Option<&str>> {
        self.nodes.iter().filter_map(|node| match node {
            CompositeNode::RenderLayers { scene } => Some(scene.as_deref()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strip {
    /// Renders another scene, optionally through its own camera.
    Scene { scene: String, has_camera: bool },
    Image { path: String },
    Sound,
}

#[derive(Clone)]
pub struct Scene {
    pub name: String,
    pub settings: RenderSettings,
    pub camera: Option<Camera>,
    pub use_nodes: bool,
    pub nodetree: Option<NodeTree>,
    pub strips: Vec<Strip>,
    pub database: Arc<dyn SceneDatabase>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("name", &self.name)
            .field("camera", &self.camera)
            .field("use_nodes", &self.use_nodes)
            .field("strips", &self.strips.len())
            .finish()
    }
}

impl Scene {
    pub fn new(
        name: impl Into<String>,
        settings: RenderSettings,
        database: Arc<dyn SceneDatabase>,
    ) -> Self {
        let aspect = settings.resolution_x.max(1) as f32 / settings.resolution_y.max(1) as f32;
        Self {
            name: name.into(),
            settings,
            camera: Some(Camera::perspective("Camera", aspect)),
            use_nodes: false,
            nodetree: None,
            strips: Vec::new(),
            database,
        }
    }

    /// Compositing is on and a tree exists to run.
    pub fn uses_compositor(&self) -> bool {
        self.settings.use_compositor && self.use_nodes && self.nodetree.is_some()
    }

    /// The sequencer has something other than sound to render.
    pub fn sequencer_active(&self) -> bool {
        self.settings.use_sequencer && self.strips.iter().any(|s| !matches!(s, Strip::Sound))
    }

    /// Whether the 3D scene itself must be rendered for compositing. With
    /// `this_scene` only render-layer nodes reading this scene count.
    pub fn composite_needs_render(&self, this_scene: bool) -> bool {
        let Some(tree) = self.nodetree.as_ref() else {
            return true;
        };
        if !self.use_nodes || !self.settings.use_compositor {
            return true;
        }
        tree.render_layer_scenes()
            .any(|scene| !this_scene || scene.map_or(true, |s| s == self.name))
    }
}

/// All scenes of a session plus the shared external services.
#[derive(Default, Clone)]
pub struct SceneLibrary {
    pub scenes: Vec<Scene>,
    pub compositor: Option<Arc<dyn Compositor>>,
    pub sequencer: Option<Arc<dyn Sequencer>>,
    pub engines: Vec<Arc<dyn RenderEngine>>,
    pub stroke_renderer: Option<Arc<dyn StrokeRenderer>>,
}

impl SceneLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.scenes.push(scene);
        self
    }

    pub fn scene(&self, name: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.name == name)
    }

    pub fn scene_mut(&mut self, name: &str) -> Option<&mut Scene> {
        self.scenes.iter_mut().find(|s| s.name == name)
    }

    pub fn engine(&self, name: &str) -> Option<&Arc<dyn RenderEngine>> {
        self.engines.iter().find(|e| e.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{ConvertContext, ShadingDatabase};
    use tessel_core::TesselResult;

    struct NoDatabase;

    impl SceneDatabase for NoDatabase {
        fn convert(&self, _ctx: &ConvertContext) -> TesselResult<Box<dyn ShadingDatabase>> {
            Err(tessel_core::TesselError::Engine("no data".into()))
        }
    }

    fn scene() -> Scene {
        Scene::new("Main", RenderSettings::with_size(16, 8), Arc::new(NoDatabase))
    }

    #[test]
    fn test_perspective_camera_fits_aspect() {
        let cam = Camera::perspective("Cam", 2.0);
        assert_eq!(cam.viewplane.width(), 1.0);
        assert_eq!(cam.viewplane.height(), 0.5);
        assert!(cam.is_valid());
    }

    #[test]
    fn test_composite_output_found_in_group() {
        let tree = NodeTree {
            nodes: vec![
                CompositeNode::RenderLayers { scene: None },
                CompositeNode::Group(NodeTree {
                    nodes: vec![CompositeNode::Composite],
                }),
            ],
        };
        assert!(tree.has_composite_output());
        let empty = NodeTree {
            nodes: vec![CompositeNode::Other("Blur".into())],
        };
        assert!(!empty.has_composite_output());
    }

    #[test]
    fn test_composite_needs_render() {
        let mut sc = scene();
        assert!(sc.composite_needs_render(true));

        sc.settings.use_compositor = true;
        sc.use_nodes = true;
        sc.nodetree = Some(NodeTree {
            nodes: vec![
                CompositeNode::RenderLayers {
                    scene: Some("Other".into()),
                },
                CompositeNode::Composite,
            ],
        });
        assert!(!sc.composite_needs_render(true));
        assert!(sc.composite_needs_render(false));
    }

    #[test]
    fn test_sequencer_ignores_sound() {
        let mut sc = scene();
        sc.settings.use_sequencer = true;
        sc.strips.push(Strip::Sound);
        assert!(!sc.sequencer_active());
        sc.strips.push(Strip::Image {
            path: "a.png".into(),
        });
        assert!(sc.sequencer_active());
    }
}
