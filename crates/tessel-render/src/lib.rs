//! # tessel-render
//!
//! The Tessel render pipeline. Splits a frame into parts, shades them on a
//! pool of worker threads and assembles fields, motion blur, full-sample
//! anti-aliasing, compositing and the sequencer into finished frames.

pub mod blur;
pub mod callbacks;
pub mod external;
pub mod fields;
pub mod filter;
mod fullsample;
pub mod pano;
pub mod parts;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod scene;
mod threads;

pub use callbacks::{BackgroundCallbacks, NullCallbacks, RenderCallbacks, RenderEvent};
pub use external::{
    CompositeInput, Compositor, ConvertContext, PanoRotation, RenderEngine, SceneDatabase,
    Sequencer, ShadingDatabase, StrokeRenderer, TileContext,
};
pub use parts::{find_next_part, parts_init, tile_size, PartStatus, RenderPart};
pub use pipeline::{AnimSummary, FrameRange, RenderPipeline};
pub use registry::{RenderHandle, RenderRegistry};
pub use render::{Mat4, Render, SharedResult};
pub use scene::{Camera, CompositeNode, NodeTree, Scene, SceneLibrary, Strip};
