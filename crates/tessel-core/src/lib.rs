//! # tessel-core
//!
//! Core types for the Tessel render pipeline.
//! This crate contains the foundational pieces shared by every Tessel crate:
//! pixel rectangles, render settings, the `RenderResult` store, the tile
//! spill file, report lists, render statistics and error types.

pub mod config;
pub mod error;
pub mod hash;
pub mod output;
pub mod rect;
pub mod report;
pub mod result;
pub mod stats;
pub mod tile_file;

pub use config::*;

pub use error::{TesselError, TesselResult};
pub use hash::{hash_result, ContentHash};
pub use output::{make_pic_path, FrameWriter, OutputImage};
pub use rect::{Rect, ViewPlane};
pub use report::{Report, ReportKind, ReportList};
pub use result::{
    LayerSelector, PassType, RenderLayer, RenderPass, RenderResult, RenderView, ResultImage,
    ResultLayout, StorageMode, ViewSelector,
};
pub use stats::RenderStats;
pub use tile_file::TileFile;
