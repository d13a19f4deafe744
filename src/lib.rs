//! Layered raster editing engine: a stack of named RGBA layers composited
//! with the "over" operator, binary selection masks, brush / eraser / bucket
//! tools, snapshot persistence and a directory-per-project store.

pub mod canvas;
pub mod cli;
pub mod color;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod selection;
pub mod settings;

pub use canvas::{Layer, LayerStack, PixelBuffer};
pub use error::{ErrorKind, LayerError, Result};
pub use project::{Project, ProjectMeta, ProjectStore, StackSummary};
pub use selection::{LassoParams, Point, SelectionMask};
pub use settings::Settings;
