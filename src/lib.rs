#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod attachments;
pub mod backend;
pub mod command;
pub mod compositor;
pub mod error;
pub mod gpu;
pub mod pick;
pub mod strategy;
pub mod targets;

pub use backend::{
    BlendMode, Capabilities, CompositeInputs, CompositeParams, DepthAction, DepthMode,
    FloatPrecision, GroupDesc, GroupKey, LoadAction, OutputSelect, PassOps, PassState,
    PickPlanes, RenderBackend, TargetDesc, TargetFormat, TargetKey, ViewRect,
};
pub use command::{CommandList, CompositeFlags, RenderPass};
pub use compositor::{Compositor, FrameStage, FrameState, HiliteSettings};
pub use error::{CompositorError, Result};
pub use gpu::{TechniqueContext, TechniqueDispatch, WgpuBackend};
pub use pick::{
    ElementId, GeometryClass, OrderKind, PickSources, PixelBuffer, PixelData, PixelSelector,
    RenderOrder,
};
pub use strategy::{CompositeStrategy, FrameMode, PickSlot};
pub use targets::{MemoryStatistics, RenderTargetSet};
