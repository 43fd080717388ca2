// lib.rs — 全景导览核心：场景加载、手势、相机、热点拾取、区域旁白
//
// 这里不依赖窗口或 GPU，渲染由宿主通过 `FrameRenderer` 接入。

pub mod camera;
pub mod config;
pub mod gesture;
pub mod hotspot;
pub mod loader;
pub mod mesh;
pub mod panorama;
pub mod region;
pub mod scene;

#[cfg(test)]
mod test_support;

pub use camera::{CameraController, CameraState, CameraView};
pub use config::ViewerConfig;
pub use gesture::{GestureInterpreter, GestureOutput, GesturePhase, PointerId};
pub use hotspot::{Billboard, Viewport};
pub use loader::{AssetResolver, FileResolver, LoadError, SceneLoader};
pub use panorama::{Frame, FrameRenderer, PanoramaViewer, ViewerEvent};
pub use region::RegionLocator;
pub use scene::{Hotspot, HotspotId, ImageRef, Region, RegionId, Scene, SceneId, SceneSpec, Tour};
