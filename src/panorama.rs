// panorama.rs — 全景查看器：把加载、手势、相机、热点、区域串成每帧的固定流程
//
// 每帧顺序（不可调换）：
//   1. 相机 tick
//   2. 由 (航向, 俯仰) 重新计算视线与矩阵
//   3. 热点公告板朝向相机
//   4. 区域匹配
//   5. 交给渲染器绘制
//
// 输入回调与渲染在同一个逻辑线程上串行执行；只有取图/解码在后台线程。

use log::{debug, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::{CameraController, CameraState, CameraView};
use crate::config::ViewerConfig;
use crate::gesture::{GestureInterpreter, GestureOutput, GesturePhase, PointerId};
use crate::hotspot::{build_billboards, hit_test, orient_billboards, Billboard, Viewport};
use crate::loader::{AssetResolver, LoadError, LoadOutcome, LoadTicket, SceneLoader};
use crate::region::RegionLocator;
use crate::scene::{HotspotId, Region, RegionId, Scene, SceneId, SceneSpec};

/// 发给宿主的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    HotspotSelected(HotspotId),
    RegionChanged(Option<RegionId>),
    LoadFailed { scene: SceneId, error: LoadError },
}

/// 一帧要画的内容。
pub struct Frame<'a> {
    pub view: &'a CameraView,
    pub billboards: &'a [Billboard],
    /// 当前场景；为 None 时渲染器显示占位贴图
    pub scene: Option<&'a Scene>,
    pub region: Option<&'a Region>,
    pub loading: bool,
}

pub trait FrameRenderer {
    type Error;

    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), Self::Error>;
}

pub struct PanoramaViewer {
    config: ViewerConfig,
    camera: CameraController,
    gestures: GestureInterpreter,
    regions: RegionLocator,
    loader: SceneLoader,
    scene: Option<Scene>,
    billboards: Vec<Billboard>,
    view: CameraView,
    viewport: Viewport,
    events: Vec<ViewerEvent>,
}

impl PanoramaViewer {
    pub fn new(config: ViewerConfig, resolver: Arc<dyn AssetResolver>) -> Self {
        let config = config.sanitized();
        let camera = CameraController::new(&config);
        let viewport = Viewport::new(1.0, 1.0);
        let view = CameraView::new(camera.state(), viewport.aspect(), config.sphere_radius * 2.0);

        Self {
            gestures: GestureInterpreter::new(&config),
            regions: RegionLocator::new(config.region_debounce_secs),
            loader: SceneLoader::new(resolver, &config),
            camera,
            scene: None,
            billboards: Vec::new(),
            view,
            viewport,
            events: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn camera(&self) -> &CameraState {
        self.camera.state()
    }

    pub fn view(&self) -> &CameraView {
        &self.view
    }

    pub fn billboards(&self) -> &[Billboard] {
        &self.billboards
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn current_region(&self) -> Option<&Region> {
        self.regions.current()
    }

    pub fn is_loading(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn gesture_phase(&self) -> GesturePhase {
        self.gestures.phase()
    }

    pub fn auto_rotate(&self) -> bool {
        self.camera.auto_rotate()
    }

    pub fn set_auto_rotate(&mut self, enabled: bool) {
        self.camera.set_auto_rotate(enabled);
    }

    pub fn set_drag_sensitivity(&mut self, sensitivity: f32) {
        self.config.drag_sensitivity = sensitivity;
        self.gestures.set_sensitivity(sensitivity);
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn AssetResolver>) {
        self.loader.set_resolver(resolver);
    }

    pub fn drain_events(&mut self) -> Vec<ViewerEvent> {
        std::mem::take(&mut self.events)
    }

    /// 请求切换场景。与当前场景或正在加载的场景相同时什么都不做。
    pub fn open_scene(&mut self, spec: SceneSpec) -> Option<LoadTicket> {
        if self.loader.pending_scene() == Some(&spec.id) {
            debug!("scene `{}` is already loading", spec.id);
            return None;
        }
        if !self.loader.is_loading() && self.scene.as_ref().map(Scene::id) == Some(&spec.id) {
            debug!("scene `{}` is already active", spec.id);
            return None;
        }
        Some(self.loader.load(spec))
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        self.viewport = Viewport::new(width, height);
    }

    pub fn reset_view(&mut self) {
        self.camera.reset_view();
    }

    pub fn pointer_down(&mut self, id: PointerId, x: f32, y: f32) {
        let out = self.gestures.pointer_down(id, x, y, self.camera.state());
        self.apply_gesture(out);
    }

    pub fn pointer_move(&mut self, id: PointerId, x: f32, y: f32) {
        let out = self.gestures.pointer_move(id, x, y, self.camera.state());
        self.apply_gesture(out);
    }

    pub fn pointer_up(&mut self, id: PointerId, x: f32, y: f32) {
        let out = self.gestures.pointer_up(id, x, y);
        self.apply_gesture(out);
    }

    pub fn pointer_cancel(&mut self, id: PointerId) {
        self.gestures.pointer_cancel(id);
        self.camera.set_interacting(self.gestures.is_active());
    }

    pub fn wheel(&mut self, delta: f32) {
        let out = self.gestures.wheel(delta, self.camera.state().fov);
        self.apply_gesture(out);
    }

    /// 推进一帧并绘制。加载失败不会中断循环。
    pub fn frame<R: FrameRenderer>(&mut self, dt: f32, renderer: &mut R) -> Result<(), R::Error> {
        self.poll_loads(Instant::now());
        self.camera.set_interacting(self.gestures.is_active());

        self.camera.tick(dt);
        self.view = CameraView::new(
            self.camera.state(),
            self.viewport.aspect(),
            self.config.sphere_radius * 2.0,
        );
        orient_billboards(&mut self.billboards, &self.view);
        if let Some(change) = self.regions.update(self.view.heading, dt) {
            self.events.push(ViewerEvent::RegionChanged(change));
        }

        renderer.draw(&Frame {
            view: &self.view,
            billboards: &self.billboards,
            scene: self.scene.as_ref(),
            region: self.regions.current(),
            loading: self.loader.is_loading(),
        })
    }

    pub fn poll_loads(&mut self, now: Instant) {
        if let Some(outcome) = self.loader.poll(now) {
            self.apply_outcome(outcome);
        }
    }

    /// 阻塞等待当前加载结束；有结果被应用时返回 true。
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        match self.loader.wait(timeout) {
            Some(outcome) => {
                self.apply_outcome(outcome);
                true
            }
            None => false,
        }
    }

    fn apply_outcome(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Loaded(scene) => self.activate(scene),
            LoadOutcome::Failed { scene, error } => {
                self.events.push(ViewerEvent::LoadFailed { scene, error });
            }
        }
    }

    fn activate(&mut self, scene: Scene) {
        info!(
            "scene `{}` active: {} hotspots, {} regions",
            scene.id(),
            scene.spec.hotspots.len(),
            scene.spec.regions.len()
        );

        if self.regions.current().is_some() {
            self.events.push(ViewerEvent::RegionChanged(None));
        }
        self.regions.set_regions(scene.spec.regions.clone());

        self.gestures.reset();
        self.camera.set_interacting(false);
        self.camera.begin_scene(scene.spec.initial_heading);

        // 整体替换，不在旧列表上追加
        self.billboards = build_billboards(
            &scene.spec.hotspots,
            self.config.hotspot_distance,
            self.config.hotspot_size,
        );
        self.view = CameraView::new(
            self.camera.state(),
            self.viewport.aspect(),
            self.config.sphere_radius * 2.0,
        );
        orient_billboards(&mut self.billboards, &self.view);

        self.scene = Some(scene);
    }

    fn apply_gesture(&mut self, out: GestureOutput) {
        match out {
            GestureOutput::None => {}
            GestureOutput::Target { heading, pitch } => self.camera.set_target(heading, pitch),
            GestureOutput::Fov(fov) => self.camera.set_fov(fov),
            GestureOutput::Tap {
                x,
                y,
                start_heading,
                start_pitch,
            } => {
                self.camera.set_target(start_heading, start_pitch);
                if let Some(id) = hit_test(x, y, self.viewport, &self.view, &self.billboards) {
                    debug!("hotspot `{id}` selected at ({x:.0}, {y:.0})");
                    self.events.push(ViewerEvent::HotspotSelected(id.clone()));
                }
            }
        }
        self.camera.set_interacting(self.gestures.is_active());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::look_direction;
    use crate::scene::{Hotspot, ImageRef};
    use crate::test_support::{png_bytes, GatedResolver};
    use std::convert::Infallible;

    const FRAME: f32 = 1.0 / 60.0;
    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct Recorder {
        frames: Vec<Recorded>,
    }

    struct Recorded {
        view: CameraView,
        billboards: Vec<Billboard>,
        scene: Option<SceneId>,
        region: Option<RegionId>,
    }

    impl FrameRenderer for Recorder {
        type Error = Infallible;

        fn draw(&mut self, frame: &Frame<'_>) -> Result<(), Infallible> {
            self.frames.push(Recorded {
                view: *frame.view,
                billboards: frame.billboards.to_vec(),
                scene: frame.scene.map(|s| s.id().clone()),
                region: frame.region.map(|r| r.id.clone()),
            });
            Ok(())
        }
    }

    fn config() -> ViewerConfig {
        ViewerConfig {
            auto_rotate: false,
            sphere_lat_segments: 4,
            sphere_lon_segments: 8,
            ..ViewerConfig::default()
        }
    }

    fn viewer(resolver: Arc<dyn AssetResolver>) -> PanoramaViewer {
        let mut v = PanoramaViewer::new(config(), resolver);
        v.resize(800.0, 600.0);
        v
    }

    fn hotspot(id: &str, heading: f32, target: Option<&str>) -> Hotspot {
        Hotspot {
            id: HotspotId::new(id),
            position: look_direction(heading, 0.0),
            label: None,
            target_scene: target.map(SceneId::new),
        }
    }

    fn region(id: &str, angle: f32, width: f32) -> Region {
        Region {
            id: RegionId::new(id),
            name: id.into(),
            angle,
            width,
        }
    }

    fn scene_spec(id: &str, heading: f32) -> SceneSpec {
        SceneSpec {
            id: SceneId::new(id),
            title: None,
            image: ImageRef::Bytes(png_bytes(32, 16).into()),
            hotspots: vec![hotspot("door", heading, Some("lab")), hotspot("window", heading + 90.0, None)],
            regions: vec![region("desk", heading, 30.0)],
            initial_heading: heading,
        }
    }

    fn loaded(spec: SceneSpec) -> PanoramaViewer {
        let mut v = viewer(Arc::new(GatedResolver::default()));
        v.open_scene(spec);
        assert!(v.wait_for_load(WAIT));
        v
    }

    #[test]
    fn intro_fov_settles_at_rest() {
        let mut v = loaded(scene_spec("lobby", 0.0));
        assert_eq!(v.camera().fov, 140.0);

        let mut r = Recorder::default();
        let mut last = 140.0;
        for _ in 0..60 {
            v.frame(FRAME, &mut r).unwrap();
            let fov = v.camera().fov;
            assert!(fov <= last && fov >= 100.0);
            last = fov;
        }
        assert_eq!(last, 100.0);
        assert_eq!(r.frames.last().map(|f| f.view.fov), Some(100.0));
    }

    #[test]
    fn frame_draws_billboards_oriented_to_the_new_view() {
        let mut v = loaded(scene_spec("lobby", 0.0));
        v.pointer_down(0, 400.0, 300.0);
        v.pointer_move(0, 200.0, 300.0);

        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        let f = &r.frames[0];
        assert_eq!(f.view.heading, v.camera().heading);
        assert_eq!(f.billboards.len(), 2);
        for b in &f.billboards {
            assert!((b.right.cross(b.up) + f.view.forward).length() < 1e-4);
        }
        assert_eq!(f.scene, Some(SceneId::new("lobby")));
    }

    #[test]
    fn tap_on_marker_selects_hotspot() {
        let mut v = loaded(scene_spec("lobby", 45.0));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        v.drain_events();

        v.pointer_down(0, 400.0, 300.0);
        v.pointer_up(0, 403.0, 298.0);
        assert_eq!(
            v.drain_events(),
            vec![ViewerEvent::HotspotSelected(HotspotId::new("door"))]
        );
    }

    #[test]
    fn drag_release_never_hit_tests() {
        let mut v = loaded(scene_spec("lobby", 45.0));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        v.drain_events();

        v.pointer_down(0, 400.0, 300.0);
        v.pointer_move(0, 430.0, 300.0);
        v.pointer_up(0, 400.0, 340.0);
        assert!(v.drain_events().is_empty());
        assert_eq!(v.gesture_phase(), GesturePhase::Idle);
    }

    #[test]
    fn tap_on_empty_sky_is_a_no_op() {
        let mut v = loaded(scene_spec("lobby", 45.0));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        v.drain_events();

        v.pointer_down(0, 20.0, 20.0);
        v.pointer_up(0, 20.0, 20.0);
        assert!(v.drain_events().is_empty());
    }

    #[test]
    fn region_enters_on_first_frame() {
        let mut v = loaded(scene_spec("lobby", 200.0));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        assert_eq!(
            v.drain_events(),
            vec![ViewerEvent::RegionChanged(Some(RegionId::new("desk")))]
        );
        assert_eq!(r.frames[0].region, Some(RegionId::new("desk")));

        v.frame(FRAME, &mut r).unwrap();
        assert!(v.drain_events().is_empty());
    }

    #[test]
    fn switching_scene_clears_region() {
        let mut v = loaded(scene_spec("lobby", 0.0));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        v.drain_events();

        v.open_scene(SceneSpec::from_image("plain", ImageRef::Bytes(png_bytes(16, 8).into())));
        assert!(v.wait_for_load(WAIT));
        assert_eq!(v.drain_events(), vec![ViewerEvent::RegionChanged(None)]);
        assert!(v.billboards().is_empty());
    }

    #[test]
    fn opening_the_same_scene_twice_keeps_one_hotspot_set() {
        let mut v = viewer(Arc::new(GatedResolver::default()));
        assert!(v.open_scene(scene_spec("lobby", 0.0)).is_some());
        assert!(v.open_scene(scene_spec("lobby", 0.0)).is_none());
        assert!(v.wait_for_load(WAIT));
        assert_eq!(v.billboards().len(), 2);

        assert!(v.open_scene(scene_spec("lobby", 0.0)).is_none());
        assert!(!v.wait_for_load(Duration::from_millis(100)));
        assert_eq!(v.billboards().len(), 2);
    }

    #[test]
    fn stale_load_does_not_clobber_newer_scene() {
        let resolver = Arc::new(GatedResolver::default());
        resolver.insert("a.png", png_bytes(32, 16));
        let gate_a = resolver.gate("a.png");

        let mut v = viewer(resolver.clone());
        let mut a = scene_spec("a", 0.0);
        a.image = ImageRef::Uri("a.png".into());
        a.hotspots.push(hotspot("extra", 10.0, None));
        v.open_scene(a);
        v.open_scene(scene_spec("b", 120.0));

        assert!(v.wait_for_load(WAIT));
        assert_eq!(v.scene().map(|s| s.id().as_str()), Some("b"));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        let camera = *v.camera();
        let billboards = v.billboards().to_vec();

        gate_a.send(()).unwrap();
        assert!(!v.wait_for_load(Duration::from_millis(300)));
        v.poll_loads(Instant::now());

        assert_eq!(v.scene().map(|s| s.id().as_str()), Some("b"));
        assert_eq!(*v.camera(), camera);
        assert_eq!(v.billboards(), billboards.as_slice());
    }

    #[test]
    fn failed_load_keeps_previous_scene() {
        let mut v = loaded(scene_spec("lobby", 0.0));
        v.open_scene(SceneSpec::from_image("broken", ImageRef::Bytes(b"nope".to_vec().into())));
        assert!(v.wait_for_load(WAIT));

        let events = v.drain_events();
        assert!(matches!(
            events.as_slice(),
            [ViewerEvent::LoadFailed { scene, error: LoadError::UnsupportedFormat(_) }]
                if scene.as_str() == "broken"
        ));
        assert_eq!(v.scene().map(|s| s.id().as_str()), Some("lobby"));

        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        assert_eq!(r.frames[0].scene, Some(SceneId::new("lobby")));
    }

    #[test]
    fn frames_render_placeholder_before_first_scene() {
        let mut v = viewer(Arc::new(GatedResolver::default()));
        let mut r = Recorder::default();
        v.frame(FRAME, &mut r).unwrap();
        assert!(r.frames[0].scene.is_none());
        assert!(r.frames[0].billboards.is_empty());
    }

    #[test]
    fn wheel_during_intro_wins() {
        let mut v = loaded(scene_spec("lobby", 0.0));
        v.wheel(1.0);
        assert_eq!(v.camera().fov, 135.0);
        let mut r = Recorder::default();
        for _ in 0..5 {
            v.frame(FRAME, &mut r).unwrap();
        }
        assert_eq!(v.camera().fov, 135.0);
    }

    #[test]
    fn interaction_pauses_auto_rotation() {
        let mut v = PanoramaViewer::new(
            ViewerConfig {
                auto_rotate: true,
                ..config()
            },
            Arc::new(GatedResolver::default()),
        );
        v.resize(800.0, 600.0);
        let mut r = Recorder::default();

        v.pointer_down(0, 100.0, 100.0);
        let before = v.camera().target_heading;
        v.frame(0.5, &mut r).unwrap();
        assert_eq!(v.camera().target_heading, before);

        v.pointer_up(0, 300.0, 100.0);
        let before = v.camera().target_heading;
        v.frame(0.5, &mut r).unwrap();
        assert!(v.camera().target_heading > before);
    }
}
