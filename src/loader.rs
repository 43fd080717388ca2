// loader.rs — 场景加载：取图、解码、构建内向球面
//
// 每次加载带一个递增的代号（generation）。后台线程完成后通过通道送回，
// 主循环只接受与当前待加载代号一致的结果；过期结果直接丢弃。
// 取完图发现已被新请求取代的线程不解码，直接退出。

use image::io::Reader as ImageReader;
use image::{GenericImage, Rgba, RgbaImage};
use log::{debug, info, warn};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::ViewerConfig;
use crate::mesh::build_sphere;
use crate::scene::{ImageRef, PanoramaSurface, Scene, SceneId, SceneSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to fetch `{uri}`: {reason}")]
    Fetch { uri: String, reason: String },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("load timed out after {0:?}")]
    Timeout(Duration),
}

/// 宿主提供的资源获取方式。
pub trait AssetResolver: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, LoadError>;
}

/// 从本地文件系统取图；相对路径基于 `root`。
#[derive(Debug, Clone)]
pub struct FileResolver {
    root: PathBuf,
}

impl FileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl AssetResolver for FileResolver {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.resolve(uri);
        std::fs::read(&path).map_err(|e| LoadError::Fetch {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }
}

/// 球面网格参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceParams {
    pub radius: f32,
    pub lat_segments: usize,
    pub lon_segments: usize,
}

impl SurfaceParams {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            radius: config.sphere_radius,
            lat_segments: config.sphere_lat_segments,
            lon_segments: config.sphere_lon_segments,
        }
    }
}

pub fn decode_panorama(bytes: &[u8]) -> Result<RgbaImage, LoadError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| LoadError::Decode(e.to_string()))?;
    if reader.format().is_none() {
        return Err(LoadError::UnsupportedFormat("unrecognized image data".into()));
    }

    let mut reader = reader;
    reader.no_limits();
    match reader.decode() {
        Ok(img) => Ok(pad_to_equirect(img.to_rgba8())),
        Err(image::ImageError::Unsupported(e)) => Err(LoadError::UnsupportedFormat(e.to_string())),
        Err(e) => Err(LoadError::Decode(e.to_string())),
    }
}

/// 兼容非 2:1 贴图：以宽度为基准，高度不足时在顶部补黑，原图贴到底部。
pub fn pad_to_equirect(img: RgbaImage) -> RgbaImage {
    let (src_w, src_h) = img.dimensions();
    let target_h = src_w / 2;

    if target_h > 0 && src_h < target_h {
        let mut canvas = RgbaImage::from_pixel(src_w, target_h, Rgba([0, 0, 0, 255]));
        let y_offset = target_h - src_h;
        // y_offset 保证不越界
        let _ = canvas.copy_from(&img, 0, y_offset);
        canvas
    } else {
        img
    }
}

/// 同步加载一个场景：取图 → 解码 → 构建球面。
pub fn load_scene(
    resolver: &dyn AssetResolver,
    spec: SceneSpec,
    generation: u64,
    params: SurfaceParams,
) -> Result<Scene, LoadError> {
    let bytes = fetch_image(resolver, &spec)?;
    build_scene(spec, &bytes, generation, params)
}

fn fetch_image(resolver: &dyn AssetResolver, spec: &SceneSpec) -> Result<Vec<u8>, LoadError> {
    match &spec.image {
        ImageRef::Uri(uri) => resolver.fetch(uri),
        ImageRef::Bytes(bytes) => Ok(bytes.to_vec()),
    }
}

fn build_scene(
    spec: SceneSpec,
    bytes: &[u8],
    generation: u64,
    params: SurfaceParams,
) -> Result<Scene, LoadError> {
    let image = decode_panorama(bytes)?;
    let mesh = build_sphere(params.radius, params.lat_segments, params.lon_segments);

    Ok(Scene {
        generation,
        spec,
        surface: Arc::new(PanoramaSurface { mesh, image }),
    })
}

/// 一次加载请求的代号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket(pub u64);

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Scene),
    Failed { scene: SceneId, error: LoadError },
}

struct Completion {
    generation: u64,
    result: Result<Scene, LoadError>,
}

struct Pending {
    generation: u64,
    scene: SceneId,
    started: Instant,
}

pub struct SceneLoader {
    resolver: Arc<dyn AssetResolver>,
    params: SurfaceParams,
    timeout: Duration,
    generation: u64,
    /// 后台线程可见的最新代号；0 表示没有待加载的请求
    latest: Arc<AtomicU64>,
    pending: Option<Pending>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl SceneLoader {
    pub fn new(resolver: Arc<dyn AssetResolver>, config: &ViewerConfig) -> Self {
        let (tx, rx) = channel();
        Self {
            resolver,
            params: SurfaceParams::from_config(config),
            timeout: config.load_timeout(),
            generation: 0,
            latest: Arc::new(AtomicU64::new(0)),
            pending: None,
            tx,
            rx,
        }
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn AssetResolver>) {
        self.resolver = resolver;
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_scene(&self) -> Option<&SceneId> {
        self.pending.as_ref().map(|p| &p.scene)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation
    }

    /// 开始后台加载。之前未完成的请求随之作废。
    pub fn load(&mut self, spec: SceneSpec) -> LoadTicket {
        self.generation += 1;
        let generation = self.generation;

        if let Some(old) = self.pending.replace(Pending {
            generation,
            scene: spec.id.clone(),
            started: Instant::now(),
        }) {
            debug!("scene `{}` superseded by `{}`", old.scene, spec.id);
        }
        info!("loading scene `{}` from {} (generation {generation})", spec.id, spec.image);

        self.latest.store(generation, Ordering::Release);

        let resolver = Arc::clone(&self.resolver);
        let latest = Arc::clone(&self.latest);
        let params = self.params;
        let tx = self.tx.clone();
        thread::spawn(move || {
            // 取图可能很慢；被新请求取代后就不再解码
            let result = match fetch_image(resolver.as_ref(), &spec) {
                Ok(_) if latest.load(Ordering::Acquire) != generation => {
                    debug!("generation {generation} superseded before decode, skipping");
                    return;
                }
                Ok(bytes) => build_scene(spec, &bytes, generation, params),
                Err(e) => Err(e),
            };
            if tx.send(Completion { generation, result }).is_err() {
                debug!("loader dropped before generation {generation} finished");
            }
        });

        LoadTicket(generation)
    }

    /// 非阻塞地检查完成情况和超时。每帧调用。
    pub fn poll(&mut self, now: Instant) -> Option<LoadOutcome> {
        while let Ok(completion) = self.rx.try_recv() {
            if let Some(outcome) = self.accept(completion) {
                return Some(outcome);
            }
        }
        self.check_timeout(now)
    }

    /// 阻塞等待当前请求完成，最多 `timeout`。
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.check_timeout(Instant::now());
            }
            match self.rx.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(outcome) = self.accept(completion) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return self.check_timeout(Instant::now()),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn accept(&mut self, completion: Completion) -> Option<LoadOutcome> {
        let Completion { generation, result } = completion;
        let current = matches!(&self.pending, Some(p) if p.generation == generation);
        if !current {
            debug!("discarding stale load result (generation {generation})");
            return None;
        }

        let pending = self.pending.take()?;
        Some(match result {
            Ok(scene) => LoadOutcome::Loaded(scene),
            Err(error) => {
                warn!("scene `{}` failed to load: {error}", pending.scene);
                LoadOutcome::Failed {
                    scene: pending.scene,
                    error,
                }
            }
        })
    }

    fn check_timeout(&mut self, now: Instant) -> Option<LoadOutcome> {
        let expired = self
            .pending
            .as_ref()
            .is_some_and(|p| now.saturating_duration_since(p.started) >= self.timeout);
        if !expired {
            return None;
        }

        let pending = self.pending.take()?;
        self.latest.store(0, Ordering::Release);
        warn!(
            "scene `{}` timed out after {:?} (generation {})",
            pending.scene, self.timeout, pending.generation
        );
        Some(LoadOutcome::Failed {
            scene: pending.scene,
            error: LoadError::Timeout(self.timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png_bytes, GatedResolver};
    use glam::Vec3;

    const WAIT: Duration = Duration::from_secs(5);

    fn spec(id: &str, uri: &str) -> SceneSpec {
        SceneSpec::from_image(id, ImageRef::Uri(uri.into()))
    }

    fn small_config() -> ViewerConfig {
        ViewerConfig {
            sphere_lat_segments: 4,
            sphere_lon_segments: 8,
            ..ViewerConfig::default()
        }
    }

    #[test]
    fn decodes_png_and_pads_to_two_to_one() {
        let img = decode_panorama(&png_bytes(64, 32)).unwrap();
        assert_eq!(img.dimensions(), (64, 32));

        let img = decode_panorama(&png_bytes(64, 8)).unwrap();
        assert_eq!(img.dimensions(), (64, 32));
        // 顶部补黑，原图在底部
        assert_eq!(img.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(img.get_pixel(0, 31), &Rgba([200, 120, 40, 255]));
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        assert!(matches!(
            decode_panorama(b"definitely not an image"),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn truncated_png_fails_to_decode() {
        let bytes = png_bytes(64, 32);
        assert!(matches!(
            decode_panorama(&bytes[..bytes.len() / 2]),
            Err(LoadError::Decode(_))
        ));
    }

    #[test]
    fn load_scene_builds_inward_surface() {
        let resolver = GatedResolver::default();
        resolver.insert("a.png", png_bytes(32, 16));
        let params = SurfaceParams::from_config(&small_config());
        let scene = load_scene(&resolver, spec("a", "a.png"), 7, params).unwrap();

        assert_eq!(scene.generation, 7);
        assert_eq!(scene.id(), &SceneId::new("a"));
        let mesh = &scene.surface.mesh;
        let p = Vec3::from_array(mesh.positions[10]);
        let n = Vec3::from_array(mesh.normals[10]);
        assert!(p.dot(n) < 0.0);
    }

    #[test]
    fn bytes_skip_the_resolver() {
        let resolver = GatedResolver::default();
        let params = SurfaceParams::from_config(&small_config());
        let spec = SceneSpec::from_image("mem", ImageRef::Bytes(png_bytes(16, 8).into()));
        assert!(load_scene(&resolver, spec, 1, params).is_ok());
    }

    #[test]
    fn missing_asset_is_a_fetch_error() {
        let mut loader = SceneLoader::new(Arc::new(GatedResolver::default()), &small_config());
        loader.load(spec("a", "missing.png"));
        match loader.wait(WAIT) {
            Some(LoadOutcome::Failed { scene, error }) => {
                assert_eq!(scene, SceneId::new("a"));
                assert!(matches!(error, LoadError::Fetch { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!loader.is_loading());
    }

    #[test]
    fn generations_increase() {
        let mut loader = SceneLoader::new(Arc::new(GatedResolver::default()), &small_config());
        let a = loader.load(spec("a", "a.png"));
        let b = loader.load(spec("b", "b.png"));
        assert!(b > a);
        assert_eq!(loader.current_generation(), b.0);
        assert_eq!(loader.pending_scene(), Some(&SceneId::new("b")));
    }

    #[test]
    fn stale_result_is_discarded() {
        let resolver = Arc::new(GatedResolver::default());
        resolver.insert("a.png", png_bytes(32, 16));
        resolver.insert("b.png", png_bytes(32, 16));
        let gate_a = resolver.gate("a.png");

        let mut loader = SceneLoader::new(resolver.clone(), &small_config());
        loader.load(spec("a", "a.png"));
        loader.load(spec("b", "b.png"));

        match loader.wait(WAIT) {
            Some(LoadOutcome::Loaded(scene)) => assert_eq!(scene.id(), &SceneId::new("b")),
            other => panic!("unexpected {other:?}"),
        }

        gate_a.send(()).unwrap();
        assert!(loader.wait(Duration::from_millis(300)).is_none());
        assert!(!loader.is_loading());
    }

    #[test]
    fn superseded_load_skips_decoding() {
        let resolver = Arc::new(GatedResolver::default());
        resolver.insert("a.png", png_bytes(32, 16));
        resolver.insert("b.png", png_bytes(32, 16));
        let gate_a = resolver.gate("a.png");

        let mut loader = SceneLoader::new(resolver.clone(), &small_config());
        loader.load(spec("a", "a.png"));
        loader.load(spec("b", "b.png"));
        assert!(matches!(loader.wait(WAIT), Some(LoadOutcome::Loaded(_))));

        gate_a.send(()).unwrap();
        // 后台线程结束时释放它持有的 resolver
        let deadline = Instant::now() + WAIT;
        while Arc::strong_count(&resolver) > 2 {
            assert!(Instant::now() < deadline, "worker for `a` never finished");
            thread::sleep(Duration::from_millis(5));
        }
        // `a` 没有解码，也就没有送回任何结果
        assert!(loader.rx.try_recv().is_err());
    }

    #[test]
    fn slow_load_times_out() {
        let resolver = Arc::new(GatedResolver::default());
        resolver.insert("slow.png", png_bytes(32, 16));
        let gate = resolver.gate("slow.png");

        let config = ViewerConfig {
            load_timeout_secs: 0.05,
            ..small_config()
        };
        let mut loader = SceneLoader::new(resolver, &config);
        loader.load(spec("slow", "slow.png"));

        assert!(loader.poll(Instant::now()).is_none());
        match loader.poll(Instant::now() + Duration::from_secs(1)) {
            Some(LoadOutcome::Failed { error, .. }) => {
                assert!(matches!(error, LoadError::Timeout(_)))
            }
            other => panic!("unexpected {other:?}"),
        }

        // 超时后才到达的结果视为过期
        gate.send(()).unwrap();
        assert!(loader.wait(Duration::from_millis(300)).is_none());
    }

    #[test]
    fn file_resolver_joins_relative_paths() {
        let resolver = FileResolver::new("/srv/tours");
        assert_eq!(resolver.resolve("lobby.jpg"), PathBuf::from("/srv/tours/lobby.jpg"));
        assert_eq!(resolver.resolve("file:///tmp/x.jpg"), PathBuf::from("/tmp/x.jpg"));
    }
}
