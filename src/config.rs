// config.rs — 查看器可调参数
//
// JSON 文件，所有字段都有默认值：
//   --config <path>  或  环境变量 PANORAMA_CONFIG

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::camera::{MAX_FOV, MIN_FOV};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// 拖拽灵敏度：每像素多少度
    pub drag_sensitivity: f32,
    /// 每帧向目标靠近剩余距离的比例
    pub damping: f32,
    pub auto_rotate: bool,
    /// 空闲自转速度（度/秒）
    pub auto_rotate_speed: f32,
    pub tap_threshold_px: f32,
    pub wheel_step: f32,
    pub min_pinch_distance_px: f32,
    pub intro_start_fov: f32,
    pub rest_fov: f32,
    /// 开场动画每帧 FOV 递减量（按帧，不按时间）
    pub intro_fov_step: f32,
    pub region_debounce_secs: f32,
    pub load_timeout_secs: f32,
    pub sphere_radius: f32,
    pub sphere_lat_segments: usize,
    pub sphere_lon_segments: usize,
    pub hotspot_distance: f32,
    pub hotspot_size: f32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            drag_sensitivity: 0.1,
            damping: 0.1,
            auto_rotate: true,
            auto_rotate_speed: 6.0,
            tap_threshold_px: 10.0,
            wheel_step: 5.0,
            min_pinch_distance_px: 1.0,
            intro_start_fov: 140.0,
            rest_fov: 100.0,
            intro_fov_step: 1.0,
            region_debounce_secs: 0.3,
            load_timeout_secs: 30.0,
            sphere_radius: 500.0,
            sphere_lat_segments: 60,
            sphere_lon_segments: 120,
            hotspot_distance: 400.0,
            hotspot_size: 30.0,
        }
    }
}

impl ViewerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: ViewerConfig = serde_json::from_str(text)?;
        Ok(cfg.sanitized())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// 把会破坏相机/FOV 不变量的取值拉回合法范围。
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if !(self.damping > 0.0) {
            self.damping = defaults.damping;
        }
        self.damping = self.damping.min(1.0);

        self.intro_start_fov = self.intro_start_fov.clamp(MIN_FOV, MAX_FOV);
        self.rest_fov = self.rest_fov.clamp(MIN_FOV, MAX_FOV);
        if !(self.intro_fov_step > 0.0) {
            self.intro_fov_step = defaults.intro_fov_step;
        }

        self.tap_threshold_px = self.tap_threshold_px.max(0.0);
        self.wheel_step = self.wheel_step.abs();
        self.min_pinch_distance_px = self.min_pinch_distance_px.max(f32::EPSILON);
        self.region_debounce_secs = self.region_debounce_secs.max(0.0);
        if !(self.load_timeout_secs > 0.0) {
            self.load_timeout_secs = defaults.load_timeout_secs;
        }

        if !(self.sphere_radius > 0.0) {
            self.sphere_radius = defaults.sphere_radius;
        }
        self.sphere_lat_segments = self.sphere_lat_segments.max(2);
        self.sphere_lon_segments = self.sphere_lon_segments.max(3);
        // 标记必须在球面内侧
        if !(self.hotspot_distance > 0.0) || self.hotspot_distance >= self.sphere_radius {
            self.hotspot_distance = self.sphere_radius * 0.8;
        }
        if !(self.hotspot_size > 0.0) {
            self.hotspot_size = defaults.hotspot_size;
        }
        self
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.load_timeout_secs)
    }
}

/// Choose config file from CLI/env.
pub fn resolve_config_path_from_args() -> Option<PathBuf> {
    let mut it = std::env::args();
    while let Some(a) = it.next() {
        if a == "--config" {
            if let Some(v) = it.next() {
                return Some(PathBuf::from(v));
            }
        }
    }

    match std::env::var("PANORAMA_CONFIG") {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v)),
        _ => None,
    }
}
