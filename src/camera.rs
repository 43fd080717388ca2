// camera.rs — 相机控制：航向/俯仰/FOV、阻尼插值、空闲自转、开场 FOV 动画

use glam::{Mat4, Vec3};

use crate::config::ViewerConfig;

pub const MIN_PITCH: f32 = -85.0;
pub const MAX_PITCH: f32 = 85.0;
pub const MIN_FOV: f32 = 10.0;
pub const MAX_FOV: f32 = 150.0;

const NEAR: f32 = 0.1;

pub fn clamp_pitch(pitch: f32) -> f32 {
    pitch.clamp(MIN_PITCH, MAX_PITCH)
}

pub fn clamp_fov(fov: f32) -> f32 {
    fov.clamp(MIN_FOV, MAX_FOV)
}

/// 航向取模到 [0, 360)。
pub fn normalize_heading(heading: f32) -> f32 {
    let h = heading.rem_euclid(360.0);
    // rem_euclid 对极小负数可能返回 360.0
    if h >= 360.0 {
        0.0
    } else {
        h
    }
}

/// (航向, 俯仰) → 单位视线方向。
/// phi 为极角 (90 - pitch)，theta 为航向，与球面网格的经纬布局一致。
pub fn look_direction(heading: f32, pitch: f32) -> Vec3 {
    let phi = (90.0 - pitch).to_radians();
    let theta = heading.to_radians();
    Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin())
}

/// 相机状态。航向与目标航向的差值不取模，保证插值走近路；空闲时两者一起回卷到 [0, 360)。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub heading: f32,
    pub pitch: f32,
    pub target_heading: f32,
    pub target_pitch: f32,
    pub fov: f32,
    pub interacting: bool,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            heading: 0.0,
            pitch: 0.0,
            target_heading: 0.0,
            target_pitch: 0.0,
            fov: 100.0,
            interacting: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Intro {
    rest: f32,
    step: f32,
}

pub struct CameraController {
    state: CameraState,
    damping: f32,
    auto_rotate: bool,
    auto_rotate_speed: f32,
    intro_start_fov: f32,
    rest_fov: f32,
    intro_step: f32,
    intro: Option<Intro>,
    initial_heading: f32,
}

impl CameraController {
    pub fn new(config: &ViewerConfig) -> Self {
        let rest_fov = clamp_fov(config.rest_fov);
        Self {
            state: CameraState {
                fov: rest_fov,
                ..CameraState::default()
            },
            damping: config.damping.clamp(f32::EPSILON, 1.0),
            auto_rotate: config.auto_rotate,
            auto_rotate_speed: config.auto_rotate_speed,
            intro_start_fov: clamp_fov(config.intro_start_fov),
            rest_fov,
            intro_step: config.intro_fov_step.abs().max(f32::EPSILON),
            intro: None,
            initial_heading: 0.0,
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn set_target(&mut self, heading: f32, pitch: f32) {
        self.state.target_heading = heading;
        self.state.target_pitch = clamp_pitch(pitch);
    }

    /// 用户缩放直接生效；开场动画中途被打断。
    pub fn set_fov(&mut self, fov: f32) {
        self.state.fov = clamp_fov(fov);
        self.intro = None;
    }

    pub fn set_interacting(&mut self, interacting: bool) {
        self.state.interacting = interacting;
    }

    pub fn auto_rotate(&self) -> bool {
        self.auto_rotate
    }

    pub fn set_auto_rotate(&mut self, enabled: bool) {
        self.auto_rotate = enabled;
    }

    pub fn is_intro_running(&self) -> bool {
        self.intro.is_some()
    }

    /// 新场景激活：回到初始航向，FOV 从广角开始收拢。
    pub fn begin_scene(&mut self, initial_heading: f32) {
        self.initial_heading = initial_heading;
        self.state = CameraState {
            heading: initial_heading,
            pitch: 0.0,
            target_heading: initial_heading,
            target_pitch: 0.0,
            fov: self.intro_start_fov,
            interacting: self.state.interacting,
        };
        self.intro = if (self.intro_start_fov - self.rest_fov).abs() > f32::EPSILON {
            Some(Intro {
                rest: self.rest_fov,
                step: self.intro_step,
            })
        } else {
            None
        };
    }

    pub fn reset_view(&mut self) {
        self.state.heading = self.initial_heading;
        self.state.target_heading = self.initial_heading;
        self.state.pitch = 0.0;
        self.state.target_pitch = 0.0;
        self.state.fov = self.rest_fov;
        self.intro = None;
    }

    /// 每帧推进一次。
    pub fn tick(&mut self, dt: f32) {
        let s = &mut self.state;

        if !s.interacting && self.auto_rotate {
            s.target_heading += self.auto_rotate_speed * dt.max(0.0);
        }

        s.heading += (s.target_heading - s.heading) * self.damping;
        s.pitch += (s.target_pitch - s.pitch) * self.damping;
        s.pitch = clamp_pitch(s.pitch);

        // 航向与目标同减 360 的整数倍，差值不变；拖拽期间不动，会话记录的起始航向仍然有效
        if !s.interacting {
            let wrapped = normalize_heading(s.heading);
            let shift = s.heading - wrapped;
            if shift != 0.0 {
                s.heading = wrapped;
                s.target_heading -= shift;
            }
        }

        // 开场动画按帧递减，不按时间；刷新率越高，动画越快
        if let Some(intro) = self.intro {
            let remaining = intro.rest - s.fov;
            if remaining.abs() <= intro.step {
                s.fov = intro.rest;
                self.intro = None;
            } else {
                s.fov += intro.step.copysign(remaining);
            }
            s.fov = clamp_fov(s.fov);
        }
    }
}

/// 每帧由相机状态重新计算的视图数据：视线、基向量、矩阵。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub heading: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub view: Mat4,
    pub proj: Mat4,
}

impl CameraView {
    /// 相机位于球心。`far` 需要大于球面半径。
    pub fn new(state: &CameraState, aspect: f32, far: f32) -> Self {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        let pitch = clamp_pitch(state.pitch);
        let fov = clamp_fov(state.fov);

        let forward = look_direction(state.heading, pitch);
        // |pitch| <= 85，forward 不会与 Y 轴平行
        let right = forward.cross(Vec3::Y).normalize();
        let up = right.cross(forward);

        let view = Mat4::look_at_rh(Vec3::ZERO, forward, Vec3::Y);
        let proj = Mat4::perspective_rh(fov.to_radians(), aspect, NEAR, far.max(NEAR * 2.0));

        Self {
            heading: state.heading,
            pitch,
            fov,
            aspect,
            forward,
            right,
            up,
            view,
            proj,
        }
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view
    }
}

impl Default for CameraView {
    fn default() -> Self {
        Self::new(&CameraState::default(), 1.0, 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < EPSILON
    }

    fn still_config() -> ViewerConfig {
        ViewerConfig {
            auto_rotate: false,
            ..ViewerConfig::default()
        }
    }

    #[test]
    fn damping_covers_a_tenth_per_tick() {
        let mut cam = CameraController::new(&still_config());
        cam.set_target(100.0, 50.0);
        cam.tick(1.0 / 60.0);
        assert!(approx_eq(cam.state().heading, 10.0));
        assert!(approx_eq(cam.state().pitch, 5.0));
        cam.tick(1.0 / 60.0);
        assert!(approx_eq(cam.state().heading, 19.0));
    }

    #[test]
    fn pitch_stays_within_bounds() {
        let mut cam = CameraController::new(&still_config());
        for target in [-1000.0, -86.0, -85.0, 0.0, 42.0, 85.0, 86.0, 1000.0] {
            cam.set_target(0.0, target);
            for _ in 0..200 {
                cam.tick(1.0 / 60.0);
                let p = cam.state().pitch;
                assert!((MIN_PITCH..=MAX_PITCH).contains(&p), "pitch {p} out of range");
            }
            assert!((MIN_PITCH..=MAX_PITCH).contains(&cam.state().target_pitch));
        }
    }

    #[test]
    fn auto_rotation_only_when_idle() {
        let config = ViewerConfig {
            auto_rotate_speed: 6.0,
            ..ViewerConfig::default()
        };
        let mut cam = CameraController::new(&config);
        cam.tick(0.5);
        assert!(approx_eq(cam.state().target_heading, 3.0));

        cam.set_interacting(true);
        cam.tick(0.5);
        assert!(approx_eq(cam.state().target_heading, 3.0));

        cam.set_interacting(false);
        cam.set_auto_rotate(false);
        cam.tick(0.5);
        assert!(approx_eq(cam.state().target_heading, 3.0));
    }

    #[test]
    fn long_idle_rotation_keeps_advancing() {
        let mut cam = CameraController::new(&ViewerConfig::default());
        // 约 32 天的 6°/s 自转
        for _ in 0..28_000 {
            cam.tick(100.0);
        }
        assert!((0.0..360.0).contains(&cam.state().heading));
        assert!(cam.state().target_heading.abs() < 10_000.0);

        // 回卷只减 360 的整数倍，逐帧增量取模即为真实转动量
        let mut advanced = 0.0;
        for _ in 0..600 {
            let before = cam.state().target_heading;
            cam.tick(1.0 / 60.0);
            let step = (cam.state().target_heading - before).rem_euclid(360.0);
            assert!(step > 0.05 && step < 0.15, "step {step}");
            advanced += step;
            assert!((0.0..360.0).contains(&cam.state().heading));
        }
        assert!((advanced - 60.0).abs() < 1.0, "advanced {advanced}");
    }

    #[test]
    fn wrap_preserves_the_remaining_turn() {
        let mut cam = CameraController::new(&still_config());
        cam.begin_scene(350.0);
        cam.set_target(380.0, 0.0);
        cam.tick(1.0 / 60.0);
        // 353 未越界，不回卷
        assert!(approx_eq(cam.state().heading, 353.0));
        for _ in 0..20 {
            cam.tick(1.0 / 60.0);
        }
        let s = cam.state();
        assert!((0.0..360.0).contains(&s.heading));
        assert!(approx_eq(s.target_heading, 20.0));
        assert!(s.heading > 10.0 && s.heading < 20.0);
    }

    #[test]
    fn no_wrap_while_dragging() {
        let mut cam = CameraController::new(&still_config());
        cam.set_interacting(true);
        cam.set_target(400.0, 0.0);
        for _ in 0..200 {
            cam.tick(1.0 / 60.0);
        }
        assert!(approx_eq(cam.state().target_heading, 400.0));
        assert!(cam.state().heading > 360.0);

        cam.set_interacting(false);
        cam.tick(1.0 / 60.0);
        assert!(approx_eq(cam.state().target_heading, 40.0));
        assert!((0.0..360.0).contains(&cam.state().heading));
    }

    #[test]
    fn fov_is_clamped() {
        let mut cam = CameraController::new(&still_config());
        cam.set_fov(500.0);
        assert_eq!(cam.state().fov, MAX_FOV);
        cam.set_fov(-3.0);
        assert_eq!(cam.state().fov, MIN_FOV);
    }

    #[test]
    fn intro_narrows_monotonically_and_stops_at_rest() {
        let mut cam = CameraController::new(&still_config());
        cam.begin_scene(0.0);
        assert_eq!(cam.state().fov, 140.0);

        let mut last = cam.state().fov;
        let mut frames = 0;
        while cam.is_intro_running() {
            cam.tick(1.0 / 60.0);
            let fov = cam.state().fov;
            assert!(fov <= last);
            assert!(fov >= 100.0);
            last = fov;
            frames += 1;
            assert!(frames <= 40, "intro did not terminate");
        }
        assert_eq!(cam.state().fov, 100.0);

        for _ in 0..10 {
            cam.tick(1.0 / 60.0);
        }
        assert_eq!(cam.state().fov, 100.0);
    }

    #[test]
    fn user_zoom_ends_intro() {
        let mut cam = CameraController::new(&still_config());
        cam.begin_scene(0.0);
        cam.tick(1.0 / 60.0);
        cam.set_fov(60.0);
        assert!(!cam.is_intro_running());
        cam.tick(1.0 / 60.0);
        assert_eq!(cam.state().fov, 60.0);
    }

    #[test]
    fn begin_scene_and_reset_use_initial_heading() {
        let mut cam = CameraController::new(&still_config());
        cam.begin_scene(270.0);
        assert_eq!(cam.state().heading, 270.0);
        cam.set_target(10.0, 30.0);
        cam.tick(1.0);
        cam.reset_view();
        assert_eq!(cam.state().heading, 270.0);
        assert_eq!(cam.state().pitch, 0.0);
        assert_eq!(cam.state().fov, 100.0);
    }

    #[test]
    fn look_direction_follows_spherical_layout() {
        let d = look_direction(0.0, 0.0);
        assert!(approx_eq(d.x, 1.0) && approx_eq(d.y, 0.0) && approx_eq(d.z, 0.0));
        let d = look_direction(90.0, 0.0);
        assert!(approx_eq(d.z, 1.0));
        let d = look_direction(0.0, 85.0);
        assert!(d.y > 0.99);
        assert!(approx_eq(d.length(), 1.0));
    }

    #[test]
    fn normalize_heading_wraps() {
        assert!(approx_eq(normalize_heading(-1.0), 359.0));
        assert!(approx_eq(normalize_heading(725.0), 5.0));
        assert!(normalize_heading(-1e-9) < 360.0);
    }

    #[test]
    fn view_basis_is_orthonormal() {
        let state = CameraState {
            heading: 33.0,
            pitch: -40.0,
            ..CameraState::default()
        };
        let v = CameraView::new(&state, 16.0 / 9.0, 1000.0);
        assert!(approx_eq(v.forward.dot(v.right), 0.0));
        assert!(approx_eq(v.forward.dot(v.up), 0.0));
        assert!(approx_eq(v.right.length(), 1.0));
        assert!(approx_eq(v.up.length(), 1.0));
        assert!(v.up.y > 0.0);
    }
}
