// gesture.rs — 手势解释：拖拽 / 双指缩放 / 点击 / 滚轮
//
// 状态机：Idle → Dragging（第一根手指按下）
//         Dragging → Idle（抬起；位移很小则判定为点击）
//         Idle/Dragging → Pinching（第二根手指按下）
//         Pinching → Idle（手指数少于两根）

use glam::Vec2;

use crate::camera::{clamp_fov, clamp_pitch, CameraState};
use crate::config::ViewerConfig;

pub type PointerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Idle,
    Dragging,
    Pinching,
}

/// 一次输入事件的解释结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutput {
    None,
    /// 新的相机目标角度
    Target { heading: f32, pitch: f32 },
    /// 直接设置的 FOV（已夹取）
    Fov(f32),
    /// 点击；相机目标应退回到手势开始时的角度
    Tap {
        x: f32,
        y: f32,
        start_heading: f32,
        start_pitch: f32,
    },
}

#[derive(Debug, Clone, Copy)]
struct DragSession {
    pointer: PointerId,
    start: Vec2,
    start_heading: f32,
    start_pitch: f32,
}

#[derive(Debug, Clone, Copy)]
struct PinchSession {
    baseline_distance: f32,
    baseline_fov: f32,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Idle,
    Dragging(DragSession),
    Pinching(PinchSession),
}

pub struct GestureInterpreter {
    pointers: Vec<(PointerId, Vec2)>,
    state: State,
    sensitivity: f32,
    tap_threshold: f32,
    wheel_step: f32,
    min_pinch_distance: f32,
}

impl GestureInterpreter {
    pub fn new(config: &ViewerConfig) -> Self {
        Self {
            pointers: Vec::with_capacity(2),
            state: State::Idle,
            sensitivity: config.drag_sensitivity,
            tap_threshold: config.tap_threshold_px,
            wheel_step: config.wheel_step,
            min_pinch_distance: config.min_pinch_distance_px.max(f32::EPSILON),
        }
    }

    pub fn phase(&self) -> GesturePhase {
        match self.state {
            State::Idle => GesturePhase::Idle,
            State::Dragging(_) => GesturePhase::Dragging,
            State::Pinching(_) => GesturePhase::Pinching,
        }
    }

    /// 有手指按着就算交互中（包括双指抬起一根后剩下的那根）。
    pub fn is_active(&self) -> bool {
        !self.pointers.is_empty()
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.len()
    }

    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
    }

    pub fn pointer_down(
        &mut self,
        id: PointerId,
        x: f32,
        y: f32,
        camera: &CameraState,
    ) -> GestureOutput {
        let pos = Vec2::new(x, y);
        match self.pointers.iter_mut().find(|(p, _)| *p == id) {
            Some(entry) => entry.1 = pos,
            None => self.pointers.push((id, pos)),
        }

        match (self.state, self.pointers.len()) {
            (State::Idle, 1) => {
                self.state = State::Dragging(DragSession {
                    pointer: id,
                    start: pos,
                    start_heading: camera.heading,
                    start_pitch: camera.pitch,
                });
            }
            (State::Idle | State::Dragging(_), n) if n >= 2 => {
                self.state = State::Pinching(PinchSession {
                    baseline_distance: self.pointers_distance().unwrap_or(0.0),
                    baseline_fov: camera.fov,
                });
            }
            _ => {}
        }
        GestureOutput::None
    }

    pub fn pointer_move(
        &mut self,
        id: PointerId,
        x: f32,
        y: f32,
        camera: &CameraState,
    ) -> GestureOutput {
        let pos = Vec2::new(x, y);
        let Some(entry) = self.pointers.iter_mut().find(|(p, _)| *p == id) else {
            return GestureOutput::None;
        };
        entry.1 = pos;

        let sensitivity = self.sensitivity;
        let min_distance = self.min_pinch_distance;
        let distance = self.pointers_distance();

        match &mut self.state {
            State::Dragging(s) if s.pointer == id => {
                // 水平拖拽与航向反向，竖直拖拽与俯仰同向
                let heading = s.start_heading + (s.start.x - pos.x) * sensitivity;
                let pitch = s.start_pitch + (pos.y - s.start.y) * sensitivity;
                GestureOutput::Target {
                    heading,
                    pitch: clamp_pitch(pitch),
                }
            }
            State::Pinching(p) => {
                let Some(distance) = distance else {
                    return GestureOutput::None;
                };
                if distance < min_distance {
                    return GestureOutput::None;
                }
                if p.baseline_distance < min_distance {
                    // 起始两指重合或换了一对手指：这一帧只重新取基准
                    p.baseline_distance = distance;
                    p.baseline_fov = camera.fov;
                    return GestureOutput::None;
                }
                GestureOutput::Fov(clamp_fov(p.baseline_fov * (p.baseline_distance / distance)))
            }
            _ => GestureOutput::None,
        }
    }

    pub fn pointer_up(&mut self, id: PointerId, x: f32, y: f32) -> GestureOutput {
        if !self.remove_pointer(id) {
            return GestureOutput::None;
        }

        match self.state {
            State::Dragging(s) if s.pointer == id => {
                self.state = State::Idle;
                let dx = x - s.start.x;
                let dy = y - s.start.y;
                if dx.abs() < self.tap_threshold && dy.abs() < self.tap_threshold {
                    GestureOutput::Tap {
                        x,
                        y,
                        start_heading: s.start_heading,
                        start_pitch: s.start_pitch,
                    }
                } else {
                    GestureOutput::None
                }
            }
            // 剩下的那根手指不驱动任何东西，直到重新按下；它仍按着，所以自转继续暂停
            State::Pinching(_) if self.pointers.len() < 2 => {
                self.state = State::Idle;
                GestureOutput::None
            }
            State::Pinching(_) => {
                self.restart_pinch();
                GestureOutput::None
            }
            _ => GestureOutput::None,
        }
    }

    /// 系统取消触摸：丢弃会话，不产生点击，拖拽结果保留。
    pub fn pointer_cancel(&mut self, id: PointerId) {
        if !self.remove_pointer(id) {
            return;
        }
        match self.state {
            State::Dragging(s) if s.pointer == id => self.state = State::Idle,
            State::Pinching(_) if self.pointers.len() < 2 => self.state = State::Idle,
            State::Pinching(_) => self.restart_pinch(),
            _ => {}
        }
    }

    /// 滚轮每个事件固定步长；向上滚（正值）放大，即 FOV 变小。
    pub fn wheel(&self, delta: f32, current_fov: f32) -> GestureOutput {
        if delta == 0.0 || !delta.is_finite() {
            return GestureOutput::None;
        }
        GestureOutput::Fov(clamp_fov(current_fov - delta.signum() * self.wheel_step))
    }

    pub fn reset(&mut self) {
        self.pointers.clear();
        self.state = State::Idle;
    }

    /// 三指以上抬起一根后参与测距的两指可能变了，下次移动时重取基准。
    fn restart_pinch(&mut self) {
        if let State::Pinching(p) = &mut self.state {
            p.baseline_distance = 0.0;
        }
    }

    fn remove_pointer(&mut self, id: PointerId) -> bool {
        let before = self.pointers.len();
        self.pointers.retain(|(p, _)| *p != id);
        self.pointers.len() != before
    }

    fn pointers_distance(&self) -> Option<f32> {
        match self.pointers.as_slice() {
            [(_, a), (_, b), ..] => Some(a.distance(*b)),
            _ => None,
        }
    }
}
