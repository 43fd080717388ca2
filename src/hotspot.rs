// hotspot.rs — 热点标记（始终朝向相机的公告板）与点击拾取

use glam::{Vec2, Vec3};

use crate::camera::CameraView;
use crate::scene::{Hotspot, HotspotId};

/// 视口大小（物理像素）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn aspect(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width / self.height
        }
    }

    /// 屏幕坐标 → NDC（-1..1，Y 向上）。
    pub fn to_ndc(&self, x: f32, y: f32) -> Vec2 {
        Vec2::new(2.0 * x / self.width - 1.0, 1.0 - 2.0 * y / self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// 屏幕上的一个点对应的视线。相机在球心。
pub fn screen_ray(x: f32, y: f32, viewport: Viewport, view: &CameraView) -> Option<Ray> {
    if viewport.is_empty() {
        return None;
    }
    let ndc = viewport.to_ndc(x, y);
    let half_fov_tan = (view.fov.to_radians() / 2.0).tan();
    let direction = (view.forward
        + view.right * ndc.x * half_fov_tan * viewport.aspect()
        + view.up * ndc.y * half_fov_tan)
        .normalize();
    Some(Ray {
        origin: Vec3::ZERO,
        direction,
    })
}

/// 一个热点的公告板：中心在球面内侧，方形，边长 `2 * half_size`。
#[derive(Debug, Clone, PartialEq)]
pub struct Billboard {
    pub hotspot: HotspotId,
    pub label: Option<String>,
    pub center: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub half_size: f32,
}

impl Billboard {
    pub fn new(hotspot: &Hotspot, distance: f32, size: f32) -> Self {
        Self {
            hotspot: hotspot.id.clone(),
            label: hotspot.label.clone(),
            center: hotspot.position * distance,
            right: Vec3::X,
            up: Vec3::Y,
            half_size: size / 2.0,
        }
    }

    /// 四个角：左下、右下、右上、左上。
    pub fn corners(&self) -> [Vec3; 4] {
        let r = self.right * self.half_size;
        let u = self.up * self.half_size;
        [
            self.center - r - u,
            self.center + r - u,
            self.center + r + u,
            self.center - r + u,
        ]
    }

    /// 射线与公告板平面的交点参数 t；不在方块内或在身后返回 None。
    pub fn intersect(&self, ray: &Ray) -> Option<f32> {
        let normal = self.right.cross(self.up);
        let denom = ray.direction.dot(normal);
        if denom.abs() < 1e-6 {
            return None;
        }
        let t = (self.center - ray.origin).dot(normal) / denom;
        if t <= 0.0 {
            return None;
        }
        let local = ray.at(t) - self.center;
        let u = local.dot(self.right);
        let v = local.dot(self.up);
        (u.abs() <= self.half_size && v.abs() <= self.half_size).then_some(t)
    }
}

pub fn build_billboards(hotspots: &[Hotspot], distance: f32, size: f32) -> Vec<Billboard> {
    hotspots
        .iter()
        .map(|h| Billboard::new(h, distance, size))
        .collect()
}

/// 所有公告板与相机屏幕平面平行。
pub fn orient_billboards(billboards: &mut [Billboard], view: &CameraView) {
    for b in billboards {
        b.right = view.right;
        b.up = view.up;
    }
}

/// 返回被点中的最近热点。
pub fn hit_test<'a>(
    x: f32,
    y: f32,
    viewport: Viewport,
    view: &CameraView,
    billboards: &'a [Billboard],
) -> Option<&'a HotspotId> {
    let ray = screen_ray(x, y, viewport, view)?;
    billboards
        .iter()
        .filter_map(|b| b.intersect(&ray).map(|t| (t, b)))
        .min_by(|(a, _), (b, _)| a.total_cmp(b))
        .map(|(_, b)| &b.hotspot)
}
