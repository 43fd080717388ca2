// region.rs — 按当前航向匹配命名的角度区间，驱动“正在看什么”的旁白

use crate::camera::normalize_heading;
use crate::scene::{Region, RegionId};

/// 两个航向之间的最小夹角（度），考虑 360° 回绕。
pub fn angular_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

pub fn region_contains(region: &Region, heading: f32) -> bool {
    angular_distance(normalize_heading(heading), region.angle) < region.width / 2.0
}

/// 列表顺序中第一个命中的区域；重叠时排在前面的胜出。
pub fn locate(regions: &[Region], heading: f32) -> Option<&Region> {
    regions.iter().find(|r| region_contains(r, heading))
}

pub struct RegionLocator {
    regions: Vec<Region>,
    current: Option<RegionId>,
    // 离开区域后已经过的时间；None 表示没有待清除的标签
    clear_elapsed: Option<f32>,
    debounce: f32,
}

impl RegionLocator {
    pub fn new(debounce_secs: f32) -> Self {
        Self {
            regions: Vec::new(),
            current: None,
            clear_elapsed: None,
            debounce: debounce_secs.max(0.0),
        }
    }

    /// 换场景时整体替换区域列表，当前标签清空（不发事件）。
    pub fn set_regions(&mut self, regions: Vec<Region>) {
        self.regions = regions;
        self.current = None;
        self.clear_elapsed = None;
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn locate(&self, heading: f32) -> Option<&Region> {
        locate(&self.regions, heading)
    }

    /// 当前显示的区域。
    pub fn current(&self) -> Option<&Region> {
        let id = self.current.as_ref()?;
        self.regions.iter().find(|r| &r.id == id)
    }

    /// 每帧调用。只在变化时返回 `Some(新区域)`：
    /// 进入新区域立即返回；离开后要持续 debounce 时间才返回 `Some(None)`。
    pub fn update(&mut self, heading: f32, dt: f32) -> Option<Option<RegionId>> {
        match self.locate(heading).map(|r| r.id.clone()) {
            Some(id) => {
                self.clear_elapsed = None;
                if self.current.as_ref() == Some(&id) {
                    None
                } else {
                    self.current = Some(id.clone());
                    Some(Some(id))
                }
            }
            None => {
                self.current.as_ref()?;
                let elapsed = self.clear_elapsed.map_or(0.0, |e| e + dt.max(0.0));
                if elapsed >= self.debounce {
                    self.clear_elapsed = None;
                    self.current = None;
                    Some(None)
                } else {
                    self.clear_elapsed = Some(elapsed);
                    None
                }
            }
        }
    }
}
