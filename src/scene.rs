// scene.rs — 场景、热点、区域的数据模型
//
// 宿主给的数据是松散 JSON；这里在加载时校验成严格类型，
// 不合格的条目直接丢弃并记日志，其余照常加载。

use glam::Vec3;
use image::RgbaImage;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::mesh::SphereMesh;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SceneId);
string_id!(HotspotId);
string_id!(RegionId);

/// 全景图来源：交给宿主解析的 URI，或已经在内存里的原始字节。
#[derive(Clone, PartialEq)]
pub enum ImageRef {
    Uri(String),
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Uri(uri) => f.debug_tuple("Uri").field(uri).finish(),
            ImageRef::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::Uri(uri) => f.write_str(uri),
            ImageRef::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub id: HotspotId,
    /// 单位球面上的方向
    pub position: Vec3,
    pub label: Option<String>,
    pub target_scene: Option<SceneId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// 中心角，度，[0, 360)
    pub angle: f32,
    /// 角宽，度，(0, 360]
    pub width: f32,
}

/// 宿主提供的一个场景描述（尚未加载图片）。
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSpec {
    pub id: SceneId,
    pub title: Option<String>,
    pub image: ImageRef,
    pub hotspots: Vec<Hotspot>,
    pub regions: Vec<Region>,
    pub initial_heading: f32,
}

impl SceneSpec {
    /// 只有一张图、没有热点和区域的临时场景（拖入文件 / 打开文件）。
    pub fn from_image(id: impl Into<String>, image: ImageRef) -> Self {
        Self {
            id: SceneId::new(id),
            title: None,
            image,
            hotspots: Vec::new(),
            regions: Vec::new(),
            initial_heading: 0.0,
        }
    }

    /// 从松散 JSON 构造。缺少 id 或 image 时整个场景无效；
    /// 热点和区域逐条校验，坏条目跳过。
    pub fn from_value(value: &Value) -> Result<Self, EntryError> {
        let obj = value.as_object().ok_or(EntryError::NotAnObject)?;
        let id = id_field(obj, "id")?;
        let image = match obj.get("image") {
            Some(Value::String(s)) if !s.trim().is_empty() => ImageRef::Uri(s.clone()),
            Some(_) => {
                return Err(EntryError::InvalidField {
                    field: "image",
                    reason: "expected a non-empty string",
                })
            }
            None => return Err(EntryError::MissingField("image")),
        };
        let title = obj.get("title").and_then(Value::as_str).map(str::to_owned);
        let initial_heading = match obj.get("initialHeading") {
            None | Some(Value::Null) => 0.0,
            Some(v) => finite_number(v, "initialHeading")?,
        };

        let empty = Vec::new();
        let hotspots = obj.get("hotspots").and_then(Value::as_array).unwrap_or(&empty);
        let regions = obj.get("regions").and_then(Value::as_array).unwrap_or(&empty);

        Ok(Self {
            id: SceneId(id),
            title,
            image,
            hotspots: parse_hotspots(hotspots),
            regions: parse_regions(regions),
            initial_heading,
        })
    }
}

/// 已加载的场景：描述 + 内向球面 + 解码后的贴图。
/// 整体替换，不原地修改。
#[derive(Debug, Clone)]
pub struct Scene {
    pub generation: u64,
    pub spec: SceneSpec,
    pub surface: Arc<PanoramaSurface>,
}

impl Scene {
    pub fn id(&self) -> &SceneId {
        &self.spec.id
    }
}

#[derive(Debug, Clone)]
pub struct PanoramaSurface {
    pub mesh: SphereMesh,
    pub image: RgbaImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("entry is not an object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
}

type Object = serde_json::Map<String, Value>;

fn id_field(obj: &Object, field: &'static str) -> Result<String, EntryError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => Err(EntryError::MissingField(field)),
        Some(_) => Err(EntryError::InvalidField {
            field,
            reason: "expected a non-empty string or number",
        }),
    }
}

fn finite_number(v: &Value, field: &'static str) -> Result<f32, EntryError> {
    let n = v.as_f64().ok_or(EntryError::InvalidField {
        field,
        reason: "expected a number",
    })? as f32;
    if n.is_finite() {
        Ok(n)
    } else {
        Err(EntryError::InvalidField {
            field,
            reason: "expected a finite number",
        })
    }
}

fn required_number(obj: &Object, field: &'static str) -> Result<f32, EntryError> {
    match obj.get(field) {
        Some(Value::Null) | None => Err(EntryError::MissingField(field)),
        Some(v) => finite_number(v, field),
    }
}

fn position_field(obj: &Object) -> Result<Vec3, EntryError> {
    const FIELD: &str = "position";
    let raw = match obj.get(FIELD) {
        Some(Value::Object(p)) => Vec3::new(
            required_number(p, "x")?,
            required_number(p, "y")?,
            required_number(p, "z")?,
        ),
        Some(Value::Array(items)) if items.len() == 3 => Vec3::new(
            finite_number(&items[0], FIELD)?,
            finite_number(&items[1], FIELD)?,
            finite_number(&items[2], FIELD)?,
        ),
        Some(Value::Null) | None => return Err(EntryError::MissingField(FIELD)),
        Some(_) => {
            return Err(EntryError::InvalidField {
                field: FIELD,
                reason: "expected {x,y,z} or [x,y,z]",
            })
        }
    };
    // 只保留方向；半径由查看器配置决定
    raw.try_normalize().ok_or(EntryError::InvalidField {
        field: FIELD,
        reason: "zero-length position",
    })
}

pub fn parse_hotspot(value: &Value) -> Result<Hotspot, EntryError> {
    let obj = value.as_object().ok_or(EntryError::NotAnObject)?;
    let id = id_field(obj, "id")?;
    let position = position_field(obj)?;
    let label = obj.get("label").and_then(Value::as_str).map(str::to_owned);
    let target_scene = obj
        .get("targetSceneId")
        .and_then(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .map(SceneId);

    Ok(Hotspot {
        id: HotspotId(id),
        position,
        label,
        target_scene,
    })
}

pub fn parse_region(value: &Value) -> Result<Region, EntryError> {
    let obj = value.as_object().ok_or(EntryError::NotAnObject)?;
    let id = id_field(obj, "id")?;
    let name = match obj.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => return Err(EntryError::MissingField("name")),
        Some(_) => {
            return Err(EntryError::InvalidField {
                field: "name",
                reason: "expected a string",
            })
        }
    };
    let angle = required_number(obj, "angle")?.rem_euclid(360.0);
    let width = required_number(obj, "width")?;
    if !(width > 0.0 && width <= 360.0) {
        return Err(EntryError::InvalidField {
            field: "width",
            reason: "expected 0 < width <= 360",
        });
    }

    Ok(Region {
        id: RegionId(id),
        name,
        angle,
        width,
    })
}

/// 逐条校验，保持原顺序；坏条目和重复 id 记日志后跳过。
pub fn parse_hotspots(values: &[Value]) -> Vec<Hotspot> {
    let mut seen = HashSet::new();
    values
        .iter()
        .enumerate()
        .filter_map(|(index, v)| {
            let checked = parse_hotspot(v).and_then(|h| {
                if seen.insert(h.id.clone()) {
                    Ok(h)
                } else {
                    Err(EntryError::DuplicateId(h.id.0))
                }
            });
            checked
                .map_err(|err| warn!("skipping hotspot #{index}: {err}"))
                .ok()
        })
        .collect()
}

pub fn parse_regions(values: &[Value]) -> Vec<Region> {
    let mut seen = HashSet::new();
    values
        .iter()
        .enumerate()
        .filter_map(|(index, v)| {
            let checked = parse_region(v).and_then(|r| {
                if seen.insert(r.id.clone()) {
                    Ok(r)
                } else {
                    Err(EntryError::DuplicateId(r.id.0))
                }
            });
            checked
                .map_err(|err| warn!("skipping region #{index}: {err}"))
                .ok()
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tour file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("tour file has no `scenes` array")]
    NoScenes,
}

/// 导览清单：一组场景和起始场景。
#[derive(Debug, Clone, Default)]
pub struct Tour {
    pub start: Option<SceneId>,
    pub scenes: Vec<SceneSpec>,
}

impl Tour {
    pub fn from_json_str(text: &str) -> Result<Self, ManifestError> {
        let root: Value = serde_json::from_str(text)?;
        let scenes = root
            .get("scenes")
            .and_then(Value::as_array)
            .ok_or(ManifestError::NoScenes)?;

        let mut seen = HashSet::new();
        let scenes = scenes
            .iter()
            .enumerate()
            .filter_map(|(index, v)| {
                let checked = SceneSpec::from_value(v).and_then(|s| {
                    if seen.insert(s.id.clone()) {
                        Ok(s)
                    } else {
                        Err(EntryError::DuplicateId(s.id.0))
                    }
                });
                checked
                    .map_err(|err| warn!("skipping scene #{index}: {err}"))
                    .ok()
            })
            .collect();

        let start = root
            .get("start")
            .and_then(Value::as_str)
            .map(|s| SceneId::new(s));

        Ok(Self { start, scenes })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn scene(&self, id: &SceneId) -> Option<&SceneSpec> {
        self.scenes.iter().find(|s| &s.id == id)
    }

    /// 指定的起始场景；不存在时退回第一个场景。
    pub fn start_scene(&self) -> Option<&SceneSpec> {
        self.start
            .as_ref()
            .and_then(|id| self.scene(id))
            .or_else(|| self.scenes.first())
    }
}
