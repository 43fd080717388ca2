// test_support.rs — 测试用的内存资源与可控延迟

use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::loader::{AssetResolver, LoadError};

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 120, 40, 255]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
        .unwrap();
    buf
}

/// 内存里的资源表；`gate` 过的 URI 在放行前一直阻塞。
#[derive(Default)]
pub struct GatedResolver {
    assets: Mutex<HashMap<String, Vec<u8>>>,
    gates: Mutex<HashMap<String, Receiver<()>>>,
}

impl GatedResolver {
    pub fn insert(&self, uri: &str, bytes: Vec<u8>) {
        self.assets.lock().unwrap().insert(uri.to_string(), bytes);
    }

    pub fn gate(&self, uri: &str) -> Sender<()> {
        let (tx, rx) = channel();
        self.gates.lock().unwrap().insert(uri.to_string(), rx);
        tx
    }
}

impl AssetResolver for GatedResolver {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, LoadError> {
        let gate = self.gates.lock().unwrap().remove(uri);
        if let Some(gate) = gate {
            // 发送端被丢弃也算放行
            let _ = gate.recv();
        }
        self.assets
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| LoadError::Fetch {
                uri: uri.to_string(),
                reason: "not found".into(),
            })
    }
}
