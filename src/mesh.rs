// mesh.rs — 内向球面网格
//
// 从球心往外看：法线指向球心，三角形从内侧看是逆时针，
// 等距柱状投影贴图的 u 翻转 (1 - u)，避免从内部看成镜像。

#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SphereVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl SphereMesh {
    /// 交错顶点，供顶点缓冲使用。
    pub fn vertices(&self) -> Vec<SphereVertex> {
        self.positions
            .iter()
            .zip(&self.uvs)
            .map(|(&position, &uv)| SphereVertex { position, uv })
            .collect()
    }
}

pub fn build_sphere(radius: f32, lat: usize, lon: usize) -> SphereMesh {
    let lat = lat.max(2);
    let lon = lon.max(3);

    let mut positions = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut normals = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut uvs = Vec::with_capacity((lat + 1) * (lon + 1));
    let mut indices = Vec::with_capacity(lat * lon * 6);

    for i in 0..=lat {
        let theta = std::f32::consts::PI * (i as f32) / (lat as f32);
        let cos_t = theta.cos();
        let sin_t = theta.sin();

        for j in 0..=lon {
            let phi = 2.0 * std::f32::consts::PI * (j as f32) / (lon as f32);

            let dir = [phi.cos() * sin_t, cos_t, phi.sin() * sin_t];

            positions.push([radius * dir[0], radius * dir[1], radius * dir[2]]);
            // 反向法线
            normals.push([-dir[0], -dir[1], -dir[2]]);

            let u = 1.0 - (j as f32) / (lon as f32);
            let v = (i as f32) / (lat as f32);
            uvs.push([u, v]);
        }
    }

    for i in 0..lat {
        for j in 0..lon {
            let a = (i * (lon + 1) + j) as u32;
            let b = a + (lon + 1) as u32;

            indices.extend_from_slice(&[
                a, b, a + 1,
                b, b + 1, a + 1,
            ]);
        }
    }

    SphereMesh {
        positions,
        normals,
        uvs,
        indices,
    }
}
