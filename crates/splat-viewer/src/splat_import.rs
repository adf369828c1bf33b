use std::io::{BufRead, Cursor, Read};

use async_stream::try_stream;
use byteorder::{LittleEndian, ReadBytesExt};
use futures_lite::{stream, Stream};
use glam::{Quat, Vec3, Vec4};
use ply_rs::{
    parser::Parser,
    ply::{Encoding, Property, PropertyAccess},
};
use splat_render::Splat;
use tracing::info_span;

use crate::asset::{url_extension, AssetError, PointCloudDecoder};

const SH_C0: f32 = 0.28209479;

/// Smallest scale a decoded splat may have. Flat splats are widened to this.
const MIN_SCALE: f32 = 1e-7;

/// Scale given to points of plain point cloud PLYs that carry none.
const DEFAULT_SCALE: f32 = 0.01;

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn normalized_rotation(w: f32, x: f32, y: f32, z: f32) -> Quat {
    let q = Quat::from_xyzw(x, y, z, w);
    if q.length_squared() > 0.0 {
        q.normalize()
    } else {
        Quat::IDENTITY
    }
}

fn property_f32(property: &Property) -> Option<f32> {
    match *property {
        Property::Float(v) => Some(v),
        Property::Double(v) => Some(v as f32),
        Property::UChar(v) => Some(v as f32),
        Property::Char(v) => Some(v as f32),
        Property::UShort(v) => Some(v as f32),
        Property::Short(v) => Some(v as f32),
        Property::UInt(v) => Some(v as f32),
        Property::Int(v) => Some(v as f32),
        _ => None,
    }
}

/// One PLY vertex as stored in the file, before activation.
pub(crate) struct PlySplat {
    means: [f32; 3],
    log_scale: Option<[f32; 3]>,
    raw_opacity: Option<f32>,
    rotation: [f32; 4],
    sh_dc: Option<[f32; 3]>,
    rgb: Option<[f32; 3]>,
}

impl PropertyAccess for PlySplat {
    fn new() -> Self {
        PlySplat {
            means: [0.0; 3],
            log_scale: None,
            raw_opacity: None,
            rotation: [1.0, 0.0, 0.0, 0.0],
            sh_dc: None,
            rgb: None,
        }
    }

    fn set_property(&mut self, key: String, property: Property) {
        let Some(v) = property_f32(&property) else {
            return;
        };
        let byte_color = matches!(property, Property::UChar(_));

        match key.as_str() {
            "x" => self.means[0] = v,
            "y" => self.means[1] = v,
            "z" => self.means[2] = v,
            "scale_0" => self.log_scale.get_or_insert([0.0; 3])[0] = v,
            "scale_1" => self.log_scale.get_or_insert([0.0; 3])[1] = v,
            "scale_2" => self.log_scale.get_or_insert([0.0; 3])[2] = v,
            "opacity" => self.raw_opacity = Some(v),
            "rot_0" => self.rotation[0] = v,
            "rot_1" => self.rotation[1] = v,
            "rot_2" => self.rotation[2] = v,
            "rot_3" => self.rotation[3] = v,
            "f_dc_0" => self.sh_dc.get_or_insert([0.0; 3])[0] = v,
            "f_dc_1" => self.sh_dc.get_or_insert([0.0; 3])[1] = v,
            "f_dc_2" => self.sh_dc.get_or_insert([0.0; 3])[2] = v,
            "red" | "green" | "blue" => {
                let v = if byte_color { v / 255.0 } else { v };
                let rgb = self.rgb.get_or_insert([1.0; 3]);
                match key.as_str() {
                    "red" => rgb[0] = v,
                    "green" => rgb[1] = v,
                    _ => rgb[2] = v,
                }
            }
            _ => (),
        }
    }
}

impl PlySplat {
    fn into_splat(self) -> Splat {
        let scale = self
            .log_scale
            .map(|s| Vec3::from_array(s).exp())
            .unwrap_or(Vec3::splat(DEFAULT_SCALE));
        let opacity = self.raw_opacity.map(sigmoid).unwrap_or(1.0);

        let rgb = match (self.sh_dc, self.rgb) {
            (Some(dc), _) => Vec3::splat(0.5) + Vec3::from_array(dc) * SH_C0,
            (None, Some(rgb)) => Vec3::from_array(rgb),
            (None, None) => Vec3::ONE,
        };

        let [w, x, y, z] = self.rotation;

        Splat {
            position: Vec3::from_array(self.means),
            color: rgb.clamp(Vec3::ZERO, Vec3::ONE).extend(opacity),
            scale: scale.max(Vec3::splat(MIN_SCALE)),
            rotation: normalized_rotation(w, x, y, z),
            opacity,
        }
    }
}

/// Checks the magic and that a complete header is present, so truncated files
/// fail before the parser sees them.
fn check_ply_header(data: &[u8]) -> Result<(), AssetError> {
    if !data.starts_with(b"ply") {
        return Err(AssetError::Malformed("missing ply magic".to_owned()));
    }
    if !data.windows(b"end_header".len()).any(|w| w == b"end_header") {
        return Err(AssetError::Malformed("ply header is truncated".to_owned()));
    }
    Ok(())
}

pub fn ply_count(data: &[u8]) -> Result<usize, AssetError> {
    check_ply_header(data)?;
    let mut reader = Cursor::new(data);
    let header = Parser::<PlySplat>::new()
        .read_header(&mut reader)
        .map_err(AssetError::malformed)?;

    header
        .elements
        .get("vertex")
        .map(|e| e.count)
        .ok_or_else(|| AssetError::Malformed("ply has no vertex element".to_owned()))
}

pub fn load_splats_from_ply(
    data: Vec<u8>,
    update_every: usize,
) -> impl Stream<Item = Result<Vec<Splat>, AssetError>> {
    let update_every = update_every.max(1);
    let _span = info_span!("Read ply splats").entered();

    try_stream! {
        check_ply_header(&data)?;
        let mut reader = Cursor::new(&data[..]);
        let parser = Parser::<PlySplat>::new();
        let header = parser.read_header(&mut reader).map_err(AssetError::malformed)?;

        for (name, element) in &header.elements {
            if name != "vertex" {
                // Skip whatever precedes the vertices.
                parser
                    .read_payload_for_element(&mut reader, element, &header)
                    .map_err(AssetError::malformed)?;
                continue;
            }

            for prop in ["x", "y", "z"] {
                if !element.properties.contains_key(prop) {
                    Err(AssetError::Malformed(format!("ply vertex is missing '{prop}'")))?;
                }
            }

            let mut splats = Vec::with_capacity(update_every.min(element.count));

            for _ in 0..element.count {
                let splat = match header.encoding {
                    Encoding::Ascii => {
                        let mut line = String::new();
                        reader.read_line(&mut line).map_err(AssetError::malformed)?;
                        parser.read_ascii_element(&line, element)
                    }
                    Encoding::BinaryBigEndian => parser.read_big_endian_element(&mut reader, element),
                    Encoding::BinaryLittleEndian => {
                        parser.read_little_endian_element(&mut reader, element)
                    }
                }
                .map_err(AssetError::malformed)?;

                splats.push(splat.into_splat());

                // Occasionally send some decoded splats.
                if splats.len() == update_every {
                    yield std::mem::take(&mut splats);
                }
            }

            if !splats.is_empty() {
                yield splats;
            }
            break;
        }
    }
}

/// Size of one record of the headerless `.splat` layout.
pub const RAW_SPLAT_STRIDE: usize = 32;

pub fn raw_splat_count(data: &[u8]) -> Result<usize, AssetError> {
    if data.is_empty() || data.len() % RAW_SPLAT_STRIDE != 0 {
        return Err(AssetError::Malformed(format!(
            "splat data of {} bytes is not a whole number of {RAW_SPLAT_STRIDE} byte records",
            data.len()
        )));
    }
    Ok(data.len() / RAW_SPLAT_STRIDE)
}

fn read_raw_splat(reader: &mut impl Read) -> std::io::Result<Splat> {
    let mut vec3 = || -> std::io::Result<Vec3> {
        Ok(Vec3::new(
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
            reader.read_f32::<LittleEndian>()?,
        ))
    };
    let position = vec3()?;
    let scale = vec3()?;

    let mut rgba = [0u8; 4];
    reader.read_exact(&mut rgba)?;
    let mut rot = [0u8; 4];
    reader.read_exact(&mut rot)?;

    let color = Vec4::from_array(rgba.map(|c| c as f32 / 255.0));
    let [w, x, y, z] = rot.map(|b| (b as f32 - 128.0) / 128.0);

    Ok(Splat {
        position,
        color,
        scale: scale.max(Vec3::splat(MIN_SCALE)),
        rotation: normalized_rotation(w, x, y, z),
        opacity: color.w,
    })
}

pub fn load_splats_from_raw(
    data: Vec<u8>,
    update_every: usize,
) -> impl Stream<Item = Result<Vec<Splat>, AssetError>> {
    let update_every = update_every.max(1);
    let _span = info_span!("Read raw splats").entered();

    try_stream! {
        let count = raw_splat_count(&data)?;
        let mut reader = Cursor::new(&data[..]);
        let mut splats = Vec::with_capacity(update_every.min(count));

        for _ in 0..count {
            splats.push(read_raw_splat(&mut reader).map_err(AssetError::malformed)?);

            if splats.len() == update_every {
                yield std::mem::take(&mut splats);
            }
        }

        if !splats.is_empty() {
            yield splats;
        }
    }
}

/// Gaussian splat PLY as written by 3DGS trainers, or a plain colored point PLY.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlyDecoder;

impl PointCloudDecoder for PlyDecoder {
    fn name(&self) -> &'static str {
        "ply"
    }

    fn accepts(&self, _url: &str, data: &[u8]) -> bool {
        data.starts_with(b"ply")
    }

    fn point_count(&self, data: &[u8]) -> Result<usize, AssetError> {
        ply_count(data)
    }

    fn decode(
        &self,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> stream::BoxedLocal<Result<Vec<Splat>, AssetError>> {
        Box::pin(load_splats_from_ply(data, chunk_size))
    }
}

/// Headerless `.splat` records, recognized by extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSplatDecoder;

impl PointCloudDecoder for RawSplatDecoder {
    fn name(&self) -> &'static str {
        "splat"
    }

    fn accepts(&self, url: &str, _data: &[u8]) -> bool {
        url_extension(url).as_deref() == Some("splat")
    }

    fn point_count(&self, data: &[u8]) -> Result<usize, AssetError> {
        raw_splat_count(data)
    }

    fn decode(
        &self,
        data: Vec<u8>,
        chunk_size: usize,
    ) -> stream::BoxedLocal<Result<Vec<Splat>, AssetError>> {
        Box::pin(load_splats_from_raw(data, chunk_size))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use futures_lite::StreamExt;

    /// `count` records with varied scales, colors and rotations.
    pub(crate) fn raw_splat_bytes(count: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(count * RAW_SPLAT_STRIDE);
        for i in 0..count {
            let t = i as f32;
            for v in [t * 0.01, -t * 0.02, 0.5, 0.01 + t * 1e-4, 0.02, 0.03] {
                out.write_f32::<LittleEndian>(v).unwrap();
            }
            out.extend([(i % 256) as u8, 128, 255, 200]);
            out.extend([255, 128, 128, (i % 200) as u8]);
        }
        out
    }

    /// Binary little endian 3DGS style PLY with `count` vertices.
    pub(crate) fn ply_bytes(count: usize) -> Vec<u8> {
        let props = [
            "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "scale_0", "scale_1",
            "scale_2", "rot_0", "rot_1", "rot_2", "rot_3",
        ];
        let mut out = format!("ply\nformat binary_little_endian 1.0\nelement vertex {count}\n");
        for p in props {
            out.push_str(&format!("property float {p}\n"));
        }
        out.push_str("end_header\n");

        let mut out = out.into_bytes();
        for i in 0..count {
            let t = i as f32;
            let values = [
                t * 0.1, 1.0, -t * 0.05, 0.2, -0.4, 2.0, t - 4.0, -3.0, -4.0, -5.0, 1.0, 0.1,
                0.0, -0.2,
            ];
            for v in values {
                out.write_f32::<LittleEndian>(v).unwrap();
            }
        }
        out
    }

    fn collect(stream: stream::BoxedLocal<Result<Vec<Splat>, AssetError>>) -> Vec<Result<Vec<Splat>, AssetError>> {
        futures_lite::future::block_on(stream.collect::<Vec<_>>())
    }

    #[test]
    fn raw_records_decode() {
        let chunks = collect(RawSplatDecoder.decode(raw_splat_bytes(5), 2));
        let sizes: Vec<_> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, [2, 2, 1]);

        let first = chunks[0].as_ref().unwrap()[0];
        assert_eq!(first.position, Vec3::new(0.0, 0.0, 0.5));
        assert!((first.opacity - 200.0 / 255.0).abs() < 1e-6);
        assert!((first.color.z - 1.0).abs() < 1e-6);
        assert!(first.rotation.is_normalized());
    }

    #[test]
    fn raw_zero_rotation_is_identity() {
        let mut patched = raw_splat_bytes(1);
        patched[28..32].copy_from_slice(&[128, 128, 128, 128]);
        let chunks = collect(RawSplatDecoder.decode(patched, 10));
        assert_eq!(chunks[0].as_ref().unwrap()[0].rotation, Quat::IDENTITY);
    }

    #[test]
    fn raw_count_rejects_partial_records() {
        assert!(raw_splat_count(&[]).is_err());
        assert!(raw_splat_count(&[0; 33]).is_err());
        assert_eq!(raw_splat_count(&[0; 64]).unwrap(), 2);
    }

    #[test]
    fn ply_activations() {
        let data = ply_bytes(3);
        assert_eq!(ply_count(&data).unwrap(), 3);

        let chunks = collect(PlyDecoder.decode(data, 50_000));
        assert_eq!(chunks.len(), 1);
        let splats = chunks[0].as_ref().unwrap();
        assert_eq!(splats.len(), 3);

        let s = splats[2];
        assert!((s.opacity - sigmoid(-2.0)).abs() < 1e-6);
        assert!((s.scale.x - (-3.0f32).exp()).abs() < 1e-6);
        assert!((s.color.x - (0.5 + 0.2 * SH_C0)).abs() < 1e-6);
        assert_eq!(s.color.z, 1.0);
        assert!(s.rotation.is_normalized());
    }

    #[test]
    fn ascii_point_ply_uses_vertex_colors() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nproperty uchar red\nproperty uchar green\nproperty uchar blue\nend_header\n0 0 0 255 0 0\n1 2 3 0 0 255\n".to_vec();
        assert_eq!(ply_count(&data).unwrap(), 2);

        let chunks = collect(PlyDecoder.decode(data, 8));
        let splats = chunks[0].as_ref().unwrap();
        assert_eq!(splats[0].color, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(splats[1].position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(splats[1].opacity, 1.0);
        assert_eq!(splats[1].scale, Vec3::splat(DEFAULT_SCALE));
    }

    #[test]
    fn ply_without_positions_is_malformed() {
        let data = b"ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nend_header\n1\n".to_vec();
        let chunks = collect(PlyDecoder.decode(data, 8));
        assert!(matches!(chunks.last(), Some(Err(AssetError::Malformed(_)))));
    }
}
