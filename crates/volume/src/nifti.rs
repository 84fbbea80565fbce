//! NIfTI-1 reading and writing
//!
//! Supports single-file `.nii` and gzip-compressed `.nii.gz` images with
//! integer or floating point voxels. Only the first volume of a 4D series is
//! read. Everything is written as little-endian float32 with both sform and
//! qform set from the affine.

use crate::affine::Affine;
use crate::error::{Result, VolumeError};
use crate::volume::Volume;
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array3, ShapeBuilder};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

const HEADER_SIZE: usize = 348;
const DATA_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;
/// NIFTI_XFORM_SCANNER_ANAT
const XFORM_SCANNER: i16 = 1;

/// True for paths ending in `.nii` or `.nii.gz`
pub fn is_nifti_path(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

/// File name without `.nii` / `.nii.gz` (or any other extension chain)
pub fn file_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find('.') {
        Some(index) => name[..index].to_string(),
        None => name,
    }
}

struct Header<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl Header<'_> {
    fn i16(&self, offset: usize) -> i16 {
        let slice = &self.bytes[offset..offset + 2];
        if self.big_endian {
            BigEndian::read_i16(slice)
        } else {
            LittleEndian::read_i16(slice)
        }
    }

    fn f32(&self, offset: usize) -> f32 {
        let slice = &self.bytes[offset..offset + 4];
        if self.big_endian {
            BigEndian::read_f32(slice)
        } else {
            LittleEndian::read_f32(slice)
        }
    }

    fn f32s<const N: usize>(&self, offset: usize) -> [f32; N] {
        let mut out = [0.0; N];
        for (i, value) in out.iter_mut().enumerate() {
            *value = self.f32(offset + 4 * i);
        }
        out
    }

    fn affine(&self) -> Affine {
        let pixdim: [f32; 8] = self.f32s(76);
        if self.i16(254) > 0 {
            let rows = [self.f32s::<4>(280), self.f32s::<4>(296), self.f32s::<4>(312)];
            let mut matrix = [[0.0; 4]; 4];
            for (row, values) in rows.iter().enumerate() {
                for (col, value) in values.iter().enumerate() {
                    matrix[row][col] = *value as f64;
                }
            }
            matrix[3][3] = 1.0;
            return Affine::new(matrix);
        }
        let spacing = [pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64];
        if self.i16(252) > 0 {
            let [b, c, d]: [f32; 3] = self.f32s(256);
            let offset: [f32; 3] = self.f32s(268);
            let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
            return quaternion_affine(
                [b as f64, c as f64, d as f64],
                spacing,
                qfac,
                offset.map(|v| v as f64),
            );
        }
        Affine::from_spacing(spacing, [0.0; 3])
    }
}

fn quaternion_affine(bcd: [f64; 3], spacing: [f64; 3], qfac: f64, origin: [f64; 3]) -> Affine {
    let [b, c, d] = bcd;
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let r = [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
    ];
    let scale = [spacing[0], spacing[1], spacing[2] * qfac];
    let mut columns = [[0.0; 3]; 3];
    for (axis, column) in columns.iter_mut().enumerate() {
        for row in 0..3 {
            column[row] = r[row][axis] * scale[axis];
        }
    }
    Affine::from_columns(columns, origin)
}

/// Quaternion `(b, c, d)` and qfac of the rotation part of `affine`
fn affine_quaternion(affine: &Affine) -> ([f64; 3], f64) {
    let directions = affine.directions();
    // r[row][col]
    let mut r = [[0.0; 3]; 3];
    for (col, direction) in directions.iter().enumerate() {
        for row in 0..3 {
            r[row][col] = direction[row];
        }
    }
    let det = affine.determinant();
    let qfac = if det < 0.0 { -1.0 } else { 1.0 };
    if qfac < 0.0 {
        for row in r.iter_mut() {
            row[2] = -row[2];
        }
    }

    let trace = r[0][0] + r[1][1] + r[2][2] + 1.0;
    let (a, b, c, d) = if trace > 0.5 {
        let a = 0.5 * trace.sqrt();
        (
            a,
            0.25 * (r[2][1] - r[1][2]) / a,
            0.25 * (r[0][2] - r[2][0]) / a,
            0.25 * (r[1][0] - r[0][1]) / a,
        )
    } else {
        let xd = 1.0 + r[0][0] - (r[1][1] + r[2][2]);
        let yd = 1.0 + r[1][1] - (r[0][0] + r[2][2]);
        let zd = 1.0 + r[2][2] - (r[0][0] + r[1][1]);
        if xd > 1.0 {
            let b = 0.5 * xd.sqrt();
            (
                0.25 * (r[2][1] - r[1][2]) / b,
                b,
                0.25 * (r[0][1] + r[1][0]) / b,
                0.25 * (r[0][2] + r[2][0]) / b,
            )
        } else if yd > 1.0 {
            let c = 0.5 * yd.sqrt();
            (
                0.25 * (r[0][2] - r[2][0]) / c,
                0.25 * (r[0][1] + r[1][0]) / c,
                c,
                0.25 * (r[1][2] + r[2][1]) / c,
            )
        } else {
            let d = 0.5 * zd.sqrt();
            (
                0.25 * (r[1][0] - r[0][1]) / d,
                0.25 * (r[0][2] + r[2][0]) / d,
                0.25 * (r[1][2] + r[2][1]) / d,
                d,
            )
        }
    };
    // Keep the scalar part non-negative so it can be recovered from (b, c, d)
    let quaternion = if a < 0.0 { [-b, -c, -d] } else { [b, c, d] };
    (quaternion, qfac)
}

fn invalid(path: &Path, reason: impl Into<String>) -> VolumeError {
    VolumeError::InvalidNifti {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;
    if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut decoded = Vec::new();
        GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded)?;
        return Ok(decoded);
    }
    Ok(raw)
}

fn decode_voxels(bytes: &[u8], datatype: i16, big_endian: bool, count: usize) -> Option<Vec<f32>> {
    fn decode(
        bytes: &[u8],
        count: usize,
        width: usize,
        read: impl Fn(&[u8]) -> f32,
    ) -> Option<Vec<f32>> {
        let needed = count.checked_mul(width)?;
        if bytes.len() < needed {
            return None;
        }
        Some(bytes[..needed].chunks_exact(width).map(read).collect())
    }

    let be = big_endian;
    match datatype {
        2 => decode(bytes, count, 1, |b| b[0] as f32),
        256 => decode(bytes, count, 1, |b| b[0] as i8 as f32),
        4 => decode(bytes, count, 2, |b| {
            (if be { BigEndian::read_i16(b) } else { LittleEndian::read_i16(b) }) as f32
        }),
        512 => decode(bytes, count, 2, |b| {
            (if be { BigEndian::read_u16(b) } else { LittleEndian::read_u16(b) }) as f32
        }),
        8 => decode(bytes, count, 4, |b| {
            (if be { BigEndian::read_i32(b) } else { LittleEndian::read_i32(b) }) as f32
        }),
        768 => decode(bytes, count, 4, |b| {
            (if be { BigEndian::read_u32(b) } else { LittleEndian::read_u32(b) }) as f32
        }),
        16 => decode(bytes, count, 4, |b| {
            if be { BigEndian::read_f32(b) } else { LittleEndian::read_f32(b) }
        }),
        64 => decode(bytes, count, 8, |b| {
            (if be { BigEndian::read_f64(b) } else { LittleEndian::read_f64(b) }) as f32
        }),
        _ => None,
    }
}

/// Load a NIfTI-1 image
pub fn read_nifti(path: impl AsRef<Path>) -> Result<Volume> {
    let path = path.as_ref();
    let bytes = read_bytes(path)?;
    if bytes.len() < HEADER_SIZE {
        return Err(invalid(path, "file shorter than a NIfTI-1 header"));
    }
    let big_endian = if LittleEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        false
    } else if BigEndian::read_i32(&bytes[0..4]) == HEADER_SIZE as i32 {
        true
    } else {
        return Err(invalid(path, "sizeof_hdr is not 348"));
    };
    let header = Header {
        bytes: &bytes[..HEADER_SIZE],
        big_endian,
    };

    let ndim = header.i16(40);
    if !(1..=7).contains(&ndim) {
        return Err(invalid(path, format!("dim[0] = {} out of range", ndim)));
    }
    let mut shape = [1usize; 3];
    for (axis, extent) in shape.iter_mut().enumerate().take(ndim.min(3) as usize) {
        let value = header.i16(42 + 2 * axis as usize);
        if value < 1 {
            return Err(invalid(path, format!("dim[{}] = {}", axis + 1, value)));
        }
        *extent = value as usize;
    }

    let datatype = header.i16(70);
    let vox_offset = header.f32(108).max(HEADER_SIZE as f32) as usize;
    if vox_offset > bytes.len() {
        return Err(invalid(path, "vox_offset past end of file"));
    }
    let count = shape.iter().product::<usize>();
    let mut values = decode_voxels(&bytes[vox_offset..], datatype, big_endian, count)
        .ok_or_else(|| match datatype {
            2 | 4 | 8 | 16 | 64 | 256 | 512 | 768 => invalid(path, "truncated voxel data"),
            other => VolumeError::UnsupportedDatatype(other),
        })?;

    let slope = header.f32(112);
    let intercept = header.f32(116);
    if slope != 0.0 && slope.is_finite() && (slope != 1.0 || intercept != 0.0) {
        for value in values.iter_mut() {
            *value = *value * slope + intercept;
        }
    }

    let affine = header.affine();
    debug!(
        "Read {} shape {:?} datatype {} spacing {:?}",
        path.display(),
        shape,
        datatype,
        affine.spacing()
    );

    let data = Array3::from_shape_vec((shape[0], shape[1], shape[2]).f(), values)?;
    Volume::new(data.as_standard_layout().into_owned(), affine)
}

fn encode(volume: &Volume) -> Result<Vec<u8>> {
    let shape = volume.shape();
    let affine = volume.affine();
    let spacing = affine.spacing();
    let (quaternion, qfac) = affine_quaternion(affine);
    let origin = affine.origin();

    let mut header = vec![0u8; DATA_OFFSET];
    {
        let mut put_i16 = |offset: usize, value: i16| {
            LittleEndian::write_i16(&mut header[offset..offset + 2], value)
        };
        put_i16(40, 3);
        for (axis, extent) in shape.iter().enumerate() {
            let extent = i16::try_from(*extent)
                .map_err(|_| VolumeError::InvalidShape(shape))?;
            put_i16(42 + 2 * axis, extent);
        }
        for axis in 3..7 {
            put_i16(42 + 2 * axis, 1);
        }
        put_i16(70, DT_FLOAT32);
        put_i16(72, 32);
        put_i16(252, XFORM_SCANNER);
        put_i16(254, XFORM_SCANNER);
    }
    LittleEndian::write_i32(&mut header[0..4], HEADER_SIZE as i32);
    let mut put_f32 = |offset: usize, value: f64| {
        LittleEndian::write_f32(&mut header[offset..offset + 4], value as f32)
    };
    put_f32(76, qfac);
    for (axis, value) in spacing.iter().enumerate() {
        put_f32(80 + 4 * axis, *value);
    }
    put_f32(108, DATA_OFFSET as f64);
    put_f32(112, 1.0);
    for (i, value) in quaternion.iter().enumerate() {
        put_f32(256 + 4 * i, *value);
    }
    for (i, value) in origin.iter().enumerate() {
        put_f32(268 + 4 * i, *value);
    }
    for row in 0..3 {
        for col in 0..4 {
            put_f32(280 + 16 * row + 4 * col, affine.matrix()[row][col]);
        }
    }
    // mm + seconds
    header[123] = 10;
    header[344..348].copy_from_slice(b"n+1\0");

    let data = volume.data();
    let mut bytes = header;
    bytes.reserve(data.len() * 4);
    for k in 0..shape[2] {
        for j in 0..shape[1] {
            for i in 0..shape[0] {
                bytes.write_f32::<LittleEndian>(data[[i, j, k]])?;
            }
        }
    }
    Ok(bytes)
}

/// Write `volume` to `path`, gzip-compressed when the name ends in `.gz`
///
/// The file is written next to its destination and renamed into place, so a
/// reader never observes a partial image.
pub fn write_nifti(path: impl AsRef<Path>, volume: &Volume) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode(volume)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let temp = tempfile::NamedTempFile::new_in(&dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        let compressed = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase().ends_with(".gz"))
            .unwrap_or(false);
        if compressed {
            let mut encoder = GzEncoder::new(&mut writer, Compression::default());
            encoder.write_all(&bytes)?;
            encoder.finish()?;
        } else {
            writer.write_all(&bytes)?;
        }
        writer.flush()?;
    }
    temp.persist(path).map_err(|e| VolumeError::Io(e.error))?;
    debug!("Wrote {} shape {:?}", path.display(), volume.shape());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_volume(affine: Affine) -> Volume {
        let data = Array3::from_shape_fn((5, 4, 3), |(i, j, k)| {
            (i as f32) - 2.0 * j as f32 + 0.25 * k as f32
        });
        Volume::new(data, affine).unwrap()
    }

    fn oblique() -> Affine {
        let (s, c) = (25f64.to_radians().sin(), 25f64.to_radians().cos());
        Affine::from_columns(
            [[-0.9 * c, 0.0, 0.9 * s], [0.0, 1.1, 0.0], [1.2 * s, 0.0, 1.2 * c]],
            [80.0, -110.0, -60.5],
        )
    }

    #[test]
    fn test_round_trip_plain_and_gzip() {
        let dir = TempDir::new().unwrap();
        let volume = sample_volume(Affine::from_spacing([1.0, 0.5, 2.0], [-10.0, 4.0, 0.0]));
        for name in ["img.nii", "img.nii.gz"] {
            let path = dir.path().join(name);
            write_nifti(&path, &volume).unwrap();
            let back = read_nifti(&path).unwrap();
            assert_eq!(back.data(), volume.data());
            assert!(back.affine().max_abs_diff(volume.affine()) < 1e-5);
        }
    }

    #[test]
    fn test_qform_matches_sform() {
        let affine = oblique();
        let volume = sample_volume(affine);
        let bytes = encode(&volume).unwrap();
        let header = Header {
            bytes: &bytes[..HEADER_SIZE],
            big_endian: false,
        };
        assert!(header.affine().max_abs_diff(&affine) < 1e-4);

        // Same header with the sform disabled falls back to the quaternion
        let mut qform_only = bytes.clone();
        LittleEndian::write_i16(&mut qform_only[254..256], 0);
        let header = Header {
            bytes: &qform_only[..HEADER_SIZE],
            big_endian: false,
        };
        assert!(header.affine().max_abs_diff(&affine) < 1e-4);
    }

    #[test]
    fn test_reads_int16_with_scaling() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scaled.nii");
        let mut bytes = encode(&sample_volume(Affine::identity())).unwrap();
        bytes.truncate(DATA_OFFSET);
        LittleEndian::write_i16(&mut bytes[70..72], 4);
        LittleEndian::write_i16(&mut bytes[72..74], 16);
        LittleEndian::write_f32(&mut bytes[112..116], 0.5);
        LittleEndian::write_f32(&mut bytes[116..120], 1.0);
        for value in 0..60i16 {
            bytes.write_i16::<LittleEndian>(value).unwrap();
        }
        std::fs::write(&path, &bytes).unwrap();

        let volume = read_nifti(&path).unwrap();
        assert_eq!(volume.shape(), [5, 4, 3]);
        // Fortran order: value index = i + 5 * (j + 4 * k)
        assert_eq!(volume.data()[[1, 2, 1]], (1 + 5 * (2 + 4)) as f32 * 0.5 + 1.0);
    }

    #[test]
    fn test_rejects_non_nifti() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.nii");
        std::fs::write(&path, vec![0u8; 400]).unwrap();
        assert!(matches!(
            read_nifti(&path),
            Err(VolumeError::InvalidNifti { .. })
        ));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem(Path::new("/a/sub01_T1.nii.gz")), "sub01_T1");
        assert_eq!(file_stem(Path::new("x.nii")), "x");
        assert!(is_nifti_path(Path::new("/a/B.NII.GZ")));
        assert!(!is_nifti_path(Path::new("/a/b.img")));
    }
}
