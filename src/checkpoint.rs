// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Checkpoint container in the safetensors layout.
//!
//! A checkpoint file is an 8-byte little-endian header length, a JSON header
//! mapping tensor names to `{dtype, shape, data_offsets}` entries (plus an
//! optional `__metadata__` string map), and a raw data section the offsets
//! index into. The reader accepts F32 and F16 tensors and widens everything
//! to `f32`; the writer emits F32 with the data section aligned to 8 bytes.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use half::f16;
use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use serde_json::json;

use crate::error::{ActionError, Result};

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    /// 32-bit IEEE float.
    F32,
    /// 16-bit IEEE float, widened to `f32` on read.
    F16,
}

impl Dtype {
    /// Bytes per element.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
        }
    }

    /// Header spelling of this dtype.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::F32 => "F32",
            Self::F16 => "F16",
        }
    }
}

impl std::fmt::Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Dtype {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "F32" => Ok(Self::F32),
            "F16" => Ok(Self::F16),
            other => Err(ActionError::CheckpointError(format!(
                "unsupported dtype {other}, expected F32 or F16"
            ))),
        }
    }
}

/// One tensor read from a checkpoint.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    /// Element type as stored on disk.
    pub dtype: Dtype,
    /// Values widened to `f32`.
    pub data: ArrayD<f32>,
}

#[derive(Deserialize)]
struct RawEntry {
    dtype: String,
    shape: Vec<usize>,
    data_offsets: [u64; 2],
}

/// A parsed checkpoint: named tensors plus free-form string metadata.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    entries: BTreeMap<String, TensorEntry>,
    metadata: BTreeMap<String, String>,
}

impl Checkpoint {
    /// Read and parse a checkpoint file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// checkpoint.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ActionError::CheckpointError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Parse a checkpoint from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error on a truncated file, malformed header, unsupported
    /// dtype, or tensor offsets that do not match their shape.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(ActionError::CheckpointError(format!(
                "file of {} bytes is too short for a header",
                bytes.len()
            )));
        }
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[..8]);
        let header_len = usize::try_from(u64::from_le_bytes(len_bytes)).map_err(|_| {
            ActionError::CheckpointError("header length does not fit in memory".to_string())
        })?;
        if header_len > bytes.len() - 8 {
            return Err(ActionError::CheckpointError(format!(
                "header length {header_len} exceeds file size {}",
                bytes.len()
            )));
        }
        let header: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..8 + header_len]).map_err(|e| {
                ActionError::CheckpointError(format!("invalid header JSON: {e}"))
            })?;
        let data = &bytes[8 + header_len..];

        let mut entries = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, value) in header {
            if name == "__metadata__" {
                metadata = serde_json::from_value(value).map_err(|e| {
                    ActionError::CheckpointError(format!("invalid __metadata__ entry: {e}"))
                })?;
                continue;
            }
            let raw: RawEntry = serde_json::from_value(value).map_err(|e| {
                ActionError::CheckpointError(format!("invalid entry for tensor {name}: {e}"))
            })?;
            let dtype: Dtype = raw.dtype.parse()?;

            let start = usize::try_from(raw.data_offsets[0]).map_err(|_| {
                ActionError::CheckpointError(format!("tensor {name} offset overflows"))
            })?;
            let end = usize::try_from(raw.data_offsets[1]).map_err(|_| {
                ActionError::CheckpointError(format!("tensor {name} offset overflows"))
            })?;
            if start > end || end > data.len() {
                return Err(ActionError::CheckpointError(format!(
                    "tensor {name} offsets [{start}, {end}) out of bounds for {} data bytes",
                    data.len()
                )));
            }
            let expected = raw.shape.iter().product::<usize>() * dtype.byte_size();
            if end - start != expected {
                return Err(ActionError::CheckpointError(format!(
                    "tensor {name} holds {} bytes, shape {:?} as {dtype} needs {expected}",
                    end - start,
                    raw.shape
                )));
            }

            let slice = &data[start..end];
            let values: Vec<f32> = match dtype {
                Dtype::F32 => slice
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
                Dtype::F16 => slice
                    .chunks_exact(2)
                    .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
                    .collect(),
            };
            let tensor = ArrayD::from_shape_vec(IxDyn(&raw.shape), values).map_err(|e| {
                ActionError::CheckpointError(format!("tensor {name}: {e}"))
            })?;
            entries.insert(name, TensorEntry { dtype, data: tensor });
        }
        Ok(Self { entries, metadata })
    }

    /// Number of tensors in the checkpoint.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the checkpoint holds no tensors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a tensor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.entries.get(name)
    }

    /// All tensors, sorted by name.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, TensorEntry> {
        &self.entries
    }

    /// Free-form metadata carried in the header.
    #[must_use]
    pub const fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Consume the checkpoint into a name to tensor map for loading.
    #[must_use]
    pub fn into_parameters(self) -> BTreeMap<String, ArrayD<f32>> {
        self.entries
            .into_iter()
            .map(|(name, entry)| (name, entry.data))
            .collect()
    }
}

/// Strip a training-artifact prefix from parameter names.
///
/// Checkpoints exported from a wrapped training module carry names like
/// `backbone.fcn.bias`; the bare network expects `fcn.bias`. Unprefixed
/// names pass through, and on a collision the stripped name wins.
#[must_use]
pub fn strip_parameter_prefix(
    params: BTreeMap<String, ArrayD<f32>>,
    prefix: &str,
) -> BTreeMap<String, ArrayD<f32>> {
    let mut out = BTreeMap::new();
    let mut stripped = Vec::new();
    for (name, value) in params {
        if let Some(rest) = name.strip_prefix(prefix) {
            stripped.push((rest.to_string(), value));
        } else {
            out.insert(name, value);
        }
    }
    for (name, value) in stripped {
        out.insert(name, value);
    }
    out
}

/// Incremental checkpoint writer, emitting F32 tensors.
#[derive(Debug, Clone, Default)]
pub struct CheckpointWriter {
    tensors: BTreeMap<String, ArrayD<f32>>,
    metadata: BTreeMap<String, String>,
}

impl CheckpointWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named tensor.
    pub fn add(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    /// Add a metadata key-value pair.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Serialize the checkpoint to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = serde_json::Map::new();
        if !self.metadata.is_empty() {
            let value = serde_json::to_value(&self.metadata).map_err(|e| {
                ActionError::CheckpointError(format!("failed to encode metadata: {e}"))
            })?;
            header.insert("__metadata__".to_string(), value);
        }
        let mut offset = 0usize;
        for (name, tensor) in &self.tensors {
            let byte_len = tensor.len() * Dtype::F32.byte_size();
            header.insert(
                name.clone(),
                json!({
                    "dtype": Dtype::F32.as_str(),
                    "shape": tensor.shape(),
                    "data_offsets": [offset, offset + byte_len],
                }),
            );
            offset += byte_len;
        }
        let mut header_bytes =
            serde_json::to_vec(&serde_json::Value::Object(header)).map_err(|e| {
                ActionError::CheckpointError(format!("failed to encode header: {e}"))
            })?;
        // Pad the header so the data section starts 8-byte aligned.
        while header_bytes.len() % 8 != 0 {
            header_bytes.push(b' ');
        }

        let mut buf = Vec::with_capacity(8 + header_bytes.len() + offset);
        buf.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        for tensor in self.tensors.values() {
            for value in tensor {
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Serialize and write the checkpoint to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()?).map_err(|e| {
            ActionError::CheckpointError(format!("failed to write {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4};

    fn raw_checkpoint(header: &str, data: &[u8]) -> Vec<u8> {
        let mut header = header.as_bytes().to_vec();
        while header.len() % 8 != 0 {
            header.push(b' ');
        }
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_roundtrip_preserves_tensors_and_metadata() {
        let mut writer = CheckpointWriter::new();
        writer.add("fcn.bias", Array1::from_vec(vec![1.0f32, -2.0, 3.5]).into_dyn());
        writer.add(
            "fcn.weight",
            Array4::from_elem((2, 3, 1, 1), 0.25f32).into_dyn(),
        );
        writer.add_metadata("format", "st-gcn");

        let bytes = writer.to_bytes().unwrap();
        let checkpoint = Checkpoint::from_bytes(&bytes).unwrap();
        assert_eq!(checkpoint.len(), 2);
        assert_eq!(checkpoint.metadata().get("format").unwrap(), "st-gcn");

        let bias = checkpoint.get("fcn.bias").unwrap();
        assert_eq!(bias.dtype, Dtype::F32);
        assert_eq!(bias.data.shape(), &[3]);
        assert_eq!(bias.data[[1]], -2.0);

        let weight = checkpoint.get("fcn.weight").unwrap();
        assert_eq!(weight.data.shape(), &[2, 3, 1, 1]);
        assert!(weight.data.iter().all(|v| (*v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_data_section_is_aligned() {
        let mut writer = CheckpointWriter::new();
        writer.add("a", Array1::from_vec(vec![1.0f32]).into_dyn());
        let bytes = writer.to_bytes().unwrap();
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&bytes[..8]);
        let header_len = u64::from_le_bytes(len_bytes);
        assert_eq!(header_len % 8, 0);
    }

    #[test]
    fn test_reads_f16_tensors() {
        let mut data = Vec::new();
        data.extend_from_slice(&f16::from_f32(1.5).to_le_bytes());
        data.extend_from_slice(&f16::from_f32(-0.25).to_le_bytes());
        let bytes = raw_checkpoint(
            r#"{"a":{"dtype":"F16","shape":[2],"data_offsets":[0,4]}}"#,
            &data,
        );
        let checkpoint = Checkpoint::from_bytes(&bytes).unwrap();
        let entry = checkpoint.get("a").unwrap();
        assert_eq!(entry.dtype, Dtype::F16);
        assert!((entry.data[[0]] - 1.5).abs() < 1e-6);
        assert!((entry.data[[1]] + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_scalar_tensor() {
        let bytes = raw_checkpoint(
            r#"{"s":{"dtype":"F32","shape":[],"data_offsets":[0,4]}}"#,
            &2.0f32.to_le_bytes(),
        );
        let checkpoint = Checkpoint::from_bytes(&bytes).unwrap();
        let entry = checkpoint.get("s").unwrap();
        assert_eq!(entry.data.ndim(), 0);
        assert_eq!(entry.data.len(), 1);
    }

    #[test]
    fn test_truncated_file_rejected() {
        assert!(matches!(
            Checkpoint::from_bytes(&[1, 2, 3]),
            Err(ActionError::CheckpointError(_))
        ));
    }

    #[test]
    fn test_header_length_beyond_file_rejected() {
        let mut bytes = 1000u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(Checkpoint::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_invalid_json_rejected() {
        let bytes = raw_checkpoint("{not json", &[]);
        assert!(Checkpoint::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_unsupported_dtype_rejected() {
        let bytes = raw_checkpoint(
            r#"{"a":{"dtype":"I64","shape":[1],"data_offsets":[0,8]}}"#,
            &[0; 8],
        );
        let err = Checkpoint::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("I64"));
    }

    #[test]
    fn test_offsets_out_of_bounds_rejected() {
        let bytes = raw_checkpoint(
            r#"{"a":{"dtype":"F32","shape":[2],"data_offsets":[0,8]}}"#,
            &[0; 4],
        );
        assert!(Checkpoint::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_shape_byte_mismatch_rejected() {
        let bytes = raw_checkpoint(
            r#"{"a":{"dtype":"F32","shape":[3],"data_offsets":[0,8]}}"#,
            &[0; 8],
        );
        assert!(Checkpoint::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_strip_parameter_prefix() {
        let mut params = BTreeMap::new();
        params.insert(
            "backbone.fcn.bias".to_string(),
            Array1::from_vec(vec![1.0f32]).into_dyn(),
        );
        params.insert(
            "fcn.bias".to_string(),
            Array1::from_vec(vec![9.0f32]).into_dyn(),
        );
        params.insert(
            "other".to_string(),
            Array1::from_vec(vec![5.0f32]).into_dyn(),
        );

        let out = strip_parameter_prefix(params, "backbone.");
        assert_eq!(out.len(), 2);
        // The stripped name wins the collision.
        assert_eq!(out.get("fcn.bias").unwrap()[[0]], 1.0);
        assert_eq!(out.get("other").unwrap()[[0]], 5.0);
    }
}
