//! Checkpoint reader/writer (GGUF v3 container, F32 tensors).
//!
//! Layout: header, metadata KV, tensor infos, 32-byte aligned tensor data.
//! Each layer is stored as two tensors, `<layer>.weight` and `<layer>.bias`.

use crate::errors::SurgeryError;
use crate::model::Network;
use crate::tensor::Tensor;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Take, Write};
use std::path::Path;
use tracing::debug;

/// GGUF magic: "GGUF" = 0x46554747
const GGUF_MAGIC: u32 = 0x4655_4747;
const GGUF_VERSION: u32 = 3;
const GGUF_ALIGNMENT: u64 = 32;

/// Value written to `general.architecture`.
pub const ARCHITECTURE: &str = "net-surgery";

/// Metadata value type ids.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueType {
    UInt8 = 0,
    Int8 = 1,
    UInt16 = 2,
    Int16 = 3,
    UInt32 = 4,
    Int32 = 5,
    Float32 = 6,
    Bool = 7,
    String = 8,
    Array = 9,
    UInt64 = 10,
    Int64 = 11,
    Float64 = 12,
}

impl ValueType {
    fn from_u32(id: u32) -> Option<Self> {
        use ValueType::*;
        [
            UInt8, Int8, UInt16, Int16, UInt32, Int32, Float32, Bool, String, Array, UInt64,
            Int64, Float64,
        ]
        .into_iter()
        .find(|t| *t as u32 == id)
    }
}

/// Tensor storage type. Only F32 is read or written.
const TENSOR_TYPE_F32: u32 = 0;
const TENSOR_TYPE_F16: u32 = 1;

/// Human-readable name of a tensor type id.
pub fn tensor_type_name(tensor_type: u32) -> &'static str {
    match tensor_type {
        TENSOR_TYPE_F32 => "F32",
        TENSOR_TYPE_F16 => "F16",
        _ => "unknown",
    }
}

/// Metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    UInt8(u8),
    Int8(i8),
    UInt16(u16),
    Int16(i16),
    UInt32(u32),
    Int32(i32),
    Float32(f32),
    Bool(bool),
    String(String),
    Array(Vec<MetadataValue>),
    UInt64(u64),
    Int64(i64),
    Float64(f64),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MetadataValue::UInt8(x) => Some(*x as u64),
            MetadataValue::UInt16(x) => Some(*x as u64),
            MetadataValue::UInt32(x) => Some(*x as u64),
            MetadataValue::UInt64(x) => Some(*x),
            MetadataValue::Int32(x) if *x >= 0 => Some(*x as u64),
            MetadataValue::Int64(x) if *x >= 0 => Some(*x as u64),
            _ => None,
        }
    }
}

/// Header: magic, version, tensor_count, metadata_kv_count
struct Header {
    magic: u32,
    version: u32,
    tensor_count: u64,
    metadata_kv_count: u64,
}

impl Header {
    fn read<R: Read>(r: &mut R) -> std::io::Result<Self> {
        Ok(Self {
            magic: r.read_u32::<LittleEndian>()?,
            version: r.read_u32::<LittleEndian>()?,
            tensor_count: r.read_u64::<LittleEndian>()?,
            metadata_kv_count: r.read_u64::<LittleEndian>()?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u64::<LittleEndian>(self.tensor_count)?;
        w.write_u64::<LittleEndian>(self.metadata_kv_count)?;
        Ok(())
    }
}

/// Tensor info: name, dimensions, type, offset into the data section
struct TensorInfo {
    name: String,
    dimensions: Vec<u64>,
    tensor_type: u32,
    offset: u64,
}

impl TensorInfo {
    /// `None` if the dimension product does not fit in `usize`.
    fn num_elements(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(usize::try_from(d).ok()?))
    }

    /// Byte range of this tensor within the data section.
    fn byte_range(&self) -> Option<std::ops::Range<usize>> {
        let len = self.num_elements()?.checked_mul(4)?;
        let start = usize::try_from(self.offset).ok()?;
        Some(start..start.checked_add(len)?)
    }
}

impl MetadataValue {
    fn value_type(&self) -> ValueType {
        match self {
            MetadataValue::UInt8(_) => ValueType::UInt8,
            MetadataValue::Int8(_) => ValueType::Int8,
            MetadataValue::UInt16(_) => ValueType::UInt16,
            MetadataValue::Int16(_) => ValueType::Int16,
            MetadataValue::UInt32(_) => ValueType::UInt32,
            MetadataValue::Int32(_) => ValueType::Int32,
            MetadataValue::Float32(_) => ValueType::Float32,
            MetadataValue::Bool(_) => ValueType::Bool,
            MetadataValue::String(_) => ValueType::String,
            MetadataValue::Array(_) => ValueType::Array,
            MetadataValue::UInt64(_) => ValueType::UInt64,
            MetadataValue::Int64(_) => ValueType::Int64,
            MetadataValue::Float64(_) => ValueType::Float64,
        }
    }
}

fn malformed(what: impl Into<String>) -> SurgeryError {
    SurgeryError::InvalidFormat(what.into())
}

/// Every length prefix is checked against the bytes left in `r` before allocating.
fn ensure_remaining<R: Read>(r: &Take<R>, needed: u64, what: &str) -> Result<(), SurgeryError> {
    if needed > r.limit() {
        return Err(malformed(format!(
            "{} of {} bytes runs past end of file ({} left)",
            what,
            needed,
            r.limit()
        )));
    }
    Ok(())
}

fn read_string<R: Read>(r: &mut Take<R>) -> Result<String, SurgeryError> {
    let len = r.read_u64::<LittleEndian>()?;
    ensure_remaining(r, len, "string")?;
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| malformed("string is not valid UTF-8"))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    let b = s.as_bytes();
    w.write_u64::<LittleEndian>(b.len() as u64)?;
    w.write_all(b)?;
    Ok(())
}

fn read_value<R: Read>(r: &mut Take<R>, type_id: u32) -> Result<MetadataValue, SurgeryError> {
    let value_type = ValueType::from_u32(type_id)
        .ok_or_else(|| malformed(format!("unknown metadata value type {}", type_id)))?;
    Ok(match value_type {
        ValueType::UInt8 => MetadataValue::UInt8(r.read_u8()?),
        ValueType::Int8 => MetadataValue::Int8(r.read_i8()?),
        ValueType::UInt16 => MetadataValue::UInt16(r.read_u16::<LittleEndian>()?),
        ValueType::Int16 => MetadataValue::Int16(r.read_i16::<LittleEndian>()?),
        ValueType::UInt32 => MetadataValue::UInt32(r.read_u32::<LittleEndian>()?),
        ValueType::Int32 => MetadataValue::Int32(r.read_i32::<LittleEndian>()?),
        ValueType::Float32 => MetadataValue::Float32(r.read_f32::<LittleEndian>()?),
        ValueType::Bool => MetadataValue::Bool(r.read_u8()? != 0),
        ValueType::String => MetadataValue::String(read_string(r)?),
        ValueType::UInt64 => MetadataValue::UInt64(r.read_u64::<LittleEndian>()?),
        ValueType::Int64 => MetadataValue::Int64(r.read_i64::<LittleEndian>()?),
        ValueType::Float64 => MetadataValue::Float64(r.read_f64::<LittleEndian>()?),
        ValueType::Array => {
            let elem_type = r.read_u32::<LittleEndian>()?;
            let len = r.read_u64::<LittleEndian>()?;
            // each element takes at least one byte
            ensure_remaining(r, len, "array")?;
            let items = (0..len)
                .map(|_| read_value(r, elem_type))
                .collect::<Result<Vec<_>, _>>()?;
            MetadataValue::Array(items)
        }
    })
}

/// Payload of `value`, without its type id.
fn write_value<W: Write>(w: &mut W, value: &MetadataValue) -> Result<(), SurgeryError> {
    match value {
        MetadataValue::UInt8(v) => w.write_u8(*v)?,
        MetadataValue::Int8(v) => w.write_i8(*v)?,
        MetadataValue::UInt16(v) => w.write_u16::<LittleEndian>(*v)?,
        MetadataValue::Int16(v) => w.write_i16::<LittleEndian>(*v)?,
        MetadataValue::UInt32(v) => w.write_u32::<LittleEndian>(*v)?,
        MetadataValue::Int32(v) => w.write_i32::<LittleEndian>(*v)?,
        MetadataValue::Float32(v) => w.write_f32::<LittleEndian>(*v)?,
        MetadataValue::Bool(v) => w.write_u8(u8::from(*v))?,
        MetadataValue::String(s) => write_string(w, s)?,
        MetadataValue::UInt64(v) => w.write_u64::<LittleEndian>(*v)?,
        MetadataValue::Int64(v) => w.write_i64::<LittleEndian>(*v)?,
        MetadataValue::Float64(v) => w.write_f64::<LittleEndian>(*v)?,
        MetadataValue::Array(items) => {
            let elem_type = items.first().map_or(ValueType::UInt8, MetadataValue::value_type);
            if items.iter().any(|v| v.value_type() != elem_type) {
                return Err(malformed("metadata array mixes value types"));
            }
            w.write_u32::<LittleEndian>(elem_type as u32)?;
            w.write_u64::<LittleEndian>(items.len() as u64)?;
            for item in items {
                write_value(w, item)?;
            }
        }
    }
    Ok(())
}

fn read_metadata<R: Read>(
    r: &mut Take<R>,
    kv_count: u64,
) -> Result<HashMap<String, MetadataValue>, SurgeryError> {
    let mut meta = HashMap::new();
    for _ in 0..kv_count {
        let key = read_string(r)?;
        let type_id = r.read_u32::<LittleEndian>()?;
        meta.insert(key, read_value(r, type_id)?);
    }
    Ok(meta)
}

fn write_metadata_kv<W: Write>(
    w: &mut W,
    key: &str,
    value: &MetadataValue,
) -> Result<(), SurgeryError> {
    write_string(w, key)?;
    w.write_u32::<LittleEndian>(value.value_type() as u32)?;
    write_value(w, value)
}

fn read_tensor_infos<R: Read>(
    r: &mut Take<R>,
    tensor_count: u64,
) -> Result<Vec<TensorInfo>, SurgeryError> {
    let mut infos = Vec::with_capacity((tensor_count as usize).min(1 << 16));
    for _ in 0..tensor_count {
        let name = read_string(r)?;
        let n_dims = u64::from(r.read_u32::<LittleEndian>()?);
        ensure_remaining(r, n_dims * 8, "tensor dimensions")?;
        let dimensions = (0..n_dims)
            .map(|_| r.read_u64::<LittleEndian>())
            .collect::<std::io::Result<Vec<_>>>()?;
        let tensor_type = r.read_u32::<LittleEndian>()?;
        let offset = r.read_u64::<LittleEndian>()?;
        infos.push(TensorInfo {
            name,
            dimensions,
            tensor_type,
            offset,
        });
    }
    Ok(infos)
}

fn alignment_padding(pos: u64) -> u64 {
    (GGUF_ALIGNMENT - (pos % GGUF_ALIGNMENT)) % GGUF_ALIGNMENT
}

/// Reads header, metadata and tensor infos, leaving `file` at the start of the data section.
fn read_preamble(
    file: &mut File,
) -> Result<(Header, HashMap<String, MetadataValue>, Vec<TensorInfo>), SurgeryError> {
    let file_len = file.metadata()?.len();
    let mut r = (&mut *file).take(file_len);
    let header = Header::read(&mut r)?;
    if header.magic != GGUF_MAGIC {
        return Err(SurgeryError::InvalidFormat("invalid GGUF magic".into()));
    }
    if header.version != GGUF_VERSION {
        return Err(SurgeryError::UnsupportedVersion(header.version));
    }
    let meta = read_metadata(&mut r, header.metadata_kv_count)?;
    let infos = read_tensor_infos(&mut r, header.tensor_count)?;
    let pos = file.stream_position()?;
    file.seek(SeekFrom::Current(alignment_padding(pos) as i64))?;
    Ok((header, meta, infos))
}

/// Named tensor read from a checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointTensor {
    pub name: String,
    pub tensor: Tensor,
}

/// Decoded checkpoint: metadata plus tensors in file order.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub metadata: HashMap<String, MetadataValue>,
    pub tensors: Vec<CheckpointTensor>,
}

impl Checkpoint {
    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.tensors
            .iter()
            .find(|t| t.name == name)
            .map(|t| &t.tensor)
    }

    /// `general.name`, if present.
    pub fn network_name(&self) -> Option<&str> {
        self.metadata.get("general.name").and_then(|v| v.as_str())
    }
}

/// Tensor name for a layer's weights.
pub fn weight_key(layer: &str) -> String {
    format!("{}.weight", layer)
}

/// Tensor name for a layer's bias.
pub fn bias_key(layer: &str) -> String {
    format!("{}.bias", layer)
}

/// Load every tensor of a checkpoint file.
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Checkpoint, SurgeryError> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let (_header, metadata, infos) = read_preamble(&mut file)?;

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut tensors = Vec::with_capacity(infos.len());
    for info in &infos {
        if info.tensor_type != TENSOR_TYPE_F32 {
            return Err(SurgeryError::UnsupportedTensorType {
                name: info.name.clone(),
                tensor_type: info.tensor_type,
            });
        }
        let range = match info.byte_range() {
            Some(range) if range.end <= data.len() => range,
            _ => {
                return Err(malformed(format!(
                    "tensor {} out of bounds (offset {}, dims {:?})",
                    info.name, info.offset, info.dimensions
                )))
            }
        };
        let values: Vec<f32> = data[range]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let shape = info.dimensions.iter().map(|&d| d as usize).collect();
        tensors.push(CheckpointTensor {
            name: info.name.clone(),
            tensor: Tensor::from_vec(shape, values)?,
        });
    }
    debug!(path = %path.display(), tensors = tensors.len(), "checkpoint loaded");

    Ok(Checkpoint { metadata, tensors })
}

/// Save all parameters of `network` in declared layer order.
pub fn save_checkpoint(network: &Network, path: impl AsRef<Path>) -> Result<(), SurgeryError> {
    let path = path.as_ref();
    let mut w = BufWriter::new(File::create(path)?);

    let meta_kv: Vec<(&str, MetadataValue)> = vec![
        (
            "general.architecture",
            MetadataValue::String(ARCHITECTURE.into()),
        ),
        ("general.name", MetadataValue::String(network.name().into())),
        (
            "surgery.layer_count",
            MetadataValue::UInt32(network.layers().len() as u32),
        ),
    ];

    let mut tensors: Vec<(String, &Tensor)> = Vec::with_capacity(network.layers().len() * 2);
    for layer in network.layers() {
        tensors.push((weight_key(&layer.name), &layer.weights));
        tensors.push((bias_key(&layer.name), &layer.bias));
    }

    let header = Header {
        magic: GGUF_MAGIC,
        version: GGUF_VERSION,
        tensor_count: tensors.len() as u64,
        metadata_kv_count: meta_kv.len() as u64,
    };
    header.write(&mut w)?;
    for (k, v) in &meta_kv {
        write_metadata_kv(&mut w, k, v)?;
    }

    let mut data_offset: u64 = 0;
    for (name, tensor) in &tensors {
        write_string(&mut w, name)?;
        w.write_u32::<LittleEndian>(tensor.rank() as u32)?;
        for &d in tensor.shape() {
            w.write_u64::<LittleEndian>(d as u64)?;
        }
        w.write_u32::<LittleEndian>(TENSOR_TYPE_F32)?;
        w.write_u64::<LittleEndian>(data_offset)?;
        data_offset += (tensor.len() * 4) as u64;
    }

    let pos = w.stream_position()?;
    let padding = alignment_padding(pos);
    w.write_all(&vec![0u8; padding as usize])?;

    for (_, tensor) in &tensors {
        w.write_all(&tensor.to_le_bytes())?;
    }
    w.flush()?;
    debug!(path = %path.display(), tensors = tensors.len(), "checkpoint saved");
    Ok(())
}

/// Per-tensor entry of [`InspectResult`].
#[derive(Debug, Clone)]
pub struct TensorInfoInspect {
    pub name: String,
    pub shape: Vec<usize>,
    pub tensor_type: u32,
    pub offset: u64,
}

/// Summary of a checkpoint without decoding tensor data.
#[derive(Debug, Clone)]
pub struct InspectResult {
    pub version: u32,
    pub architecture: Option<String>,
    pub name: Option<String>,
    pub metadata_keys: Vec<String>,
    pub tensors: Vec<TensorInfoInspect>,
}

/// Read header, metadata, and tensor infos only.
pub fn inspect_checkpoint(path: impl AsRef<Path>) -> Result<InspectResult, SurgeryError> {
    let mut file = File::open(path.as_ref())?;
    let (header, metadata, infos) = read_preamble(&mut file)?;
    let mut metadata_keys: Vec<String> = metadata.keys().cloned().collect();
    metadata_keys.sort();
    Ok(InspectResult {
        version: header.version,
        architecture: metadata
            .get("general.architecture")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        name: metadata
            .get("general.name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        metadata_keys,
        tensors: infos
            .into_iter()
            .map(|i| TensorInfoInspect {
                shape: i.dimensions.iter().map(|&d| d as usize).collect(),
                name: i.name,
                tensor_type: i.tensor_type,
                offset: i.offset,
            })
            .collect(),
    })
}
