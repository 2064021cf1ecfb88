//! Transfer-type registry.
//!
//! Every value crossing the wire is tagged with a [`TransferType`]. The tag
//! space is flat and ordered: tags `0..=3` are scalar kinds, tags `4..=7`
//! are array element types. The wire value `-1` means "unspecified", in
//! which case the server infers the type from the resolved value.
//!
//! [`Dtype`] is the store-side element type of an array leaf. Only a subset
//! of dtypes can be served; the rest have no transfer-type mapping and
//! resolve to an `UnsupportedType` error at request time.

/// Wire tag meaning "unspecified"; the server picks the type.
pub const UNSPECIFIED_TAG: i32 = -1;

/// Byte size of the codebook block sent with quantized payloads.
pub const CODEBOOK_SIZE: usize = 256;

/// Tag identifying a scalar kind or an array element type on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferType {
    Str,
    Int64,
    Float64,
    Bool8,
    Float32,
    BFloat16,
    Float16,
    UniformInt8,
}

impl TransferType {
    /// Wire tag for this type.
    pub fn tag(self) -> i32 {
        match self {
            TransferType::Str => 0,
            TransferType::Int64 => 1,
            TransferType::Float64 => 2,
            TransferType::Bool8 => 3,
            TransferType::Float32 => 4,
            TransferType::BFloat16 => 5,
            TransferType::Float16 => 6,
            TransferType::UniformInt8 => 7,
        }
    }

    /// Inverse of [`TransferType::tag`]. `None` for tags outside the
    /// registry, including [`UNSPECIFIED_TAG`].
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(TransferType::Str),
            1 => Some(TransferType::Int64),
            2 => Some(TransferType::Float64),
            3 => Some(TransferType::Bool8),
            4 => Some(TransferType::Float32),
            5 => Some(TransferType::BFloat16),
            6 => Some(TransferType::Float16),
            7 => Some(TransferType::UniformInt8),
            _ => None,
        }
    }

    /// Whether this tag names an array element type.
    pub fn is_array(self) -> bool {
        self.tag() >= 4
    }

    /// Whether this tag names a scalar kind.
    pub fn is_scalar(self) -> bool {
        !self.is_array()
    }

    /// Bytes per element for array types; `None` for scalar kinds, whose
    /// payload sizes are fixed or length-prefixed instead.
    pub fn element_size(self) -> Option<usize> {
        match self {
            TransferType::Float32 => Some(4),
            TransferType::BFloat16 | TransferType::Float16 => Some(2),
            TransferType::UniformInt8 => Some(1),
            _ => None,
        }
    }

    /// Byte size of the codebook block preceding the payload, 0 for
    /// non-quantized types.
    pub fn codebook_size(self) -> usize {
        match self {
            TransferType::UniformInt8 => CODEBOOK_SIZE,
            _ => 0,
        }
    }

    /// Store-side dtype an array of this transfer type decodes into.
    /// `None` for scalar kinds.
    pub fn dtype(self) -> Option<Dtype> {
        match self {
            TransferType::Float32 => Some(Dtype::F32),
            TransferType::BFloat16 => Some(Dtype::BF16),
            TransferType::Float16 => Some(Dtype::F16),
            TransferType::UniformInt8 => Some(Dtype::U8),
            _ => None,
        }
    }
}

/// Store-side element type of an array leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    F32,
    F64,
    BF16,
    F16,
    I64,
    I32,
    U8,
}

impl Dtype {
    /// Size of a single element in bytes.
    pub fn element_size(self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::BF16 | Dtype::F16 => 2,
            Dtype::F32 | Dtype::I32 => 4,
            Dtype::F64 | Dtype::I64 => 8,
        }
    }

    /// Transfer type this dtype is served as. `None` means the dtype
    /// cannot cross the wire.
    pub fn transfer_type(self) -> Option<TransferType> {
        match self {
            Dtype::F32 => Some(TransferType::Float32),
            Dtype::BF16 => Some(TransferType::BFloat16),
            Dtype::F16 => Some(TransferType::Float16),
            Dtype::U8 => Some(TransferType::UniformInt8),
            Dtype::F64 | Dtype::I64 | Dtype::I32 => None,
        }
    }
}
