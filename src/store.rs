//! In-process state tree served over the wire.
//!
//! A [`StateStore`] is a read-only tree: internal nodes are string-keyed
//! maps or integer-indexed lists, leaves are [`Value`]s, either a
//! [`Scalar`] or an [`ArrayValue`]. The hosting process builds the tree
//! once, hands it to the server behind an `Arc`, and never mutates it
//! again; resolution is a plain borrow walk with no locking.
//!
//! [`ArrayValue`] owns its element buffer. Moving bytes between a buffer
//! and the wire is a straight copy ([`ArrayValue::bytes`] out,
//! [`ArrayValue::copy_from`] in); shape and stride only describe how those
//! bytes map onto a multi-dimensional view.
use std::collections::HashMap;

use thiserror::Error;

use crate::path::{Path, Segment};
use crate::types::{Dtype, TransferType};

/// Hard protocol limit on array rank; the wire format reserves exactly
/// six shape and six stride slots.
pub const MAX_RANK: usize = 6;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("path '{0}' not found")]
    PathNotFound(String),

    #[error("array rank {0} exceeds the wire limit of {MAX_RANK}")]
    RankTooLarge(usize),

    #[error("stride count {strides} does not match rank {rank}")]
    StrideMismatch { rank: usize, strides: usize },

    #[error("array buffer holds {actual} bytes, layout requires {expected}")]
    BufferMismatch { expected: usize, actual: usize },
}

/// A scalar leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int64(i64),
    Float64(f64),
    Bool(bool),
}

impl Scalar {
    pub fn transfer_type(&self) -> TransferType {
        match self {
            Scalar::Str(_) => TransferType::Str,
            Scalar::Int64(_) => TransferType::Int64,
            Scalar::Float64(_) => TransferType::Float64,
            Scalar::Bool(_) => TransferType::Bool8,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int64(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float64(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// An array leaf: element type, shape, per-dimension strides in elements,
/// and the owned element buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayValue {
    dtype: Dtype,
    shape: Vec<usize>,
    stride: Vec<isize>,
    bytes: Vec<u8>,
}

impl ArrayValue {
    /// Wrap an existing buffer. The buffer must hold exactly
    /// `element_count * dtype.element_size()` bytes and the stride count
    /// must match the rank.
    pub fn new(
        dtype: Dtype,
        shape: Vec<usize>,
        stride: Vec<isize>,
        bytes: Vec<u8>,
    ) -> Result<Self, StoreError> {
        if shape.len() > MAX_RANK {
            return Err(StoreError::RankTooLarge(shape.len()));
        }
        if stride.len() != shape.len() {
            return Err(StoreError::StrideMismatch {
                rank: shape.len(),
                strides: stride.len(),
            });
        }
        let expected = shape.iter().product::<usize>() * dtype.element_size();
        if bytes.len() != expected {
            return Err(StoreError::BufferMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(ArrayValue {
            dtype,
            shape,
            stride,
            bytes,
        })
    }

    /// Allocate a zeroed buffer for the given layout.
    pub fn allocate(dtype: Dtype, shape: Vec<usize>, stride: Vec<isize>) -> Result<Self, StoreError> {
        let len = shape.iter().product::<usize>() * dtype.element_size();
        ArrayValue::new(dtype, shape, stride, vec![0; len])
    }

    /// Wrap a buffer with row-major contiguous strides.
    pub fn contiguous(dtype: Dtype, shape: Vec<usize>, bytes: Vec<u8>) -> Result<Self, StoreError> {
        let stride = contiguous_strides(&shape);
        ArrayValue::new(dtype, shape, stride, bytes)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn stride(&self) -> &[isize] {
        &self.stride
    }

    /// Number of elements; 1 for rank 0.
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Raw buffer contents, exactly as sent on the wire.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy payload bytes received off the wire into the buffer. The
    /// payload must match the buffer length exactly.
    pub fn copy_from(&mut self, payload: &[u8]) -> Result<(), StoreError> {
        if payload.len() != self.bytes.len() {
            return Err(StoreError::BufferMismatch {
                expected: self.bytes.len(),
                actual: payload.len(),
            });
        }
        self.bytes.copy_from_slice(payload);
        Ok(())
    }
}

/// Row-major strides, in elements, for a contiguous layout.
pub fn contiguous_strides(shape: &[usize]) -> Vec<isize> {
    let mut stride = vec![1isize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        stride[i] = stride[i + 1] * shape[i + 1] as isize;
    }
    stride
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Array(ArrayValue),
}

/// One node of the state tree.
#[derive(Debug, Clone)]
pub enum Node {
    Map(HashMap<String, Node>),
    List(Vec<Node>),
    Leaf(Value),
}

impl Node {
    pub fn map() -> Self {
        Node::Map(HashMap::new())
    }

    pub fn list() -> Self {
        Node::List(Vec::new())
    }

    pub fn scalar(value: impl Into<Scalar>) -> Self {
        Node::Leaf(Value::Scalar(value.into()))
    }

    pub fn array(value: ArrayValue) -> Self {
        Node::Leaf(Value::Array(value))
    }

    /// Insert a child under `key`, converting `self` into a map node if
    /// it is not one. Intended for tree construction before the server
    /// starts.
    pub fn insert(&mut self, key: impl Into<String>, child: Node) -> &mut Self {
        if let Node::Map(map) = self {
            map.insert(key.into(), child);
        } else {
            let mut map = HashMap::new();
            map.insert(key.into(), child);
            *self = Node::Map(map);
        }
        self
    }

    /// Append a child to a list node, converting `self` into a list node
    /// if it is not one.
    pub fn push(&mut self, child: Node) -> &mut Self {
        if let Node::List(list) = self {
            list.push(child);
        } else {
            *self = Node::List(vec![child]);
        }
        self
    }
}

/// Read-only nested mapping of names and indices to scalar or array
/// leaves, served over the network.
#[derive(Debug)]
pub struct StateStore {
    root: Node,
}

impl StateStore {
    pub fn new(root: Node) -> Self {
        StateStore { root }
    }

    /// Walk the tree segment by segment down to a leaf.
    ///
    /// Any absent key, out-of-range index, key applied to a list, index
    /// applied to a map, descent through a leaf, or a path ending on an
    /// interior node fails with [`StoreError::PathNotFound`] carrying the
    /// full requested path.
    pub fn resolve(&self, path: &Path) -> Result<&Value, StoreError> {
        let not_found = || StoreError::PathNotFound(path.to_string());

        let mut node = &self.root;
        for segment in path.segments() {
            node = match (node, segment) {
                (Node::Map(map), Segment::Key(key)) => map.get(key).ok_or_else(not_found)?,
                (Node::List(list), Segment::Index(idx)) => list.get(*idx).ok_or_else(not_found)?,
                _ => return Err(not_found()),
            };
        }

        match node {
            Node::Leaf(value) => Ok(value),
            _ => Err(not_found()),
        }
    }
}
