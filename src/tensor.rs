//! Dense F32 tensor in row-major order.
//!
//! Parameters are kept as a flat `Vec<f32>` plus a shape. All writes into an
//! existing tensor go through [`Tensor::assign_flat`], which refuses any
//! sequence whose length differs from the tensor's element count.

use crate::errors::SurgeryError;
use std::fmt;

/// Row-major F32 tensor. Invariant: `data.len() == shape.iter().product()`.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Wrap existing data. Fails if `data.len()` does not match the shape.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, SurgeryError> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(SurgeryError::InvalidFormat(format!(
                "tensor of shape {} needs {} elements, got {}",
                ShapeDisplay(&shape),
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Same data under a new shape with equal element count.
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Tensor, SurgeryError> {
        Tensor::from_vec(shape, self.data.clone())
    }

    /// Shape padded to rank 4 with trailing unit axes (`[out, in]` -> `[out, in, 1, 1]`).
    /// Returns `None` for tensors of rank greater than 4.
    pub fn padded_4d(&self) -> Option<[usize; 4]> {
        if self.shape.len() > 4 {
            return None;
        }
        let mut dims = [1usize; 4];
        dims[..self.shape.len()].copy_from_slice(&self.shape);
        Some(dims)
    }

    /// Overwrite every element, in row-major order, from `values`.
    ///
    /// `layer` is only used to name the tensor in the error. The tensor is left
    /// untouched when the lengths differ.
    pub fn assign_flat<I>(&mut self, layer: &str, values: I) -> Result<(), SurgeryError>
    where
        I: ExactSizeIterator<Item = f32>,
    {
        if values.len() != self.data.len() {
            return Err(SurgeryError::ShapeMismatch {
                layer: layer.to_string(),
                expected: self.data.len(),
                actual: values.len(),
            });
        }
        for (dst, v) in self.data.iter_mut().zip(values) {
            *dst = v;
        }
        Ok(())
    }

    /// Little-endian bytes of the data, as stored in checkpoints.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() * 4);
        for &f in &self.data {
            out.extend_from_slice(&f.to_le_bytes());
        }
        out
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Formats a shape the way the diagnostics print it: `(4096, 512, 7, 7)`.
pub struct ShapeDisplay<'a>(pub &'a [usize]);

impl fmt::Display for ShapeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}
