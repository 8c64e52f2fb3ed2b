//! Strided subsampling of 4-D weight tensors.
//!
//! [`subsample`] yields the elements at indices `0, s, 2s, ...` along every
//! axis, flattened in row-major (N, C, H, W) order, without copying the source.

use crate::errors::SurgeryError;
use crate::tensor::{ShapeDisplay, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One positive stride per weight axis: `(n, c, h, w)`.
///
/// Serialised as a 4-element array, e.g. `[4, 1, 3, 3]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct SubsampleSpec {
    pub n_stride: usize,
    pub c_stride: usize,
    pub h_stride: usize,
    pub w_stride: usize,
}

impl SubsampleSpec {
    pub const fn new(n_stride: usize, c_stride: usize, h_stride: usize, w_stride: usize) -> Self {
        Self {
            n_stride,
            c_stride,
            h_stride,
            w_stride,
        }
    }

    pub fn strides(&self) -> [usize; 4] {
        [self.n_stride, self.c_stride, self.h_stride, self.w_stride]
    }

    pub fn validate(&self) -> Result<(), SurgeryError> {
        if self.strides().contains(&0) {
            return Err(SurgeryError::Configuration(format!(
                "subsample strides must be positive, got {}",
                self
            )));
        }
        Ok(())
    }

    /// Shape of the selected sub-tensor: `ceil(dim / stride)` per axis.
    pub fn output_dims(&self, dims: [usize; 4]) -> [usize; 4] {
        let s = self.strides();
        [
            dims[0].div_ceil(s[0]),
            dims[1].div_ceil(s[1]),
            dims[2].div_ceil(s[2]),
            dims[3].div_ceil(s[3]),
        ]
    }

    /// Number of selected elements.
    pub fn output_len(&self, dims: [usize; 4]) -> usize {
        self.output_dims(dims).iter().product()
    }
}

impl From<[usize; 4]> for SubsampleSpec {
    fn from(s: [usize; 4]) -> Self {
        Self::new(s[0], s[1], s[2], s[3])
    }
}

impl From<SubsampleSpec> for [usize; 4] {
    fn from(s: SubsampleSpec) -> Self {
        s.strides()
    }
}

impl fmt::Display for SubsampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.n_stride, self.c_stride, self.h_stride, self.w_stride
        )
    }
}

/// Resolve the 4-D shape a tensor is read through.
///
/// With `view`, the element count must match. Without it, lower-rank tensors
/// get trailing unit axes.
pub fn view_dims(tensor: &Tensor, view: Option<[usize; 4]>) -> Result<[usize; 4], SurgeryError> {
    match view {
        Some(dims) => {
            let n: usize = dims.iter().product();
            if n != tensor.len() {
                return Err(SurgeryError::Configuration(format!(
                    "cannot view tensor of shape {} ({} elements) as {}",
                    ShapeDisplay(tensor.shape()),
                    tensor.len(),
                    ShapeDisplay(&dims)
                )));
            }
            Ok(dims)
        }
        None => tensor.padded_4d().ok_or_else(|| {
            SurgeryError::Configuration(format!(
                "tensor of shape {} has more than 4 axes",
                ShapeDisplay(tensor.shape())
            ))
        }),
    }
}

/// Lazy iterator over a strided sub-tensor.
#[derive(Clone)]
pub struct Subsample<'a> {
    data: &'a [f32],
    /// Source offset advanced by one output step on each axis.
    steps: [usize; 4],
    out_dims: [usize; 4],
    index: [usize; 4],
    remaining: usize,
}

impl Subsample<'_> {
    /// Shape of the sub-tensor being produced.
    pub fn output_dims(&self) -> [usize; 4] {
        self.out_dims
    }
}

/// Select every `stride`-th index along each axis of `tensor` (read as `view`
/// or as its padded 4-D shape).
pub fn subsample(
    tensor: &Tensor,
    spec: SubsampleSpec,
    view: Option<[usize; 4]>,
) -> Result<Subsample<'_>, SurgeryError> {
    spec.validate()?;
    let dims = view_dims(tensor, view)?;
    let s = spec.strides();
    let row = [dims[1] * dims[2] * dims[3], dims[2] * dims[3], dims[3], 1];
    let out_dims = spec.output_dims(dims);
    Ok(Subsample {
        data: tensor.data(),
        steps: [row[0] * s[0], row[1] * s[1], row[2] * s[2], row[3] * s[3]],
        out_dims,
        index: [0; 4],
        remaining: out_dims.iter().product(),
    })
}

impl Iterator for Subsample<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.remaining == 0 {
            return None;
        }
        let offset: usize = self
            .index
            .iter()
            .zip(self.steps.iter())
            .map(|(i, s)| i * s)
            .sum();
        let value = self.data[offset];
        self.remaining -= 1;
        for axis in (0..4).rev() {
            self.index[axis] += 1;
            if self.index[axis] < self.out_dims[axis] {
                break;
            }
            self.index[axis] = 0;
        }
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Subsample<'_> {}
