//! # Broadcast
//!
//! $$
//! \operatorname{shape}(L)=\operatorname{bcast}\big(\operatorname{shape}(F),\operatorname{shape}(f_{1j}),\dots,\operatorname{shape}(T)\big)
//! $$
//!
//! Scalar or array operands with NumPy broadcasting rules.
use ndarray::arr0;
use ndarray::ArrayBase;
use ndarray::ArrayView;
use ndarray::ArrayView1;
use ndarray::ArrayViewD;
use ndarray::CowArray;
use ndarray::Data;
use ndarray::Dimension;
use ndarray::IxDyn;

use crate::error::PayoffError;

/// A single model input: either an owned scalar or a borrowed array of any rank.
#[derive(Debug)]
pub struct Operand<'a> {
  inner: CowArray<'a, f64, IxDyn>,
}

impl Operand<'_> {
  pub fn shape(&self) -> &[usize] {
    self.inner.shape()
  }

  /// Broadcast view of the operand onto `target`.
  pub(crate) fn broadcast_to(
    &self,
    name: &'static str,
    target: &[usize],
  ) -> Result<ArrayViewD<'_, f64>, PayoffError> {
    self
      .inner
      .broadcast(IxDyn(target))
      .ok_or_else(|| PayoffError::ShapeMismatch {
        name,
        shape: self.shape().to_vec(),
        target: target.to_vec(),
      })
  }

  /// Every entry must be finite and strictly positive.
  pub(crate) fn ensure_positive(&self, name: &'static str) -> Result<(), PayoffError> {
    match self.inner.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
      Some(&value) => {
        tracing::warn!(parameter = name, value, "rejected non-positive input");
        Err(PayoffError::positive(name, value))
      }
      None => Ok(()),
    }
  }

  /// Every entry must lie in `[0, 1]`.
  pub(crate) fn ensure_unit_interval(&self, name: &'static str) -> Result<(), PayoffError> {
    match self.inner.iter().find(|v| !(0.0..=1.0).contains(*v)) {
      Some(&value) => {
        tracing::warn!(parameter = name, value, "rejected input outside [0, 1]");
        Err(PayoffError::unit_interval(name, value))
      }
      None => Ok(()),
    }
  }
}

impl From<f64> for Operand<'_> {
  fn from(value: f64) -> Self {
    Self {
      inner: CowArray::from(arr0(value).into_dyn()),
    }
  }
}

impl<'a, S, D> From<&'a ArrayBase<S, D>> for Operand<'a>
where
  S: Data<Elem = f64>,
  D: Dimension,
{
  fn from(array: &'a ArrayBase<S, D>) -> Self {
    Self {
      inner: CowArray::from(array.view().into_dyn()),
    }
  }
}

impl<'a, D: Dimension> From<ArrayView<'a, f64, D>> for Operand<'a> {
  fn from(view: ArrayView<'a, f64, D>) -> Self {
    Self {
      inner: CowArray::from(view.into_dyn()),
    }
  }
}

impl<'a> From<&'a [f64]> for Operand<'a> {
  fn from(slice: &'a [f64]) -> Self {
    ArrayView1::from(slice).into()
  }
}

impl<'a> From<&'a Vec<f64>> for Operand<'a> {
  fn from(values: &'a Vec<f64>) -> Self {
    values.as_slice().into()
  }
}

/// Common shape of all operands, aligned from the trailing axis. A length-one
/// axis stretches to match; any other disagreement is a [`PayoffError::ShapeMismatch`].
pub fn broadcast_shape(operands: &[(&'static str, &[usize])]) -> Result<Vec<usize>, PayoffError> {
  let ndim = operands
    .iter()
    .map(|(_, shape)| shape.len())
    .max()
    .unwrap_or(0);
  let mut target = vec![1usize; ndim];

  for &(name, shape) in operands {
    let offset = ndim - shape.len();
    for (axis, &len) in shape.iter().enumerate() {
      let slot = &mut target[offset + axis];
      if *slot == 1 {
        *slot = len;
      } else if len != 1 && len != *slot {
        return Err(PayoffError::ShapeMismatch {
          name,
          shape: shape.to_vec(),
          target: target.clone(),
        });
      }
    }
  }

  Ok(target)
}

#[cfg(test)]
mod tests {
  use ndarray::array;
  use ndarray::Array2;

  use super::*;

  #[test]
  fn scalar_operand_has_rank_zero() {
    let op = Operand::from(2.5);
    assert_eq!(op.inner.ndim(), 0);
    assert_eq!(op.shape(), &[] as &[usize]);
    assert_eq!(op.inner.first(), Some(&2.5));
  }

  #[test]
  fn operand_from_slice_and_vec() {
    let values = vec![1.0, 2.0, 3.0];
    assert_eq!(Operand::from(&values).shape(), &[3]);
    assert_eq!(Operand::from(&values[1..]).shape(), &[2]);
  }

  #[test]
  fn operand_borrows_matrix() {
    let m = Array2::<f64>::ones((2, 4));
    let op = Operand::from(&m);
    assert_eq!(op.shape(), &[2, 4]);
    assert_eq!(op.inner[[1, 3]], 1.0);
  }

  #[test]
  fn broadcast_follows_trailing_axes() {
    let target = broadcast_shape(&[
      ("a", &[] as &[usize]),
      ("b", &[2, 1][..]),
      ("c", &[5][..]),
      ("d", &[1, 5][..]),
    ]);
    assert_eq!(target, Ok(vec![2, 5]));
  }

  #[test]
  fn broadcast_rejects_incompatible_axis() {
    let err = broadcast_shape(&[("f1j", &[4][..]), ("rho", &[3][..])]).unwrap_err();
    assert_eq!(
      err,
      PayoffError::ShapeMismatch {
        name: "rho",
        shape: vec![3],
        target: vec![4],
      }
    );
  }

  #[test]
  fn broadcast_view_stretches_column() {
    let col = array![[0.1], [0.2]];
    let op = Operand::from(&col);
    let view = op.broadcast_to("rho", &[2, 3]).unwrap();
    assert_eq!(view.shape(), &[2, 3]);
    assert_eq!(view[[1, 2]], 0.2);
  }

  #[test]
  fn positivity_check_reports_first_offender() {
    let values = [3.0, 0.0, -1.0];
    let err = Operand::from(&values[..]).ensure_positive("f1j").unwrap_err();
    assert_eq!(err, PayoffError::positive("f1j", 0.0));
  }

  #[test]
  fn positivity_check_rejects_nan_and_infinity() {
    assert!(Operand::from(f64::NAN).ensure_positive("sig").is_err());
    assert!(Operand::from(f64::INFINITY).ensure_positive("t").is_err());
  }

  #[test]
  fn unit_interval_check() {
    assert!(Operand::from(0.0).ensure_unit_interval("rho").is_ok());
    assert!(Operand::from(1.0).ensure_unit_interval("rho").is_ok());
    assert!(Operand::from(1.0 + 1e-12).ensure_unit_interval("rho").is_err());
    assert!(Operand::from(f64::NAN).ensure_unit_interval("rho").is_err());
  }
}
