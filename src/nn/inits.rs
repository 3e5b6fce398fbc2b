//! In-place parameter initialisers.
//!
//! Parameters handed out by a [`candle_nn::VarMap`] share storage with the
//! underlying `Var`, so writing through [`Tensor::slice_set`] re-initialises
//! the trainable variable itself.

use candle_core::{Tensor, D};
use candle_nn::Init;

use crate::error::{shape_bail, Result};

/// Xavier-uniform bound `sqrt(6 / (fan_in + fan_out))` over the last two dims.
pub fn glorot_bound(fan_in: usize, fan_out: usize) -> f64 {
    (6.0 / (fan_in + fan_out) as f64).sqrt()
}

pub fn glorot_init(fan_in: usize, fan_out: usize) -> Init {
    let bound = glorot_bound(fan_in, fan_out);
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Fills the whole tensor with Xavier-uniform values.
pub fn glorot(tensor: &Tensor) -> Result<()> {
    let len = tensor.dims().first().copied().unwrap_or(0);
    glorot_narrow(tensor, 0, len)
}

/// Fills `tensor[start..start + len]` (along dim 0) with Xavier-uniform values.
pub fn glorot_narrow(tensor: &Tensor, start: usize, len: usize) -> Result<()> {
    if tensor.rank() < 2 {
        shape_bail!(
            "glorot needs at least two dims, got {:?}",
            tensor.dims()
        );
    }
    if len == 0 {
        return Ok(());
    }
    let bound = glorot_bound(tensor.dim(D::Minus2)?, tensor.dim(D::Minus1)?);
    let mut dims = tensor.dims().to_vec();
    dims[0] = len;
    let values = Tensor::rand(-bound, bound, dims, tensor.device())?.to_dtype(tensor.dtype())?;
    tensor.slice_set(&values, 0, start)?;
    Ok(())
}

pub fn zeros(tensor: &Tensor) -> Result<()> {
    tensor.slice_set(&tensor.zeros_like()?, 0, 0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device, IndexOp};

    use super::*;

    #[test]
    fn glorot_narrow_leaves_other_slices_alone() -> Result<()> {
        let weight = Tensor::zeros((3, 8, 4), DType::F32, &Device::Cpu)?;
        glorot_narrow(&weight, 0, 2)?;

        let bound = glorot_bound(8, 4) as f32;
        let filled = weight.i(..2)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(filled.iter().all(|v| v.abs() <= bound));
        assert!(filled.iter().any(|&v| v != 0.0));
        let untouched = weight.i(2)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(untouched, 0.0);
        Ok(())
    }

    #[test]
    fn zeros_clears_in_place() -> Result<()> {
        let bias = Tensor::ones(5, DType::F32, &Device::Cpu)?;
        zeros(&bias)?;
        assert_eq!(bias.to_vec1::<f32>()?, vec![0.0; 5]);
        Ok(())
    }

    #[test]
    fn glorot_rejects_vectors() -> Result<()> {
        let bias = Tensor::ones(5, DType::F32, &Device::Cpu)?;
        assert!(matches!(glorot(&bias), Err(crate::Error::Shape(_))));
        Ok(())
    }
}
