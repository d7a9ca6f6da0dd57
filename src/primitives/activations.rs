//! Activation and regularization helpers
//!
//! Leaky rectification of attention logits is an opt-in extension point of
//! the layer (`GatConfig::negative_slope`). ELU and dropout masks are for
//! callers stacking layers around the core.

use crate::{GatError, Result};
use candle_core::{DType, Device, Shape, Tensor};

/// Leaky ReLU: `max(x, 0) + slope * min(x, 0)`
pub fn leaky_relu(tensor: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let zeros = tensor
        .zeros_like()
        .map_err(|e| GatError::Tensor(format!("leaky relu zeros failed: {}", e)))?;
    let positive = tensor
        .maximum(&zeros)
        .map_err(|e| GatError::Tensor(format!("leaky relu maximum failed: {}", e)))?;
    let negative = tensor
        .minimum(&zeros)
        .and_then(|t| t.affine(negative_slope, 0.0))
        .map_err(|e| GatError::Tensor(format!("leaky relu scale failed: {}", e)))?;
    (&positive + &negative).map_err(|e| GatError::Tensor(format!("leaky relu add failed: {}", e)))
}

/// ELU activation: `x if x > 0 else alpha * (e^x - 1)`
///
/// The usual nonlinearity between stacked attention layers.
pub fn elu(tensor: &Tensor, alpha: f64) -> Result<Tensor> {
    tensor
        .elu(alpha)
        .map_err(|e| GatError::Tensor(format!("ELU failed: {}", e)))
}

/// Inverted-dropout mask for the layer's post-aggregation hook
///
/// Entries are `0` with probability `p` and `1 / (1 - p)` otherwise, so
/// `output = pre_dropout * mask` keeps the expected activation unchanged.
pub fn dropout_mask<S: Into<Shape>>(shape: S, p: f32, device: &Device) -> Result<Tensor> {
    if !(0.0..1.0).contains(&p) {
        return Err(GatError::Config(format!(
            "dropout probability must be in [0, 1), got {}",
            p
        )));
    }
    let ones = Tensor::ones(shape, DType::F32, device)
        .map_err(|e| GatError::Tensor(format!("dropout ones failed: {}", e)))?;
    if p == 0.0 {
        return Ok(ones);
    }
    candle_nn::ops::dropout(&ones, p)
        .map_err(|e| GatError::Tensor(format!("dropout mask failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaky_relu() {
        let t = Tensor::from_vec(vec![-2.0f32, -1.0, 0.0, 1.0, 2.0], 5, &Device::Cpu).unwrap();
        let v = leaky_relu(&t, 0.2).unwrap().to_vec1::<f32>().unwrap();
        assert!((v[0] + 0.4).abs() < 1e-6);
        assert!((v[1] + 0.2).abs() < 1e-6);
        assert_eq!(&v[2..], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_leaky_relu_gradient() {
        let x = candle_core::Var::new(&[-2.0f32, 3.0], &Device::Cpu).unwrap();
        let grads = leaky_relu(x.as_tensor(), 0.2).unwrap().sum_all().unwrap().backward().unwrap();
        let g = grads.get(x.as_tensor()).unwrap().to_vec1::<f32>().unwrap();
        assert!((g[0] - 0.2).abs() < 1e-6);
        assert!((g[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_elu() {
        let t = Tensor::from_vec(vec![-1.0f32, 0.0, 2.0], 3, &Device::Cpu).unwrap();
        let vals = elu(&t, 1.0).unwrap().to_vec1::<f32>().unwrap();
        assert!((vals[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(vals[1], 0.0);
        assert_eq!(vals[2], 2.0);
    }

    #[test]
    fn test_dropout_mask_values() {
        let mask = dropout_mask((8, 16), 0.5, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), &[8, 16]);
        let vals = mask.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for v in vals {
            assert!(v == 0.0 || (v - 2.0).abs() < 1e-6, "unexpected mask value {}", v);
        }
    }

    #[test]
    fn test_dropout_mask_zero_p_is_ones() {
        let mask = dropout_mask(4, 0.0, &Device::Cpu).unwrap();
        assert_eq!(mask.to_vec1::<f32>().unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_dropout_mask_rejects_bad_p() {
        assert!(matches!(
            dropout_mask(4, 1.0, &Device::Cpu).unwrap_err(),
            GatError::Config(_)
        ));
        assert!(dropout_mask(4, -0.1, &Device::Cpu).is_err());
    }
}
