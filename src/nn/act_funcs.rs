use std::{fmt::Debug, sync::Arc};

use crate::error::{BackpropError, Result};

/// An elementwise activation function together with its derivative.
///
/// Implementations are stateless: both methods are pure functions of their
/// argument, so one instance can be shared by any number of layers and
/// threads.
pub trait ActivationFunction: Debug + Send + Sync {
    /// The lowercase name accepted by [`from_name`].
    fn name(&self) -> &'static str;

    fn calc(&self, x: f32) -> f32;

    /// The derivative of [`calc`](Self::calc) at the layer input `x`.
    fn calc_derivative(&self, x: f32) -> f32;
}

/// Identity activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

/// Hyperbolic tangent activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

/// LeCun's scaled tanh, `1.7159 * tanh(0.66667 * x)`.
///
/// See [Efficient BackProp](http://yann.lecun.com/exdb/publis/pdf/lecun-98b.pdf).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledTanh;

/// Logistic sigmoid activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

/// ReLU activation function.
///
/// See [Rectified Linear Units Improve Restricted Boltzmann Machines](https://www.cs.toronto.edu/~fritz/absps/reluICML.pdf).
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

/// ELU activation function with `alpha = 1`.
///
/// See [Fast and Accurate Deep Network Learning by Exponential Linear Units](https://arxiv.org/abs/1511.07289).
#[derive(Debug, Clone, Copy, Default)]
pub struct ELU;

const SCALED_TANH_OUTER: f32 = 1.7159;
const SCALED_TANH_INNER: f32 = 0.66667;

impl ActivationFunction for Linear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn calc(&self, x: f32) -> f32 {
        x
    }

    fn calc_derivative(&self, _x: f32) -> f32 {
        1.0
    }
}

impl ActivationFunction for Tanh {
    fn name(&self) -> &'static str {
        "tanh"
    }

    fn calc(&self, x: f32) -> f32 {
        x.tanh()
    }

    fn calc_derivative(&self, x: f32) -> f32 {
        let y = x.tanh();
        1.0 - y * y
    }
}

impl ActivationFunction for ScaledTanh {
    fn name(&self) -> &'static str {
        "scaledtanh"
    }

    fn calc(&self, x: f32) -> f32 {
        SCALED_TANH_OUTER * (SCALED_TANH_INNER * x).tanh()
    }

    fn calc_derivative(&self, x: f32) -> f32 {
        let y = (SCALED_TANH_INNER * x).tanh();
        SCALED_TANH_OUTER * SCALED_TANH_INNER * (1.0 - y * y)
    }
}

impl ActivationFunction for Sigmoid {
    fn name(&self) -> &'static str {
        "sigmoid"
    }

    fn calc(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    fn calc_derivative(&self, x: f32) -> f32 {
        let y = self.calc(x);
        y * (1.0 - y)
    }
}

impl ActivationFunction for ReLU {
    fn name(&self) -> &'static str {
        "relu"
    }

    fn calc(&self, x: f32) -> f32 {
        x.max(0.0)
    }

    fn calc_derivative(&self, x: f32) -> f32 {
        if x > 0.0 {
            1.0
        } else {
            0.0
        }
    }
}

impl ActivationFunction for ELU {
    fn name(&self) -> &'static str {
        "elu"
    }

    fn calc(&self, x: f32) -> f32 {
        if x > 0.0 {
            x
        } else {
            x.exp_m1()
        }
    }

    fn calc_derivative(&self, x: f32) -> f32 {
        if x > 0.0 {
            1.0
        } else {
            x.exp()
        }
    }
}

/// Look up an activation function by its lowercase name.
pub fn from_name(name: &str) -> Result<Arc<dyn ActivationFunction>> {
    let function: Arc<dyn ActivationFunction> = match name {
        "linear" => Arc::new(Linear),
        "tanh" => Arc::new(Tanh),
        "scaledtanh" => Arc::new(ScaledTanh),
        "sigmoid" => Arc::new(Sigmoid),
        "relu" => Arc::new(ReLU),
        "elu" => Arc::new(ELU),
        _ => return Err(BackpropError::UnknownActivation(name.to_owned())),
    };
    Ok(function)
}
