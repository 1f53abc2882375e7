//! Global gradient-norm clipping
//!
//! Gradients are scaled by their largest absolute entry before squaring so
//! the norm stays finite for entries far beyond `sqrt(f32::MAX)`.

use std::marker::PhantomData;

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::GradientsParams,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use tracing::warn;

/// Ceiling on the L2 norm of every model's gradient
pub const MAX_GRAD_NORM: f64 = 5.0;

struct MaxAbs<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    max: f64,
    finite: bool,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for MaxAbs<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            let m: f64 = grad.abs().max().into_scalar().elem();
            if !m.is_finite() {
                self.finite = false;
            } else if m > self.max {
                self.max = m;
            }
        }
    }
}

struct ScaledSquares<'a, B: AutodiffBackend> {
    grads: &'a GradientsParams,
    scale: f64,
    total: f64,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaledSquares<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            // every scaled entry lies in [-1, 1]; NaN entries propagate
            let sq: f64 = grad
                .div_scalar(self.scale)
                .powf_scalar(2.0)
                .sum()
                .into_scalar()
                .elem();
            self.total += sq;
        }
    }
}

enum Adjust {
    Scale(f64),
    Zero,
}

struct Rescale<'a, B: AutodiffBackend> {
    grads: &'a mut GradientsParams,
    adjust: Adjust,
    _backend: PhantomData<B>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Rescale<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            let grad = match self.adjust {
                Adjust::Scale(factor) => grad.mul_scalar(factor),
                Adjust::Zero => grad.zeros_like(),
            };
            self.grads.register(id, grad);
        }
    }
}

/// L2 norm over every parameter gradient of `module`.
///
/// Infinite or NaN when some gradient entry is.
pub fn grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(module: &M, grads: &GradientsParams) -> f64 {
    let mut max_abs = MaxAbs::<B> {
        grads,
        max: 0.0,
        finite: true,
        _backend: PhantomData,
    };
    module.visit(&mut max_abs);
    if !max_abs.finite {
        return f64::INFINITY;
    }
    if max_abs.max == 0.0 {
        return 0.0;
    }

    let mut squares = ScaledSquares::<B> {
        grads,
        scale: max_abs.max,
        total: 0.0,
        _backend: PhantomData,
    };
    module.visit(&mut squares);
    max_abs.max * squares.total.sqrt()
}

/// Rescale `grads` so their global L2 norm is at most `max_norm`.
///
/// Non-finite gradients are zeroed so the following optimizer step leaves
/// the weights untouched. Returns the clipped gradients and the norm before
/// clipping.
pub fn clip_grad_norm<B: AutodiffBackend, M: AutodiffModule<B>>(
    module: &M,
    mut grads: GradientsParams,
    max_norm: f64,
) -> (GradientsParams, f64) {
    let norm = grad_norm::<B, M>(module, &grads);
    let adjust = if !norm.is_finite() {
        warn!("Non-finite gradient norm, dropping the update");
        Adjust::Zero
    } else if norm > max_norm {
        Adjust::Scale(max_norm / (norm + 1e-6))
    } else {
        return (grads, norm);
    };

    let mut visitor = Rescale::<B> {
        grads: &mut grads,
        adjust,
        _backend: PhantomData,
    };
    module.visit(&mut visitor);
    (grads, norm)
}
