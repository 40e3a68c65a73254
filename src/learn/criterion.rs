use anyhow::Result;
use candle_core::{DType, Tensor, D};

/// Evaluates model output against a target.
pub trait Criterion<X, T> {
    /// The result.
    type Output;
    /// Evaluates `input` against `target`.
    fn eval(&self, input: X, target: T) -> Result<Self::Output>;
}

/// Accuracy.
///
/// Counts the rows of `[n, classes]` logits whose argmax equals the `[n]` class.
#[derive(Default, Debug, Clone, Copy)]
pub struct Accuracy;

impl<'a> Criterion<&'a Tensor, &'a Tensor> for Accuracy {
    type Output = usize;
    fn eval(&self, input: &'a Tensor, target: &'a Tensor) -> Result<usize> {
        let predicted = input.argmax(D::Minus1)?;
        let target = target.to_dtype(DType::U32)?;
        let correct = predicted
            .eq(&target)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        Ok(correct as usize)
    }
}

/// Cross entropy loss.
///
/// Mean over the batch of the softmax cross entropy of `[n, classes]` logits and `[n]` classes.
#[derive(Default, Debug, Clone, Copy)]
pub struct CrossEntropyLoss;

impl<'a> Criterion<&'a Tensor, &'a Tensor> for CrossEntropyLoss {
    type Output = Tensor;
    fn eval(&self, input: &'a Tensor, target: &'a Tensor) -> Result<Tensor> {
        let target = target.to_dtype(DType::U32)?;
        Ok(candle_nn::loss::cross_entropy(input, &target)?)
    }
}
