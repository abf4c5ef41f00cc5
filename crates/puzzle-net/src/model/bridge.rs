//! Tensor bridge: external service output (`Vec<f32>`) to burn tensors and
//! back.
//!
//! The text services run outside burn (candle, HTTP, mocks) and hand back
//! plain vectors. These helpers are the only place that turns them into
//! model input.

use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{ReasonerError, Result};

/// Stack equal-width vectors into a `(batch, dim)` tensor.
pub fn embeddings_to_tensor<B: Backend>(
    embeddings: &[Vec<f32>],
    dim: usize,
    device: &B::Device,
) -> Result<Tensor<B, 2>> {
    for emb in embeddings {
        if emb.len() != dim {
            return Err(ReasonerError::WidthMismatch {
                component: "sentence embedding",
                expected: dim,
                actual: emb.len(),
            });
        }
    }
    let batch = embeddings.len();
    let flat: Vec<f32> = embeddings.iter().flat_map(|v| v.iter().copied()).collect();
    Ok(Tensor::from_data(TensorData::new(flat, [batch, dim]), device))
}

/// Pack per-word vector sequences into a `(batch, max_len, dim)` tensor.
///
/// Sequences longer than `max_len` are truncated; shorter ones are zero
/// padded at the end.
pub fn sequences_to_tensor<B: Backend>(
    sequences: &[Vec<Vec<f32>>],
    max_len: usize,
    dim: usize,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    let batch = sequences.len();
    let mut flat = vec![0.0_f32; batch * max_len * dim];
    for (b, seq) in sequences.iter().enumerate() {
        for (t, word) in seq.iter().take(max_len).enumerate() {
            if word.len() != dim {
                return Err(ReasonerError::WidthMismatch {
                    component: "word embedding",
                    expected: dim,
                    actual: word.len(),
                });
            }
            let offset = (b * max_len + t) * dim;
            flat[offset..offset + dim].copy_from_slice(word);
        }
    }
    Ok(Tensor::from_data(
        TensorData::new(flat, [batch, max_len, dim]),
        device,
    ))
}

/// Token rows as an integer `(batch, seq_len)` tensor.
pub fn tokens_to_tensor<B: Backend>(rows: &[Vec<u32>], device: &B::Device) -> Result<Tensor<B, 2, Int>> {
    let batch = rows.len();
    let seq_len = rows.first().map_or(0, Vec::len);
    let mut flat = Vec::with_capacity(batch * seq_len);
    for row in rows {
        if row.len() != seq_len {
            return Err(ReasonerError::WidthMismatch {
                component: "token row",
                expected: seq_len,
                actual: row.len(),
            });
        }
        flat.extend(row.iter().map(|&t| t as i64));
    }
    Ok(Tensor::from_data(TensorData::new(flat, [batch, seq_len]), device))
}

/// Integer `(batch, seq_len)` tensor back to host rows.
pub fn tensor_to_token_rows<B: Backend>(tokens: Tensor<B, 2, Int>) -> Vec<Vec<i64>> {
    let [_, seq_len] = tokens.dims();
    let flat: Vec<i64> = tokens.into_data().iter::<i64>().collect();
    if seq_len == 0 {
        return Vec::new();
    }
    flat.chunks(seq_len).map(<[i64]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_embeddings_shape_and_values() {
        let device = Default::default();
        let embeddings = vec![vec![1.0_f32, 2.0, 3.0], vec![4.0, 5.0, 6.0]];

        let tensor = embeddings_to_tensor::<TestBackend>(&embeddings, 3, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3]);

        let row1: Vec<f32> = tensor
            .slice([1..2, 0..3])
            .reshape([3])
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(row1, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_embeddings_wrong_width() {
        let device = Default::default();
        let err = embeddings_to_tensor::<TestBackend>(&[vec![1.0, 2.0]], 3, &device).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::WidthMismatch { expected: 3, actual: 2, .. }
        ));
    }

    #[test]
    fn test_sequences_pad_and_truncate() {
        let device = Default::default();
        let short = vec![vec![1.0_f32, 1.0]];
        let long = vec![vec![2.0_f32, 2.0], vec![3.0, 3.0], vec![4.0, 4.0]];

        let tensor =
            sequences_to_tensor::<TestBackend>(&[short, long], 2, 2, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 2, 2]);

        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 0.0, 0.0, 2.0, 2.0, 3.0, 3.0]);
    }

    #[test]
    fn test_token_rows_round_trip() {
        let device = Default::default();
        let rows = vec![vec![1_u32, 4, 2, 0], vec![1, 5, 6, 2]];
        let tensor = tokens_to_tensor::<TestBackend>(&rows, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 4]);
        assert_eq!(
            tensor_to_token_rows(tensor),
            vec![vec![1_i64, 4, 2, 0], vec![1, 5, 6, 2]]
        );
    }

    #[test]
    fn test_token_rows_ragged() {
        let device = Default::default();
        let err = tokens_to_tensor::<TestBackend>(&[vec![1, 2], vec![1]], &device).unwrap_err();
        assert!(matches!(err, ReasonerError::WidthMismatch { .. }));
    }
}
