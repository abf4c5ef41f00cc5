//! Answer decoder bank and per-puzzle predictions.
//!
//! Slot 0 holds a placeholder; slot `i >= 1` holds either a feed-forward
//! decoder (fixed-output puzzles) or a single-layer LSTM run for a fixed
//! number of steps (sequence puzzles).

use std::collections::BTreeMap;

use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::prelude::*;
use burn::tensor::activation::relu;
use tracing::debug;

use crate::error::{ReasonerError, Result};
use crate::routing::{DecoderKind, Partition, RoutingTable};

/// Feed-forward answer head.
///
/// ```text
/// (n, w) -> Linear -> ReLU -> Linear -> ReLU -> Linear -> (n, num_classes)
/// ```
#[derive(Module, Debug)]
pub struct AnswerMlp<B: Backend> {
    linear1: Linear<B>,
    linear2: Linear<B>,
    linear3: Linear<B>,
}

impl<B: Backend> AnswerMlp<B> {
    pub fn new(width: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            linear1: LinearConfig::new(width, width).init(device),
            linear2: LinearConfig::new(width, width).init(device),
            linear3: LinearConfig::new(width, num_classes).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.linear1.forward(x));
        let x = relu(self.linear2.forward(x));
        self.linear3.forward(x)
    }
}

/// Single-layer LSTM whose hidden width is the class count.
#[derive(Module, Debug)]
pub struct SequenceDecoder<B: Backend> {
    lstm: Lstm<B>,
    d_input: usize,
    num_classes: usize,
}

impl<B: Backend> SequenceDecoder<B> {
    pub fn new(width: usize, num_classes: usize, device: &B::Device) -> Self {
        Self {
            lstm: LstmConfig::new(width, num_classes, true).init(device),
            d_input: width,
            num_classes,
        }
    }

    /// Run exactly `steps` steps, feeding `input` at every step and threading
    /// the recurrent state forward. Returns one `(n, num_classes)` tensor per
    /// step.
    ///
    /// A shape disagreement at any step aborts the whole decode.
    pub fn decode(
        &self,
        input: Tensor<B, 2>,
        steps: usize,
        puzzle: u32,
    ) -> Result<Vec<Tensor<B, 2>>> {
        let [n, width] = input.dims();
        if width != self.d_input {
            return Err(ReasonerError::DecodeStep {
                puzzle,
                step: 0,
                expected: vec![n, self.d_input],
                actual: vec![n, width],
            });
        }

        let x = input.reshape([n, 1, width]);
        let expected = [n, 1, self.num_classes];
        let mut state = None;
        let mut outputs = Vec::with_capacity(steps);
        for step in 0..steps {
            let (out, next) = self.lstm.forward(x.clone(), state);
            let actual = out.dims();
            if actual != expected {
                return Err(ReasonerError::DecodeStep {
                    puzzle,
                    step,
                    expected: expected.to_vec(),
                    actual: actual.to_vec(),
                });
            }
            outputs.push(out.reshape([n, self.num_classes]));
            state = Some(next);
        }
        Ok(outputs)
    }
}

/// One slot of the answer bank.
#[derive(Module, Debug)]
pub enum AnswerDecoder<B: Backend> {
    /// Slot 0. Never routed to.
    Placeholder(Linear<B>),
    Fixed(AnswerMlp<B>),
    Sequence(SequenceDecoder<B>),
}

/// Dense bank of answer decoders addressed by routing slot.
#[derive(Module, Debug)]
pub struct AnswerBank<B: Backend> {
    decoders: Vec<AnswerDecoder<B>>,
    max_decode_steps: usize,
}

impl<B: Backend> AnswerBank<B> {
    pub fn new(routing: &RoutingTable, width: usize, device: &B::Device) -> Self {
        let mut decoders = Vec::with_capacity(routing.bank_len());
        decoders.push(AnswerDecoder::Placeholder(
            LinearConfig::new(width, 1).init(device),
        ));
        for &kind in routing.kinds() {
            decoders.push(match kind {
                DecoderKind::Fixed { num_classes } => {
                    AnswerDecoder::Fixed(AnswerMlp::new(width, num_classes, device))
                }
                DecoderKind::Sequence { num_classes } => {
                    AnswerDecoder::Sequence(SequenceDecoder::new(width, num_classes, device))
                }
            });
        }
        Self {
            decoders,
            max_decode_steps: routing.max_decode_steps(),
        }
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn max_decode_steps(&self) -> usize {
        self.max_decode_steps
    }

    pub fn decoder(&self, slot: usize) -> Option<&AnswerDecoder<B>> {
        self.decoders.get(slot)
    }

    /// Route each group of `joint` rows through its puzzle's decoder.
    pub fn decode(&self, joint: Tensor<B, 2>, partition: &Partition) -> Result<PuzzleOutputs<B>> {
        let device = joint.device();
        let mut predictions = BTreeMap::new();
        for group in partition.groups() {
            let rows = group.row_tensor::<B>(&device);
            let sub_batch = joint.clone().select(0, rows);
            let prediction = match self.decoders.get(group.slot) {
                Some(AnswerDecoder::Fixed(mlp)) => PuzzlePrediction::Fixed(mlp.forward(sub_batch)),
                Some(AnswerDecoder::Sequence(decoder)) => PuzzlePrediction::Sequence {
                    rows: group.rows.len(),
                    steps: decoder.decode(sub_batch, self.max_decode_steps, group.id)?,
                },
                Some(AnswerDecoder::Placeholder(_)) | None => {
                    return Err(ReasonerError::UnroutedPuzzle(group.id))
                }
            };
            debug!(
                puzzle = group.id,
                slot = group.slot,
                rows = group.rows.len(),
                sequence = prediction.is_sequence(),
                "Decoded puzzle group"
            );
            predictions.insert(group.id, prediction);
        }
        Ok(PuzzleOutputs { predictions })
    }
}

/// Decoder output for one puzzle's sub-batch.
#[derive(Debug, Clone)]
pub enum PuzzlePrediction<B: Backend> {
    /// `(rows, num_classes)`.
    Fixed(Tensor<B, 2>),
    /// One `(rows, num_classes)` tensor per decode step. `rows` is the
    /// sub-batch size, also when no steps were decoded.
    Sequence {
        rows: usize,
        steps: Vec<Tensor<B, 2>>,
    },
}

impl<B: Backend> PuzzlePrediction<B> {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence { .. })
    }

    /// Rows in the sub-batch.
    pub fn rows(&self) -> usize {
        match self {
            Self::Fixed(t) => t.dims()[0],
            Self::Sequence { rows, .. } => *rows,
        }
    }

    /// Number of decode steps; 1 for fixed predictions.
    pub fn steps(&self) -> usize {
        match self {
            Self::Fixed(_) => 1,
            Self::Sequence { steps, .. } => steps.len(),
        }
    }

    pub fn as_fixed(&self) -> Option<&Tensor<B, 2>> {
        match self {
            Self::Fixed(t) => Some(t),
            Self::Sequence { .. } => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Tensor<B, 2>]> {
        match self {
            Self::Fixed(_) => None,
            Self::Sequence { steps, .. } => Some(steps),
        }
    }

    /// Argmax class per row; sequence predictions give one class per step,
    /// so a zero-step decode yields one empty list per row.
    pub fn answers(&self) -> Vec<Vec<usize>> {
        match self {
            Self::Fixed(t) => argmax_rows(t.clone()).into_iter().map(|c| vec![c]).collect(),
            Self::Sequence { rows, steps } => {
                let mut answers = vec![Vec::with_capacity(steps.len()); *rows];
                for step in steps {
                    for (row, class) in argmax_rows(step.clone()).into_iter().enumerate() {
                        answers[row].push(class);
                    }
                }
                answers
            }
        }
    }
}

fn argmax_rows<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|c| c as usize)
        .collect()
}

/// Predictions keyed by the puzzle ids present in a batch, ascending.
#[derive(Debug, Clone)]
pub struct PuzzleOutputs<B: Backend> {
    predictions: BTreeMap<u32, PuzzlePrediction<B>>,
}

impl<B: Backend> Default for PuzzleOutputs<B> {
    fn default() -> Self {
        Self {
            predictions: BTreeMap::new(),
        }
    }
}

impl<B: Backend> PuzzleOutputs<B> {
    pub fn ids(&self) -> Vec<u32> {
        self.predictions.keys().copied().collect()
    }

    pub fn get(&self, id: u32) -> Option<&PuzzlePrediction<B>> {
        self.predictions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }

    pub fn rows(&self, id: u32) -> Option<usize> {
        self.get(id).map(PuzzlePrediction::rows)
    }

    pub fn answers(&self, id: u32) -> Option<Vec<Vec<usize>>> {
        self.get(id).map(PuzzlePrediction::answers)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &PuzzlePrediction<B>)> {
        self.predictions.iter().map(|(id, p)| (*id, p))
    }

    pub fn into_inner(self) -> BTreeMap<u32, PuzzlePrediction<B>> {
        self.predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PuzzleNetConfig, PuzzleSelection, TextEmbedding};
    use crate::registry::{PuzzleEntry, PuzzleRegistry};
    use burn::backend::ndarray::NdArray;
    use burn::tensor::{Distribution, TensorData};

    type TestBackend = NdArray<f32>;

    fn routing(steps: usize) -> RoutingTable {
        let registry = PuzzleRegistry::with_limits(
            [
                PuzzleEntry { id: 2, num_classes: 5, sequential: false },
                PuzzleEntry { id: 4, num_classes: 3, sequential: true },
                PuzzleEntry { id: 8, num_classes: 7, sequential: false },
            ],
            steps,
            16,
            256,
        )
        .unwrap();
        let config = PuzzleNetConfig::new("resnet18".to_string(), TextEmbedding::Clip)
            .with_puzzles(PuzzleSelection::Only { ids: vec![8, 4, 2] });
        RoutingTable::build(&config, &registry).unwrap()
    }

    fn joint(batch: usize) -> Tensor<TestBackend, 2> {
        Tensor::random([batch, 12], Distribution::Normal(0.0, 1.0), &Default::default())
    }

    #[test]
    fn test_bank_layout() {
        let bank = AnswerBank::<TestBackend>::new(&routing(5), 12, &Default::default());
        assert_eq!(bank.len(), 4);
        assert!(matches!(bank.decoder(0), Some(AnswerDecoder::Placeholder(_))));
        assert!(matches!(bank.decoder(1), Some(AnswerDecoder::Fixed(_))));
        assert!(matches!(bank.decoder(2), Some(AnswerDecoder::Sequence(_))));
        assert!(matches!(bank.decoder(3), Some(AnswerDecoder::Fixed(_))));
    }

    #[test]
    fn test_fixed_widths_follow_registry() {
        let table = routing(5);
        let bank = AnswerBank::<TestBackend>::new(&table, 12, &Default::default());
        let partition = table.partition(&[8, 2, 8]).unwrap();
        let outputs = bank.decode(joint(3), &partition).unwrap();

        assert_eq!(outputs.ids(), vec![2, 8]);
        assert_eq!(outputs.get(2).unwrap().as_fixed().unwrap().dims(), [1, 5]);
        assert_eq!(outputs.get(8).unwrap().as_fixed().unwrap().dims(), [2, 7]);
    }

    #[test]
    fn test_sequence_runs_exactly_max_steps() {
        let table = routing(5);
        let bank = AnswerBank::<TestBackend>::new(&table, 12, &Default::default());
        let partition = table.partition(&[4, 4]).unwrap();
        let outputs = bank.decode(joint(2), &partition).unwrap();

        let steps = outputs.get(4).unwrap().as_sequence().unwrap();
        assert_eq!(steps.len(), 5);
        for step in steps {
            assert_eq!(step.dims(), [2, 3]);
        }
        let answers = outputs.answers(4).unwrap();
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().all(|row| row.len() == 5 && row.iter().all(|&c| c < 3)));
    }

    #[test]
    fn test_zero_steps_gives_empty_sequence() {
        let table = routing(0);
        let bank = AnswerBank::<TestBackend>::new(&table, 12, &Default::default());
        let partition = table.partition(&[4, 2, 4]).unwrap();
        let outputs = bank.decode(joint(3), &partition).unwrap();
        let prediction = outputs.get(4).unwrap();
        assert_eq!(prediction.steps(), 0);
        assert_eq!(prediction.rows(), 2);
        assert_eq!(outputs.answers(4).unwrap(), vec![Vec::<usize>::new(), Vec::new()]);
    }

    #[test]
    fn test_sequence_decoder_rejects_width() {
        let decoder = SequenceDecoder::<TestBackend>::new(12, 3, &Default::default());
        let input = Tensor::<TestBackend, 2>::zeros([2, 10], &Default::default());
        let err = decoder.decode(input, 5, 4).unwrap_err();
        assert!(matches!(
            err,
            ReasonerError::DecodeStep { puzzle: 4, step: 0, .. }
        ));
    }

    #[test]
    fn test_fixed_answers_are_argmax() {
        let logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(vec![0.1_f32, 0.9, 0.0, 2.0, -1.0, 0.5], [2, 3]),
            &Default::default(),
        );
        let prediction = PuzzlePrediction::Fixed(logits);
        assert_eq!(prediction.rows(), 2);
        assert_eq!(prediction.answers(), vec![vec![1], vec![0]]);
    }
}
