//! End-to-end tests of the routed reasoner with mock backbone and text
//! services. No pretrained weights are needed.

use std::sync::Arc;

use burn::backend::ndarray::NdArray;
use burn::prelude::*;
use burn::tensor::{Distribution, TensorData};

use puzzle_net::mocks::{MockBackbone, MockSentenceEmbedder, MockWordEmbedder};
use puzzle_net::model::bridge::tokens_to_tensor;
use puzzle_net::{
    AnswerMode, PuzzleNetConfig, PuzzleReasoner, PuzzleRegistry, PuzzleSelection, QuestionBatch,
    ReasonerError, TextEmbedding, TextServices, Vocabulary,
};

type TestBackend = NdArray<f32>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const REGISTRY_TOML: &str = r#"
max_decode_steps = 5
max_question_len = 12
placeholder_value = 256

[[puzzles]]
id = 1
num_classes = 4

[[puzzles]]
id = 3
num_classes = 6

[[puzzles]]
id = 7
num_classes = 5
sequential = true

[[puzzles]]
id = 9
num_classes = 2
"#;

fn registry() -> PuzzleRegistry {
    PuzzleRegistry::from_toml_str(REGISTRY_TOML).unwrap()
}

fn config(strategy: TextEmbedding, ids: Vec<u32>) -> PuzzleNetConfig {
    PuzzleNetConfig::new("resnet18".to_string(), strategy)
        .with_feat_size(16)
        .with_hidden_size(8)
        .with_word_dim(6)
        .with_sentence_dim(10)
        .with_puzzles(PuzzleSelection::Only { ids })
}

fn vocabulary() -> Vocabulary {
    let words = [
        "<pad>", "<start>", "<end>", "<unk>", "how", "many", "circles", "are", "there", "which",
        "shape", "comes", "next",
    ];
    Vocabulary::new(words.iter().map(|w| w.to_string()).collect()).unwrap()
}

fn clip_services() -> TextServices {
    TextServices::default().with_sentence_embedder(Arc::new(MockSentenceEmbedder::new(10)))
}

fn clip_reasoner(ids: Vec<u32>) -> PuzzleReasoner<TestBackend> {
    PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Clip, ids),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        clip_services(),
        &Default::default(),
    )
    .unwrap()
}

fn images(batch: usize) -> Tensor<TestBackend, 4> {
    Tensor::random([batch, 3, 8, 8], Distribution::Uniform(0.0, 1.0), &Default::default())
}

fn questions(batch: usize) -> Vec<String> {
    let pool = ["how many circles are there", "which shape comes next", "how many are there", "next"];
    (0..batch).map(|i| pool[i % pool.len()].to_string()).collect()
}

fn rows(t: &Tensor<TestBackend, 2>) -> Vec<Vec<f32>> {
    let [n, d] = t.dims();
    let flat: Vec<f32> = t.clone().into_data().to_vec().unwrap();
    (0..n).map(|r| flat[r * d..(r + 1) * d].to_vec()).collect()
}

fn assert_rows_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        assert!((x - y).abs() < 1e-5, "{x} vs {y}");
    }
}

fn select_rows(t: Tensor<TestBackend, 4>, idx: &[i64]) -> Tensor<TestBackend, 4> {
    let index = Tensor::from_data(TensorData::new(idx.to_vec(), [idx.len()]), &Default::default());
    t.select(0, index)
}

// ---------------------------------------------------------------------------
// Bank construction
// ---------------------------------------------------------------------------

#[test]
fn test_bank_length_and_slot_mapping() {
    let reasoner = clip_reasoner(vec![7, 1, 3]);
    let routing = reasoner.routing();

    assert_eq!(reasoner.net().answer_bank().len(), 4);
    assert_eq!(reasoner.net().image_heads().len(), 4);
    assert_eq!(routing.bank_len(), 4);
    for (slot, id) in [(1, 1), (2, 3), (3, 7)] {
        assert_eq!(routing.id_at(slot), Some(id));
        assert_eq!(routing.slot_of(id), Some(slot));
    }
}

#[test]
fn test_configured_order_does_not_change_routing() {
    let a = clip_reasoner(vec![7, 1, 3]);
    let b = clip_reasoner(vec![3, 1, 7]);
    assert_eq!(a.routing(), b.routing());
}

#[test]
fn test_all_puzzles_selection() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Clip, vec![]).with_puzzles(PuzzleSelection::All),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        clip_services(),
        &Default::default(),
    )
    .unwrap();
    assert_eq!(reasoner.routing().ids(), &[1, 3, 7, 9]);
    assert_eq!(reasoner.net().answer_bank().len(), 5);
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[test]
fn test_mixed_batch_scenario() {
    let reasoner = clip_reasoner(vec![1, 3, 7]);
    let outputs = reasoner
        .forward(images(4), QuestionBatch::Text(questions(4)), &[7, 1, 1, 3])
        .unwrap();

    assert_eq!(outputs.ids(), vec![1, 3, 7]);
    assert_eq!(outputs.rows(1), Some(2));
    assert_eq!(outputs.rows(3), Some(1));
    assert_eq!(outputs.rows(7), Some(1));

    assert_eq!(outputs.get(1).unwrap().as_fixed().unwrap().dims(), [2, 4]);
    assert_eq!(outputs.get(3).unwrap().as_fixed().unwrap().dims(), [1, 6]);

    let steps = outputs.get(7).unwrap().as_sequence().unwrap();
    assert_eq!(steps.len(), 5, "sequence puzzles always decode max_decode_steps");
    for step in steps {
        assert_eq!(step.dims(), [1, 5]);
    }
}

#[test]
fn test_absent_ids_have_no_entry() {
    let reasoner = clip_reasoner(vec![1, 3, 7, 9]);
    let outputs = reasoner
        .forward(images(3), QuestionBatch::Text(questions(3)), &[9, 9, 3])
        .unwrap();
    assert_eq!(outputs.ids(), vec![3, 9]);
    assert!(outputs.get(1).is_none());
    assert!(outputs.get(7).is_none());
}

#[test]
fn test_sub_batch_preserves_input_order() {
    let reasoner = clip_reasoner(vec![1, 3, 7]);
    let imgs = images(4);
    let qs = questions(4);
    let mixed = reasoner
        .forward(imgs.clone(), QuestionBatch::Text(qs.clone()), &[7, 1, 1, 3])
        .unwrap();
    let mixed = rows(mixed.get(1).unwrap().as_fixed().unwrap());

    // Rows 1 and 2 alone, in input order and reversed.
    let alone = reasoner
        .forward(
            select_rows(imgs.clone(), &[1, 2]),
            QuestionBatch::Text(vec![qs[1].clone(), qs[2].clone()]),
            &[1, 1],
        )
        .unwrap();
    let alone = rows(alone.get(1).unwrap().as_fixed().unwrap());
    assert_rows_close(&mixed[0], &alone[0]);
    assert_rows_close(&mixed[1], &alone[1]);

    let reversed = reasoner
        .forward(
            select_rows(imgs, &[2, 1]),
            QuestionBatch::Text(vec![qs[2].clone(), qs[1].clone()]),
            &[1, 1],
        )
        .unwrap();
    let reversed = rows(reversed.get(1).unwrap().as_fixed().unwrap());
    assert_rows_close(&mixed[0], &reversed[1]);
    assert_rows_close(&mixed[1], &reversed[0]);
}

#[test]
fn test_forward_is_idempotent() {
    let reasoner = clip_reasoner(vec![1, 3, 7]);
    let imgs = images(3);
    let first = reasoner
        .forward(imgs.clone(), QuestionBatch::Text(questions(3)), &[3, 7, 1])
        .unwrap();
    let second = reasoner
        .forward(imgs, QuestionBatch::Text(questions(3)), &[3, 7, 1])
        .unwrap();

    assert_eq!(first.ids(), second.ids());
    for id in [1, 3] {
        let a = rows(first.get(id).unwrap().as_fixed().unwrap());
        let b = rows(second.get(id).unwrap().as_fixed().unwrap());
        for (ra, rb) in a.iter().zip(&b) {
            assert_rows_close(ra, rb);
        }
    }
    let a = first.get(7).unwrap().as_sequence().unwrap();
    let b = second.get(7).unwrap().as_sequence().unwrap();
    for (sa, sb) in a.iter().zip(b) {
        assert_rows_close(&rows(sa)[0], &rows(sb)[0]);
    }
}

#[test]
fn test_shared_image_head() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Clip, vec![1, 3]).with_single_image_head(true),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        clip_services(),
        &Default::default(),
    )
    .unwrap();
    assert_eq!(reasoner.net().image_heads().len(), 1);
    assert_eq!(reasoner.net().answer_bank().len(), 3);

    let outputs = reasoner
        .forward(images(3), QuestionBatch::Text(questions(3)), &[3, 1, 3])
        .unwrap();
    assert_eq!(outputs.ids(), vec![1, 3]);
    assert_eq!(outputs.rows(3), Some(2));
}

#[test]
fn test_unrouted_id_fails_whole_batch() {
    let reasoner = clip_reasoner(vec![1, 3]);
    let err = reasoner
        .forward(images(3), QuestionBatch::Text(questions(3)), &[1, 9, 3])
        .unwrap_err();
    assert!(matches!(err, ReasonerError::UnroutedPuzzle(9)));
}

#[test]
fn test_regression_mode_widths() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Clip, vec![1, 3]).with_answer_mode(AnswerMode::Regression),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        clip_services(),
        &Default::default(),
    )
    .unwrap();
    let outputs = reasoner
        .forward(images(2), QuestionBatch::Text(questions(2)), &[1, 3])
        .unwrap();
    assert_eq!(outputs.get(1).unwrap().as_fixed().unwrap().dims(), [1, 1]);
    assert_eq!(outputs.get(3).unwrap().as_fixed().unwrap().dims(), [1, 1]);
}

// ---------------------------------------------------------------------------
// Question strategies
// ---------------------------------------------------------------------------

#[test]
fn test_standard_strategy_text_and_tokens() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Standard, vec![1, 7]),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        TextServices::default().with_vocabulary(vocabulary()),
        &Default::default(),
    )
    .unwrap();

    let outputs = reasoner
        .forward(images(2), QuestionBatch::Text(questions(2)), &[1, 7])
        .unwrap();
    assert_eq!(outputs.ids(), vec![1, 7]);

    let vocab = vocabulary();
    let token_rows: Vec<Vec<u32>> = questions(2).iter().map(|q| vocab.encode(q, 12)).collect();
    let tokens = tokens_to_tensor::<TestBackend>(&token_rows, &Default::default()).unwrap();
    let outputs = reasoner
        .forward(images(2), QuestionBatch::Tokens(tokens), &[7, 7])
        .unwrap();
    assert_eq!(outputs.get(7).unwrap().steps(), 5);
}

#[test]
fn test_empty_batch_returns_no_predictions() {
    let device = Default::default();
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Standard, vec![1, 7]),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        TextServices::default().with_vocabulary(vocabulary()),
        &device,
    )
    .unwrap();

    let tokens = Tensor::<TestBackend, 2, Int>::zeros([0, 12], &device);
    let outputs = reasoner
        .forward(
            Tensor::zeros([0, 3, 8, 8], &device),
            QuestionBatch::Tokens(tokens),
            &[],
        )
        .unwrap();
    assert!(outputs.is_empty());
}

#[test]
fn test_bert_strategy_decodes_tokens() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Bert, vec![3, 9]),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        TextServices::default()
            .with_vocabulary(vocabulary())
            .with_word_embedder(Arc::new(MockWordEmbedder::new(6))),
        &Default::default(),
    )
    .unwrap();

    let vocab = vocabulary();
    let token_rows = vec![
        vocab.encode("how many circles are there", 12),
        vocab.encode("which shape comes next", 12),
    ];
    let tokens = tokens_to_tensor::<TestBackend>(&token_rows, &Default::default()).unwrap();
    assert_eq!(
        reasoner.decode_tokens(tokens.clone()).unwrap(),
        vec!["how many circles are there", "which shape comes next"]
    );

    let outputs = reasoner
        .forward(images(2), QuestionBatch::Tokens(tokens), &[9, 3])
        .unwrap();
    assert_eq!(outputs.get(9).unwrap().as_fixed().unwrap().dims(), [1, 2]);
    assert_eq!(outputs.get(3).unwrap().as_fixed().unwrap().dims(), [1, 6]);
}

#[test]
fn test_bert_strategy_rejects_empty_question() {
    let reasoner = PuzzleReasoner::<TestBackend>::new(
        config(TextEmbedding::Bert, vec![3]),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        TextServices::default()
            .with_vocabulary(vocabulary())
            .with_word_embedder(Arc::new(MockWordEmbedder::new(6))),
        &Default::default(),
    )
    .unwrap();
    let tokens = tokens_to_tensor::<TestBackend>(
        &[vec![1, 4, 5, 2, 0], vec![0, 0, 0, 0, 0]],
        &Default::default(),
    )
    .unwrap();
    let err = reasoner
        .forward(images(2), QuestionBatch::Tokens(tokens), &[3, 3])
        .unwrap_err();
    assert!(matches!(err, ReasonerError::EmptyQuestion { row: 1 }));
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[test]
fn test_checkpoint_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let source = clip_reasoner(vec![1, 7]);
    let weights = source.save(tmp.path(), 42).unwrap();
    assert!(weights.ends_with("ckpt_resnet18_clip_42.mpk"));
    assert!(tmp.path().join("ckpt_resnet18_clip_42.json").is_file());

    let mut restored = clip_reasoner(vec![1, 7]);
    restored.restore(tmp.path(), 42).unwrap();

    let imgs = images(2);
    let a = source
        .forward(imgs.clone(), QuestionBatch::Text(questions(2)), &[1, 7])
        .unwrap();
    let b = restored
        .forward(imgs, QuestionBatch::Text(questions(2)), &[1, 7])
        .unwrap();
    assert_rows_close(
        &rows(a.get(1).unwrap().as_fixed().unwrap())[0],
        &rows(b.get(1).unwrap().as_fixed().unwrap())[0],
    );
    let sa = a.get(7).unwrap().as_sequence().unwrap();
    let sb = b.get(7).unwrap().as_sequence().unwrap();
    assert_rows_close(&rows(&sa[4])[0], &rows(&sb[4])[0]);
}

#[test]
fn test_checkpoint_is_strict() {
    let tmp = tempfile::tempdir().unwrap();
    clip_reasoner(vec![1, 7]).save(tmp.path(), 1).unwrap();

    let mut other = clip_reasoner(vec![1, 3]);
    let err = other.restore(tmp.path(), 1).unwrap_err();
    assert!(matches!(err, ReasonerError::Checkpoint { .. }));

    let mut missing = clip_reasoner(vec![1, 7]);
    let err = missing.restore(tmp.path(), 2).unwrap_err();
    assert!(matches!(err, ReasonerError::Checkpoint { .. }));
}

#[test]
fn test_checkpoint_rejects_swapped_class_counts() {
    // Same puzzles and parameter total, different decoder shapes.
    let saved = PuzzleRegistry::from_toml_str(
        "[[puzzles]]\nid = 1\nnum_classes = 4\n\n[[puzzles]]\nid = 2\nnum_classes = 6\n",
    )
    .unwrap();
    let swapped = PuzzleRegistry::from_toml_str(
        "[[puzzles]]\nid = 1\nnum_classes = 6\n\n[[puzzles]]\nid = 2\nnum_classes = 4\n",
    )
    .unwrap();
    let build = |registry: &PuzzleRegistry| {
        PuzzleReasoner::<TestBackend>::new(
            config(TextEmbedding::Clip, vec![1, 2]),
            registry,
            Arc::new(MockBackbone::resnet18()),
            clip_services(),
            &Default::default(),
        )
        .unwrap()
    };

    let tmp = tempfile::tempdir().unwrap();
    let source = build(&saved);
    source.save(tmp.path(), 3).unwrap();

    let mut target = build(&swapped);
    assert_eq!(source.net().num_params(), target.net().num_params());
    let err = target.restore(tmp.path(), 3).unwrap_err();
    assert!(matches!(err, ReasonerError::Checkpoint { .. }), "{err}");

    let mut same = build(&saved);
    same.restore(tmp.path(), 3).unwrap();
}

#[test]
fn test_reasoner_from_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let source = clip_reasoner(vec![3, 7]);
    source.save(tmp.path(), 5).unwrap();

    let restored = PuzzleReasoner::<TestBackend>::from_checkpoint(
        &tmp.path().join("ckpt_resnet18_clip_5"),
        &registry(),
        Arc::new(MockBackbone::resnet18()),
        clip_services(),
        &Default::default(),
    )
    .unwrap();
    assert_eq!(restored.config().feat_size, 16);
    assert_eq!(restored.routing().ids(), &[3, 7]);

    let imgs = images(1);
    let a = source
        .forward(imgs.clone(), QuestionBatch::Text(questions(1)), &[3])
        .unwrap();
    let b = restored
        .forward(imgs, QuestionBatch::Text(questions(1)), &[3])
        .unwrap();
    assert_rows_close(
        &rows(a.get(3).unwrap().as_fixed().unwrap())[0],
        &rows(b.get(3).unwrap().as_fixed().unwrap())[0],
    );
}
