//! Property tests for vector index search ordering and persistence.

use gridiron_rag::{IndexEntry, Segment, VectorIndex};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

fn entries_from(embeddings: Vec<Vec<f32>>) -> Vec<IndexEntry> {
    embeddings
        .into_iter()
        .enumerate()
        .map(|(sequence, embedding)| IndexEntry {
            embedding,
            segment: Segment {
                id: format!("https://example.com/news#{sequence}"),
                text: format!("segment {sequence}"),
                source_id: "https://example.com/news".to_string(),
                start_offset: sequence * 400,
                sequence,
            },
        })
        .collect()
}

mod prop_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_k(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            k in 1usize..25,
        ) {
            let count = embeddings.len();
            let index = VectorIndex::new();
            index.add(entries_from(embeddings)).unwrap();
            let results = index.search(&query, k).unwrap();

            prop_assert_eq!(results.len(), k.min(count));
            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
            for result in &results {
                prop_assert!(result.score >= -1.0 - 1e-5 && result.score <= 1.0 + 1e-5);
            }
        }

        #[test]
        fn search_is_deterministic(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
        ) {
            let index = VectorIndex::new();
            index.add(entries_from(embeddings)).unwrap();
            let first = index.search(&query, 10).unwrap();
            let second = index.search(&query, 10).unwrap();
            prop_assert_eq!(first, second);
        }

        #[test]
        fn persisted_index_answers_identically(
            embeddings in proptest::collection::vec(arb_normalized_embedding(DIM), 1..12),
            query in arb_normalized_embedding(DIM),
        ) {
            let index = VectorIndex::new();
            index.add(entries_from(embeddings)).unwrap();
            let restored = VectorIndex::from_bytes(&index.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(index.search(&query, 5).unwrap(), restored.search(&query, 5).unwrap());
        }
    }
}

#[test]
fn five_entries_with_k_ten_returns_five() {
    let index = VectorIndex::new();
    let embeddings = (0..5).map(|i| vec![1.0, i as f32, 0.5]).collect();
    index.add(entries_from(embeddings)).unwrap();
    assert_eq!(index.search(&[1.0, 0.0, 0.0], 10).unwrap().len(), 5);
}

#[test]
fn save_and_load_through_a_file() {
    let index = VectorIndex::new();
    index.add(entries_from(vec![vec![0.1, 0.2], vec![0.3, -0.4]])).unwrap();

    let path = std::env::temp_dir().join(format!("gridiron-index-{}.bin", std::process::id()));
    index.save(&path).unwrap();
    let restored = VectorIndex::load_from(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(restored.len(), 2);
    assert_eq!(restored.dimensions(), Some(2));
    assert_eq!(index.search(&[0.3, -0.4], 2).unwrap(), restored.search(&[0.3, -0.4], 2).unwrap());
}
