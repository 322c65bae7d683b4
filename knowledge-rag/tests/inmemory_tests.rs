//! Property and behaviour tests for the in-memory vector store.

use std::collections::HashMap;

use knowledge_rag::document::{Chunk, SearchFilter};
use knowledge_rag::inmemory::InMemoryVectorStore;
use knowledge_rag::vectorstore::{SimilarityMetric, VectorStore};
use knowledge_rag::KnowledgeError;
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

fn chunk(source_id: &str, index: usize, text: &str, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: Chunk::make_id(source_id, index),
        source_id: source_id.to_string(),
        index,
        text: text.to_string(),
        start: 0,
        end: text.len(),
        embedding,
        metadata: HashMap::new(),
    }
}

/// **Search ordering**
/// *For any* set of chunks stored in an InMemoryVectorStore, searching with a
/// query embedding SHALL return results ordered by descending score, and the
/// number of results SHALL be at most top_k.
mod prop_inmemory_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            sources in proptest::collection::vec(
                proptest::collection::vec(arb_normalized_embedding(DIM), 1..6),
                1..6,
            ),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, stored) = rt.block_on(async {
                let store = InMemoryVectorStore::new(DIM);
                for (s, embeddings) in sources.iter().enumerate() {
                    let source_id = format!("source-{s}");
                    let chunks: Vec<Chunk> = embeddings
                        .iter()
                        .enumerate()
                        .map(|(i, e)| chunk(&source_id, i, "text", e.clone()))
                        .collect();
                    store.upsert(&source_id, &chunks).await.unwrap();
                }
                let results = store.search(&query, top_k, None).await.unwrap();
                (results, store.count().await.unwrap())
            });

            prop_assert!(results.len() <= top_k);
            prop_assert_eq!(results.len(), top_k.min(stored));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }
    }
}

#[tokio::test]
async fn upsert_replaces_previous_version() {
    let store = InMemoryVectorStore::new(2);
    let v1 = vec![chunk("doc", 0, "a", vec![1.0, 0.0]), chunk("doc", 1, "b", vec![0.0, 1.0])];
    store.upsert("doc", &v1).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 2);

    let v2 = vec![chunk("doc", 0, "c", vec![1.0, 1.0])];
    store.upsert("doc", &v2).await.unwrap();

    let stored = store.chunks_for_source("doc").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].text, "c");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = InMemoryVectorStore::new(2);
    store.upsert("doc", &[chunk("doc", 0, "a", vec![1.0, 0.0])]).await.unwrap();

    assert_eq!(store.delete_by_source("doc").await.unwrap(), 1);
    assert_eq!(store.delete_by_source("doc").await.unwrap(), 0);
    assert_eq!(store.delete_by_source("never-stored").await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected_without_writing() {
    let store = InMemoryVectorStore::new(3);
    store.upsert("doc", &[chunk("doc", 0, "old", vec![1.0, 0.0, 0.0])]).await.unwrap();

    let bad = vec![chunk("doc", 0, "new", vec![1.0, 0.0, 0.0]), chunk("doc", 1, "x", vec![1.0])];
    let err = store.upsert("doc", &bad).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::ConfigError(_)));
    assert_eq!(store.chunks_for_source("doc").await.unwrap()[0].text, "old");

    let err = store.search(&[1.0, 0.0], 1, None).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::ConfigError(_)));
}

#[tokio::test]
async fn non_finite_embeddings_are_rejected() {
    let store = InMemoryVectorStore::new(2);
    store.upsert("doc", &[chunk("doc", 0, "old", vec![1.0, 0.0])]).await.unwrap();

    for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
        let err = store.upsert("doc", &[chunk("doc", 0, "new", vec![bad, 0.0])]).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidRequest(_)));
        let err = store.search(&[0.0, bad], 1, None).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::InvalidRequest(_)));
    }
    assert_eq!(store.chunks_for_source("doc").await.unwrap()[0].text, "old");
}

#[tokio::test]
async fn many_chunks_rank_in_descending_score() {
    let store = InMemoryVectorStore::new(2);
    let chunks: Vec<Chunk> = (0..40)
        .map(|i| {
            let angle = i as f32 * 0.07;
            chunk("doc", i, "text", vec![angle.cos(), angle.sin()])
        })
        .collect();
    store.upsert("doc", &chunks).await.unwrap();

    let results = store.search(&[1.0, 0.0], 10, None).await.unwrap();
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| r.score.is_finite()));
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(results[0].chunk.index, 0);
}

#[tokio::test]
async fn chunks_of_another_source_are_rejected() {
    let store = InMemoryVectorStore::new(2);
    let err = store.upsert("a", &[chunk("b", 0, "x", vec![1.0, 0.0])]).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::ConfigError(_)));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn equal_scores_keep_insertion_order() {
    let store = InMemoryVectorStore::new(2);
    store.upsert("first", &[chunk("first", 0, "1", vec![1.0, 0.0])]).await.unwrap();
    store.upsert("second", &[chunk("second", 0, "2", vec![2.0, 0.0])]).await.unwrap();
    store.upsert("third", &[chunk("third", 0, "3", vec![0.5, 0.0])]).await.unwrap();

    let results = store.search(&[1.0, 0.0], 3, None).await.unwrap();
    let order: Vec<&str> = results.iter().map(|r| r.chunk.source_id.as_str()).collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn inner_product_ranks_by_magnitude() {
    let store = InMemoryVectorStore::with_metric(2, SimilarityMetric::InnerProduct);
    store.upsert("small", &[chunk("small", 0, "s", vec![1.0, 0.0])]).await.unwrap();
    store.upsert("large", &[chunk("large", 0, "l", vec![3.0, 0.0])]).await.unwrap();

    let results = store.search(&[1.0, 0.0], 2, None).await.unwrap();
    assert_eq!(results[0].chunk.source_id, "large");
    assert!((results[0].score - 3.0).abs() < 1e-6);
}

#[tokio::test]
async fn filter_restricts_sources_and_metadata() {
    let store = InMemoryVectorStore::new(2);
    let mut tagged = chunk("a", 0, "tagged", vec![1.0, 0.0]);
    tagged.metadata.insert("lang".into(), "en".into());
    store.upsert("a", &[tagged]).await.unwrap();
    store.upsert("b", &[chunk("b", 0, "plain", vec![1.0, 0.0])]).await.unwrap();

    let only_b = store.search(&[1.0, 0.0], 5, Some(&SearchFilter::source("b"))).await.unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].chunk.source_id, "b");

    let mut by_lang = SearchFilter::default();
    by_lang.metadata.insert("lang".into(), "en".into());
    let english = store.search(&[1.0, 0.0], 5, Some(&by_lang)).await.unwrap();
    assert_eq!(english.len(), 1);
    assert_eq!(english[0].chunk.text, "tagged");
}

#[tokio::test]
async fn zero_top_k_returns_nothing() {
    let store = InMemoryVectorStore::new(2);
    store.upsert("a", &[chunk("a", 0, "x", vec![1.0, 0.0])]).await.unwrap();
    assert!(store.search(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
}
