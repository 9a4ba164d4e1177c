use super::*;
use crate::test_support::{FailingIndex, MemoryIndex, StalledIndex, StaticEncoder};
use std::sync::atomic::Ordering;

fn survivors() -> MemoryIndex {
    MemoryIndex::with_characters(
        3,
        &[
            ("Rick Grimes", "Former sheriff's deputy and leader.", vec![1.0, 0.0, 0.0]),
            ("Michonne", "Katana-wielding survivor.", vec![0.8, 0.6, 0.0]),
            (
                "Hershel Greene",
                "Veterinarian and Farmer who owns the family farm.",
                vec![0.6, 0.8, 0.0],
            ),
            ("Negan", "Leader of the Saviors.", vec![0.0, 0.0, 1.0]),
        ],
    )
}

fn retriever_over(index: Arc<MemoryIndex>) -> (Retriever, Arc<StaticEncoder>) {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0, 0.0, 0.0]));
    let retriever = Retriever::new(Arc::clone(&encoder) as Arc<dyn Encoder>, index);
    (retriever, encoder)
}

fn names(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(|r| r.record.name()).collect()
}

#[tokio::test]
async fn results_are_bounded_and_ordered() {
    let (retriever, _) = retriever_over(Arc::new(survivors()));

    let results = retriever
        .retrieve("Who is Rick Grimes?", 2, None)
        .await
        .expect("should retrieve");

    assert_eq!(names(&results), vec!["Rick Grimes", "Michonne"]);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(results[0].id, "Rick Grimes");
}

#[tokio::test]
async fn filter_after_top_k_misses_lower_ranked_matches() {
    let index = Arc::new(survivors());
    let (retriever, _) = retriever_over(Arc::clone(&index));

    let results = retriever
        .retrieve("axe wielding survivor", 2, Some("farmer"))
        .await
        .expect("should retrieve");

    assert!(results.is_empty());
    assert_eq!(index.requested(), vec![2]);
}

#[tokio::test]
async fn over_fetch_surfaces_filtered_matches() {
    let index = Arc::new(survivors());
    let (retriever, _) = retriever_over(Arc::clone(&index));
    let retriever = retriever
        .with_mode(TraitFilterMode::OverFetch)
        .with_over_fetch_factor(4);

    let results = retriever
        .retrieve("axe wielding survivor", 2, Some("FARMER"))
        .await
        .expect("should retrieve");

    assert_eq!(names(&results), vec!["Hershel Greene"]);
    assert_eq!(index.requested(), vec![8]);
}

#[tokio::test]
async fn filtered_results_contain_the_trait() {
    let (retriever, _) = retriever_over(Arc::new(survivors()));

    let results = retriever
        .retrieve("leaders", 4, Some("Leader"))
        .await
        .expect("should retrieve");

    assert_eq!(names(&results), vec!["Rick Grimes", "Negan"]);
    assert!(
        results
            .iter()
            .all(|r| r.record.overview().to_lowercase().contains("leader"))
    );
}

#[tokio::test]
async fn blank_filter_is_ignored() {
    let index = Arc::new(survivors());
    let (retriever, _) = retriever_over(Arc::clone(&index));
    let retriever = retriever.with_mode(TraitFilterMode::OverFetch);

    let results = retriever
        .retrieve("anyone", 3, Some("   "))
        .await
        .expect("should retrieve");

    assert_eq!(results.len(), 3);
    assert_eq!(index.requested(), vec![3]);
}

#[tokio::test]
async fn blank_query_is_rejected_before_embedding() {
    let (retriever, encoder) = retriever_over(Arc::new(survivors()));

    let err = retriever
        .retrieve("  \n", 5, None)
        .await
        .expect_err("blank query should be rejected");

    assert!(matches!(err, SearchError::InvalidQuery(_)));
    assert_eq!(encoder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn index_failure_is_a_retrieval_error() {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0, 0.0, 0.0]));
    let retriever = Retriever::new(encoder, Arc::new(FailingIndex { dimension: 3 }));

    let err = retriever
        .retrieve("Who is Glenn?", 5, None)
        .await
        .expect_err("unreachable index should fail the query");

    assert!(matches!(err, SearchError::Retrieval(_)));
    assert!(err.to_string().starts_with("Search failed:"));
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn slow_index_times_out() {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0, 0.0, 0.0]));
    let retriever = Retriever::new(encoder, Arc::new(StalledIndex { dimension: 3 }))
        .with_timeout(Duration::from_millis(50));

    let err = retriever
        .retrieve("Who is Carol?", 5, None)
        .await
        .expect_err("stalled index should time out");

    assert!(matches!(err, SearchError::Retrieval(ref msg) if msg.contains("timed out")));
}

#[tokio::test]
async fn zero_top_k_returns_nothing() {
    let index = Arc::new(survivors());
    let (retriever, _) = retriever_over(Arc::clone(&index));

    let results = retriever
        .retrieve("anyone", 0, None)
        .await
        .expect("should retrieve");

    assert!(results.is_empty());
    assert!(index.requested().is_empty());
}

#[test]
fn trait_filter_is_idempotent() {
    let results: Vec<SearchResult> = ["Farmer and vet", "Sheriff", "farm FARMER"]
        .iter()
        .enumerate()
        .map(|(i, overview)| SearchResult {
            id: format!("character-{i}"),
            record: CharacterRecord::from_fields([("Overview", *overview)]),
            score: 1.0 - i as f32 * 0.1,
        })
        .collect();

    let once = apply_trait_filter(results, "farmer");
    let twice = apply_trait_filter(once.clone(), "farmer");

    assert_eq!(once.len(), 2);
    assert_eq!(once, twice);
}

#[test]
fn candidate_count_per_mode() {
    let encoder = Arc::new(StaticEncoder::new(vec![1.0]));
    let index = Arc::new(MemoryIndex::new(1));
    let retriever = Retriever::new(encoder, index).with_over_fetch_factor(3);

    assert_eq!(retriever.candidate_count(5, true), 5);

    let retriever = retriever.with_mode(TraitFilterMode::OverFetch);
    assert_eq!(retriever.candidate_count(5, true), 15);
    assert_eq!(retriever.candidate_count(5, false), 5);
}

#[test]
fn filter_mode_names() {
    assert_eq!(TraitFilterMode::AfterTopK.to_string(), "after_top_k");
    assert_eq!(TraitFilterMode::OverFetch.to_string(), "over_fetch");
    assert_eq!(
        serde_json::to_string(&TraitFilterMode::OverFetch).expect("should serialize"),
        "\"over_fetch\""
    );
    assert_eq!(TraitFilterMode::default(), TraitFilterMode::AfterTopK);
}
