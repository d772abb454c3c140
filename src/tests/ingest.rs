use std::time::Duration;

use super::support::{awin_feed, HashingEmbedder, RecordingIndex, DIMENSIONS};
use crate::catalog::{CanonicalField, FeedMapping, FeedReader, MappingError, Price};
use crate::config::IngestConfig;
use crate::ingest::{IngestError, Ingestor, RetryPolicy};
use crate::semantic::{LocalIndex, SimilarityIndex, VectorStorage};

const MIXED_ROWS: &[&str] = &[
    "1001,NeuroPeak,Sleep,p_10001,Silk Sleep Mask,<strong>Blackout</strong> silk mask,£15.00,GBP,https://awin.com/p=1,https://img.example/1.jpg",
    "1001,NeuroPeak,Focus,,Lion's Mane Extract,Nootropic,20.00,GBP,https://awin.com/p=2,",
    "1002,ZenLabs,Stress,z_1,,Calm blend,9.99,GBP,https://awin.com/p=3,",
    "1001,NEUROPEAK,Sleep,p_10001,Silk Sleep Mask v2,Second copy,15.00,GBP,https://awin.com/p=4,",
    "1002,ZenLabs,,z_2,Magnesium Glycinate,,CALL FOR PRICE,,https://awin.com/p=5,",
    "1003,,Recovery,p_10001,Percussion Massage Gun,Deep tissue,89.00,GBP,https://awin.com/p=6,",
];

fn reader(feed: &str) -> FeedReader<&[u8]> {
    FeedReader::new(feed.as_bytes(), FeedMapping::awin()).unwrap()
}

fn config(batch_size: usize) -> IngestConfig {
    IngestConfig {
        batch_size,
        ..Default::default()
    }
}

fn products(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("1001,NeuroPeak,Gym,p_{i},Whey Protein {i},Isolate,30.00,GBP,https://awin.com/p={i},"))
        .collect()
}

#[test]
fn test_mixed_feed_outcomes() {
    let feed = awin_feed(MIXED_ROWS);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();

    let summary = Ingestor::new(&embedder, &index, &config(100))
        .run(reader(&feed))
        .unwrap();

    assert_eq!(summary.rows_read, 6);
    assert_eq!(summary.accepted, 3);
    assert_eq!(summary.missing_required, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.embedding_failures, 0);
    assert_eq!(summary.unknown_prices, 1);
    assert_eq!(summary.upserted, 3);
    assert_eq!(summary.batches, 1);
    assert_eq!(index.len(), 3);
}

#[test]
fn test_rejected_and_duplicate_rows_are_never_embedded() {
    let feed = awin_feed(MIXED_ROWS);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();

    Ingestor::new(&embedder, &index, &config(100))
        .run(reader(&feed))
        .unwrap();

    assert_eq!(embedder.calls(), 3);
    let texts = embedder.texts();
    assert!(texts.iter().all(|t| !t.contains("Lion's Mane")));
    assert!(texts.iter().all(|t| !t.contains("Calm blend")));
    assert!(texts.iter().all(|t| !t.contains("Silk Sleep Mask v2")));
    // html stripped before embedding
    assert!(texts.iter().any(|t| t.starts_with("Silk Sleep Mask. Blackout silk mask.")));
}

#[test]
fn test_stored_metadata_carries_defaults_and_key() {
    let feed = awin_feed(MIXED_ROWS);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();

    Ingestor::new(&embedder, &index, &config(100))
        .run(reader(&feed))
        .unwrap();

    let texts = embedder.texts();
    let text = texts
        .iter()
        .find(|t| t.starts_with("Magnesium Glycinate"))
        .unwrap();
    let top = index
        .query(&HashingEmbedder::vector(text), 1)
        .unwrap()
        .remove(0);

    assert_eq!(top.id, "zenlabs-z_2");
    assert_eq!(top.metadata.product.id, "zenlabs-z_2");
    assert_eq!(top.metadata.product.price, Price::Unknown);
    assert_eq!(top.metadata.product.description, "No description available.");
    assert_eq!(top.metadata.product.category, "Uncategorized");
    assert_eq!(top.metadata.product.currency, "GBP");
    assert_eq!(&top.metadata.raw_text, text);
    assert!((top.score - 1.0).abs() < 1e-5);
}

#[test]
fn test_empty_merchant_key_is_distinct_from_merchant_key() {
    let feed = awin_feed(MIXED_ROWS);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();

    Ingestor::new(&embedder, &index, &config(100))
        .run(reader(&feed))
        .unwrap();

    let gun = index
        .query(&HashingEmbedder::vector("Percussion Massage Gun"), 1)
        .unwrap()
        .remove(0);
    assert_eq!(gun.id, "-p_10001");

    let mask = index
        .query(&HashingEmbedder::vector("Silk Sleep Mask"), 1)
        .unwrap()
        .remove(0);
    assert_eq!(mask.id, "neuropeak-p_10001");
    assert_eq!(mask.metadata.product.price, Price::Known(15.0));
}

#[test]
fn test_batches_are_bounded() {
    let rows = products(5);
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let feed = awin_feed(&rows);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();

    let summary = Ingestor::new(&embedder, &index, &config(2))
        .run(reader(&feed))
        .unwrap();

    assert_eq!(index.batch_sizes(), vec![2, 2, 1]);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.upserted, 5);
}

#[test]
fn test_embedding_failure_skips_only_that_row() {
    let feed = awin_feed(&[
        "1001,NeuroPeak,Gut,g_1,Probiotic Complex,Daily,25.00,GBP,https://awin.com/g=1,",
        "1001,NeuroPeak,Gut,g_2,POISON Pill,Bad,1.00,GBP,https://awin.com/g=2,",
        "1001,NeuroPeak,Gut,g_3,Prebiotic Fibre,Daily,12.00,GBP,https://awin.com/g=3,",
    ]);
    let embedder = HashingEmbedder::failing_on("POISON");
    let index = RecordingIndex::new();

    let summary = Ingestor::new(&embedder, &index, &config(100))
        .run(reader(&feed))
        .unwrap();

    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.accepted, 2);
    assert_eq!(summary.embedding_failures, 1);
    assert_eq!(summary.upserted, 2);
    assert_eq!(index.len(), 2);
}

#[test]
fn test_index_failure_propagates_without_retry() {
    let rows = products(3);
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let feed = awin_feed(&rows);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::failing(usize::MAX);

    let result = Ingestor::new(&embedder, &index, &config(100)).run(reader(&feed));

    match result {
        Err(IngestError::IndexCallFailure {
            batch,
            attempts,
            upserted_before,
            ..
        }) => {
            assert_eq!(batch, 1);
            assert_eq!(attempts, 1);
            assert_eq!(upserted_before, 0);
        }
        other => panic!("expected index failure, got {other:?}"),
    }
    assert_eq!(index.upsert_calls(), 1);
}

#[test]
fn test_failure_reports_progress_of_earlier_batches() {
    let rows = products(3);
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let feed = awin_feed(&rows);
    let embedder = HashingEmbedder::new();

    struct SecondCallFails(RecordingIndex);
    impl SimilarityIndex for SecondCallFails {
        fn upsert(
            &self,
            entries: Vec<crate::semantic::IndexEntry>,
        ) -> Result<(), crate::semantic::IndexError> {
            if self.0.upsert_calls() == 1 {
                return Err(crate::semantic::IndexError::Unavailable("gone".to_string()));
            }
            self.0.upsert(entries)
        }

        fn query(
            &self,
            vector: &[f32],
            top_k: usize,
        ) -> Result<Vec<crate::semantic::ScoredMatch>, crate::semantic::IndexError> {
            self.0.query(vector, top_k)
        }
    }

    let index = SecondCallFails(RecordingIndex::new());
    let result = Ingestor::new(&embedder, &index, &config(2)).run(reader(&feed));

    assert!(matches!(
        result,
        Err(IngestError::IndexCallFailure {
            batch: 2,
            upserted_before: 2,
            ..
        })
    ));
}

#[test]
fn test_retry_recovers_from_transient_failures() {
    let rows = products(3);
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let feed = awin_feed(&rows);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::failing(2);

    let summary = Ingestor::new(&embedder, &index, &config(100))
        .with_retry(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        })
        .run(reader(&feed))
        .unwrap();

    assert_eq!(index.upsert_calls(), 3);
    assert_eq!(summary.upserted, 3);
    assert_eq!(index.len(), 3);
}

#[test]
fn test_retry_gives_up_after_max_retries() {
    let rows = products(1);
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    let feed = awin_feed(&rows);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::failing(usize::MAX);

    let result = Ingestor::new(&embedder, &index, &config(100))
        .with_retry(RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        })
        .run(reader(&feed));

    assert!(matches!(
        result,
        Err(IngestError::IndexCallFailure { attempts: 3, .. })
    ));
    assert_eq!(index.upsert_calls(), 3);
}

#[test]
fn test_keys_are_scoped_to_one_run() {
    let feed = awin_feed(MIXED_ROWS);
    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();
    let ingestor = Ingestor::new(&embedder, &index, &config(100));

    let first = ingestor.run(reader(&feed)).unwrap();
    let second = ingestor.run(reader(&feed)).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.duplicates, 1);
    // upserts are idempotent per id
    assert_eq!(index.len(), 3);
}

#[test]
fn test_ingest_file_persists_index() {
    let tmp = tempfile::tempdir().unwrap();
    let feed_path = tmp.path().join("feed.csv");
    std::fs::write(&feed_path, awin_feed(MIXED_ROWS)).unwrap();
    let vectors_path = tmp.path().join("vectors.bin");

    let embedder = HashingEmbedder::new();
    {
        let index = LocalIndex::open(
            VectorStorage::new(vectors_path.clone()),
            crate::semantic::Embedder::model_id(&embedder),
            DIMENSIONS,
        )
        .unwrap();

        Ingestor::new(&embedder, &index, &config(100))
            .ingest_file(&feed_path, FeedMapping::awin())
            .unwrap();
    }

    let reopened = LocalIndex::open(
        VectorStorage::new(vectors_path),
        crate::semantic::Embedder::model_id(&embedder),
        DIMENSIONS,
    )
    .unwrap();
    assert_eq!(reopened.len(), 3);
}

#[test]
fn test_ingest_file_with_wrong_mapping_fails_before_embedding() {
    let tmp = tempfile::tempdir().unwrap();
    let feed_path = tmp.path().join("feed.csv");
    std::fs::write(&feed_path, awin_feed(MIXED_ROWS)).unwrap();

    let embedder = HashingEmbedder::new();
    let index = RecordingIndex::new();
    let result = Ingestor::new(&embedder, &index, &config(100))
        .ingest_file(&feed_path, FeedMapping::awin_legacy());

    assert!(matches!(
        result,
        Err(IngestError::Mapping(MappingError::MissingColumn {
            field: CanonicalField::Id,
            ..
        }))
    ));
    assert_eq!(embedder.calls(), 0);
}
