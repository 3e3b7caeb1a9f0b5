//! Property-based tests for chunking and search using proptest.

use proptest::prelude::*;

use docchat_core::chunk::{ChunkUnit, Chunker};
use docchat_core::index::{DistanceMetric, IndexEntry, VectorIndex};
use docchat_core::types::Chunk;

fn chunk(id: usize) -> Chunk {
    Chunk {
        id: format!("c{id}"),
        text: format!("chunk {id}"),
        source_document_id: "doc".into(),
        source_name: "doc.txt".into(),
        sequence_index: id,
    }
}

fn size_and_overlap() -> impl Strategy<Value = (usize, usize)> {
    (1usize..20).prop_flat_map(|size| (Just(size), 0..size))
}

// --- Chunking properties ---

proptest! {
    #[test]
    fn chunk_count_matches_formula(
        (size, overlap) in size_and_overlap(),
        text in "[a-z]{1,200}",
    ) {
        let chunker = Chunker::new(size, overlap, ChunkUnit::Characters).unwrap();
        let len = text.chars().count();
        prop_assume!(len > overlap);
        let chunks = chunker.split_text(&text).unwrap();
        let step = size - overlap;
        let expected = (len - overlap).div_ceil(step);
        prop_assert_eq!(chunks.len(), expected);
    }

    #[test]
    fn non_final_chunks_are_full_and_overlap_exactly(
        (size, overlap) in size_and_overlap(),
        text in "[a-z]{0,200}",
    ) {
        let chunker = Chunker::new(size, overlap, ChunkUnit::Characters).unwrap();
        let chunks: Vec<Vec<char>> = chunker
            .split_text(&text)
            .unwrap()
            .iter()
            .map(|c| c.chars().collect())
            .collect();

        for pair in chunks.windows(2) {
            prop_assert_eq!(pair[0].len(), size);
            prop_assert_eq!(&pair[0][size - overlap..], &pair[1][..overlap]);
        }
        if let Some(last) = chunks.last() {
            prop_assert!(!last.is_empty() && last.len() <= size);
        }
    }

    #[test]
    fn chunks_cover_the_whole_text(
        (size, overlap) in size_and_overlap(),
        text in "[a-z]{1,200}",
    ) {
        let chunker = Chunker::new(size, overlap, ChunkUnit::Characters).unwrap();
        let chunks = chunker.split_text(&text).unwrap();
        let mut rebuilt: String = chunks[0].clone();
        for c in &chunks[1..] {
            rebuilt.extend(c.chars().skip(overlap));
        }
        prop_assert_eq!(rebuilt, text);
    }

    #[test]
    fn invalid_overlap_is_rejected(size in 0usize..20, extra in 0usize..5) {
        prop_assert!(Chunker::new(size, size + extra, ChunkUnit::Words).is_err());
    }
}

// --- Search properties ---

proptest! {
    #[test]
    fn search_is_ascending_with_id_ties(
        points in prop::collection::vec((-4i8..4, -4i8..4), 1..40),
        query in (-4i8..4, -4i8..4),
        k in 0usize..50,
    ) {
        let entries: Vec<IndexEntry> = points
            .iter()
            .enumerate()
            .map(|(id, (x, y))| IndexEntry::new(chunk(id), vec![*x as f32, *y as f32]))
            .collect();
        let index = VectorIndex::build(entries, DistanceMetric::L2).unwrap();
        let hits = index
            .search(&[query.0 as f32, query.1 as f32], k)
            .unwrap();

        prop_assert_eq!(hits.len(), k.min(points.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
            if pair[0].distance == pair[1].distance {
                prop_assert!(pair[0].id < pair[1].id);
            }
        }
    }

    #[test]
    fn search_returns_the_true_nearest(
        points in prop::collection::vec((-10i8..10, -10i8..10), 1..30),
        query in (-10i8..10, -10i8..10),
        k in 1usize..10,
    ) {
        let vectors: Vec<Vec<f32>> = points
            .iter()
            .map(|(x, y)| vec![*x as f32, *y as f32])
            .collect();
        let entries = vectors
            .iter()
            .enumerate()
            .map(|(id, v)| IndexEntry::new(chunk(id), v.clone()))
            .collect();
        let index = VectorIndex::build(entries, DistanceMetric::L2).unwrap();
        let q = [query.0 as f32, query.1 as f32];

        let mut expected: Vec<(usize, f32)> = vectors
            .iter()
            .enumerate()
            .map(|(id, v)| (id, DistanceMetric::L2.distance(&q, v)))
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        expected.truncate(k);

        let hits = index.search(&q, k).unwrap();
        let got: Vec<usize> = hits.iter().map(|h| h.id).collect();
        let want: Vec<usize> = expected.iter().map(|(id, _)| *id).collect();
        prop_assert_eq!(got, want);
    }
}
