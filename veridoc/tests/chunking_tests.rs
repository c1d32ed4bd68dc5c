//! Property tests for text chunking.

use std::collections::HashSet;

use proptest::prelude::*;
use veridoc::chunking::{Chunker, TextChunker};
use veridoc::document::Document;

fn arb_document() -> impl Strategy<Value = Document> {
    ("[a-záéíóúñ .,\n]{1,600}", "[a-z]{3,10}\\.txt", 1u32..20)
        .prop_filter("non-empty trimmed content", |(text, _, _)| !text.trim().is_empty())
        .prop_map(|(text, source, page)| Document::new(text, source, page))
}

/// Words separated by single spaces, so windows end on word boundaries.
fn arb_words() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,8}", 1..150).prop_map(|words| words.join(" "))
}

/// Sizes with a strictly smaller overlap.
fn arb_size_and_overlap() -> impl Strategy<Value = (usize, usize)> {
    (10usize..200).prop_flat_map(|size| (Just(size), 0..size))
}

mod prop_chunk_identity {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn indices_are_contiguous_and_ids_unique(
            document in arb_document(),
            (size, overlap) in arb_size_and_overlap(),
        ) {
            let chunks = TextChunker::new(size, overlap).unwrap().chunk(&document);

            let indices: Vec<usize> = chunks.iter().map(|c| c.chunk_index().unwrap()).collect();
            let expected: Vec<usize> = (0..chunks.len()).collect();
            prop_assert_eq!(indices, expected);

            let ids: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
            prop_assert_eq!(ids.len(), chunks.len());

            for chunk in &chunks {
                prop_assert!(chunk.content.chars().count() <= size);
                prop_assert!(!chunk.content.trim().is_empty());
            }
        }

        #[test]
        fn chunking_is_deterministic(
            document in arb_document(),
            (size, overlap) in arb_size_and_overlap(),
        ) {
            let chunker = TextChunker::new(size, overlap).unwrap();
            prop_assert_eq!(chunker.chunk(&document), chunker.chunk(&document));
        }
    }
}

mod prop_chunk_counts {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn short_content_is_one_verbatim_chunk(text in "[a-z ]{1,99}") {
            prop_assume!(!text.trim().is_empty());
            let document = Document::new(text.clone(), "ley.txt", 1);

            let chunks = TextChunker::new(100, 20).unwrap().chunk(&document);

            prop_assert_eq!(chunks.len(), 1);
            prop_assert_eq!(chunks[0].content.as_str(), text.trim());
        }

        #[test]
        fn blank_content_yields_no_chunks(text in "[ \t\n]{0,50}") {
            let document = Document::new(text, "ley.txt", 1);
            prop_assert!(TextChunker::new(100, 20).unwrap().chunk(&document).is_empty());
        }

        #[test]
        fn more_overlap_never_means_fewer_chunks(
            text in prop_oneof![arb_words(), "[a-z ]{1,800}", "[a-z]{1,800}"],
            (size, low, high) in (10usize..120)
                .prop_flat_map(|size| (Just(size), 0..size, 0..size)),
        ) {
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            let document = Document::new(text, "ley.txt", 1);

            let fewer = TextChunker::new(size, low).unwrap().chunk(&document).len();
            let more = TextChunker::new(size, high).unwrap().chunk(&document).len();

            prop_assert!(fewer <= more, "overlap {low} gave {fewer}, overlap {high} gave {more}");
        }

        #[test]
        fn consecutive_chunks_share_exactly_the_overlap(
            text in arb_words(),
            (size, overlap) in arb_size_and_overlap(),
        ) {
            let document = Document::new(text, "ley.txt", 1);
            let chunks = TextChunker::new(size, overlap).unwrap().chunk(&document);

            for pair in chunks.windows(2) {
                let prev: Vec<char> = pair[0].content.chars().collect();
                let next: Vec<char> = pair[1].content.chars().collect();
                prop_assert!(prev.len() >= overlap && next.len() >= overlap);
                prop_assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
            }
        }
    }
}
