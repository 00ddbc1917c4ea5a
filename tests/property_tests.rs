//! Quantified invariants from the acceptance criteria, checked with
//! `proptest` over randomized inputs.

use engram::crypto::CryptoBox;
use engram::index::VectorIndex;
use engram::types::StructuredId;
use proptest::prelude::*;
use tempfile::tempdir;

proptest! {
    /// Any non-empty plaintext must decrypt back to itself under the key
    /// that encrypted it.
    #[test]
    fn crypto_round_trip_holds_for_arbitrary_plaintext(plaintext in "\\PC{1,200}") {
        let dir = tempdir().unwrap();
        let cb = CryptoBox::open(dir.path(), "prop-client").unwrap();
        let (key_id, ciphertext) = cb.encrypt(plaintext.as_bytes()).unwrap();
        let decrypted = cb.decrypt(&key_id, &ciphertext, false).unwrap();
        prop_assert_eq!(decrypted, plaintext.into_bytes());
    }

    /// A structured id built from arbitrary (category, epoch, rand) parts
    /// always parses back to the same parts.
    #[test]
    fn structured_id_parse_is_inverse_of_format(
        epoch in 0i64..2_000_000_000,
        rand in "[a-z0-9]{1,12}",
    ) {
        for category in engram::types::Category::all() {
            let id = StructuredId::new(*category, epoch, rand.clone());
            let formatted = id.format();
            prop_assert_eq!(StructuredId::parse(&formatted), Some(id));
        }
    }

    /// The vector index never returns more hits than were inserted, and
    /// every returned id was actually inserted.
    #[test]
    fn vector_search_results_are_a_subset_of_inserted_ids(
        count in 1usize..20,
        limit in 0usize..25,
    ) {
        let dir = tempdir().unwrap();
        let mut idx = VectorIndex::open(dir.path(), "prop", "longterm", 4).unwrap();
        let mut ids = Vec::new();
        for i in 0..count {
            let id = format!("id-{i}");
            idx.add(&id, &[i as f32, 0.0, 0.0, 0.0]).unwrap();
            ids.push(id);
        }

        let hits = idx.search(&[0.0, 0.0, 0.0, 0.0], limit).unwrap();
        prop_assert!(hits.len() <= count.min(limit));
        for hit in &hits {
            prop_assert!(ids.contains(&hit.id));
        }
    }
}
