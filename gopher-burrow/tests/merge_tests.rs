//! Integration tests for explicit merges and the tag graph
//!
//! Merge validation (self, cycle, conflict, idempotence), tag union on merge,
//! forwarding resolution, tag normalization and tag/image symmetry.

mod helpers;

use gopher_burrow::models::ImageStatus;
use gopher_burrow::services::MergeOutcome;
use gopher_burrow::{AppState, CatalogError};
use gopher_common::Fingerprint;
use helpers::*;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;

/// Ingest one file per content and return their fingerprints
async fn seed(state: &AppState, contents: &[&[u8]]) -> Vec<Fingerprint> {
    let entries = contents
        .iter()
        .enumerate()
        .map(|(i, content)| entry(&format!("/photos/{}.jpg", i), content))
        .collect();
    let mut batch = report("S1", "seed", at(0), entries);
    batch.complete = false;
    state
        .coordinator
        .ingest(&batch, &CancellationToken::new())
        .await
        .unwrap();
    contents.iter().map(|c| fp(c)).collect()
}

#[tokio::test]
async fn test_merge_twice_is_noop() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b"]).await;
    let (a, b) = (ids[0], ids[1]);

    let first = state.reconciler.merge(a, b, None).await.unwrap();
    let MergeOutcome::Merged(record) = first else {
        panic!("first merge should apply");
    };
    assert_eq!(record.locations_moved, 1);

    let before = state.store.get(&b).await.unwrap();
    let second = state.reconciler.merge(a, b, None).await.unwrap();
    assert_eq!(second, MergeOutcome::AlreadyMerged { from: a, into: b });
    assert_eq!(state.store.get(&b).await.unwrap(), before);
    assert_eq!(state.reconciler.merge_history(&b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reverse_merge_is_cycle() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b"]).await;
    let (a, b) = (ids[0], ids[1]);

    state.reconciler.merge(a, b, None).await.unwrap();
    let err = state.reconciler.merge(b, a, None).await.unwrap_err();
    assert!(matches!(err, CatalogError::CycleDetected { .. }));

    // Nothing changed
    assert_eq!(state.store.get(&b).await.unwrap().unwrap().status, ImageStatus::New);
    assert_eq!(state.store.get(&a).await.unwrap().unwrap().status, ImageStatus::MergedInto(b));
}

#[tokio::test]
async fn test_merge_validation_errors() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b", b"c"]).await;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    assert!(matches!(
        state.reconciler.merge(a, a, None).await,
        Err(CatalogError::SelfMerge(_))
    ));
    assert!(matches!(
        state.reconciler.merge(a, fp(b"unknown"), None).await,
        Err(CatalogError::NotFound(_))
    ));

    state.reconciler.merge(a, b, None).await.unwrap();
    assert!(matches!(
        state.reconciler.merge(a, c, None).await,
        Err(CatalogError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_merge_into_merged_target_resolves_survivor() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b", b"c"]).await;
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    state.reconciler.merge(b, c, None).await.unwrap();
    let outcome = state.reconciler.merge(a, b, None).await.unwrap();
    let MergeOutcome::Merged(record) = outcome else {
        panic!("merge should apply");
    };
    assert_eq!(record.into, c);

    // Later merges of the survivor carry earlier records along
    let d = fp(b"d");
    let mut batch = report("S1", "later", at(5), vec![entry("/photos/d.jpg", b"d")]);
    batch.complete = false;
    state
        .coordinator
        .ingest(&batch, &CancellationToken::new())
        .await
        .unwrap();
    state.reconciler.merge(c, d, None).await.unwrap();
    for merged in [a, b, c] {
        assert_eq!(state.store.resolve(&merged).await.unwrap(), Some(d));
    }
    assert_eq!(state.store.get_resolved(&a).await.unwrap().unwrap().locations.len(), 4);
}

#[tokio::test]
async fn test_merge_unions_tags() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b"]).await;
    let (a, b) = (ids[0], ids[1]);

    for tag in ["x", "y"] {
        state.tags.attach(&a, tag).await.unwrap();
    }
    for tag in ["y", "z"] {
        state.tags.attach(&b, tag).await.unwrap();
    }

    let MergeOutcome::Merged(record) = state.reconciler.merge(a, b, None).await.unwrap() else {
        panic!("merge should apply");
    };
    assert_eq!(record.tags_moved, 1);

    assert_eq!(state.tags.tags_for(&b).await.unwrap(), vec!["x", "y", "z"]);
    assert_eq!(state.tags.images_for("y", 1, None).await.unwrap().images, vec![b]);
    assert_eq!(state.tags.images_for("x", 1, None).await.unwrap().images, vec![b]);
}

#[tokio::test]
async fn test_merge_of_record_without_locations_is_rejected() {
    let state = memory_state(Default::default()).await;
    let token = CancellationToken::new();
    let h1 = fp(b"h1");
    let h2 = fp(b"h2");

    state
        .coordinator
        .ingest(&report("S1", "sess-1", at(0), vec![entry("/a.jpg", b"h1")]), &token)
        .await
        .unwrap();
    state
        .coordinator
        .ingest(&report("S1", "sess-2", at(10), vec![entry("/a.jpg", b"h2")]), &token)
        .await
        .unwrap();
    state.tags.attach(&h2, "beach").await.unwrap();

    let before_h1 = state.store.get(&h1).await.unwrap();
    let before_h2 = state.store.get(&h2).await.unwrap();
    let err = state.reconciler.merge(h1, h2, None).await.unwrap_err();
    assert!(matches!(err, CatalogError::NothingToMerge(f) if f == h1), "{:?}", err);
    assert!(!err.is_retryable());

    // No state change
    assert_eq!(state.store.get(&h1).await.unwrap(), before_h1);
    assert_eq!(state.store.get(&h2).await.unwrap(), before_h2);
    assert!(state.reconciler.merge_history(&h2).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_tag_names_normalize_and_edits_are_idempotent() {
    let state = memory_state(Default::default()).await;
    let a = seed(&state, &[b"a"]).await[0];

    assert!(state.tags.attach(&a, "  Paris ").await.unwrap().changed);
    assert!(!state.tags.attach(&a, "paris").await.unwrap().changed);
    let namespaced = state.tags.attach(&a, "Location:  Côte   d'Azur").await.unwrap();
    assert_eq!(namespaced.tag, "location:côte d'azur");

    assert_eq!(state.tags.tags_for(&a).await.unwrap().len(), 2);

    assert!(state.tags.detach(&a, "PARIS").await.unwrap().changed);
    assert!(!state.tags.detach(&a, "paris").await.unwrap().changed);
    assert!(!state.tags.detach(&a, "never-attached").await.unwrap().changed);

    assert!(matches!(
        state.tags.attach(&a, "   ").await,
        Err(CatalogError::InvalidTag(_))
    ));
    assert!(matches!(
        state.tags.attach(&fp(b"unknown"), "paris").await,
        Err(CatalogError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tag_edit_on_merged_record_lands_on_survivor() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b"]).await;
    let (a, b) = (ids[0], ids[1]);

    state.reconciler.merge(a, b, None).await.unwrap();
    let change = state.tags.attach(&a, "beach").await.unwrap();
    assert_eq!(change.fingerprint, b);
    assert_eq!(state.tags.tags_for(&b).await.unwrap(), vec!["beach"]);
}

#[tokio::test]
async fn test_tag_membership_is_symmetric() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"a", b"b", b"c", b"d"]).await;

    let plan: [(usize, &str); 6] = [(0, "sun"), (0, "sea"), (1, "sun"), (2, "sea"), (3, "snow"), (2, "sun")];
    for (index, tag) in plan {
        state.tags.attach(&ids[index], tag).await.unwrap();
    }
    state.tags.detach(&ids[3], "snow").await.unwrap();
    state.reconciler.merge(ids[2], ids[1], None).await.unwrap();

    let survivors: Vec<Fingerprint> = vec![ids[0], ids[1], ids[3]];
    for summary in state.tags.list_tags().await.unwrap() {
        let members: BTreeSet<Fingerprint> = state
            .tags
            .images_for(&summary.name, 1, None)
            .await
            .unwrap()
            .images
            .into_iter()
            .collect();
        assert_eq!(members.len() as i64, summary.images);

        for image in &survivors {
            let tagged = state.tags.tags_for(image).await.unwrap().contains(&summary.name);
            assert_eq!(tagged, members.contains(image), "tag {} image {}", summary.name, image.short());
        }
    }
}

#[tokio::test]
async fn test_tag_pages() {
    let state = memory_state(Default::default()).await;
    let ids = seed(&state, &[b"1", b"2", b"3", b"4", b"5"]).await;
    for id in &ids {
        state.tags.attach(id, "all").await.unwrap();
    }

    let page = state.tags.images_for("all", 2, Some(2)).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.images.len(), 2);

    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(page.images, sorted[2..4].to_vec());
}

#[tokio::test]
async fn test_unused_tag_has_no_images() {
    let state = memory_state(Default::default()).await;
    let a = seed(&state, &[b"a"]).await[0];

    let page = state.tags.images_for("never-used", 1, None).await.unwrap();
    assert_eq!(page.tag, "never-used");
    assert!(page.images.is_empty());
    assert_eq!(page.total, 0);
    assert_eq!(page.total_pages, 0);

    // Vocabulary entry left behind by a detach answers the same way
    state.tags.attach(&a, "Sunset").await.unwrap();
    state.tags.detach(&a, "sunset").await.unwrap();
    let page = state.tags.images_for("sunset", 1, None).await.unwrap();
    assert!(page.images.is_empty());
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_prune_empty_tags() {
    let state = memory_state(Default::default()).await;
    let a = seed(&state, &[b"a"]).await[0];
    state.tags.attach(&a, "kept").await.unwrap();
    state.tags.attach(&a, "dropped").await.unwrap();
    state.tags.detach(&a, "dropped").await.unwrap();

    assert_eq!(state.tags.prune_empty().await.unwrap(), vec!["dropped".to_string()]);
    let names: Vec<_> = state.tags.list_tags().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["kept"]);
}
