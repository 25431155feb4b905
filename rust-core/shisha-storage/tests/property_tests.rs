// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//! Property-based tests for the append-only and counter invariants.

use proptest::prelude::*;
use shisha_storage::{InMemoryStorage, Manufacturer, Shisha, Storage};

fn arb_user() -> impl Strategy<Value = String> {
    "[a-z]{3,12}"
}

fn arb_message() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 .,!?]{1,80}"
}

fn arb_shisha() -> impl Strategy<Value = Shisha> {
    ("[A-Za-z ]{3,30}", "[A-Za-z ]{0,30}", "[A-Za-z ]{0,20}", any::<i64>()).prop_map(
        |(name, flavor, manufacturer, id)| {
            let mut s = Shisha::new(name, flavor, Manufacturer::named(manufacturer));
            s.id = id;
            s
        },
    )
}

proptest! {
    #[test]
    fn test_smoked_equals_number_of_calls(calls in 0usize..40) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryStorage::new();
            let id = store
                .create_shisha(&Shisha::new("A", "B", Manufacturer::named("C")))
                .await
                .unwrap()
                .id;

            let mut last = 0;
            for _ in 0..calls {
                let next = store.add_smoked(id).await.unwrap();
                prop_assert_eq!(next, last + 1);
                last = next;
            }
            let stored = store.get_shisha(id).await.unwrap().unwrap();
            prop_assert_eq!(stored.smoked, calls as i64);
            Ok(())
        })?;
    }

    #[test]
    fn test_ratings_are_append_only(
        ratings in prop::collection::vec((arb_user(), 0i32..=10), 1..20)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryStorage::new();
            let id = store
                .create_shisha(&Shisha::new("A", "B", Manufacturer::named("C")))
                .await
                .unwrap()
                .id;

            let mut before = Vec::new();
            for (user, score) in &ratings {
                store.add_rating(id, user, *score).await.unwrap();
                let after = store.get_shisha(id).await.unwrap().unwrap().ratings;
                prop_assert_eq!(after.len(), before.len() + 1);
                prop_assert_eq!(&after[..before.len()], &before[..]);
                prop_assert_eq!(&after[before.len()].user, user);
                prop_assert_eq!(after[before.len()].score, *score);
                before = after;
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_comments_are_append_only(
        comments in prop::collection::vec((arb_user(), arb_message()), 1..20)
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryStorage::new();
            let id = store
                .create_shisha(&Shisha::new("A", "B", Manufacturer::named("C")))
                .await
                .unwrap()
                .id;

            for (user, message) in &comments {
                store.add_comment(id, user, message).await.unwrap();
            }
            let stored = store.get_shisha(id).await.unwrap().unwrap().comments;
            let got: Vec<(String, String)> =
                stored.into_iter().map(|c| (c.user, c.message)).collect();
            prop_assert_eq!(got, comments);
            Ok(())
        })?;
    }

    #[test]
    fn test_create_ignores_client_fields(shisha in arb_shisha()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = InMemoryStorage::new();
            let created = store.create_shisha(&shisha).await.unwrap();
            prop_assert_eq!(created.id, 1);
            prop_assert_eq!(&created.name, &shisha.name);
            prop_assert_eq!(&created.flavor, &shisha.flavor);
            prop_assert_eq!(
                store.get_shisha(created.id).await.unwrap(),
                Some(created.clone())
            );
            Ok(())
        })?;
    }
}
