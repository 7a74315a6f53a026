// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Metadata quotas hold for any sequence of inserts in one lifespan scope

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tracekeep_core::{MetadataLifespan, MetadataRecord, MetadataType, SessionId, StorageLimits};
use tracekeep_storage::{RecordStore, StorageMechanism, StorageOptions};

const KEYS: usize = 6;
const LIMIT: usize = 2;

const TYPES: [MetadataType; 4] = [
    MetadataType::Resource,
    MetadataType::CustomProperty,
    MetadataType::PersonaTag,
    MetadataType::RequiredResource,
];

fn collected_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn store() -> RecordStore {
    let limits = StorageLimits {
        resources_limit: LIMIT,
        custom_properties_limit: LIMIT,
        persona_tags_limit: LIMIT,
        ..StorageLimits::default()
    };
    RecordStore::open(StorageOptions::new(StorageMechanism::in_memory("quota")).with_limits(limits))
        .unwrap()
}

/// Rows of `kind` visible to `scope`: permanent ones plus those scoped to it
fn visible(store: &RecordStore, kind: MetadataType, scope: &SessionId) -> usize {
    (0..KEYS)
        .map(|k| format!("key-{}", k))
        .map(|key| {
            let permanent = store
                .fetch_metadata(&key, kind, MetadataLifespan::Permanent, "")
                .unwrap()
                .is_some();
            let scoped = store
                .fetch_metadata(&key, kind, MetadataLifespan::Session, &scope.to_string())
                .unwrap()
                .is_some();
            permanent as usize + scoped as usize
        })
        .sum()
}

proptest! {
    #[test]
    fn prop_quota_never_exceeded(
        session_scoped in any::<bool>(),
        ops in prop::collection::vec((0..KEYS, 0..TYPES.len(), "[a-z]{1,4}"), 1..40),
    ) {
        let store = store();
        let session = SessionId::random();

        for (key, kind, value) in ops {
            let kind = TYPES[kind];
            let key = format!("key-{}", key);
            let record = if session_scoped {
                MetadataRecord::for_session(key, value, kind, &session, collected_at())
            } else {
                MetadataRecord::permanent(key, value, kind, collected_at())
            };
            let stored = store.add_metadata(&record).unwrap();

            if kind == MetadataType::RequiredResource {
                prop_assert!(stored.is_some());
            }
            for kind in &TYPES[..3] {
                prop_assert!(visible(&store, *kind, &session) <= LIMIT);
            }
        }
    }

    #[test]
    fn prop_replacing_a_value_is_never_rejected(values in prop::collection::vec("[a-z]{1,8}", 1..10)) {
        let store = store();
        for k in 0..LIMIT {
            let record = MetadataRecord::permanent(
                format!("key-{}", k),
                "seed",
                MetadataType::PersonaTag,
                collected_at(),
            );
            prop_assert!(store.add_metadata(&record).unwrap().is_some());
        }
        for value in values {
            let record =
                MetadataRecord::permanent("key-0", value.clone(), MetadataType::PersonaTag, collected_at());
            prop_assert!(store.add_metadata(&record).unwrap().is_some());
            let stored = store
                .fetch_metadata("key-0", MetadataType::PersonaTag, MetadataLifespan::Permanent, "")
                .unwrap()
                .unwrap();
            prop_assert_eq!(stored.value, value);
        }
    }
}
