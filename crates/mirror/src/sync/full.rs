//! Full sync: enumerate every remote item and fetch them in batches
//!
//! A full sync is the baseline path: run when an account has no checkpoint
//! yet, or when the provider declared the stored checkpoint expired. The
//! final checkpoint is persisted only after the whole run completes; an
//! interrupted full sync restarts from scratch, because a partial item set
//! cannot be positioned meaningfully in the provider's delta feed.

use anyhow::anyhow;
use chrono::Utc;

use super::{SyncError, SyncOutcome, SyncStats};
use crate::config::SyncTuning;
use crate::limiter::RateLimiter;
use crate::models::AccountSyncState;
use crate::provider::{Provider, quota, with_retry};
use crate::storage::SyncStore;

pub(crate) fn run(
    provider: &dyn Provider,
    store: &dyn SyncStore,
    limiter: &RateLimiter,
    tuning: &SyncTuning,
    account_id: &str,
    state: &mut AccountSyncState,
) -> Result<SyncOutcome, SyncError> {
    let retry = tuning.retry_policy();
    let mut stats = SyncStats::default();

    // Phase 1: paginate the listing to completion, collecting identifiers.
    // The provider reports its current feed position alongside the first
    // page; that token becomes the account checkpoint once we finish.
    let mut ids: Vec<String> = Vec::new();
    let mut checkpoint: Option<String> = None;
    let mut page_token: Option<String> = None;

    loop {
        limiter.acquire(quota::LIST);
        let page = with_retry(&retry, || {
            provider.list_all(account_id, page_token.as_deref())
        })?;
        stats.pages += 1;

        if checkpoint.is_none() {
            checkpoint = page.checkpoint;
        }
        if let Some(estimate) = page.result_size_estimate {
            state.total_items = Some(estimate);
        }
        ids.extend(page.items.into_iter().map(|item| item.id));

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    stats.items_listed = ids.len();
    state.total_items = state.total_items.or(Some(ids.len() as u64));
    store.save_sync_state(state.clone())?;

    let checkpoint = checkpoint
        .ok_or_else(|| SyncError::Store(anyhow!("provider listing reported no checkpoint")))?;

    // Phase 2: fetch item content in bounded batches and upsert by
    // (account_id, external_id).
    let batch_size = tuning.batch_size.max(1);
    for chunk in ids.chunks(batch_size) {
        limiter.acquire(quota::batch(chunk.len()));
        let page = with_retry(&retry, || provider.get_many(account_id, chunk))?;

        let fetched_at = Utc::now();
        for remote in page.items {
            store.upsert_item(remote.into_item(account_id, fetched_at))?;
            stats.items_upserted += 1;
        }

        // The provider may throttle a subset of a batch. Retry just those
        // ids individually after a short fixed pause instead of failing the
        // batch; an individual throttle still aborts the run.
        if !page.throttled.is_empty() {
            log::warn!(
                "[SYNC] {}: {} of {} batch items throttled, retrying individually",
                account_id,
                page.throttled.len(),
                chunk.len()
            );
            std::thread::sleep(tuning.batch_retry_delay());

            for id in &page.throttled {
                limiter.acquire(quota::GET);
                let remote = with_retry(&retry, || provider.get_one(account_id, id))?;
                store.upsert_item(remote.into_item(account_id, Utc::now()))?;
                stats.items_upserted += 1;
            }
        }

        state.items_synced = stats.items_upserted as u64;
        store.save_sync_state(state.clone())?;
    }

    Ok(SyncOutcome {
        stats,
        changed_ids: Vec::new(),
        checkpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use crate::provider::{BatchPage, DeltaPage, ItemRef, ListPage, ProviderError, RemoteItem};
    use crate::storage::{InMemorySyncStore, SyncStore};
    use std::sync::Mutex;

    /// Two list pages; the second batch throttles one id which then
    /// succeeds individually.
    struct PagedProvider {
        batch_calls: Mutex<usize>,
    }

    fn remote(id: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            kind: ItemKind::Mail,
            labels: Vec::new(),
            payload: format!("payload-{id}"),
        }
    }

    impl Provider for PagedProvider {
        fn list_all(
            &self,
            _account_id: &str,
            page_token: Option<&str>,
        ) -> Result<ListPage, ProviderError> {
            match page_token {
                None => Ok(ListPage {
                    items: vec![
                        ItemRef {
                            id: "m1".into(),
                            kind: ItemKind::Mail,
                        },
                        ItemRef {
                            id: "m2".into(),
                            kind: ItemKind::Mail,
                        },
                    ],
                    next_page_token: Some("p2".into()),
                    result_size_estimate: Some(3),
                    checkpoint: Some("H50".into()),
                }),
                Some("p2") => Ok(ListPage {
                    items: vec![ItemRef {
                        id: "m3".into(),
                        kind: ItemKind::Mail,
                    }],
                    next_page_token: None,
                    result_size_estimate: None,
                    checkpoint: None,
                }),
                Some(other) => Err(ProviderError::Status {
                    status: 400,
                    message: format!("bad page token {other}"),
                }),
            }
        }

        fn get_one(&self, _account_id: &str, id: &str) -> Result<RemoteItem, ProviderError> {
            Ok(remote(id))
        }

        fn get_many(&self, _account_id: &str, ids: &[String]) -> Result<BatchPage, ProviderError> {
            let mut calls = self.batch_calls.lock().unwrap();
            *calls += 1;

            // First batch call: throttle the last id of the chunk.
            if *calls == 1 {
                let (ok, throttled) = ids.split_at(ids.len() - 1);
                return Ok(BatchPage {
                    items: ok.iter().map(|id| remote(id)).collect(),
                    throttled: throttled.to_vec(),
                });
            }
            Ok(BatchPage {
                items: ids.iter().map(|id| remote(id)).collect(),
                throttled: Vec::new(),
            })
        }

        fn delta(
            &self,
            _account_id: &str,
            _checkpoint: &str,
            _page_token: Option<&str>,
        ) -> Result<DeltaPage, ProviderError> {
            unimplemented!("full sync never reads the delta feed")
        }
    }

    fn tuning() -> SyncTuning {
        SyncTuning {
            batch_retry_delay_ms: 1,
            retry_base_delay_ms: 1,
            retry_max_delay_ms: 2,
            ..SyncTuning::default()
        }
    }

    #[test]
    fn test_full_sync_paginates_and_batch_degrades() {
        let provider = PagedProvider {
            batch_calls: Mutex::new(0),
        };
        let store = InMemorySyncStore::new();
        let limiter = RateLimiter::new(10_000.0, 10_000.0);
        let mut state = AccountSyncState::new("a1");
        state.begin();

        let outcome = run(&provider, &store, &limiter, &tuning(), "a1", &mut state).unwrap();

        assert_eq!(outcome.checkpoint, "H50");
        assert_eq!(outcome.stats.items_listed, 3);
        assert_eq!(outcome.stats.items_upserted, 3);
        assert_eq!(outcome.stats.pages, 2);
        assert!(outcome.changed_ids.is_empty());

        // All three items landed despite the mid-batch throttle.
        for id in ["m1", "m2", "m3"] {
            assert!(store.get_item("a1", id).unwrap().is_some(), "missing {id}");
        }
        assert_eq!(state.total_items, Some(3));
        assert_eq!(state.items_synced, 3);
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        struct NoCheckpoint;
        impl Provider for NoCheckpoint {
            fn list_all(
                &self,
                _account_id: &str,
                _page_token: Option<&str>,
            ) -> Result<ListPage, ProviderError> {
                Ok(ListPage {
                    items: Vec::new(),
                    next_page_token: None,
                    result_size_estimate: None,
                    checkpoint: None,
                })
            }
            fn get_one(&self, _a: &str, _id: &str) -> Result<RemoteItem, ProviderError> {
                unimplemented!()
            }
            fn get_many(&self, _a: &str, _ids: &[String]) -> Result<BatchPage, ProviderError> {
                unimplemented!()
            }
            fn delta(
                &self,
                _a: &str,
                _c: &str,
                _p: Option<&str>,
            ) -> Result<DeltaPage, ProviderError> {
                unimplemented!()
            }
        }

        let store = InMemorySyncStore::new();
        let limiter = RateLimiter::new(10_000.0, 10_000.0);
        let mut state = AccountSyncState::new("a1");
        state.begin();

        let result = run(&NoCheckpoint, &store, &limiter, &tuning(), "a1", &mut state);
        assert!(matches!(result, Err(SyncError::Store(_))));
    }
}
