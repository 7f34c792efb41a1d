use std::sync::Arc;

use backpager::test::{child_key, Notification, RecordingListener, TestCollection, TestMessages};
use backpager::{
    ExecutionContext, Job, Listener, LoadError, LoadedBatch, PagerError, Paginator,
    PaginatorConfig, Query, SerialQueue,
};
use parking_lot::Mutex;

const PATH: &str = "messages";

type TestPaginator = Paginator<TestMessages, Arc<TestCollection>>;

fn new_paginator(collection: &Arc<TestCollection>) -> TestPaginator {
    paginator_over(collection, Query::new(PATH))
}

fn paginator_over(collection: &Arc<TestCollection>, query: Query) -> TestPaginator {
    Paginator::new(
        query,
        collection.clone(),
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(SerialQueue::spawn("background")),
    )
    .unwrap()
}

/// Runs every job on its own task, so jobs may overlap.
struct ConcurrentContext;

impl ExecutionContext for ConcurrentContext {
    fn post(&self, job: Job) -> Result<(), PagerError> {
        tokio::spawn(job);
        Ok(())
    }
}

/// Refuses every job.
struct ClosedContext;

impl ExecutionContext for ClosedContext {
    fn post(&self, _job: Job) -> Result<(), PagerError> {
        Err(PagerError::ContextClosed { context: "closed" })
    }
}

fn seqs(paginator: &TestPaginator) -> Vec<u32> {
    (0..paginator.count())
        .map(|i| paginator.item(i).unwrap().seq)
        .collect()
}

fn keys(paginator: &TestPaginator) -> Vec<String> {
    paginator.entries().into_iter().map(|entry| entry.key).collect()
}

async fn load(paginator: &TestPaginator, n: usize) -> LoadedBatch {
    paginator
        .load_older_entries(n)
        .unwrap()
        .wait()
        .await
        .unwrap()
}

#[tokio::test]
async fn loads_ten_messages_backward_in_batches_of_three() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    let listener = RecordingListener::new();
    paginator.set_listener(Some(listener.clone()));

    paginator.load_older_entries(3).unwrap();
    assert_eq!(Notification::Loaded(0, 3), listener.next().await);
    assert_eq!(vec![8, 9, 10], seqs(&paginator));

    paginator.load_older_entries(3).unwrap();
    assert_eq!(Notification::Loaded(3, 3), listener.next().await);
    assert_eq!(vec![5, 6, 7, 8, 9, 10], seqs(&paginator));

    let queries = collection.queries();
    assert_eq!(Query::new(PATH).limit_to_last(3), queries[0]);
    assert_eq!(
        Query::new(PATH)
            .order_by_key()
            .end_at(child_key(8))
            .limit_to_last(4),
        queries[1]
    );
}

#[tokio::test]
async fn reaching_the_beginning_loads_fewer_and_never_duplicates() {
    let collection = TestCollection::with_messages(PATH, 5);
    let paginator = new_paginator(&collection);

    assert_eq!(
        LoadedBatch {
            original_count: 0,
            loaded_count: 3
        },
        load(&paginator, 3).await
    );
    assert_eq!(
        LoadedBatch {
            original_count: 3,
            loaded_count: 2
        },
        load(&paginator, 3).await
    );
    assert_eq!(
        LoadedBatch {
            original_count: 5,
            loaded_count: 0
        },
        load(&paginator, 3).await
    );

    assert_eq!(vec![1, 2, 3, 4, 5], seqs(&paginator));
    assert_eq!((1..=5).map(child_key).collect::<Vec<_>>(), keys(&paginator));
}

#[tokio::test]
async fn empty_collection_loads_nothing() {
    let collection = TestCollection::with_messages(PATH, 0);
    let paginator = new_paginator(&collection);

    let batch = load(&paginator, 4).await;
    assert_eq!(0, batch.loaded_count);
    assert!(paginator.is_empty());
    assert_eq!(None, paginator.oldest_key());
}

#[tokio::test]
async fn loads_without_listener_still_update_entries() {
    let collection = TestCollection::with_messages(PATH, 6);
    let paginator = new_paginator(&collection);

    load(&paginator, 2).await;
    load(&paginator, 2).await;
    assert_eq!(vec![3, 4, 5, 6], seqs(&paginator));
}

#[tokio::test]
async fn item_out_of_range_fails_in_every_state() {
    let collection = TestCollection::with_messages(PATH, 3);
    let paginator = new_paginator(&collection);

    for _ in 0..2 {
        let len = paginator.count();
        assert_eq!(
            Err(PagerError::IndexOutOfRange { index: len, len }),
            paginator.item(len)
        );
        assert!(matches!(
            paginator.item(usize::MAX),
            Err(PagerError::IndexOutOfRange { .. })
        ));
        load(&paginator, 2).await;
    }
}

#[tokio::test]
async fn reset_clears_entries() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    load(&paginator, 4).await;
    assert_eq!(4, paginator.count());

    paginator.reset();
    assert_eq!(0, paginator.count());

    // After a reset the next load starts from the newest entries again.
    assert_eq!(
        LoadedBatch {
            original_count: 0,
            loaded_count: 2
        },
        load(&paginator, 2).await
    );
    assert_eq!(vec![9, 10], seqs(&paginator));
}

#[tokio::test]
async fn remote_failure_is_reported_and_leaves_entries_untouched() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    let listener = RecordingListener::new();
    paginator.set_listener(Some(listener.clone()));

    paginator.load_older_entries(3).unwrap();
    assert_eq!(Notification::Loaded(0, 3), listener.next().await);

    collection.fail_next(1);
    let err = paginator
        .load_older_entries(3)
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::Remote(_)));
    assert_eq!(
        Notification::Failed("connection lost".to_string()),
        listener.next().await
    );
    assert_eq!(vec![8, 9, 10], seqs(&paginator));

    // No retries happen on their own, but the next request picks up where the failed one was.
    paginator.load_older_entries(3).unwrap();
    assert_eq!(Notification::Loaded(3, 3), listener.next().await);
    assert_eq!(vec![5, 6, 7, 8, 9, 10], seqs(&paginator));
}

#[tokio::test]
async fn cancelled_query_is_reported() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    let listener = RecordingListener::new();
    paginator.set_listener(Some(listener.clone()));

    collection.cancel_next();
    paginator.load_older_entries(3).unwrap();
    match listener.next().await {
        Notification::Failed(message) => assert!(message.contains("cancelled")),
        other => panic!("unexpected notification: {other:?}"),
    }
    assert!(paginator.is_empty());
}

#[tokio::test]
async fn reset_during_inflight_load_discards_the_batch() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    load(&paginator, 3).await;

    collection.hold_fetches();
    let ticket = paginator.load_older_entries(3).unwrap();
    collection.fetch_arrived().await;
    paginator.reset();
    collection.release(1);

    assert!(matches!(ticket.wait().await, Err(LoadError::Reset)));
    assert_eq!(0, paginator.count());

    collection.release(1);
    assert_eq!(
        LoadedBatch {
            original_count: 0,
            loaded_count: 3
        },
        load(&paginator, 3).await
    );
    assert_eq!(vec![8, 9, 10], seqs(&paginator));
}

#[tokio::test]
async fn overlapping_loads_apply_in_issue_order() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    let listener = RecordingListener::new();
    paginator.set_listener(Some(listener.clone()));

    let tickets: Vec<_> = (0..3)
        .map(|_| paginator.load_older_entries(3).unwrap())
        .collect();
    let mut batches = Vec::new();
    for ticket in tickets {
        batches.push(ticket.wait().await.unwrap());
    }

    assert_eq!(
        vec![(0, 3), (3, 3), (6, 3)],
        batches
            .iter()
            .map(|b| (b.original_count, b.loaded_count))
            .collect::<Vec<_>>()
    );
    assert_eq!(
        vec![
            Notification::Loaded(0, 3),
            Notification::Loaded(3, 3),
            Notification::Loaded(6, 3)
        ],
        listener.notifications()
    );
    assert_eq!((2..=10).collect::<Vec<_>>(), seqs(&paginator));
}

#[tokio::test]
async fn concurrent_loads_from_the_same_cursor_apply_once() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator: TestPaginator = Paginator::new(
        Query::new(PATH),
        collection.clone(),
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(ConcurrentContext),
    )
    .unwrap();

    // Both loads capture the empty cursor before either fetch completes.
    collection.hold_fetches();
    let first = paginator.load_older_entries(3).unwrap();
    collection.fetch_arrived().await;
    let second = paginator.load_older_entries(3).unwrap();
    collection.fetch_arrived().await;

    // The gate hands out permits in arrival order.
    collection.release(1);
    assert_eq!(
        LoadedBatch {
            original_count: 0,
            loaded_count: 3
        },
        first.wait().await.unwrap()
    );
    collection.release(1);
    assert!(matches!(second.wait().await, Err(LoadError::Overlapped)));

    assert_eq!(
        (8..=10).map(child_key).collect::<Vec<_>>(),
        keys(&paginator)
    );
    assert_eq!(
        vec![Query::new(PATH).limit_to_last(3); 2],
        collection.queries()
    );
}

#[tokio::test]
async fn refused_notification_abandons_the_ticket() {
    let collection = TestCollection::with_messages(PATH, 5);
    let paginator: TestPaginator = Paginator::new(
        Query::new(PATH),
        collection.clone(),
        Arc::new(ClosedContext),
        Arc::new(SerialQueue::spawn("background")),
    )
    .unwrap();
    let listener = RecordingListener::new();
    paginator.set_listener(Some(listener.clone()));

    let result = paginator.load_older_entries(2).unwrap().wait().await;
    assert!(matches!(result, Err(LoadError::Abandoned)));
    // The batch is merged even though nobody could be told about it.
    assert_eq!(vec![4, 5], seqs(&paginator));
    assert!(listener.notifications().is_empty());
}

#[tokio::test]
async fn closed_background_context_rejects_loads() {
    let collection = TestCollection::with_messages(PATH, 5);
    let paginator: TestPaginator = Paginator::new(
        Query::new(PATH),
        collection.clone(),
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(ClosedContext),
    )
    .unwrap();

    assert!(matches!(
        paginator.load_older_entries(2),
        Err(PagerError::ContextClosed { context: "closed" })
    ));
    assert!(collection.queries().is_empty());
    assert!(paginator.is_empty());
}

#[tokio::test]
async fn listener_registered_at_delivery_time_is_notified() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = new_paginator(&collection);
    let first = RecordingListener::new();
    let second = RecordingListener::new();
    paginator.set_listener(Some(first.clone()));

    collection.hold_fetches();
    let ticket = paginator.load_older_entries(2).unwrap();
    collection.fetch_arrived().await;
    paginator.set_listener(Some(second.clone()));
    collection.release(1);
    ticket.wait().await.unwrap();

    assert!(first.notifications().is_empty());
    assert_eq!(vec![Notification::Loaded(0, 2)], second.notifications());

    paginator.set_listener(None);
    collection.release(1);
    load(&paginator, 2).await;
    assert_eq!(1, second.notifications().len());
}

#[tokio::test]
async fn closures_are_listeners() {
    let collection = TestCollection::with_messages(PATH, 4);
    let paginator = new_paginator(&collection);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn Listener> = Arc::new(move |original: usize, loaded: usize| {
        sink.lock().push((original, loaded));
    });
    paginator.set_listener(Some(listener));

    load(&paginator, 3).await;
    load(&paginator, 3).await;
    assert_eq!(vec![(0, 3), (3, 1)], *seen.lock());
}

#[tokio::test]
async fn bounded_query_stops_at_its_start() {
    let collection = TestCollection::with_messages(PATH, 10);
    let paginator = paginator_over(&collection, Query::new(PATH).start_at(child_key(5)));

    load(&paginator, 4).await;
    let batch = load(&paginator, 4).await;
    assert_eq!(2, batch.loaded_count);
    assert_eq!((5..=10).collect::<Vec<_>>(), seqs(&paginator));
}

#[tokio::test]
async fn rejects_invalid_requests() {
    let collection = TestCollection::with_messages(PATH, 10);
    let limited = Paginator::<TestMessages, _>::new(
        Query::new(PATH).limit_to_last(3),
        collection.clone(),
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(SerialQueue::spawn("background")),
    );
    assert!(matches!(limited, Err(PagerError::LimitedQuery { limit: 3 })));

    let paginator = Paginator::<TestMessages, _>::with_config(
        Query::new(PATH),
        collection,
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(SerialQueue::spawn("background")),
        PaginatorConfig {
            name: "small",
            max_batch_size: 5,
        },
    )
    .unwrap();
    assert!(matches!(
        paginator.load_older_entries(0),
        Err(PagerError::ZeroBatchSize)
    ));
    assert!(matches!(
        paginator.load_older_entries(6),
        Err(PagerError::BatchTooLarge {
            requested: 6,
            max: 5
        })
    ));
    assert_eq!(5, load(&paginator, 5).await.loaded_count);

    let unusable = Paginator::<TestMessages, _>::with_config(
        Query::new(PATH),
        TestCollection::with_messages(PATH, 1),
        Arc::new(SerialQueue::spawn("foreground")),
        Arc::new(SerialQueue::spawn("background")),
        PaginatorConfig {
            name: "unusable",
            max_batch_size: 0,
        },
    );
    assert!(matches!(unusable, Err(PagerError::ZeroBatchSize)));
}

mod properties {
    use std::collections::BTreeMap;

    use backpager::test::TestMessage;
    use backpager::MemoryCollection;
    use proptest::prelude::*;

    use super::*;

    fn check_sequential_loads(children: BTreeMap<String, TestMessage>, batch_sizes: Vec<usize>) {
        let keys: Vec<String> = children.keys().cloned().collect();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let collection = Arc::new(MemoryCollection::new());
            for (key, message) in &children {
                collection
                    .insert_record::<TestMessages>(PATH, key.clone(), message)
                    .unwrap();
            }
            let paginator: Paginator<TestMessages, _> = Paginator::new(
                Query::new(PATH),
                collection,
                Arc::new(SerialQueue::spawn("foreground")),
                Arc::new(SerialQueue::spawn("background")),
            )
            .unwrap();

            let mut expected_count = 0;
            for n in batch_sizes {
                let batch = paginator
                    .load_older_entries(n)
                    .unwrap()
                    .wait()
                    .await
                    .unwrap();
                assert_eq!(expected_count, batch.original_count);
                let remaining = keys.len() - expected_count;
                assert_eq!(n.min(remaining), batch.loaded_count);
                expected_count += batch.loaded_count;

                let entries = paginator.entries();
                assert!(entries.windows(2).all(|pair| pair[0].key < pair[1].key));
                let newest: Vec<(&String, &TestMessage)> =
                    children.iter().skip(keys.len() - expected_count).collect();
                let loaded: Vec<(&String, &TestMessage)> =
                    entries.iter().map(|entry| (&entry.key, &entry.value)).collect();
                assert_eq!(newest, loaded);
            }
        });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn sequential_loads_stay_sorted_without_duplicates(
            children in prop::collection::btree_map("[a-z0-9]{1,6}", any::<TestMessage>(), 0..60),
            batch_sizes in prop::collection::vec(1usize..8, 1..15),
        ) {
            check_sequential_loads(children, batch_sizes);
        }
    }
}
