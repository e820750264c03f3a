//! Property tests for append ordering and checkpoint monotonicity.

mod common;

use std::collections::HashMap;

use common::{cart_store, processor_id, product_item_added, stream};
use eventvault::{
    store_processor_checkpoint, Executor, ExpectedStreamVersion, GlobalPosition,
    ReadStreamOptions, StoreCheckpoint, StoreCheckpointResult, Transaction,
};
use eventvault_memory::InMemoryExecutor;
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds")
}

proptest! {
    #[test]
    fn appends_get_gapless_positions_and_versions(
        batches in prop::collection::vec((0_usize..3, 1_usize..5), 1..12)
    ) {
        runtime().block_on(async {
            let (executor, store) = cart_store();
            let mut appended_per_stream: HashMap<usize, u64> = HashMap::new();
            let mut total = 0_u64;

            for (cart, size) in &batches {
                let events = (0..*size)
                    .map(|index| product_item_added(&format!("p{index}"), 1, 1))
                    .collect();
                let result = store
                    .append_to_stream(
                        &stream(&format!("shopping_cart:{cart}")),
                        events,
                        ExpectedStreamVersion::NoConstraint,
                    )
                    .await
                    .expect("append succeeds");

                total += *size as u64;
                let stream_total = appended_per_stream.entry(*cart).or_default();
                *stream_total += *size as u64;
                assert_eq!(result.last_event_global_position, GlobalPosition::new(total));
                assert_eq!(u64::from(result.next_expected_stream_version), *stream_total);
            }

            let log = executor
                .read_all(None, eventvault::BatchSize::try_new(1_000).expect("valid batch size"))
                .await
                .expect("read all succeeds");
            let positions: Vec<u64> = log
                .iter()
                .map(|event| event.global_position().into())
                .collect();
            assert_eq!(positions, (1..=total).collect::<Vec<_>>());

            for (cart, stream_total) in appended_per_stream {
                let read = store
                    .read_stream(
                        &stream(&format!("shopping_cart:{cart}")),
                        ReadStreamOptions::default(),
                    )
                    .await
                    .expect("read succeeds");
                let versions: Vec<u64> = read
                    .events
                    .iter()
                    .map(|event| event.stream_position().into())
                    .collect();
                assert_eq!(versions, (1..=stream_total).collect::<Vec<_>>());
            }
        });
    }

    #[test]
    fn checkpoint_only_moves_forward(positions in prop::collection::vec(1_u64..50, 1..20)) {
        runtime().block_on(async {
            let executor = InMemoryExecutor::new();
            let id = processor_id("property");
            let mut current: Option<GlobalPosition> = None;

            for position in positions {
                let new_position = GlobalPosition::new(position);
                let mut transaction = executor.begin().await.expect("transaction begins");
                let result = store_processor_checkpoint(
                    &mut transaction,
                    StoreCheckpoint {
                        processor_id: &id,
                        partition: None,
                        version: 1,
                        last_processed_position: current,
                        new_position,
                    },
                )
                .await
                .expect("no concurrent writer");
                transaction.commit().await.expect("transaction commits");

                match result {
                    StoreCheckpointResult::Stored => {
                        assert!(current.map_or(true, |current| current < new_position));
                        current = Some(new_position);
                    }
                    StoreCheckpointResult::Ignored { current: stored } => {
                        assert_eq!(Some(stored), current);
                        assert!(stored >= new_position);
                    }
                }

                let stored = executor
                    .checkpoint(&id, None)
                    .await
                    .map(|record| record.last_processed_position);
                assert_eq!(stored, current);
            }
        });
    }
}
