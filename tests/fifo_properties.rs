use futures::{
    FutureExt,
    executor::LocalPool,
    task::LocalSpawnExt,
};
use proptest::prelude::*;
use readable_streams::{CountQueuingStrategy, ReadableStream, UnderlyingSource};
use std::{cell::RefCell, rc::Rc};

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Read,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Enqueue), Just(Op::Read)]
}

proptest! {
    /// Chunks come out in the order they went in, whether a chunk is handed
    /// straight to a waiting read or parked in the queue first.
    #[test]
    fn delivery_is_fifo_for_any_interleaving(
        ops in prop::collection::vec(op(), 0..64),
        high_water_mark in 0.0f64..8.0,
    ) {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let slot = Rc::new(RefCell::new(None));
        let captured = slot.clone();
        let source = UnderlyingSource::<u32>::new().with_start(move |controller| {
            *captured.borrow_mut() = Some(controller);
            async { Ok(()) }
        });
        let stream = ReadableStream::builder(source)
            .strategy(CountQueuingStrategy::new(high_water_mark))
            .unwrap()
            .spawn(|task| spawner.spawn_local(task).unwrap());
        pool.run_until_stalled();

        let controller = slot.borrow().clone().unwrap();
        let reader = stream.get_reader().unwrap();
        let mut reads = Vec::new();
        let mut next = 0u32;
        for op in &ops {
            match op {
                Op::Enqueue => {
                    controller.enqueue(next).unwrap();
                    next += 1;
                }
                Op::Read => reads.push(reader.read()),
            }
            pool.run_until_stalled();
        }
        controller.close().unwrap();

        let mut delivered = Vec::new();
        for read in reads {
            if let Some(chunk) = read.now_or_never().unwrap().unwrap() {
                delivered.push(chunk);
            }
        }
        while let Some(chunk) = reader.read().now_or_never().unwrap().unwrap() {
            delivered.push(chunk);
        }

        prop_assert_eq!(delivered, (0..next).collect::<Vec<_>>());
    }

    /// `desired_size` is always the high water mark minus the number of
    /// queued chunks while the stream is readable.
    #[test]
    fn desired_size_matches_queue_length(
        enqueued in 0usize..32,
        read in 0usize..32,
        high_water_mark in 0.0f64..16.0,
    ) {
        let mut pool = LocalPool::new();
        let spawner = pool.spawner();
        let slot = Rc::new(RefCell::new(None));
        let captured = slot.clone();
        let source = UnderlyingSource::<usize>::new().with_start(move |controller| {
            *captured.borrow_mut() = Some(controller);
            async { Ok(()) }
        });
        let stream = ReadableStream::builder(source)
            .strategy(CountQueuingStrategy::new(high_water_mark))
            .unwrap()
            .spawn(|task| spawner.spawn_local(task).unwrap());
        pool.run_until_stalled();

        let controller = slot.borrow().clone().unwrap();
        for chunk in 0..enqueued {
            controller.enqueue(chunk).unwrap();
        }
        let reader = stream.get_reader().unwrap();
        let consumed = read.min(enqueued);
        for _ in 0..consumed {
            reader.read().now_or_never().unwrap().unwrap();
        }

        let queued = (enqueued - consumed) as f64;
        prop_assert_eq!(controller.desired_size(), Some(high_water_mark - queued));
    }
}
