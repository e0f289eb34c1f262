pub mod fifo_worker;

pub use fifo_worker::{fifo_worker,
                      FifoWorker,
                      StreamShared};
