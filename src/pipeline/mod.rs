pub mod bus;
pub mod mailbox;
pub mod processor;
pub mod worker;

pub use bus::{Channel, SignalBus, Subscription};
pub use mailbox::{Mailbox, PendingQueue};
pub use processor::{Admission, ProcessingError, Processor, ProcessorState, WorkItem};
pub use worker::{FnWorker, Passthrough, Worker};
