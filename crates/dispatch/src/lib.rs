//! Parallel dispatch of decode tasks.
//!
//! A [`Dispatcher`] turns a list of decode tasks into a [`RecordStream`] of
//! serialized records. The strategy is picked once at startup by
//! [`Strategy::probe`]:
//!
//! - [`SequentialDispatcher`]: one in-process model, tasks decoded lazily
//! - [`ProcessPool`]: child processes, each with its own model replica,
//!   speaking the line protocol in [`protocol`]; [`serve`] is the child side
//!
//! Records arrive in completion order and carry their own index. The pool
//! guarantees one record per submitted task even when workers die.

pub mod pool;
pub mod protocol;
pub mod serve;
pub mod stream;
pub mod types;
pub mod worker;

pub use pool::ProcessPool;
pub use protocol::READY_LINE;
pub use serve::serve;
pub use stream::{Dispatcher, RecordStream, SequentialDispatcher};
pub use types::{DispatchError, PoolConfig, Strategy};
pub use worker::DecodeProcess;
