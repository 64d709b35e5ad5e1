#![warn(clippy::pedantic)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::module_name_repetitions)]

//! A cooperative, single-threaded concurrency runtime with Go-style
//! channels, `select` and panic/defer/recover.
//!
//! ```
//! use warren::sync::chan;
//!
//! let rt = warren::runtime::Runtime::new();
//! let answer = rt.block_on(async {
//!     let ch = chan(0);
//!     let tx = ch.clone();
//!     warren::spawn(async move { tx.send(42).await });
//!     ch.recv().await
//! });
//! assert_eq!(answer.unwrap(), Some(42));
//! ```

mod error;
mod hasher;
mod utils;

pub mod runtime;
pub mod sync;
pub mod task;
pub mod unwind;

pub use error::{Error, RuntimeError};
pub use runtime::block_on;
pub use task::spawn;

#[cfg(feature = "macros")]
pub use warren_macros::{main, test};
