//! Watcher host: observes per-account local folders and mirrors their
//! changes to the canonical store.
//!
//! ## Architecture
//!
//! ```text
//! inotify (per account)
//!       │
//!       ▼
//! pipeline::WatcherRegistry ──feeds──> index::FileIndex
//!       │                                   ▲
//!       │ forwarded events                  │ usage queries
//!       ▼                                   │
//! queue::DispatchQueue ──dispatches──> ChangeSink (AgentClient)
//!
//! evictor::Evictor sweeps the index and frees local copies under
//! disk pressure.
//! ```

pub mod evictor;
pub mod index;
pub mod pipeline;
pub mod queue;

pub use evictor::{EvictionReport, Evictor};
pub use index::{EvictionCandidate, FileIndex};
pub use pipeline::{PipelineEvent, WatcherRegistry};
pub use queue::{ChangeSink, DispatchQueue};
