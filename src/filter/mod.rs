//! Accept/reject hooks run after the handshake and before an upgraded
//! connection is handed to the application.
//!
//! Hooks run in registration order. Each one receives the request and the
//! controller's configuration and either returns the (possibly annotated)
//! request or aborts. The first abort wins and later hooks are skipped.

mod pipeline;

pub use pipeline::{filter_fn, FilterAbort, FilterHook, FilterOutcome, FilterPipeline, FnFilter};
