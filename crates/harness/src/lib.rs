//! RawParity Harness
//!
//! Differential parity verification between a reference RAW pipeline, called
//! directly, and its browser-hosted counterpart, driven through its UI:
//! - Provisions a deterministic sample input
//! - Runs both pipelines sequentially with the same explicit parameter set
//! - Owns the candidate's backing service and tears it down on every path
//! - Aligns, scores and reports the two outputs
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Orchestrator (verify)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SampleProvisioner                                          │
//! │    └── ensure_sample([(url, filename)]) -> sample.raw       │
//! │  PipelineRunner                                             │
//! │    ├── ReferenceRunner   (ReferencePipeline, direct call)   │
//! │    └── CandidateRunner   (UiDriver over a SessionHandle)    │
//! │  SessionManager                                             │
//! │    ├── start_session() -> SessionHandle                     │
//! │    └── stop_session(handle)   (process-group teardown)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  compare                                                    │
//! │    ├── ImageBuffer::open -> align -> score -> MetricReport  │
//! │    └── emit: report.md, report.json, comparison_heatmap.png │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod align;
pub mod driver;
pub mod error;
pub mod imaging;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod reference;
pub mod report;
pub mod runner;
pub mod sample;
pub mod session;

pub use align::align;
pub use driver::{CandidateRunner, UiDriver};
pub use error::{HarnessError, HarnessResult, StageFailure};
pub use imaging::{BitDepth, ImageBuffer};
pub use metrics::score;
pub use orchestrator::{compare, Comparison, Orchestrator, VerifyOutcome};
pub use process::terminate_process_tree;
pub use reference::{CommandPipeline, PipelineCall, ReferencePipeline, ReferenceRunner};
pub use report::emit;
pub use runner::PipelineRunner;
pub use sample::SampleProvisioner;
pub use session::{SessionHandle, SessionManager};
