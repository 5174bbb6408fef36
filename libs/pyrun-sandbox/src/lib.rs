//! Sandboxed execution and test-harness pipeline.
//!
//! synthesize → execute → extract, glued together by [`executor::Executor`].

pub mod engine;
pub mod executor;
pub mod extractor;
pub mod synthesizer;


pub use engine::{Engine, ExecutionFault, RawResult};
pub use executor::{Executor, Job, RequestError};
pub use synthesizer::ExecutableSource;
