//! Request routing
//!
//! Classification picks an agent key for the input text, and the
//! [`RoutingPipeline`] carries the request through resolution, forwarding
//! and formatting.

pub mod classifier;
pub mod context;
pub mod pipeline;

pub use classifier::{Classifier, KeywordClassifier};
pub use context::{PipelineStage, RequestContext, RouterResponse};
pub use pipeline::{classify_stage, format_stage, RoutingPipeline};
