//! Certification-to-capability training pipeline.
//!
//! Sensei turns certification material (markdown, HTML, plain text) into
//! trained role capabilities and applies them to running agents. Four layers
//! build on each other and stay independently usable:
//!
//! - [`registry`] — register source files and track their lifecycle
//! - [`knowledge`] — extract, chunk, embed, and index content
//! - [`training`] — run training jobs that produce versioned model
//!   artifacts and capability manifests
//! - [`adaptation`] — blend trained capabilities into live agent behavior
//!
//! [`TrainingPipeline`] orchestrates all four for the common case:
//!
//! ```no_run
//! use sensei::adaptation::RoleAgentFactory;
//! use sensei::{PipelineConfig, TrainRequest, TrainingPipeline};
//! use std::sync::Arc;
//!
//! # async fn run() -> sensei::PipelineResult<()> {
//! let pipeline = TrainingPipeline::builder(PipelineConfig::default())
//!     .build()
//!     .await?;
//! pipeline
//!     .runtime()
//!     .register_class("project_manager", Arc::new(RoleAgentFactory::new("ProjectManagerAgent")))
//!     .await;
//!
//! let status = pipeline
//!     .train_agent_from_certification(TrainRequest::new(
//!         "project_manager",
//!         "./certifications/pmp_module1.md",
//!         "PMP Module 1",
//!     ))
//!     .await?;
//! println!("trained: {:?}", status.stage);
//! # Ok(())
//! # }
//! ```

pub mod adaptation;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod pipeline;
pub mod registry;
pub mod storage;
pub mod sync;
pub mod training;

pub use config::PipelineConfig;
pub use error::{ErrorDetail, ErrorKind, PipelineError, PipelineResult};
pub use pipeline::{
    PipelineRun, PipelineStage, RunId, StageError, TrainRequest, TrainingPipeline,
    TrainingPipelineBuilder, TrainingStatus,
};
