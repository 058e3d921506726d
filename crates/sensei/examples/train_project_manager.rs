//! Full walkthrough: train a project-manager agent from one certification
//! file and watch its task confidence change.
//!
//! Run with:
//!   cargo run -p sensei --example train_project_manager

use std::sync::Arc;

use sensei::adaptation::{RoleAgentFactory, TaskRequest};
use sensei::{PipelineConfig, TrainRequest, TrainingPipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensei=debug".into()),
        )
        .init();

    let dir = tempfile::tempdir()?;
    let cert_path = dir.path().join("pmp_risk_management.md");
    std::fs::write(
        &cert_path,
        "# Risk Management\n\n\
         Effective governance starts with a living risk register. Score every \
         risk by probability and impact, and revisit the register at each \
         phase gate.\n\n\
         # Stakeholder Communication\n\n\
         Governance reviews work when stakeholder expectations are explicit. \
         Publish decisions, owners, and due dates after every review.\n",
    )?;

    let mut config = PipelineConfig::default();
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config.embedding.dimension = 64;

    let pipeline = TrainingPipeline::builder(config).build().await?;
    pipeline
        .runtime()
        .register_class(
            "project_manager",
            Arc::new(RoleAgentFactory::new("ProjectManagerAgent")),
        )
        .await;

    let agent = pipeline.runtime().spawn("project_manager").await?;
    let task = TaskRequest::new("Prepare the governance review for the next phase gate");

    let before = agent.process_task(task.clone()).await?;
    println!("before training: confidence {:.2}", before.confidence);

    let status = pipeline
        .train_agent_from_certification(TrainRequest::new(
            "project_manager",
            cert_path.to_string_lossy(),
            "PMP Risk Management",
        ))
        .await?;
    println!(
        "pipeline finished at stage '{}' (training {})",
        status.stage, status.training_id
    );

    let job = pipeline.training().get_job(status.training_id).await?;
    if let Some(manifest) = &job.manifest {
        println!("trained capabilities:");
        for (name, capability) in &manifest.capabilities {
            println!("  {name}: confidence {:.2}", capability.confidence);
        }
    }
    if let Some(artifact) = &job.artifact {
        println!("model artifact: {}", artifact.reference);
    }

    let after = agent.process_task(task).await?;
    println!(
        "after training: confidence {:.2} via {:?}",
        after.confidence, after.applied_capabilities
    );

    for hit in pipeline.knowledge().search("risk register", 2).await? {
        println!("knowledge match {} (score {:.3})", hit.chunk_id, hit.score);
    }

    Ok(())
}
