use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tonic::transport::Server;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insectifica::cli::{Args, Command, ModelArgs};
use insectifica::config::resolve_profile;
use insectifica::grpc::identifier_server::IdentifierServer;
use insectifica::utils::collect_sources;
use insectifica::{
    ClassLabels, InferencePipeline, InsectService, KnowledgeStore, OnnxModel, Outcome, report,
};

/// Load every read-only artifact once. Any failure here is fatal.
fn load_pipeline(args: &ModelArgs) -> Result<InferencePipeline> {
    let (profile, origin) = resolve_profile(
        args.profile_file.as_deref(),
        args.profile.as_deref(),
        &args.model,
    )?;
    info!("Model profile {} ({})", profile, origin);

    let knowledge = KnowledgeStore::load(&args.knowledge)?;
    let labels = match &args.labels {
        Some(path) => ClassLabels::load(path)?,
        None if knowledge.is_indexed() => knowledge
            .row_labels()
            .context("no --labels given and the knowledge store rows cannot supply them")?,
        None => {
            info!("No --labels given, using the built-in class list");
            ClassLabels::builtin()
        }
    };
    let coverage = knowledge.audit(&labels);
    info!(
        "{} class labels, {} with species records",
        labels.len(),
        coverage.covered
    );
    if !coverage.misfiled.is_empty() {
        warn!(
            "{} store rows are filed under a different class than their index; \
             those classes are matched by name",
            coverage.misfiled.len()
        );
    }

    let classifier = OnnxModel::new(args.cuda).load_classifier(&args.model)?;
    let pipeline = InferencePipeline::new(
        Arc::new(classifier),
        profile,
        Arc::new(labels),
        Arc::new(knowledge),
    )?
    .with_top_k(args.top_k);
    Ok(pipeline)
}

async fn serve(model: &ModelArgs, addr: std::net::SocketAddr) -> Result<()> {
    let pipeline = Arc::new(load_pipeline(model).context("Startup failed")?);
    let service = InsectService::new(pipeline);
    info!("Insectifica server listening on {}", addr);

    Server::builder()
        .add_service(IdentifierServer::new(service))
        .serve_with_shutdown(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

fn identify(model: &ModelArgs, source: &Path, json: bool) -> Result<()> {
    let pipeline = load_pipeline(model).context("Startup failed")?;
    let sources = collect_sources(source)?;
    if sources.is_empty() {
        warn!("No jpg/jpeg/png images found in {}", source.display());
        return Ok(());
    }

    for path in sources {
        let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let outcome = Outcome::from_result(pipeline.identify(&bytes))?;

        if json {
            println!("{}", serde_json::json!({ "image": path, "outcome": outcome }));
        } else {
            println!("=== {}", path.display());
            println!("{}", report::render(&outcome));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insectifica=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match &args.command {
        Command::Serve { model, addr } => serve(model, *addr).await,
        Command::Identify { model, source, json } => {
            let (model, source, json) = (model.clone(), source.clone(), *json);
            tokio::task::spawn_blocking(move || identify(&model, &source, json)).await?
        }
    }
}
