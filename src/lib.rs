pub mod config;
pub mod errors;
pub mod executor;
pub mod perception;
pub mod solver;
pub mod taxonomy;
pub mod vision;

use std::sync::Arc;

use crate::errors::TileGridResult;
use crate::executor::input::EnigoActuator;
use crate::perception::screenshot::PrimaryMonitorCapture;
use crate::solver::engine::{SessionReport, Solver, Templates};
use crate::solver::history::SessionAudit;
use crate::taxonomy::Taxonomy;
use crate::vision::prompts::PromptSet;
use crate::vision::registry::ProviderRegistry;

/// Wire the real screen, pointer and vision collaborators and run one session.
pub async fn run() -> TileGridResult<SessionReport> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let config = config::load_config()?;

    let taxonomy = match &config.paths.taxonomy_file {
        Some(path) => Taxonomy::load(path)?,
        None => Taxonomy::builtin()?,
    };
    tracing::info!(version = taxonomy.version(), "taxonomy loaded");

    let prompts = PromptSet::load_or_default(config.paths.prompts_file.as_deref());

    let registry = ProviderRegistry::from_config(&config.llm);
    tracing::debug!(providers = ?registry.list_names(), "providers registered");
    let classifier = registry.vision_classifier()?;

    let templates = Templates::load(&config.paths.assets_dir, &config)?;
    let audit = SessionAudit::new(&config.paths.resolved_artifacts_dir());
    tracing::info!(session = %audit.session_id, dir = %audit.dir().display(), "audit directory");

    let solver = Solver::new(
        config,
        taxonomy,
        prompts,
        templates,
        Arc::new(PrimaryMonitorCapture),
        Arc::new(EnigoActuator),
        classifier,
        audit,
    );
    solver.run().await
}
