// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Duroflow Environment - demo host
//!
//! Runs the engine with a couple of in-process workflows:
//! - `greet`: records a greeting and returns it
//! - `countdown`: counts down with a durable sleep between ticks
//! - `approval`: waits for an `approve` signal
//!
//! Set `DUROFLOW_DEMO_WORKFLOW` (and optionally `DUROFLOW_DEMO_KWARGS`, a JSON
//! object) to start one run at boot.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{info, warn};

use duroflow_core::RunLog;
use duroflow_core::persistence::{MemoryRunLog, PostgresRunLog, SqliteRunLog};
use duroflow_environment::config::{Config, RunLogTarget};
use duroflow_environment::dispatcher::WorkflowDefinition;
use duroflow_environment::resolver::{FsModuleResolver, ModuleResolver, StaticModuleResolver};
use duroflow_environment::runtime::EngineRuntime;
use duroflow_sdk::{WorkflowError, WorkflowRegistry, workflow_fn};

const DEMO_MODULE: &str = "demo.wf";

fn demo_registry() -> WorkflowRegistry {
    WorkflowRegistry::new()
        .with_workflow(
            DEMO_MODULE,
            "greet",
            workflow_fn(|ctx, kwargs| async move {
                let name = kwargs["name"].as_str().unwrap_or("world").to_string();
                let greeting: String = ctx
                    .save(|| async move { Ok::<_, WorkflowError>(format!("Hello, {}!", name)) })
                    .await?;
                Ok(json!(greeting))
            }),
        )
        .with_workflow(
            DEMO_MODULE,
            "countdown",
            workflow_fn(|ctx, kwargs| async move {
                let from = kwargs["from"].as_u64().unwrap_or(3);
                for tick in (1..=from).rev() {
                    ctx.save(|| async move {
                        info!(tick, "Countdown");
                        Ok::<_, WorkflowError>(tick)
                    })
                    .await?;
                    ctx.sleep(Duration::from_secs(1)).await?;
                }
                Ok(json!("liftoff"))
            }),
        )
        .with_workflow(
            DEMO_MODULE,
            "approval",
            workflow_fn(|ctx, _kwargs| async move {
                let decision: Value = ctx.wait_for_event("approve").await?;
                Ok(json!({"approved": decision}))
            }),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duroflow_environment=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        run_log = ?config.run_log,
        relaunch_delay_ms = config.relaunch_delay.as_millis() as u64,
        max_workers = config.max_workers,
        "Starting Duroflow Environment"
    );

    let run_log: Arc<dyn RunLog> = match &config.run_log {
        RunLogTarget::Memory => Arc::new(MemoryRunLog::new()),
        RunLogTarget::Sqlite(path) => Arc::new(SqliteRunLog::from_path(path).await?),
        RunLogTarget::Postgres(url) => Arc::new(PostgresRunLog::connect(url).await?),
    };

    let resolver: Arc<dyn ModuleResolver> = match &config.module_root {
        Some(root) => {
            info!(module_root = %root.display(), "Verifying workflow artifacts");
            Arc::new(FsModuleResolver::new(root))
        }
        None => Arc::new(StaticModuleResolver),
    };

    let runtime = EngineRuntime::builder()
        .run_log(run_log)
        .loader(Arc::new(demo_registry()))
        .resolver(resolver)
        .workflow(WorkflowDefinition::inline("greet", DEMO_MODULE))
        .workflow(WorkflowDefinition::inline("countdown", DEMO_MODULE))
        .workflow(WorkflowDefinition::inline("approval", DEMO_MODULE))
        .config(&config)
        .build()?
        .start()
        .await?;

    if let Ok(workflow) = std::env::var("DUROFLOW_DEMO_WORKFLOW") {
        let kwargs = match std::env::var("DUROFLOW_DEMO_KWARGS") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => json!({}),
        };
        let run_id = runtime.dispatcher().start(&workflow, kwargs, None).await?;
        info!(run_id = %run_id, workflow = %workflow, "Demo run started");
    }

    info!("Duroflow Environment ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Duroflow Environment shut down");

    Ok(())
}
