// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use anyhow::{ensure, Context as _};
use serde::{de::DeserializeOwned, Deserialize};
use testbench_base::{data_types::BlockHeight, identifiers::EntityKey, time::WallClock};
use testbench_manager::{
    config::ManagerConfig,
    memory::{MemoryNetwork, MemoryStore},
    records::{EntityKind, EntityRecord},
    store::DocumentStore as _,
    Manager, TaskTrigger,
};
use tracing::info;

#[derive(clap::Parser)]
#[command(
    name = "testbench-manager",
    about = "Sampling and admission control of the testbench",
    version = clap::crate_version!(),
)]
struct ManagerOptions {
    #[command(subcommand)]
    command: ManagerCommand,

    /// The number of Tokio worker threads to use.
    #[arg(long, env = "TESTBENCH_TOKIO_THREADS")]
    tokio_threads: Option<usize>,
}

#[derive(clap::Subcommand)]
enum ManagerCommand {
    /// Check that a configuration resolves every entry its evaluation plan needs.
    CheckConfig {
        /// Path of the JSON configuration.
        #[arg(long)]
        config: PathBuf,
    },

    /// Run one tick over in-memory documents and print the triggers as JSON lines.
    DryRun {
        /// Path of the JSON configuration.
        #[arg(long)]
        config: PathBuf,

        /// JSON list of entity documents to start from.
        #[arg(long)]
        state: Option<PathBuf>,

        /// JSON list of `{ kind, address, service }` to tick. Defaults to the entities of
        /// `--state`.
        #[arg(long)]
        entities: Option<PathBuf>,

        /// The current height of the network.
        #[arg(long)]
        height: u64,

        #[arg(long, default_value = "4")]
        blocks_per_session: u64,
    },
}

/// An entity to tick.
#[derive(Debug, Deserialize)]
struct Target {
    kind: EntityKind,
    #[serde(flatten)]
    key: EntityKey,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("cannot parse {}", path.display()))
}

fn load_config(path: &Path) -> anyhow::Result<ManagerConfig> {
    let config = ManagerConfig::load(path)
        .with_context(|| format!("cannot load configuration {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn dry_run(
    config: ManagerConfig,
    state: Vec<EntityRecord>,
    targets: Vec<Target>,
    height: BlockHeight,
    blocks_per_session: u64,
) -> anyhow::Result<Vec<TaskTrigger>> {
    let store = MemoryStore::new();
    for entity in &state {
        store.upsert_entity(entity).await?;
    }
    let network =
        MemoryNetwork::with_session_length(height, &config.session_length_param, blocks_per_session);
    let manager = Manager::new(store, network, Arc::new(config), WallClock);

    let mut triggers = Vec::new();
    for target in targets {
        let outcome = manager
            .analyze_entity(target.kind, &target.key)
            .await
            .with_context(|| format!("failed to analyze {} {}", target.kind, target.key))?;
        info!(
            kind = %target.kind,
            key = %target.key,
            is_new = outcome.is_new,
            triggers = outcome.triggers.len(),
            "entity analyzed"
        );
        triggers.extend(outcome.triggers);
    }
    Ok(triggers)
}

async fn evaluate_options(options: ManagerOptions) -> anyhow::Result<()> {
    match options.command {
        ManagerCommand::CheckConfig { config } => {
            let config = load_config(&config)?;
            info!(
                frameworks = config.frameworks.len(),
                tasks = config.configured_tasks().count(),
                "configuration is valid"
            );
        }
        ManagerCommand::DryRun {
            config,
            state,
            entities,
            height,
            blocks_per_session,
        } => {
            let config = load_config(&config)?;
            let state: Vec<EntityRecord> = match state {
                Some(path) => read_json(&path)?,
                None => Vec::new(),
            };
            let targets: Vec<Target> = match entities {
                Some(path) => read_json(&path)?,
                None => state
                    .iter()
                    .map(|entity| Target {
                        kind: entity.kind,
                        key: entity.key.clone(),
                    })
                    .collect(),
            };
            ensure!(!targets.is_empty(), "no entity to analyze");
            let triggers =
                dry_run(config, state, targets, BlockHeight(height), blocks_per_session).await?;
            for trigger in &triggers {
                println!("{}", serde_json::to_string(trigger)?);
            }
        }
    }
    Ok(())
}

fn main() {
    testbench_base::tracing::init("testbench-manager");

    let options = <ManagerOptions as clap::Parser>::parse();

    let mut runtime = if options.tokio_threads == Some(1) {
        tokio::runtime::Builder::new_current_thread()
    } else {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        if let Some(threads) = options.tokio_threads {
            builder.worker_threads(threads);
        }
        builder
    };

    let result = runtime
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime")
        .block_on(evaluate_options(options));

    if let Err(error) = result {
        tracing::error!("{error:#}");
        process::exit(1);
    }
}
