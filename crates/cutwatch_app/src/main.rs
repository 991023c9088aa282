mod cli;
mod config;
mod console;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cutwatch_core::{TaskKey, TaskOutcome, TimeRangeSet, TrimPayload};
use cutwatch_engine::{
    HttpTaskApi, ScopeRouter, TaskObserver, TaskStarter, TaskWatcher, Transport,
};
use cutwatch_logging::{parse_level, watch_info, watch_warn};
use serde_json::Value;

use crate::cli::{Cli, Command, RangesArgs, RunArgs, WatchArgs};
use crate::config::{ClientConfig, OperationConfig};
use crate::console::ConsoleObserver;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = ClientConfig::load(&cli.config)?;
    let from_file = loaded.is_some();
    let config = loaded.unwrap_or_default();
    let level = parse_level(cli.log_level.as_deref().unwrap_or(&config.log_level));
    logging::initialize(config.log_destination, level);
    if !from_file {
        watch_info!("no configuration at {:?}; using defaults", cli.config);
    }

    match cli.command {
        Command::Watch(args) => watch_task(&config, args).await,
        Command::Run(args) => run_task(&config, args).await,
        Command::Ranges(args) => print_ranges(args),
    }
}

/// Push channel plus a watcher for one operation. A push channel that cannot
/// be opened is not fatal; polling still tracks the task.
struct Session {
    transport: Transport,
    watcher: TaskWatcher,
    api: Arc<HttpTaskApi>,
}

async fn open_session(config: &ClientConfig, operation: &OperationConfig) -> Result<Session> {
    let transport = Transport::new(config.transport_settings());
    let router = ScopeRouter::attach(&transport);
    report_connection_changes(&transport);
    if let Err(err) = transport.connect().await {
        watch_warn!("continuing without push channel: {}", err);
    }

    let api = Arc::new(
        HttpTaskApi::new(&config.api_settings(), operation.endpoint())
            .context("invalid api configuration")?,
    );
    let watcher = TaskWatcher::new(router, api.clone(), config.reconcile_settings());
    Ok(Session {
        transport,
        watcher,
        api,
    })
}

fn report_connection_changes(transport: &Transport) {
    let mut state = transport.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            eprintln!("{}", console::describe(current));
        }
    });
}

async fn watch_task(config: &ClientConfig, args: WatchArgs) -> Result<()> {
    let operation = config.operation(&args.scope)?;
    let session = open_session(config, operation).await?;

    let mut key = TaskKey::new(&args.scope);
    if let Some(project) = args.project {
        key = key.with_project(project);
    }
    if let Some(task) = args.task {
        key = key.with_task(task);
    }
    let reconcile = !args.no_poll && operation.status_path.is_some() && key.task_id.is_some();
    if !reconcile {
        watch_info!("tracking {} through the push channel only", args.scope);
    }

    let observer: Arc<dyn TaskObserver> = Arc::new(ConsoleObserver);
    let mut watch = session.watcher.watch(key, observer, reconcile);
    let result = tokio::select! {
        result = watch.wait(operation.ceiling()) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            session.transport.disconnect();
            return Ok(());
        }
    };
    session.transport.disconnect();
    report(result?)
}

async fn run_task(config: &ClientConfig, args: RunArgs) -> Result<()> {
    let operation = config.operation(&args.scope)?;
    operation.require_start()?;
    let params: Value = serde_json::from_str(&args.params).context("--params is not valid JSON")?;
    let ceiling = args
        .ceiling_secs
        .map_or_else(|| operation.ceiling(), Duration::from_secs);
    let session = open_session(config, operation).await?;

    let mut key = TaskKey::new(&args.scope);
    if let Some(project) = args.project {
        key = key.with_project(project);
    }
    let observer: Arc<dyn TaskObserver> = Arc::new(ConsoleObserver);

    let result = if operation.status_path.is_some() {
        session
            .watcher
            .start_and_wait(session.api.as_ref(), key, &params, observer, ceiling)
            .await
    } else {
        let task_id = session
            .api
            .start_task(key.project_id.as_deref(), &params)
            .await?;
        watch_info!("started {} task {}", args.scope, task_id);
        let mut watch = session.watcher.watch(key.with_task(task_id), observer, false);
        watch.wait(ceiling).await
    };
    session.transport.disconnect();
    report(result?)
}

fn report(outcome: TaskOutcome) -> Result<()> {
    if let TaskOutcome::Completed {
        result_ref: Some(result_ref),
        ..
    } = &outcome
    {
        println!("{result_ref}");
    }
    Ok(())
}

fn print_ranges(args: RangesArgs) -> Result<()> {
    let set = TimeRangeSet::from_ranges(&args.ranges, args.duration_ms);
    let mut payload = TrimPayload::from_set(args.mode.into(), &set);
    if args.invert {
        payload = payload.inverted();
    }
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
