//! Session agent that keeps track of disk-encryption jobs and answers the
//! daemon's device-password requests.

use anyhow::{Context, Result};
use diskenc_core::{
    config::DiskencConfig, logging, registry::JobRegistry, NotificationDispatcher,
    OrchestrationContext, OutcomePresenter, PassphraseAcquirer,
};
use diskenc_system::{
    CommandSession, ConfiguredKeyTypes, HelperTpmUnsealer, LogProgress, TerminalPresenter,
    TerminalPrompt,
};
use log::{error, info, warn};
use std::fs;
use std::sync::Arc;
use tokio::{select, signal};

mod server;

/// Entry point for the Tokio runtime; logs failures before exit.
#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("agent exit: {err:?}");
        std::process::exit(1);
    }
}

/// Load configuration, start the event loop, and serve the socket until Ctrl-C.
async fn run() -> Result<()> {
    logging::init("info");
    let config_path = DiskencConfig::resolve_path(None);
    let config = Arc::new(
        DiskencConfig::load_or_bootstrap(&config_path)
            .with_context(|| format!("load config {}", config_path.display()))?,
    );

    if config.path != config_path {
        warn!(
            "configuration missing at {}; using bootstrap at {}",
            config_path.display(),
            config.path.display()
        );
    }
    for issue in config.validate() {
        warn!("config: {issue}");
    }

    info!("diskenc agent starting (config: {})", config.path.display());

    let presenter = TerminalPresenter::new(config.agent.interactive);
    if !presenter.is_interactive() {
        info!("reboot offers will be postponed ([agent] interactive = false)");
    }
    let acquirer = PassphraseAcquirer::new(
        ConfiguredKeyTypes::new(config.clone()),
        HelperTpmUnsealer::from_config(&config),
        TerminalPrompt::tty().with_passphrase_fallback(true),
        presenter.clone(),
    );
    let context = OrchestrationContext::start(dispatcher(&config, presenter), Arc::new(acquirer));

    let socket_path = config.socket_path();
    let listener = server::bind(&socket_path)?;
    let accept_handle = tokio::spawn(server::accept_loop(listener, context.bus()));

    let outcome = select! {
        res = accept_handle => res.context("socket task panicked").and_then(|inner| inner),
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    };

    let dispatcher = context.shutdown().await?;
    if dispatcher.has_any_active_job() {
        warn!(
            "{} job(s) were still in flight at shutdown",
            dispatcher.registry().len()
        );
    }
    if let Err(err) = fs::remove_file(&socket_path) {
        warn!("could not remove {}: {err}", socket_path.display());
    }
    outcome
}

type AgentDispatcher = NotificationDispatcher<LogProgress, TerminalPresenter, CommandSession>;

fn dispatcher(config: &DiskencConfig, presenter: TerminalPresenter) -> AgentDispatcher {
    NotificationDispatcher::new(
        JobRegistry::new(config.stale_window()),
        LogProgress,
        OutcomePresenter::new(presenter, CommandSession::from_config(config)),
    )
}
