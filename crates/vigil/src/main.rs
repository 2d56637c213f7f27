//! Vigil agent CLI.
//!
//! `vigil watch` runs the incident-response agent against the cluster event
//! feed. `vigil inject` pushes a manual incident through the full pipeline
//! for operational testing, and `vigil rollback` invokes the remediation
//! collaborator once.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notify::{NotifyChannel, PagerdutyChannel, SlackChannel};
use vigil::context::history::GithubClient;
use vigil::context::logs::LokiClient;
use vigil::remediation::RemediationClient;
use vigil::risk::RiskAssessor;
use vigil::{
    AgentConfig, EscalationPolicy, EventWatcher, IncidentEvent, IncidentKind, Normalizer,
    NotificationRouter, Orchestrator,
};

/// Cluster incident-response agent
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Cluster incident-response agent - watches the event feed, gathers context, assesses risk and routes alerts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent against the cluster event feed
    Watch,

    /// Inject a manual incident and run one full pipeline
    Inject {
        /// Namespace of the failing workload
        #[arg(long)]
        namespace: String,

        /// Name of the failing pod or workload
        #[arg(long)]
        subject: String,

        /// Failure reason, e.g. CrashLoopBackOff
        #[arg(long, default_value = "CrashLoopBackOff")]
        reason: String,

        /// Free-text failure message
        #[arg(long, default_value = "Manually injected incident")]
        message: String,
    },

    /// Trigger a rollback of a deployment
    Rollback {
        /// Namespace of the deployment
        #[arg(long)]
        namespace: String,

        /// Deployment name
        #[arg(long)]
        workload: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::default();

    // Credentials resolve in-cluster or from kubeconfig. Failure here is
    // terminal for the watcher and remediation but not for the process.
    let kube_client = match kube::Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) => {
            error!(error = %e, "Failed to establish cluster credentials");
            None
        }
    };

    match cli.command {
        Commands::Watch => run_watch(&config, kube_client).await,
        Commands::Inject {
            namespace,
            subject,
            reason,
            message,
        } => run_inject(&config, namespace, subject, reason, message).await,
        Commands::Rollback {
            namespace,
            workload,
        } => run_rollback(kube_client, &namespace, &workload).await,
    }
}

/// Wire the collaborator adapters into an orchestrator.
fn build_orchestrator(config: &AgentConfig) -> Orchestrator {
    let chat: Vec<Arc<dyn NotifyChannel>> = vec![Arc::new(SlackChannel::from_env())];
    let pager: Vec<Arc<dyn NotifyChannel>> = vec![Arc::new(PagerdutyChannel::from_env())];

    let router = NotificationRouter::new(
        chat,
        pager,
        EscalationPolicy::new(config.critical_reasons.clone()),
        config.dashboard_url.clone(),
    );

    Orchestrator::new(
        Arc::new(LokiClient::from_env()),
        Arc::new(GithubClient::from_env()),
        Arc::new(RiskAssessor::from_env()),
        router,
        config,
    )
}

async fn run_watch(config: &AgentConfig, kube_client: Option<kube::Client>) -> Result<()> {
    info!("Starting vigil agent");

    let orchestrator = build_orchestrator(config);
    let cancel = CancellationToken::new();
    let watcher = EventWatcher::new(
        kube_client,
        Normalizer::new(config.failure_reasons.clone()),
        config.backoff.clone(),
        cancel.clone(),
    );

    let on_incident = {
        let orchestrator = orchestrator.clone();
        move |incident: IncidentEvent| orchestrator.handle(incident)
    };

    tokio::select! {
        () = watcher.watch(on_incident) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            cancel.cancel();
        }
    }

    // In-flight incident pipelines run to completion; partial notification
    // is worse than a brief delay in shutdown.
    orchestrator.drain().await;

    info!(
        suppressed = orchestrator.suppressed_total(),
        dropped = watcher.dropped_total(),
        "Agent stopped"
    );
    Ok(())
}

async fn run_inject(
    config: &AgentConfig,
    namespace: String,
    subject: String,
    reason: String,
    message: String,
) -> Result<()> {
    let orchestrator = build_orchestrator(config);
    let watcher = EventWatcher::new(
        None,
        Normalizer::new(config.failure_reasons.clone()),
        config.backoff.clone(),
        CancellationToken::new(),
    );

    let event = IncidentEvent {
        kind: IncidentKind::ManualInjection,
        namespace,
        subject,
        reason,
        message,
        observed_at: Utc::now(),
    };

    println!(
        "{}",
        format!("Injecting incident {}", event.correlation_key()).cyan()
    );

    {
        let orchestrator = orchestrator.clone();
        watcher.inject_manual(event, move |incident| orchestrator.handle(incident));
    }
    orchestrator.drain().await;

    println!("{}", "Pipeline complete".green());
    Ok(())
}

async fn run_rollback(
    kube_client: Option<kube::Client>,
    namespace: &str,
    workload: &str,
) -> Result<()> {
    let client = RemediationClient::new(kube_client);

    match client.rollback(namespace, workload).await {
        Ok(true) => {
            println!(
                "{}",
                format!("Rollback triggered for {namespace}/{workload}").green()
            );
            Ok(())
        }
        Ok(false) => {
            println!(
                "{}",
                format!("Deployment {namespace}/{workload} not found").yellow()
            );
            Ok(())
        }
        Err(e) => {
            println!("{}", format!("Rollback failed: {e}").red());
            Err(e.into())
        }
    }
}
