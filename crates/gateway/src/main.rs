use clap::Parser;
use tracing_subscriber::EnvFilter;

use bc_gateway::cli::{commands, Cli, Command, ConfigCommand};
use bc_gateway::hooks::HookEvent;
use bc_gateway::state::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let rt = bc_gateway::cli::load_runtime()?;
            run_server(rt).await
        }
        Some(Command::Agent {
            message,
            interactive,
            agent,
        }) => {
            if message.is_none() && !interactive {
                anyhow::bail!("agent: pass -m <message> and/or -i");
            }
            let rt = bc_gateway::cli::load_runtime()?;
            commands::agent_chat(&rt, message, interactive, agent).await
        }
        Some(Command::Session(cmd)) => {
            let rt = bc_gateway::cli::load_runtime()?;
            commands::session(&rt, cmd)
        }
        Some(Command::Memory(cmd)) => {
            let rt = bc_gateway::cli::load_runtime()?;
            commands::memory(&rt, cmd)
        }
        Some(Command::Cron(cmd)) => {
            let rt = bc_gateway::cli::load_runtime()?;
            commands::cron(&rt, cmd)
        }
        Some(Command::Hooks(cmd)) => {
            let rt = bc_gateway::cli::load_runtime()?;
            commands::hooks(&rt, cmd)
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let rt = bc_gateway::cli::load_runtime()?;
            commands::config_show(&rt)
        }
        Some(Command::Config(ConfigCommand::Validate)) => commands::config_validate(),
        Some(Command::Version) => {
            println!("bashclaw {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bc_gateway=debug")),
        )
        .init();
}

async fn run_server(rt: Runtime) -> anyhow::Result<()> {
    let config = rt.config.snapshot();
    tracing::info!(
        state_dir = %rt.layout.root().display(),
        "bashclaw gateway starting"
    );

    rt.hooks
        .dispatch(HookEvent::GatewayStart, serde_json::json!({}))
        .await;

    // Scheduler.
    tokio::spawn(bc_gateway::scheduler::run_scheduler(rt.clone()));

    // Signals: SIGUSR1 reloads config; SIGTERM/SIGINT stop gracefully.
    spawn_signal_handlers(rt.clone());

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "gateway listening");

    let shutdown = rt.shutdown.clone();
    let app = bc_gateway::api::router(rt.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    // Grace window: let in-flight turns drain before exit.
    let grace = std::time::Duration::from_millis(config.gateway.shutdown_grace_ms);
    let deadline = std::time::Instant::now() + grace;
    while std::time::Instant::now() < deadline {
        let occupancy = rt.queue.lane_occupancy();
        if occupancy.values().sum::<usize>() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }

    rt.hooks
        .dispatch(HookEvent::GatewayStop, serde_json::json!({}))
        .await;
    tracing::info!("gateway stopped");
    Ok(())
}

fn spawn_signal_handlers(rt: Runtime) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let reload_rt = rt.clone();
        tokio::spawn(async move {
            let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
                return;
            };
            while usr1.recv().await.is_some() {
                match reload_rt.config.force_reload() {
                    Ok(_) => {
                        reload_rt.apply_config();
                        tracing::info!("SIGUSR1: config reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "SIGUSR1: config reload failed"),
                }
            }
        });

        let term_rt = rt.clone();
        tokio::spawn(async move {
            let Ok(mut term) = signal(SignalKind::terminate()) else {
                return;
            };
            if term.recv().await.is_some() {
                tracing::info!("SIGTERM: shutting down");
                term_rt.shutdown.trigger();
            }
        });
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("SIGINT: shutting down");
            rt.shutdown.trigger();
        }
    });
}
