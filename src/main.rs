use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use cronhub::config::HubSettings;
use cronhub::doctor::{CheckStatus, HubDoctor};
use cronhub::ops::config::AppRegistry;
use cronhub::ops::dashboard::{render_output, CronDashboard};
use cronhub::ops::server::{self, AppState};
use cronhub::ops::settings::{SettingsUpdate, SettingsWriter};
use cronhub::ops::shell::{Controller, ControllerCommand, ProcessController};
use cronhub::ops::Scope;
use std::path::PathBuf;
use std::sync::Arc;

fn app_arg() -> Arg {
    Arg::new("app")
        .short('a')
        .long("app")
        .help("Application id to scope to (default: all)")
}

fn cli() -> Command {
    Command::new("cronhub")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cron status dashboard for the Intelligence Hub")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .global(true)
                .help("Path to hub.toml (default: ~/.cronhub/hub.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug logging"),
        )
        .subcommand(
            Command::new("serve")
                .about("Serve the dashboard HTTP endpoints")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_parser(value_parser!(u16)),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Show cron status per server")
                .arg(app_arg())
                .arg(
                    Arg::new("refresh")
                        .long("refresh")
                        .action(ArgAction::SetTrue)
                        .help("Ignore the cache"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the snapshot as JSON"),
                ),
        )
        .subcommand(Command::new("apps").about("List configured applications"))
        .subcommand(
            Command::new("list")
                .about("List scheduled tasks")
                .arg(app_arg()),
        )
        .subcommand(
            Command::new("logs")
                .about("Show recent cron logs")
                .arg(app_arg())
                .arg(
                    Arg::new("lines")
                        .short('n')
                        .long("lines")
                        .value_parser(value_parser!(u32)),
                ),
        )
        .subcommand(
            Command::new("crontab")
                .about("Show the generated crontab")
                .arg(app_arg()),
        )
        .subcommand(Command::new("sync").about("Sync schedules across all applications"))
        .subcommand(Command::new("coordinate").about("Re-coordinate schedules to avoid overlap"))
        .subcommand(
            Command::new("settings")
                .about("Update settings for one application")
                .arg(Arg::new("id").required(true))
                .arg(
                    Arg::new("auto-sync")
                        .long("auto-sync")
                        .value_parser(value_parser!(bool)),
                )
                .arg(
                    Arg::new("coordination")
                        .long("coordination")
                        .value_parser(value_parser!(bool)),
                )
                .arg(
                    Arg::new("priority")
                        .long("priority")
                        .value_parser(value_parser!(u8))
                        .help("1 (highest) to 5"),
                )
                .arg(Arg::new("path").long("path").help("Local apps only"))
                .arg(Arg::new("api-url").long("api-url").help("Remote apps only"))
                .arg(Arg::new("api-key").long("api-key").help("Remote apps only")),
        )
        .subcommand(Command::new("doctor").about("Check controller, registry and cache"))
}

fn init_tracing(verbose: bool, serving: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if serving {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let matches = cli().get_matches();
    init_tracing(
        matches.get_flag("verbose"),
        matches.subcommand_name() == Some("serve"),
    );

    if let Err(e) = run(&matches).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

fn scope_of(sub: &ArgMatches) -> anyhow::Result<Scope> {
    Ok(Scope::parse(
        sub.get_one::<String>("app").map(String::as_str),
    )?)
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut settings = HubSettings::load(config_path.as_deref())?;
    settings.apply_env_overrides();

    let controller = Arc::new(ProcessController::new(
        settings.controller.clone(),
        settings.fetch_timeout(),
    ));
    let dashboard = Arc::new(CronDashboard::new(
        settings.apps_config.clone(),
        controller.clone(),
        settings.build_cache(),
    ));

    match matches.subcommand() {
        Some(("serve", sub)) => {
            let port = sub.get_one::<u16>("port").copied().unwrap_or(settings.port);
            let state = AppState {
                dashboard,
                controller,
                apps_config: settings.apps_config.clone(),
                default_log_lines: settings.default_log_lines,
            };
            server::start_server(&settings.bind, port, state).await?;
        }
        Some(("status", sub)) => {
            let scope = scope_of(sub)?;
            if sub.get_flag("refresh") {
                dashboard.invalidate(&scope);
            }
            let snapshot = dashboard.status(&scope);
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", snapshot.render_text());
            }
        }
        Some(("apps", _)) => {
            let registry = AppRegistry::load(&settings.apps_config);
            if registry.is_empty() {
                println!(
                    "⚠️  No applications configured in {}",
                    settings.apps_config.display()
                );
            }
            for app in registry.by_priority() {
                println!(
                    "[P{}] {} - {} ({}) {:?}{}{}",
                    app.priority,
                    app.id,
                    app.name,
                    app.domain,
                    app.connection_type,
                    if app.auto_sync { " auto-sync" } else { "" },
                    if app.coordination { " coordinated" } else { "" },
                );
            }
        }
        Some(("list", sub)) => {
            let command = ControllerCommand::List {
                server: scope_of(sub)?.server().map(str::to_string),
            };
            print!("{}", render_output(controller.run(&command)));
        }
        Some(("logs", sub)) => {
            let lines = sub
                .get_one::<u32>("lines")
                .copied()
                .unwrap_or(settings.default_log_lines);
            let command = ControllerCommand::Logs {
                server: scope_of(sub)?.server().map(str::to_string),
                lines: Some(lines),
            };
            print!("{}", render_output(controller.run(&command)));
        }
        Some(("crontab", sub)) => {
            let command = ControllerCommand::Crontab {
                server: scope_of(sub)?.server().map(str::to_string),
            };
            print!("{}", render_output(controller.run(&command)));
        }
        Some(("sync", _)) => {
            print!("{}", render_output(controller.run(&ControllerCommand::Sync)));
        }
        Some(("coordinate", _)) => {
            print!(
                "{}",
                render_output(controller.run(&ControllerCommand::Coordinate))
            );
        }
        Some(("settings", sub)) => {
            let id = sub
                .get_one::<String>("id")
                .ok_or_else(|| anyhow::anyhow!("Application id is required"))?;
            let update = SettingsUpdate {
                auto_sync: sub.get_one::<bool>("auto-sync").copied(),
                coordination: sub.get_one::<bool>("coordination").copied(),
                priority: sub.get_one::<u8>("priority").copied(),
                path: sub.get_one::<String>("path").cloned(),
                api_url: sub.get_one::<String>("api-url").cloned(),
                api_key: sub.get_one::<String>("api-key").cloned(),
            };
            if update.is_empty() {
                anyhow::bail!("Nothing to update; pass at least one setting");
            }
            let app = SettingsWriter::apply(&settings.apps_config, id, &update)?;
            println!(
                "✅ Saved {}: priority {}, auto-sync {}, coordination {}",
                app.id, app.priority, app.auto_sync, app.coordination
            );
        }
        Some(("doctor", _)) => {
            let report = HubDoctor::new().run(&settings);
            for check in &report.checks {
                let icon = match check.status {
                    CheckStatus::Pass => "✅",
                    CheckStatus::Warning => "⚠️ ",
                    CheckStatus::Fail => "❌",
                };
                println!("{} {}: {}", icon, check.name, check.message);
            }
            if report.overall_health == CheckStatus::Fail {
                std::process::exit(1);
            }
        }
        _ => {
            cli().print_help()?;
            println!();
        }
    }

    Ok(())
}
