use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

mod app;
mod attachment;
mod config;
mod controller;
mod error;
mod gemini;
mod handler;
mod logging;
mod session;
mod tui;
mod ui;

use app::App;
use attachment::FileBlob;
use config::{mask_key, Config};
use controller::{Controller, Role};
use gemini::GeminiSessionFactory;

#[derive(Parser)]
#[command(name = "vision-chat")]
#[command(version, about = "Chat with Gemini from the terminal, with image attachments")]
struct Cli {
    /// Model to use for this run (overrides the config file)
    #[arg(short, long, global = true, env = "VISION_CHAT_MODEL")]
    model: Option<String>,

    /// Write logs here instead of the cache directory
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive chat (default)
    Chat,
    /// Send a single message and print the reply
    Ask {
        /// Message text
        prompt: String,
        /// Image to attach
        #[arg(short, long)]
        image: Option<PathBuf>,
    },
    /// Show or update the configuration file
    Config {
        /// Persist the default model
        #[arg(long)]
        set_model: Option<String>,
        /// Persist the API key
        #[arg(long)]
        set_api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Chat);
    let repairing = matches!(command, Commands::Config { .. });

    let log_path = cli.log_file.clone().unwrap_or_else(logging::default_log_path);
    let _log_guard = match logging::init(&log_path) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("warning: logging disabled: {err:#}");
            None
        }
    };

    let config = load_config(&Config::get_config_path()?, repairing)?;
    let model = cli
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| config.model().to_string());

    match command {
        Commands::Chat => run_chat(&config, &model).await,
        Commands::Ask { prompt, image } => ask(&config, &model, prompt, image).await,
        Commands::Config { set_model, set_api_key } => show_config(config, set_model, set_api_key, &log_path),
    }
}

/// Load the config file. With `lenient`, an unreadable file is reported and
/// replaced by defaults so `config --set-*` can rewrite it.
fn load_config(path: &Path, lenient: bool) -> Result<Config> {
    match Config::load_from(path) {
        Ok(config) => Ok(config),
        Err(err) if lenient => {
            tracing::warn!(error = %format!("{err:#}"), "ignoring unreadable config file");
            eprintln!("warning: {err:#}; using defaults");
            Ok(Config::new())
        }
        Err(err) => Err(err),
    }
}

/// Build a controller and try to open the session. Failures are kept in the
/// controller's error so the caller decides how to show them.
fn start_controller(config: &Config, model: &str) -> Controller {
    let factory = GeminiSessionFactory::from_config(config);
    let mut controller = Controller::new();
    if let Err(err) = controller.initialize_session(&factory, config.resolve_api_key().as_deref(), model) {
        tracing::error!(error = %err, "chat session unavailable");
    }
    controller
}

async fn run_chat(config: &Config, model: &str) -> Result<()> {
    let controller = start_controller(config, model);
    let mut app = App::new(controller, model, config.key_source());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let tx = events.sender();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event, &tx).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

async fn ask(config: &Config, model: &str, prompt: String, image: Option<PathBuf>) -> Result<()> {
    let mut controller = start_controller(config, model);
    if let Some(message) = controller.last_error() {
        bail!("{message}");
    }

    if let Some(path) = image {
        let staged = match FileBlob::from_path(&path).await {
            Ok(blob) => controller.stage_attachment(blob),
            Err(err) => Err(err),
        };
        if let Err(err) = staged {
            bail!("{err}");
        }
    }

    controller.set_text(prompt);
    if !controller.submit().await {
        bail!("nothing to send: give a message or an image");
    }

    match controller.messages().last() {
        Some(reply) if reply.role == Role::Model => {
            println!("{}", reply.text);
            Ok(())
        }
        _ => bail!(
            "{}",
            controller.last_error().unwrap_or("no reply received")
        ),
    }
}

fn show_config(
    mut config: Config,
    set_model: Option<String>,
    set_api_key: Option<String>,
    log_path: &Path,
) -> Result<()> {
    let path = Config::get_config_path()?;

    if set_model.is_some() || set_api_key.is_some() {
        if let Some(model) = set_model {
            config.model = Some(model);
        }
        if let Some(key) = set_api_key {
            config.api_key = Some(key);
        }
        config.save()?;
        tracing::info!(path = %path.display(), "configuration saved");
        println!("Saved {}", path.display());
    }

    let key = match (config.resolve_api_key(), config.key_source()) {
        (Some(key), Some(source)) => format!("{} ({})", mask_key(&key), source),
        _ => "not set".to_string(),
    };

    println!("Config file:  {}", path.display());
    println!("Log file:     {}", log_path.display());
    println!("Model:        {}", config.model());
    println!("API key:      {}", key);
    println!("Base URL:     {}", config.base_url());
    println!("Timeout:      {}s", config.request_timeout().as_secs());
    if let Some(instruction) = config.system_instruction() {
        println!("Instruction:  {}", instruction);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broken_config_is_fatal_except_for_config_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(load_config(&path, false).is_err());
        assert_eq!(load_config(&path, true).unwrap(), Config::new());
    }

    #[test]
    fn test_repaired_config_can_be_saved_over_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut config = load_config(&path, true).unwrap();
        config.api_key = Some("fresh-key".to_string());
        config.save_to(&path).unwrap();

        let loaded = load_config(&path, false).unwrap();
        assert_eq!(loaded.api_key.as_deref(), Some("fresh-key"));
    }

    #[test]
    fn test_cli_parses_config_flags() {
        let cli = Cli::try_parse_from(["vision-chat", "config", "--set-api-key", "k"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config { set_api_key: Some(ref key), .. }) if key == "k"
        ));
    }
}
