//! Command-line interface parsing and handling
//!
//! This module parses command-line arguments and dispatches to the chat
//! loop, the one-shot `say` command, or the history maintenance commands.

pub mod chat;
pub mod provider_list;
pub mod say;
pub mod set_default;
pub mod transfer;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::config::Config;
use crate::core::context::ChatContext;
use crate::core::providers::ProviderKind;
use crate::utils::logging;

#[derive(Parser)]
#[command(name = "confab")]
#[command(about = "A multi-provider AI chat client for the terminal")]
#[command(
    long_about = "Confab is a line-oriented chat client for OpenAI, Anthropic and Gemini models. \
Replies stream as they arrive, conversations are kept in a local history, and token usage \
and cost are recorded per reply.\n\n\
Environment Variables (fallback if not set in the config file):\n\
  OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY\n\
  OPENAI_API_ENDPOINT, ANTHROPIC_API_ENDPOINT   Custom API base URLs\n\
  CONFAB_LOG                                    Log filter (default: warn)\n\n\
Chat commands:\n\
  /new [provider [model]]   Start a new conversation\n\
  /list                     List conversations\n\
  /switch <n|id>            Switch to another conversation\n\
  /delete <n|id>            Delete a conversation\n\
  /title <text>             Rename the current conversation\n\
  /provider <name> [model]  Change provider/model for the current conversation\n\
  /quit                     Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model for new conversations
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Provider for new conversations (openai, anthropic, gemini)
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<ProviderKind>,

    /// Append diagnostic logs to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Read configuration from this file instead of the platform default
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat loop (default)
    Chat,
    /// Send one prompt and print the reply without saving it
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// List stored conversations
    List,
    /// Write every conversation to a JSON file
    Export { file: PathBuf },
    /// Replace all conversations with those in a JSON export
    Import { file: PathBuf },
    /// Delete every stored conversation
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Show providers, endpoints and whether an API key is available
    Providers,
    /// Save the default provider, and optionally model, for new conversations
    SetDefault {
        #[arg(value_name = "PROVIDER")]
        default_provider: ProviderKind,
        /// Omit to fall back to the provider's built-in default model
        #[arg(value_name = "MODEL")]
        default_model: Option<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    logging::init(args.log.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;
    if let Err(err) = runtime.block_on(async_main(args)) {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            let context = ChatContext::from_config(config)?;
            chat::run_chat(context, args.provider, args.model).await
        }
        Commands::Say { prompt } => {
            let context = ChatContext::ephemeral(config);
            say::run_say(context, prompt, args.provider, args.model).await
        }
        Commands::List => transfer::list_conversations(&ChatContext::from_config(config)?).await,
        Commands::Export { file } => transfer::export(&ChatContext::from_config(config)?, &file).await,
        Commands::Import { file } => transfer::import(&ChatContext::from_config(config)?, &file).await,
        Commands::Clear { yes } => transfer::clear(&ChatContext::from_config(config)?, yes).await,
        Commands::Providers => {
            print!("{}", provider_list::render_provider_table(&config, |name| std::env::var(name).ok()));
            Ok(())
        }
        Commands::SetDefault {
            default_provider,
            default_model,
        } => {
            let path = match args.config {
                Some(path) => path,
                None => Config::default_config_path()?,
            };
            set_default::set_default(&path, default_provider, default_model.as_deref())
        }
    }
}
