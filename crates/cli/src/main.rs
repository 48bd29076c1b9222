// pqstep - add computed columns to Power Query queries
//
// The binary wires settings, the section-file gateway and the model client
// into `pqstep_cli` and maps outcomes to exit codes.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use pqstep_cli::ai::ModelGenerator;
use pqstep_cli::exit_codes::{
    patch_exit_code, tool_exit_code, EXIT_AI_DISABLED, EXIT_AI_KEYCHAIN_ERR, EXIT_AI_MISSING_KEY, EXIT_ERROR,
    EXIT_PATCH_NO_OP, EXIT_SUCCESS, EXIT_USAGE,
};
use pqstep_cli::server::McpServer;
use pqstep_cli::tool::{AddColumnOutcome, AddColumnRequest, ColumnTool, ToolError};
use pqstep_config::ai::{self, AIConfigStatus, AIDiagnostics, ResolvedAIConfig};
use pqstep_config::settings::{AIProvider, Settings};
use pqstep_engine::{patch, PatchError, PatchOutcome, PatchReport, StepName};
use pqstep_io::{DocumentError, SectionFileGateway};

#[derive(Parser)]
#[command(name = "pqstep")]
#[command(about = "Add computed columns to Power Query queries")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP tool server on stdin/stdout
    Serve,

    /// Add a column step to a query in the document
    #[command(after_help = "\
Examples:
  pqstep add-column 'Sales Status: High when Sales > 1000, else Low'
  pqstep add-column update --document book.pq --query Orders
  pqstep add-column 'Margin' --fragment 'Table.AddColumn(Source, \"Margin\", each [Sales] - [Cost])' --dry-run")]
    AddColumn {
        /// Instruction for the new column ("update" uses prompt.default)
        prompt: String,

        /// Column header (derived from the prompt when omitted)
        #[arg(long)]
        column: Option<String>,

        /// Query to modify (document.query when omitted)
        #[arg(long)]
        query: Option<String>,

        /// Document path (document.path when omitted)
        #[arg(long, env = "PQSTEP_DOCUMENT_PATH")]
        document: Option<PathBuf>,

        /// Splice this step expression instead of asking the model
        #[arg(long)]
        fragment: Option<String>,

        /// Patch the query but do not save the document
        #[arg(long)]
        dry_run: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the queries in the document
    ListQueries {
        /// Document path (document.path when omitted)
        #[arg(long, env = "PQSTEP_DOCUMENT_PATH")]
        document: Option<PathBuf>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Insert a step into a formula read from stdin
    #[command(after_help = "\
Reads a let ... in formula on stdin and writes the patched formula to stdout.

Examples:
  pqstep splice --step 'Added Margin' --fragment 'Table.AddColumn(Source, \"Margin\", each 1)' < query.m")]
    Splice {
        /// Name of the new step (bare or #\"quoted\")
        #[arg(long)]
        step: String,

        /// Step expression, inserted verbatim
        #[arg(long)]
        fragment: String,

        /// Print {status, formula} as JSON
        #[arg(long)]
        json: bool,
    },

    /// Model provider configuration
    #[command(subcommand)]
    Ai(AiCommands),
}

#[derive(Subcommand)]
enum AiCommands {
    /// Show the resolved provider configuration
    Doctor {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Store an API key in the system keychain (key read from stdin)
    SetKey {
        /// Provider name (anthropic, openai)
        provider: String,
    },

    /// Remove an API key from the system keychain
    DeleteKey {
        /// Provider name (anthropic, openai)
        provider: String,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("PQSTEP_COMMIT"), ")",
        "\nengine:  pqstep-engine ", env!("CARGO_PKG_VERSION"),
        "\nmcp:     ", "2024-11-05",
        "\ntarget:  ", env!("PQSTEP_TARGET"),
    )
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Commands::Serve => cmd_serve(),
        Commands::AddColumn {
            prompt,
            column,
            query,
            document,
            fragment,
            dry_run,
            json,
        } => cmd_add_column(
            AddColumnRequest {
                prompt,
                column,
                query,
                document,
                fragment,
                dry_run,
            },
            json,
        ),
        Commands::ListQueries { document, json } => cmd_list_queries(document, json),
        Commands::Splice { step, fragment, json } => cmd_splice(&step, &fragment, json),
        Commands::Ai(command) => match command {
            AiCommands::Doctor { json } => cmd_ai_doctor(json),
            AiCommands::SetKey { provider } => cmd_ai_set_key(&provider),
            AiCommands::DeleteKey { provider } => cmd_ai_delete_key(&provider),
        },
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Log to stderr; stdout carries command output and MCP traffic.
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pqstep=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    /// Exit with `code` without printing anything.
    pub fn silent(code: u8) -> Self {
        Self { code, message: String::new(), hint: None }
    }

    /// Create error from a tool error with the matching exit code.
    pub fn tool(err: ToolError) -> Self {
        let code = tool_exit_code(&err);
        let hint = match &err {
            ToolError::MissingDocumentPath => Some("pass --document <path>".to_string()),
            ToolError::Document(DocumentError::Locked { .. }) => {
                Some("close the other session or remove the stale .lock file".to_string())
            }
            ToolError::Document(DocumentError::QueryNotFound { .. }) => {
                Some("run `pqstep list-queries` to see the query names".to_string())
            }
            ToolError::Generate(pqstep_cli::ai::GenerateError::MissingKey) => {
                Some("run `pqstep ai set-key <provider>` or set the provider's API key variable".to_string())
            }
            ToolError::Patch(PatchError::StepNameCollision(_)) => {
                Some("pass a different --column to get a different step name".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    pub fn patch(err: &PatchError) -> Self {
        Self { code: patch_exit_code(err), message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn build_tool() -> ColumnTool<SectionFileGateway> {
    let settings = Settings::load();
    let generator = ModelGenerator::from_settings(settings.ai.clone());
    ColumnTool::new(settings, SectionFileGateway::new(), Box::new(generator))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// serve
// ============================================================================

fn cmd_serve() -> Result<(), CliError> {
    let server = McpServer::new(build_tool());
    let stdin = io::stdin();
    let stdout = io::stdout();
    server
        .run(stdin.lock(), stdout.lock())
        .map_err(|e| CliError::io(format!("MCP transport failed: {}", e)))
}

// ============================================================================
// add-column / list-queries
// ============================================================================

fn cmd_add_column(request: AddColumnRequest, json: bool) -> Result<(), CliError> {
    let tool = build_tool();
    let outcome = tool.add_column(&request).map_err(CliError::tool)?;

    if json {
        print_json(&outcome)?;
    } else {
        println!("{}", outcome.message());
    }

    match outcome {
        AddColumnOutcome::Added { .. } => Ok(()),
        AddColumnOutcome::UpToDate { .. } => Err(CliError::silent(EXIT_PATCH_NO_OP)),
    }
}

fn cmd_list_queries(document: Option<PathBuf>, json: bool) -> Result<(), CliError> {
    let tool = build_tool();
    let list = tool.list_queries(document.as_deref()).map_err(CliError::tool)?;

    if json {
        print_json(&list)
    } else {
        for name in &list.queries {
            println!("{}", name);
        }
        if list.queries.is_empty() {
            eprintln!("{}", list.message());
        }
        Ok(())
    }
}

// ============================================================================
// splice
// ============================================================================

fn cmd_splice(step: &str, fragment: &str, json: bool) -> Result<(), CliError> {
    let step = StepName::parse(step).ok_or_else(|| CliError::args(format!("invalid step name: {}", step)))?;

    let mut formula = String::new();
    io::stdin()
        .read_to_string(&mut formula)
        .map_err(|e| CliError::io(format!("failed to read stdin: {}", e)))?;

    let result = patch(&formula, &step, fragment);

    if json {
        print_json(&PatchReport::from_result(&result))?;
        return match result {
            Ok(PatchOutcome::Success(_)) => Ok(()),
            Ok(PatchOutcome::NoOp) => Err(CliError::silent(EXIT_PATCH_NO_OP)),
            Err(e) => Err(CliError::silent(patch_exit_code(&e))),
        };
    }

    match result {
        Ok(PatchOutcome::Success(patched)) => {
            write_stdout(&patched)?;
            Ok(())
        }
        Ok(PatchOutcome::NoOp) => {
            write_stdout(&formula)?;
            Err(CliError::silent(EXIT_PATCH_NO_OP))
        }
        Err(e) => Err(CliError::patch(&e)),
    }
}

fn write_stdout(text: &str) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .map_err(|e| CliError::io(format!("failed to write stdout: {}", e)))
}

// ============================================================================
// ai
// ============================================================================

fn cmd_ai_doctor(json: bool) -> Result<(), CliError> {
    let config = ResolvedAIConfig::load();
    let diag = AIDiagnostics::from_resolved(&config);

    if json {
        print_json(&diag.to_json())?;
    } else {
        print!("{}", diag);
        println!();
        println!("Config: {}", Settings::config_path_display());
    }

    match config.status {
        AIConfigStatus::Ready => Ok(()),
        AIConfigStatus::Disabled => Err(CliError::silent(EXIT_AI_DISABLED)),
        AIConfigStatus::MissingKey => Err(CliError::silent(EXIT_AI_MISSING_KEY)),
    }
}

fn provider_arg(name: &str) -> Result<AIProvider, CliError> {
    match AIProvider::from_name(name) {
        Some(provider) if provider.is_enabled() => Ok(provider),
        _ => Err(CliError::args(format!("unknown provider: {}", name)).with_hint("use anthropic or openai")),
    }
}

fn cmd_ai_set_key(provider: &str) -> Result<(), CliError> {
    let provider = provider_arg(provider)?;

    let mut key = String::new();
    io::stdin()
        .read_to_string(&mut key)
        .map_err(|e| CliError::io(format!("failed to read stdin: {}", e)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(CliError::args("no key on stdin"));
    }

    ai::set_api_key(provider.name(), key).map_err(|e| CliError {
        code: EXIT_AI_KEYCHAIN_ERR,
        message: e,
        hint: Some(format!("set {} instead", ai::env_var_name(provider.name()))),
    })?;
    eprintln!("Stored {} key in the system keychain", provider.name());
    Ok(())
}

fn cmd_ai_delete_key(provider: &str) -> Result<(), CliError> {
    let provider = provider_arg(provider)?;
    ai::delete_api_key(provider.name()).map_err(|e| CliError {
        code: EXIT_AI_KEYCHAIN_ERR,
        message: e,
        hint: None,
    })?;
    eprintln!("Removed {} key from the system keychain", provider.name());
    Ok(())
}
