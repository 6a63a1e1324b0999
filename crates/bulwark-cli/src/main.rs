use anyhow::Context;
use bulwark_core::action::Action;
use bulwark_core::config::BulwarkConfig;
use bulwark_core::contract::{ContractBuilder, Goal};
use bulwark_core::executor::SandboxExecutor;
use bulwark_core::risk::SafetyGate;
use bulwark_core::verification::{VerificationPipeline, VerificationStrategy};
use bulwark_sandbox::{RollbackStack, Sandbox};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod output;

/// Bulwark CLI - Sandbox, rischio e verifica per agenti di codice
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Radice del repository su cui operare
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    root: PathBuf,

    /// File di configurazione (TOML o JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log dettagliati (DEBUG, con target)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output in formato JSON per integrazioni
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Valuta il rischio di un comando shell
    Assess {
        command: String,
    },

    /// Esegue un comando nel sandbox, dopo il safety gate
    Run {
        command: String,
        /// Timeout in secondi (default da configurazione)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Legge un file, opzionalmente solo un intervallo di righe
    Read {
        path: String,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        end: Option<usize>,
    },

    /// Cerca una regex nei file del repository
    Grep {
        pattern: String,
        #[arg(short, long)]
        glob: Option<String>,
        #[arg(short = 'i', long)]
        ignore_case: bool,
        /// Numero massimo di risultati (0 = da configurazione)
        #[arg(short, long, default_value_t = 0)]
        max: usize,
    },

    /// Elenca i file che corrispondono a un glob
    Find {
        #[arg(short, long)]
        glob: Option<String>,
        /// Pattern aggiuntivi da ignorare
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },

    /// Mostra la struttura delle directory
    Tree {
        #[arg(short, long, default_value_t = 3)]
        depth: usize,
    },

    /// Introspezione git in sola lettura
    Git {
        #[command(subcommand)]
        command: GitCommands,
    },

    /// Esegue la pipeline di verifica su un file
    Verify {
        path: String,
        /// minimal | standard | thorough | maximum (default: dal rischio)
        #[arg(short, long)]
        strategy: Option<VerificationStrategy>,
        /// Intento da confrontare con la modifica
        #[arg(short, long, default_value = "")]
        goal: String,
    },

    /// Gestisce il Rollback Stack
    Rollback {
        #[command(subcommand)]
        command: RollbackCommands,
    },

    /// Costruisce un contratto da un obiettivo e ne verifica lo stato
    Contract {
        /// Riassunto dell'obiettivo
        goal: String,
        #[arg(long, default_value = "create")]
        verb: String,
        /// function | class | file | test
        #[arg(long)]
        target: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        test_command: Option<String>,
    },
}

#[derive(Subcommand)]
enum GitCommands {
    Status,
    Diff {
        #[arg(long)]
        staged: bool,
    },
    Log {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Subcommand)]
enum RollbackCommands {
    /// Azioni ancora annullabili, dalla più recente
    List,
    /// Annulla l'ultima azione
    Last,
    /// Rimuove le voci completate più vecchie di N giorni
    Prune {
        #[arg(long)]
        days: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let json = cli.json;
    tracing::debug!(root = %cli.root.display(), "bulwark starting");

    match cli.command {
        Commands::Assess { command } => {
            let gate = SafetyGate::new();
            let assessment = gate.classifier().assess(&command);
            let blocked = gate.check(&command).err().map(|e| e.to_string());
            output::assessment(&assessment, blocked.as_deref(), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { command, timeout } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let out = sandbox
                .run_command(&command, timeout.map(Duration::from_secs))
                .await?;
            output::command(&out, json)?;
            Ok(exit_code(out.exit_code))
        }
        Commands::Read { path, start, end } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let text = sandbox.read(&path, start, end)?;
            output::text(&path, &text, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Grep {
            pattern,
            glob,
            ignore_case,
            max,
        } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let matches = sandbox.grep(&pattern, glob.as_deref(), ignore_case, max)?;
            output::grep(&matches, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Find { glob, ignore } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let files = sandbox.find_files(glob.as_deref(), &ignore)?;
            output::lines(&files, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tree { depth } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let tree = sandbox.structure(depth, &[])?;
            output::tree(&tree, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Git { command } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            match command {
                GitCommands::Status => output::git_status(&sandbox.git_status().await?, json)?,
                GitCommands::Diff { staged } => output::text("diff", &sandbox.git_diff(staged).await?, json)?,
                GitCommands::Log { count } => output::commits(&sandbox.recent_commits(count).await?, json)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { path, strategy, goal } => {
            let sandbox = Arc::new(open_sandbox(&cli.root, &config)?);
            let content = sandbox.read(&path, None, None)?;
            let action = Action::write(path.clone(), content).with_description(format!("Verify {}", path));
            let strategy = strategy.unwrap_or_else(|| {
                let level = sandbox.gate().classifier().assess_action(&action).level;
                VerificationStrategy::for_risk(level)
            });

            let executor: Arc<dyn SandboxExecutor> = sandbox.clone();
            let pipeline = VerificationPipeline::new(executor, &config.verification);
            let result = pipeline.verify_default(&action, &goal, strategy).await;
            output::verification(&result, json)?;
            Ok(if result.overall_passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Rollback { command } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let mut stack = RollbackStack::open(&sandbox, &config.rollback)?;
            match command {
                RollbackCommands::List => {
                    output::rollback_entries(&stack.pending(), json)?;
                    Ok(ExitCode::SUCCESS)
                }
                RollbackCommands::Last => {
                    let outcome = stack.rollback_last(&sandbox).await;
                    output::rollback_outcome(&outcome, json)?;
                    Ok(if outcome.success {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
                RollbackCommands::Prune { days } => {
                    let removed = stack.prune_completed(days.unwrap_or(config.rollback.retention_days))?;
                    output::pruned(removed, json)?;
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        Commands::Contract {
            goal,
            verb,
            target,
            file,
            name,
            test_command,
        } => {
            let sandbox = open_sandbox(&cli.root, &config)?;
            let mut goal = Goal::new(goal, verb, target);
            goal.target_file = file;
            goal.name = name;
            goal.test_command = test_command;

            let mut contract = ContractBuilder::new().build(&goal);
            contract.activate()?;
            let fulfilled = contract.settle(&sandbox).await?;
            let gap = if fulfilled { None } else { Some(contract.build_gap_contract()?) };
            output::contract(&contract, gap.as_ref(), json)?;
            Ok(if fulfilled { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BulwarkConfig> {
    let config = match path {
        Some(path) => BulwarkConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => BulwarkConfig::default(),
    };
    Ok(config.from_env()?)
}

fn open_sandbox(root: &Path, config: &BulwarkConfig) -> anyhow::Result<Sandbox> {
    Sandbox::new(root, config.sandbox.clone()).with_context(|| format!("opening sandbox at {}", root.display()))
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}
