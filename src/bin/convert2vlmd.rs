use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use vlmd_pipeline::config::{ConfigLoader, Environment, Overrides};
use vlmd_pipeline::convert::CommandConverter;
use vlmd_pipeline::domain::{DetectionStrategy, HdpId};
use vlmd_pipeline::error::VlmdError;
use vlmd_pipeline::layout::{StudyLayout, validate_study_dir};
use vlmd_pipeline::mds::{IdentityRequest, MdsHttpClient, NoPrompt, TitlePrompt, resolve_identity};
use vlmd_pipeline::output::{JsonOutput, OutputMode, TextOutput};
use vlmd_pipeline::pipeline::{PipelineOptions, StudyPipeline, validate_paths};
use vlmd_pipeline::progress::TracingSink;
use vlmd_pipeline::redcap::{RedcapCredentials, RedcapHttpClient, validate_file};

#[derive(Parser)]
#[command(name = "convert2vlmd")]
#[command(about = "Convert study data dictionaries to HEAL VLMD with provenance manifests")]
#[command(version)]
struct Cli {
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert every data dictionary of a clean study directory")]
    Convert(ConvertArgs),
    #[command(about = "Check a REDCap data dictionary against a REDCap project")]
    ValidateRedcap(ValidateRedcapArgs),
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("study")
        .required(true)
        .multiple(true)
        .args(["hdp_id", "appl_id"])
))]
struct ConvertArgs {
    /// Directory holding the cleaned data dictionaries.
    #[arg(long)]
    clean_study_directory: Utf8PathBuf,

    /// Root of the data dictionaries repository checkout.
    #[arg(long)]
    output_directory: Utf8PathBuf,

    #[arg(long)]
    hdp_id: Option<String>,

    #[arg(long)]
    appl_id: Option<String>,

    /// Study folder name; defaults to the HDP id.
    #[arg(long)]
    project: Option<String>,

    #[arg(long)]
    project_type: Option<String>,

    #[arg(long, value_enum)]
    strategy: Option<DetectionStrategy>,

    /// Converter command line, e.g. `vlmd` or `python -m vlmd`.
    #[arg(long)]
    converter: Option<String>,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    mds_url: Option<String>,

    /// Regenerate files that already have a manifest.
    #[arg(long)]
    overwrite: bool,

    /// Never prompt for a missing project title.
    #[arg(long)]
    non_interactive: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ValidateRedcapArgs {
    csv: Utf8PathBuf,

    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<VlmdError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &VlmdError) -> u8 {
    match error {
        VlmdError::InvalidHdpId(_)
        | VlmdError::InvalidFormat(_)
        | VlmdError::InvalidPath(_)
        | VlmdError::NotADirectory(_)
        | VlmdError::InvalidStudyDir(_)
        | VlmdError::ConfigRead(_)
        | VlmdError::ConfigParse(_)
        | VlmdError::MissingCredentials(_) => 2,
        VlmdError::LookupUnavailable(_)
        | VlmdError::LookupHttp(_)
        | VlmdError::LookupStatus { .. }
        | VlmdError::MissingTool(_)
        | VlmdError::RedcapHttp(_)
        | VlmdError::RedcapStatus { .. } => 3,
        _ => 1,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run() -> miette::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Convert(args) => run_convert(args),
        Commands::ValidateRedcap(args) => run_validate_redcap(args),
    }
}

fn run_convert(args: ConvertArgs) -> miette::Result<ExitCode> {
    validate_paths(&args.clean_study_directory, &args.output_directory)?;

    let hdp_id = args
        .hdp_id
        .as_deref()
        .map(str::parse::<HdpId>)
        .transpose()?;
    let appl_id = args
        .appl_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    let overrides = Overrides {
        mds_url: args.mds_url,
        project_type: args.project_type,
        strategy: args.strategy,
        converter: args.converter,
    };
    let config = ConfigLoader::resolve(
        args.config.as_deref(),
        &Environment::from_env(),
        &overrides,
    )?;
    if let Some(source) = &config.source {
        tracing::debug!(path = %source.display(), "loaded config");
    }

    let converter =
        CommandConverter::locate(&config.converter.program, config.converter.args.clone())?;
    tracing::debug!(program = %converter.program().display(), "using converter");

    let mds = MdsHttpClient::new(config.mds_url.clone())?;
    let interactive = !args.non_interactive && io::stdin().is_terminal();
    let prompt: &dyn TitlePrompt = if interactive { &StdinPrompt } else { &NoPrompt };
    let request = IdentityRequest {
        hdp_id,
        appl_id,
        project_type: config.project_type.clone(),
    };
    let sink = TracingSink;
    let identity = resolve_identity(&mds, request, prompt, &sink)?;

    let study_dir = match args.project.filter(|value| !value.trim().is_empty()) {
        Some(project) => validate_study_dir(&project)?.to_string(),
        None => identity.hdp_id.to_string(),
    };
    let layout = StudyLayout::new(args.output_directory, study_dir);
    let options = PipelineOptions {
        overwrite: args.overwrite,
        strategy: config.strategy,
        remote_base: config.remote_base_url.clone(),
        today: None,
    };
    let pipeline = StudyPipeline::new(converter, options);
    let summary = pipeline.run(&args.clean_study_directory, &layout, &identity, &sink)?;

    let mode = if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    match mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_summary(&summary).into_diagnostic()?,
    }
    Ok(ExitCode::SUCCESS)
}

fn run_validate_redcap(args: ValidateRedcapArgs) -> miette::Result<ExitCode> {
    let credentials = RedcapCredentials::from_env()?;
    let client = RedcapHttpClient::new(credentials)?;
    let result = validate_file(&client, &args.csv)?;
    if args.json {
        JsonOutput::print_redcap(&result).into_diagnostic()?;
    } else {
        TextOutput::print_redcap(&result).into_diagnostic()?;
    }
    if result.is_compliant() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

/// Asks the curator for a title the metadata service does not have.
struct StdinPrompt;

impl TitlePrompt for StdinPrompt {
    fn prompt_title(&self, hdp_id: &HdpId) -> Result<Option<String>, VlmdError> {
        let mut stderr = io::stderr();
        write!(
            stderr,
            "Project title not found for {hdp_id}. Enter it manually (blank keeps \"NOT FOUND\"): "
        )
        .and_then(|_| stderr.flush())
        .map_err(|err| VlmdError::Filesystem(err.to_string()))?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|err| VlmdError::Filesystem(err.to_string()))?;
        let title = line.trim();
        Ok((!title.is_empty()).then(|| title.to_string()))
    }
}
