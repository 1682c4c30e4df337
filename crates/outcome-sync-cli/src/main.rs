//! `outcome-sync` command line driver

mod settings;

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use outcome_sync_core::{
    AssignmentId, CourseId, Decision, EnrollmentId, GradeUpdateRequest, Mismatch, PassReport,
    Reconciler, RemoteClient, Roster, RubricTarget, SyncConfig, UnifiedGradeMutator, UserId,
};
use outcome_sync_http::HttpRemoteClient;
use settings::Settings;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit status when a pass or verification left drift behind
const EXIT_DRIFT: u8 = 2;

fn course_arg() -> Arg {
    Arg::new("course")
        .long("course")
        .required(true)
        .help("Course id")
}

fn assignment_arg() -> Arg {
    Arg::new("assignment")
        .long("assignment")
        .help("Assignment holding the rubric submissions")
}

fn cli() -> Command {
    Command::new("outcome-sync")
        .version(outcome_sync_core::VERSION)
        .about("Reconcile outcome averages with final grade overrides")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .default_value("outcome-sync.toml")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON on stderr"),
        )
        .subcommand(
            Command::new("enable")
                .about("Turn on final grade overrides for a course")
                .arg(course_arg()),
        )
        .subcommand(
            Command::new("analyze")
                .about("Print the students whose grades drifted")
                .arg(course_arg()),
        )
        .subcommand(
            Command::new("reconcile")
                .about("Run a full reconciliation pass")
                .arg(course_arg())
                .arg(assignment_arg().required(true))
                .arg(
                    Arg::new("association")
                        .long("association")
                        .required(true)
                        .help("Rubric association id"),
                )
                .arg(
                    Arg::new("criterion")
                        .long("criterion")
                        .required(true)
                        .help("Rubric criterion id"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check override grades against saved decisions")
                .arg(course_arg())
                .arg(assignment_arg())
                .arg(
                    Arg::new("decisions")
                        .long("decisions")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file with decisions from `analyze`"),
                ),
        )
        .subcommand(
            Command::new("apply")
                .about("Send one unified grade update")
                .arg(
                    Arg::new("request")
                        .long("request")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON file with a grade update request"),
                ),
        )
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("--{name} is required"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn drift_status(drifted: bool) -> ExitCode {
    if drifted {
        ExitCode::from(EXIT_DRIFT)
    } else {
        ExitCode::SUCCESS
    }
}

async fn enable(config: SyncConfig, course: &CourseId, client: &dyn RemoteClient) -> anyhow::Result<bool> {
    let reconciler = Reconciler::new(config);
    Ok(reconciler.overrides().enable_override(course, client).await?)
}

async fn analyze(
    config: SyncConfig,
    course: &CourseId,
    client: &dyn RemoteClient,
) -> anyhow::Result<Vec<Decision>> {
    let reconciler = Reconciler::new(config);
    let data = reconciler.analyzer().fetch_rollups(course, client).await?;
    Ok(reconciler.analyzer().analyze(&data, course, client).await?)
}

async fn reconcile(
    config: SyncConfig,
    course: &CourseId,
    assignment: &AssignmentId,
    target: &RubricTarget,
    client: &dyn RemoteClient,
) -> anyhow::Result<PassReport> {
    let reconciler = Reconciler::new(config);
    let data = reconciler.analyzer().fetch_rollups(course, client).await?;
    let roster = Roster::fetch(course, assignment, client).await?;
    Ok(reconciler
        .run_pass(course, &data, &roster, target, client)
        .await?)
}

async fn verify(
    config: SyncConfig,
    course: &CourseId,
    assignment: Option<&AssignmentId>,
    decisions: &[Decision],
    client: &dyn RemoteClient,
) -> anyhow::Result<Vec<Mismatch>> {
    let reconciler = Reconciler::new(config);
    let overrides = reconciler.overrides();
    let mismatches = match assignment {
        Some(assignment) => {
            let roster = Roster::fetch(course, assignment, client).await?;
            overrides
                .verify_convergence(course, decisions, &roster, client)
                .await?
        }
        None => {
            let unresolved: HashMap<UserId, EnrollmentId> = HashMap::new();
            overrides
                .verify_convergence(course, decisions, &unresolved, client)
                .await?
        }
    };
    Ok(mismatches)
}

async fn apply(
    config: SyncConfig,
    request: &GradeUpdateRequest,
    client: &dyn RemoteClient,
) -> anyhow::Result<()> {
    UnifiedGradeMutator::new(config)
        .apply_update(request, client)
        .await?;
    Ok(())
}

async fn run(matches: ArgMatches) -> anyhow::Result<ExitCode> {
    let config_path = matches
        .get_one::<PathBuf>("config")
        .context("--config is required")?;
    let settings = Settings::load(config_path)?;
    let client = HttpRemoteClient::new(&settings.client)?;
    let config = settings.sync;

    match matches.subcommand() {
        Some(("enable", args)) => {
            let course = CourseId::from(required(args, "course")?.as_str());
            let enabled = enable(config, &course, &client).await?;
            println!("final grade override enabled for course {course}: {enabled}");
            Ok(ExitCode::SUCCESS)
        }
        Some(("analyze", args)) => {
            let course = CourseId::from(required(args, "course")?.as_str());
            print_json(&analyze(config, &course, &client).await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(("reconcile", args)) => {
            let course = CourseId::from(required(args, "course")?.as_str());
            let assignment = AssignmentId::from(required(args, "assignment")?.as_str());
            let target = RubricTarget::new(
                required(args, "association")?.as_str(),
                required(args, "criterion")?.as_str(),
            );
            let report = reconcile(config, &course, &assignment, &target, &client).await?;
            print_json(&report)?;
            Ok(drift_status(!report.is_converged()))
        }
        Some(("verify", args)) => {
            let course = CourseId::from(required(args, "course")?.as_str());
            let assignment = args
                .get_one::<String>("assignment")
                .map(|a| AssignmentId::from(a.as_str()));
            let path = args
                .get_one::<PathBuf>("decisions")
                .context("--decisions is required")?;
            let decisions: Vec<Decision> = read_json(path)?;
            let mismatches =
                verify(config, &course, assignment.as_ref(), &decisions, &client).await?;
            print_json(&mismatches)?;
            Ok(drift_status(!mismatches.is_empty()))
        }
        Some(("apply", args)) => {
            let path = args
                .get_one::<PathBuf>("request")
                .context("--request is required")?;
            let request: GradeUpdateRequest = read_json(path)?;
            apply(config, &request, &client).await?;
            println!(
                "applied {:?} update for enrollment {}",
                request.action, request.enrollment_id
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => anyhow::bail!("unknown command"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();

    if let Err(e) = init_tracing(matches.get_flag("json-logs")) {
        eprintln!("failed to initialize logging: {e}");
    }

    match run(matches).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
