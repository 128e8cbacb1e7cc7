use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use rma_core::{CaseId, CaseQuery, DigestStatus, ScanSummary, STEP_TABLE};
use rma_monitor::{logging, Monitor, MonitorConfig};
use std::path::PathBuf;

fn parse_field(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected FIELD=VALUE, got '{s}'"))
}

fn field_arg() -> Arg {
    Arg::new("field")
        .long("field")
        .short('f')
        .action(ArgAction::Append)
        .value_parser(parse_field)
        .help("Case field as FIELD=VALUE (repeatable)")
}

fn case_id_arg() -> Arg {
    Arg::new("id")
        .required(true)
        .value_parser(value_parser!(CaseId))
        .help("Case id")
}

fn cli() -> Command {
    Command::new("rma-monitor")
        .version(rma_monitor::VERSION)
        .about("RMA lifecycle engine and SLA monitor")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to TOML configuration"),
        )
        .subcommand(Command::new("run").about("Run the daily SLA scheduler until Ctrl-C"))
        .subcommand(Command::new("check-overdues").about("Run one SLA scan now"))
        .subcommand(
            Command::new("open")
                .about("Open a new case")
                .arg(field_arg().required(true)),
        )
        .subcommand(
            Command::new("complete-step")
                .about("Complete a step and notify the customer")
                .arg(case_id_arg())
                .arg(
                    Arg::new("step")
                        .required(true)
                        .help("received, investigating, inProgress or dispatched"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Update descriptive fields")
                .arg(case_id_arg())
                .arg(field_arg().required(true)),
        )
        .subcommand(
            Command::new("archive")
                .about("Archive a case")
                .arg(case_id_arg())
                .arg(
                    Arg::new("undo")
                        .long("undo")
                        .action(ArgAction::SetTrue)
                        .help("Restore an archived case"),
                ),
        )
        .subcommand(
            Command::new("list")
                .about("List cases, newest first")
                .arg(Arg::new("search").long("search").short('s').help("Filter text"))
                .arg(
                    Arg::new("all")
                        .long("all")
                        .action(ArgAction::SetTrue)
                        .help("Include archived cases"),
                ),
        )
        .subcommand(Command::new("show").about("Show one case as JSON").arg(case_id_arg()))
        .subcommand(Command::new("sla").about("Print the SLA table"))
}

fn fields(args: &ArgMatches) -> Vec<(String, String)> {
    args.get_many::<(String, String)>("field")
        .map(|values| values.cloned().collect())
        .unwrap_or_default()
}

fn case_id(args: &ArgMatches) -> anyhow::Result<CaseId> {
    args.get_one::<CaseId>("id")
        .copied()
        .context("missing case id")
}

fn print_summary(summary: &ScanSummary) {
    println!(
        "Scanned {} case(s), {} overdue, {} skipped",
        summary.scanned,
        summary.report.len(),
        summary.skipped
    );
    print!("{}", summary.report.summary_text());
    match &summary.digest {
        DigestStatus::NotNeeded => println!("No digest needed"),
        DigestStatus::Sent => println!("Digest sent"),
        DigestStatus::Failed(e) => println!("Digest failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    if let Some(("sla", _)) = matches.subcommand() {
        println!("SLA (days per step):");
        for spec in &STEP_TABLE {
            println!("  - {}: {} days", spec.sla_window, spec.sla_days);
        }
        return Ok(());
    }

    let config = MonitorConfig::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .context("loading configuration")?;
    logging::init_tracing(config.json_logs);
    let monitor = Monitor::open(config).await.context("opening case store")?;

    match matches.subcommand() {
        Some(("run", _)) => {
            let (scheduler, _trigger) = monitor.scheduler()?;
            scheduler
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                })
                .await;
        }
        Some(("check-overdues", _)) => {
            let summary = monitor.detector().run().await?;
            print_summary(&summary);
        }
        Some(("open", args)) => {
            let case = monitor.intake().open_case(fields(args)).await?;
            println!("Opened {} ({})", case.rma_number, case.id);
        }
        Some(("complete-step", args)) => {
            let id = case_id(args)?;
            let step = args.get_one::<String>("step").context("missing step")?;
            let result = monitor.engine().complete_step(id, step).await?;
            println!("{} {}: {:?}", result.case.rma_number, result.step, result.outcome);
        }
        Some(("update", args)) => {
            let case = monitor.engine().update_fields(case_id(args)?, fields(args)).await?;
            println!("Updated {} ({})", case.rma_number, case.revision);
        }
        Some(("archive", args)) => {
            let archived = !args.get_flag("undo");
            let case = monitor.intake().set_archived(case_id(args)?, archived).await?;
            println!("{} archived: {}", case.rma_number, case.archived);
        }
        Some(("list", args)) => {
            let mut query = CaseQuery::new();
            if let Some(term) = args.get_one::<String>("search") {
                query = query.search(term.clone());
            }
            if args.get_flag("all") {
                query = query.with_archived();
            }
            for case in monitor.intake().list_cases(&query).await? {
                let pending = case
                    .pending_step()
                    .map_or("complete", |step| step.display_name());
                println!(
                    "{}  {}  {}  {}  pending: {}",
                    case.id,
                    case.rma_number,
                    case.created_at.format("%Y-%m-%d"),
                    case.field(rma_core::CaseField::SerialNumber),
                    pending
                );
            }
        }
        Some(("show", args)) => {
            let case = monitor.intake().get_case(case_id(args)?).await?;
            println!("{}", serde_json::to_string_pretty(&case)?);
        }
        Some((other, _)) => anyhow::bail!("unknown command '{other}'"),
        None => anyhow::bail!("no command given"),
    }

    Ok(())
}
