use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use pop_partition::logging::{init_logging, parse_level};
use pop_partition::{ClusterScheme, PartitionScheme, Pipeline, PipelineConfig, TieBreak};
use std::path::{Path, PathBuf};

/// Population partitioning CLI
///
/// Prepares a population directory (people.csv, locations.csv, visits.csv)
/// for a distributed run:
/// - heuristics: per-location occupancy
/// - partition: load-balanced location layout
/// - cluster: affinity clustering of locations and people
/// - contiguous: dense ids
/// - validate: integrity and baseline checks

fn main() {
    let matches = create_cli().get_matches();

    if let Err(e) = run_command(matches) {
        eprintln!("Error: {}", e);
        let code = e
            .downcast_ref::<pop_partition::Error>()
            .map(|e| e.error_code().abs())
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn dir_arg() -> Arg {
    Arg::new("dir")
        .help("Population directory")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .index(1)
}

fn out_arg() -> Arg {
    Arg::new("out")
        .help("Output directory (defaults to the input directory)")
        .long("out")
        .short('o')
        .value_parser(value_parser!(PathBuf))
}

fn tasks_arg() -> Arg {
    Arg::new("num-tasks")
        .help("Worker pool size")
        .long("num-tasks")
        .value_parser(value_parser!(usize))
}

fn merge_partitions_arg() -> Arg {
    Arg::new("num-merge-partitions")
        .help("Key-range shards per table when joining")
        .long("num-merge-partitions")
        .value_parser(value_parser!(usize))
}

fn create_cli() -> Command {
    Command::new("pop-partition")
        .about("Partition and remap a synthetic population for distributed simulation")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(Arg::new("config")
            .help("JSON pipeline configuration")
            .long("config")
            .global(true)
            .value_parser(value_parser!(PathBuf)))
        .arg(Arg::new("log-level")
            .help("Log level (trace, debug, info, warn, error)")
            .long("log-level")
            .global(true)
            .default_value("info"))
        .arg(Arg::new("json-logs")
            .help("Emit logs as JSON")
            .long("json-logs")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand(
            Command::new("heuristics")
                .about("Compute total_visits and max_simultaneous_visits per location")
                .arg(dir_arg())
                .arg(out_arg())
                .arg(tasks_arg())
                .arg(Arg::new("tie-break")
                    .help("Order of an end and a start at the same time")
                    .long("tie-break")
                    .value_parser(["end-before-start", "start-before-end"]))
        )
        .subcommand(
            Command::new("partition")
                .about("Lay out locations in load-balanced contiguous partitions")
                .arg(dir_arg())
                .arg(Arg::new("num-partitions")
                    .help("Number of partitions")
                    .short('n')
                    .long("num-partitions")
                    .value_parser(value_parser!(usize)))
                .arg(Arg::new("scheme")
                    .help("Partitioning algorithm")
                    .long("scheme")
                    .value_parser(["folding", "linear-cut"]))
                .arg(Arg::new("load-col")
                    .help("Column balanced across partitions")
                    .long("load-col"))
                .arg(Arg::new("group-col")
                    .help("Fold rows matching the group pattern in this column separately")
                    .long("group-col"))
                .arg(out_arg())
                .arg(tasks_arg())
                .arg(merge_partitions_arg())
        )
        .subcommand(
            Command::new("cluster")
                .about("Cluster locations by affinity and assign people to the clusters")
                .arg(dir_arg())
                .arg(Arg::new("locations")
                    .help("Location clustering scheme")
                    .long("locations")
                    .value_parser(["visit", "geo"]))
                .arg(Arg::new("partitions")
                    .help("Number of location clusters")
                    .long("partitions")
                    .value_parser(value_parser!(usize)))
                .arg(Arg::new("people-capacity")
                    .help("Maximum people per cluster")
                    .long("people-capacity")
                    .value_parser(value_parser!(usize)))
                .arg(Arg::new("seed")
                    .help("Seed for picking cluster starting points")
                    .long("seed")
                    .value_parser(value_parser!(u64)))
                .arg(out_arg())
                .arg(merge_partitions_arg())
        )
        .subcommand(
            Command::new("contiguous")
                .about("Renumber people and locations densely from 0")
                .arg(dir_arg())
                .arg(out_arg())
                .arg(merge_partitions_arg())
        )
        .subcommand(
            Command::new("validate")
                .about("Check ids, references and offsets, optionally against a baseline")
                .arg(dir_arg())
                .arg(Arg::new("baseline")
                    .help("CSV of per-location baseline metrics")
                    .long("baseline")
                    .value_parser(value_parser!(PathBuf)))
                .arg(Arg::new("strict")
                    .help("Fail on the first integrity problem")
                    .long("strict")
                    .action(ArgAction::SetTrue))
                .arg(merge_partitions_arg())
                .arg(tasks_arg())
        )
}

fn load_config(matches: &ArgMatches) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    Ok(match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    })
}

/// Flags shared by several subcommands.
fn apply_common(config: &mut PipelineConfig, matches: &ArgMatches) {
    if let Some(&tasks) = matches.try_get_one::<usize>("num-tasks").ok().flatten() {
        config.join.num_workers = tasks;
        config.occupancy.num_workers = tasks;
    }
    if let Some(&parts) = matches.try_get_one::<usize>("num-merge-partitions").ok().flatten() {
        config.join.num_partitions = parts;
    }
}

fn dirs(matches: &ArgMatches) -> Result<(PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let input = matches
        .get_one::<PathBuf>("dir")
        .ok_or("missing population directory")?
        .clone();
    let output = matches
        .try_get_one::<PathBuf>("out")
        .ok()
        .flatten()
        .cloned()
        .unwrap_or_else(|| input.clone());
    Ok((input, output))
}

fn run_command(matches: ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    let level = parse_level(
        matches
            .get_one::<String>("log-level")
            .map(String::as_str)
            .unwrap_or("info"),
    )?;
    init_logging(level, matches.get_flag("json-logs"))?;
    let mut config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("heuristics", sub)) => cmd_heuristics(&mut config, sub),
        Some(("partition", sub)) => cmd_partition(&mut config, sub),
        Some(("cluster", sub)) => cmd_cluster(&mut config, sub),
        Some(("contiguous", sub)) => cmd_contiguous(&mut config, sub),
        Some(("validate", sub)) => cmd_validate(&mut config, sub),
        _ => Err("unknown subcommand".into()),
    }
}

fn cmd_heuristics(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    apply_common(config, matches);
    if let Some(tb) = matches.get_one::<String>("tie-break") {
        config.occupancy.tie_break = match tb.as_str() {
            "start-before-end" => TieBreak::StartBeforeEnd,
            _ => TieBreak::EndBeforeStart,
        };
    }
    let (input, output) = dirs(matches)?;
    let summary = Pipeline::new(config.clone())?.heuristics(&input, &output)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_partition(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    apply_common(config, matches);
    if let Some(&n) = matches.get_one::<usize>("num-partitions") {
        config.planner.num_partitions = n;
    }
    if let Some(scheme) = matches.get_one::<String>("scheme") {
        config.planner.scheme = match scheme.as_str() {
            "linear-cut" => PartitionScheme::LinearCut,
            _ => PartitionScheme::Folding,
        };
    }
    if let Some(col) = matches.get_one::<String>("load-col") {
        config.planner.load_column = col.clone();
    }
    if let Some(col) = matches.get_one::<String>("group-col") {
        config.planner.group_column = Some(col.clone());
    }

    let (input, output) = dirs(matches)?;
    let plan = Pipeline::new(config.clone())?.partition(&input, &output)?;
    println!(
        "Wrote {} partitions to {} (offsets: {:?})",
        plan.assignment.num_partitions(),
        output.display(),
        plan.assignment.offsets()
    );
    Ok(())
}

fn cmd_cluster(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    apply_common(config, matches);
    if let Some(scheme) = matches.get_one::<String>("locations") {
        config.cluster.scheme = match scheme.as_str() {
            "geo" => ClusterScheme::Geo,
            _ => ClusterScheme::Visit,
        };
    }
    if let Some(&n) = matches.get_one::<usize>("partitions") {
        config.cluster.num_partitions = n;
    }
    if let Some(&cap) = matches.get_one::<usize>("people-capacity") {
        config.cluster.people_capacity = Some(cap);
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.cluster.seed = seed;
    }

    let (input, output) = dirs(matches)?;
    let clustering = Pipeline::new(config.clone())?.cluster(&input, &output)?;
    println!(
        "Wrote {} location clusters and {} people clusters to {}",
        clustering.location_assignment.num_partitions(),
        clustering.people_assignment.num_partitions(),
        output.display()
    );
    Ok(())
}

fn cmd_contiguous(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    apply_common(config, matches);
    let (input, output) = dirs(matches)?;
    Pipeline::new(config.clone())?.contiguous(&input, &output)?;
    println!("Wrote contiguous population to {}", output.display());
    Ok(())
}

fn cmd_validate(config: &mut PipelineConfig, matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    apply_common(config, matches);
    if matches.get_flag("strict") {
        config.validator.strict = true;
    }
    let (dir, _) = dirs(matches)?;
    let baseline: Option<&Path> = matches.get_one::<PathBuf>("baseline").map(PathBuf::as_path);
    let report = Pipeline::new(config.clone())?.validate(&dir, baseline)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        return Err(format!("{} validation errors", report.errors().count()).into());
    }
    Ok(())
}
