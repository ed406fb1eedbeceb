use clap::{Arg, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use liboephys_nwb::config::Config;
use liboephys_nwb::error::ProcessorError;
use liboephys_nwb::process::{create_subsets, find_cells, process_subset};
use liboephys_nwb::worker_status::WorkerStatus;

fn make_template_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config)?;
    let mut file = File::create(path)?;
    file.write_all(yaml_str.as_bytes())?;
    Ok(())
}

/// Command line values take precedence over the config file
fn apply_overrides(config: &mut Config, matches: &ArgMatches) -> Result<(), String> {
    if let Some(raw) = matches.get_one::<String>("raw") {
        config.raw_path = PathBuf::from(raw);
    }
    if let Some(processed) = matches.get_one::<String>("processed") {
        config.processed_path = PathBuf::from(processed);
    }
    if let Some(calibration) = matches.get_one::<String>("calibration") {
        config.calibration_path = Some(PathBuf::from(calibration));
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.output_path = Some(PathBuf::from(output));
    }
    if let Some(ids) = matches.get_one::<String>("ids") {
        let parsed: Result<Vec<usize>, _> = ids
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse::<usize>())
            .collect();
        config.ids = Some(parsed.map_err(|e| format!("Invalid cell ids {ids}: {e}"))?);
    }
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("oephys_nwb_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("raw")
                .long("raw")
                .help("Directory of raw data, overrides the config"),
        )
        .arg(
            Arg::new("processed")
                .long("processed")
                .help("Directory of processed data, overrides the config"),
        )
        .arg(
            Arg::new("calibration")
                .long("calibration")
                .help("Directory of calibration data, overrides the config"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .help("Directory for NWB files, overrides the config"),
        )
        .arg(
            Arg::new("ids")
                .long("ids")
                .help("Comma separated positions of the cells to convert, e.g. 0,3,4"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    if let Err(e) = LogWrapper::new(pb_manager.clone(), logger).try_init() {
        eprintln!("Could not create logging/progress: {e}");
        return;
    }

    // Parse the cli
    let config_path = match matches.get_one::<String>("path") {
        Some(p) => PathBuf::from(p),
        None => {
            log::error!("A configuration path is required!");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        match make_template_config(&config_path) {
            Ok(()) => log::info!("Done."),
            Err(e) => log::error!("Could not write template config: {e}"),
        }
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let mut config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    if let Err(e) = apply_overrides(&mut config, &matches) {
        log::error!("{e}");
        return;
    }
    if !config.is_n_threads_valid() {
        log::error!("Number of workers must be at least 1!");
        return;
    }
    log::info!("Config successfully loaded.");
    log::info!("Raw Path: {}", config.raw_path.to_string_lossy());
    log::info!("Processed Path: {}", config.processed_path.to_string_lossy());
    if let Some(calibration) = &config.calibration_path {
        log::info!("Calibration Path: {}", calibration.to_string_lossy());
    }
    log::info!("Link Raw Ophys: {}", config.link_raw_ophys);
    log::info!("Number of Workers: {}", config.n_threads);

    let cells = match find_cells(&config) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Sweeping failed with error: {e}");
            return;
        }
    };
    if cells.is_empty() {
        log::warn!("No cells to convert.");
        return;
    }

    // Setup the progress bars, one per worker
    let style = ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut bars: Vec<ProgressBar> = Vec::new();
    let mut handles: Vec<std::thread::JoinHandle<Result<(), ProcessorError>>> = Vec::new();
    for (idx, subset) in create_subsets(cells, config.n_threads as usize)
        .into_iter()
        .enumerate()
    {
        // Dont make empty workers
        if subset.is_empty() {
            continue;
        }
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(style.clone());
        pb.set_prefix(format!("Worker {idx}"));
        bars.push(pb);
        let conf = config.clone();
        let worker_tx = tx.clone();
        let worker_id = bars.len() - 1;
        handles.push(std::thread::spawn(move || {
            process_subset(conf, worker_tx, worker_id, subset)
        }));
    }
    // Only the workers hold senders now
    drop(tx);

    for status in rx.iter() {
        if let Some(pb) = bars.get(status.worker_id) {
            pb.set_position((status.progress * 100.0) as u64);
            pb.set_message(format!("{} cell {}", status.stage, status.cell_id));
        }
    }

    let mut failed = false;
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => {
                failed = true;
                log::error!("Conversion failed with error: {e}");
            }
            Err(_) => {
                failed = true;
                log::error!("Failed to join conversion task!");
            }
        }
    }

    for pb in bars.iter() {
        pb.finish();
    }

    if failed {
        log::error!("Some cells were not converted. Check the messages above.");
    } else {
        log::info!("Successfully converted data!");
    }
    log::info!("Done.");
}
