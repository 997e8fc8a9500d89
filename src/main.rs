use clap::Parser;
use clustacross::cli;
use clustacross::clustering::VsearchEngine;
use clustacross::constants::*;
use clustacross::msa::MuscleEngine;
use clustacross::pipeline;
use clustacross::utils::*;
use flexi_logger::style;
use flexi_logger::{DeferredNow, Duplicate, FileSpec, Record};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;

fn main() {
    let total_start_time = Instant::now();
    let args = cli::Cli::parse();

    let _logger = initialize_setup(&args);

    let params = match args.stage_params() {
        Ok(params) => params,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    let samples = match args.manifest.as_deref().map(cli::read_manifest) {
        Some(Ok(samples)) => samples,
        Some(Err(e)) => {
            log::error!("Could not read sample manifest: {}", e);
            std::process::exit(1);
        }
        None => {
            log::error!("No sample manifest provided. See --help for usage.");
            std::process::exit(1);
        }
    };

    log::info!("Starting cross-sample clustering of {} samples...", samples.len());
    let clusterer = VsearchEngine::new(&args.vsearch);
    let aligner = MuscleEngine::new(&args.muscle);
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupt received; stopping after the current step");
        flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Could not install interrupt handler: {}", e);
    }

    match pipeline::run(&params, &samples, &clusterer, &aligner, cancel) {
        Ok(result) => {
            log::info!(
                "Wrote {} loci across {} samples to {}",
                result.nloci,
                result.nsamples,
                result.database_path.display()
            );
            log::info!("Total time elapsed: {:?}", total_start_time.elapsed());
        }
        Err(e) => {
            log::error!("Clustering across samples failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn my_own_format_colored(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let mut paintlevel = record.level();
    if paintlevel == log::Level::Info {
        paintlevel = log::Level::Debug;
    }
    write!(
        w,
        "({}) {} [{}] {}",
        now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
        style(paintlevel).paint(record.level().to_string()),
        record.module_path().unwrap_or(""),
        &record.args()
    )
}

fn my_own_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "({}) {} [{}] {}",
        now.format(TS_DASHES_BLANK_COLONS_DOT_BLANK),
        record.level(),
        record.module_path().unwrap_or(""),
        &record.args()
    )
}

fn initialize_setup(args: &cli::Cli) -> flexi_logger::LoggerHandle {
    if args.markdown_help {
        clap_markdown::print_help_markdown::<cli::Cli>();
        std::process::exit(0);
    }

    if let Some(manifest) = &args.manifest {
        if !manifest.exists() {
            eprintln!(
                "ERROR [clustacross] Sample manifest {} does not exist. Exiting.",
                manifest.display()
            );
            std::process::exit(1);
        }
    }

    let output_dir = args.output_dir.as_path();
    if !output_dir.exists() {
        if let Err(e) = std::fs::create_dir_all(output_dir) {
            eprintln!("ERROR [clustacross] Could not create output directory: {}", e);
            std::process::exit(1);
        }
    } else if !output_dir.is_dir() {
        eprintln!("ERROR [clustacross] Output directory specified by `-o` exists and is not a directory.");
        std::process::exit(1);
    }

    let filespec = FileSpec::default().directory(output_dir).basename("clustacross");
    let logger = flexi_logger::Logger::try_with_str(args.log_level_filter().to_string())
        .and_then(|logger| {
            logger
                .log_to_file(filespec)
                .duplicate_to_stderr(Duplicate::Info)
                .format(my_own_format_colored)
                .format_for_files(my_own_format)
                .start()
        });
    let handle = match logger {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("ERROR [clustacross] Could not start logging: {}", e);
            std::process::exit(1);
        }
    };

    let cli_args: Vec<String> = std::env::args().collect();
    log::info!("COMMAND: {}", cli_args.join(" "));
    log::info!("VERSION: {}", env!("CARGO_PKG_VERSION"));
    log::info!("SYSTEM NAME: {}", System::name().unwrap_or(format!("Unknown")));
    log::info!("SYSTEM HOST NAME: {}", System::host_name().unwrap_or(format!("Unknown")));
    log_memory_usage(false, "Startup");
    handle
}
