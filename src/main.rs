use clap::Parser;
use image_lens_lib::commands::classifier as commands;
use image_lens_lib::config::AppConfig;
use image_lens_lib::models::classify_types::{ImageOrigin, ImageSource};
use std::path::PathBuf;
use std::process::ExitCode;

/// Classify photos with an on-device model and browse the session history.
#[derive(Parser, Debug)]
#[command(name = "image-lens", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// ONNX model, overrides the configuration.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Labels JSON (`id2label` map or array), overrides the configuration.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Treat the images as camera captures rather than library picks.
    #[arg(long)]
    camera: bool,

    /// Only list history entries with a label containing this text.
    #[arg(long, default_value = "")]
    search: String,

    /// Images to classify.
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    image_lens_lib::init_logging();
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    if let Some(labels) = cli.labels {
        config.labels_path = labels;
    }

    let app = image_lens_lib::start(config).await;
    let status = commands::get_model_status(&app.model_manager);
    if let Some(error) = &status.error {
        eprintln!("warning: {}", error);
    }

    let origin = if cli.camera {
        ImageOrigin::Camera
    } else {
        ImageOrigin::Library
    };

    // Submit everything first; results arrive in whatever order they finish.
    let mut tickets = Vec::with_capacity(cli.images.len());
    for path in &cli.images {
        match commands::select_image(&app.session, ImageSource::file(path, origin)).await {
            Ok(ticket) => tickets.push((path.clone(), ticket)),
            Err(e) => eprintln!("{}: {}", path.display(), e),
        }
    }

    let mut failures = 0;
    for (path, ticket) in tickets {
        match ticket.wait().await {
            Ok(record) => {
                println!("{} ({})", record.image_name, path.display());
                for prediction in record.top(3) {
                    println!("  {:<40} {:>3}%", prediction.identifier, prediction.percent());
                }
            }
            Err(e) => {
                failures += 1;
                println!("{}: {}", path.display(), e);
            }
        }
    }

    let rows = commands::search_history(&app.session, &cli.search);
    println!();
    println!("Classification History ({} of {})", rows.len(), app.session.history().len());
    for row in rows {
        println!("{}  {}", row.image_name, row.date);
        for prediction in &row.predictions {
            println!("  {:<40} {:>3}%", prediction.identifier, prediction.percent());
        }
    }

    if failures > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
