//! The `sl0thifier models` command.

use std::path::Path;

use clap::{Args, Subcommand};
use sl0thifier_core::stage::upscale::available_models;
use sl0thifier_core::Config;

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model inspection.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// List the upscaler binary, its models and the ONNX models
    List,

    /// Print the model directory path
    Path,
}

/// Execute the models command.
pub fn execute(args: ModelsArgs, config: &Config) -> anyhow::Result<()> {
    match args.command {
        ModelsCommand::List => {
            println!("Model directory: {}\n", config.model_dir().display());

            let binary = config.upscaler_binary();
            println!("  Upscaler:");
            println!("    - {:30} {}", display_name(&binary), status(&binary));

            let models_dir = config.upscaler_models_dir();
            println!("\n  Upscaler models ({}):", models_dir.display());
            for model in available_models(&models_dir) {
                let marker = if model == config.job.model_name {
                    "  (default)"
                } else {
                    ""
                };
                let installed = models_dir.join(format!("{model}.param")).is_file()
                    && models_dir.join(format!("{model}.bin")).is_file();
                let state = if installed { "ready" } else { "not installed" };
                println!("    - {:30} {:14}{}", model, state, marker);
            }

            println!("\n  ONNX models:");
            let face = config.resolve_model_path(&config.face_restore.model);
            println!("    - {:30} {}", "face restoration", status(&face));
            let detector = config.resolve_model_path(&config.face_restore.detector);
            println!("    - {:30} {}", "face detection", status(&detector));
            let background = config.resolve_model_path(&config.background.model);
            println!("    - {:30} {}", "background removal", status(&background));
        }

        ModelsCommand::Path => println!("{}", config.model_dir().display()),
    }

    Ok(())
}

fn status(path: &Path) -> &'static str {
    if path.is_file() {
        "ready"
    } else {
        "not installed"
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
