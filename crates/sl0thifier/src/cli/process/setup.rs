//! Merge command-line overrides into the loaded configuration.

use sl0thifier_core::{Config, JobOptions};

use super::ProcessArgs;

/// Apply `args` on top of `config`, returning the effective configuration and
/// the validated job template.
pub fn apply(args: &ProcessArgs, mut config: Config) -> anyhow::Result<(Config, JobOptions)> {
    let mut options = config.job.clone();

    if let Some(width) = args.width {
        options.width = width;
    }
    if let Some(height) = args.height {
        options.height = height;
    }
    if let Some(model) = &args.model_name {
        options.model_name = model.clone();
    }
    if let Some(clip) = args.clip_limit {
        options.clip_limit = clip;
    }
    if let Some(tile) = args.tile_size {
        options.tile_size = tile;
    }
    if args.remove_background {
        options.remove_background = true;
    }
    if let Some(color) = args.background_color {
        options.background_color = color.into();
    }
    if args.no_face_restore {
        options.restore_faces = false;
    }
    if args.output_dir.is_some() {
        options.output_dir = args.output_dir.clone();
    }
    options.validate()?;

    if let Some(parallel) = args.parallel {
        config.processing.parallel_workers = parallel;
    }
    if args.recursive {
        config.processing.recursive = true;
    }
    if let Some(format) = args.format {
        config.output.format = format.to_string();
    }

    if options.background_color.rgb().is_some() && !options.remove_background {
        tracing::warn!("--background-color has no effect without --remove-background");
    }

    config.job = options.clone();
    Ok((config, options))
}
