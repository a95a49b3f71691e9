use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use rayon::prelude::*;
use tracing::error;
use tracing_subscriber::EnvFilter;

use onnx2dml::{CompilerContext, Config, Pipeline, TemplateEnv};

#[derive(Parser, Debug)]
#[command(name = "onnx2dml", version, about = "Translate ONNX models into DML scripts")]
struct Cli {
    /// ONNX models in protobuf JSON encoding
    #[arg(required = true)]
    models: Vec<PathBuf>,

    /// Output file; only valid with a single model
    #[arg(short, long, conflicts_with = "out_dir")]
    output: Option<PathBuf>,

    /// Directory receiving `<model>.dml` for every model
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Scripts directory for layer imports [default: $ONNX2DML_SCRIPTS_DIR, then $SYSTEMDS_ROOT/scripts]
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Also print scripts that are written to a file
    #[arg(long)]
    stdout: bool,
}

impl Cli {
    /// Where the script for `model` goes; `None` prints it to stdout.
    fn target_path(&self, model: &Path) -> Option<PathBuf> {
        if let Some(output) = &self.output {
            return Some(output.clone());
        }
        let dir = self.out_dir.as_ref()?;
        let stem = model.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "model".into());
        Some(dir.join(format!("{}.dml", stem)))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.output.is_some() && self.models.len() > 1 {
            bail!("--output takes a single model, use --out-dir for {} models", self.models.len());
        }
        Ok(())
    }

    fn prints(&self, target: Option<&Path>) -> bool {
        self.stdout || target.is_none()
    }

    fn config(&self) -> Config {
        match &self.scripts_dir {
            Some(dir) => Config::default().with_scripts_dir(dir),
            None => Config::from_env(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    let config = cli.config();
    let env = Arc::new(TemplateEnv::new()?);
    let pipeline = Pipeline::standard();

    let results: Vec<anyhow::Result<Option<String>>> = cli.models
        .par_iter()
        .map(|model| {
            let mut ctx = CompilerContext::from_path(env.clone(), config.clone(), model)
                .with_output(cli.target_path(model));
            pipeline.execute(&mut ctx)
                .with_context(|| format!("Failed to convert {}", model.display()))?;
            Ok(if cli.prints(ctx.output_path.as_deref()) { ctx.script.take() } else { None })
        })
        .collect();

    let mut failures = 0;
    for result in results {
        match result {
            Ok(Some(script)) => print!("{}", script),
            Ok(None) => {}
            Err(err) => {
                error!("{:#}", err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} models failed", failures, cli.models.len());
    }
    Ok(())
}
