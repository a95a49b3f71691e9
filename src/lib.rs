//! Translates ONNX computation graphs into DML scripts.
//!
//! The graph is ordered by a backward walk from its declared outputs
//! ([`linearizer::linearize`]), each node is rendered through a closed table
//! of operator generators ([`crate::core::op::OpKind`]), and the fragments are
//! wrapped into a generated function with a model header
//! ([`codegen::script`]). [`pipeline::Pipeline`] strings these steps
//! together for the command line.

pub mod codegen;
pub mod config;
pub mod core;
pub mod error;
pub mod linearizer;
pub mod model;
pub mod pipeline;
pub mod stages;

use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;

pub use codegen::TemplateEnv;
pub use config::Config;
pub use crate::core::names::NameMap;
pub use error::{Error, Result};
pub use linearizer::{Fragment, Linearization, NodeGenerator, linearize};
pub use model::ModelDef;
pub use pipeline::{CompilerContext, Pipeline};

/// Generates the script for `model`, writing it to `output` when given.
pub fn generate_script(model: ModelDef, config: &Config, output: Option<&Path>) -> anyhow::Result<String> {
    let env = Arc::new(TemplateEnv::new()?);
    let mut ctx = CompilerContext::from_model(env, config.clone(), model)
        .with_output(output.map(Path::to_path_buf));
    Pipeline::standard().execute(&mut ctx)?;
    ctx.script.ok_or_else(|| anyhow!("Pipeline finished without a script"))
}
