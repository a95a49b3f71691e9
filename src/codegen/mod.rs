pub mod operators;
pub mod script;

use tera::{Context, Tera};

use crate::core::names::NameMap;
use crate::core::op::OpKind;
use crate::error::{Error, Result};
use crate::linearizer::{Fragment, NodeGenerator};
use crate::model::{GraphDef, NodeDef};

const TEMPLATES: &[(&str, &str)] = &[
    ("main.dml", include_str!("../../templates/main.dml.tera")),
    ("model_header.dml", include_str!("../../templates/model_header.dml.tera")),
    ("graph_function.dml", include_str!("../../templates/graph_function.dml.tera")),
    ("initializer.dml", include_str!("../../templates/initializer.dml.tera")),
    ("import.dml", include_str!("../../templates/import.dml.tera")),
    ("operators/infix.dml", include_str!("../../templates/operators/infix.dml.tera")),
    ("operators/prefix.dml", include_str!("../../templates/operators/prefix.dml.tera")),
    ("operators/function_call.dml", include_str!("../../templates/operators/function_call.dml.tera")),
    ("operators/zero_bias.dml", include_str!("../../templates/operators/zero_bias.dml.tera")),
];

/// Templating context shared by every generator. Read-only once built.
pub struct TemplateEnv {
    tera: Tera,
}

impl TemplateEnv {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TEMPLATES.to_vec())?;
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, context: &Context) -> Result<String> {
        Ok(self.tera.render(template, context)?)
    }
}

impl NodeGenerator for TemplateEnv {
    fn generate(&self, graph: &GraphDef, names: &mut NameMap, node: &NodeDef) -> Result<Fragment> {
        if !node.in_default_domain() {
            return Err(Error::UnsupportedOperator { op: format!("{}.{}", node.domain, node.op_type) });
        }
        let op: OpKind = node.op_type.parse()?;
        op.generate(self, graph, names, node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_templates_load() {
        let env = TemplateEnv::new().unwrap();
        let loaded: Vec<&str> = env.tera.get_template_names().collect();
        for (name, _) in TEMPLATES {
            assert!(loaded.contains(name), "missing template {}", name);
        }
    }

    #[test]
    fn unknown_operator_is_reported_by_name() {
        let env = TemplateEnv::new().unwrap();
        let node = NodeDef { op_type: "FooBar".into(), ..Default::default() };
        match env.generate(&GraphDef::default(), &mut NameMap::default(), &node) {
            Err(Error::UnsupportedOperator { op }) => assert_eq!(op, "FooBar"),
            other => panic!("expected unsupported operator, got {:?}", other),
        }
    }

    #[test]
    fn custom_domain_operators_are_unsupported() {
        let env = TemplateEnv::new().unwrap();
        let node = NodeDef {
            op_type: "Relu".into(),
            domain: "com.example".into(),
            inputs: vec!["x".into()],
            outputs: vec!["y".into()],
            ..Default::default()
        };
        match env.generate(&GraphDef::default(), &mut NameMap::default(), &node) {
            Err(Error::UnsupportedOperator { op }) => assert_eq!(op, "com.example.Relu"),
            other => panic!("expected unsupported operator, got {:?}", other),
        }
    }
}
