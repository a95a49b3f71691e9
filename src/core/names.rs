use std::collections::{HashMap, HashSet};

use crate::core::types::dml_identifier;
use crate::model::GraphDef;

/// Identifier assignment for one graph.
///
/// Every tensor name gets its own identifier. When two names sanitize to the
/// same text, the one seen later gets the first free `_<n>` suffix. Names are
/// registered in a fixed order (graph inputs, initializers, node inputs and
/// outputs in document order, graph outputs), so the same graph always maps
/// the same way. Helper variables introduced by generators come from
/// [`NameMap::fresh`] and never shadow a tensor.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    idents: HashMap<String, String>,
    taken: HashSet<String>,
}

impl NameMap {
    pub fn new(graph: &GraphDef) -> Self {
        let mut names = Self::default();
        let declared = graph.inputs.iter().map(|v| v.name.as_str())
            .chain(graph.initializers.iter().map(|t| t.name.as_str()));
        let linked = graph.nodes.iter()
            .flat_map(|node| node.inputs.iter().chain(&node.outputs))
            .map(String::as_str);
        let returned = graph.outputs.iter().map(|v| v.name.as_str());

        for name in declared.chain(linked).chain(returned) {
            if !name.is_empty() && !names.idents.contains_key(name) {
                let ident = names.fresh(&dml_identifier(name));
                names.idents.insert(name.to_string(), ident);
            }
        }
        names
    }

    /// Identifier of a tensor name. Names outside the graph fall back to
    /// plain sanitizing.
    pub fn ident(&self, name: &str) -> String {
        self.idents.get(name).cloned().unwrap_or_else(|| dml_identifier(name))
    }

    /// Reserves an identifier based on `base` that no tensor or earlier helper
    /// uses.
    pub fn fresh(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 0;
        while self.taken.contains(&candidate) {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        self.taken.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeDef, ValueInfo};

    fn value(name: &str) -> ValueInfo {
        ValueInfo { name: name.into(), ..Default::default() }
    }

    fn graph() -> GraphDef {
        GraphDef {
            inputs: vec![value("x"), value("h_1")],
            nodes: vec![
                NodeDef { op_type: "Relu".into(), inputs: vec!["x".into()], outputs: vec!["h.1".into()], ..Default::default() },
                NodeDef {
                    op_type: "Add".into(),
                    inputs: vec!["h.1".into(), "h_1".into()],
                    outputs: vec!["h:1".into()],
                    ..Default::default()
                },
            ],
            outputs: vec![value("h:1")],
            ..Default::default()
        }
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let names = NameMap::new(&graph());
        assert_eq!(names.ident("x"), "x");
        assert_eq!(names.ident("h_1"), "h_1");
        assert_eq!(names.ident("h.1"), "h_1_1");
        assert_eq!(names.ident("h:1"), "h_1_2");
    }

    #[test]
    fn fresh_names_avoid_tensors() {
        let mut names = NameMap::new(&graph());
        assert_eq!(names.fresh("h_1"), "h_1_3");
        assert_eq!(names.fresh("y_mask"), "y_mask");
        assert_eq!(names.fresh("y_mask"), "y_mask_1");
    }

    #[test]
    fn unknown_names_are_sanitized() {
        let names = NameMap::default();
        assert_eq!(names.ident("0.out"), "v0_out");
    }
}
