pub mod node_tree;

use std::collections::HashSet;

use tracing::debug;

use crate::core::names::NameMap;
use crate::error::{Error, Result};
use crate::model::{GraphDef, NodeDef};
use node_tree::NodeTree;

/// Script text generated for one node, plus the import it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub import: Option<String>,
    pub script: String,
}

impl Fragment {
    pub fn script(script: impl Into<String>) -> Self {
        Self { import: None, script: script.into() }
    }

    pub fn with_import(import: impl Into<String>, script: impl Into<String>) -> Self {
        Self { import: Some(import.into()), script: script.into() }
    }
}

/// Per-node code generation callback. `names` is shared by every node of the
/// graph, so helper variables a generator reserves stay unique.
pub trait NodeGenerator {
    fn generate(&self, graph: &GraphDef, names: &mut NameMap, node: &NodeDef) -> Result<Fragment>;
}

#[derive(Debug, Clone)]
pub struct Linearization {
    /// Distinct imports, in order of first use.
    pub imports: Vec<String>,
    /// Node scripts, producers before consumers.
    pub scripts: Vec<String>,
    /// Positions in `graph.nodes`, aligned with `scripts`.
    pub order: Vec<usize>,
    /// Every name treated as satisfied by the end of the walk.
    pub available: HashSet<String>,
    /// Identifiers used by `scripts`, including generator helpers.
    pub names: NameMap,
}

/// Orders the graph's nodes by walking backwards from the declared outputs:
/// an end node is scheduled once all of its outputs are available, after
/// which its inputs become available. The result is reversed so producers
/// come first.
pub fn linearize<G: NodeGenerator + ?Sized>(graph: &GraphDef, generator: &G) -> Result<Linearization> {
    let mut tree = NodeTree::new(&graph.nodes);
    let mut names = NameMap::new(graph);
    let mut available: HashSet<String> = graph.outputs.iter().map(|o| o.name.clone()).collect();
    let mut emitted: Vec<(usize, Fragment)> = Vec::with_capacity(graph.nodes.len());

    while !tree.is_empty() {
        let (idx, node) = tree
            .end_nodes()
            .find(|(_, node)| node.present_outputs().all(|o| available.contains(o)))
            .ok_or(Error::NoComputableNode { remaining: tree.len() })?;

        let fragment = generator.generate(graph, &mut names, node)?;
        debug!(op = %node.op_type, node = %node.display_name(), "scheduled");

        available.extend(node.present_inputs().map(str::to_string));
        tree.remove_end_node(idx);
        emitted.push((idx.index(), fragment));
    }

    emitted.reverse();

    let mut imports: Vec<String> = Vec::new();
    let mut order = Vec::with_capacity(emitted.len());
    let mut scripts = Vec::with_capacity(emitted.len());
    for (position, fragment) in emitted {
        if let Some(import) = fragment.import.filter(|i| !i.is_empty()) {
            if !imports.contains(&import) {
                imports.push(import);
            }
        }
        order.push(position);
        scripts.push(fragment.script);
    }

    Ok(Linearization { imports, scripts, order, available, names })
}
