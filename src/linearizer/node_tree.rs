use std::collections::HashMap;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use crate::model::NodeDef;

/// Producer -> consumer view over a node list, exposing the nodes that no
/// remaining node consumes from ("end nodes").
///
/// Indices are stable across removals and match positions in the input
/// node slice.
pub struct NodeTree<'g> {
    graph: StableDiGraph<&'g NodeDef, ()>,
    /// Work list in insertion order. Removed nodes stay behind as stale
    /// entries until a compaction.
    frontier: Vec<NodeIndex>,
    queued: Vec<bool>,
    stale: usize,
}

impl<'g> NodeTree<'g> {
    pub fn new(nodes: &'g [NodeDef]) -> Self {
        let mut graph = StableDiGraph::with_capacity(nodes.len(), nodes.len());
        let indices: Vec<NodeIndex> = nodes.iter().map(|node| graph.add_node(node)).collect();

        let mut producers: HashMap<&str, Vec<NodeIndex>> = HashMap::new();
        for (&idx, node) in indices.iter().zip(nodes) {
            for output in node.present_outputs() {
                producers.entry(output).or_default().push(idx);
            }
        }

        for (&consumer, node) in indices.iter().zip(nodes) {
            for input in node.present_inputs() {
                let Some(sources) = producers.get(input) else { continue };
                for &producer in sources {
                    if graph.find_edge(producer, consumer).is_none() {
                        graph.add_edge(producer, consumer, ());
                    }
                }
            }
        }

        let frontier: Vec<NodeIndex> = indices
            .into_iter()
            .filter(|&idx| graph.neighbors_directed(idx, Direction::Outgoing).next().is_none())
            .collect();
        let mut queued = vec![false; nodes.len()];
        for idx in &frontier {
            queued[idx.index()] = true;
        }

        Self { graph, frontier, queued, stale: 0 }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Current end nodes, oldest first.
    pub fn end_nodes(&self) -> impl Iterator<Item = (NodeIndex, &'g NodeDef)> + '_ {
        self.frontier
            .iter()
            .filter(|idx| self.queued[idx.index()])
            .map(|&idx| (idx, self.graph[idx]))
    }

    /// Removes an end node; producers left without consumers join the back
    /// of the frontier in index order.
    pub fn remove_end_node(&mut self, idx: NodeIndex) {
        debug_assert!(self.queued[idx.index()], "node {:?} is not an end node", idx);

        let mut producers: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Incoming).collect();
        producers.sort();
        self.graph.remove_node(idx);
        self.queued[idx.index()] = false;
        self.stale += 1;

        for producer in producers {
            let exposed = self.graph.neighbors_directed(producer, Direction::Outgoing).next().is_none();
            if exposed && !self.queued[producer.index()] {
                self.queued[producer.index()] = true;
                self.frontier.push(producer);
            }
        }

        if self.stale * 2 > self.frontier.len() {
            let queued = &self.queued;
            self.frontier.retain(|idx| queued[idx.index()]);
            self.stale = 0;
        }
    }
}
