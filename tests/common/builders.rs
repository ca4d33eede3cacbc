//! Graph builders for integration tests

use frameflow_rs::config::SchedulerSettings;
use frameflow_rs::pipeline::{Graph, NodeId, PortId};

/// Graph with an explicit batch size and worker count.
pub fn test_graph(batch_size: usize, worker_count: usize) -> Graph {
    Graph::new(SchedulerSettings {
        batch_size,
        worker_count,
    })
}

pub fn port(graph: &Graph, node: NodeId, name: &str) -> PortId {
    graph
        .port_by_name(node, name)
        .unwrap_or_else(|| panic!("{} has no port {}", node, name))
}

/// Link `from.out` to `to.in`.
pub fn link(graph: &mut Graph, from: NodeId, to: NodeId) {
    let out = port(graph, from, "out");
    let input = port(graph, to, "in");
    graph.connect(out, input).unwrap();
}

/// Builder for a linear chain of built-in nodes.
pub struct ChainBuilder {
    steps: Vec<(String, Vec<(String, serde_json::Value)>)>,
}

impl ChainBuilder {
    pub fn new(first: &str) -> Self {
        Self {
            steps: vec![(first.to_string(), Vec::new())],
        }
    }

    pub fn then(mut self, node_type: &str) -> Self {
        self.steps.push((node_type.to_string(), Vec::new()));
        self
    }

    /// Set a parameter on the most recently added node.
    pub fn param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some((_, params)) = self.steps.last_mut() {
            params.push((key.to_string(), value.into()));
        }
        self
    }

    pub fn build(self, graph: &mut Graph) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = Vec::new();
        for (node_type, params) in self.steps {
            let id = if params.is_empty() {
                graph.create_node(&node_type).unwrap()
            } else {
                let object: serde_json::Map<String, serde_json::Value> =
                    params.into_iter().collect();
                graph
                    .create_node_with(&node_type, serde_json::Value::Object(object))
                    .unwrap()
            };
            if let Some(&prev) = ids.last() {
                link(graph, prev, id);
            }
            ids.push(id);
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder() {
        let mut graph = test_graph(2, 2);
        let ids = ChainBuilder::new("SyntheticStack")
            .param("frame_count", 5)
            .then("FrameFilter")
            .build(&mut graph);

        assert_eq!(ids.len(), 2);
        assert_eq!(graph.links().len(), 1);
        assert_eq!(graph.frame_count(graph.find_upstream_source(ids[1])), Some(5));
    }
}
