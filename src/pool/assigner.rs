use log::debug;

/// Where the next job may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// No node list, the scheduler picks the host
    Unconstrained,
    Node(String),
    /// Every node is at `max_jobs_per_node`, the job has to wait for a slot to free
    Saturated,
}

#[derive(Debug, Clone)]
struct NodeLoad {
    name: String,
    assigned: usize,
}

/// Round-robin placement over an ordered node list
///
/// Nodes at `max_jobs_per_node` are skipped. The assigned count of a node never exceeds the cap;
/// nodes outside the list are never handed out.
#[derive(Debug, Clone)]
pub struct NodeAssigner {
    nodes: Vec<NodeLoad>,
    max_per_node: Option<usize>,
    cursor: usize,
}

impl NodeAssigner {
    pub fn new(node_list: Option<&[String]>, max_jobs_per_node: Option<usize>) -> Self {
        let nodes = node_list
            .unwrap_or_default()
            .iter()
            .map(|name| NodeLoad { name: name.clone(), assigned: 0 })
            .collect();
        NodeAssigner { nodes, max_per_node: max_jobs_per_node, cursor: 0 }
    }

    pub fn is_constrained(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn assign(&mut self) -> Placement {
        if !self.is_constrained() {
            return Placement::Unconstrained;
        }

        let count = self.nodes.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let node = &mut self.nodes[index];
            if self.max_per_node.map_or(true, |max| node.assigned < max) {
                node.assigned += 1;
                self.cursor = (index + 1) % count;
                debug!("Placing job on {} ({} assigned)", node.name, node.assigned);
                return Placement::Node(node.name.clone());
            }
        }

        Placement::Saturated
    }

    /// Give back the slot of a job that left the node
    pub fn release(&mut self, node: &str) {
        if let Some(load) = self.nodes.iter_mut().find(|load| load.name == node) {
            load.assigned = load.assigned.saturating_sub(1);
        }
    }

    pub fn assigned(&self, node: &str) -> usize {
        self.nodes.iter().find(|load| load.name == node).map_or(0, |load| load.assigned)
    }

    /// Whether a call to `assign` would place a job right now
    pub fn has_capacity(&self) -> bool {
        match self.max_per_node {
            Some(max) if self.is_constrained() => self.nodes.iter().any(|load| load.assigned < max),
            _ => true,
        }
    }
}
