use super::{Message, Payload, Tag};
use crate::common::{Constraint, ConstraintKind, ConstraintSet, HighLevelNode};
use crate::grid::GridCoord;

/// Ints in the fixed frame header: node id, parent id, depth, agent
/// count, constraint count, path int count, constraint int count, and an
/// auxiliary value whose meaning depends on the tag (incumbent cost on
/// tasks, parent id on children).
pub const HEADER_LEN: usize = 8;

/// Ints per serialised constraint: agent, time, kind, vertex x/y, edge
/// target x/y (−1 on vertex constraints).
pub const CONSTRAINT_INTS: usize = 7;

const KIND_VERTEX: i64 = 0;
const KIND_EDGE: i64 = 1;

/// Appends one constraint in the shared 7-int wire layout.
pub(crate) fn push_constraint_ints(out: &mut Vec<i64>, constraint: &Constraint) {
    let (kind, vertex, edge_to) = match constraint.kind {
        ConstraintKind::Vertex { at } => (KIND_VERTEX, at, GridCoord::new(-1, -1)),
        ConstraintKind::Edge { from, to } => (KIND_EDGE, from, to),
    };
    out.extend_from_slice(&[
        constraint.agent as i64,
        constraint.time as i64,
        kind,
        vertex.x as i64,
        vertex.y as i64,
        edge_to.x as i64,
        edge_to.y as i64,
    ]);
}

/// Reads one constraint back from its 7-int wire layout.
pub(crate) fn constraint_from_ints(row: &[i64]) -> Constraint {
    debug_assert_eq!(row.len(), CONSTRAINT_INTS);
    let vertex = GridCoord::new(row[3] as i32, row[4] as i32);
    let kind = if row[2] == KIND_VERTEX {
        ConstraintKind::Vertex { at: vertex }
    } else {
        ConstraintKind::Edge {
            from: vertex,
            to: GridCoord::new(row[5] as i32, row[6] as i32),
        }
    };
    Constraint {
        agent: row[0] as i32,
        time: row[1] as usize,
        kind,
    }
}

/// Wire form of a [`HighLevelNode`]: a fixed header, the float cost, the
/// per-agent path layout `(L, x0, y0, x1, y1, …)` and seven ints per
/// constraint. The whole frame travels as one message so the four
/// sections can never be torn apart or re-paired.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFrame {
    pub header: [i64; HEADER_LEN],
    pub cost: f64,
    pub path_ints: Vec<i64>,
    pub constraint_ints: Vec<i64>,
}

impl NodeFrame {
    pub fn encode(node: &HighLevelNode, aux: i64) -> NodeFrame {
        let mut path_ints = Vec::new();
        for path in &node.paths {
            path_ints.push(path.len() as i64);
            for step in path {
                path_ints.push(step.x as i64);
                path_ints.push(step.y as i64);
            }
        }

        let mut constraint_ints = Vec::with_capacity(node.constraints.len() * CONSTRAINT_INTS);
        for constraint in node.constraints.iter() {
            push_constraint_ints(&mut constraint_ints, constraint);
        }

        NodeFrame {
            header: [
                node.id as i64,
                node.parent,
                node.depth as i64,
                node.paths.len() as i64,
                node.constraints.len() as i64,
                path_ints.len() as i64,
                constraint_ints.len() as i64,
                aux,
            ],
            cost: node.cost as f64,
            path_ints,
            constraint_ints,
        }
    }

    pub fn aux(&self) -> i64 {
        self.header[7]
    }

    pub fn decode(&self) -> HighLevelNode {
        let num_agents = self.header[3] as usize;
        debug_assert_eq!(self.path_ints.len(), self.header[5] as usize);
        debug_assert_eq!(self.constraint_ints.len(), self.header[6] as usize);
        debug_assert_eq!(
            self.constraint_ints.len(),
            self.header[4] as usize * CONSTRAINT_INTS
        );

        let mut paths = Vec::with_capacity(num_agents);
        let mut cursor = 0;
        for _ in 0..num_agents {
            let len = self.path_ints[cursor] as usize;
            cursor += 1;
            let mut path = Vec::with_capacity(len);
            for _ in 0..len {
                path.push(GridCoord::new(
                    self.path_ints[cursor] as i32,
                    self.path_ints[cursor + 1] as i32,
                ));
                cursor += 2;
            }
            paths.push(path);
        }
        debug_assert_eq!(cursor, self.path_ints.len());

        let constraints: ConstraintSet = self
            .constraint_ints
            .chunks(CONSTRAINT_INTS)
            .map(constraint_from_ints)
            .collect();

        HighLevelNode {
            id: self.header[0] as u64,
            parent: self.header[1],
            depth: self.header[2] as u32,
            cost: self.cost as usize,
            constraints,
            paths,
        }
    }
}

/// Builds a node-carrying message. Pairing the encode with the matching
/// [`take_node`] keeps the frame layout private to this module.
pub fn node_message(src: usize, tag: Tag, node: &HighLevelNode, aux: i64) -> Message {
    Message {
        src,
        tag,
        payload: Payload::Node(Box::new(NodeFrame::encode(node, aux))),
    }
}

/// Extracts the node and aux value from a node-carrying message.
pub fn take_node(msg: Message) -> (HighLevelNode, i64) {
    match msg.payload {
        Payload::Node(frame) => (frame.decode(), frame.aux()),
        other => {
            debug_assert!(false, "expected node payload, got {other:?}");
            (
                HighLevelNode {
                    id: 0,
                    parent: -1,
                    depth: 0,
                    cost: 0,
                    constraints: ConstraintSet::new(),
                    paths: Vec::new(),
                },
                -1,
            )
        }
    }
}
