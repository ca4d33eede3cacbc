//! Connection rule, link symmetry and connect/disconnect notifications

mod common;

use common::builders::{port, test_graph};
use common::PortProbe;
use frameflow_rs::pipeline::port::kinds_compatible;
use frameflow_rs::pipeline::{
    Graph, GraphEvent, Incompatibility, KindSet, PipelineError, PortId, PortKind,
};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Shape {
    kind: PortKind,
    accepts: Vec<PortKind>,
    input: bool,
}

impl Shape {
    fn accept_set(&self) -> KindSet {
        self.accepts
            .iter()
            .fold(KindSet::single(self.kind), |set, &k| set.with(k))
    }
}

fn add_probe(graph: &mut Graph, shapes: &[&Shape]) -> Vec<PortId> {
    let inputs: Vec<(PortKind, &[PortKind])> = shapes
        .iter()
        .filter(|s| s.input)
        .map(|s| (s.kind, s.accepts.as_slice()))
        .collect();
    let outputs: Vec<(PortKind, &[PortKind])> = shapes
        .iter()
        .filter(|s| !s.input)
        .map(|s| (s.kind, s.accepts.as_slice()))
        .collect();
    let node = graph.add_plugin(Box::new(PortProbe::new(&inputs, &outputs)));

    let (mut inputs_seen, mut outputs_seen) = (0, 0);
    shapes
        .iter()
        .map(|s| {
            let name = if s.input {
                inputs_seen += 1;
                format!("in{}", inputs_seen - 1)
            } else {
                outputs_seen += 1;
                format!("out{}", outputs_seen - 1)
            };
            port(graph, node, &name)
        })
        .collect()
}

fn kind() -> impl Strategy<Value = PortKind> {
    prop::sample::select(PortKind::ALL.to_vec())
}

fn shape() -> impl Strategy<Value = Shape> {
    (kind(), prop::collection::vec(kind(), 0..3), any::<bool>()).prop_map(
        |(kind, accepts, input)| Shape {
            kind,
            accepts,
            input,
        },
    )
}

fn assert_link_invariants(graph: &Graph) {
    for node in graph.node_ids() {
        for &pid in graph.ports_of(node) {
            let p = graph.port(pid).unwrap();
            if p.is_input() {
                assert!(p.links().len() <= 1, "input {} has {} links", pid, p.links().len());
            }
            for &q in p.links() {
                let other = graph.port(q).expect("linked port exists");
                assert!(other.is_linked_to(pid), "link {} -> {} is one-sided", pid, q);
                assert_ne!(other.direction, p.direction);
                assert_ne!(other.owner, p.owner);
            }
            if !p.is_linked() {
                assert_eq!(p.effective_kind(), p.kind);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Connect(usize, usize),
    DisconnectAll(usize),
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..32, 0usize..32).prop_map(|(a, b)| Op::Connect(a, b)),
        1 => (0usize..32).prop_map(Op::DisconnectAll),
        1 => (0usize..8).prop_map(Op::Delete),
    ]
}

proptest! {
    #[test]
    fn connect_follows_the_compatibility_rule(a in shape(), b in shape(), same_node in any::<bool>()) {
        let mut graph = test_graph(1, 1);
        let (pa, pb) = if same_node {
            let ids = add_probe(&mut graph, &[&a, &b]);
            (ids[0], ids[1])
        } else {
            (add_probe(&mut graph, &[&a])[0], add_probe(&mut graph, &[&b])[0])
        };

        let expected = a.input != b.input
            && !same_node
            && kinds_compatible(a.kind, a.accept_set(), b.kind, b.accept_set());
        prop_assert_eq!(graph.can_connect(pa, pb).is_ok(), expected);
        prop_assert_eq!(graph.can_connect(pb, pa).is_ok(), expected);
        prop_assert_eq!(graph.connect(pa, pb).is_ok(), expected);
        prop_assert_eq!(graph.links().len(), usize::from(expected));
        assert_link_invariants(&graph);
    }

    #[test]
    fn random_edits_keep_links_symmetric(ops in prop::collection::vec(op(), 1..40)) {
        let mut graph = test_graph(1, 1);
        let nodes: Vec<_> = [
            "SyntheticStack",
            "SyntheticStack",
            "FrameFilter",
            "FrameFilter",
            "Export",
            "ParticleFit",
            "Reconstruction",
            "BakeStack",
        ]
        .iter()
        .map(|t| graph.create_node(t).unwrap())
        .collect();
        let ports: Vec<PortId> = nodes
            .iter()
            .flat_map(|&n| graph.ports_of(n).to_vec())
            .collect();

        for op in ops {
            match op {
                Op::Connect(a, b) => {
                    let (a, b) = (ports[a % ports.len()], ports[b % ports.len()]);
                    let allowed = graph.can_connect(a, b).is_ok();
                    prop_assert_eq!(graph.try_connect(a, b), allowed);
                    if allowed {
                        prop_assert!(graph.port(a).unwrap().is_linked_to(b));
                    }
                }
                Op::DisconnectAll(p) => {
                    let p = ports[p % ports.len()];
                    graph.disconnect_all(p);
                    prop_assert!(graph.port(p).map_or(true, |port| !port.is_linked()));
                }
                Op::Delete(n) => {
                    graph.delete_node(nodes[n]);
                }
            }
            assert_link_invariants(&graph);
        }
    }
}

#[test]
fn test_rejection_reasons() {
    let mut graph = test_graph(1, 1);
    let src = graph.create_node("SyntheticStack").unwrap();
    let filter = graph.create_node("FrameFilter").unwrap();
    let recon = graph.create_node("Reconstruction").unwrap();
    let src_out = port(&graph, src, "out");
    let filter_in = port(&graph, filter, "in");
    let filter_out = port(&graph, filter, "out");
    let recon_in = port(&graph, recon, "in");

    let reason = |r: Result<(), PipelineError>| match r {
        Err(PipelineError::IncompatiblePorts { reason, .. }) => Some(reason),
        _ => None,
    };

    assert_eq!(
        reason(graph.connect(src_out, filter_out)),
        Some(Incompatibility::SameDirection)
    );
    assert_eq!(
        reason(graph.connect(filter_in, filter_out)),
        Some(Incompatibility::SameNode)
    );
    assert_eq!(
        reason(graph.connect(src_out, recon_in)),
        Some(Incompatibility::KindMismatch {
            a: PortKind::Dataset,
            b: PortKind::Coordinates,
        })
    );
    graph.connect(src_out, filter_in).unwrap();
    assert_eq!(
        reason(graph.connect(filter_in, src_out)),
        Some(Incompatibility::AlreadyLinked)
    );
    assert_eq!(graph.links(), vec![(src_out, filter_in)]);
}

#[test]
fn test_rejected_connect_is_silent() {
    let mut graph = test_graph(1, 1);
    let src = graph.create_node("SyntheticStack").unwrap();
    let recon = graph.create_node("Reconstruction").unwrap();
    let events = graph.subscribe();
    let generation = graph.generation();
    graph.take_changed(src);

    assert!(!graph.try_connect(port(&graph, src, "out"), port(&graph, recon, "in")));
    assert!(events.try_recv().is_err());
    assert_eq!(graph.generation(), generation);
    assert!(!graph.is_changed(src));
}

#[test]
fn test_eviction_fires_disconnect_before_connect() {
    let mut graph = test_graph(1, 1);
    let first = graph.create_node("SyntheticStack").unwrap();
    let second = graph.create_node("SyntheticStack").unwrap();
    let filter = graph.create_node("FrameFilter").unwrap();
    let first_out = port(&graph, first, "out");
    let second_out = port(&graph, second, "out");
    let filter_in = port(&graph, filter, "in");
    graph.connect(first_out, filter_in).unwrap();

    let events = graph.subscribe();
    graph.connect(second_out, filter_in).unwrap();
    let fired: Vec<GraphEvent> = events.try_iter().collect();
    assert_eq!(
        fired,
        vec![
            GraphEvent::PortDisconnected {
                port: filter_in,
                partner: first_out
            },
            GraphEvent::PortDisconnected {
                port: first_out,
                partner: filter_in
            },
            GraphEvent::PortConnected {
                port: second_out,
                partner: filter_in
            },
            GraphEvent::PortConnected {
                port: filter_in,
                partner: second_out
            },
        ]
    );
    assert!(!graph.port(first_out).unwrap().is_linked());
    assert_eq!(graph.links(), vec![(second_out, filter_in)]);
}

#[test]
fn test_output_fans_out_to_many_inputs() {
    let mut graph = test_graph(1, 1);
    let src = graph.create_node("SyntheticStack").unwrap();
    let a = graph.create_node("FrameFilter").unwrap();
    let b = graph.create_node("FrameFilter").unwrap();
    let out = port(&graph, src, "out");
    graph.connect(out, port(&graph, a, "in")).unwrap();
    graph.connect(port(&graph, b, "in"), out).unwrap();
    assert_eq!(graph.port(out).unwrap().links().len(), 2);
}

#[test]
fn test_multi_port_narrows_and_resets() {
    let mut graph = test_graph(1, 1);
    let recon = graph.create_node("Reconstruction").unwrap();
    let export = graph.create_node("Export").unwrap();
    let recon_out = port(&graph, recon, "out");
    let export_in = port(&graph, export, "in");

    assert_eq!(graph.port(export_in).unwrap().effective_kind(), PortKind::Multi);
    graph.connect(recon_out, export_in).unwrap();
    let narrowed = graph.port(export_in).unwrap();
    assert_eq!(narrowed.effective_kind(), PortKind::Reconstruction);
    assert_eq!(narrowed.label(), graph.port(recon_out).unwrap().label());

    graph.disconnect_all(export_in);
    let reset = graph.port(export_in).unwrap();
    assert_eq!(reset.effective_kind(), PortKind::Multi);
    assert_eq!(reset.label(), "Any image");
}

#[test]
fn test_multi_port_rejects_unlisted_kind() {
    let mut graph = test_graph(1, 1);
    let fit = graph.create_node("ParticleFit").unwrap();
    let export = graph.create_node("Export").unwrap();
    assert!(graph
        .connect(port(&graph, fit, "out"), port(&graph, export, "in"))
        .is_err());
}
