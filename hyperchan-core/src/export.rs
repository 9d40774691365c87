//! GraphML export of a [`HyperNetwork`], in two forms: hyperedges as-is,
//! or expanded to the clique (2-section) graph.

use std::io::{self, Write};

use crate::network::HyperNetwork;

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<graphml xmlns="http://graphml.graphdrawing.org/xmlns">
"#;

/// One `<node>` per participant, one `<hyperedge>` per channel with one
/// `<endpoint>` per member in member insertion order.
pub fn write_hyperedge_graphml<W: Write>(net: &HyperNetwork, w: &mut W) -> io::Result<()> {
    write!(w, "{HEADER}")?;
    writeln!(w, r#"<graph id="G" edgedefault="undirected">"#)?;

    let mut node_index = std::collections::HashMap::new();
    for (i, p) in net.participants().enumerate() {
        let n = i + 1;
        node_index.insert(p, n);
        writeln!(w, r#"  <node id="n{n}"/>"#)?;
    }

    for (i, (_, channel)) in net.channels().enumerate() {
        writeln!(w, r#"  <hyperedge id="e{}">"#, i + 1)?;
        for &m in channel.members() {
            let n = node_index[&m];
            writeln!(w, r#"    <endpoint node="n{n}"/>"#)?;
        }
        writeln!(w, "  </hyperedge>")?;
    }

    writeln!(w, "</graph>")?;
    writeln!(w, "</graphml>")
}

/// One `<node>` per participant; every channel of size >= 2 expanded into
/// the ordered-pair clique on its members (`i < j` in member insertion
/// order), each emitted as an `<edge>`.
pub fn write_clique_graphml<W: Write>(net: &HyperNetwork, w: &mut W) -> io::Result<()> {
    write!(w, "{HEADER}")?;
    writeln!(w, r#"<graph id="G" edgedefault="undirected">"#)?;

    let mut node_index = std::collections::HashMap::new();
    for (i, p) in net.participants().enumerate() {
        let n = i + 1;
        node_index.insert(p, n);
        writeln!(w, r#"  <node id="n{n}"/>"#)?;
    }

    let mut edge_count = 0usize;
    for (_, channel) in net.channels() {
        let members = channel.members();
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                edge_count += 1;
                let (na, nb) = (node_index[&a], node_index[&b]);
                writeln!(w, r#"  <edge id="e{edge_count}" source="n{na}" target="n{nb}"/>"#)?;
            }
        }
    }

    writeln!(w, "</graph>")?;
    writeln!(w, "</graphml>")
}
