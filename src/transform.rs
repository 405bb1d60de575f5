use std::collections::HashMap;

use crate::models::{SankeyGraph, SankeyLink, TransitionRow};

/// Maps transition rows into node/link index space.
///
/// Nodes are numbered in order of first appearance, scanning each row's source before its
/// target, so identical result sets always produce the same layout.
pub fn build_sankey_graph(rows: &[TransitionRow]) -> SankeyGraph {
    let mut nodes: Vec<String> = Vec::new();
    let mut node_indices: HashMap<&str, usize> = HashMap::new();

    let mut links = Vec::with_capacity(rows.len());
    for row in rows {
        let source = intern(&row.source, &mut node_indices, &mut nodes);
        let target = intern(&row.target, &mut node_indices, &mut nodes);
        links.push(SankeyLink {
            source,
            target,
            value: row.value,
        });
    }

    SankeyGraph { nodes, links }
}

fn intern<'a>(
    label: &'a str,
    node_indices: &mut HashMap<&'a str, usize>,
    nodes: &mut Vec<String>,
) -> usize {
    *node_indices.entry(label).or_insert_with(|| {
        nodes.push(label.to_string());
        nodes.len() - 1
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::build_sankey_graph;
    use crate::models::TransitionRow;

    fn sample_rows() -> Vec<TransitionRow> {
        vec![
            TransitionRow::new("Home", "Settings", 10),
            TransitionRow::new("Settings", "Home", 5),
            TransitionRow::new("Home", "Profile", 3),
        ]
    }

    #[test]
    fn shapes_sample_rows_into_three_nodes_and_weighted_links() {
        let graph = build_sankey_graph(&sample_rows());

        let labels: HashSet<&str> = graph.nodes.iter().map(String::as_str).collect();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(labels, HashSet::from(["Home", "Settings", "Profile"]));
        assert_eq!(graph.links.len(), 3);

        let resolved: Vec<(&str, &str, u64)> = graph
            .links
            .iter()
            .map(|l| {
                (
                    graph.nodes[l.source].as_str(),
                    graph.nodes[l.target].as_str(),
                    l.value,
                )
            })
            .collect();
        assert_eq!(
            resolved,
            vec![
                ("Home", "Settings", 10),
                ("Settings", "Home", 5),
                ("Home", "Profile", 3),
            ]
        );
    }

    #[test]
    fn link_count_matches_rows_and_indices_stay_in_range() {
        let rows = vec![
            TransitionRow::new("A", "B", 1),
            TransitionRow::new("B", "C", 2),
            TransitionRow::new("C", "D", 3),
            TransitionRow::new("A", "D", 4),
            TransitionRow::new("E", "A", 5),
        ];
        let graph = build_sankey_graph(&rows);

        assert_eq!(graph.links.len(), rows.len());
        let distinct: HashSet<&str> = rows
            .iter()
            .flat_map(|r| [r.source.as_str(), r.target.as_str()])
            .collect();
        assert_eq!(graph.nodes.len(), distinct.len());
        assert!(graph
            .links
            .iter()
            .all(|l| l.source < graph.nodes.len() && l.target < graph.nodes.len()));
    }

    #[test]
    fn node_order_follows_first_appearance() {
        let graph = build_sankey_graph(&sample_rows());
        assert_eq!(graph.nodes, vec!["Home", "Settings", "Profile"]);
        assert_eq!(graph, build_sankey_graph(&sample_rows()));
    }

    #[test]
    fn empty_rows_yield_empty_graph() {
        let graph = build_sankey_graph(&[]);
        assert!(graph.nodes.is_empty());
        assert!(graph.links.is_empty());
    }
}
