//! Reading posterior tree files.
//!
//! The input is a NEXUS file as written by BEAST: an optional TRANSLATE
//! block mapping numeric tip ids to taxon names, followed by one `TREE`
//! line per posterior sample with the MCMC state number in its name and a
//! Newick body carrying `[&...]` annotations. Files ending in `.gz` are
//! transparently decompressed.
//!
//! Parsed trees come out as [`InputTree`]s with node heights measured from
//! the deepest tip, ready for model building.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use phylotree::tree::{NodeId, Tree};

use crate::error::{BccdError, Result};
use crate::tree::{InputNode, InputTree};

/// Strip BEAST annotations from a Newick string.
///
/// BEAST writes annotations like `:[&rate=0.123]2.45` where 2.45 is the
/// actual branch length; the `[&...]` blocks are removed, everything else
/// is kept verbatim.
fn strip_beast_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut in_annotation = false;
    let mut chars = newick.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '[' && chars.peek() == Some(&'&') {
            in_annotation = true;
        } else if ch == ']' && in_annotation {
            in_annotation = false;
        } else if !in_annotation {
            result.push(ch);
        }
    }

    result
}

struct TreeBlock<'a> {
    header: &'a str,
    body: String,
}

fn collect_tree_blocks(content: &str) -> Vec<TreeBlock<'_>> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TREE "))
        .take_while(|line| !line.trim().to_ascii_uppercase().starts_with("END;"))
        .filter_map(|line| {
            let mut parts = line.splitn(2, " = ");
            let header = parts.next()?.trim();
            let body = parts.next()?.trim().to_string();
            Some(TreeBlock { header, body })
        })
        .collect()
}

/// Extracts the MCMC state number from a tree header like `TREE STATE_25000`.
fn extract_state(header: &str) -> usize {
    if let Some(start) = header.to_ascii_uppercase().find("STATE_") {
        let rest = &header[start + "STATE_".len()..];
        let state: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(num) = state.parse::<usize>() {
            return num;
        }
    }
    0
}

/// Parses the TRANSLATE block mapping tip ids to taxon names.
///
/// ```text
/// TRANSLATE
///     1 '1959.M.CD.59.ZR59',
///     2 '1960.DRC60A',
///     ;
/// ```
fn parse_taxon_block(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .skip_while(|line| !line.trim().to_ascii_uppercase().starts_with("TRANSLATE"))
        .skip(1)
        .take_while(|line| !line.trim().starts_with(';'))
        .filter_map(|line| {
            let line = line.trim().trim_end_matches(',');
            let mut parts = line.split_whitespace();
            let id = parts.next()?.to_string();
            let label = parts.next()?.trim_matches('\'').to_string();
            Some((id, label))
        })
        .collect()
}

/// Replaces numeric leaf names with the taxon names from the TRANSLATE map.
fn rename_leaf_nodes(tree: &mut Tree, translate: &HashMap<String, String>) {
    for leaf_id in tree.get_leaves() {
        if let Ok(node) = tree.get_mut(&leaf_id) {
            if let Some(renamed) = node.name.as_ref().and_then(|n| translate.get(n)) {
                node.name = Some(renamed.clone());
            }
        }
    }
}

/// Converts a parsed tree into the height-based input representation.
///
/// Heights are measured from the deepest tip: a node's height is the
/// maximum root-to-tip distance minus its own distance from the root,
/// clamped at 0 for tips that sit slightly above it.
fn to_input_tree(tree: &Tree) -> Result<InputTree> {
    let root_id = tree.get_root().map_err(|e| BccdError::Parse(e.to_string()))?;
    let max_depth = max_tip_depth(tree, root_id, 0.0)?;
    let root = build_node(tree, root_id, 0.0, max_depth)?;
    Ok(InputTree { root })
}

fn edge_length(tree: &Tree, id: NodeId) -> Result<f64> {
    let node = tree.get(&id).map_err(|e| BccdError::Parse(e.to_string()))?;
    Ok(node.parent_edge.unwrap_or(0.0))
}

fn max_tip_depth(tree: &Tree, id: NodeId, depth: f64) -> Result<f64> {
    let node = tree.get(&id).map_err(|e| BccdError::Parse(e.to_string()))?;
    if node.children.is_empty() {
        return Ok(depth);
    }
    let mut max = f64::NEG_INFINITY;
    for &child in &node.children {
        max = max.max(max_tip_depth(tree, child, depth + edge_length(tree, child)?)?);
    }
    Ok(max)
}

fn build_node(tree: &Tree, id: NodeId, depth: f64, max_depth: f64) -> Result<InputNode> {
    let node = tree.get(&id).map_err(|e| BccdError::Parse(e.to_string()))?;
    let height = (max_depth - depth).max(0.0);

    if node.children.is_empty() {
        let label = node.name.clone().unwrap_or_else(|| id.to_string());
        return Ok(InputNode { label: Some(label), height, children: Vec::new() });
    }

    let mut children = Vec::with_capacity(node.children.len());
    for &child in &node.children {
        children.push(build_node(tree, child, depth + edge_length(tree, child)?, max_depth)?);
    }
    Ok(InputNode { label: None, height, children })
}

/// Parses posterior trees from NEXUS content.
///
/// `burnin_trees` drops the first n samples by position, `burnin_states`
/// drops samples at or below the given MCMC state; both 0 keeps everything.
/// Returns the TRANSLATE map alongside the retained trees.
pub fn parse_posterior_trees(
    content: &str,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> Result<(HashMap<String, String>, Vec<InputTree>)> {
    let taxons = parse_taxon_block(content);

    let mut trees = Vec::new();
    for (idx, block) in collect_tree_blocks(content).into_iter().enumerate() {
        let state = extract_state(block.header);
        let keep = (burnin_trees == 0 && burnin_states == 0)
            || (burnin_trees > 0 && idx >= burnin_trees)
            || (burnin_states > 0 && state > burnin_states);
        if !keep {
            continue;
        }

        let newick = strip_beast_annotations(&block.body);
        let mut tree =
            Tree::from_newick(&newick).map_err(|e| BccdError::Parse(e.to_string()))?;
        if use_real_taxa && !taxons.is_empty() {
            rename_leaf_nodes(&mut tree, &taxons);
        }
        trees.push(to_input_tree(&tree)?);
    }

    Ok((taxons, trees))
}

/// Reads and parses a posterior tree file; `.gz` files are decompressed.
pub fn read_posterior_trees<P: AsRef<Path>>(
    path: P,
    burnin_trees: usize,
    burnin_states: usize,
    use_real_taxa: bool,
) -> Result<(HashMap<String, String>, Vec<InputTree>)> {
    let path = path.as_ref();
    let mut content = String::new();
    if path.to_string_lossy().ends_with(".gz") {
        GzDecoder::new(File::open(path)?).read_to_string(&mut content)?;
    } else {
        File::open(path)?.read_to_string(&mut content)?;
    }
    parse_posterior_trees(&content, burnin_trees, burnin_states, use_real_taxa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;

    const NEXUS: &str = "#NEXUS\n\
        BEGIN TREES;\n\
        \tTRANSLATE\n\
        \t\t1 'Taxon.A',\n\
        \t\t2 'Taxon.B',\n\
        \t\t3 'Taxon.C'\n\
        \t\t;\n\
        TREE STATE_0 = ((1:[&rate=0.1]1.0,2:[&rate=0.2]1.0):[&rate=0.3]1.0,3:2.0);\n\
        TREE STATE_1000 = ((1:1.0,3:1.0):0.5,2:1.5);\n\
        END;\n";

    #[test]
    fn strips_beast_annotations() {
        let newick = "((A:[&rate=0.1]1.0,B:[&rate=0.2]1.0):[&h={1,2}]1.0,C:2.0);";
        assert_eq!(strip_beast_annotations(newick), "((A:1.0,B:1.0):1.0,C:2.0);");
    }

    #[test]
    fn extracts_state_numbers() {
        assert_eq!(extract_state("TREE STATE_25000"), 25000);
        assert_eq!(extract_state("tree state_42"), 42);
        assert_eq!(extract_state("TREE t1"), 0);
    }

    #[test]
    fn parses_taxon_block() {
        let taxons = parse_taxon_block(NEXUS);
        assert_eq!(taxons.len(), 3);
        assert_eq!(taxons["1"], "Taxon.A");
        assert_eq!(taxons["3"], "Taxon.C");
    }

    #[test]
    fn parses_trees_with_heights_and_real_taxa() {
        let (taxons, trees) = parse_posterior_trees(NEXUS, 0, 0, true).unwrap();
        assert_eq!(taxons.len(), 3);
        assert_eq!(trees.len(), 2);

        let tree = &trees[0];
        assert_abs_diff_eq!(tree.tree_height(), 2.0, epsilon = 1e-12);
        let mut labels = tree.leaf_labels();
        labels.sort();
        assert_eq!(labels, vec!["Taxon.A", "Taxon.B", "Taxon.C"]);

        // the cherry sits one unit below the root
        let cherry = &tree.root.children[0];
        assert_abs_diff_eq!(cherry.height, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn keeps_numeric_ids_without_translation() {
        let (_, trees) = parse_posterior_trees(NEXUS, 0, 0, false).unwrap();
        let mut labels = trees[0].leaf_labels();
        labels.sort();
        assert_eq!(labels, vec!["1", "2", "3"]);
    }

    #[test]
    fn burnin_by_tree_count_and_state() {
        let (_, trees) = parse_posterior_trees(NEXUS, 1, 0, true).unwrap();
        assert_eq!(trees.len(), 1);

        let (_, trees) = parse_posterior_trees(NEXUS, 0, 500, true).unwrap();
        assert_eq!(trees.len(), 1);

        let (_, trees) = parse_posterior_trees(NEXUS, 0, 0, true).unwrap();
        assert_eq!(trees.len(), 2);
    }

    #[test]
    fn reads_gzipped_files() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posterior.trees.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(NEXUS.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let (taxons, trees) = read_posterior_trees(&path, 0, 0, true).unwrap();
        assert_eq!(taxons.len(), 3);
        assert_eq!(trees.len(), 2);
    }
}
