//! C3 linearization
//!
//! Computes a deterministic precedence order over a graph of contributions:
//! every node comes before its parents, the local order of each node's parents
//! is preserved, and a node shared by several branches appears once, after
//! everything that depends on it.

use std::collections::HashMap;
use std::hash::Hash;

/// Linearization failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinearizeError<N, E> {
    /// A node is its own ancestor. The chain starts and ends with that node.
    Cycle(Vec<N>),
    /// The parents of this node cannot be ordered consistently
    Inconsistent(N),
    /// The parent lookup itself failed
    Parents(E),
}

/// Linearize `root` using C3.
///
/// `parents` returns the direct parents of a node, highest precedence first.
/// Duplicate parents are ignored after their first occurrence.
pub fn linearize<N, E, F>(root: &N, parents: &mut F) -> Result<Vec<N>, LinearizeError<N, E>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> Result<Vec<N>, E>,
{
    let mut memo = HashMap::new();
    let mut stack = Vec::new();
    linearize_node(root, parents, &mut memo, &mut stack)
}

fn linearize_node<N, E, F>(
    node: &N,
    parents: &mut F,
    memo: &mut HashMap<N, Vec<N>>,
    stack: &mut Vec<N>,
) -> Result<Vec<N>, LinearizeError<N, E>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> Result<Vec<N>, E>,
{
    if let Some(done) = memo.get(node) {
        return Ok(done.clone());
    }
    if let Some(pos) = stack.iter().position(|n| n == node) {
        let mut chain = stack[pos..].to_vec();
        chain.push(node.clone());
        return Err(LinearizeError::Cycle(chain));
    }

    let mut direct: Vec<N> = Vec::new();
    for parent in parents(node).map_err(LinearizeError::Parents)? {
        if !direct.contains(&parent) {
            direct.push(parent);
        }
    }

    stack.push(node.clone());
    let mut sequences = Vec::with_capacity(direct.len() + 1);
    for parent in &direct {
        sequences.push(linearize_node(parent, parents, memo, stack)?);
    }
    stack.pop();
    sequences.push(direct);

    let mut order = vec![node.clone()];
    let merged = merge(sequences).ok_or_else(|| LinearizeError::Inconsistent(node.clone()))?;
    order.extend(merged);

    memo.insert(node.clone(), order.clone());
    Ok(order)
}

/// C3 merge: repeatedly take the first head that is not in the tail of any
/// other sequence.
fn merge<N: Clone + Eq>(mut sequences: Vec<Vec<N>>) -> Option<Vec<N>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|s| !s.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }

        let candidate = sequences
            .iter()
            .map(|s| &s[0])
            .find(|head| !sequences.iter().any(|s| s[1..].contains(*head)))?
            .clone();

        for sequence in sequences.iter_mut() {
            if sequence[0] == candidate {
                sequence.remove(0);
            }
        }
        result.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn graph(edges: &[(&'static str, &[&'static str])]) -> HashMap<&'static str, Vec<&'static str>> {
        edges.iter().map(|(n, p)| (*n, p.to_vec())).collect()
    }

    fn run(
        g: &HashMap<&'static str, Vec<&'static str>>,
        root: &'static str,
    ) -> Result<Vec<&'static str>, LinearizeError<&'static str, Infallible>> {
        linearize(&root, &mut |n: &&'static str| Ok(g.get(n).cloned().unwrap_or_default()))
    }

    #[test]
    fn test_single_chain() {
        let g = graph(&[("c", &["b"]), ("b", &["a"])]);
        assert_eq!(run(&g, "c").unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_diamond() {
        let g = graph(&[("d", &["b", "c"]), ("b", &["a"]), ("c", &["a"])]);
        assert_eq!(run(&g, "d").unwrap(), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_classic_c3_example() {
        // O is the shared root
        let g = graph(&[
            ("a", &["o"]),
            ("b", &["o"]),
            ("c", &["o"]),
            ("d", &["o"]),
            ("e", &["o"]),
            ("k1", &["a", "b", "c"]),
            ("k2", &["d", "b", "e"]),
            ("k3", &["d", "a"]),
            ("z", &["k1", "k2", "k3"]),
        ]);
        assert_eq!(
            run(&g, "z").unwrap(),
            vec!["z", "k1", "k2", "k3", "d", "a", "b", "c", "e", "o"]
        );
    }

    #[test]
    fn test_cycle_is_reported() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        match run(&g, "a").unwrap_err() {
            LinearizeError::Cycle(chain) => assert_eq!(chain, vec!["a", "b", "c", "a"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_inconsistent_order() {
        let g = graph(&[("x", &["a", "b"]), ("y", &["b", "a"]), ("z", &["x", "y"])]);
        assert_eq!(run(&g, "z").unwrap_err(), LinearizeError::Inconsistent("z"));
    }

    #[test]
    fn test_duplicate_parents_collapse() {
        let g = graph(&[("b", &["a", "a"])]);
        assert_eq!(run(&g, "b").unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_parent_lookup_error() {
        let result: Result<Vec<&'static str>, LinearizeError<&'static str, String>> =
            linearize(&"a", &mut |_: &&'static str| Err("boom".to_string()));
        assert_eq!(result.unwrap_err(), LinearizeError::Parents("boom".to_string()));
    }
}
