//! Dependency resolver - orders declarations by their references
//!
//! Ordering is a depth-first topological sort. Roots are visited in
//! registration order and edges in first-reference order, so the same
//! declarations always produce the same order.

use crate::error::GraphError;
use crate::store::{Activity, DeclarationStore};
use crate::types::Address;
use std::collections::{BTreeSet, HashMap};

/// Apply order: every declaration after everything it references
pub fn apply_order(store: &DeclarationStore) -> Result<Vec<Address>, GraphError> {
    let nodes: Vec<Address> = store.addresses().cloned().collect();
    topological_order(&nodes, |address| store.dependencies(address).to_vec())
}

/// Destroy order for a set of declared resources
///
/// The exact reverse of [`apply_order`], restricted to `targets`. Fails if a
/// surviving active declaration still references one of the targets.
pub fn destroy_order(
    store: &DeclarationStore,
    activity: &Activity,
    targets: &BTreeSet<Address>,
) -> Result<Vec<Address>, GraphError> {
    for address in store.addresses() {
        if targets.contains(address) || !activity.is_active(address) {
            continue;
        }
        if let Some(target) = store
            .dependencies(address)
            .iter()
            .find(|d| targets.contains(*d))
        {
            return Err(GraphError::DanglingReference {
                from: address.clone(),
                target: target.clone(),
            });
        }
    }

    let mut order = apply_order(store)?;
    order.retain(|a| targets.contains(a));
    order.reverse();
    Ok(order)
}

/// Depth-first topological order over `nodes`
///
/// `dependencies` yields the edges of a node; edges to addresses outside
/// `nodes` are ignored. A back-edge to a node on the current path fails with
/// [`GraphError::CycleDetected`].
pub fn topological_order<F>(nodes: &[Address], dependencies: F) -> Result<Vec<Address>, GraphError>
where
    F: Fn(&Address) -> Vec<Address>,
{
    let mut walker = Walker {
        nodes,
        position: nodes.iter().enumerate().map(|(i, a)| (a, i)).collect(),
        dependencies: &dependencies,
        marks: vec![None; nodes.len()],
        path: Vec::new(),
        order: Vec::with_capacity(nodes.len()),
    };
    for i in 0..nodes.len() {
        walker.visit(i)?;
    }
    Ok(walker.order.into_iter().map(|i| nodes[i].clone()).collect())
}

/// Group an already valid order into waves of mutually independent nodes
///
/// A node lands one wave after the latest of its prerequisites. Within a
/// wave the input order is kept.
pub fn levels<F>(order: &[Address], prerequisites: F) -> Vec<Vec<Address>>
where
    F: Fn(&Address) -> Vec<Address>,
{
    let mut level_of: HashMap<&Address, usize> = HashMap::new();
    let mut waves: Vec<Vec<Address>> = Vec::new();
    for address in order {
        let level = prerequisites(address)
            .iter()
            .filter_map(|p| level_of.get(p).map(|l| l + 1))
            .max()
            .unwrap_or(0);
        level_of.insert(address, level);
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(address.clone());
    }
    waves
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

struct Walker<'a, F> {
    nodes: &'a [Address],
    position: HashMap<&'a Address, usize>,
    dependencies: &'a F,
    marks: Vec<Option<Mark>>,
    path: Vec<usize>,
    order: Vec<usize>,
}

impl<F> Walker<'_, F>
where
    F: Fn(&Address) -> Vec<Address>,
{
    fn visit(&mut self, i: usize) -> Result<(), GraphError> {
        match self.marks[i] {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = self.path.iter().position(|&p| p == i).unwrap_or(0);
                let mut cycle: Vec<Address> = self.path[start..]
                    .iter()
                    .map(|&p| self.nodes[p].clone())
                    .collect();
                cycle.push(self.nodes[i].clone());
                return Err(GraphError::CycleDetected { cycle });
            }
            None => {}
        }

        self.marks[i] = Some(Mark::Visiting);
        self.path.push(i);
        for dep in (self.dependencies)(&self.nodes[i]) {
            if let Some(&j) = self.position.get(&dep) {
                self.visit(j)?;
            }
        }
        self.path.pop();
        self.marks[i] = Some(Mark::Visited);
        self.order.push(i);
        Ok(())
    }
}
