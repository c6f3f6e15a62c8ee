//! Causal ordering along parent references
//!
//! A live reply is often delivered before the log entry it answers. The
//! sequence is treated as a forest keyed by `parent_ref` and walked
//! depth-first from each root in arrival order, so every entry follows its
//! ancestors. Entries whose parent is missing become roots in place.

use std::collections::HashMap;

use crate::model::{Message, ParentRef};

/// Reorder `sequence` so that parents precede children.
///
/// Stable with respect to arrival order, never drops an entry, and
/// idempotent.
pub fn order_by_causal_chain(sequence: &[Message]) -> Vec<Message> {
    let len = sequence.len();

    let mut position: HashMap<&str, usize> = HashMap::with_capacity(len);
    for (pos, message) in sequence.iter().enumerate() {
        if let Some(id) = message.canonical_id() {
            position.entry(id).or_insert(pos);
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); len];
    let mut is_root = vec![true; len];
    for (pos, message) in sequence.iter().enumerate() {
        if let ParentRef::Id(parent) = &message.parent_ref {
            match position.get(parent.as_str()) {
                Some(&parent_pos) if parent_pos != pos => {
                    children[parent_pos].push(pos);
                    is_root[pos] = false;
                }
                // broken or self reference
                _ => {}
            }
        }
    }

    let mut visited = vec![false; len];
    let mut order = Vec::with_capacity(len);

    for pos in 0..len {
        if is_root[pos] {
            walk(pos, &children, &mut visited, &mut order);
        }
    }

    // Whatever is left sits on a parent cycle with no root above it
    for pos in 0..len {
        if !visited[pos] {
            walk(pos, &children, &mut visited, &mut order);
        }
    }

    order.into_iter().map(|pos| sequence[pos].clone()).collect()
}

fn walk(start: usize, children: &[Vec<usize>], visited: &mut [bool], order: &mut Vec<usize>) {
    let mut stack = vec![start];
    while let Some(pos) = stack.pop() {
        if visited[pos] {
            continue;
        }
        visited[pos] = true;
        order.push(pos);
        for &child in children[pos].iter().rev() {
            if !visited[child] {
                stack.push(child);
            }
        }
    }
}
