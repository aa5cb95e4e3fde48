use std::collections::{HashMap, HashSet, VecDeque};

use heritage_types::models::{Comment, CommentNode};
use tracing::warn;
use uuid::Uuid;

/// Arrange a project's comments into trees.
///
/// `comments` must be oldest first. Top-level comments come out newest first;
/// replies keep conversation order (oldest first) at every depth. A comment
/// whose parent is not in the set is shown at top level rather than lost.
pub fn build_forest(
    comments: Vec<Comment>,
    like_counts: &HashMap<String, u64>,
    liked_by_viewer: &HashSet<String>,
) -> Vec<CommentNode> {
    let index: HashMap<Uuid, usize> = comments.iter().enumerate().map(|(i, c)| (c.id, i)).collect();

    let mut parent_of = vec![None; comments.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); comments.len()];
    let mut roots = Vec::new();
    for (i, comment) in comments.iter().enumerate() {
        match comment.parent_id {
            Some(parent) => match index.get(&parent) {
                Some(&p) => {
                    parent_of[i] = Some(p);
                    children[p].push(i);
                }
                None => {
                    warn!("Comment {} points at missing parent {}", comment.id, parent);
                    roots.push(i);
                }
            },
            None => roots.push(i),
        }
    }

    // Parents before children.
    let mut order = Vec::with_capacity(comments.len());
    let mut queue: VecDeque<usize> = roots.iter().copied().collect();
    while let Some(i) = queue.pop_front() {
        order.push(i);
        queue.extend(&children[i]);
    }
    if order.len() < comments.len() {
        warn!(
            "{} comment(s) sit in a parent cycle and are not shown",
            comments.len() - order.len()
        );
    }

    // Children are finished before their parent, so each node is built once
    // with its replies already in place.
    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut finished: Vec<Vec<CommentNode>> = vec![Vec::new(); slots.len()];
    let mut forest = Vec::with_capacity(roots.len());
    for &i in order.iter().rev() {
        let Some(comment) = slots[i].take() else {
            continue;
        };
        let mut replies = std::mem::take(&mut finished[i]);
        replies.reverse();

        let key = comment.id.to_string();
        let node = CommentNode {
            like_count: like_counts.get(&key).copied().unwrap_or(0),
            liked_by_viewer: liked_by_viewer.contains(&key),
            comment,
            replies,
        };
        match parent_of[i] {
            Some(p) => finished[p].push(node),
            None => forest.push(node),
        }
    }
    forest
}
