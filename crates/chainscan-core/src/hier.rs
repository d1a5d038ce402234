//! Hierarchical node naming
//!
//! A node's hierarchical name is the `/`-joined list of `Name` properties from
//! the top of its view down to the node itself, found by following parent
//! links upward.

use std::collections::{HashMap, HashSet};
use tracing::trace;

use crate::node::Node;
use crate::view::{View, ViewError};

/// Computes hierarchical names for nodes of one view, remembering ancestors
///
/// The walk stops at the first node without a parent, at a parent that cannot
/// be resolved, or as soon as a context repeats. A node that lists itself as
/// its own parent therefore terminates the path.
pub struct HierarchyNamer<'a> {
    view: &'a dyn View,
    cache: HashMap<String, String>,
}

enum WalkEnd {
    Root,
    Cached(String),
    Cycle,
}

impl<'a> HierarchyNamer<'a> {
    pub fn new(view: &'a dyn View) -> Self {
        Self {
            view,
            cache: HashMap::new(),
        }
    }

    pub async fn hier_name(&mut self, node: &Node) -> Result<String, ViewError> {
        if let Some(name) = self.cache.get(&node.ctx) {
            return Ok(name.clone());
        }

        // Ancestry from the node upward, as (ctx, segment)
        let mut chain = vec![(node.ctx.clone(), segment(node))];
        let mut visited = HashSet::from([node.ctx.clone()]);
        let mut current = node.clone();

        let end = loop {
            let Some(parent_ctx) = current.parent_ctx.clone() else {
                break WalkEnd::Root;
            };
            if let Some(prefix) = self.cache.get(&parent_ctx) {
                break WalkEnd::Cached(prefix.clone());
            }
            if !visited.insert(parent_ctx.clone()) {
                trace!(ctx = %node.ctx, parent = %parent_ctx, "Parent link cycle");
                break WalkEnd::Cycle;
            }
            match self.view.get_node(&parent_ctx, None).await? {
                Some(parent) if parent.ctx != current.ctx => {
                    chain.push((parent.ctx.clone(), segment(&parent)));
                    current = parent;
                }
                _ => break WalkEnd::Root,
            }
        };

        let mut path = match &end {
            WalkEnd::Cached(prefix) => Some(prefix.clone()),
            WalkEnd::Root | WalkEnd::Cycle => None,
        };
        let mut names = Vec::with_capacity(chain.len());
        for (ctx, seg) in chain.into_iter().rev() {
            let name = match path {
                Some(prefix) => format!("{}/{}", prefix, seg),
                None => seg,
            };
            names.push((ctx, name.clone()));
            path = Some(name);
        }

        let full = path.unwrap_or_default();
        // Names reached through a cycle depend on where the walk started
        match end {
            WalkEnd::Cycle => {
                self.cache.insert(node.ctx.clone(), full.clone());
            }
            WalkEnd::Root | WalkEnd::Cached(_) => self.cache.extend(names),
        }
        Ok(full)
    }
}

/// Compute a single hierarchical name without keeping a cache
pub async fn node_hier_name(view: &dyn View, node: &Node) -> Result<String, ViewError> {
    HierarchyNamer::new(view).hier_name(node).await
}

fn segment(node: &Node) -> String {
    node.name()
        .map(str::to_string)
        .unwrap_or_else(|| node.ctx.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use crate::static_view::StaticView;

    fn tree() -> StaticView {
        StaticView::new(
            "debugcore",
            vec![
                Node::new("rt-1", NodeKind::Generic).with_name("xcvc1902"),
                Node::new("rt-2", NodeKind::Generic)
                    .with_parent("rt-1")
                    .with_name("Versal"),
                Node::new("rt-3", NodeKind::Generic)
                    .with_parent("rt-2")
                    .with_name("APU"),
                Node::new("rt-4", NodeKind::Generic)
                    .with_parent("rt-3")
                    .with_name("Cortex-A72 #0"),
            ],
        )
    }

    #[tokio::test]
    async fn test_walks_to_root() {
        let view = tree();
        let leaf = view.node("rt-4").unwrap();
        let name = node_hier_name(&view, &leaf).await.unwrap();
        assert_eq!(name, "xcvc1902/Versal/APU/Cortex-A72 #0");
    }

    #[tokio::test]
    async fn test_root_is_its_own_name() {
        let view = tree();
        let root = view.node("rt-1").unwrap();
        assert_eq!(node_hier_name(&view, &root).await.unwrap(), "xcvc1902");
    }

    #[tokio::test]
    async fn test_memoized_names_match() {
        let view = tree();
        let mut namer = HierarchyNamer::new(&view);

        let apu = view.node("rt-3").unwrap();
        let leaf = view.node("rt-4").unwrap();
        assert_eq!(namer.hier_name(&apu).await.unwrap(), "xcvc1902/Versal/APU");
        assert_eq!(
            namer.hier_name(&leaf).await.unwrap(),
            "xcvc1902/Versal/APU/Cortex-A72 #0"
        );
    }

    #[tokio::test]
    async fn test_self_parent_terminates() {
        let view = StaticView::new(
            "memory",
            vec![
                Node::new("rt-1", NodeKind::Generic)
                    .with_parent("rt-1")
                    .with_name("loop"),
                Node::new("rt-2", NodeKind::Generic)
                    .with_parent("rt-1")
                    .with_name("child"),
            ],
        );

        let looped = view.node("rt-1").unwrap();
        assert_eq!(node_hier_name(&view, &looped).await.unwrap(), "loop");

        let child = view.node("rt-2").unwrap();
        assert_eq!(node_hier_name(&view, &child).await.unwrap(), "loop/child");
    }

    #[tokio::test]
    async fn test_two_node_cycle_terminates() {
        let view = StaticView::new(
            "memory",
            vec![
                Node::new("a", NodeKind::Generic).with_parent("b").with_name("A"),
                Node::new("b", NodeKind::Generic).with_parent("a").with_name("B"),
            ],
        );
        let a = view.node("a").unwrap();
        assert_eq!(node_hier_name(&view, &a).await.unwrap(), "B/A");
    }

    #[tokio::test]
    async fn test_unresolved_parent_stops() {
        let view = StaticView::new(
            "memory",
            vec![Node::new("rt-9", NodeKind::Generic)
                .with_parent("gone")
                .with_name("orphan")],
        );
        let orphan = view.node("rt-9").unwrap();
        assert_eq!(node_hier_name(&view, &orphan).await.unwrap(), "orphan");
    }
}
