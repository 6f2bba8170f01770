use super::parser;
use crate::cascade::IncludeTypes;
use crate::core::{DbError, Result};
use crate::schema::MetadataRegistry;
use std::collections::HashSet;
use std::fmt;

/// Per-call plan of which associations to traverse, with what policy.
///
/// A tree is rooted at one entity type. Each edge names an association of
/// that type and carries the policy for this traversal plus the nested tree
/// for the association's target type. Edges are visited in insertion order.
///
/// `mask` records which operation kind the tree was built for; it selects the
/// default sub-trees generated by [`IncludeTree::include`].
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeTree {
    entity_type: String,
    mask: IncludeTypes,
    edges: Vec<IncludeEdge>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeEdge {
    association: String,
    node: IncludeNode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IncludeNode {
    policy: IncludeTypes,
    nested: IncludeTree,
}

impl IncludeEdge {
    pub fn association(&self) -> &str {
        &self.association
    }

    pub fn node(&self) -> &IncludeNode {
        &self.node
    }
}

impl IncludeNode {
    pub fn new(policy: IncludeTypes, nested: IncludeTree) -> Self {
        Self { policy, nested }
    }

    pub fn policy(&self) -> IncludeTypes {
        self.policy
    }

    pub fn nested(&self) -> &IncludeTree {
        &self.nested
    }
}

impl IncludeTree {
    pub fn new(entity_type: impl Into<String>, mask: IncludeTypes) -> Self {
        Self {
            entity_type: entity_type.into(),
            mask,
            edges: Vec::new(),
        }
    }

    /// Tree without edges, for reads. Edges added later with `include`
    /// fill their sub-trees from defaults matching FETCH; start from
    /// `new(entity_type, IncludeTypes::PERSIST)` when building a persist tree.
    pub fn empty(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, IncludeTypes::FETCH)
    }

    /// Every association whose default policy matches `mask`, recursively.
    pub fn defaults(
        registry: &MetadataRegistry,
        entity_type: &str,
        mask: IncludeTypes,
    ) -> Result<Self> {
        build_defaults(registry, entity_type, mask, &mut HashSet::new())
    }

    /// Default eager-load tree: associations whose policy includes FETCH.
    pub fn for_fetch(registry: &MetadataRegistry, entity_type: &str) -> Result<Self> {
        Self::defaults(registry, entity_type, IncludeTypes::FETCH)
    }

    /// Default persist tree: associations whose policy includes CREATE or UPDATE.
    pub fn for_persist(registry: &MetadataRegistry, entity_type: &str) -> Result<Self> {
        Self::defaults(registry, entity_type, IncludeTypes::PERSIST)
    }

    /// Default remove tree: associations whose policy includes DELETE or
    /// DELETE_ORPHANS.
    pub fn for_remove(registry: &MetadataRegistry, entity_type: &str) -> Result<Self> {
        Self::defaults(registry, entity_type, IncludeTypes::REMOVE)
    }

    /// Parses the text form, e.g. `lines{product},customer[FETCH]`.
    pub fn parse(registry: &MetadataRegistry, entity_type: &str, text: &str) -> Result<Self> {
        Self::parse_with_mask(registry, entity_type, IncludeTypes::FETCH, text)
    }

    pub fn parse_with_mask(
        registry: &MetadataRegistry,
        entity_type: &str,
        mask: IncludeTypes,
        text: &str,
    ) -> Result<Self> {
        registry.entity(entity_type)?;
        parser::parse(registry, entity_type, mask, text)
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn mask(&self) -> IncludeTypes {
        self.mask
    }

    pub fn edges(&self) -> impl Iterator<Item = &IncludeEdge> {
        self.edges.iter()
    }

    pub fn get(&self, association: &str) -> Option<&IncludeNode> {
        self.edges
            .iter()
            .find(|edge| edge.association == association)
            .map(|edge| &edge.node)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Adds `association` with its configured default policy and a freshly
    /// built default sub-tree for the target type.
    pub fn include(&mut self, registry: &MetadataRegistry, association: &str) -> Result<&mut Self> {
        let node = self.default_node(registry, association)?;
        self.put_edge(association, node);
        Ok(self)
    }

    /// Like [`include`](Self::include), then hands the nested tree to
    /// `refine`.
    pub fn include_with<F>(
        &mut self,
        registry: &MetadataRegistry,
        association: &str,
        refine: F,
    ) -> Result<&mut Self>
    where
        F: FnOnce(&mut IncludeTree) -> Result<()>,
    {
        let mut node = self.default_node(registry, association)?;
        refine(&mut node.nested)?;
        self.put_edge(association, node);
        Ok(self)
    }

    /// Adds `association` with an explicit policy instead of its default.
    pub fn include_explicit(
        &mut self,
        registry: &MetadataRegistry,
        association: &str,
        policy: IncludeTypes,
    ) -> Result<&mut Self> {
        let mut node = self.default_node(registry, association)?;
        node.policy = policy;
        self.put_edge(association, node);
        Ok(self)
    }

    /// Removes every edge.
    pub fn none(&mut self) -> &mut Self {
        self.edges.clear();
        self
    }

    /// Union with `other`: missing edges are appended, shared edges get the
    /// union of both policies and merged nested trees.
    pub fn merge(&mut self, other: &IncludeTree) {
        for edge in &other.edges {
            self.merge_edge(&edge.association, edge.node.clone());
        }
    }

    /// Copy of this tree with every association whose default policy matches
    /// `mask` added when the caller left it out.
    pub fn with_forced(&self, registry: &MetadataRegistry, mask: IncludeTypes) -> Result<Self> {
        let mut tree = self.clone();
        let meta = registry.entity(&self.entity_type)?;
        for association in &meta.associations {
            if !association.default_policy.matches_any_of(mask) || tree.get(&association.name).is_some() {
                continue;
            }
            let nested = build_defaults(
                registry,
                &association.target,
                mask,
                &mut seeded(&self.entity_type, &association.name),
            )?;
            tree.edges.push(IncludeEdge {
                association: association.name.clone(),
                node: IncludeNode::new(association.default_policy, nested),
            });
        }
        Ok(tree)
    }

    /// Adds an edge produced by the text parser, merging with an existing
    /// edge of the same name.
    pub(crate) fn merge_parsed(
        &mut self,
        registry: &MetadataRegistry,
        association: &str,
        policy: Option<IncludeTypes>,
        nested: Option<IncludeTree>,
    ) -> Result<()> {
        let mut node = match nested {
            Some(nested) => {
                let target = &registry.association(&self.entity_type, association)?.target;
                if nested.entity_type != *target {
                    return Err(DbError::InvalidConfiguration(format!(
                        "nested include for '{}.{}' is rooted at '{}' instead of '{}'",
                        self.entity_type, association, nested.entity_type, target
                    )));
                }
                let default_policy = registry
                    .association(&self.entity_type, association)?
                    .default_policy;
                IncludeNode::new(default_policy, nested)
            }
            None => self.default_node(registry, association)?,
        };
        if let Some(policy) = policy {
            node.policy = policy;
        }
        self.merge_edge(association, node);
        Ok(())
    }

    fn default_node(&self, registry: &MetadataRegistry, association: &str) -> Result<IncludeNode> {
        let meta = registry.association(&self.entity_type, association)?;
        let nested = build_defaults(
            registry,
            &meta.target,
            self.mask,
            &mut seeded(&self.entity_type, association),
        )?;
        Ok(IncludeNode::new(meta.default_policy, nested))
    }

    fn put_edge(&mut self, association: &str, node: IncludeNode) {
        match self.edges.iter_mut().find(|edge| edge.association == association) {
            Some(edge) => edge.node = node,
            None => self.edges.push(IncludeEdge {
                association: association.to_string(),
                node,
            }),
        }
    }

    fn merge_edge(&mut self, association: &str, node: IncludeNode) {
        match self.edges.iter_mut().find(|edge| edge.association == association) {
            Some(edge) => {
                edge.node.policy |= node.policy;
                edge.node.nested.merge(&node.nested);
            }
            None => self.edges.push(IncludeEdge {
                association: association.to_string(),
                node,
            }),
        }
    }
}

fn seeded(entity_type: &str, association: &str) -> HashSet<(String, String)> {
    let mut expanded = HashSet::new();
    expanded.insert((entity_type.to_string(), association.to_string()));
    expanded
}

// `expanded` holds the (type, association) pairs on the current build path;
// an association already on the path is not expanded again, which is what
// stops cyclic type graphs from recursing forever.
fn build_defaults(
    registry: &MetadataRegistry,
    entity_type: &str,
    mask: IncludeTypes,
    expanded: &mut HashSet<(String, String)>,
) -> Result<IncludeTree> {
    let meta = registry.entity(entity_type)?;
    let mut tree = IncludeTree::new(entity_type, mask);
    for association in &meta.associations {
        if !association.default_policy.matches_any_of(mask) {
            continue;
        }
        let path_entry = (meta.name.clone(), association.name.clone());
        if !expanded.insert(path_entry.clone()) {
            continue;
        }
        let nested = build_defaults(registry, &association.target, mask, expanded);
        expanded.remove(&path_entry);
        tree.edges.push(IncludeEdge {
            association: association.name.clone(),
            node: IncludeNode::new(association.default_policy, nested?),
        });
    }
    Ok(tree)
}

impl fmt::Display for IncludeTree {
    /// Text form accepted by [`IncludeTree::parse`]; nested trees are always
    /// written out so the text reproduces this exact tree.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, edge) in self.edges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(
                f,
                "{}[{}]{{{}}}",
                edge.association,
                edge.node.policy.names().join(","),
                edge.node.nested
            )?;
        }
        Ok(())
    }
}
