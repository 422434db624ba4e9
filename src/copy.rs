//! Projection of a master structure onto the fields selected by a request.
//!
//! A [`PVCopy`] is built once for a master type and a [`SelectionTree`]. It
//! owns the reduced "copy" type, which holds only the selected fields, and a
//! tree of nodes mapping each part of the copy back to the master. Values are
//! then moved between a master instance and copy instances, driven by a
//! [`BitSet`] of changed copy offsets:
//!
//! - [`PVCopy::init_copy`] fills a new copy from the master.
//! - [`PVCopy::update_copy_set_bitset`] copies whatever differs, marking it.
//! - [`PVCopy::update_copy_from_bitset`] copies what the bitset says changed.
//! - [`PVCopy::update_master`] writes marked copy fields back to the master.
//!
//! The node tree is immutable after construction, so one engine may be shared
//! between threads. Each (copy, bitset) pair is mutated in place and belongs to
//! one caller at a time. The caller is also responsible for locking the master.
//!
//! [`SelectionTree`]: crate::request::SelectionTree

use std::{fmt, sync::Arc};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    bitset::BitSet,
    introspect::{Field, FieldCreate, FieldFactory, IntrospectError, Structure},
    plugin::{FilterTarget, PVFilter, PluginRegistry},
    pvdata::{PVField, PVStructure},
    request::OPTIONS,
};

/// The option that suppresses notification of changes confined to a field
pub const IGNORE_OPTION: &str = "ignore";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CopyError {
    #[error("Request has no sub-structure named '{0}'")]
    MissingStructure(String),
    #[error("Request selects no field present in the master")]
    EmptySelection,
    #[error("Could not build copy structure: {0}")]
    Introspect(#[from] IntrospectError),
}

/// Index of a node in the engine's node arena
pub type NodeId = usize;

/// A field of the master, located by offset within the master type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterFieldRef {
    pub offset: usize,
    pub nfields: usize,
}

impl MasterFieldRef {
    /// Does this field, or one of its descendants, sit at `offset`
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.offset && offset < self.offset + self.nfields
    }

    /// The value of this field in a master instance. The master root is not a
    /// sub-field of itself, so offset 0 resolves to `None`.
    pub fn resolve<'m>(&self, master: &'m PVStructure) -> Option<&'m PVField> {
        master.sub_field_at(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Mirrors a master field and everything below it
    Leaf,
    /// Mirrors a master structure of which only some fields are selected
    Aggregate { children: Vec<NodeId> },
}

pub struct CopyNode {
    /// Offset of this node in the copy
    pub structure_offset: usize,
    /// Span of this node in the copy
    pub nfields: usize,
    /// The master field this node stands for
    pub master: MasterFieldRef,
    pub options: Option<PVStructure>,
    pub filters: Vec<Arc<dyn PVFilter>>,
    pub kind: NodeKind,
}

impl CopyNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }
    fn contains(&self, offset: usize) -> bool {
        offset >= self.structure_offset && offset < self.structure_offset + self.nfields
    }
}

impl fmt::Debug for CopyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filters: Vec<&str> = self.filters.iter().map(|filter| filter.name()).collect();
        f.debug_struct("CopyNode")
            .field("structure_offset", &self.structure_offset)
            .field("nfields", &self.nfields)
            .field("master", &self.master)
            .field("options", &self.options.as_ref().map(|o| o.to_string()))
            .field("filters", &filters)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Configures and builds a [`PVCopy`]
pub struct CopyBuilder<'a> {
    master: &'a PVStructure,
    request: &'a PVStructure,
    structure_name: Option<String>,
    plugins: Option<&'a PluginRegistry>,
    factory: &'a dyn FieldFactory,
}

impl<'a> CopyBuilder<'a> {
    pub fn new(master: &'a PVStructure, request: &'a PVStructure) -> Self {
        CopyBuilder {
            master,
            request,
            structure_name: None,
            plugins: None,
            factory: &FieldCreate,
        }
    }
    /// Select from this clause of the request, e.g. `putField`, instead of `field`
    pub fn structure_name(mut self, name: &str) -> Self {
        self.structure_name = Some(name.to_string());
        self
    }
    pub fn plugins(mut self, registry: &'a PluginRegistry) -> Self {
        self.plugins = Some(registry);
        self
    }
    pub fn factory(mut self, factory: &'a dyn FieldFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn build(self) -> Result<PVCopy, CopyError> {
        let selection = match &self.structure_name {
            Some(name) if !self.request.is_empty() => Some(
                self.request
                    .sub_structure(name)
                    .ok_or_else(|| CopyError::MissingStructure(name.clone()))?,
            ),
            _ => match self.request.sub_structure("field") {
                Some(field) => Some(field),
                None if selects_everything(self.request) => None,
                None => Some(self.request),
            },
        };
        let mut copy = PVCopy::init(self.master.structure().clone(), selection, self.factory)?;
        copy.attach_options(self.plugins);
        debug!(
            "Built copy of {} fields over master '{}' of {} fields",
            copy.structure.number_fields(),
            copy.master.id(),
            copy.master.number_fields()
        );
        Ok(copy)
    }
}

/// A request that only has record options selects the whole master
fn selects_everything(request: &PVStructure) -> bool {
    request
        .structure()
        .names()
        .iter()
        .all(|name| name == "record")
}

/// Does a request sub-structure select sub-fields, beyond its options
fn has_selection(request: &PVStructure) -> bool {
    request.iter().any(|(name, _)| name != OPTIONS)
}

/// Maps a master structure onto the fields selected by a request
#[derive(Debug)]
pub struct PVCopy {
    master: Arc<Structure>,
    structure: Arc<Structure>,
    nodes: Vec<CopyNode>,
    root: NodeId,
    ignore: BitSet,
}

impl PVCopy {
    /// Build with the standard field factory and no plugins
    pub fn build(
        master: &PVStructure,
        request: &PVStructure,
        structure_name: Option<&str>,
    ) -> Result<PVCopy, CopyError> {
        let builder = CopyBuilder::new(master, request);
        match structure_name {
            Some(name) => builder.structure_name(name).build(),
            None => builder.build(),
        }
    }

    /// `None` selects the whole master
    fn init(
        master: Arc<Structure>,
        selection: Option<&PVStructure>,
        factory: &dyn FieldFactory,
    ) -> Result<PVCopy, CopyError> {
        let selection = match selection {
            Some(selection) if has_selection(selection) => selection,
            _ => {
                let options = selection.and_then(|s| s.sub_structure(OPTIONS)).cloned();
                let nfields = master.number_fields();
                let root = CopyNode {
                    structure_offset: 0,
                    nfields,
                    master: MasterFieldRef { offset: 0, nfields },
                    options,
                    filters: Vec::new(),
                    kind: NodeKind::Leaf,
                };
                return Ok(PVCopy {
                    structure: master.clone(),
                    master,
                    nodes: vec![root],
                    root: 0,
                    ignore: BitSet::new(),
                });
            }
        };

        let structure =
            create_structure(factory, &master, selection)?.ok_or(CopyError::EmptySelection)?;
        let mut nodes = Vec::new();
        let root = create_nodes(
            &mut nodes,
            &structure,
            0,
            &master,
            MasterFieldRef {
                offset: 0,
                nfields: master.number_fields(),
            },
            selection,
        );
        Ok(PVCopy {
            master,
            structure,
            nodes,
            root,
            ignore: BitSet::new(),
        })
    }

    /// Turn node options into filters and the ignore mask
    fn attach_options(&mut self, plugins: Option<&PluginRegistry>) {
        for id in 0..self.nodes.len() {
            let node = &self.nodes[id];
            let Some(options) = &node.options else {
                continue;
            };
            let mut filters = Vec::new();
            let mut ignore = false;
            for (name, value) in options.iter() {
                if name == IGNORE_OPTION {
                    ignore = true;
                    continue;
                }
                if !node.is_leaf() {
                    continue;
                }
                let Some(plugin) = plugins.and_then(|p| p.find(name)) else {
                    continue;
                };
                let value = value.as_scalar().and_then(|v| v.as_str()).unwrap_or("");
                match plugin.create(value, &self.structure, &self.master, node.master.offset) {
                    Some(filter) => {
                        debug!(
                            "Attached filter '{}' at copy offset {}",
                            filter.name(),
                            node.structure_offset
                        );
                        filters.push(filter);
                    }
                    None => debug!("Plugin '{name}' declined '{value}'"),
                }
            }
            if ignore {
                for bit in node.structure_offset..node.structure_offset + node.nfields {
                    self.ignore.set(bit);
                }
            }
            self.nodes[id].filters = filters;
        }
    }

    /// The type of copy instances
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// The type of the master this engine was built for
    pub fn master_structure(&self) -> &Arc<Structure> {
        &self.master
    }

    /// A new, default-valued copy instance
    pub fn create_copy(&self) -> PVStructure {
        PVStructure::new(self.structure.clone())
    }

    pub fn node(&self, id: NodeId) -> &CopyNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &CopyNode {
        &self.nodes[self.root]
    }

    /// Copy offsets of fields marked with the `ignore` option
    pub fn ignore_mask(&self) -> &BitSet {
        &self.ignore
    }

    fn leaves(&self) -> Vec<&CopyNode> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            match &node.kind {
                NodeKind::Leaf => leaves.push(node),
                NodeKind::Aggregate { children } => stack.extend(children.iter().rev()),
            }
        }
        leaves
    }

    /// Call `callback` with the master field of every leaf, in copy order
    pub fn traverse_master<F: FnMut(MasterFieldRef)>(&self, mut callback: F) {
        for leaf in self.leaves() {
            callback(leaf.master);
        }
    }

    /// Offset in the copy of the master field at `master_offset`, if selected
    pub fn copy_offset_of(&self, master_offset: usize) -> Option<usize> {
        if master_offset == 0 {
            return Some(0);
        }
        self.leaves()
            .into_iter()
            .find(|leaf| leaf.master.contains(master_offset))
            .map(|leaf| leaf.structure_offset + (master_offset - leaf.master.offset))
    }

    /// Offset in the copy of the master field at a dotted path
    pub fn copy_offset_of_path(&self, path: &str) -> Option<usize> {
        self.copy_offset_of(self.master.offset_of(path)?)
    }

    /// The master field behind the copy field at `copy_offset`.
    ///
    /// # Panics
    /// If `copy_offset` is outside the copy structure.
    pub fn master_field_at(&self, copy_offset: usize) -> MasterFieldRef {
        let mut node = self.root();
        assert!(
            node.contains(copy_offset),
            "Copy offset {copy_offset} outside copy of {} fields",
            node.nfields
        );
        loop {
            if copy_offset == node.structure_offset {
                return node.master;
            }
            match &node.kind {
                NodeKind::Leaf => {
                    let offset = node.master.offset + (copy_offset - node.structure_offset);
                    let nfields = self
                        .master
                        .field_at(offset)
                        .map(Field::number_fields)
                        .unwrap_or(1);
                    return MasterFieldRef { offset, nfields };
                }
                NodeKind::Aggregate { children } => {
                    node = children
                        .iter()
                        .map(|&id| &self.nodes[id])
                        .find(|child| child.contains(copy_offset))
                        .unwrap_or_else(|| {
                            panic!("Copy offset {copy_offset} not covered by any node")
                        });
                }
            }
        }
    }

    /// Options given in the request for the copy field at `offset`.
    ///
    /// Offsets inside a leaf other than its own have no options.
    ///
    /// # Panics
    /// If `offset` is outside the copy structure.
    pub fn get_options(&self, offset: usize) -> Option<&PVStructure> {
        let mut node = self.root();
        assert!(
            node.contains(offset),
            "Copy offset {offset} outside copy of {} fields",
            node.nfields
        );
        loop {
            if offset == node.structure_offset {
                return node.options.as_ref();
            }
            match &node.kind {
                NodeKind::Leaf => return None,
                NodeKind::Aggregate { children } => {
                    node = children
                        .iter()
                        .map(|&id| &self.nodes[id])
                        .find(|child| child.contains(offset))?;
                }
            }
        }
    }

    fn check_types(&self, master: &PVStructure, copy: &PVStructure) {
        assert!(
            Arc::ptr_eq(master.structure(), &self.master) || **master.structure() == *self.master,
            "Master instance is not of the type this copy was built for"
        );
        assert!(
            Arc::ptr_eq(copy.structure(), &self.structure)
                || **copy.structure() == *self.structure,
            "Copy instance is not of this engine's copy type"
        );
    }

    fn check_bits(&self, bits: &BitSet) {
        assert!(
            bits.length() <= self.structure.number_fields(),
            "Bit {} set beyond copy of {} fields",
            bits.length().saturating_sub(1),
            self.structure.number_fields()
        );
    }

    /// Clear `bits` if every set bit is a field marked `ignore`
    fn check_ignore(&self, bits: &mut BitSet) {
        if self.ignore.is_empty() || bits.is_empty() {
            return;
        }
        if bits.is_subset(&self.ignore) {
            trace!("Suppressing changes {bits} confined to ignored fields");
            bits.clear_all();
        }
    }

    fn run_filters(&self, node: &CopyNode, target: &mut FilterTarget<'_>, bits: &mut BitSet) -> bool {
        let mut handled = false;
        for filter in &node.filters {
            handled |= filter.filter(target.reborrow(), node.structure_offset, bits);
        }
        handled
    }

    /// Fill a fresh copy from the master. Sets bit 0 of `bits` only.
    ///
    /// Returns the number of values copied.
    pub fn init_copy(&self, master: &PVStructure, copy: &mut PVStructure, bits: &mut BitSet) -> usize {
        bits.clear_all();
        bits.set(0);
        self.update_copy_from_bitset(master, copy, bits)
    }

    /// Copy every selected master value that differs from the copy, setting
    /// the bit of each field copied. Structure arrays always have their bit set.
    ///
    /// Returns the number of values copied.
    pub fn update_copy_set_bitset(
        &self,
        master: &PVStructure,
        copy: &mut PVStructure,
        bits: &mut BitSet,
    ) -> usize {
        self.check_types(master, copy);
        self.check_bits(bits);
        let copied = self.set_bitset_node(self.root, master, copy, bits);
        self.check_ignore(bits);
        copied
    }

    fn set_bitset_node(
        &self,
        id: NodeId,
        master: &PVStructure,
        copy: &mut PVStructure,
        bits: &mut BitSet,
    ) -> usize {
        let node = &self.nodes[id];
        match &node.kind {
            NodeKind::Aggregate { children } => {
                let mut copied = 0;
                for &child in children {
                    copied += self.set_bitset_node(child, master, copy, bits);
                }
                copied
            }
            NodeKind::Leaf => {
                let mut target = FilterTarget::ToCopy {
                    master,
                    copy: &mut *copy,
                };
                if self.run_filters(node, &mut target, bits) {
                    return 0;
                }
                if node.structure_offset == 0 {
                    return diff_children(copy, master, 0, bits);
                }
                let (Some(to), Some(from)) = (
                    copy.sub_field_at_mut(node.structure_offset),
                    node.master.resolve(master),
                ) else {
                    panic!("Copy node at {} has no value", node.structure_offset);
                };
                diff_field(to, from, node.structure_offset, bits)
            }
        }
    }

    /// Copy master values for every field marked in `bits`. Bit 0, or the bit
    /// of a structure, marks everything below it.
    ///
    /// Returns the number of values copied.
    pub fn update_copy_from_bitset(
        &self,
        master: &PVStructure,
        copy: &mut PVStructure,
        bits: &mut BitSet,
    ) -> usize {
        self.check_types(master, copy);
        self.check_bits(bits);
        let do_all = bits.get(0);
        let mut target = FilterTarget::ToCopy { master, copy };
        let copied = self.from_bitset_node(self.root, &mut target, bits, do_all);
        self.check_ignore(bits);
        copied
    }

    /// Write copy values for every field marked in `bits` back to the master.
    ///
    /// Returns the number of values copied.
    pub fn update_master(
        &self,
        master: &mut PVStructure,
        copy: &PVStructure,
        bits: &mut BitSet,
    ) -> usize {
        self.check_types(master, copy);
        self.check_bits(bits);
        let do_all = bits.get(0);
        let mut target = FilterTarget::ToMaster { copy, master };
        self.from_bitset_node(self.root, &mut target, bits, do_all)
    }

    fn from_bitset_node(
        &self,
        id: NodeId,
        target: &mut FilterTarget<'_>,
        bits: &mut BitSet,
        mut do_all: bool,
    ) -> usize {
        let node = &self.nodes[id];
        let offset = node.structure_offset;
        do_all |= bits.get(offset);
        if !do_all && !bits.any_in_range(offset, offset + node.nfields) {
            return 0;
        }
        match &node.kind {
            NodeKind::Aggregate { children } => {
                let mut copied = 0;
                for &child in children {
                    copied += self.from_bitset_node(child, target, bits, do_all);
                }
                copied
            }
            NodeKind::Leaf => {
                if self.run_filters(node, target, bits) {
                    return 0;
                }
                match target {
                    FilterTarget::ToCopy { master, copy } => {
                        if offset == 0 {
                            return copy_children(copy, master, 0, bits, do_all);
                        }
                        let (Some(to), Some(from)) =
                            (copy.sub_field_at_mut(offset), node.master.resolve(master))
                        else {
                            panic!("Copy node at {offset} has no value");
                        };
                        copy_field(to, from, offset, bits, do_all)
                    }
                    FilterTarget::ToMaster { copy, master } => {
                        if offset == 0 {
                            return copy_children(master, copy, 0, bits, do_all);
                        }
                        let (Some(to), Some(from)) = (
                            master.sub_field_at_mut(node.master.offset),
                            copy.sub_field_at(offset),
                        ) else {
                            panic!("Copy node at {offset} has no value");
                        };
                        copy_field(to, from, offset, bits, do_all)
                    }
                }
            }
        }
    }

    /// Indented description of the node tree
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_node(&mut out, self.root, 0);
        out
    }

    fn dump_node(&self, out: &mut String, id: NodeId, indent: usize) {
        let node = &self.nodes[id];
        if indent > 0 || !out.is_empty() {
            new_line(out, indent);
        }
        let kind = match node.kind {
            NodeKind::Leaf => "masterNode",
            NodeKind::Aggregate { .. } => "structureNode",
        };
        out.push_str(&format!(
            "{kind} structureOffset {} nfields {}",
            node.structure_offset, node.nfields
        ));
        if let Some(options) = &node.options {
            new_line(out, indent + 1);
            out.push_str(&options.to_string());
            new_line(out, indent);
        }
        match &node.kind {
            NodeKind::Leaf => {
                let name = self.master.full_name_at(node.master.offset).unwrap_or_default();
                out.push_str(&format!(" masterField {name}"));
            }
            NodeKind::Aggregate { children } => {
                for &child in children {
                    self.dump_node(out, child, indent + 1);
                }
            }
        }
    }
}

fn new_line(out: &mut String, indent: usize) {
    out.push('\n');
    out.push_str(&" ".repeat(indent * 4));
}

/// Build the copy type for one level of the selection. `None` if nothing
/// selected at this level exists in the master.
fn create_structure(
    factory: &dyn FieldFactory,
    master: &Structure,
    selection: &PVStructure,
) -> Result<Option<Arc<Structure>>, IntrospectError> {
    let mut names = Vec::new();
    let mut fields = Vec::new();
    for (name, request) in selection.iter() {
        if name == OPTIONS {
            continue;
        }
        let Some(master_field) = master.field(name) else {
            debug!("Selected field '{name}' is not in master '{}'", master.id());
            continue;
        };
        let sub_selection = request.as_structure().filter(|r| has_selection(r));
        let field = match (master_field, sub_selection) {
            (Field::Structure(sub_master), Some(sub_selection)) => {
                match create_structure(factory, sub_master, sub_selection)? {
                    Some(sub) => Field::Structure(sub),
                    None => continue,
                }
            }
            _ => master_field.clone(),
        };
        names.push(name.to_string());
        fields.push(field);
    }
    if names.is_empty() {
        return Ok(None);
    }
    factory.create_structure(None, names, fields).map(Some)
}

/// Push the nodes for one aggregate level and its descendants, returning the
/// aggregate's id. Mirrors the recursion of [`create_structure`].
fn create_nodes(
    nodes: &mut Vec<CopyNode>,
    copy: &Structure,
    copy_offset: usize,
    master: &Structure,
    master_ref: MasterFieldRef,
    selection: &PVStructure,
) -> NodeId {
    let mut children = Vec::with_capacity(copy.len());
    for (offset, name, copy_field) in copy.children() {
        let (Some(request), Some(master_offset), Some(master_field)) = (
            selection.sub_structure(name),
            master.offset_of(name),
            master.field(name),
        ) else {
            panic!("Copy field '{name}' has no counterpart in request and master");
        };
        let child_ref = MasterFieldRef {
            offset: master_ref.offset + master_offset,
            nfields: master_field.number_fields(),
        };
        let options = request.sub_structure(OPTIONS).cloned();
        let id = match (copy_field, master_field) {
            (Field::Structure(sub_copy), Field::Structure(sub_master)) if has_selection(request) => {
                let id = create_nodes(
                    nodes,
                    sub_copy,
                    copy_offset + offset,
                    sub_master,
                    child_ref,
                    request,
                );
                nodes[id].options = options;
                id
            }
            _ => {
                nodes.push(CopyNode {
                    structure_offset: copy_offset + offset,
                    nfields: copy_field.number_fields(),
                    master: child_ref,
                    options,
                    filters: Vec::new(),
                    kind: NodeKind::Leaf,
                });
                nodes.len() - 1
            }
        };
        children.push(id);
    }
    nodes.push(CopyNode {
        structure_offset: copy_offset,
        nfields: copy.number_fields(),
        master: master_ref,
        options: selection.sub_structure(OPTIONS).cloned(),
        filters: Vec::new(),
        kind: NodeKind::Aggregate { children },
    });
    nodes.len() - 1
}

/// Copy `from` into `to` if they differ, setting bit `offset`
fn diff_field(to: &mut PVField, from: &PVField, offset: usize, bits: &mut BitSet) -> usize {
    match (to, from) {
        (PVField::Structure(to), PVField::Structure(from)) => diff_children(to, from, offset, bits),
        (to, from) => {
            if *to == *from {
                // Elements are shared with the master, so equality says nothing
                if matches!(to, PVField::StructureArray(_)) {
                    bits.set(offset);
                }
                return 0;
            }
            to.copy_from(from);
            bits.set(offset);
            1
        }
    }
}

fn diff_children(to: &mut PVStructure, from: &PVStructure, offset: usize, bits: &mut BitSet) -> usize {
    let mut child_offset = offset + 1;
    let mut copied = 0;
    for (to, from) in to.fields_mut().iter_mut().zip(from.fields()) {
        copied += diff_field(to, from, child_offset, bits);
        child_offset += from.number_fields();
    }
    copied
}

/// Copy the parts of `from` marked in `bits`
fn copy_field(to: &mut PVField, from: &PVField, offset: usize, bits: &BitSet, mut do_all: bool) -> usize {
    do_all |= bits.get(offset);
    if !do_all && !bits.any_in_range(offset, offset + from.number_fields()) {
        return 0;
    }
    match (to, from) {
        (PVField::Structure(to), PVField::Structure(from)) => {
            copy_children(to, from, offset, bits, do_all)
        }
        (to, from) => {
            to.copy_from(from);
            1
        }
    }
}

fn copy_children(
    to: &mut PVStructure,
    from: &PVStructure,
    offset: usize,
    bits: &BitSet,
    do_all: bool,
) -> usize {
    let mut child_offset = offset + 1;
    let mut copied = 0;
    for (to, from) in to.fields_mut().iter_mut().zip(from.fields()) {
        copied += copy_field(to, from, child_offset, bits, do_all);
        child_offset += from.number_fields();
    }
    copied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{request::create_request, scalar::ScalarType, standard::StandardField};

    fn master() -> PVStructure {
        PVStructure::new(
            StandardField::default()
                .scalar(ScalarType::Double, "alarm,timeStamp")
                .unwrap(),
        )
    }

    #[test]
    fn whole_master_is_one_leaf() {
        let master = master();
        let request = create_request("").unwrap();
        let copy = PVCopy::build(&master, request.pv_structure(), None).unwrap();
        assert!(Arc::ptr_eq(copy.structure(), master.structure()));
        assert!(copy.root().is_leaf());
        assert_eq!(copy.root().nfields, 10);
        assert_eq!(copy.copy_offset_of(5), Some(5));
        assert_eq!(copy.master_field_at(2).offset, 2);
        assert_eq!(copy.master_field_at(2).nfields, 4);
    }

    #[test]
    fn record_only_selects_everything() {
        let master = master();
        let request = create_request("record[process=true]").unwrap();
        let copy = PVCopy::build(&master, request.pv_structure(), None).unwrap();
        assert_eq!(copy.structure().number_fields(), 10);
    }

    #[test]
    fn reduced_structure() {
        let master = master();
        let request = create_request("timeStamp,value,bogus").unwrap();
        let copy = PVCopy::build(&master, request.pv_structure(), None).unwrap();
        assert_eq!(copy.structure().names(), ["timeStamp", "value"]);
        assert_eq!(copy.structure().id(), "structure");
        // copy: 0 root, 1 timeStamp{2,3,4}, 5 value
        // master: 0 root, 1 value, 2 alarm{3,4,5}, 6 timeStamp{7,8,9}
        assert_eq!(copy.copy_offset_of(1), Some(5));
        assert_eq!(copy.copy_offset_of(8), Some(3));
        assert_eq!(copy.copy_offset_of(3), None);
        assert_eq!(copy.copy_offset_of_path("timeStamp.userTag"), Some(4));
        assert_eq!(copy.master_field_at(3).offset, 8);
        assert_eq!(copy.master_field_at(0).offset, 0);
    }

    #[test]
    fn missing_and_empty() {
        let master = master();
        let request = create_request("bogus").unwrap();
        assert_eq!(
            PVCopy::build(&master, request.pv_structure(), None).unwrap_err(),
            CopyError::EmptySelection
        );
        let request = create_request("field(value)").unwrap();
        assert_eq!(
            PVCopy::build(&master, request.pv_structure(), Some("putField")).unwrap_err(),
            CopyError::MissingStructure("putField".to_string())
        );
    }

    #[test]
    fn dump_layout() {
        let master = master();
        let request = create_request("value,alarm[ignore=true]").unwrap();
        let copy = PVCopy::build(&master, request.pv_structure(), None).unwrap();
        assert_eq!(
            copy.dump(),
            "structureNode structureOffset 0 nfields 6\
             \n    masterNode structureOffset 1 nfields 1 masterField value\
             \n    masterNode structureOffset 2 nfields 4\
             \n        structure\n    string ignore true\
             \n     masterField alarm"
        );
    }
}
