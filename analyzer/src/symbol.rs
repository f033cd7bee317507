// symbol.rs — Symbol-equivalence classes over ports
//
// A symbol is a set of anchors known to occupy one physical memory block. The
// table is a disjoint-set forest over symbol slots (path compression on every
// mutating lookup); the externally observable view is the pair of maps
// anchor → symbol name and symbol name → ordered anchors.
//
// Preconditions: none.
// Postconditions: every anchor belongs to at most one live symbol; a merge
//                 keeps exactly one surviving name holding the union of the
//                 anchor lists, in first-touched order.
// Failure modes: none (anchors without symbols are skipped with a log line).
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::graph::{attrs, ComputeGraph};
use crate::id::Anchor;

/// The external form of a symbol table: symbol name → anchors.
pub type SymbolMap = BTreeMap<String, Vec<Anchor>>;

/// Anchor ↔ symbol equivalence classes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "SymbolMap", into = "SymbolMap")]
pub struct SymbolTable {
    names: Vec<String>,
    parent: Vec<usize>,
    /// Anchors of a root slot; emptied when the slot is merged away.
    members: Vec<Vec<Anchor>>,
    /// Slot an anchor was first inserted under (resolve with `find`).
    slot_of_anchor: HashMap<Anchor, usize>,
    /// Live symbol names only; every entry points at a root slot.
    slot_of_name: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_symbol_map(map: SymbolMap) -> Self {
        let mut table = SymbolTable::new();
        for (name, anchors) in map {
            table.insert(name, anchors);
        }
        table
    }

    /// Build from the provider's pair of maps. Anchors present only in the
    /// forward map are appended to the named symbol.
    pub fn from_maps(anchor_to_symbol: &BTreeMap<Anchor, String>, symbol_to_anchors: &SymbolMap) -> Self {
        let mut table = Self::from_symbol_map(symbol_to_anchors.clone());
        for (&anchor, name) in anchor_to_symbol {
            if !table.contains(anchor) {
                table.insert(name.clone(), [anchor]);
            }
        }
        table
    }

    /// Seed symbols from data edges: each output anchor together with all of
    /// its consumer inputs. Subgraph boundaries are stitched in as well: a
    /// subgraph `Data` node with `_parent_node_index = k` joins the wrapper's
    /// input `k`, and a subgraph `NetOutput` input `i` joins the wrapper's
    /// output `i`.
    pub fn from_data_edges(graph: &ComputeGraph) -> Self {
        let mut table = SymbolTable::new();
        for node in &graph.nodes {
            for (i, consumers) in node.out_links.iter().enumerate() {
                let out = Anchor::output(node.id, i as u32);
                let members = std::iter::once(out).chain(consumers.iter().copied());
                table.insert(graph.anchor_label(out), members);
            }
        }

        for node in &graph.nodes {
            let Some(op) = node.op.as_ref() else {
                continue;
            };
            let Some(parent) = graph.parent_node_of(node.id).and_then(|p| graph.node(p)) else {
                continue;
            };
            if op.is_placeholder() {
                let Some(k) = op.attr_int(attrs::PARENT_NODE_INDEX) else {
                    continue;
                };
                if k >= 0 && (k as usize) < parent.input_count() && node.output_count() > 0 {
                    table.merge(&[parent.in_anchor(k as u32), node.out_anchor(0)]);
                }
            } else if op.is_net_output() {
                let n = node.input_count().min(parent.output_count());
                for i in 0..n as u32 {
                    table.merge(&[node.in_anchor(i), parent.out_anchor(i)]);
                }
            }
        }
        table
    }

    fn new_slot(&mut self, name: String) -> usize {
        let slot = self.names.len();
        self.slot_of_name.insert(name.clone(), slot);
        self.names.push(name);
        self.parent.push(slot);
        self.members.push(Vec::new());
        slot
    }

    fn find(&self, mut slot: usize) -> usize {
        while self.parent[slot] != slot {
            slot = self.parent[slot];
        }
        slot
    }

    fn find_mut(&mut self, slot: usize) -> usize {
        let root = self.find(slot);
        let mut cur = slot;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn root_of(&self, anchor: Anchor) -> Option<usize> {
        self.slot_of_anchor.get(&anchor).map(|&s| self.find(s))
    }

    /// Union root slots into `roots[0]`. Returns the survivor.
    fn union_roots(&mut self, roots: &[usize]) -> usize {
        let survivor = roots[0];
        for &r in &roots[1..] {
            self.parent[r] = survivor;
            let moved = std::mem::take(&mut self.members[r]);
            self.members[survivor].extend(moved);
            self.slot_of_name.remove(&self.names[r]);
        }
        survivor
    }

    /// Add anchors to the symbol `name`, creating it if needed. Anchors that
    /// already belong to another live symbol pull that symbol into this one.
    /// Returns the surviving symbol name.
    pub fn insert(&mut self, name: impl Into<String>, anchors: impl IntoIterator<Item = Anchor>) -> String {
        let name = name.into();
        let slot = match self.slot_of_name.get(&name) {
            Some(&slot) => self.find_mut(slot),
            None => self.new_slot(name),
        };
        let mut roots = vec![slot];
        for anchor in anchors {
            match self.slot_of_anchor.get(&anchor).copied() {
                Some(other) => {
                    let root = self.find_mut(other);
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
                None => {
                    self.slot_of_anchor.insert(anchor, slot);
                    self.members[slot].push(anchor);
                }
            }
        }
        let survivor = self.union_roots(&roots);
        self.names[survivor].clone()
    }

    /// Union the symbols of `anchors` into one. The symbol of the first
    /// anchor that has one survives. Returns the survivor, or `None` when no
    /// anchor has a symbol. Merging an already-merged set is a no-op.
    pub fn merge(&mut self, anchors: &[Anchor]) -> Option<String> {
        let mut roots: Vec<usize> = Vec::new();
        for &anchor in anchors {
            match self.slot_of_anchor.get(&anchor).copied() {
                Some(slot) => {
                    let root = self.find_mut(slot);
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
                None => trace!(%anchor, "anchor has no symbol, skipped in merge"),
            }
        }
        if roots.is_empty() {
            return None;
        }
        let survivor = self.union_roots(&roots);
        Some(self.names[survivor].clone())
    }

    pub fn contains(&self, anchor: Anchor) -> bool {
        self.slot_of_anchor.contains_key(&anchor)
    }

    pub fn symbol_of(&self, anchor: Anchor) -> Option<&str> {
        self.root_of(anchor).map(|r| self.names[r].as_str())
    }

    /// All anchors sharing `anchor`'s symbol, including itself.
    pub fn class_of(&self, anchor: Anchor) -> Option<&[Anchor]> {
        self.root_of(anchor).map(|r| self.members[r].as_slice())
    }

    pub fn anchors(&self, symbol: &str) -> Option<&[Anchor]> {
        self.slot_of_name
            .get(symbol)
            .map(|&slot| self.members[slot].as_slice())
    }

    pub fn same_symbol(&self, a: Anchor, b: Anchor) -> bool {
        match (self.root_of(a), self.root_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Number of live symbols.
    pub fn len(&self) -> usize {
        self.slot_of_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot_of_name.is_empty()
    }

    pub fn symbol_to_anchors(&self) -> SymbolMap {
        self.slot_of_name
            .iter()
            .map(|(name, &slot)| (name.clone(), self.members[slot].clone()))
            .collect()
    }

    pub fn anchor_to_symbol(&self) -> BTreeMap<Anchor, String> {
        self.slot_of_name
            .iter()
            .flat_map(|(name, &slot)| self.members[slot].iter().map(move |&a| (a, name.clone())))
            .collect()
    }

    /// Symbol name and member labels, for explanations.
    pub fn describe(&self, anchor: Anchor, graph: &ComputeGraph) -> String {
        match (self.symbol_of(anchor), self.class_of(anchor)) {
            (Some(name), Some(class)) => {
                let labels: Vec<String> = class.iter().map(|&a| graph.anchor_label(a)).collect();
                format!("symbol '{}' = [{}]", name, labels.join(", "))
            }
            _ => format!("{} has no symbol", graph.anchor_label(anchor)),
        }
    }
}

impl From<SymbolMap> for SymbolTable {
    fn from(map: SymbolMap) -> Self {
        SymbolTable::from_symbol_map(map)
    }
}

impl From<SymbolTable> for SymbolMap {
    fn from(table: SymbolTable) -> Self {
        table.symbol_to_anchors()
    }
}

impl PartialEq for SymbolTable {
    fn eq(&self, other: &Self) -> bool {
        self.symbol_to_anchors() == other.symbol_to_anchors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{op_types, AttrValue, GraphBuilder, OpDesc};
    use crate::id::NodeId;

    fn out(n: u32, i: u32) -> Anchor {
        Anchor::output(NodeId(n), i)
    }

    fn inp(n: u32, i: u32) -> Anchor {
        Anchor::input(NodeId(n), i)
    }

    #[test]
    fn merge_keeps_first_symbol_and_removes_others() {
        let mut t = SymbolTable::new();
        t.insert("s0", [out(0, 0), inp(1, 0)]);
        t.insert("s1", [out(0, 1), inp(2, 0)]);
        t.insert("s2", [out(3, 0)]);

        assert_eq!(t.merge(&[out(0, 0), out(0, 1)]).as_deref(), Some("s0"));
        assert_eq!(t.len(), 2);
        assert!(t.anchors("s1").is_none());
        assert_eq!(t.symbol_of(inp(2, 0)), Some("s0"));
        assert_eq!(
            t.anchors("s0").unwrap(),
            &[out(0, 0), inp(1, 0), out(0, 1), inp(2, 0)]
        );
        assert!(t.same_symbol(inp(1, 0), inp(2, 0)));
        assert!(!t.same_symbol(inp(1, 0), out(3, 0)));
    }

    #[test]
    fn merge_is_idempotent() {
        let mut t = SymbolTable::new();
        t.insert("a", [out(0, 0)]);
        t.insert("b", [out(0, 1)]);
        t.merge(&[out(0, 0), out(0, 1)]);
        let once = t.symbol_to_anchors();
        t.merge(&[out(0, 0), out(0, 1)]);
        assert_eq!(t.symbol_to_anchors(), once);
    }

    #[test]
    fn chained_merges_stay_transitive() {
        let mut t = SymbolTable::new();
        for i in 0..5 {
            t.insert(format!("s{i}"), [out(i, 0)]);
        }
        t.merge(&[out(3, 0), out(4, 0)]);
        t.merge(&[out(1, 0), out(2, 0)]);
        t.merge(&[out(2, 0), out(4, 0)]);
        t.merge(&[out(0, 0), out(3, 0)]);
        assert_eq!(t.len(), 1);
        let name = t.symbol_of(out(4, 0)).unwrap().to_string();
        assert_eq!(name, "s0");
        assert_eq!(t.anchors(&name).unwrap().len(), 5);
        assert_eq!(t.anchor_to_symbol().len(), 5);
    }

    #[test]
    fn insert_with_shared_anchor_unions() {
        let mut t = SymbolTable::new();
        t.insert("x", [out(0, 0), inp(1, 0)]);
        let survivor = t.insert("y", [out(1, 0), inp(1, 0)]);
        assert_eq!(survivor, "y");
        assert_eq!(t.len(), 1);
        assert_eq!(t.symbol_of(out(0, 0)), Some("y"));
    }

    #[test]
    fn merge_without_symbols_is_none() {
        let mut t = SymbolTable::new();
        assert_eq!(t.merge(&[out(9, 0)]), None);
        assert!(t.is_empty());
    }

    #[test]
    fn from_maps_adds_forward_only_anchors() {
        let mut fwd = BTreeMap::new();
        fwd.insert(out(0, 0), "s".to_string());
        fwd.insert(inp(5, 0), "s".to_string());
        let mut back = SymbolMap::new();
        back.insert("s".to_string(), vec![out(0, 0)]);
        let t = SymbolTable::from_maps(&fwd, &back);
        assert_eq!(t.anchors("s").unwrap(), &[out(0, 0), inp(5, 0)]);
    }

    #[test]
    fn data_edges_seed_one_symbol_per_output() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let a = b.add_node(root, "a", OpDesc::new("Split").with_stream(0));
        let c = b.add_node(root, "c", OpDesc::new("Add").with_stream(0));
        b.connect(a, 0, c, 0).connect(a, 1, c, 1);
        let g = b.finish();

        let t = SymbolTable::from_data_edges(&g);
        assert_eq!(t.len(), 2);
        assert_eq!(t.symbol_of(Anchor::input(c, 1)), Some("a:out1"));
        assert!(!t.same_symbol(Anchor::input(c, 0), Anchor::input(c, 1)));
    }

    #[test]
    fn data_edges_stitch_subgraph_boundaries() {
        let mut b = GraphBuilder::new("g");
        let root = b.root();
        let x = b.add_node(root, "x", OpDesc::new("Relu").with_stream(0));
        let w = b.add_node(root, "w", OpDesc::new("PartitionedCall").with_stream(0));
        let y = b.add_node(root, "y", OpDesc::new("Relu").with_stream(0));
        let body = b.add_subgraph(w, "body");
        let d = b.add_node(
            body,
            "d",
            OpDesc::new(op_types::DATA).with_attr(attrs::PARENT_NODE_INDEX, AttrValue::Int(0)),
        );
        let z = b.add_node(body, "z", OpDesc::new("Relu").with_stream(1));
        let out_node = b.add_node(body, "out", OpDesc::new(op_types::NET_OUTPUT).with_stream(1));
        b.connect(x, 0, w, 0)
            .connect(w, 0, y, 0)
            .connect(d, 0, z, 0)
            .connect(z, 0, out_node, 0);
        let g = b.finish();

        let t = SymbolTable::from_data_edges(&g);
        assert!(t.same_symbol(Anchor::output(x, 0), Anchor::input(z, 0)));
        assert!(t.same_symbol(Anchor::output(z, 0), Anchor::output(w, 0)));
        assert!(t.same_symbol(Anchor::output(z, 0), Anchor::input(y, 0)));
        assert!(!t.same_symbol(Anchor::output(x, 0), Anchor::output(z, 0)));
    }

    #[test]
    fn serde_uses_symbol_map_form() {
        let mut t = SymbolTable::new();
        t.insert("s", [out(0, 0), inp(1, 0)]);
        let text = serde_json::to_string(&t).unwrap();
        assert!(text.starts_with(r#"{"s":[{"node":0,"index":0,"dir":"out"}"#));
        let back: SymbolTable = serde_json::from_str(&text).unwrap();
        assert_eq!(back, t);
    }
}
