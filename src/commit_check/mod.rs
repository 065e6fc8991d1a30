//! `CommitChecker` (spec.md §4.5): schema-driven validation over the
//! post-apply tree — `must`/`when`/`unique`/`leafref`/`instance-identifier`/
//! `min-max-elements`/`mandatory`/`choice`.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::error::CommitCheckError;
use crate::txn::{EditType, Transaction};
use crate::value_tree::{NodeId, ValueTree};
use crate::xpath::{XPathEvaluator, XPathValue};

/// Runs the full commit-check pass and accumulates every violation found,
/// rather than stopping at the first (spec §7 policy 1: "accumulate").
pub struct CommitChecker<'a> {
    pub tree: &'a ValueTree,
    pub evaluator: &'a dyn XPathEvaluator,
}

impl<'a> CommitChecker<'a> {
    pub fn new(tree: &'a ValueTree, evaluator: &'a dyn XPathEvaluator) -> Self {
        CommitChecker { tree, evaluator }
    }

    /// Schemas touched by `txn`'s undo log, for the pruning rule (spec
    /// §4.5): a node's own schema plus every ancestor and descendant schema
    /// reachable from a touched node's position at check time.
    fn touched_nodes(&self, txn: &Transaction) -> HashSet<NodeId> {
        let mut touched = HashSet::new();
        for rec in txn.undo.records() {
            for node in [rec.new_node, rec.cur_node].into_iter().flatten() {
                if self.tree.get(node).is_none() {
                    continue;
                }
                touched.insert(node);
                let mut cur = self.tree.parent_of(node);
                while let Some(p) = cur {
                    touched.insert(p);
                    cur = self.tree.parent_of(p);
                }
                self.collect_descendants(node, &mut touched);
            }
        }
        touched
    }

    fn collect_descendants(&self, id: NodeId, out: &mut HashSet<NodeId>) {
        for child in self.tree.all_children(id) {
            out.insert(child);
            self.collect_descendants(child, out);
        }
    }

    fn in_scope(&self, id: NodeId, touched: &Option<HashSet<NodeId>>) -> bool {
        match touched {
            None => true,
            Some(set) => set.contains(&id),
        }
    }

    /// Run every applicable test over the tree rooted at `self.tree.root()`,
    /// returning every violation found (possibly none).
    pub fn check(&self, txn: &Transaction) -> Result<Vec<CommitCheckError>, crate::error::DatastoreError> {
        let touched = match txn.edit_type {
            EditType::Partial => Some(self.touched_nodes(txn)),
            EditType::Full => None,
        };

        let mut errors = Vec::new();
        let root = self.tree.root();
        self.check_node(root, &touched, &mut errors)?;
        self.check_unique(&touched, &mut errors)?;
        Ok(errors)
    }

    fn check_node(&self, id: NodeId, touched: &Option<HashSet<NodeId>>, errors: &mut Vec<CommitCheckError>) -> Result<(), crate::error::DatastoreError> {
        let Some(v) = self.tree.get(id) else { return Ok(()) };
        let schema = v.schema.clone();
        let children = self.tree.visible_children(id);

        // `must` is never pruned (spec §4.5).
        if schema.test_flags.must {
            for must in &schema.must {
                let root = self.tree.root();
                let value = self.evaluator.evaluate(&must.pcb, id, root, self.tree, false)?;
                if !value.as_bool() {
                    errors.push(CommitCheckError::MustTestFailed {
                        path: self.tree.path_of(id),
                        expr: must.text.clone(),
                    });
                }
            }
        }

        if self.in_scope(id, touched) {
            if schema.test_flags.min_elems && (children.len() as u32) < schema.min_elements && !self.np_container_suppressed(&schema, id) {
                errors.push(CommitCheckError::MinElemsViolation { path: self.tree.path_of(id) });
            }
            if schema.test_flags.max_elems {
                if let Some(max) = schema.max_elements {
                    if children.len() as u32 > max {
                        errors.push(CommitCheckError::MaxElemsViolation { path: self.tree.path_of(id) });
                    }
                }
            }
            if schema.test_flags.mandatory && schema.mandatory && children.is_empty() && !self.np_container_suppressed(&schema, id) {
                errors.push(CommitCheckError::MissingValInst { path: self.tree.path_of(id) });
            }
            if schema.test_flags.xpath_type {
                if let Some(pcb) = &v.xpath_pcb {
                    let root = self.tree.root();
                    let value = self.evaluator.evaluate(pcb, id, root, self.tree, false)?;
                    match value {
                        XPathValue::NodeSet(ns) if ns.is_empty() => {
                            errors.push(CommitCheckError::InvalidValue { path: self.tree.path_of(id) });
                        }
                        _ => {}
                    }
                }
            }
            if schema.test_flags.identity {
                if let (Some(valid), Some(val)) = (&schema.identity_base, v.leaf_value()) {
                    if !valid.iter().any(|name| name == &val.0) {
                        errors.push(CommitCheckError::InvalidValue { path: self.tree.path_of(id) });
                    }
                }
            }
            if schema.test_flags.choice {
                self.check_choice(id, &children, &schema, errors);
            }
        }

        for child in children {
            self.check_node(child, touched, errors)?;
        }
        Ok(())
    }

    /// Choice/case consistency (spec §1, §4.5): group `id`'s visible
    /// children by the `choice` name they belong to. More than one distinct
    /// case present under the same choice is `ExtraChoice`; a `choice`
    /// declared `mandatory` on `id`'s own schema with no case present at all
    /// is `MissingChoice`.
    fn check_choice(&self, id: NodeId, children: &[NodeId], schema: &crate::schema::SchemaObject, errors: &mut Vec<CommitCheckError>) {
        let mut present: HashMap<&str, HashSet<&str>> = HashMap::new();
        for &child in children {
            let Some(cv) = self.tree.get(child) else { continue };
            if let Some((choice, case)) = &cv.schema.choice_case {
                present.entry(choice.as_str()).or_default().insert(case.as_str());
            }
        }
        for cases in present.values() {
            if cases.len() > 1 {
                errors.push(CommitCheckError::ExtraChoice { path: self.tree.path_of(id) });
            }
        }
        for choice_name in &schema.mandatory_choices {
            if !present.contains_key(choice_name.as_str()) {
                errors.push(CommitCheckError::MissingChoice { path: self.tree.path_of(id) });
            }
        }
    }

    /// Mandatory/min-elements suppression (spec §4.5): an NP-container
    /// whose mandatory descendants are all `when`-guarded is never flagged
    /// missing.
    fn np_container_suppressed(&self, schema: &crate::schema::SchemaObject, _id: NodeId) -> bool {
        schema.np_container_all_mandatory_guarded
    }

    /// Unique-stmt algorithm (spec §4.5): build a tuple per list entry with
    /// all components present (entries with a missing component are
    /// skipped, not errors), pairwise compare, and on collision mark both
    /// with `UniqueTestFailed` citing both paths.
    fn check_unique(&self, touched: &Option<HashSet<NodeId>>, errors: &mut Vec<CommitCheckError>) -> Result<(), crate::error::DatastoreError> {
        let root = self.tree.root();
        self.check_unique_under(root, touched, errors)
    }

    fn check_unique_under(&self, id: NodeId, touched: &Option<HashSet<NodeId>>, errors: &mut Vec<CommitCheckError>) -> Result<(), crate::error::DatastoreError> {
        let Some(v) = self.tree.get(id) else { return Ok(()) };
        let schema = v.schema.clone();
        let children = self.tree.visible_children(id);

        if schema.test_flags.unique && !schema.unique.is_empty() && self.in_scope(id, touched) {
            for unique_paths in &schema.unique {
                let entries: Vec<(NodeId, Vec<crate::value_tree::Scalar>)> = children
                    .iter()
                    .filter_map(|&entry| {
                        let entry_schema = self.tree.get(entry)?.schema.clone();
                        if entry_schema.kind != crate::schema::SchemaKind::List {
                            return None;
                        }
                        let tuple: Option<Vec<_>> = unique_paths
                            .iter()
                            .map(|leaf_name| {
                                self.tree
                                    .find_child(entry, &entry_schema.module, leaf_name)
                                    .and_then(|n| self.tree.get(n))
                                    .and_then(|n| n.leaf_value())
                                    .cloned()
                            })
                            .collect();
                        tuple.map(|t| (entry, t))
                    })
                    .collect();

                // Mark every colliding pair, not just the first repeat, so a
                // caller sees both cited paths per spec §4.5.
                for ((a_id, a_tuple), (b_id, b_tuple)) in entries.iter().tuple_combinations() {
                    if a_tuple == b_tuple {
                        errors.push(CommitCheckError::UniqueTestFailed {
                            path_a: self.tree.path_of(*a_id),
                            path_b: self.tree.path_of(*b_id),
                        });
                    }
                }
            }
        }

        for child in children {
            self.check_unique_under(child, touched, errors)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::SessionId;
    use crate::schema::{CommitTestFlags, ConfigFlag, OrderedBy, SchemaKind, SchemaObject};
    use crate::value_tree::{Scalar, Value};
    use crate::xpath::{NodeSet, XPathPcb};
    use std::sync::Arc;

    struct NoXPath;
    impl XPathEvaluator for NoXPath {
        fn evaluate(&self, _pcb: &XPathPcb, _context: NodeId, _root: NodeId, _tree: &ValueTree, _config_only: bool) -> crate::error::Result<XPathValue> {
            Ok(XPathValue::NodeSet(NodeSet::default()))
        }
    }

    fn list_schema(min: u32) -> Arc<SchemaObject> {
        Arc::new(SchemaObject {
            module: "m".into(),
            name: "users".into(),
            kind: SchemaKind::List,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: min,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: vec!["id".into()],
            unique: Vec::new(),
            test_flags: CommitTestFlags {
                min_elems: true,
                ..Default::default()
            },
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        })
    }

    #[test]
    fn min_elements_violation_detected() {
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let list = tree.alloc(Value::new_container(list_schema(1), "users", "m"));
        tree.insert_ordered(list, root);

        let evaluator = NoXPath;
        let checker = CommitChecker::new(&tree, &evaluator);
        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let errors = checker.check(&txn).unwrap();
        assert!(errors.iter().any(|e| matches!(e, CommitCheckError::MinElemsViolation { .. })));
    }

    #[test]
    fn unique_violation_detected() {
        let mut schema = (*list_schema(0)).clone();
        schema.unique = vec![vec!["name".into()]];
        schema.test_flags.unique = true;
        let schema = Arc::new(schema);

        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let list = tree.alloc(Value::new_container(schema.clone(), "users", "m"));
        tree.insert_ordered(list, root);

        let name_schema = Arc::new(SchemaObject {
            module: "m".into(),
            name: "name".into(),
            kind: SchemaKind::Leaf,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: Vec::new(),
            unique: Vec::new(),
            test_flags: CommitTestFlags::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: None,
        });

        for id in [1u32, 2] {
            let entry = tree.alloc(Value::new_container(schema.clone(), "users", "m"));
            tree.insert_ordered(entry, list);
            let name = tree.alloc(Value::new_leaf(name_schema.clone(), "name", "m", Scalar("dup".into())));
            tree.insert_ordered(name, entry);
            let _ = id;
        }

        let evaluator = NoXPath;
        let checker = CommitChecker::new(&tree, &evaluator);
        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let errors = checker.check(&txn).unwrap();
        assert!(errors.iter().any(|e| matches!(e, CommitCheckError::UniqueTestFailed { .. })));
    }

    fn case_leaf_schema(name: &str, choice: &str, case: &str) -> Arc<SchemaObject> {
        Arc::new(SchemaObject {
            module: "m".into(),
            name: name.into(),
            kind: SchemaKind::Leaf,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: Vec::new(),
            unique: Vec::new(),
            test_flags: CommitTestFlags::default(),
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: Some((choice.into(), case.into())),
            mandatory_choices: Vec::new(),
            identity_base: None,
        })
    }

    #[test]
    fn missing_mandatory_choice_detected() {
        let root_schema = Arc::new(SchemaObject {
            test_flags: CommitTestFlags {
                choice: true,
                ..Default::default()
            },
            mandatory_choices: vec!["proto".into()],
            ..(*SchemaObject::root()).clone()
        });
        let tree = ValueTree::new(root_schema);

        let evaluator = NoXPath;
        let checker = CommitChecker::new(&tree, &evaluator);
        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let errors = checker.check(&txn).unwrap();
        assert!(errors.iter().any(|e| matches!(e, CommitCheckError::MissingChoice { .. })));
    }

    #[test]
    fn two_simultaneous_cases_is_extra_choice() {
        let root_schema = Arc::new(SchemaObject {
            test_flags: CommitTestFlags {
                choice: true,
                ..Default::default()
            },
            ..(*SchemaObject::root()).clone()
        });
        let mut tree = ValueTree::new(root_schema);
        let root = tree.root();
        let static_leaf = tree.alloc(Value::new_leaf(case_leaf_schema("static", "proto", "static"), "static", "m", Scalar("1".into())));
        tree.insert_ordered(static_leaf, root);
        let dhcp_leaf = tree.alloc(Value::new_leaf(case_leaf_schema("dhcp", "proto", "dhcp"), "dhcp", "m", Scalar("1".into())));
        tree.insert_ordered(dhcp_leaf, root);

        let evaluator = NoXPath;
        let checker = CommitChecker::new(&tree, &evaluator);
        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let errors = checker.check(&txn).unwrap();
        assert!(errors.iter().any(|e| matches!(e, CommitCheckError::ExtraChoice { .. })));
    }

    #[test]
    fn identity_not_in_base_set_is_invalid() {
        let schema = Arc::new(SchemaObject {
            module: "m".into(),
            name: "protocol".into(),
            kind: SchemaKind::Leaf,
            config: ConfigFlag::Config,
            mandatory: false,
            default: None,
            min_elements: 0,
            max_elements: None,
            ordered_by: OrderedBy::System,
            must: Vec::new(),
            when: None,
            keys: Vec::new(),
            unique: Vec::new(),
            test_flags: CommitTestFlags {
                identity: true,
                ..Default::default()
            },
            has_sil: false,
            sil_delete_children_first: false,
            np_container_all_mandatory_guarded: false,
            choice_case: None,
            mandatory_choices: Vec::new(),
            identity_base: Some(vec!["ospf".into(), "bgp".into()]),
        });
        let mut tree = ValueTree::new(SchemaObject::root());
        let root = tree.root();
        let leaf = tree.alloc(Value::new_leaf(schema, "protocol", "m", Scalar("rip".into())));
        tree.insert_ordered(leaf, root);

        let evaluator = NoXPath;
        let checker = CommitChecker::new(&tree, &evaluator);
        let txn = Transaction::new(1, SessionId(1), EditType::Full);
        let errors = checker.check(&txn).unwrap();
        assert!(errors.iter().any(|e| matches!(e, CommitCheckError::InvalidValue { .. })));
    }
}
