//! ValueTree (spec.md §4.1): the in-memory labeled tree of configuration
//! values, with dirty flags and editvars.

mod arena;
mod node;

pub use arena::ValueTree;
pub use node::{EditOp, EditVars, Flags, InsertOp, NodeContent, NodeId, NodePath, Scalar, Value};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CommitTestFlags, ConfigFlag, OrderedBy, SchemaKind, SchemaObject};
    use std::sync::Arc;

    fn leaf_schema(name: &str, default: Option<&str>) -> crate::schema::SchemaRef {
        Arc::new(SchemaObject {
            module: "m".into(),
            name: name.into(),
            kind: SchemaKind::Leaf,
            config: ConfigFlag::Config,
            mandatory: false,
            default: default.map(|d| d.to_string()),
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
        })
    }

    fn container_schema(name: &str) -> crate::schema::SchemaRef {
        Arc::new(SchemaObject {
            module: "m".into(),
            name: name.into(),
            kind: SchemaKind::Container,
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
        })
    }

    #[test]
    fn find_child_ignores_deleted() {
        let root_schema = SchemaObject::root();
        let mut tree = ValueTree::new(root_schema);
        let root = tree.root();
        let child_schema = leaf_schema("c", None);
        let child = tree.alloc(Value::new_leaf(child_schema, "c", "m", Scalar("5".into())));
        tree.insert_ordered(child, root);
        assert_eq!(tree.find_child(root, "m", "c"), Some(child));

        tree.mark_deleted(child);
        assert_eq!(tree.find_child(root, "m", "c"), None);

        tree.unmark_deleted(child);
        assert_eq!(tree.find_child(root, "m", "c"), Some(child));
    }

    #[test]
    fn set_dirty_propagates_to_ancestors() {
        let root_schema = SchemaObject::root();
        let mut tree = ValueTree::new(root_schema);
        let root = tree.root();
        let a = tree.alloc(Value::new_container(container_schema("a"), "a", "m"));
        tree.insert_ordered(a, root);
        let b = tree.alloc(Value::new_leaf(leaf_schema("b", None), "b", "m", Scalar("1".into())));
        tree.insert_ordered(b, a);

        tree.set_dirty(b);
        assert!(tree.get(b).unwrap().flags.dirty);
        assert!(tree.get(a).unwrap().flags.subtree_dirty);
        assert!(!tree.get(a).unwrap().flags.dirty);

        tree.clear_dirty(b);
        assert!(!tree.get(b).unwrap().flags.dirty);
        assert!(!tree.get(a).unwrap().flags.subtree_dirty);
    }

    #[test]
    fn free_subtree_frees_descendants() {
        let root_schema = SchemaObject::root();
        let mut tree = ValueTree::new(root_schema);
        let root = tree.root();
        let a = tree.alloc(Value::new_container(container_schema("a"), "a", "m"));
        tree.insert_ordered(a, root);
        let b = tree.alloc(Value::new_leaf(leaf_schema("b", None), "b", "m", Scalar("1".into())));
        tree.insert_ordered(b, a);

        tree.free_subtree(a);
        assert!(tree.get(a).is_none());
        assert!(tree.get(b).is_none());
    }
}
