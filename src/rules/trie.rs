// src/rules/trie.rs

//! Inverted prefix index over SSURT strings.
//!
//! A compressed radix trie keyed by bytes. Each terminal node stores the
//! ids of every rule contributing that prefix, in insertion order. The trie
//! only answers "which stored prefixes are prefixes of this probe" — the
//! resolver, not the trie, decides specificity.

/// Radix trie mapping byte-string prefixes to rule id lists.
#[derive(Debug, Default)]
pub struct PrefixTrie {
    root: Node,
    len: usize,
}

#[derive(Debug, Default)]
struct Node {
    /// Edge label -> child; labels under one node never share a first byte
    children: Vec<(Vec<u8>, Node)>,
    /// Rules terminating at this node's accumulated key
    rule_ids: Vec<i64>,
}

impl Node {
    fn leaf(rule_id: i64) -> Node {
        Node {
            children: Vec::new(),
            rule_ids: vec![rule_id],
        }
    }
}

impl PrefixTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of inserted (prefix, rule) pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert one prefix for a rule. The empty prefix is legal and matches
    /// every probe.
    pub fn insert(&mut self, prefix: &str, rule_id: i64) {
        self.len += 1;
        let mut node = &mut self.root;
        let mut key = prefix.as_bytes();

        loop {
            if key.is_empty() {
                node.rule_ids.push(rule_id);
                return;
            }
            let slot = node
                .children
                .iter()
                .position(|(label, _)| label[0] == key[0]);
            let Some(i) = slot else {
                node.children.push((key.to_vec(), Node::leaf(rule_id)));
                return;
            };

            let common = common_prefix(&node.children[i].0, key);
            if common == node.children[i].0.len() {
                // Full edge match: descend.
                key = &key[common..];
                node = &mut node.children[i].1;
                continue;
            }

            // Split the edge at the divergence point.
            let (label, child) = node.children.swap_remove(i);
            let mut mid = Node::default();
            mid.children.push((label[common..].to_vec(), child));
            if common == key.len() {
                mid.rule_ids.push(rule_id);
            } else {
                mid.children.push((key[common..].to_vec(), Node::leaf(rule_id)));
            }
            node.children.push((label[..common].to_vec(), mid));
            return;
        }
    }

    /// All (prefix-length, rule-id) pairs whose stored prefix is a prefix of
    /// `probe`, ordered shortest prefix first; ids at one prefix keep their
    /// insertion order.
    pub fn matching(&self, probe: &str) -> Vec<(usize, i64)> {
        let mut out = Vec::new();
        let mut node = &self.root;
        let mut rest = probe.as_bytes();
        let mut depth = 0;

        for &id in &node.rule_ids {
            out.push((depth, id));
        }
        loop {
            let Some((label, child)) = node
                .children
                .iter()
                .find(|(label, _)| rest.starts_with(label))
            else {
                return out;
            };
            depth += label.len();
            rest = &rest[label.len()..];
            node = child;
            for &id in &node.rule_ids {
                out.push((depth, id));
            }
        }
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}
