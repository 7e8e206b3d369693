use super::model::{Attrs, Dataset};

/// A child of a group: either a dataset or a nested group.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Group),
    Dataset(Dataset),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Group(g) => &g.name,
            Node::Dataset(d) => &d.name,
        }
    }
}

/// Borrowed view of whatever a path resolves to.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Group(&'a Group),
    Dataset(&'a Dataset),
}

impl<'a> NodeRef<'a> {
    pub fn as_group(self) -> Option<&'a Group> {
        match self {
            NodeRef::Group(g) => Some(g),
            NodeRef::Dataset(_) => None,
        }
    }

    pub fn as_dataset(self) -> Option<&'a Dataset> {
        match self {
            NodeRef::Dataset(d) => Some(d),
            NodeRef::Group(_) => None,
        }
    }
}

/// A named node holding attributes and insertion-ordered children.
///
/// Children can only be added through [`Container`](super::container::Container),
/// which checks name uniqueness and the axis invariant first.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub attrs: Attrs,
    children: Vec<Node>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Group {
            name: name.to_string(),
            attrs: Attrs::new(),
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.iter().any(|c| c.name() == name)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name() == name)
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name() == name)
    }

    pub(crate) fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        match self.child(name) {
            Some(Node::Group(g)) => Some(g),
            _ => None,
        }
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        match self.child(name) {
            Some(Node::Dataset(d)) => Some(d),
            _ => None,
        }
    }

    /// Mutable dataset access. Callers keep the axis invariant;
    /// `Container::validate` re-checks it.
    pub fn dataset_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        match self.child_mut(name) {
            Some(Node::Dataset(d)) => Some(d),
            _ => None,
        }
    }

    pub fn datasets(&self) -> impl Iterator<Item = &Dataset> {
        self.children.iter().filter_map(|c| match c {
            Node::Dataset(d) => Some(d),
            Node::Group(_) => None,
        })
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.children.iter().filter_map(|c| match c {
            Node::Group(g) => Some(g),
            Node::Dataset(_) => None,
        })
    }

    pub fn channels(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets().filter(|d| d.is_channel())
    }

    pub fn axes(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets().filter(|d| d.is_axis())
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels().map(|d| d.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn children_keep_insertion_order() {
        let mut g = Group::new("root");
        g.push(Node::Dataset(Dataset::axis("z", vec![0.0], None)));
        g.push(Node::Group(Group::new("a")));
        g.push(Node::Dataset(Dataset::axis("b", vec![0.0], None)));
        let names: Vec<&str> = g.children().iter().map(Node::name).collect();
        assert_eq!(names, ["z", "a", "b"]);
        assert!(g.group("a").is_some());
        assert!(g.dataset("a").is_none());
        assert_eq!(g.axes().count(), 2);
    }
}
