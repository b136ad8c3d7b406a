use super::ElementName;

pub(crate) const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub(crate) const XMLNS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Element id recorded for children that have no declaration.
pub(crate) const UNDECLARED: usize = usize::MAX;

/// One open element.
#[derive(Debug)]
pub(crate) struct ContextLevel {
    pub element_id: usize,
    pub name: String,
    pub prefix: String,
    pub local_name: String,
    pub namespace: String,
    /// Spooler that held the start tag; the end tag must come from the same one.
    pub spooler_id: u32,
    pub children: Vec<usize>,
    /// Names of `children`, kept for messages about undeclared ones.
    pub child_names: Vec<String>,
    namespaces: Vec<(String, String)>,
}

impl ContextLevel {
    pub fn new(element_id: usize, name: &str, spooler_id: u32) -> ContextLevel {
        ContextLevel {
            element_id,
            name: name.to_string(),
            prefix: String::new(),
            local_name: name.to_string(),
            namespace: String::new(),
            spooler_id,
            children: Vec::new(),
            child_names: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    pub fn element_name(&self) -> ElementName<'_> {
        ElementName {
            name: &self.name,
            prefix: &self.prefix,
            local_name: &self.local_name,
            namespace: &self.namespace,
        }
    }
}

/// The open elements, innermost last.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    levels: Vec<ContextLevel>,
}

impl ContextStack {
    pub fn reset(&mut self) {
        self.levels.clear();
    }

    pub fn push(&mut self, level: ContextLevel) {
        self.levels.push(level);
    }

    pub fn pop(&mut self) -> Option<ContextLevel> {
        self.levels.pop()
    }

    pub fn top(&self) -> Option<&ContextLevel> {
        self.levels.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ContextLevel> {
        self.levels.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Records a child element in the innermost open element.
    pub fn add_child(&mut self, element_id: usize, name: &str) {
        if let Some(top) = self.levels.last_mut() {
            top.children.push(element_id);
            top.child_names.push(name.to_string());
        }
    }

    /// Binds `prefix` on the innermost element. The empty prefix is the
    /// default namespace.
    pub fn bind(&mut self, prefix: &str, uri: &str) {
        if let Some(top) = self.levels.last_mut() {
            top.namespaces.push((prefix.to_string(), uri.to_string()));
        }
    }

    /// Innermost binding wins. An empty default namespace means none.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => return Some(XML_NAMESPACE),
            "xmlns" => return Some(XMLNS_NAMESPACE),
            _ => {}
        }
        self.levels
            .iter()
            .rev()
            .flat_map(|level| level.namespaces.iter().rev())
            .find(|(bound, _)| bound == prefix)
            .map(|(_, uri)| uri.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let mut stack = ContextStack::default();
        stack.push(ContextLevel::new(0, "a", 1));
        stack.bind("p", "urn:outer");
        stack.bind("", "urn:default");
        stack.push(ContextLevel::new(1, "b", 1));
        stack.bind("p", "urn:inner");

        assert_eq!(stack.resolve("p"), Some("urn:inner"));
        assert_eq!(stack.resolve(""), Some("urn:default"));
        assert_eq!(stack.resolve("q"), None);
        assert_eq!(stack.resolve("xml"), Some(XML_NAMESPACE));

        let inner = stack.pop().unwrap();
        assert_eq!(inner.name, "b");
        assert_eq!(stack.resolve("p"), Some("urn:outer"));
        assert_eq!(stack.levels.len(), 1);
    }

    #[test]
    fn children_go_to_the_innermost_level() {
        let mut stack = ContextStack::default();
        stack.add_child(7, "orphan");
        stack.push(ContextLevel::new(0, "a", 1));
        stack.add_child(3, "b");
        stack.add_child(UNDECLARED, "z");
        let top = stack.top().unwrap();
        assert_eq!(top.children, [3, UNDECLARED]);
        assert_eq!(top.child_names, ["b", "z"]);
        assert_eq!(stack.top().map(|l| l.element_name().local_name), Some("a"));
    }
}
