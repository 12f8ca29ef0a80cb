//! Introspection over parsed entries
//!
//! Extracts the variables, function calls, and message/term references a
//! message or term uses, and builds a namespaced dependency graph with
//! cycle detection. Cycle detection walks iteratively with an explicit
//! stack so adversarial reference chains cannot overflow the host stack.

use crate::ast::*;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Where a variable occurrence sits syntactically
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VariableContext {
    /// Directly inside a pattern body
    Value,
    /// As the selector of a select expression
    Selector,
    /// Inside a variant's pattern
    Variant,
    /// As an argument to a function or parameterized term
    FunctionArgument,
}

/// One variable occurrence
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VariableUse {
    pub name: String,
    pub context: VariableContext,
}

/// One function call site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUse {
    pub name: String,
    /// Names of positional arguments that are variable references
    pub variable_args: Vec<String>,
    /// Named-argument keys used at this call site
    pub named_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReferenceKind {
    Message,
    Term,
}

/// One message/term reference
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReferenceUse {
    pub id: String,
    pub kind: ReferenceKind,
    pub attribute: Option<String>,
}

/// Variables referenced by a message (value and attributes)
pub fn message_variables(message: &Message) -> Vec<VariableUse> {
    let mut walker = Walker::default();
    if let Some(p) = &message.value {
        walker.pattern(p, VariableContext::Value);
    }
    for attr in &message.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.variables
}

/// Variables referenced by a term (value and attributes)
pub fn term_variables(term: &Term) -> Vec<VariableUse> {
    let mut walker = Walker::default();
    walker.pattern(&term.value, VariableContext::Value);
    for attr in &term.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.variables
}

/// Message/term references made by a message
pub fn message_references(message: &Message) -> Vec<ReferenceUse> {
    let mut walker = Walker::default();
    if let Some(p) = &message.value {
        walker.pattern(p, VariableContext::Value);
    }
    for attr in &message.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.references
}

/// Message/term references made by a term
pub fn term_references(term: &Term) -> Vec<ReferenceUse> {
    let mut walker = Walker::default();
    walker.pattern(&term.value, VariableContext::Value);
    for attr in &term.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.references
}

/// Function call sites in a message
pub fn message_functions(message: &Message) -> Vec<FunctionUse> {
    let mut walker = Walker::default();
    if let Some(p) = &message.value {
        walker.pattern(p, VariableContext::Value);
    }
    for attr in &message.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.functions
}

/// Function call sites in a term
pub fn term_functions(term: &Term) -> Vec<FunctionUse> {
    let mut walker = Walker::default();
    walker.pattern(&term.value, VariableContext::Value);
    for attr in &term.attributes {
        walker.pattern(&attr.value, VariableContext::Value);
    }
    walker.functions
}

#[derive(Default)]
struct Walker {
    variables: Vec<VariableUse>,
    references: Vec<ReferenceUse>,
    functions: Vec<FunctionUse>,
}

impl Walker {
    fn pattern(&mut self, pattern: &Pattern, context: VariableContext) {
        for el in &pattern.elements {
            if let PatternElement::Placeable(p) = el {
                self.expression(&p.expression, context);
            }
        }
    }

    fn expression(&mut self, expr: &Expression, context: VariableContext) {
        match expr {
            Expression::Inline(inline) => self.inline(inline, context),
            Expression::Select(select) => {
                self.inline(&select.selector, VariableContext::Selector);
                for variant in &select.variants {
                    self.pattern(&variant.value, VariableContext::Variant);
                }
            }
        }
    }

    fn inline(&mut self, expr: &InlineExpression, context: VariableContext) {
        match expr {
            InlineExpression::StringLiteral(_) | InlineExpression::NumberLiteral(_) => {}
            InlineExpression::VariableReference { id, .. } => {
                self.variables.push(VariableUse {
                    name: id.name.clone(),
                    context,
                });
            }
            InlineExpression::MessageReference { id, attribute, .. } => {
                self.references.push(ReferenceUse {
                    id: id.name.clone(),
                    kind: ReferenceKind::Message,
                    attribute: attribute.as_ref().map(|a| a.name.clone()),
                });
            }
            InlineExpression::TermReference {
                id,
                attribute,
                arguments,
                ..
            } => {
                self.references.push(ReferenceUse {
                    id: id.name.clone(),
                    kind: ReferenceKind::Term,
                    attribute: attribute.as_ref().map(|a| a.name.clone()),
                });
                if let Some(args) = arguments {
                    self.call_arguments(args);
                }
            }
            InlineExpression::FunctionReference { id, arguments, .. } => {
                let variable_args = arguments
                    .positional
                    .iter()
                    .filter_map(|a| match a {
                        InlineExpression::VariableReference { id, .. } => Some(id.name.clone()),
                        _ => None,
                    })
                    .collect();
                let named_keys = arguments
                    .named
                    .iter()
                    .map(|n| n.name.name.clone())
                    .collect();
                self.functions.push(FunctionUse {
                    name: id.name.clone(),
                    variable_args,
                    named_keys,
                });
                self.call_arguments(arguments);
            }
            InlineExpression::Placeable(p) => self.expression(&p.expression, context),
        }
    }

    fn call_arguments(&mut self, args: &CallArguments) {
        for positional in &args.positional {
            self.inline(positional, VariableContext::FunctionArgument);
        }
        for named in &args.named {
            self.inline(&named.value, VariableContext::FunctionArgument);
        }
    }
}

/// Graph node key for a message
pub fn message_node(id: &str) -> String {
    format!("msg:{id}")
}

/// Graph node key for a term
pub fn term_node(id: &str) -> String {
    format!("term:{id}")
}

fn reference_node(r: &ReferenceUse) -> String {
    match r.kind {
        ReferenceKind::Message => message_node(&r.id),
        ReferenceKind::Term => term_node(&r.id),
    }
}

/// Reference graph over messages and terms.
///
/// Node keys are namespace-prefixed (`msg:` / `term:`) so a message and a
/// term sharing a name never collide.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        DependencyGraph::default()
    }

    /// Build the graph for a whole resource
    pub fn from_resource(resource: &Resource) -> Self {
        let mut graph = DependencyGraph::new();
        for entry in &resource.body {
            match entry {
                Entry::Message(m) => graph.add_message(m),
                Entry::Term(t) => graph.add_term(t),
                _ => {}
            }
        }
        graph
    }

    pub fn add_message(&mut self, message: &Message) {
        let deps = message_references(message)
            .iter()
            .map(reference_node)
            .collect();
        self.edges.insert(message_node(&message.id.name), deps);
    }

    pub fn add_term(&mut self, term: &Term) {
        let deps = term_references(term).iter().map(reference_node).collect();
        self.edges.insert(term_node(&term.id.name), deps);
    }

    /// Direct dependencies of a node, if it is known
    pub fn dependencies(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(|k| k.as_str())
    }

    /// All elementary reference cycles, each rotated so its
    /// lexicographically least node comes first. The walk is iterative; an
    /// adversarial chain of any length cannot overflow the stack.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();

        // Anchor each cycle at its least node: start DFS from every node,
        // restrict the walk to nodes >= start, and only record cycles that
        // close back on the start.
        for start in self.edges.keys() {
            let mut path: Vec<&str> = vec![start];
            let mut on_path: HashSet<&str> = HashSet::from([start.as_str()]);
            let mut frames: Vec<std::collections::btree_set::Iter<'_, String>> = Vec::new();
            frames.push(self.neighbors(start));

            while let Some(frame) = frames.last_mut() {
                match frame.next() {
                    Some(next) => {
                        if next == start {
                            let cycle: Vec<String> =
                                path.iter().map(|s| s.to_string()).collect();
                            if seen.insert(cycle.clone()) {
                                cycles.push(cycle);
                            }
                            continue;
                        }
                        if next.as_str() < start.as_str() || on_path.contains(next.as_str()) {
                            continue;
                        }
                        if !self.edges.contains_key(next) {
                            continue;
                        }
                        path.push(next);
                        on_path.insert(next);
                        frames.push(self.neighbors(next));
                    }
                    None => {
                        frames.pop();
                        if let Some(done) = path.pop() {
                            on_path.remove(done);
                        }
                    }
                }
            }
        }

        cycles
    }

    fn neighbors(&self, node: &str) -> std::collections::btree_set::Iter<'_, String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        self.edges.get(node).unwrap_or(&EMPTY).iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn message<'a>(r: &'a Resource, name: &str) -> &'a Message {
        r.messages().find(|m| m.id.name == name).unwrap()
    }

    #[test]
    fn test_extract_variables_with_context() {
        let r = parse(
            "items = { $count ->\n    [one] { $name } has one\n   *[other] { NUMBER($count) } items\n}",
        );
        let vars = message_variables(message(&r, "items"));
        assert!(vars.contains(&VariableUse {
            name: "count".into(),
            context: VariableContext::Selector
        }));
        assert!(vars.contains(&VariableUse {
            name: "name".into(),
            context: VariableContext::Variant
        }));
        assert!(vars.contains(&VariableUse {
            name: "count".into(),
            context: VariableContext::FunctionArgument
        }));
    }

    #[test]
    fn test_extract_functions() {
        let r = parse(r#"size = { NUMBER($bytes, maximumFractionDigits: 1, useGrouping: 0) }"#);
        let funcs = message_functions(message(&r, "size"));
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "NUMBER");
        assert_eq!(funcs[0].variable_args, vec!["bytes"]);
        assert!(funcs[0].named_keys.contains("maximumFractionDigits"));
        assert!(funcs[0].named_keys.contains("useGrouping"));
    }

    #[test]
    fn test_extract_references() {
        let r = parse("about = { -brand } { menu.title }\n-brand = B\nmenu = M\n    .title = T");
        let refs = message_references(message(&r, "about"));
        assert!(refs.contains(&ReferenceUse {
            id: "brand".into(),
            kind: ReferenceKind::Term,
            attribute: None
        }));
        assert!(refs.contains(&ReferenceUse {
            id: "menu".into(),
            kind: ReferenceKind::Message,
            attribute: Some("title".into())
        }));
    }

    #[test]
    fn test_namespacing_prevents_collision() {
        let r = parse("-shared = term value\nshared = { -shared }");
        let graph = DependencyGraph::from_resource(&r);
        let nodes: Vec<_> = graph.nodes().collect();
        assert!(nodes.contains(&"msg:shared"));
        assert!(nodes.contains(&"term:shared"));
        assert!(graph.find_cycles().is_empty());
    }

    #[test]
    fn test_two_node_cycle() {
        let r = parse("a = { b }\nb = { a }");
        let graph = DependencyGraph::from_resource(&r);
        let cycles = graph.find_cycles();
        assert_eq!(cycles, vec![vec!["msg:a".to_string(), "msg:b".to_string()]]);
    }

    #[test]
    fn test_cycle_rotation_is_canonical() {
        // The same cycle entered at any node reports the rotation starting
        // at its least member.
        let r = parse("c = { a }\na = { b }\nb = { c }");
        let graph = DependencyGraph::from_resource(&r);
        let cycles = graph.find_cycles();
        assert_eq!(
            cycles,
            vec![vec![
                "msg:a".to_string(),
                "msg:b".to_string(),
                "msg:c".to_string()
            ]]
        );
    }

    #[test]
    fn test_self_cycle() {
        let r = parse("loop = { loop }");
        let graph = DependencyGraph::from_resource(&r);
        assert_eq!(graph.find_cycles(), vec![vec!["msg:loop".to_string()]]);
    }

    #[test]
    fn test_multiple_cycles() {
        let r = parse("a = { b }\nb = { a }\nx = { y }\ny = { x }\nok = fine");
        let graph = DependencyGraph::from_resource(&r);
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 2);
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        // One cycle threaded through 100k nodes: far deeper than any
        // recursive walk could survive.
        let n = 100_000;
        let mut source = String::with_capacity(n * 24);
        source.push_str(&format!("a = {{ z{:06} }}\n", n - 1));
        for i in (1..n).rev() {
            source.push_str(&format!("z{:06} = {{ z{:06} }}\n", i, i - 1));
        }
        source.push_str("z000000 = { a }\n");
        let r = parse(&source);
        assert_eq!(r.junk().count(), 0);
        let graph = DependencyGraph::from_resource(&r);
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), n + 1);
        assert_eq!(cycles[0][0], "msg:a");
    }
}
