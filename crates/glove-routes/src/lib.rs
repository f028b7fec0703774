//! Radix tree of HTTP route templates with per-route costs.
//!
//! Templates start with `/`, may contain `:name` segments that match a single
//! path segment, and may end with `*` to match any suffix. Lookup returns the
//! cost of the best-matching template, preferring literal text over parameters
//! and parameters over wildcards.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("wildcard '*' is only allowed at the end of the route: {0}")]
    MisplacedWildcard(String),
    #[error("at least one parameter is not named in the route: {0}")]
    UnnamedParameter(String),
    #[error("parameter '{parameter}' must directly follow '/' in the route: {route}")]
    MisplacedParameter { parameter: String, route: String },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Route {
    pub method: String,
    pub route: String,
    pub cost: u32,
}

impl Route {
    pub fn new(method: impl Into<String>, route: impl Into<String>, cost: u32) -> Self {
        Self {
            method: method.into(),
            route: route.into(),
            cost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Text,
    Parameter,
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    has_wildcard: bool,
    route: String,
    // index[i] holds the first byte of children[i].route
    index: Vec<u8>,
    children: Vec<Node>,
    special: Option<Box<Node>>,
    cost: u32,
}

#[derive(Debug)]
struct MethodRoot {
    method: String,
    node: Node,
}

/// Top-level trie: one radix tree per HTTP method.
#[derive(Debug, Default)]
pub struct RouteTrie {
    roots: Vec<MethodRoot>,
}

impl RouteTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the template and inserts it with the given cost. A cost of
    /// zero makes the template invisible to [`RouteTrie::dump`].
    pub fn insert(&mut self, method: &str, template: &str, cost: u32) -> Result<(), RouteError> {
        let normalized = validate_route(template)?;
        self.add(method, &normalized, cost);
        Ok(())
    }

    /// Cost of the best-matching template, or 0 when nothing matches.
    pub fn cost(&self, method: &str, path: &str) -> u32 {
        match self.get(method) {
            Some(node) => node.lookup(path),
            None => 0,
        }
    }

    /// Materializes the stored templates, sorted by `(method, route)` with
    /// trailing slashes stripped. Templates inserted with cost 0 are omitted.
    pub fn dump(&self) -> Vec<Route> {
        let mut routes = Vec::new();
        for root in &self.roots {
            dump_node(&root.node, &root.method, "", &mut routes);
        }
        routes.sort_by(|left, right| {
            (&left.method, &left.route).cmp(&(&right.method, &right.route))
        });
        routes
    }

    fn get(&self, method: &str) -> Option<&Node> {
        self.roots
            .iter()
            .find(|root| root.method == method)
            .map(|root| &root.node)
    }

    fn add(&mut self, method: &str, route: &str, cost: u32) {
        if let Some(root) = self
            .roots
            .iter_mut()
            .find(|root| root.method == method)
        {
            root.node.insert_route(route, cost);
            return;
        }

        if let Some(head) = Node::new_list(route, cost) {
            self.roots.push(MethodRoot {
                method: method.to_string(),
                node: head,
            });
        }
    }
}

fn dump_node(node: &Node, method: &str, prefix: &str, routes: &mut Vec<Route>) {
    let mut full_route = format!("{prefix}{}", node.route);
    if node.cost > 0 {
        routes.push(Route::new(
            method,
            strip_trailing_slash(&full_route),
            node.cost,
        ));
    }

    if node.kind == NodeKind::Parameter && !full_route.ends_with('/') {
        full_route.push('/');
    }

    if let Some(special) = node.special.as_deref() {
        dump_node(special, method, &full_route, routes);
    }
    for child in &node.children {
        dump_node(child, method, &full_route, routes);
    }
}

fn strip_trailing_slash(route: &str) -> &str {
    route.strip_suffix('/').unwrap_or(route)
}

fn take_text(route: &str) -> &str {
    match route.find([':', '*']) {
        Some(position) => &route[..position],
        None => route,
    }
}

// A parameter segment keeps its trailing '/' so sibling text children can
// branch on the byte that follows it.
fn take_parameter(route: &str) -> &str {
    match route.find('/') {
        Some(position) => &route[..=position],
        None => route,
    }
}

fn skip_parameter(path: &str, offset: usize) -> usize {
    match path[offset..].find('/') {
        Some(position) => offset + position + 1,
        None => path.len(),
    }
}

fn common_prefix_len(left: &str, right: &str) -> usize {
    left.bytes()
        .zip(right.bytes())
        .take_while(|(a, b)| a == b)
        .count()
}

impl Node {
    fn new(route: &str) -> Option<Node> {
        if route.is_empty() {
            return None;
        }

        if route.starts_with(':') {
            return Some(Node {
                kind: NodeKind::Parameter,
                has_wildcard: false,
                route: take_parameter(route).to_string(),
                index: Vec::new(),
                children: Vec::new(),
                special: None,
                cost: 0,
            });
        }

        Some(Node {
            kind: NodeKind::Text,
            has_wildcard: route.ends_with('*'),
            route: take_text(route).to_string(),
            index: Vec::new(),
            children: Vec::new(),
            special: None,
            cost: 0,
        })
    }

    // Builds a chain of nodes for a route that shares no prefix with the
    // existing tree, splitting at every ':' and the final '*'.
    fn new_list(route: &str, cost: u32) -> Option<Node> {
        let mut head = Node::new(route)?;
        let mut remainder = &route[head.route.len()..];

        let mut current = &mut head;
        while !remainder.is_empty() && remainder != "*" {
            let next = Node::new(remainder).expect("remainder is not empty");
            remainder = &remainder[next.route.len()..];
            current.insert_node(next);
            current = current.last_inserted();
        }
        current.cost = cost;
        if remainder == "*" {
            current.has_wildcard = true;
        }

        Some(head)
    }

    fn insert_node(&mut self, child: Node) {
        if child.kind == NodeKind::Text {
            self.index.push(child.route.as_bytes()[0]);
            self.children.push(child);
        } else {
            self.special = Some(Box::new(child));
        }
    }

    fn last_inserted(&mut self) -> &mut Node {
        if self.special.is_some() {
            return self.special.as_deref_mut().expect("special was just set");
        }
        self.children.last_mut().expect("child was just pushed")
    }

    fn insert_route(&mut self, route: &str, cost: u32) {
        let mut remainder = route;
        let mut current: &mut Node = self;

        'walk: while !remainder.is_empty() {
            if remainder.starts_with(':') {
                // remaining route starts with a parameter
                if current.special.is_none() {
                    break 'walk;
                }

                let parameter = take_parameter(remainder);
                remainder = &remainder[parameter.len()..];
                current = current.special.as_deref_mut().expect("checked above");
                continue 'walk;
            }

            if current.kind == NodeKind::Text {
                let prefix_len = common_prefix_len(remainder, &current.route);

                if prefix_len < current.route.len() {
                    // current node strictly includes the prefix: split it into
                    // a prefix node and a stem carrying the former suffix
                    let stem = Node {
                        kind: NodeKind::Text,
                        route: current.route[prefix_len..].to_string(),
                        index: std::mem::take(&mut current.index),
                        children: std::mem::take(&mut current.children),
                        special: current.special.take(),
                        has_wildcard: current.has_wildcard,
                        cost: current.cost,
                    };

                    current.index = vec![stem.route.as_bytes()[0]];
                    current.children = vec![stem];
                    current.route.truncate(prefix_len);
                    current.cost = 0;
                    current.has_wildcard = false;
                }

                // current node's route equals the prefix
                remainder = &remainder[prefix_len..];
                if remainder.is_empty() {
                    break 'walk;
                }

                if remainder.starts_with(':') {
                    continue 'walk;
                }
            }

            let first = remainder.as_bytes()[0];
            let position = current.index.iter().position(|&key| key == first);
            match position {
                Some(position) => {
                    current = &mut current.children[position];
                    continue 'walk;
                }
                None => break 'walk,
            }
        }

        // current node is the last available node indexing the route
        if remainder.is_empty() {
            // route is fully included in the index
            current.cost = cost;
            return;
        }

        if remainder == "*" {
            current.cost = cost;
            current.has_wildcard = true;
            return;
        }

        // route is partially included in the index
        if let Some(stem) = Node::new_list(remainder, cost) {
            current.insert_node(stem);
        }
    }

    fn lookup(&self, path: &str) -> u32 {
        struct Checkpoint<'a> {
            node: &'a Node,
            offset: usize,
            cost: u32,
        }

        let path_bytes = path.as_bytes();
        let mut current: &Node = self;
        let mut offset = 0;
        let mut cost = 0;
        let mut checkpoints: Vec<Checkpoint<'_>> = Vec::new();

        loop {
            if current.has_wildcard {
                cost = current.cost;
            }

            let remaining = path.len() - offset;

            if current.kind == NodeKind::Text {
                let route_bytes = current.route.as_bytes();
                let max_len = route_bytes.len().min(remaining);
                let mut prefix_len = 0;
                while prefix_len < max_len
                    && route_bytes[prefix_len] == path_bytes[offset + prefix_len]
                {
                    prefix_len += 1;
                }

                offset += prefix_len;
                if prefix_len == max_len
                    && (prefix_len == remaining
                        || (prefix_len == remaining - 1 && path_bytes[offset] == b'/'))
                {
                    // the input is exhausted at this node, possibly up to a
                    // trailing slash
                    return current.cost;
                }
            } else {
                offset = skip_parameter(path, offset);
                if offset == path.len() {
                    if current.cost > 0 {
                        return current.cost;
                    }

                    match checkpoints.pop() {
                        Some(checkpoint) => {
                            current = checkpoint.node;
                            offset = checkpoint.offset;
                            cost = checkpoint.cost;
                            continue;
                        }
                        None => return cost,
                    }
                }
            }

            // find the next node: literal children take precedence, with a
            // checkpoint to retry the parameter branch should they dead-end
            let first = path_bytes[offset];
            let position = current.index.iter().position(|&key| key == first);
            if let Some(position) = position {
                if let Some(special) = current.special.as_deref() {
                    checkpoints.push(Checkpoint {
                        node: special,
                        offset,
                        cost,
                    });
                }
                current = &current.children[position];
                continue;
            }

            if let Some(special) = current.special.as_deref() {
                current = special;
                continue;
            }

            if current.has_wildcard {
                return current.cost;
            }

            match checkpoints.pop() {
                Some(checkpoint) => {
                    current = checkpoint.node;
                    offset = checkpoint.offset;
                    cost = checkpoint.cost;
                }
                None => break,
            }
        }

        cost
    }
}

fn validate_route(route: &str) -> Result<String, RouteError> {
    if !route.starts_with('/') {
        return Err(RouteError::MissingLeadingSlash(route.to_string()));
    }

    let last = route.len() - 1;
    if let Some(wildcard) = route.find('*') {
        if wildcard < last {
            return Err(RouteError::MisplacedWildcard(route.to_string()));
        }
    }

    let bytes = route.as_bytes();
    let mut position = 1;
    while position < bytes.len() {
        if bytes[position] != b':' {
            position += 1;
            continue;
        }

        let start = position;
        let mut end = start + 1;
        while end < bytes.len() && is_parameter_byte(bytes[end]) {
            end += 1;
        }

        if bytes[start - 1] != b'/' {
            let parameter_end = (end + 1).min(route.len());
            return Err(RouteError::MisplacedParameter {
                parameter: route[start..parameter_end].to_string(),
                route: route.to_string(),
            });
        }

        if end - start < 2 {
            return Err(RouteError::UnnamedParameter(route.to_string()));
        }

        position = end;
    }

    if bytes[last] == b'/' {
        return Ok(route[..last].to_string());
    }

    Ok(route.to_string())
}

fn is_parameter_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
