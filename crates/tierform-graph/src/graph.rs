//! DependencyGraph: validated DAG over resource descriptors.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use tierform_core::reference::references;
use tierform_core::{AttrRef, ResourceKind, ResourceSpec};

use crate::error::{GraphError, GraphResult};

/// Why an edge exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeOrigin {
    /// Declared in `depends_on`.
    Explicit,
    /// Inferred from a `${resource.attribute}` reference in a property.
    Reference { property: String, reference: AttrRef },
}

/// `dependent` cannot be created until `dependency` is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub dependency: String,
    pub dependent: String,
    pub origin: EdgeOrigin,
}

#[derive(Debug, Clone)]
struct Node {
    spec: ResourceSpec,
    dependencies: BTreeSet<String>,
    dependents: BTreeSet<String>,
}

/// A validated, acyclic provisioning graph.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
    edges: Vec<Edge>,
}

impl DependencyGraph {
    /// Build and validate a graph from resource descriptors.
    ///
    /// Fails on duplicate names, unknown dependencies, references to
    /// attributes the target never exposes, self references and cycles.
    pub fn build(specs: Vec<ResourceSpec>) -> GraphResult<Self> {
        let mut nodes = BTreeMap::new();
        for spec in specs {
            if nodes.contains_key(&spec.name) {
                return Err(GraphError::DuplicateResource(spec.name));
            }
            nodes.insert(
                spec.name.clone(),
                Node {
                    spec,
                    dependencies: BTreeSet::new(),
                    dependents: BTreeSet::new(),
                },
            );
        }

        let kinds: BTreeMap<String, ResourceKind> = nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.spec.kind))
            .collect();

        let mut edges = Vec::new();
        for (name, node) in &nodes {
            for dependency in &node.spec.depends_on {
                check_target(name, dependency, &kinds)?;
                edges.push(Edge {
                    dependency: dependency.clone(),
                    dependent: name.clone(),
                    origin: EdgeOrigin::Explicit,
                });
            }
            for (property, value) in &node.spec.properties {
                for reference in references(value) {
                    check_target(name, &reference.resource, &kinds)?;
                    let exposes = kinds[&reference.resource]
                        .output_attributes()
                        .contains(&reference.attribute.as_str());
                    if !exposes {
                        return Err(GraphError::UnknownAttribute {
                            resource: name.clone(),
                            reference: reference.to_string(),
                        });
                    }
                    edges.push(Edge {
                        dependency: reference.resource.clone(),
                        dependent: name.clone(),
                        origin: EdgeOrigin::Reference {
                            property: property.clone(),
                            reference,
                        },
                    });
                }
            }
        }

        Self::link(nodes, edges)
    }

    /// Rebuild a graph from recorded dependency edges, for teardown.
    ///
    /// Edges to resources that are no longer recorded are dropped: they
    /// were already deleted and constrain nothing.
    pub fn from_recorded<I>(records: I) -> GraphResult<Self>
    where
        I: IntoIterator<Item = (String, ResourceKind, Vec<String>)>,
    {
        let records: Vec<_> = records.into_iter().collect();
        let known: BTreeSet<&str> = records.iter().map(|(name, _, _)| name.as_str()).collect();

        let mut nodes = BTreeMap::new();
        let mut edges = Vec::new();
        for (name, kind, dependencies) in &records {
            for dependency in dependencies {
                if known.contains(dependency.as_str()) && dependency != name {
                    edges.push(Edge {
                        dependency: dependency.clone(),
                        dependent: name.clone(),
                        origin: EdgeOrigin::Explicit,
                    });
                }
            }
            let node = Node {
                spec: ResourceSpec::new(name.clone(), *kind),
                dependencies: BTreeSet::new(),
                dependents: BTreeSet::new(),
            };
            if nodes.insert(name.clone(), node).is_some() {
                return Err(GraphError::DuplicateResource(name.clone()));
            }
        }

        Self::link(nodes, edges)
    }

    fn link(mut nodes: BTreeMap<String, Node>, edges: Vec<Edge>) -> GraphResult<Self> {
        for edge in &edges {
            if let Some(node) = nodes.get_mut(&edge.dependent) {
                node.dependencies.insert(edge.dependency.clone());
            }
            if let Some(node) = nodes.get_mut(&edge.dependency) {
                node.dependents.insert(edge.dependent.clone());
            }
        }

        let graph = Self { nodes, edges };
        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::CircularDependency { cycle });
        }
        debug!(
            resources = graph.nodes.len(),
            edges = graph.edges.len(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Depth-first search for a back edge. Returns the cycle as a path
    /// along dependency edges, first and last element equal.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit<'a>(
            graph: &'a DependencyGraph,
            name: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            marks.insert(name, Mark::InProgress);
            path.push(name);
            for dependency in &graph.nodes[name].dependencies {
                match marks.get(dependency.as_str()).copied().unwrap_or(Mark::Unvisited) {
                    Mark::InProgress => {
                        let start = path.iter().position(|n| *n == dependency)?;
                        let mut cycle: Vec<String> =
                            path[start..].iter().map(|n| n.to_string()).collect();
                        cycle.push(dependency.clone());
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, dependency, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for name in self.nodes.keys() {
            if marks.get(name.as_str()).is_none() {
                let mut path = Vec::new();
                if let Some(cycle) = visit(self, name, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<&ResourceSpec> {
        self.nodes.get(name).map(|n| &n.spec)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Direct prerequisites of a resource.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resources that directly depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Creation order: every resource after all of its prerequisites.
    ///
    /// Kahn's algorithm with ties broken by name, so the order is
    /// deterministic for a given graph.
    pub fn create_order(&self) -> Vec<String> {
        self.create_waves().into_iter().flatten().collect()
    }

    /// Creation order grouped into waves. Every member of a wave depends
    /// only on members of earlier waves, so a wave may run concurrently.
    pub fn create_waves(&self) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.dependencies.len()))
            .collect();

        let mut waves = Vec::new();
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for name in &ready {
                remaining.remove(name);
                for dependent in &self.nodes[*name].dependents {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            next.insert(dependent.as_str());
                        }
                    }
                }
            }
            waves.push(ready.iter().map(|n| n.to_string()).collect());
            ready = next.into_iter().collect();
        }

        waves
    }

    /// Deletion order: every resource after all of its dependents.
    pub fn delete_order(&self) -> Vec<String> {
        let mut order = self.create_order();
        order.reverse();
        order
    }

    /// Every resource that transitively depends on `name`, in creation
    /// order. These are the resources a failure of `name` leaves blocked.
    pub fn blocked_by(&self, name: &str) -> Vec<String> {
        let mut blocked = BTreeSet::new();
        let mut stack: Vec<&str> = vec![name];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current) {
                for dependent in &node.dependents {
                    if blocked.insert(dependent.as_str()) {
                        stack.push(dependent);
                    }
                }
            }
        }
        self.create_order()
            .into_iter()
            .filter(|n| blocked.contains(n.as_str()))
            .collect()
    }
}

fn check_target(
    resource: &str,
    target: &str,
    kinds: &BTreeMap<String, ResourceKind>,
) -> GraphResult<()> {
    if target == resource {
        return Err(GraphError::SelfReference(resource.to_string()));
    }
    if !kinds.contains_key(target) {
        return Err(GraphError::UnknownDependency {
            resource: resource.to_string(),
            dependency: target.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use tierform_core::StackConfig;
    use tierform_core::topology::*;

    fn network(name: &str) -> ResourceSpec {
        ResourceSpec::new(name, ResourceKind::Network)
    }

    fn position(order: &[String], name: &str) -> usize {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{name} missing from order"))
    }

    // ── Validation ─────────────────────────────────────────────────

    #[test]
    fn two_node_cycle_is_rejected() {
        let err = DependencyGraph::build(vec![
            network("a").depends_on("b"),
            network("b").depends_on("a"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::CircularDependency {
                cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()]
            }
        );
        assert_eq!(err.to_string(), "circular dependency: a -> b -> a");
    }

    #[test]
    fn cycle_through_references_is_rejected() {
        let err = DependencyGraph::build(vec![
            network("a").property("peer", "${c.vpc_id}"),
            network("b").property("peer", "${a.vpc_id}"),
            network("c").depends_on("b"),
        ])
        .unwrap_err();
        let GraphError::CircularDependency { cycle } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
    }

    #[test]
    fn self_reference_is_rejected() {
        let err = DependencyGraph::build(vec![network("a").property("x", "${a.vpc_id}")]).unwrap_err();
        assert_eq!(err, GraphError::SelfReference("a".to_string()));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = DependencyGraph::build(vec![network("a").depends_on("ghost")]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let err = DependencyGraph::build(vec![
            network("a"),
            network("b").property("x", "${a.dns_name}"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GraphError::UnknownAttribute {
                resource: "b".to_string(),
                reference: "${a.dns_name}".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = DependencyGraph::build(vec![network("a"), network("a")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateResource("a".to_string()));
    }

    // ── Edges ──────────────────────────────────────────────────────

    #[test]
    fn references_become_edges() {
        let graph = DependencyGraph::build(vec![
            ResourceSpec::new("database", ResourceKind::Database),
            ResourceSpec::new("task", ResourceKind::TaskDefinition)
                .property("env.DB_HOST", "${database.endpoint}"),
        ])
        .unwrap();

        assert_eq!(graph.dependencies("task"), vec!["database"]);
        assert_eq!(graph.dependents("database"), vec!["task"]);
        assert!(matches!(
            &graph.edges()[0].origin,
            EdgeOrigin::Reference { property, .. } if property == "env.DB_HOST"
        ));
    }

    #[test]
    fn blocked_by_is_transitive() {
        let graph = DependencyGraph::build(vec![
            network("a"),
            network("b").depends_on("a"),
            network("c").depends_on("b"),
            network("d"),
        ])
        .unwrap();
        assert_eq!(graph.blocked_by("a"), vec!["b", "c"]);
        assert!(graph.blocked_by("d").is_empty());
    }

    #[test]
    fn recorded_edges_to_missing_resources_are_ignored() {
        let graph = DependencyGraph::from_recorded(vec![
            ("service".to_string(), ResourceKind::Service, vec!["task".to_string(), "gone".to_string()]),
            ("task".to_string(), ResourceKind::TaskDefinition, vec![]),
        ])
        .unwrap();
        assert_eq!(graph.delete_order(), vec!["service", "task"]);
    }

    // ── Ordering ───────────────────────────────────────────────────

    #[test]
    fn scenario_graph_order() {
        let graph = DependencyGraph::build(vec![
            ResourceSpec::new("entry_point", ResourceKind::Listener)
                .depends_on("compute")
                .depends_on("pool")
                .depends_on("reconciler"),
            ResourceSpec::new("reconciler", ResourceKind::ReconciledUser).depends_on("pool"),
            ResourceSpec::new("pool", ResourceKind::UserPool),
            ResourceSpec::new("compute", ResourceKind::Service)
                .depends_on("db")
                .depends_on("volume"),
            ResourceSpec::new("volume", ResourceKind::FileSystem).depends_on("network"),
            ResourceSpec::new("db", ResourceKind::Database).depends_on("network"),
            network("network"),
        ])
        .unwrap();

        let order = graph.create_order();
        assert_eq!(order.first().map(String::as_str), Some("network"));
        assert_eq!(order.last().map(String::as_str), Some("entry_point"));
        assert!(position(&order, "pool") < position(&order, "reconciler"));
        assert!(position(&order, "reconciler") < position(&order, "entry_point"));

        let delete = graph.delete_order();
        assert_eq!(delete.first().map(String::as_str), Some("entry_point"));
        assert_eq!(delete.last().map(String::as_str), Some("network"));
    }

    #[test]
    fn full_topology_orders_identity_between_address_and_listener() {
        let graph = DependencyGraph::build(StackConfig::scaffold("demo").resources()).unwrap();
        let order = graph.create_order();

        assert_eq!(order.first().map(String::as_str), Some(NETWORK));
        assert_eq!(order.last().map(String::as_str), Some(LISTENER));
        assert!(position(&order, LOAD_BALANCER) < position(&order, USER_POOL_CLIENT));
        assert!(position(&order, USER_POOL) < position(&order, ADMIN_USER));
        assert!(position(&order, ADMIN_USER) < position(&order, LISTENER));
        assert!(position(&order, DATABASE) < position(&order, TASK_DEFINITION));
        assert!(position(&order, ACCESS_POINT) < position(&order, TASK_DEFINITION));
        assert!(position(&order, TASK_DEFINITION) < position(&order, SERVICE));
    }

    #[test]
    fn waves_only_depend_on_earlier_waves() {
        let graph = DependencyGraph::build(StackConfig::scaffold("demo").resources()).unwrap();
        let waves = graph.create_waves();
        let wave_of: BTreeMap<&str, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(i, wave)| wave.iter().map(move |n| (n.as_str(), i)))
            .collect();
        assert_eq!(wave_of.len(), graph.len());
        for edge in graph.edges() {
            assert!(wave_of[edge.dependency.as_str()] < wave_of[edge.dependent.as_str()]);
        }
    }

    /// Random DAGs: shuffle names, add edges only from lower to higher
    /// rank, mix explicit and reference edges, and check both orders.
    #[test]
    fn random_dags_respect_every_edge() {
        let mut rng = StdRng::seed_from_u64(0x7e1f);
        for _ in 0..200 {
            let n = rng.gen_range(1..40);
            let mut names: Vec<String> = (0..n).map(|i| format!("r{i}")).collect();
            names.shuffle(&mut rng);

            let mut specs: Vec<ResourceSpec> = Vec::new();
            for (rank, name) in names.iter().enumerate() {
                let mut spec = network(name);
                for earlier in &names[..rank] {
                    if rng.gen_bool(0.15) {
                        spec = if rng.gen_bool(0.5) {
                            spec.depends_on(earlier.clone())
                        } else {
                            spec.property(format!("ref_{earlier}"), format!("${{{earlier}.vpc_id}}"))
                        };
                    }
                }
                specs.push(spec);
            }
            specs.shuffle(&mut rng);

            let graph = DependencyGraph::build(specs).unwrap();
            let create = graph.create_order();
            let delete = graph.delete_order();
            assert_eq!(create.len(), n);
            for edge in graph.edges() {
                assert!(position(&create, &edge.dependency) < position(&create, &edge.dependent));
                assert!(position(&delete, &edge.dependent) < position(&delete, &edge.dependency));
            }
        }
    }

    #[test]
    fn random_back_edge_is_always_rejected() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let n = rng.gen_range(2..20);
            // A chain r0 <- r1 <- ... <- r(n-1), then close it.
            let mut specs: Vec<ResourceSpec> = (0..n)
                .map(|i| {
                    let spec = network(&format!("r{i}"));
                    if i > 0 { spec.depends_on(format!("r{}", i - 1)) } else { spec }
                })
                .collect();
            let from = rng.gen_range(0..n - 1);
            let to = rng.gen_range(from + 1..n);
            specs[from] = specs[from].clone().depends_on(format!("r{to}"));
            specs.shuffle(&mut rng);

            let err = DependencyGraph::build(specs).unwrap_err();
            assert!(matches!(err, GraphError::CircularDependency { .. }));
        }
    }
}
