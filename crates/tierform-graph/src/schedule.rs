//! Incremental dispatch schedule over a dependency graph.
//!
//! The orchestrator asks for resources whose prerequisites have all
//! completed, dispatches them concurrently, and reports completions as they
//! arrive. Creation waits on dependencies; deletion waits on dependents.

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::DependencyGraph;

#[derive(Debug, Clone)]
pub struct Schedule {
    /// Outstanding prerequisites per not-yet-dispatched resource.
    waiting: BTreeMap<String, BTreeSet<String>>,
    /// Reverse index: who is waiting on a given resource.
    waiters: BTreeMap<String, BTreeSet<String>>,
    in_flight: BTreeSet<String>,
    completed: BTreeSet<String>,
}

impl Schedule {
    /// A resource becomes ready once all of its dependencies completed.
    pub fn for_create(graph: &DependencyGraph) -> Self {
        let prerequisites = graph
            .names()
            .map(|name| (name.to_string(), graph.dependencies(name).into_iter().collect()))
            .collect();
        Self::new(prerequisites)
    }

    /// A resource becomes ready once all of its dependents are gone.
    ///
    /// Only resources in `present` are scheduled; absent dependents do
    /// not hold anything back.
    pub fn for_delete(graph: &DependencyGraph, present: &BTreeSet<String>) -> Self {
        let prerequisites = graph
            .names()
            .filter(|name| present.contains(*name))
            .map(|name| {
                let dependents = graph
                    .dependents(name)
                    .into_iter()
                    .filter(|d| present.contains(d))
                    .collect();
                (name.to_string(), dependents)
            })
            .collect();
        Self::new(prerequisites)
    }

    fn new(waiting: BTreeMap<String, BTreeSet<String>>) -> Self {
        let mut waiters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, prerequisites) in &waiting {
            for prerequisite in prerequisites {
                waiters
                    .entry(prerequisite.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }
        Self {
            waiting,
            waiters,
            in_flight: BTreeSet::new(),
            completed: BTreeSet::new(),
        }
    }

    /// Remove and return every resource whose prerequisites are complete.
    /// Returned resources are considered in flight.
    pub fn take_ready(&mut self) -> Vec<String> {
        let ready: Vec<String> = self
            .waiting
            .iter()
            .filter(|(_, prerequisites)| prerequisites.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &ready {
            self.waiting.remove(name);
            self.in_flight.insert(name.clone());
        }
        ready
    }

    /// Mark an in-flight resource complete, unblocking its waiters.
    pub fn complete(&mut self, name: &str) {
        if !self.in_flight.remove(name) {
            return;
        }
        self.completed.insert(name.to_string());
        if let Some(waiters) = self.waiters.remove(name) {
            for waiter in waiters {
                if let Some(prerequisites) = self.waiting.get_mut(&waiter) {
                    prerequisites.remove(name);
                }
            }
        }
    }

    /// Resources not yet dispatched.
    pub fn pending(&self) -> Vec<String> {
        self.waiting.keys().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    /// Nothing waiting and nothing in flight.
    pub fn is_finished(&self) -> bool {
        self.waiting.is_empty() && self.in_flight.is_empty()
    }
}
