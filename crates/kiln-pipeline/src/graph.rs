//! Dependency graph of tasks, executed in waves.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

use tokio::task::JoinSet;

use crate::paths::Category;

/// Errors in graph construction or execution.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown task {0}")]
    UnknownTask(String),

    #[error("Dependency cycle between tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Task did not complete: {0}")]
    Panicked(String),
}

/// A set of tasks and "must complete before" edges between them.
#[derive(Debug, Clone)]
pub struct TaskGraph<K> {
    nodes: Vec<K>,
    // (before, after) as indices into `nodes`
    edges: Vec<(usize, usize)>,
}

impl<K> Default for TaskGraph<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash + Debug> TaskGraph<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Adding a task twice has no effect.
    pub fn add_task(&mut self, key: K) -> &mut Self {
        if !self.nodes.contains(&key) {
            self.nodes.push(key);
        }
        self
    }

    /// Require `before` to complete before `after` starts.
    pub fn add_edge(&mut self, before: &K, after: &K) -> Result<&mut Self, GraphError> {
        let from = self.index(before)?;
        let to = self.index(after)?;
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
        Ok(self)
    }

    pub fn tasks(&self) -> &[K] {
        &self.nodes
    }

    fn index(&self, key: &K) -> Result<usize, GraphError> {
        self.nodes
            .iter()
            .position(|n| n == key)
            .ok_or_else(|| GraphError::UnknownTask(format!("{key:?}")))
    }

    /// Group tasks into waves; every task's dependencies are in earlier waves.
    ///
    /// Tasks within a wave keep insertion order.
    pub fn topological_waves(&self) -> Result<Vec<Vec<K>>, GraphError> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();
        for &(from, to) in &self.edges {
            in_degree[to] += 1;
            successors.entry(from).or_default().push(to);
        }

        let mut waves = Vec::new();
        let mut ready: Vec<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = Vec::new();
            for &node in &ready {
                for &succ in successors.get(&node).into_iter().flatten() {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }
            placed += ready.len();
            waves.push(ready.iter().map(|&i| self.nodes[i].clone()).collect());
            next.sort_unstable();
            ready = next;
        }

        if placed < self.nodes.len() {
            let stuck = (0..self.nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| format!("{:?}", self.nodes[i]))
                .collect();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(waves)
    }
}

/// A node of the standard build graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Clean,
    Generate(Category),
}

impl TaskGraph<Step> {
    /// `clean < html < {style, scripts, images, font}`.
    pub fn standard() -> Self {
        let mut graph = Self::new();
        graph.add_task(Step::Clean);
        graph.add_task(Step::Generate(Category::Html));

        let mut edges = vec![(Step::Clean, Step::Generate(Category::Html))];
        for category in [Category::Style, Category::Scripts, Category::Images, Category::Font] {
            graph.add_task(Step::Generate(category));
            edges.push((Step::Generate(Category::Html), Step::Generate(category)));
        }
        for (before, after) in edges {
            // Both ends were added above.
            let _ = graph.add_edge(&before, &after);
        }
        graph
    }
}

/// Run every task of `graph`, one wave at a time.
///
/// Tasks of a wave run concurrently. `on_wave` is called before each wave
/// starts and may abort the run. After a task fails the rest of its wave is
/// awaited, no further wave starts and the first error is returned.
/// Results are returned in completion order.
pub async fn execute<K, T, E, F, Fut, W>(
    graph: &TaskGraph<K>,
    run: F,
    mut on_wave: W,
) -> Result<Vec<(K, T)>, E>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    T: Send + 'static,
    E: From<GraphError> + Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    W: FnMut(&[K]) -> Result<(), E>,
{
    let waves = graph.topological_waves()?;
    let mut results = Vec::with_capacity(graph.tasks().len());

    for wave in waves {
        on_wave(&wave)?;

        let mut set = JoinSet::new();
        for key in wave {
            let task = run(key.clone());
            set.spawn(async move { (key, task.await) });
        }

        let mut first_error: Option<E> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, Ok(value))) => results.push((key, value)),
                Ok((key, Err(e))) => {
                    tracing::debug!("Task {:?} failed", key);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(E::from(GraphError::Panicked(e.to_string())));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
    }

    Ok(results)
}
