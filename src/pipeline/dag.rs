// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Stage dependency graph
//!
//! Builds the directed acyclic graph of stages from explicit `depends_on`
//! entries and input references, rejects cycles, and answers ordering
//! questions for the scheduler and the `graph` command.
//!
//! Node `i` is always the `i`-th stage in declaration order, so stage
//! indices can be shared freely between the graph, the pipeline and a run.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::errors::{PipeflowError, PipeflowResult};
use crate::pipeline::{Pipeline, Stage};

/// Traversal state used by cycle detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Dependency graph over the stages of a pipeline
#[derive(Debug, Clone)]
pub struct StageGraph {
    graph: DiGraph<usize, ()>,
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
    upstream: Vec<Vec<usize>>,
    downstream: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Build the graph for a pipeline
    pub fn build(pipeline: &Pipeline) -> PipeflowResult<Self> {
        Self::from_stages(&pipeline.stages)
    }

    /// Build the graph from stage definitions
    pub fn from_stages(stages: &[Stage]) -> PipeflowResult<Self> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (idx, stage) in stages.iter().enumerate() {
            if name_to_index.insert(stage.name.clone(), idx).is_some() {
                return Err(PipeflowError::DuplicateStage {
                    stage: stage.name.clone(),
                });
            }
            graph.add_node(idx);
        }

        let mut upstream = vec![Vec::new(); stages.len()];
        let mut downstream = vec![Vec::new(); stages.len()];

        for (idx, stage) in stages.iter().enumerate() {
            for dep_name in stage.upstream_names() {
                let dep = *name_to_index.get(dep_name).ok_or_else(|| {
                    PipeflowError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep_name.to_string(),
                    }
                })?;

                graph.update_edge(NodeIndex::new(dep), NodeIndex::new(idx), ());
                upstream[idx].push(dep);
                downstream[dep].push(idx);
            }
        }

        for list in upstream.iter_mut().chain(downstream.iter_mut()) {
            list.sort_unstable();
            list.dedup();
        }

        let dag = Self {
            graph,
            names: stages.iter().map(|s| s.name.clone()).collect(),
            name_to_index,
            upstream,
            downstream,
        };

        dag.detect_cycle()?;

        Ok(dag)
    }

    /// Depth-first search with three-color marking; reaching a node that is
    /// still in progress means the current path loops back on itself
    fn detect_cycle(&self) -> PipeflowResult<()> {
        let mut marks = vec![Mark::Unvisited; self.names.len()];
        let mut path = Vec::new();

        for start in 0..self.names.len() {
            if marks[start] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut path)?;
            }
        }

        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> PipeflowResult<()> {
        marks[node] = Mark::InProgress;
        path.push(node);

        for &next in &self.downstream[node] {
            match marks[next] {
                Mark::InProgress => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut stages: Vec<String> =
                        path[start..].iter().map(|&n| self.names[n].clone()).collect();
                    stages.push(self.names[next].clone());
                    return Err(PipeflowError::CyclicDependency { stages });
                }
                Mark::Unvisited => self.visit(next, marks, path)?,
                Mark::Done => {}
            }
        }

        path.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no stages
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of the stage at `idx`
    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Index of a stage by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Stage indices in an order where every stage follows all of its
    /// dependencies. Among stages that are ready at the same time, the one
    /// declared first comes first.
    pub fn topological_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.upstream.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &self.downstream[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        order
    }

    /// Stage names in topological order
    pub fn topological_order_names(&self) -> Vec<String> {
        self.topological_order()
            .into_iter()
            .map(|i| self.names[i].clone())
            .collect()
    }

    /// Direct dependencies of the stage at `idx`
    pub fn upstream_of(&self, idx: usize) -> &[usize] {
        &self.upstream[idx]
    }

    /// Direct dependents of the stage at `idx`
    pub fn downstream_of(&self, idx: usize) -> &[usize] {
        &self.downstream[idx]
    }

    /// Get dependencies for a stage (stages that must finish before it)
    pub fn dependencies_of(&self, stage_name: &str) -> Option<Vec<&str>> {
        let idx = self.index_of(stage_name)?;
        Some(self.upstream[idx].iter().map(|&i| self.name(i)).collect())
    }

    /// Get dependents for a stage (stages that wait on it)
    pub fn dependents_of(&self, stage_name: &str) -> Option<Vec<&str>> {
        let idx = self.index_of(stage_name)?;
        Some(self.downstream[idx].iter().map(|&i| self.name(i)).collect())
    }

    /// Stages with no dependencies
    pub fn roots(&self) -> Vec<&str> {
        (0..self.len())
            .filter(|&i| self.upstream[i].is_empty())
            .map(|i| self.name(i))
            .collect()
    }

    /// Check if stage A depends (directly or transitively) on stage B
    pub fn depends_on(&self, stage_a: &str, stage_b: &str) -> bool {
        let (Some(a), Some(b)) = (self.index_of(stage_a), self.index_of(stage_b)) else {
            return false;
        };

        a != b
            && petgraph::algo::has_path_connecting(
                &self.graph,
                NodeIndex::new(b),
                NodeIndex::new(a),
                None,
            )
    }

    fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.graph.edge_references().map(|edge| {
            (
                self.name(self.graph[edge.source()]),
                self.name(self.graph[edge.target()]),
            )
        })
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for name in &self.names {
            out.push_str(&format!("    {}[{}]\n", mermaid_id(name), name));
        }

        for (from, to) in self.edges() {
            out.push_str(&format!("    {} --> {}\n", mermaid_id(from), mermaid_id(to)));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.edges() {
            out.push_str(&format!("    \"{}\" -> \"{}\";\n", from, to));
        }

        for (idx, name) in self.names.iter().enumerate() {
            if self.upstream[idx].is_empty() && self.downstream[idx].is_empty() {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, pipeline: &Pipeline) -> String {
        let mut out = String::new();

        for (i, idx) in self.topological_order().into_iter().enumerate() {
            let stage = &pipeline.stages[idx];
            out.push_str(&format!("{}. {}", i + 1, stage.name));

            if let Some(group) = &stage.concurrency_group {
                out.push_str(&format!(" <{}>", group));
            }

            let deps: Vec<&str> = self.upstream[idx].iter().map(|&d| self.name(d)).collect();
            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        out
    }
}

/// Mermaid node ids cannot contain dashes or dots
fn mermaid_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutputRef;

    fn make_stages(stages: Vec<(&str, Vec<&str>)>) -> Vec<Stage> {
        stages
            .into_iter()
            .map(|(name, deps)| Stage::new(name, "true").after(&deps))
            .collect()
    }

    fn assert_valid_order(stages: &[Stage], order: &[usize]) {
        assert_eq!(order.len(), stages.len());
        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();
        assert_eq!(position.len(), stages.len(), "each stage exactly once");

        for (idx, stage) in stages.iter().enumerate() {
            for dep in stage.upstream_names() {
                let dep_idx = stages.iter().position(|s| s.name == dep).unwrap();
                assert!(position[&dep_idx] < position[&idx], "{} before {}", dep, stage.name);
            }
        }
    }

    #[test]
    fn test_linear_dag() {
        let stages = make_stages(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let dag = StageGraph::from_stages(&stages).unwrap();
        assert_eq!(dag.topological_order_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ties_follow_declaration_order() {
        let stages = make_stages(vec![
            ("checkout", vec![]),
            ("typecheck", vec!["checkout"]),
            ("lint", vec!["checkout"]),
            ("docs", vec![]),
            ("report", vec!["lint", "typecheck"]),
        ]);

        let dag = StageGraph::from_stages(&stages).unwrap();
        assert_eq!(
            dag.topological_order_names(),
            vec!["checkout", "typecheck", "lint", "docs", "report"]
        );
    }

    #[test]
    fn test_order_respects_dependencies_when_declared_backwards() {
        let stages = make_stages(vec![
            ("publish", vec!["build"]),
            ("build", vec!["bump"]),
            ("audit", vec![]),
            ("bump", vec!["checkout"]),
            ("checkout", vec![]),
            ("notify", vec!["publish", "audit"]),
        ]);

        let dag = StageGraph::from_stages(&stages).unwrap();
        assert_valid_order(&stages, &dag.topological_order());
    }

    #[test]
    fn test_wide_graphs_are_ordered() {
        // Every stage i depends on the stages at i/2 and i/3 (when different).
        let names: Vec<String> = (0..40).map(|i| format!("s{}", i)).collect();
        let stages: Vec<Stage> = (0..40)
            .map(|i| {
                let mut stage = Stage::new(names[i].clone(), "true");
                for dep in [i / 2, i / 3] {
                    if dep != i && !stage.depends_on.contains(&names[dep]) {
                        stage.depends_on.push(names[dep].clone());
                    }
                }
                stage
            })
            .rev()
            .collect();

        let dag = StageGraph::from_stages(&stages).unwrap();
        assert_valid_order(&stages, &dag.topological_order());
    }

    #[test]
    fn test_cyclic_dependency_detection() {
        let stages = make_stages(vec![("a", vec!["c"]), ("b", vec!["a"]), ("c", vec!["b"])]);

        match StageGraph::from_stages(&stages) {
            Err(PipeflowError::CyclicDependency { stages }) => {
                assert_eq!(stages.first(), stages.last());
                assert_eq!(stages.len(), 4);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let stages = make_stages(vec![("a", vec![]), ("b", vec!["b"])]);

        match StageGraph::from_stages(&stages) {
            Err(PipeflowError::CyclicDependency { stages }) => {
                assert_eq!(stages, vec!["b", "b"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_through_input_reference() {
        let mut stages = make_stages(vec![("a", vec!["b"]), ("b", vec![])]);
        stages[1]
            .inputs
            .insert("X".into(), OutputRef::new("a", "value"));

        assert!(matches!(
            StageGraph::from_stages(&stages),
            Err(PipeflowError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let stages = make_stages(vec![("a", vec!["nonexistent"])]);

        assert!(matches!(
            StageGraph::from_stages(&stages),
            Err(PipeflowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_stage() {
        let stages = make_stages(vec![("a", vec![]), ("a", vec![])]);

        assert!(matches!(
            StageGraph::from_stages(&stages),
            Err(PipeflowError::DuplicateStage { .. })
        ));
    }

    #[test]
    fn test_dependents_and_dependencies() {
        let stages = make_stages(vec![
            ("checkout", vec![]),
            ("lint", vec!["checkout"]),
            ("typecheck", vec!["checkout"]),
            ("report", vec!["lint", "typecheck"]),
        ]);

        let dag = StageGraph::from_stages(&stages).unwrap();
        assert_eq!(dag.dependents_of("checkout").unwrap(), vec!["lint", "typecheck"]);
        assert_eq!(dag.dependencies_of("report").unwrap(), vec!["lint", "typecheck"]);
        assert_eq!(dag.roots(), vec!["checkout"]);
        assert!(dag.dependents_of("missing").is_none());
    }

    #[test]
    fn test_depends_on_check() {
        let stages = make_stages(vec![("a", vec![]), ("b", vec!["a"]), ("c", vec!["b"])]);

        let dag = StageGraph::from_stages(&stages).unwrap();

        assert!(dag.depends_on("c", "a")); // transitive
        assert!(dag.depends_on("c", "b")); // direct
        assert!(!dag.depends_on("a", "c")); // reverse
        assert!(!dag.depends_on("a", "a"));
    }

    #[test]
    fn test_mermaid_output() {
        let stages = make_stages(vec![("bump-version", vec![]), ("build", vec!["bump-version"])]);

        let dag = StageGraph::from_stages(&stages).unwrap();
        let mermaid = dag.to_mermaid();

        assert!(mermaid.contains("graph TD"));
        assert!(mermaid.contains("bump_version[bump-version]"));
        assert!(mermaid.contains("bump_version --> build"));
    }

    #[test]
    fn test_text_plan() {
        let mut pipeline = Pipeline {
            version: "1".into(),
            name: "release".into(),
            description: None,
            settings: Default::default(),
            env: Default::default(),
            stages: make_stages(vec![
                ("checkout", vec![]),
                ("build", vec!["checkout"]),
                ("publish", vec!["build"]),
            ]),
        };
        pipeline.stages[2].concurrency_group = Some("release-lock".into());

        let dag = StageGraph::build(&pipeline).unwrap();
        insta::assert_snapshot!(dag.to_text(&pipeline), @r###"
        1. checkout
        2. build [depends: checkout]
        3. publish <release-lock> [depends: build]
        "###);
    }
}
