//! Dependency Resolver
//!
//! Computes a validated, dependency-first load order for registered plugins,
//! or a structured diagnostic failure. Cycles and version conflicts are
//! reported as data in the result object; nothing escapes the resolver
//! boundary as an error.

use std::collections::{HashMap, HashSet, VecDeque};
use serde::{Deserialize, Serialize};
use super::traits::{PluginDependency, PluginDescriptor};
use super::version::VersionChecker;

/// Outcome of a dependency resolution pass
///
/// Immutable once produced. On success `load_order` contains every plugin id
/// exactly once with every non-optional prerequisite ahead of its dependents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyResolutionResult {
    /// Whether a valid load order was produced
    pub success: bool,

    /// Plugin ids in dependency-first order (empty on failure)
    pub load_order: Vec<String>,

    /// Detected cycles, each as the ordered id path back to its start
    pub circular_dependencies: Vec<Vec<String>>,

    /// Version constraint violations
    pub version_conflicts: Vec<VersionConflict>,

    /// Diagnostic message for failures not covered by the lists above
    pub error_message: Option<String>,
}

impl DependencyResolutionResult {
    fn success(load_order: Vec<String>) -> Self {
        Self {
            success: true,
            load_order,
            circular_dependencies: Vec::new(),
            version_conflicts: Vec::new(),
            error_message: None,
        }
    }

    fn cycles(circular_dependencies: Vec<Vec<String>>) -> Self {
        Self {
            success: false,
            load_order: Vec::new(),
            circular_dependencies,
            version_conflicts: Vec::new(),
            error_message: Some("Circular dependencies detected".to_string()),
        }
    }

    fn conflicts(version_conflicts: Vec<VersionConflict>) -> Self {
        Self {
            success: false,
            load_order: Vec::new(),
            circular_dependencies: Vec::new(),
            version_conflicts,
            error_message: Some("Version conflicts detected".to_string()),
        }
    }

    fn failed<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            load_order: Vec::new(),
            circular_dependencies: Vec::new(),
            version_conflicts: Vec::new(),
            error_message: Some(message.into()),
        }
    }
}

/// A dependency whose target version falls outside the declared bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// The dependency target whose version is unacceptable
    pub plugin_id: String,

    /// The target's registered version
    pub actual_version: String,

    /// The declared requirement, rendered for diagnostics
    pub required_version: String,

    /// The plugin that declared the requirement
    pub required_by: String,
}

/// Read-only diagnostic view of the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<DependencyNode>,
    pub edges: Vec<DependencyEdge>,
}

/// One plugin (or referenced-but-unregistered placeholder) in the graph view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    pub name: String,
    pub version: String,
    pub is_installed: bool,
}

/// One declared dependency edge in the graph view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub is_optional: bool,
    pub version_requirement: Option<String>,
}

/// Resolver for plugin load ordering and dependency validation
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new dependency resolver
    pub fn new() -> Self {
        Self
    }

    /// Resolve a validated load order for the given plugins
    ///
    /// Cycle detection runs first; any cycle through non-optional edges
    /// fails the whole resolution with no partial order. Ties among
    /// equally-ready plugins break by registration order, which callers
    /// must treat as "some valid order", not a guaranteed sequence.
    pub fn resolve_dependencies(&self, plugins: &[PluginDescriptor]) -> DependencyResolutionResult {
        if plugins.is_empty() {
            return DependencyResolutionResult::success(Vec::new());
        }

        let registered: HashMap<&str, &PluginDescriptor> =
            plugins.iter().map(|p| (p.id.as_str(), p)).collect();

        if registered.len() != plugins.len() {
            return DependencyResolutionResult::failed("Duplicate plugin ids in registration set");
        }

        let cycles = self.detect_cycles(plugins, &registered);
        if !cycles.is_empty() {
            log::warn!("Dependency resolution failed: {} cycle(s) detected", cycles.len());
            return DependencyResolutionResult::cycles(cycles);
        }

        let load_order = match self.topological_order(plugins, &registered) {
            Ok(order) => order,
            Err(unresolved) => {
                return DependencyResolutionResult::failed(format!(
                    "Unresolvable plugins after ordering: {}",
                    unresolved.join(", ")
                ));
            }
        };

        let conflicts = self.collect_version_conflicts(plugins, &registered);
        if !conflicts.is_empty() {
            log::warn!(
                "Dependency resolution failed: {} version conflict(s)",
                conflicts.len()
            );
            return DependencyResolutionResult::conflicts(conflicts);
        }

        log::debug!("Resolved load order for {} plugin(s)", load_order.len());
        DependencyResolutionResult::success(load_order)
    }

    /// Depth-first cycle detection over non-optional, resolvable edges
    ///
    /// A back-edge to a node still on the recursion stack yields the cycle
    /// path from that node around to itself.
    fn detect_cycles(
        &self,
        plugins: &[PluginDescriptor],
        registered: &HashMap<&str, &PluginDescriptor>,
    ) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();

        for plugin in plugins {
            if !visited.contains(plugin.id.as_str()) {
                let mut path: Vec<&str> = Vec::new();
                let mut on_stack: HashSet<&str> = HashSet::new();
                self.visit_for_cycles(
                    plugin.id.as_str(),
                    registered,
                    &mut visited,
                    &mut path,
                    &mut on_stack,
                    &mut cycles,
                );
            }
        }

        cycles
    }

    fn visit_for_cycles<'a>(
        &self,
        id: &'a str,
        registered: &HashMap<&str, &'a PluginDescriptor>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        path.push(id);
        on_stack.insert(id);

        if let Some(descriptor) = registered.get(id) {
            for dep in &descriptor.dependencies {
                if dep.is_optional {
                    continue;
                }
                let target = dep.plugin_id.as_str();
                if !registered.contains_key(target) {
                    continue;
                }
                if on_stack.contains(target) {
                    // Back-edge: report the path from the target back to itself.
                    let start = path.iter().position(|p| *p == target).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(target.to_string());
                    cycles.push(cycle);
                } else if !visited.contains(target) {
                    self.visit_for_cycles(target, registered, visited, path, on_stack, cycles);
                }
            }
        }

        on_stack.remove(id);
        path.pop();
        visited.insert(id);
    }

    /// Kahn's algorithm over the dependency → dependents reverse adjacency
    ///
    /// Returns the ids that never reached zero in-degree on failure. Only
    /// possible if cycle detection missed something through optional-edge
    /// interactions.
    fn topological_order(
        &self,
        plugins: &[PluginDescriptor],
        registered: &HashMap<&str, &PluginDescriptor>,
    ) -> Result<Vec<String>, Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for plugin in plugins {
            in_degree.entry(plugin.id.as_str()).or_insert(0);
        }

        for plugin in plugins {
            for dep in &plugin.dependencies {
                if dep.is_optional {
                    continue;
                }
                let target = dep.plugin_id.as_str();
                if !registered.contains_key(target) {
                    continue;
                }
                *in_degree.entry(plugin.id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(target)
                    .or_default()
                    .push(plugin.id.as_str());
            }
        }

        // Seed in registration order for a stable (but unspecified) tie break.
        let mut ready: VecDeque<&str> = plugins
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| in_degree[id] == 0)
            .collect();

        let mut load_order = Vec::with_capacity(plugins.len());
        while let Some(id) = ready.pop_front() {
            load_order.push(id.to_string());
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let degree = in_degree.get_mut(child).expect("dependent was registered");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if load_order.len() != plugins.len() {
            let unresolved = plugins
                .iter()
                .map(|p| p.id.clone())
                .filter(|id| !load_order.contains(id))
                .collect();
            return Err(unresolved);
        }

        Ok(load_order)
    }

    /// Check every declared dependency with a resolvable target against its
    /// inclusive version bounds
    fn collect_version_conflicts(
        &self,
        plugins: &[PluginDescriptor],
        registered: &HashMap<&str, &PluginDescriptor>,
    ) -> Vec<VersionConflict> {
        let mut conflicts = Vec::new();

        for plugin in plugins {
            for dep in &plugin.dependencies {
                let Some(target) = registered.get(dep.plugin_id.as_str()) else {
                    continue;
                };
                if !VersionChecker::is_version_compatible(
                    &target.version,
                    dep.min_version.as_deref(),
                    dep.max_version.as_deref(),
                ) {
                    conflicts.push(VersionConflict {
                        plugin_id: target.id.clone(),
                        actual_version: target.version.clone(),
                        required_version: render_requirement(dep),
                        required_by: plugin.id.clone(),
                    });
                }
            }
        }

        conflicts
    }

    /// Check that a plugin's non-optional dependencies are installed and
    /// version-compatible
    pub fn validate_installation(
        &self,
        plugin_id: &str,
        dependencies: &[PluginDependency],
        installed_versions: &HashMap<String, String>,
    ) -> bool {
        for dep in dependencies {
            if dep.is_optional {
                continue;
            }
            let Some(installed) = installed_versions.get(&dep.plugin_id) else {
                log::debug!(
                    "Installation of '{}' blocked: dependency '{}' not installed",
                    plugin_id,
                    dep.plugin_id
                );
                return false;
            };
            if !VersionChecker::is_version_compatible(
                installed,
                dep.min_version.as_deref(),
                dep.max_version.as_deref(),
            ) {
                log::debug!(
                    "Installation of '{}' blocked: dependency '{}' version {} outside bounds",
                    plugin_id,
                    dep.plugin_id,
                    installed
                );
                return false;
            }
        }
        true
    }

    /// Reverse lookup of plugins that non-optionally depend on `plugin_id`
    ///
    /// Id comparison is case-insensitive.
    pub fn get_dependent_plugins(
        &self,
        plugin_id: &str,
        all_plugins: &[PluginDescriptor],
    ) -> Vec<String> {
        all_plugins
            .iter()
            .filter(|plugin| {
                plugin.dependencies.iter().any(|dep| {
                    !dep.is_optional && dep.plugin_id.eq_ignore_ascii_case(plugin_id)
                })
            })
            .map(|plugin| plugin.id.clone())
            .collect()
    }

    /// Build the diagnostic node/edge view of the dependency graph
    ///
    /// Referenced-but-unregistered targets get placeholder nodes with
    /// version "?" and `is_installed: false`.
    pub fn get_dependency_graph(&self, plugins: &[PluginDescriptor]) -> DependencyGraph {
        let registered: HashSet<&str> = plugins.iter().map(|p| p.id.as_str()).collect();

        let mut nodes: Vec<DependencyNode> = plugins
            .iter()
            .map(|plugin| DependencyNode {
                id: plugin.id.clone(),
                name: plugin.name.clone(),
                version: plugin.version.clone(),
                is_installed: plugin.is_installed,
            })
            .collect();

        let mut edges = Vec::new();
        let mut placeholders: Vec<String> = Vec::new();

        for plugin in plugins {
            for dep in &plugin.dependencies {
                if !registered.contains(dep.plugin_id.as_str())
                    && !placeholders.contains(&dep.plugin_id)
                {
                    placeholders.push(dep.plugin_id.clone());
                }
                let requirement = if dep.min_version.is_some() || dep.max_version.is_some() {
                    Some(render_requirement(dep))
                } else {
                    None
                };
                edges.push(DependencyEdge {
                    from: plugin.id.clone(),
                    to: dep.plugin_id.clone(),
                    is_optional: dep.is_optional,
                    version_requirement: requirement,
                });
            }
        }

        for id in placeholders {
            nodes.push(DependencyNode {
                name: id.clone(),
                id,
                version: "?".to_string(),
                is_installed: false,
            });
        }

        DependencyGraph { nodes, edges }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a dependency's version bounds for diagnostics
fn render_requirement(dep: &PluginDependency) -> String {
    match (dep.min_version.as_deref(), dep.max_version.as_deref()) {
        (Some(min), Some(max)) => format!("{} - {}", min, max),
        (Some(min), None) => format!(">= {}", min),
        (None, Some(max)) => format!("<= {}", max),
        (None, None) => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::traits::PluginDependency;

    fn descriptor(id: &str, version: &str, deps: Vec<PluginDependency>) -> PluginDescriptor {
        let mut d = PluginDescriptor::new(id, version);
        d.dependencies = deps;
        d
    }

    /// Check that every non-optional resolvable edge is respected by the order
    fn assert_valid_order(result: &DependencyResolutionResult, plugins: &[PluginDescriptor]) {
        assert!(result.success, "resolution failed: {:?}", result.error_message);
        assert_eq!(result.load_order.len(), plugins.len());

        let position: HashMap<&str, usize> = result
            .load_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        for plugin in plugins {
            assert!(position.contains_key(plugin.id.as_str()));
            for dep in &plugin.dependencies {
                if dep.is_optional {
                    continue;
                }
                if let Some(dep_pos) = position.get(dep.plugin_id.as_str()) {
                    assert!(
                        dep_pos < &position[plugin.id.as_str()],
                        "'{}' must load before '{}'",
                        dep.plugin_id,
                        plugin.id
                    );
                }
            }
        }
    }

    #[test]
    fn test_empty_registration_set() {
        let result = DependencyResolver::new().resolve_dependencies(&[]);
        assert!(result.success);
        assert!(result.load_order.is_empty());
    }

    #[test]
    fn test_simple_chain() {
        let plugins = vec![
            descriptor("c", "1.0.0", vec![PluginDependency::required("b")]),
            descriptor("b", "1.0.0", vec![PluginDependency::required("a")]),
            descriptor("a", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert_valid_order(&result, &plugins);
        assert_eq!(result.load_order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_independent_plugins_keep_registration_order() {
        let plugins = vec![
            descriptor("first", "1.0.0", vec![]),
            descriptor("second", "1.0.0", vec![]),
            descriptor("third", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert_valid_order(&result, &plugins);
    }

    #[test]
    fn test_diamond_dependency() {
        let plugins = vec![
            descriptor("app", "1.0.0", vec![
                PluginDependency::required("left"),
                PluginDependency::required("right"),
            ]),
            descriptor("left", "1.0.0", vec![PluginDependency::required("base")]),
            descriptor("right", "1.0.0", vec![PluginDependency::required("base")]),
            descriptor("base", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert_valid_order(&result, &plugins);
        assert_eq!(result.load_order.first().map(String::as_str), Some("base"));
        assert_eq!(result.load_order.last().map(String::as_str), Some("app"));
    }

    #[test]
    fn test_two_node_cycle() {
        let plugins = vec![
            descriptor("a", "1.0.0", vec![PluginDependency::required("b")]),
            descriptor("b", "1.0.0", vec![PluginDependency::required("a")]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(!result.success);
        assert!(result.load_order.is_empty());
        assert!(!result.circular_dependencies.is_empty());

        let cycle = &result.circular_dependencies[0];
        assert!(cycle.contains(&"a".to_string()));
        assert!(cycle.contains(&"b".to_string()));
        // The reported path returns to its start
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn test_self_cycle() {
        let plugins = vec![
            descriptor("loner", "1.0.0", vec![PluginDependency::required("loner")]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(!result.success);
        assert_eq!(result.circular_dependencies.len(), 1);
        assert_eq!(result.circular_dependencies[0], vec!["loner", "loner"]);
    }

    #[test]
    fn test_optional_edges_do_not_form_cycles() {
        // a <-> b only through an optional edge: not a cycle
        let plugins = vec![
            descriptor("a", "1.0.0", vec![PluginDependency::required("b")]),
            descriptor("b", "1.0.0", vec![PluginDependency::optional("a")]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert_valid_order(&result, &plugins);
        assert_eq!(result.load_order, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_dependency_is_skipped_for_ordering() {
        // Unregistered targets do not block ordering; installation-time
        // validation is a separate concern.
        let plugins = vec![
            descriptor("a", "1.0.0", vec![PluginDependency::required("ghost")]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(result.success);
        assert_eq!(result.load_order, vec!["a"]);
    }

    #[test]
    fn test_version_conflict_fails_resolution() {
        let plugins = vec![
            descriptor("a", "1.0.0", vec![
                PluginDependency::required("b").with_min_version("2.0.0"),
            ]),
            descriptor("b", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(!result.success);
        assert_eq!(result.version_conflicts.len(), 1);

        let conflict = &result.version_conflicts[0];
        assert_eq!(conflict.plugin_id, "b");
        assert_eq!(conflict.required_by, "a");
        assert_eq!(conflict.actual_version, "1.0.0");
    }

    #[test]
    fn test_all_conflicts_collected() {
        let plugins = vec![
            descriptor("a", "1.0.0", vec![
                PluginDependency::required("b").with_min_version("2.0.0"),
                PluginDependency::required("c").with_max_version("0.5.0"),
            ]),
            descriptor("b", "1.0.0", vec![]),
            descriptor("c", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(!result.success);
        assert_eq!(result.version_conflicts.len(), 2);
    }

    #[test]
    fn test_boundary_versions_are_compatible() {
        let plugins = vec![
            descriptor("a", "1.0.0", vec![
                PluginDependency::required("b")
                    .with_min_version("1.0.0")
                    .with_max_version("1.0.0"),
            ]),
            descriptor("b", "1.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(result.success);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let plugins = vec![
            descriptor("a", "1.0.0", vec![]),
            descriptor("a", "2.0.0", vec![]),
        ];

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        assert!(!result.success);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn test_validate_installation() {
        let resolver = DependencyResolver::new();
        let deps = vec![
            PluginDependency::required("base").with_min_version("1.0.0"),
            PluginDependency::optional("extras"),
        ];

        let mut installed = HashMap::new();
        installed.insert("base".to_string(), "1.5.0".to_string());
        assert!(resolver.validate_installation("app", &deps, &installed));

        // Optional deps never block installation
        assert!(!installed.contains_key("extras"));

        // Missing required dep blocks
        installed.remove("base");
        assert!(!resolver.validate_installation("app", &deps, &installed));

        // Version outside bounds blocks
        installed.insert("base".to_string(), "0.9.0".to_string());
        assert!(!resolver.validate_installation("app", &deps, &installed));
    }

    #[test]
    fn test_get_dependent_plugins_case_insensitive() {
        let plugins = vec![
            descriptor("app", "1.0.0", vec![PluginDependency::required("Core-UI")]),
            descriptor("widget", "1.0.0", vec![PluginDependency::optional("core-ui")]),
            descriptor("core-ui", "1.0.0", vec![]),
        ];

        let resolver = DependencyResolver::new();
        let dependents = resolver.get_dependent_plugins("core-ui", &plugins);
        // Only the non-optional dependent is reported
        assert_eq!(dependents, vec!["app"]);
    }

    #[test]
    fn test_dependency_graph_with_placeholders() {
        let plugins = vec![
            descriptor("app", "1.0.0", vec![
                PluginDependency::required("core-ui").with_min_version("1.0.0"),
                PluginDependency::optional("ghost"),
            ]),
            descriptor("core-ui", "2.0.0", vec![]),
        ];

        let graph = DependencyResolver::new().get_dependency_graph(&plugins);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);

        let placeholder = graph.nodes.iter().find(|n| n.id == "ghost").unwrap();
        assert_eq!(placeholder.version, "?");
        assert!(!placeholder.is_installed);

        let constrained = graph.edges.iter().find(|e| e.to == "core-ui").unwrap();
        assert_eq!(constrained.version_requirement.as_deref(), Some(">= 1.0.0"));
        let optional = graph.edges.iter().find(|e| e.to == "ghost").unwrap();
        assert!(optional.is_optional);
        assert!(optional.version_requirement.is_none());
    }
}
