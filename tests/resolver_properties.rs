//! Property tests for dependency resolution ordering

use exthost::plugin::{DependencyResolver, PluginDependency, PluginDescriptor};
use proptest::prelude::*;

fn plugin_id(index: usize) -> String {
    format!("plugin-{}", index)
}

/// A random dependency graph: node `i` lists candidate targets, and only
/// edges pointing at earlier nodes are kept, so the graph is acyclic by
/// construction.
fn dag_candidates() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(0usize..n, 0..3), n)
    })
}

proptest! {
    #[test]
    fn load_order_is_a_permutation_respecting_every_edge(candidates in dag_candidates()) {
        let mut plugins = Vec::new();
        let mut edges = Vec::new();

        for (i, targets) in candidates.iter().enumerate() {
            let mut descriptor = PluginDescriptor::new(plugin_id(i), "1.0.0".to_string());
            for &j in targets {
                if j < i && !edges.contains(&(i, j)) {
                    descriptor =
                        descriptor.with_dependency(PluginDependency::required(plugin_id(j)));
                    edges.push((i, j));
                }
            }
            plugins.push(descriptor);
        }

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        prop_assert!(result.success, "{:?}", result.error_message);
        prop_assert_eq!(result.load_order.len(), plugins.len());

        let pos = |index: usize| {
            let id = plugin_id(index);
            result.load_order.iter().position(|p| *p == id).unwrap()
        };
        for &(dependent, dependency) in &edges {
            prop_assert!(
                pos(dependency) < pos(dependent),
                "'{}' must load before '{}': {:?}",
                plugin_id(dependency),
                plugin_id(dependent),
                result.load_order
            );
        }
    }

    #[test]
    fn optional_edges_never_block_resolution(candidates in dag_candidates()) {
        // Optional edges may point anywhere, even back at later nodes or
        // at the declaring plugin itself.
        let plugins: Vec<PluginDescriptor> = candidates
            .iter()
            .enumerate()
            .map(|(i, targets)| {
                let mut descriptor = PluginDescriptor::new(plugin_id(i), "1.0.0".to_string());
                for &j in targets {
                    descriptor =
                        descriptor.with_dependency(PluginDependency::optional(plugin_id(j)));
                }
                descriptor
            })
            .collect();

        let result = DependencyResolver::new().resolve_dependencies(&plugins);
        prop_assert!(result.success, "{:?}", result.error_message);
        prop_assert_eq!(result.load_order.len(), plugins.len());
        prop_assert!(result.circular_dependencies.is_empty());
    }
}
