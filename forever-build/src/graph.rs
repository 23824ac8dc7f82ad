//! Dependency ordering between libraries.

use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::DescriptorSet;
use crate::error::ConfigError;

/// Topologically order the set so every library comes after its dependencies.
///
/// Kahn's algorithm; among libraries that are ready at the same time the
/// lexicographically smallest goes first, so the order is a pure function of
/// the set. Assumes [`DescriptorSet::validate`] already rejected unknown names.
pub fn build_order(set: &DescriptorSet) -> Result<Vec<String>, ConfigError> {
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependants: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for lib in set.iter() {
        in_degree.entry(&lib.name).or_insert(0);
        for dep in &lib.depends_on {
            dependants.entry(dep.as_str()).or_default().push(&lib.name);
            *in_degree.entry(&lib.name).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(set.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for next in dependants.get(name).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(next) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(*next);
                }
            }
        }
    }

    if order.len() != set.len() {
        let stuck: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(ConfigError::DependencyCycle {
            cycle: find_cycle(set, &stuck),
        });
    }
    Ok(order)
}

/// Walk dependency edges inside `stuck` until a library repeats.
///
/// Every node left with a non-zero in-degree has a dependency that is also
/// stuck, so the walk always closes.
fn find_cycle(set: &DescriptorSet, stuck: &BTreeSet<&str>) -> Vec<String> {
    let Some(start) = stuck.first() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = vec![*start];
    let mut current = *start;
    loop {
        let next = set
            .get(current)
            .and_then(|lib| lib.depends_on.iter().find(|d| stuck.contains(d.as_str())));
        let Some(next) = next else {
            return path.into_iter().map(String::from).collect();
        };
        if let Some(pos) = path.iter().position(|p| *p == next.as_str()) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.clone());
            return cycle;
        }
        path.push(next.as_str());
        current = next.as_str();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LibraryDescriptor, Source};

    fn lib(name: &str) -> LibraryDescriptor {
        LibraryDescriptor::new(name, "1.0", Source::Path { path: name.into() })
    }

    #[test]
    fn dependencies_come_first() {
        let set = DescriptorSet::new(vec![
            lib("net").depends_on("dns").depends_on("tls"),
            lib("tls").depends_on("codec"),
            lib("dns"),
            lib("codec"),
        ])
        .unwrap();
        let order = build_order(&set).unwrap();
        let pos = |n: &str| order.iter().position(|o| o == n).unwrap();
        assert!(pos("codec") < pos("tls"));
        assert!(pos("tls") < pos("net"));
        assert!(pos("dns") < pos("net"));
    }

    #[test]
    fn order_is_deterministic() {
        let set = DescriptorSet::new(vec![lib("b"), lib("c"), lib("a")]).unwrap();
        assert_eq!(build_order(&set).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let set = DescriptorSet::new(vec![
            lib("a").depends_on("b"),
            lib("b").depends_on("a"),
            lib("c"),
        ])
        .unwrap();
        let err = build_order(&set).unwrap_err();
        assert_eq!(
            err,
            ConfigError::DependencyCycle {
                cycle: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let set = DescriptorSet::new(vec![lib("a").depends_on("a")]).unwrap();
        assert!(matches!(
            build_order(&set),
            Err(ConfigError::DependencyCycle { .. })
        ));
    }
}
