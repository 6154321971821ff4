//! Location post-processing: prefix normalization, exact clones, ordering.

use crate::model::{Location, PathType, ROOT_LOCATION};

/// Prefix paths always end in `/`.
pub fn normalize_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Normalize prefix locations and add exact clones, then sort.
///
/// A prefix location `/a` becomes `/a/` plus an exact `/a`, so that both
/// `/a` and `/a/...` match but `/ab` does not. Locations that rewrite or use
/// regex are left untouched, and no clone is added when an exact location
/// with the same path already exists.
pub fn post_process(locations: &mut Vec<Location>) {
    let exact_paths: Vec<String> = locations
        .iter()
        .filter(|l| l.path_type == PathType::Exact)
        .map(|l| l.path.clone())
        .collect();

    let mut clones = Vec::new();
    for location in locations.iter_mut() {
        if location.path == ROOT_LOCATION
            || location.path_type != PathType::Prefix
            || location.path.ends_with('/')
            || location.rewrites()
            || location.use_regex
        {
            continue;
        }
        let original = location.path.clone();
        location.path = normalize_prefix(&original);
        if exact_paths.contains(&original) {
            continue;
        }
        let mut exact = location.clone();
        exact.path = original;
        exact.path_type = PathType::Exact;
        clones.push(exact);
    }
    locations.extend(clones);
    sort_locations(locations);
}

/// Longest path first, then reverse lexicographic, exact before prefix.
pub fn sort_locations(locations: &mut [Location]) {
    locations.sort_by(|a, b| {
        b.path
            .len()
            .cmp(&a.path.len())
            .then_with(|| b.path.cmp(&a.path))
            .then_with(|| a.path_type.cmp(&b.path_type))
    });
}
