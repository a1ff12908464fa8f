use ordered_float::OrderedFloat;
use std::{
    collections::HashMap,
    sync::RwLock,
};

use petgraph::algo::astar;
use petgraph::prelude::*;

use crate::crs::{CoordinateReference, TransformResolver};
use crate::envelope::Envelope;
use crate::error::GridError;
use crate::transforms::Transform;

const DEFAULT_COST: f64 = 1.0;

/// A registered coordinate operation: the transform plus a routing cost,
/// typically reflecting its accuracy.
#[derive(Debug, Clone)]
pub struct Edge {
    transform: Transform,
    cost: OrderedFloat<f64>,
}

impl Edge {
    pub fn new_cost(transform: Transform, cost: f64) -> Self {
        Self {
            transform,
            cost: OrderedFloat(cost),
        }
    }

    pub fn new(transform: Transform) -> Self {
        Self::new_cost(transform, DEFAULT_COST)
    }
}

type PathCache = HashMap<(NodeIndex, NodeIndex), Option<Transform>>;

/// Registry of coordinate operations between reference systems, routed by
/// lowest total cost. Multi-edge paths are concatenated into a single
/// transform and cached, negative results included.
#[derive(Debug, Default)]
pub struct TransformGraph<C: std::hash::Hash + Eq + Clone> {
    graph: StableDiGraph<C, Edge>,
    coord_systems: HashMap<C, NodeInfo>,
    path_cache: RwLock<PathCache>,
}

#[derive(Debug, Copy, Clone)]
struct NodeInfo {
    idx: NodeIndex,
    ndim: usize,
}

impl<C: std::hash::Hash + Eq + Clone> TransformGraph<C> {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::default(),
            coord_systems: HashMap::new(),
            path_cache: RwLock::new(PathCache::new()),
        }
    }

    fn ensure_coord_system(&mut self, node: C, ndim: usize) -> Result<NodeIndex, GridError> {
        if let Some(n) = self.coord_systems.get(&node) {
            if n.ndim != ndim {
                return Err(GridError::DimensionMismatch {
                    context: "operation graph node",
                    expected: n.ndim,
                    actual: ndim,
                });
            }
            Ok(n.idx)
        } else {
            let idx = self.graph.add_node(node.clone());
            self.coord_systems.insert(node, NodeInfo { idx, ndim });
            Ok(idx)
        }
    }

    /// Register an operation from `src` to `tgt`. With `with_inverse`, the
    /// reverse edge is added too when the transform inverts; returns whether
    /// it was. Fails if a node's dimensionality disagrees with earlier edges.
    pub fn add_edge(
        &mut self,
        src: impl Into<C>,
        tgt: impl Into<C>,
        transform: Transform,
        weight: f64,
        with_inverse: bool,
    ) -> Result<bool, GridError> {
        self.clear_cache();

        let u = self.ensure_coord_system(src.into(), transform.source_dim())?;
        let v = self.ensure_coord_system(tgt.into(), transform.target_dim())?;

        let mut added_inverse = false;
        if with_inverse {
            if let Ok(inverse) = transform.inverse() {
                self.graph.add_edge(v, u, Edge::new_cost(inverse, weight));
                added_inverse = true;
            }
        }

        self.graph.add_edge(u, v, Edge::new_cost(transform, weight));
        Ok(added_inverse)
    }

    fn best_edge(&self, src: NodeIndex, tgt: NodeIndex) -> Option<&Edge> {
        self.graph
            .edges_connecting(src, tgt)
            .min_by_key(|e| e.weight().cost)
            .map(|e| e.weight())
    }

    fn cache_get(&self, src: &NodeIndex, tgt: &NodeIndex) -> Option<Option<Transform>> {
        let outer = self.path_cache.read().expect("should not be poisonned");
        outer.get(&(*src, *tgt)).cloned()
    }

    fn cache_insert(
        &self,
        src: NodeIndex,
        tgt: NodeIndex,
        t: Option<Transform>,
    ) -> Option<Option<Transform>> {
        self.path_cache
            .write()
            .expect("should not be poisonned")
            .insert((src, tgt), t)
    }

    fn clear_cache(&mut self) {
        self.path_cache
            .get_mut()
            .expect("should not be poisonned")
            .clear();
    }

    pub fn find_path(&self, from: impl AsRef<C>, to: impl AsRef<C>) -> Option<Transform> {
        let from_ref = from.as_ref();
        let to_ref = to.as_ref();

        let start = self.coord_systems.get(from_ref)?;

        if from_ref == to_ref {
            return Transform::identity(start.ndim).ok();
        }

        let u = start.idx;
        let v = self.coord_systems.get(to_ref)?.idx;

        if let Some(maybe) = self.cache_get(&u, &v) {
            return maybe;
        }

        let zero = OrderedFloat(0.0);
        let Some((_cost, path)) = astar(&self.graph, u, |n| n == v, |e| e.weight().cost, |_| zero)
        else {
            self.cache_insert(u, v, None);
            return None;
        };

        let t = match path.len() {
            0 | 1 => unreachable!(),
            2 => self
                .best_edge(path[0], path[1])
                .map(|e| e.transform.clone())
                .expect("already checked for path existence"),
            _ => {
                let mut combined: Option<Transform> = None;
                for ab in path.windows(2) {
                    let step = &self.best_edge(ab[0], ab[1])?.transform;
                    combined = Some(match combined {
                        None => step.clone(),
                        Some(head) => head
                            .concatenate(step)
                            .expect("already checked dimensionality"),
                    });
                }
                combined.expect("path has at least two nodes")
            }
        };

        self.cache_insert(u, v, Some(t.clone()));
        Some(t)
    }
}

impl TransformResolver for TransformGraph<CoordinateReference> {
    fn resolve(
        &self,
        source: &CoordinateReference,
        target: &CoordinateReference,
        _area_of_interest: Option<&Envelope>,
    ) -> Result<Transform, GridError> {
        self.find_path(source, target)
            .ok_or_else(|| GridError::NoOperationPath {
                from: source.name().to_string(),
                to: target.name().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;

    use super::*;
    use crate::tests::init_logger;

    fn reference(name: &str, ndim: usize) -> CoordinateReference {
        let axes: Vec<_> = (0..ndim)
            .map(|d| crate::crs::CrsAxis::new(format!("axis {d}")))
            .collect();
        CoordinateReference::new(name, axes)
    }

    #[test]
    fn test_single_edge_path() {
        init_logger();
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 2);
        let b = reference("b", 2);
        g.add_edge(
            a.clone(),
            b.clone(),
            Transform::scale(&[2.0, 2.0]).unwrap(),
            1.0,
            true,
        )
        .unwrap();

        let fwd = g.find_path(&a, &b).unwrap();
        assert_ulps_eq!(
            fwd.transform(&[1.0, 2.0]).unwrap().as_slice(),
            [2.0, 4.0].as_slice()
        );
        // Inverse edge was registered automatically.
        let back = g.find_path(&b, &a).unwrap();
        assert_ulps_eq!(
            back.transform(&[2.0, 4.0]).unwrap().as_slice(),
            [1.0, 2.0].as_slice()
        );
    }

    #[test]
    fn test_multi_edge_path_concatenates() {
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 2);
        let b = reference("b", 2);
        let c = reference("c", 2);
        g.add_edge(
            a.clone(),
            b.clone(),
            Transform::scale(&[2.0, 2.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();
        g.add_edge(
            b,
            c.clone(),
            Transform::translation(&[1.0, 0.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();

        let t = g.find_path(&a, &c).unwrap();
        // Both steps are matrices, so the path collapses to one.
        assert_eq!(t.steps().len(), 1);
        assert_ulps_eq!(
            t.transform(&[1.0, 1.0]).unwrap().as_slice(),
            [3.0, 2.0].as_slice()
        );
    }

    #[test]
    fn test_cheapest_route_wins() {
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 1);
        let b = reference("b", 1);
        let c = reference("c", 1);
        // Direct but expensive.
        g.add_edge(
            a.clone(),
            b.clone(),
            Transform::scale(&[100.0]).unwrap(),
            10.0,
            false,
        )
        .unwrap();
        // Two cheap hops with a different result.
        g.add_edge(a.clone(), c.clone(), Transform::scale(&[2.0]).unwrap(), 1.0, false)
            .unwrap();
        g.add_edge(c, b.clone(), Transform::scale(&[3.0]).unwrap(), 1.0, false)
            .unwrap();

        let t = g.find_path(&a, &b).unwrap();
        assert_ulps_eq!(t.transform(&[1.0]).unwrap()[0], 6.0);
    }

    #[test]
    fn test_same_node_is_identity() {
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 3);
        let b = reference("b", 3);
        g.add_edge(
            a.clone(),
            b,
            Transform::translation(&[1.0, 2.0, 3.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();
        assert!(g.find_path(&a, &a).unwrap().is_identity());
    }

    #[test]
    fn test_unknown_node() {
        let g: TransformGraph<CoordinateReference> = TransformGraph::new();
        assert!(g.find_path(&reference("a", 2), &reference("b", 2)).is_none());
    }

    #[test]
    fn test_dimension_conflict_rejected() {
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 2);
        let b = reference("b", 2);
        g.add_edge(
            a.clone(),
            b.clone(),
            Transform::scale(&[2.0, 2.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();
        // `a` is 2D; a 3D edge from it must be rejected.
        let result = g.add_edge(a, b, Transform::scale(&[2.0, 2.0, 2.0]).unwrap(), 1.0, false);
        assert!(matches!(
            result,
            Err(GridError::DimensionMismatch {
                context: "operation graph node",
                ..
            })
        ));
    }

    #[test]
    fn test_resolver_reports_missing_path() {
        let mut g: TransformGraph<CoordinateReference> = TransformGraph::new();
        let a = reference("a", 2);
        let b = reference("b", 2);
        let c = reference("c", 2);
        g.add_edge(
            a.clone(),
            b.clone(),
            Transform::scale(&[2.0, 2.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();
        g.add_edge(
            c.clone(),
            b.clone(),
            Transform::scale(&[2.0, 2.0]).unwrap(),
            1.0,
            false,
        )
        .unwrap();

        assert!(g.resolve(&a, &b, None).is_ok());
        // b -> a was not registered and no inverse was requested.
        let missing = g.resolve(&b, &a, None).unwrap_err();
        assert_eq!(
            missing,
            GridError::NoOperationPath {
                from: "b".into(),
                to: "a".into(),
            }
        );
        assert_eq!(missing.to_string(), "no coordinate operation from b to a");
    }
}
