//! Static k-d tree over (id, position) pairs for radius queries.
//!
//! The tree is built once from the reference data and never mutated. Splits
//! alternate between longitude and latitude. Stops that share one exact
//! coordinate (platforms of the same parent station are common) are grouped
//! into a single node instead of being pushed down into degenerate subtrees.

use geo::Point;

use crate::spatial::queries::{haversine_distance_miles, meridian_distance_miles};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Longitude,
    Latitude,
}

impl Axis {
    pub fn next(self) -> Self {
        match self {
            Axis::Longitude => Axis::Latitude,
            Axis::Latitude => Axis::Longitude,
        }
    }

    pub fn of(self, position: Point) -> f64 {
        match self {
            Axis::Longitude => position.x(),
            Axis::Latitude => position.y(),
        }
    }

    /// `position` with this axis' coordinate replaced by `value`.
    pub fn with(self, position: Point, value: f64) -> Point {
        match self {
            Axis::Longitude => Point::new(value, position.y()),
            Axis::Latitude => Point::new(position.x(), value),
        }
    }

    /// Lower bound on the distance in miles from `from` to anything on the
    /// other side of the split at `value`.
    ///
    /// A latitude split is a parallel, reached soonest straight along the
    /// meridian. A longitude split region is bounded by the split meridian
    /// and by the antimeridian, so the nearer of the two great circles counts.
    fn split_distance_miles(self, from: Point, value: f64) -> f64 {
        match self {
            Axis::Latitude => haversine_distance_miles(from, self.with(from, value)),
            Axis::Longitude => {
                meridian_distance_miles(from, value).min(meridian_distance_miles(from, 180.0))
            }
        }
    }
}

// Slack for rounding in the trigonometry of the bound.
const PRUNE_EPSILON_MILES: f64 = 1e-9;

#[derive(Clone, Debug)]
struct KdTreeNode<I> {
    ids: Vec<I>,
    position: Point,
    split_axis: Axis,
    low_child: Option<Box<KdTreeNode<I>>>,
    high_child: Option<Box<KdTreeNode<I>>>,
}

impl<I: Clone> KdTreeNode<I> {
    fn build(elements: Vec<(I, Point)>, split_axis: Axis) -> Option<Box<Self>> {
        let (first, last) = match (elements.first(), elements.last()) {
            (Some(first), Some(last)) => (first.1, last.1),
            _ => return None,
        };
        let middle = elements[elements.len() / 2].1;

        // Approximate the median the way quicksort does, without sorting.
        let mut candidates = [first, middle, last];
        candidates.sort_by(|a, b| split_axis.of(*a).total_cmp(&split_axis.of(*b)));
        let split_position = candidates[1];
        let split_value = split_axis.of(split_position);

        let mut ids = Vec::new();
        let mut low = Vec::new();
        let mut high = Vec::new();
        for (id, position) in elements {
            if position == split_position {
                ids.push(id);
            } else if split_axis.of(position) < split_value {
                low.push((id, position));
            } else {
                high.push((id, position));
            }
        }

        let next_axis = split_axis.next();
        Some(Box::new(KdTreeNode {
            ids,
            position: split_position,
            split_axis,
            low_child: Self::build(low, next_axis),
            high_child: Self::build(high, next_axis),
        }))
    }

    fn find_nodes_within<F>(
        &self,
        search_from: Point,
        radius_miles: f64,
        select: &F,
        results: &mut Vec<(I, f64)>,
    ) where
        F: Fn(&I, f64) -> bool,
    {
        let distance_here = haversine_distance_miles(search_from, self.position);
        if distance_here <= radius_miles {
            results.extend(
                self.ids
                    .iter()
                    .filter(|id| select(id, distance_here))
                    .map(|id| (id.clone(), distance_here)),
            );
        }

        let axis = self.split_axis;
        let split_value = axis.of(self.position);
        let (near_child, far_child) = if axis.of(search_from) <= split_value {
            (&self.low_child, &self.high_child)
        } else {
            (&self.high_child, &self.low_child)
        };

        if let Some(near) = near_child {
            near.find_nodes_within(search_from, radius_miles, select, results);
        }

        let bound = axis.split_distance_miles(search_from, split_value);
        if bound - PRUNE_EPSILON_MILES <= radius_miles {
            if let Some(far) = far_child {
                far.find_nodes_within(search_from, radius_miles, select, results);
            }
        }
    }
}

/// Nearest-neighbour index over a fixed set of positions.
#[derive(Clone, Debug)]
pub struct KdTree<I> {
    root: Option<Box<KdTreeNode<I>>>,
    len: usize,
}

impl<I: Clone> KdTree<I> {
    /// Build from `(id, position)` pairs; positions are (longitude, latitude).
    pub fn new(elements: Vec<(I, Point)>) -> Self {
        let len = elements.len();
        Self {
            root: KdTreeNode::build(elements, Axis::Longitude),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Every id within `radius_miles` of `search_from` accepted by `select`,
    /// paired with its distance in miles, closest first.
    ///
    /// Ids at the same distance keep their build order.
    pub fn find_nodes_within<F>(
        &self,
        search_from: Point,
        radius_miles: f64,
        select: F,
    ) -> Vec<(I, f64)>
    where
        F: Fn(&I, f64) -> bool,
    {
        let mut results = Vec::new();
        if let Some(root) = &self.root {
            root.find_nodes_within(search_from, radius_miles, &select, &mut results);
        }
        results.sort_by(|a, b| a.1.total_cmp(&b.1));
        results
    }
}

impl<I: Clone> FromIterator<(I, Point)> for KdTree<I> {
    fn from_iter<T: IntoIterator<Item = (I, Point)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
