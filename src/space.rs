//! Free-space tracking inside a container.
//!
//! The container's empty volume is kept as a set of disjoint axis-aligned
//! boxes. Placing an item consumes one space and replaces it with up to three
//! residual slabs; adjacent slabs are merged back to curb fragmentation.
//! Some free volume may end up untracked after many placements, which is an
//! accepted limitation of the heuristic.

use std::cmp::Ordering;

use crate::geometry::{BoundingBox, overlap_1d};
use crate::types::{EPSILON_GENERAL, EPSILON_HEIGHT, Vec3, compare_with_epsilon};

/// An empty axis-aligned region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Space {
    pub position: Vec3,
    pub dims: Vec3,
    /// The region reaches into the wall-buffered interior of the container,
    /// so a temperature-sensitive item can be positioned inside it.
    pub temperature_safe: bool,
}

impl Space {
    pub fn new(position: Vec3, dims: Vec3) -> Self {
        Self {
            position,
            dims,
            temperature_safe: false,
        }
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.dims.volume()
    }

    /// True iff every extent of the space is at least the candidate's.
    #[inline]
    pub fn can_fit(&self, dims: &Vec3) -> bool {
        dims.fits_within(&self.dims, EPSILON_GENERAL)
    }

    /// True iff a box at `position` with `dims` stays inside this space.
    pub fn can_fit_at(&self, position: &Vec3, dims: &Vec3) -> bool {
        let max = self.position + self.dims;
        let end = *position + *dims;
        position.x + EPSILON_GENERAL >= self.position.x
            && position.y + EPSILON_GENERAL >= self.position.y
            && position.z + EPSILON_GENERAL >= self.position.z
            && end.fits_within(&max, EPSILON_GENERAL)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_position_and_dims(self.position, self.dims)
    }

    /// Aspect preference in (0, 1]; 1 for a cube.
    pub fn aspect_ratio(&self) -> f64 {
        let max = self.dims.max_component();
        if max <= 0.0 {
            0.0
        } else {
            self.dims.min_component() / max
        }
    }

    /// Residual spaces after a box was placed at `pos` with `dims`.
    ///
    /// The consumed region runs from this space's minimum corner to the far
    /// corner of the placed box, so any offset gap in front of the box is
    /// given up rather than tracked twice.
    pub fn split_after_placement(&self, pos: Vec3, dims: Vec3) -> Vec<Space> {
        let far = pos + dims - self.position;
        let used = Vec3::new(
            far.x.clamp(0.0, self.dims.x),
            far.y.clamp(0.0, self.dims.y),
            far.z.clamp(0.0, self.dims.z),
        );
        let rest = self.dims - used;
        let origin = self.position;

        let mut residuals = Vec::with_capacity(3);

        // Slab above the consumed footprint.
        residuals.push(Space::new(
            Vec3::new(origin.x, origin.y, origin.z + used.z),
            Vec3::new(used.x, used.y, rest.z),
        ));

        if rest.x >= rest.y {
            residuals.push(Space::new(
                Vec3::new(origin.x + used.x, origin.y, origin.z),
                Vec3::new(rest.x, self.dims.y, self.dims.z),
            ));
            residuals.push(Space::new(
                Vec3::new(origin.x, origin.y + used.y, origin.z),
                Vec3::new(used.x, rest.y, self.dims.z),
            ));
        } else {
            residuals.push(Space::new(
                Vec3::new(origin.x, origin.y + used.y, origin.z),
                Vec3::new(self.dims.x, rest.y, self.dims.z),
            ));
            residuals.push(Space::new(
                Vec3::new(origin.x + used.x, origin.y, origin.z),
                Vec3::new(rest.x, used.y, self.dims.z),
            ));
        }

        residuals.retain(|s| s.dims.min_component() > EPSILON_GENERAL);
        residuals
    }

    /// Merged space if `self` and `other` share two full dimensions and
    /// abut along the third.
    pub fn merge_with(&self, other: &Space) -> Option<Space> {
        for axis in 0..3 {
            let shares_rest = (0..3).filter(|a| *a != axis).all(|a| {
                (self.position.axis(a) - other.position.axis(a)).abs() < EPSILON_HEIGHT
                    && (self.dims.axis(a) - other.dims.axis(a)).abs() < EPSILON_HEIGHT
            });
            if !shares_rest {
                continue;
            }

            let self_end = self.position.axis(axis) + self.dims.axis(axis);
            let other_end = other.position.axis(axis) + other.dims.axis(axis);
            let (first, second) = if (self_end - other.position.axis(axis)).abs() < EPSILON_HEIGHT {
                (self, other)
            } else if (other_end - self.position.axis(axis)).abs() < EPSILON_HEIGHT {
                (other, self)
            } else {
                continue;
            };

            let mut dims = first.dims.as_array();
            dims[axis] += second.dims.axis(axis);
            return Some(Space::new(first.position, Vec3::from_array(dims)));
        }
        None
    }

    /// Whether this region intersects the interior left after keeping
    /// `buffer` clear of all six container faces.
    pub fn reaches_buffered_interior(&self, container: &Vec3, buffer: f64) -> bool {
        (0..3).all(|axis| {
            let lo = buffer;
            let hi = container.axis(axis) - buffer;
            overlap_1d(
                self.position.axis(axis),
                self.position.axis(axis) + self.dims.axis(axis),
                lo,
                hi,
            ) > EPSILON_GENERAL
        })
    }
}

/// Ordering used after every merge: low, corner-hugging, large, cube-like
/// spaces first.
fn space_order(a: &Space, b: &Space) -> Ordering {
    compare_with_epsilon(a.position.z, b.position.z, EPSILON_HEIGHT)
        .then_with(|| {
            compare_with_epsilon(a.position.length(), b.position.length(), EPSILON_GENERAL)
        })
        .then_with(|| compare_with_epsilon(b.volume(), a.volume(), EPSILON_GENERAL))
        .then_with(|| compare_with_epsilon(b.aspect_ratio(), a.aspect_ratio(), EPSILON_GENERAL))
}

/// The free spaces of one container. Uniquely owned by that container.
#[derive(Clone, Debug)]
pub struct FreeSpaceSet {
    container: Vec3,
    temperature_buffer: Option<f64>,
    spaces: Vec<Space>,
}

impl FreeSpaceSet {
    /// Starts with the whole container as one space. With a temperature
    /// buffer, spaces are tagged by whether they reach the buffered interior.
    pub fn new(container: Vec3, temperature_buffer: Option<f64>) -> Self {
        let mut set = Self {
            container,
            temperature_buffer,
            spaces: Vec::new(),
        };
        let whole = set.tagged(Space::new(Vec3::zero(), container));
        set.spaces.push(whole);
        set
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    /// Indices of spaces whose floor lies at `height`, in search order.
    pub fn indices_at_height(&self, height: f64) -> Vec<usize> {
        self.spaces
            .iter()
            .enumerate()
            .filter(|(_, s)| (s.position.z - height).abs() < EPSILON_HEIGHT)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&Space> {
        self.spaces.get(index)
    }

    /// Removes the space at `index` and replaces it by its residuals.
    pub fn consume(&mut self, index: usize, pos: Vec3, dims: Vec3) {
        if index >= self.spaces.len() {
            return;
        }
        let consumed = self.spaces.remove(index);
        let residuals = consumed.split_after_placement(pos, dims);
        for residual in residuals {
            let tagged = self.tagged(residual);
            self.spaces.push(tagged);
        }
        self.merge_adjacent();
    }

    /// Repeatedly merges abutting spaces, then restores search order.
    pub fn merge_adjacent(&mut self) {
        'outer: loop {
            for i in 0..self.spaces.len() {
                for j in (i + 1)..self.spaces.len() {
                    if let Some(merged) = self.spaces[i].merge_with(&self.spaces[j]) {
                        let merged = self.tagged(merged);
                        self.spaces.swap_remove(j);
                        self.spaces[i] = merged;
                        continue 'outer;
                    }
                }
            }
            break;
        }
        self.spaces.sort_by(space_order);
    }

    fn tagged(&self, mut space: Space) -> Space {
        space.temperature_safe = self
            .temperature_buffer
            .is_some_and(|buffer| space.reaches_buffered_interior(&self.container, buffer));
        space
    }
}
