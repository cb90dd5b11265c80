//! Volumes, volume bounds and boundary surfaces.
//!
//! A volume's bounds decompose into an ordered list of surfaces. Each one is
//! wrapped into a [`BoundarySurface`] that records which volume lies on the
//! inner side and which on the outer side, so navigation can decide where a
//! track goes when it crosses the boundary.

use crate::geometry::{LayerId, VolumeId};
use crate::identifier::GeometryId;
use crate::surface::{frame_with_normal, Surface, SurfaceType};
use nalgebra::{Isometry3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use trackfit_env::NavigationDirection;

/// Index of the inner cylinder in a cylinder volume decomposition.
const INNER_CYLINDER_INDEX: usize = 3;

// ============================================================================
// VOLUME BOUNDS
// ============================================================================

/// Shape of a volume in its local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VolumeBounds {
    /// Tube (`r_min` may be zero) around the local z axis
    Cylinder { r_min: f64, r_max: f64, half_z: f64 },

    /// Box centred on the local origin
    Cuboid { half_x: f64, half_y: f64, half_z: f64 },
}

impl VolumeBounds {
    /// Positive extents, and `0 <= r_min < r_max` for tubes.
    pub fn is_valid(&self) -> bool {
        match *self {
            VolumeBounds::Cylinder { r_min, r_max, half_z } => {
                r_min >= 0.0 && r_max > r_min && half_z > 0.0
            }
            VolumeBounds::Cuboid { half_x, half_y, half_z } => {
                half_x > 0.0 && half_y > 0.0 && half_z > 0.0
            }
        }
    }

    /// Whether a local position lies inside the bounds.
    pub fn inside(&self, local: &Vector3<f64>, tolerance: f64) -> bool {
        match *self {
            VolumeBounds::Cylinder { r_min, r_max, half_z } => {
                let r = local.x.hypot(local.y);
                r >= r_min - tolerance && r <= r_max + tolerance && local.z.abs() <= half_z + tolerance
            }
            VolumeBounds::Cuboid { half_x, half_y, half_z } => {
                local.x.abs() <= half_x + tolerance
                    && local.y.abs() <= half_y + tolerance
                    && local.z.abs() <= half_z + tolerance
            }
        }
    }

    /// Decompose the bounds into boundary surfaces placed by `transform`.
    ///
    /// Cylinder order: disc at -z, disc at +z, outer cylinder, inner cylinder
    /// (only if `r_min > 0`). Cuboid order: -z, +z, -x, +x, -y, +y.
    ///
    /// Plane and disc normals point out of the volume. Cylinder normals are
    /// radial, so the inner cylinder's normal points into the volume.
    pub fn decompose_to_surfaces(&self, transform: &Isometry3<f64>) -> Vec<Surface> {
        let place = |center: Vector3<f64>, normal: Vector3<f64>| -> Isometry3<f64> {
            transform * frame_with_normal(center, normal)
        };

        match *self {
            VolumeBounds::Cylinder { r_min, r_max, half_z } => {
                let mut surfaces = vec![
                    Surface::disc(place(Vector3::new(0.0, 0.0, -half_z), -Vector3::z()), r_min, r_max),
                    Surface::disc(place(Vector3::new(0.0, 0.0, half_z), Vector3::z()), r_min, r_max),
                    Surface::cylinder(*transform, r_max, half_z),
                ];
                if r_min > 0.0 {
                    surfaces.push(Surface::cylinder(*transform, r_min, half_z));
                }
                surfaces
            }
            VolumeBounds::Cuboid { half_x, half_y, half_z } => {
                let faces = [
                    (Vector3::new(0.0, 0.0, -half_z), -Vector3::z(), half_x, half_y),
                    (Vector3::new(0.0, 0.0, half_z), Vector3::z(), half_x, half_y),
                    (Vector3::new(-half_x, 0.0, 0.0), -Vector3::x(), half_z, half_y),
                    (Vector3::new(half_x, 0.0, 0.0), Vector3::x(), half_z, half_y),
                    (Vector3::new(0.0, -half_y, 0.0), -Vector3::y(), half_x, half_z),
                    (Vector3::new(0.0, half_y, 0.0), Vector3::y(), half_x, half_z),
                ];
                faces
                    .iter()
                    .map(|(center, normal, hx, hy)| Surface::plane(place(*center, *normal), *hx, *hy))
                    .collect()
            }
        }
    }
}

// ============================================================================
// BOUNDARY SURFACES
// ============================================================================

/// A surface bounding a volume, with the volumes on either side.
///
/// "Inner" is the side opposite to the surface normal, "outer" the side the
/// normal points to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundarySurface {
    pub surface: Surface,
    pub inner: Option<VolumeId>,
    pub outer: Option<VolumeId>,
}

impl BoundarySurface {
    /// Volume entered when crossing the boundary at `position`.
    pub fn attached_volume(
        &self,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        nav_dir: NavigationDirection,
    ) -> Option<VolumeId> {
        let along_normal = (direction * nav_dir.sign()).dot(&self.surface.normal(position));
        if along_normal > 0.0 {
            self.outer
        } else {
            self.inner
        }
    }
}

/// Wrap decomposed bounds surfaces as boundaries of `volume`.
///
/// Every surface gets `inner = volume`, except the inner cylinder of a tube
/// (index 3, only present when there are more than three surfaces): there
/// the volume sits outside the surface, so `outer = volume` and `inner` stays
/// empty for the next volume inwards to claim.
pub fn create_boundary_surfaces(volume: VolumeId, surfaces: Vec<Surface>) -> Vec<BoundarySurface> {
    let count = surfaces.len();
    surfaces
        .into_iter()
        .enumerate()
        .map(|(index, surface)| {
            let flip = surface.surface_type() == SurfaceType::Cylinder
                && index == INNER_CYLINDER_INDEX
                && count > INNER_CYLINDER_INDEX;
            let inner = if flip { None } else { Some(volume) };
            let outer = if inner.is_some() { None } else { Some(volume) };
            BoundarySurface { surface, inner, outer }
        })
        .collect()
}

// ============================================================================
// TRACKING VOLUME
// ============================================================================

/// A volume of the tracking geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingVolume {
    pub name: String,
    pub geometry_id: GeometryId,
    pub transform: Isometry3<f64>,
    pub bounds: VolumeBounds,
    pub boundaries: Vec<BoundarySurface>,
    pub layers: Vec<LayerId>,
    pub confined_volumes: Vec<VolumeId>,
    pub mother: Option<VolumeId>,
}

impl TrackingVolume {
    /// Create a volume and its boundary surfaces.
    pub fn new(
        id: VolumeId,
        name: impl Into<String>,
        transform: Isometry3<f64>,
        bounds: VolumeBounds,
    ) -> Self {
        let boundaries = create_boundary_surfaces(id, bounds.decompose_to_surfaces(&transform));
        Self {
            name: name.into(),
            geometry_id: GeometryId::default(),
            transform,
            bounds,
            boundaries,
            layers: Vec::new(),
            confined_volumes: Vec::new(),
            mother: None,
        }
    }

    /// Whether a global position lies inside the volume.
    pub fn inside(&self, position: &Vector3<f64>, tolerance: f64) -> bool {
        let local = self.transform.inverse_transform_point(&Point3::from(*position)).coords;
        self.bounds.inside(&local, tolerance)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const VOLUME: VolumeId = VolumeId(7);

    #[test]
    fn test_tube_inner_cylinder_flips_to_outer() {
        let bounds = VolumeBounds::Cylinder { r_min: 10.0, r_max: 50.0, half_z: 100.0 };
        let surfaces = bounds.decompose_to_surfaces(&Isometry3::identity());
        assert_eq!(surfaces.len(), 4);
        assert_eq!(surfaces[3].surface_type(), SurfaceType::Cylinder);

        let boundaries = create_boundary_surfaces(VOLUME, surfaces);
        for (index, boundary) in boundaries.iter().enumerate() {
            if index == 3 {
                assert_eq!(boundary.inner, None);
                assert_eq!(boundary.outer, Some(VOLUME));
            } else {
                assert_eq!(boundary.inner, Some(VOLUME));
                assert_eq!(boundary.outer, None);
            }
        }
    }

    #[test]
    fn test_solid_cylinder_has_no_flip() {
        let bounds = VolumeBounds::Cylinder { r_min: 0.0, r_max: 50.0, half_z: 100.0 };
        let boundaries = create_boundary_surfaces(VOLUME, bounds.decompose_to_surfaces(&Isometry3::identity()));
        assert_eq!(boundaries.len(), 3);
        assert!(boundaries
            .iter()
            .all(|b| b.inner == Some(VOLUME) && b.outer.is_none()));
    }

    #[test]
    fn test_non_cylinder_at_index_three_has_no_flip() {
        let bounds = VolumeBounds::Cuboid { half_x: 10.0, half_y: 20.0, half_z: 30.0 };
        let boundaries = create_boundary_surfaces(VOLUME, bounds.decompose_to_surfaces(&Isometry3::identity()));
        assert_eq!(boundaries.len(), 6);
        assert_eq!(boundaries[3].surface.surface_type(), SurfaceType::Plane);
        assert!(boundaries
            .iter()
            .all(|b| b.inner == Some(VOLUME) && b.outer.is_none()));
    }

    #[test]
    fn test_empty_decomposition() {
        assert!(create_boundary_surfaces(VOLUME, Vec::new()).is_empty());
    }

    #[test]
    fn test_cuboid_normals_point_outwards() {
        let bounds = VolumeBounds::Cuboid { half_x: 10.0, half_y: 20.0, half_z: 30.0 };
        for surface in bounds.decompose_to_surfaces(&Isometry3::identity()) {
            let center = surface.center();
            let normal = surface.normal(&center);
            assert_relative_eq!(normal.dot(&center.normalize()), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_attached_volume_follows_normal() {
        let bounds = VolumeBounds::Cylinder { r_min: 10.0, r_max: 50.0, half_z: 100.0 };
        let boundaries = create_boundary_surfaces(VOLUME, bounds.decompose_to_surfaces(&Isometry3::identity()));

        // Leaving through the outer cylinder
        let on_outer = Vector3::new(50.0, 0.0, 0.0);
        assert_eq!(
            boundaries[2].attached_volume(&on_outer, &Vector3::x(), NavigationDirection::Forward),
            None
        );
        assert_eq!(
            boundaries[2].attached_volume(&on_outer, &-Vector3::x(), NavigationDirection::Forward),
            Some(VOLUME)
        );

        // Entering through the inner cylinder while moving outwards
        let on_inner = Vector3::new(10.0, 0.0, 0.0);
        assert_eq!(
            boundaries[3].attached_volume(&on_inner, &Vector3::x(), NavigationDirection::Forward),
            Some(VOLUME)
        );
        assert_eq!(
            boundaries[3].attached_volume(&on_inner, &Vector3::x(), NavigationDirection::Backward),
            None
        );
    }

    #[test]
    fn test_volume_inside() {
        let volume = TrackingVolume::new(
            VOLUME,
            "tube",
            Isometry3::identity(),
            VolumeBounds::Cylinder { r_min: 10.0, r_max: 50.0, half_z: 100.0 },
        );
        assert!(volume.inside(&Vector3::new(20.0, 0.0, 0.0), 0.0));
        assert!(!volume.inside(&Vector3::new(5.0, 0.0, 0.0), 0.0));
        assert!(!volume.inside(&Vector3::new(20.0, 0.0, 150.0), 0.0));
        assert_eq!(volume.boundaries.len(), 4);
    }
}
