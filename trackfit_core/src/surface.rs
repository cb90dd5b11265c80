//! Surfaces - the closed set of shapes measurements and boundaries live on.
//!
//! A [`Surface`] is a shape ([`SurfaceKind`]) placed in the global frame by an
//! `Isometry3`. Its local z axis is the plane/disc normal, the cylinder axis
//! or the perigee line. Surfaces may point back to the layer that owns them
//! through a [`LayerId`] handle; this is a lookup relation only, the arena in
//! [`crate::geometry`] owns everything.

use crate::geometry::LayerId;
use crate::identifier::GeometryId;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use trackfit_env::NavigationDirection;

/// Distance (mm) below which a point counts as lying on a surface.
pub const ON_SURFACE_TOLERANCE: f64 = 1e-4;

const PARALLEL_EPSILON: f64 = 1e-12;

/// Type tag of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceType {
    Cylinder,
    Disc,
    Perigee,
    Plane,
}

/// Shape and bounds of a surface, in its local frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SurfaceKind {
    /// Rectangle in the local xy plane (use `f64::INFINITY` for unbounded)
    Plane { half_x: f64, half_y: f64 },

    /// Ring in the local xy plane
    Disc { r_min: f64, r_max: f64 },

    /// Cylinder around the local z axis
    Cylinder { radius: f64, half_z: f64 },

    /// Line along the local z axis, used as reference for track parameters
    Perigee,
}

/// Result of a straight-line intersection estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    /// Global position of the intersection
    pub position: Vector3<f64>,

    /// Path length along the (navigation-signed) direction
    pub path_length: f64,

    /// Whether the intersection is reachable (and inside bounds if requested)
    pub valid: bool,
}

impl Intersection {
    fn invalid() -> Self {
        Self {
            position: Vector3::zeros(),
            path_length: f64::INFINITY,
            valid: false,
        }
    }
}

/// A placed surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Surface {
    kind: SurfaceKind,
    transform: Isometry3<f64>,
    geometry_id: GeometryId,
    associated_layer: Option<LayerId>,
}

impl Surface {
    fn from_kind(kind: SurfaceKind, transform: Isometry3<f64>) -> Self {
        Self {
            kind,
            transform,
            geometry_id: GeometryId::default(),
            associated_layer: None,
        }
    }

    pub fn plane(transform: Isometry3<f64>, half_x: f64, half_y: f64) -> Self {
        Self::from_kind(SurfaceKind::Plane { half_x, half_y }, transform)
    }

    pub fn disc(transform: Isometry3<f64>, r_min: f64, r_max: f64) -> Self {
        Self::from_kind(SurfaceKind::Disc { r_min, r_max }, transform)
    }

    pub fn cylinder(transform: Isometry3<f64>, radius: f64, half_z: f64) -> Self {
        Self::from_kind(SurfaceKind::Cylinder { radius, half_z }, transform)
    }

    /// Perigee line through `point`, parallel to the global z axis.
    pub fn perigee(point: Vector3<f64>) -> Self {
        let transform = Isometry3::from_parts(Translation3::from(point), UnitQuaternion::identity());
        Self::from_kind(SurfaceKind::Perigee, transform)
    }

    /// Perigee line along the local z axis of `transform`.
    pub fn perigee_from_transform(transform: Isometry3<f64>) -> Self {
        Self::from_kind(SurfaceKind::Perigee, transform)
    }

    /// Plane through `center` whose normal is `normal`.
    pub fn plane_with_normal(center: Vector3<f64>, normal: Vector3<f64>, half_x: f64, half_y: f64) -> Self {
        Self::plane(frame_with_normal(center, normal), half_x, half_y)
    }

    pub(crate) fn set_geometry_id(&mut self, geometry_id: GeometryId) {
        self.geometry_id = geometry_id;
    }

    pub(crate) fn set_associated_layer(&mut self, layer: Option<LayerId>) {
        self.associated_layer = layer;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn surface_type(&self) -> SurfaceType {
        match self.kind {
            SurfaceKind::Plane { .. } => SurfaceType::Plane,
            SurfaceKind::Disc { .. } => SurfaceType::Disc,
            SurfaceKind::Cylinder { .. } => SurfaceType::Cylinder,
            SurfaceKind::Perigee => SurfaceType::Perigee,
        }
    }

    pub fn kind(&self) -> &SurfaceKind {
        &self.kind
    }

    pub fn transform(&self) -> &Isometry3<f64> {
        &self.transform
    }

    pub fn geometry_id(&self) -> GeometryId {
        self.geometry_id
    }

    /// The layer this surface belongs to, if known.
    pub fn associated_layer(&self) -> Option<LayerId> {
        self.associated_layer
    }

    #[inline]
    pub fn center(&self) -> Vector3<f64> {
        self.transform.translation.vector
    }

    /// Local z axis in the global frame.
    #[inline]
    pub fn axis(&self) -> Vector3<f64> {
        self.transform.rotation * Vector3::z()
    }

    fn to_local_frame(&self, global: &Vector3<f64>) -> Vector3<f64> {
        self.transform.inverse_transform_point(&Point3::from(*global)).coords
    }

    fn to_global_frame(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.transform.transform_point(&Point3::from(*local)).coords
    }

    // ========================================================================
    // COORDINATE TRANSFORMS
    // ========================================================================

    /// Surface normal at `position` (radial for cylinders and lines).
    pub fn normal(&self, position: &Vector3<f64>) -> Vector3<f64> {
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::Disc { .. } => self.axis(),
            SurfaceKind::Cylinder { .. } | SurfaceKind::Perigee => {
                let local = self.to_local_frame(position);
                let radial = Vector3::new(local.x, local.y, 0.0);
                let radial = radial.try_normalize(PARALLEL_EPSILON).unwrap_or_else(Vector3::x);
                self.transform.rotation * radial
            }
        }
    }

    /// Global position to local 2D coordinates.
    ///
    /// - Plane: (x, y)
    /// - Disc: (r, phi)
    /// - Cylinder: (R * phi, z)
    /// - Perigee: (signed distance of closest approach, z); the sign comes
    ///   from `direction`
    pub fn global_to_local(&self, position: &Vector3<f64>, direction: &Vector3<f64>) -> Vector2<f64> {
        let local = self.to_local_frame(position);
        match self.kind {
            SurfaceKind::Plane { .. } => Vector2::new(local.x, local.y),
            SurfaceKind::Disc { .. } => Vector2::new(local.x.hypot(local.y), local.y.atan2(local.x)),
            SurfaceKind::Cylinder { radius, .. } => {
                Vector2::new(radius * local.y.atan2(local.x), local.z)
            }
            SurfaceKind::Perigee => {
                let dir = self.transform.rotation.inverse() * direction;
                // (z x dir) . radial
                let side = -dir.y * local.x + dir.x * local.y;
                let sign = if side < 0.0 { -1.0 } else { 1.0 };
                Vector2::new(sign * local.x.hypot(local.y), local.z)
            }
        }
    }

    /// Local 2D coordinates back to a global position.
    pub fn local_to_global(&self, local: &Vector2<f64>, direction: &Vector3<f64>) -> Vector3<f64> {
        let local3 = match self.kind {
            SurfaceKind::Plane { .. } => Vector3::new(local.x, local.y, 0.0),
            SurfaceKind::Disc { .. } => {
                Vector3::new(local.x * local.y.cos(), local.x * local.y.sin(), 0.0)
            }
            SurfaceKind::Cylinder { radius, .. } => {
                let phi = local.x / radius;
                Vector3::new(radius * phi.cos(), radius * phi.sin(), local.y)
            }
            SurfaceKind::Perigee => {
                let dir = self.transform.rotation.inverse() * direction;
                let side = Vector3::new(-dir.y, dir.x, 0.0)
                    .try_normalize(PARALLEL_EPSILON)
                    .unwrap_or_else(Vector3::x);
                side * local.x + Vector3::new(0.0, 0.0, local.y)
            }
        };
        self.to_global_frame(&local3)
    }

    /// Whether local coordinates lie inside the surface bounds.
    pub fn inside_bounds(&self, local: &Vector2<f64>, tolerance: f64) -> bool {
        match self.kind {
            SurfaceKind::Plane { half_x, half_y } => {
                local.x.abs() <= half_x + tolerance && local.y.abs() <= half_y + tolerance
            }
            SurfaceKind::Disc { r_min, r_max } => {
                local.x >= r_min - tolerance && local.x <= r_max + tolerance
            }
            SurfaceKind::Cylinder { half_z, .. } => local.y.abs() <= half_z + tolerance,
            SurfaceKind::Perigee => true,
        }
    }

    /// Signed distance of `position` from the surface along its normal.
    ///
    /// Always non-negative for the perigee line.
    pub fn distance(&self, position: &Vector3<f64>) -> f64 {
        let local = self.to_local_frame(position);
        match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::Disc { .. } => local.z,
            SurfaceKind::Cylinder { radius, .. } => local.x.hypot(local.y) - radius,
            SurfaceKind::Perigee => local.x.hypot(local.y),
        }
    }

    /// Whether `position` lies on the surface (within `tolerance`, bounds included).
    pub fn is_on_surface(&self, position: &Vector3<f64>, tolerance: f64) -> bool {
        if self.surface_type() != SurfaceType::Perigee && self.distance(position).abs() > tolerance {
            return false;
        }
        let local = self.global_to_local(position, &self.axis());
        self.inside_bounds(&local, tolerance)
    }

    // ========================================================================
    // INTERSECTION
    // ========================================================================

    /// Straight-line intersection estimate from `position` along `direction`.
    ///
    /// The direction is flipped for backward navigation. The intersection is
    /// valid when it lies ahead (path length not below `-ON_SURFACE_TOLERANCE`)
    /// and, if `bounds_check` is set, inside the surface bounds. For the
    /// perigee line the point of closest approach is returned.
    pub fn intersection_estimate(
        &self,
        position: &Vector3<f64>,
        direction: &Vector3<f64>,
        nav_dir: NavigationDirection,
        bounds_check: bool,
    ) -> Intersection {
        let dir = direction * nav_dir.sign();
        let p = self.to_local_frame(position);
        let d = self.transform.rotation.inverse() * dir;

        let path = match self.kind {
            SurfaceKind::Plane { .. } | SurfaceKind::Disc { .. } => {
                if d.z.abs() < PARALLEL_EPSILON {
                    return Intersection::invalid();
                }
                -p.z / d.z
            }
            SurfaceKind::Cylinder { radius, .. } => {
                let a = d.x * d.x + d.y * d.y;
                if a < PARALLEL_EPSILON {
                    return Intersection::invalid();
                }
                let b = 2.0 * (p.x * d.x + p.y * d.y);
                let c = p.x * p.x + p.y * p.y - radius * radius;
                let discriminant = b * b - 4.0 * a * c;
                if discriminant < 0.0 {
                    return Intersection::invalid();
                }
                let root = discriminant.sqrt();
                let near = (-b - root) / (2.0 * a);
                let far = (-b + root) / (2.0 * a);
                if near >= -ON_SURFACE_TOLERANCE {
                    near
                } else {
                    far
                }
            }
            SurfaceKind::Perigee => {
                let along = d.z;
                let denom = 1.0 - along * along;
                if denom < PARALLEL_EPSILON {
                    return Intersection::invalid();
                }
                (along * p.z - d.dot(&p)) / denom
            }
        };

        let intersection_position = position + dir * path;
        let mut valid = path >= -ON_SURFACE_TOLERANCE;
        if valid && bounds_check {
            let local = self.global_to_local(&intersection_position, direction);
            valid = self.inside_bounds(&local, ON_SURFACE_TOLERANCE);
        }

        Intersection {
            position: intersection_position,
            path_length: path,
            valid,
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.center();
        let name = match self.kind {
            SurfaceKind::Plane { .. } => "PlaneSurface",
            SurfaceKind::Disc { .. } => "DiscSurface",
            SurfaceKind::Cylinder { .. } => "CylinderSurface",
            SurfaceKind::Perigee => "PerigeeSurface",
        };
        writeln!(f, "{}:", name)?;
        write!(
            f,
            "     Center position  (x, y, z) = ({:.7}, {:.7}, {:.7})",
            c.x, c.y, c.z
        )?;
        match self.kind {
            SurfaceKind::Plane { half_x, half_y } => {
                write!(f, "\n     Bounds (half_x, half_y) = ({:.7}, {:.7})", half_x, half_y)
            }
            SurfaceKind::Disc { r_min, r_max } => {
                write!(f, "\n     Bounds (r_min, r_max) = ({:.7}, {:.7})", r_min, r_max)
            }
            SurfaceKind::Cylinder { radius, half_z } => {
                write!(f, "\n     Bounds (radius, half_z) = ({:.7}, {:.7})", radius, half_z)
            }
            SurfaceKind::Perigee => Ok(()),
        }
    }
}

/// Placement at `center` whose local z axis points along `normal`.
pub fn frame_with_normal(center: Vector3<f64>, normal: Vector3<f64>) -> Isometry3<f64> {
    let rotation = UnitQuaternion::rotation_between(&Vector3::z(), &normal).unwrap_or_else(|| {
        // Anti-parallel to z
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    });
    Isometry3::from_parts(Translation3::from(center), rotation)
}

// ============================================================================
// TESTS
// ============================================================================
