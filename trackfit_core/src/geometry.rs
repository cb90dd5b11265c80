//! The tracking geometry arena.
//!
//! Volumes, layers and surfaces live in flat vectors and refer to each other
//! through index handles ([`VolumeId`], [`LayerId`], [`SurfaceId`]). Back
//! references (surface -> layer, layer -> volume, volume -> mother) are plain
//! handles, so the geometry has no ownership cycles and can be shared
//! read-only between any number of concurrent fits.
//!
//! Geometry identifiers are assembled while building by accumulating the
//! field values of the parent node and the node's own index.

use crate::identifier::GeometryId;
use crate::surface::Surface;
use crate::volume::{TrackingVolume, VolumeBounds};
use nalgebra::{Isometry3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tolerance (mm) for volume containment checks.
pub const VOLUME_TOLERANCE: f64 = 1e-6;

// ============================================================================
// HANDLES
// ============================================================================

/// Handle of a surface in the geometry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub usize);

/// Handle of a layer in the geometry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub usize);

/// Handle of a volume in the geometry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VolumeId(pub usize);

// ============================================================================
// LAYER
// ============================================================================

/// A layer: a representing surface with a thickness, holding sensitive surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub geometry_id: GeometryId,

    /// Surface describing the layer shape (not itself a measurement surface)
    pub representation: SurfaceId,

    /// Full thickness (mm) of the layer envelope around the representation
    pub thickness: f64,

    /// Sensitive (measurement) surfaces on this layer
    pub sensitive_surfaces: Vec<SurfaceId>,

    /// Volume the layer is confined in
    pub volume: VolumeId,
}

// ============================================================================
// TRACKING GEOMETRY
// ============================================================================

/// Immutable tracking geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingGeometry {
    surfaces: Vec<Surface>,
    layers: Vec<Layer>,
    volumes: Vec<TrackingVolume>,
    world: VolumeId,
    by_geometry_id: BTreeMap<GeometryId, SurfaceId>,
}

impl TrackingGeometry {
    /// The outermost volume.
    pub fn world_volume(&self) -> VolumeId {
        self.world
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(id.0)
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0)
    }

    pub fn volume(&self, id: VolumeId) -> Option<&TrackingVolume> {
        self.volumes.get(id.0)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    /// Find a surface by its geometry identifier.
    pub fn find_surface(&self, geometry_id: GeometryId) -> Option<SurfaceId> {
        self.by_geometry_id.get(&geometry_id).copied()
    }

    /// All sensitive surfaces, in layer order.
    pub fn sensitive_surfaces(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.layers
            .iter()
            .flat_map(|layer| layer.sensitive_surfaces.iter().copied())
    }

    /// Deepest volume below `from` (inclusive) that contains `position`.
    ///
    /// Returns `None` when `position` is outside `from`.
    pub fn tracking_volume(&self, from: VolumeId, position: &Vector3<f64>) -> Option<VolumeId> {
        let volume = self.volume(from)?;
        if !volume.inside(position, VOLUME_TOLERANCE) {
            return None;
        }
        volume
            .confined_volumes
            .iter()
            .find_map(|&child| self.tracking_volume(child, position))
            .or(Some(from))
    }

    /// Layer of `volume` whose envelope contains `position`.
    pub fn associated_layer(&self, volume: VolumeId, position: &Vector3<f64>) -> Option<LayerId> {
        let volume = self.volume(volume)?;
        volume
            .layers
            .iter()
            .copied()
            .find(|&layer| self.is_on_layer(layer, position))
    }

    /// Whether `position` lies inside the thickness envelope of `layer`.
    pub fn is_on_layer(&self, layer: LayerId, position: &Vector3<f64>) -> bool {
        let Some(layer) = self.layer(layer) else {
            return false;
        };
        let Some(representation) = self.surface(layer.representation) else {
            return false;
        };
        let half_thickness = 0.5 * layer.thickness;
        if representation.distance(position).abs() > half_thickness {
            return false;
        }
        let local = representation.global_to_local(position, &representation.axis());
        representation.inside_bounds(&local, half_thickness)
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Incremental construction of a [`TrackingGeometry`].
///
/// ```
/// use nalgebra::{Isometry3, Vector3};
/// use trackfit_core::geometry::GeometryBuilder;
/// use trackfit_core::surface::Surface;
/// use trackfit_core::volume::VolumeBounds;
///
/// let mut builder = GeometryBuilder::new();
/// let world = builder.add_volume(
///     "world",
///     Isometry3::identity(),
///     VolumeBounds::Cuboid { half_x: 500.0, half_y: 100.0, half_z: 100.0 },
///     None,
/// ).unwrap();
/// let plane = Surface::plane_with_normal(Vector3::new(100.0, 0.0, 0.0), Vector3::x(), 50.0, 50.0);
/// let layer = builder.add_layer(world, plane.clone(), 1.0).unwrap();
/// builder.add_sensitive_surface(layer, plane).unwrap();
/// let geometry = builder.build(world).unwrap();
/// assert_eq!(geometry.sensitive_surfaces().count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct GeometryBuilder {
    surfaces: Vec<Surface>,
    layers: Vec<Layer>,
    volumes: Vec<TrackingVolume>,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a volume, optionally confined in `mother`.
    pub fn add_volume(
        &mut self,
        name: &str,
        transform: Isometry3<f64>,
        bounds: VolumeBounds,
        mother: Option<VolumeId>,
    ) -> Result<VolumeId, GeometryError> {
        if !bounds.is_valid() {
            return Err(GeometryError::InvalidBounds(format!("{bounds:?} for volume '{name}'")));
        }
        let id = VolumeId(self.volumes.len());
        let mut volume = TrackingVolume::new(id, name, transform, bounds);

        let mut geometry_id = GeometryId::default();
        geometry_id += GeometryId::encode(
            (id.0 + 1) as u64,
            GeometryId::VOLUME_MASK,
            GeometryId::VOLUME_SHIFT,
        );
        volume.geometry_id = geometry_id;
        for (index, boundary) in volume.boundaries.iter_mut().enumerate() {
            let mut boundary_id = geometry_id;
            boundary_id += GeometryId::encode(
                (index + 1) as u64,
                GeometryId::BOUNDARY_MASK,
                GeometryId::BOUNDARY_SHIFT,
            );
            boundary.surface.set_geometry_id(boundary_id);
        }

        if let Some(mother) = mother {
            let parent = self
                .volumes
                .get_mut(mother.0)
                .ok_or(GeometryError::VolumeNotFound(mother))?;
            parent.confined_volumes.push(id);
            volume.mother = Some(mother);
        }

        self.volumes.push(volume);
        Ok(id)
    }

    /// Add a layer to `volume`, described by `representation` and `thickness`.
    pub fn add_layer(
        &mut self,
        volume: VolumeId,
        mut representation: Surface,
        thickness: f64,
    ) -> Result<LayerId, GeometryError> {
        if thickness.is_nan() || thickness <= 0.0 {
            return Err(GeometryError::InvalidThickness(thickness));
        }
        let id = LayerId(self.layers.len());
        let owner = self
            .volumes
            .get_mut(volume.0)
            .ok_or(GeometryError::VolumeNotFound(volume))?;
        owner.layers.push(id);

        let mut geometry_id = owner.geometry_id;
        geometry_id += GeometryId::encode(
            owner.layers.len() as u64,
            GeometryId::LAYER_MASK,
            GeometryId::LAYER_SHIFT,
        );

        let mut approach_id = geometry_id;
        approach_id += GeometryId::encode(1, GeometryId::APPROACH_MASK, GeometryId::APPROACH_SHIFT);
        representation.set_geometry_id(approach_id);
        representation.set_associated_layer(Some(id));
        let representation = self.push_surface(representation);

        self.layers.push(Layer {
            geometry_id,
            representation,
            thickness,
            sensitive_surfaces: Vec::new(),
            volume,
        });
        Ok(id)
    }

    /// Add a measurement surface to `layer`; the surface learns its layer.
    pub fn add_sensitive_surface(
        &mut self,
        layer: LayerId,
        mut surface: Surface,
    ) -> Result<SurfaceId, GeometryError> {
        let owner = self
            .layers
            .get(layer.0)
            .ok_or(GeometryError::LayerNotFound(layer))?;
        let mut geometry_id = owner.geometry_id;
        geometry_id += GeometryId::encode(
            (owner.sensitive_surfaces.len() + 1) as u64,
            GeometryId::SENSITIVE_MASK,
            GeometryId::SENSITIVE_SHIFT,
        );
        surface.set_geometry_id(geometry_id);
        surface.set_associated_layer(Some(layer));

        let id = self.push_surface(surface);
        self.layers[layer.0].sensitive_surfaces.push(id);
        Ok(id)
    }

    /// Add a surface that belongs to no layer (e.g. a perigee or a surface
    /// whose layer must be resolved by position later).
    pub fn add_detached_surface(&mut self, surface: Surface) -> SurfaceId {
        self.push_surface(surface)
    }

    fn push_surface(&mut self, surface: Surface) -> SurfaceId {
        let id = SurfaceId(self.surfaces.len());
        self.surfaces.push(surface);
        id
    }

    /// Finish the geometry with `world` as the outermost volume.
    pub fn build(self, world: VolumeId) -> Result<TrackingGeometry, GeometryError> {
        let world_volume = self
            .volumes
            .get(world.0)
            .ok_or(GeometryError::VolumeNotFound(world))?;
        if world_volume.mother.is_some() {
            return Err(GeometryError::WorldHasMother(world));
        }
        if let Some(orphan) = self
            .volumes
            .iter()
            .enumerate()
            .find(|(index, volume)| *index != world.0 && volume.mother.is_none())
        {
            return Err(GeometryError::DetachedVolume(orphan.1.name.clone()));
        }

        let by_geometry_id = self
            .surfaces
            .iter()
            .enumerate()
            .filter(|(_, surface)| surface.geometry_id() != GeometryId::default())
            .map(|(index, surface)| (surface.geometry_id(), SurfaceId(index)))
            .collect();

        Ok(TrackingGeometry {
            surfaces: self.surfaces,
            layers: self.layers,
            volumes: self.volumes,
            world,
            by_geometry_id,
        })
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Errors that can occur while building or querying the geometry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("Volume not found: {0:?}")]
    VolumeNotFound(VolumeId),

    #[error("Layer not found: {0:?}")]
    LayerNotFound(LayerId),

    #[error("Layer thickness must be positive, got {0}")]
    InvalidThickness(f64),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("World volume {0:?} must not be confined in another volume")]
    WorldHasMother(VolumeId),

    #[error("Volume '{0}' is neither the world nor confined in another volume")]
    DetachedVolume(String),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// World tube with two nested shells, one cylinder layer in each.
    fn nested_barrel() -> (TrackingGeometry, Vec<SurfaceId>) {
        let mut builder = GeometryBuilder::new();
        let world = builder
            .add_volume(
                "world",
                Isometry3::identity(),
                VolumeBounds::Cylinder { r_min: 0.0, r_max: 200.0, half_z: 500.0 },
                None,
            )
            .unwrap();

        let mut sensitive = Vec::new();
        for (index, (r_min, r_max)) in [(20.0, 60.0), (60.0, 120.0)].into_iter().enumerate() {
            let shell = builder
                .add_volume(
                    &format!("shell_{index}"),
                    Isometry3::identity(),
                    VolumeBounds::Cylinder { r_min, r_max, half_z: 400.0 },
                    Some(world),
                )
                .unwrap();
            let radius = 0.5 * (r_min + r_max);
            let cylinder = Surface::cylinder(Isometry3::identity(), radius, 400.0);
            let layer = builder.add_layer(shell, cylinder.clone(), 2.0).unwrap();
            sensitive.push(builder.add_sensitive_surface(layer, cylinder).unwrap());
        }

        (builder.build(world).unwrap(), sensitive)
    }

    #[test]
    fn test_tracking_volume_descends() {
        let (geometry, _) = nested_barrel();
        let world = geometry.world_volume();

        let inner = geometry.tracking_volume(world, &Vector3::new(40.0, 0.0, 0.0)).unwrap();
        assert_eq!(geometry.volume(inner).unwrap().name, "shell_0");

        let outer = geometry.tracking_volume(world, &Vector3::new(0.0, 100.0, 0.0)).unwrap();
        assert_eq!(geometry.volume(outer).unwrap().name, "shell_1");

        // Inside the world but in no shell
        let gap = geometry.tracking_volume(world, &Vector3::new(150.0, 0.0, 0.0)).unwrap();
        assert_eq!(gap, world);

        assert!(geometry.tracking_volume(world, &Vector3::new(0.0, 0.0, 900.0)).is_none());
    }

    #[test]
    fn test_associated_layer_by_position() {
        let (geometry, sensitive) = nested_barrel();
        let world = geometry.world_volume();
        let point = Vector3::new(0.0, 40.5, 10.0);

        let volume = geometry.tracking_volume(world, &point).unwrap();
        let layer = geometry.associated_layer(volume, &point).unwrap();
        assert_eq!(geometry.surface(sensitive[0]).unwrap().associated_layer(), Some(layer));

        // Outside the 2 mm envelope
        let off = Vector3::new(0.0, 45.0, 10.0);
        assert!(geometry.associated_layer(volume, &off).is_none());
    }

    #[test]
    fn test_geometry_ids_accumulate() {
        let (geometry, sensitive) = nested_barrel();
        let id = geometry.surface(sensitive[1]).unwrap().geometry_id();
        assert_eq!(id.volume(), 3);
        assert_eq!(id.layer(), 1);
        assert_eq!(id.sensitive(), 1);
        assert_eq!(geometry.find_surface(id), Some(sensitive[1]));

        let shell = geometry.volume(VolumeId(1)).unwrap();
        assert_eq!(shell.boundaries[3].surface.geometry_id().boundary(), 4);
    }

    #[test]
    fn test_build_rejects_detached_volume() {
        let mut builder = GeometryBuilder::new();
        let bounds = VolumeBounds::Cuboid { half_x: 1.0, half_y: 1.0, half_z: 1.0 };
        let world = builder.add_volume("world", Isometry3::identity(), bounds.clone(), None).unwrap();
        builder.add_volume("stray", Isometry3::identity(), bounds, None).unwrap();

        let err = builder.build(world).unwrap_err();
        assert_eq!(err, GeometryError::DetachedVolume("stray".to_string()));
    }

    #[test]
    fn test_volume_bounds_validated() {
        let mut builder = GeometryBuilder::new();
        let err = builder
            .add_volume(
                "inverted",
                Isometry3::identity(),
                VolumeBounds::Cylinder { r_min: 50.0, r_max: 10.0, half_z: 1.0 },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GeometryError::InvalidBounds(_)));
    }

    #[test]
    fn test_layer_requires_positive_thickness() {
        let mut builder = GeometryBuilder::new();
        let world = builder
            .add_volume(
                "world",
                Isometry3::identity(),
                VolumeBounds::Cuboid { half_x: 1.0, half_y: 1.0, half_z: 1.0 },
                None,
            )
            .unwrap();
        let plane = Surface::plane(Isometry3::identity(), 1.0, 1.0);
        assert_eq!(
            builder.add_layer(world, plane, 0.0).unwrap_err(),
            GeometryError::InvalidThickness(0.0)
        );
    }
}
