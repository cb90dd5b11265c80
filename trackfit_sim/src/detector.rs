//! Toy detectors.
//!
//! - [`telescope`]: planar layers along the x axis in a box
//! - [`barrel`]: concentric cylinder layers, each in its own tube volume
//!   nested in a cylindrical world

use nalgebra::{Isometry3, Vector3};
use trackfit_core::geometry::{GeometryBuilder, GeometryError, SurfaceId, TrackingGeometry};
use trackfit_core::surface::Surface;
use trackfit_core::volume::VolumeBounds;

/// Thickness (mm) of every layer envelope.
pub const LAYER_THICKNESS: f64 = 1.0;

/// Telescope with `layers` planes at `x = spacing * i` (i = 1..=layers).
pub fn telescope(layers: usize, spacing: f64, half_size: f64) -> Result<TrackingGeometry, GeometryError> {
    telescope_with_stray(layers, spacing, half_size).map(|(geometry, _)| geometry)
}

/// Telescope plus one detached plane half a spacing behind the last layer.
///
/// The stray plane sits on no layer and lies outside every layer envelope,
/// so a layer cannot be resolved for it.
pub fn telescope_with_stray(
    layers: usize,
    spacing: f64,
    half_size: f64,
) -> Result<(TrackingGeometry, SurfaceId), GeometryError> {
    let mut builder = GeometryBuilder::new();
    let world = builder.add_volume(
        "telescope",
        Isometry3::identity(),
        VolumeBounds::Cuboid {
            half_x: spacing * (layers + 1) as f64,
            half_y: 2.0 * half_size,
            half_z: 2.0 * half_size,
        },
        None,
    )?;

    for i in 1..=layers {
        let plane = plane_at(spacing * i as f64, half_size);
        let layer = builder.add_layer(world, plane.clone(), LAYER_THICKNESS)?;
        builder.add_sensitive_surface(layer, plane)?;
    }
    let stray = builder.add_detached_surface(plane_at(spacing * (layers as f64 + 0.5), half_size));

    Ok((builder.build(world)?, stray))
}

fn plane_at(x: f64, half_size: f64) -> Surface {
    Surface::plane_with_normal(Vector3::new(x, 0.0, 0.0), Vector3::x(), half_size, half_size)
}

/// Barrel with one cylinder layer per radius (ascending).
///
/// Each layer gets its own tube volume, bounded half way to the neighbouring
/// radii, so consecutive tubes share a cylinder boundary.
pub fn barrel(radii: &[f64], half_z: f64) -> Result<TrackingGeometry, GeometryError> {
    if radii.is_empty() || radii.windows(2).any(|pair| pair[1] <= pair[0]) || radii[0] <= 0.0 {
        return Err(GeometryError::InvalidBounds(format!(
            "barrel radii must be positive and ascending, got {radii:?}"
        )));
    }

    let mut edges = Vec::with_capacity(radii.len() + 1);
    edges.push(0.5 * radii[0]);
    for pair in radii.windows(2) {
        edges.push(0.5 * (pair[0] + pair[1]));
    }
    let last = radii[radii.len() - 1];
    let previous_edge = edges[edges.len() - 1];
    edges.push(last + (last - previous_edge));

    let mut builder = GeometryBuilder::new();
    let world = builder.add_volume(
        "barrel",
        Isometry3::identity(),
        VolumeBounds::Cylinder {
            r_min: 0.0,
            r_max: edges[edges.len() - 1] + 10.0,
            half_z: 1.2 * half_z,
        },
        None,
    )?;

    for (i, &radius) in radii.iter().enumerate() {
        let shell = builder.add_volume(
            &format!("shell_{i}"),
            Isometry3::identity(),
            VolumeBounds::Cylinder {
                r_min: edges[i],
                r_max: edges[i + 1],
                half_z,
            },
            Some(world),
        )?;
        let cylinder = Surface::cylinder(Isometry3::identity(), radius, half_z);
        let layer = builder.add_layer(shell, cylinder.clone(), LAYER_THICKNESS)?;
        builder.add_sensitive_surface(layer, cylinder)?;
    }

    builder.build(world)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telescope_layout() {
        let (geometry, stray) = telescope_with_stray(5, 100.0, 50.0).unwrap();
        assert_eq!(geometry.sensitive_surfaces().count(), 5);
        assert_eq!(geometry.layer_count(), 5);

        let stray = geometry.surface(stray).unwrap();
        assert!(stray.associated_layer().is_none());
        assert!(geometry
            .associated_layer(geometry.world_volume(), &stray.center())
            .is_none());
    }

    #[test]
    fn test_barrel_shells_share_boundaries() {
        let geometry = barrel(&[30.0, 60.0, 90.0], 500.0).unwrap();
        assert_eq!(geometry.volume_count(), 4);

        let world = geometry.world_volume();
        let shell = geometry.tracking_volume(world, &Vector3::new(0.0, 60.0, 0.0)).unwrap();
        assert_eq!(geometry.volume(shell).unwrap().name, "shell_1");

        // Inner tube boundary is claimed from outside, the outer one from inside
        let boundaries = &geometry.volume(shell).unwrap().boundaries;
        assert_eq!(boundaries.len(), 4);
        assert_eq!(boundaries[3].outer, Some(shell));
        assert_eq!(boundaries[2].inner, Some(shell));
    }

    #[test]
    fn test_barrel_rejects_unsorted_radii() {
        assert!(barrel(&[60.0, 30.0], 100.0).is_err());
        assert!(barrel(&[], 100.0).is_err());
    }
}
