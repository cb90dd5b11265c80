//! Straight-line navigator.
//!
//! Picks the nearest reachable surface ahead of the track among the
//! measurement surfaces the actors asked for (or every sensitive surface in
//! `stop_on_all` mode) and the boundaries of the current volume and of the
//! volumes confined in it.

use nalgebra::Vector3;
use trackfit_core::geometry::{SurfaceId, VolumeId};
use trackfit_core::surface::{Surface, ON_SURFACE_TOLERANCE};
use trackfit_core::{PropagatorState, Stepper};
use trackfit_env::{NavigationDirection, PropagationError};

/// Distance (mm) a probe point is pushed past a boundary to find the next volume.
const BOUNDARY_NUDGE: f64 = 1e-3;

/// What the next step will reach.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetKind {
    Surface(SurfaceId),
    Boundary { volume: VolumeId, index: usize },
}

/// Nearest target ahead of the track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationTarget {
    pub kind: TargetKind,
    pub path_length: f64,
}

/// Navigator configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Navigator {
    /// Stop on every sensitive surface instead of only the requested ones
    pub stop_on_all: bool,
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_on_all(mut self, stop_on_all: bool) -> Self {
        self.stop_on_all = stop_on_all;
        self
    }

    /// Locate the start volume.
    pub fn initialize<S: Stepper>(&self, state: &mut PropagatorState<'_, S>) -> Result<(), PropagationError> {
        let geometry = state.navigation.geometry;
        let world = state
            .navigation
            .world_volume
            .ok_or_else(|| PropagationError::navigation("no world volume"))?;
        let position = state.stepping.position();
        let volume = geometry
            .tracking_volume(world, &position)
            .ok_or_else(|| PropagationError::navigation(format!("start {:?} is outside the world", position)))?;

        state.navigation.current_volume = Some(volume);
        state.navigation.current_surface = None;
        Ok(())
    }

    /// Nearest surface or boundary ahead, if any.
    pub fn next_target<S: Stepper>(&self, state: &PropagatorState<'_, S>) -> Option<NavigationTarget> {
        let navigation = &state.navigation;
        let geometry = navigation.geometry;
        let position = state.stepping.position();
        let direction = state.stepping.direction();
        let nav_dir = state.options.direction;

        let surfaces: Vec<SurfaceId> = if self.stop_on_all {
            geometry.sensitive_surfaces().collect()
        } else {
            navigation
                .sequence
                .external_surfaces
                .iter()
                .map(|(_, surface)| surface)
                .collect()
        };

        let mut best = None;
        for id in surfaces {
            if navigation.current_surface == Some(id) {
                continue;
            }
            if let Some(surface) = geometry.surface(id) {
                keep_closer(&mut best, TargetKind::Surface(id), surface, &position, &direction, nav_dir);
            }
        }

        if let Some(current) = navigation.current_volume.and_then(|id| geometry.volume(id)) {
            let volumes = navigation.current_volume.into_iter().chain(current.confined_volumes.iter().copied());
            for volume_id in volumes {
                let Some(volume) = geometry.volume(volume_id) else {
                    continue;
                };
                for (index, boundary) in volume.boundaries.iter().enumerate() {
                    let kind = TargetKind::Boundary { volume: volume_id, index };
                    keep_closer(&mut best, kind, &boundary.surface, &position, &direction, nav_dir);
                }
            }
        }

        best
    }

    /// Commit a reached target. Returns false once the track has left the world.
    pub fn reach<S: Stepper>(&self, state: &mut PropagatorState<'_, S>, target: &NavigationTarget) -> bool {
        match target.kind {
            TargetKind::Surface(id) => {
                state.navigation.current_surface = Some(id);
                true
            }
            TargetKind::Boundary { volume, index } => {
                state.navigation.current_surface = None;
                let geometry = state.navigation.geometry;
                let Some(boundary) = geometry.volume(volume).and_then(|v| v.boundaries.get(index)) else {
                    return false;
                };

                let position = state.stepping.position();
                let direction = state.stepping.direction();
                let nav_dir = state.options.direction;
                let next = boundary.attached_volume(&position, &direction, nav_dir).or_else(|| {
                    let probe = position + direction * (nav_dir.sign() * BOUNDARY_NUDGE);
                    state
                        .navigation
                        .world_volume
                        .and_then(|world| geometry.tracking_volume(world, &probe))
                });

                state.navigation.current_volume = next;
                next.is_some()
            }
        }
    }
}

fn keep_closer(
    best: &mut Option<NavigationTarget>,
    kind: TargetKind,
    surface: &Surface,
    position: &Vector3<f64>,
    direction: &Vector3<f64>,
    nav_dir: NavigationDirection,
) {
    let hit = surface.intersection_estimate(position, direction, nav_dir, true);
    if !hit.valid || hit.path_length <= ON_SURFACE_TOLERANCE {
        return;
    }
    if best.map_or(true, |b| hit.path_length < b.path_length) {
        *best = Some(NavigationTarget {
            kind,
            path_length: hit.path_length,
        });
    }
}
