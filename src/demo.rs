use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::TAU;

use crate::math::Vec3;

/// Synthetic point clouds standing in for a loaded splat file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DemoScene {
    /// Four overlapping sphere clusters.
    #[default]
    Sphere,
    /// A jittered (2, 3) torus knot in the XZ plane.
    TorusKnot,
    /// Uniform points in a 20-unit cube.
    Box,
}

// --- Point generators ---

fn random_sphere_point(rng: &mut impl Rng) -> Vec3 {
    let z = rng.random_range(-1.0_f32..1.0_f32);
    let theta = rng.random_range(0.0_f32..TAU);
    let r = (1.0 - z * z).sqrt();
    Vec3::new(r * theta.cos(), z, r * theta.sin())
}

fn jitter(rng: &mut impl Rng, amount: f32) -> Vec3 {
    Vec3::new(
        rng.random_range(-amount..amount),
        rng.random_range(-amount..amount),
        rng.random_range(-amount..amount),
    )
}

fn torus_knot_points(rng: &mut impl Rng, count: usize) -> Vec<Vec3> {
    let p = 2.0;
    let q = 3.0;
    let major = 1.4;
    let minor = 0.38;

    (0..count)
        .map(|i| {
            let t = i as f32 / count.max(1) as f32 * TAU * 2.0;
            let base = Vec3::new(
                (major + minor * (q * t).cos()) * (p * t).cos(),
                minor * (q * t).sin(),
                (major + minor * (q * t).cos()) * (p * t).sin(),
            );
            base + jitter(rng, 0.04)
        })
        .collect()
}

fn sphere_cluster_points(rng: &mut impl Rng, count: usize) -> Vec<Vec3> {
    let centers = [
        Vec3::new(1.8, 0.3, 0.4),
        Vec3::new(-1.6, -0.2, 0.8),
        Vec3::new(0.3, 1.2, -1.6),
        Vec3::new(-0.5, -1.0, -1.4),
    ];

    (0..count)
        .map(|i| {
            let center = centers[i % centers.len()];
            let dir = random_sphere_point(rng);
            let radius = rng.random::<f32>().cbrt() * rng.random_range(0.5_f32..1.4_f32);
            center + dir * radius + jitter(rng, 0.03)
        })
        .collect()
}

fn box_points(rng: &mut impl Rng, count: usize) -> Vec<Vec3> {
    (0..count).map(|_| jitter(rng, 10.0)).collect()
}

/// Same `(scene, count, seed)` always yields the same cloud.
pub fn generate_positions(scene: DemoScene, count: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    match scene {
        DemoScene::Sphere => sphere_cluster_points(&mut rng, count),
        DemoScene::TorusKnot => torus_knot_points(&mut rng, count),
        DemoScene::Box => box_points(&mut rng, count),
    }
}

/// Center of the axis-aligned bounds, used as the orbit target.
pub fn scene_center(positions: &[Vec3]) -> Vec3 {
    let Some(first) = positions.first() else {
        return Vec3::ZERO;
    };

    let (min, max) = positions.iter().fold((*first, *first), |(min, max), p| {
        (
            Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
            Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
        )
    });
    (min + max) * 0.5
}

/// Largest distance from `center`, used to place the orbit camera.
pub fn scene_radius(positions: &[Vec3], center: Vec3) -> f32 {
    positions
        .iter()
        .map(|p| (*p - center).length())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_seeded() {
        for scene in [DemoScene::Sphere, DemoScene::TorusKnot, DemoScene::Box] {
            let a = generate_positions(scene, 500, 42);
            let b = generate_positions(scene, 500, 42);
            assert_eq!(a.len(), 500);
            assert_eq!(a, b);
            assert_ne!(a, generate_positions(scene, 500, 43));
        }
    }

    #[test]
    fn box_points_stay_in_bounds() {
        let points = generate_positions(DemoScene::Box, 2_000, 1);
        assert!(points
            .iter()
            .all(|p| p.x.abs() <= 10.0 && p.y.abs() <= 10.0 && p.z.abs() <= 10.0));
    }

    #[test]
    fn center_and_radius_of_known_points() {
        let points = [Vec3::new(-1.0, 0.0, 2.0), Vec3::new(3.0, 4.0, 2.0)];
        let center = scene_center(&points);
        assert_eq!(center, Vec3::new(1.0, 2.0, 2.0));
        assert!((scene_radius(&points, center) - 8.0_f32.sqrt()).abs() < 1e-6);
        assert_eq!(scene_center(&[]), Vec3::ZERO);
    }
}
