use super::*;
use crate::config::SortDirection;
use crate::demo::{generate_positions, DemoScene};
use crate::interop::{InteropIndexBuffer, MapFlags};
use crate::kernel::camera_depth;
use crate::raster::HeadlessRaster;

use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_cloud(count: usize, seed: u64) -> Vec<Vec3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            Vec3::new(
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
                rng.random_range(-10.0..10.0),
            )
        })
        .collect()
}

fn orbit_view(angle: f32) -> ViewMatrix {
    ViewMatrix::look_at(
        Vec3::new(angle.cos() * 25.0, 4.0, angle.sin() * 25.0),
        Vec3::ZERO,
        Vec3::new(0.0, 1.0, 0.0),
    )
}

fn cpu_sorter(positions: &[Vec3]) -> PointCloudSorter<HeadlessRaster> {
    PointCloudSorter::new(SorterConfig::cpu(), HeadlessRaster::new(), positions)
        .expect("CPU sorter should always build")
}

fn draw_order(sorter: &PointCloudSorter<HeadlessRaster>) -> Vec<u32> {
    let buffer = sorter.index_buffer().expect("sorter holds an index buffer");
    sorter
        .raster()
        .read_indices(buffer)
        .expect("index buffer is live")
}

fn assert_back_to_front(order: &[u32], positions: &[Vec3], view: &ViewMatrix) {
    let mut seen = vec![false; positions.len()];
    for &i in order {
        let i = i as usize;
        assert!(i < positions.len(), "index {i} out of range");
        assert!(!seen[i], "index {i} appears twice");
        seen[i] = true;
    }
    assert_eq!(order.len(), positions.len());

    for pair in order.windows(2) {
        let a = camera_depth(positions[pair[0] as usize], view);
        let b = camera_depth(positions[pair[1] as usize], view);
        assert!(a >= b, "depth {a} drawn before {b}");
        if a == b {
            assert!(pair[0] < pair[1]);
        }
    }
}

#[test]
fn sort_produces_depth_ordered_permutation() {
    let positions = random_cloud(50_000, 11);
    let mut sorter = cpu_sorter(&positions);

    for frame in 0..4 {
        let view = orbit_view(frame as f32 * 0.7);
        sorter.sort(&view).unwrap();
        assert_eq!(sorter.index_state(), Some(InteropState::AvailableForRaster));
        assert_back_to_front(&draw_order(&sorter), &positions, &view);
    }
    sorter.dispose().unwrap();
}

#[test]
fn repeated_sorts_are_deterministic() {
    let mut positions = random_cloud(5_000, 3);
    positions.extend(std::iter::repeat(Vec3::new(1.0, 1.0, 1.0)).take(500));
    let mut sorter = cpu_sorter(&positions);
    let view = orbit_view(1.3);

    sorter.sort(&view).unwrap();
    let first = draw_order(&sorter);
    sorter.sort(&orbit_view(2.9)).unwrap();
    sorter.sort(&view).unwrap();
    assert_eq!(draw_order(&sorter), first);
}

#[test]
fn identity_view_orders_largest_z_first() {
    let positions = [
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -2.0),
        Vec3::new(0.0, 0.0, -3.0),
        Vec3::new(0.0, 0.0, -4.0),
    ];
    let mut sorter = cpu_sorter(&positions);
    assert_eq!(sorter.direction(), SortDirection::Descending);

    sorter.sort(&ViewMatrix::IDENTITY).unwrap();
    assert_eq!(draw_order(&sorter), vec![0, 1, 2, 3]);
}

#[test]
fn look_at_default_is_nearest_first() {
    // Camera at z = 5 looking at the origin: splat 0 is 5 units away, splat 1 is 10.
    let view = ViewMatrix::look_at(
        Vec3::new(0.0, 0.0, 5.0),
        Vec3::ZERO,
        Vec3::new(0.0, 1.0, 0.0),
    );
    let positions = [Vec3::ZERO, Vec3::new(0.0, 0.0, -5.0)];

    let mut sorter = cpu_sorter(&positions);
    assert_eq!(sorter.direction(), SortDirection::Descending);
    sorter.sort(&view).unwrap();
    assert_eq!(draw_order(&sorter), vec![0, 1]);

    let config = SorterConfig::cpu().with_direction(SortDirection::Ascending);
    let mut sorter = PointCloudSorter::new(config, HeadlessRaster::new(), &positions).unwrap();
    sorter.sort(&view).unwrap();
    assert_eq!(draw_order(&sorter), vec![1, 0]);
}

#[test]
fn ascending_direction_reverses_order() {
    let positions = [
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(0.0, 0.0, -2.0),
        Vec3::new(0.0, 0.0, -3.0),
        Vec3::new(0.0, 0.0, -4.0),
    ];
    let config = SorterConfig::cpu().with_direction(SortDirection::Ascending);
    let mut sorter = PointCloudSorter::new(config, HeadlessRaster::new(), &positions).unwrap();

    sorter.sort(&ViewMatrix::IDENTITY).unwrap();
    assert_eq!(draw_order(&sorter), vec![3, 2, 1, 0]);
}

#[test]
fn reconfigure_resizes_every_buffer() {
    let small = random_cloud(100, 5);
    let large = generate_positions(DemoScene::Sphere, 20_000, 6);
    let mut sorter = cpu_sorter(&small);
    let view = orbit_view(0.4);

    sorter.sort(&view).unwrap();
    let old_buffer = sorter.index_buffer().unwrap();

    sorter.reconfigure(&large).unwrap();
    assert_eq!(sorter.len(), large.len());
    assert!(!sorter.raster().is_buffer(old_buffer));
    assert_eq!(sorter.raster().live_buffers(), 1);
    assert_eq!(sorter.context().live_registrations(), 1);

    sorter.sort(&view).unwrap();
    assert_back_to_front(&draw_order(&sorter), &large, &view);

    sorter.reconfigure(&small).unwrap();
    sorter.sort(&view).unwrap();
    assert_back_to_front(&draw_order(&sorter), &small, &view);
}

#[test]
fn create_dispose_cycles_do_not_leak() {
    let positions = random_cloud(1_000, 17);
    let config = SorterConfig::cpu()
        .with_cpu_threads(1)
        .with_max_registrations(1);
    // One registration slot: a leak from any cycle fails the next create.
    let mut context = AcceleratorContext::new(&config).unwrap();
    let mut raster = HeadlessRaster::for_context(&context);

    for i in 0..1_000 {
        let mut sorter =
            PointCloudSorter::with_context(&mut context, config.clone(), &mut raster, &positions)
                .unwrap();
        if i % 100 == 0 {
            sorter.sort(&orbit_view(i as f32)).unwrap();
        }
        assert_eq!(sorter.context().live_registrations(), 1);
        sorter.dispose().unwrap();
        assert_eq!(context.live_registrations(), 0);
        assert_eq!(raster.live_buffers(), 0);
    }
}

#[test]
fn dropped_borrowing_sorter_releases_its_registration() {
    let positions = random_cloud(32, 29);
    let mut context =
        AcceleratorContext::new(&SorterConfig::cpu().with_max_registrations(1)).unwrap();
    let mut raster = HeadlessRaster::for_context(&context);

    {
        let _sorter = PointCloudSorter::with_context(
            &mut context,
            SorterConfig::cpu(),
            &mut raster,
            &positions,
        )
        .unwrap();
    }
    assert_eq!(context.live_registrations(), 0);
    assert_eq!(raster.live_buffers(), 0);
}

#[test]
fn reconfigure_cycles_keep_one_registration() {
    let positions = random_cloud(1_000, 19);
    let config = SorterConfig::cpu().with_max_registrations(1);
    let mut sorter = PointCloudSorter::new(config, HeadlessRaster::new(), &positions).unwrap();

    for _ in 0..1_000 {
        sorter.reconfigure(&positions).unwrap();
        assert_eq!(sorter.context().live_registrations(), 1);
        assert_eq!(sorter.raster().live_buffers(), 1);
    }
    assert!(sorter.is_valid());
}

#[test]
fn interop_create_dispose_cycles_reuse_registrations() {
    let mut context =
        AcceleratorContext::new(&SorterConfig::cpu().with_max_registrations(1)).unwrap();
    let mut raster = HeadlessRaster::for_context(&context);

    for _ in 0..1_000 {
        let mut buffer =
            InteropIndexBuffer::create(&mut context, &mut raster, 1_000, MapFlags::WriteDiscard)
                .unwrap();
        buffer.map_for_compute(&mut context).unwrap();
        buffer.compute_view(&context).unwrap();
        buffer.dispose(&mut context, &mut raster).unwrap();
    }
    assert_eq!(context.live_registrations(), 0);
    assert_eq!(raster.live_buffers(), 0);
}

#[test]
fn dispose_invalidates_the_handle() {
    let positions = random_cloud(64, 23);
    let mut raster = HeadlessRaster::new();
    let sorter = PointCloudSorter::new(SorterConfig::cpu(), &mut raster, &positions).unwrap();
    assert!(sorter.is_valid());
    let handle = sorter.index_buffer().unwrap();

    sorter.dispose().unwrap();
    assert!(!raster.is_buffer(handle));
}

#[test]
fn drop_releases_resources() {
    let positions = random_cloud(64, 29);
    let mut raster = HeadlessRaster::new();
    {
        let mut sorter =
            PointCloudSorter::new(SorterConfig::cpu(), &mut raster, &positions).unwrap();
        sorter.sort(&orbit_view(0.0)).unwrap();
    }
    assert_eq!(raster.live_buffers(), 0);
}

#[test]
fn read_only_registration_fails_the_frame_and_unmaps() {
    let positions = random_cloud(32, 31);
    let config = SorterConfig::cpu().with_map_flags(MapFlags::ReadOnly);
    let mut sorter = PointCloudSorter::new(config, HeadlessRaster::new(), &positions).unwrap();

    assert!(matches!(
        sorter.sort(&orbit_view(0.0)),
        Err(SortError::ReadOnlyView)
    ));
    assert_eq!(sorter.index_state(), Some(InteropState::AvailableForRaster));
    assert!(sorter.is_valid());
}

#[test]
fn empty_cloud_sorts_trivially() {
    let mut sorter = cpu_sorter(&[]);
    assert!(sorter.is_empty());
    sorter.sort(&ViewMatrix::IDENTITY).unwrap();
    assert_eq!(draw_order(&sorter), Vec::<u32>::new());

    sorter.reconfigure(&[Vec3::ZERO]).unwrap();
    sorter.sort(&ViewMatrix::IDENTITY).unwrap();
    assert_eq!(draw_order(&sorter), vec![0]);
}

#[test]
fn registration_limit_is_fatal_at_construction() {
    let positions = random_cloud(8, 37);
    let config = SorterConfig::cpu().with_max_registrations(0);
    let mut raster = HeadlessRaster::new();

    let err = PointCloudSorter::new(config, &mut raster, &positions).unwrap_err();
    assert!(matches!(err, SortError::RegistrationFailed { .. }));
    assert!(err.is_fatal());
    assert_eq!(raster.live_buffers(), 0);
}
