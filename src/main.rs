use clap::Parser;
use std::time::{Duration, Instant};

use splatsort::demo::{self, DemoScene};
use splatsort::{
    camera_depth, AcceleratorContext, BackendPreference, HeadlessRaster, MapFlags,
    PointCloudSorter, SortDirection, SorterConfig, Vec3, ViewMatrix,
};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Parser)]
#[command(
    name = "splatsort",
    version,
    about = "Sort a splat point cloud by camera depth into a shared index buffer every frame"
)]
struct Cli {
    #[arg(long, value_name = "N", default_value_t = 100_000, help = "Number of splats")]
    count: usize,
    #[arg(long, default_value_t = 120, help = "Frames to sort along the orbit")]
    frames: u32,
    #[arg(long, default_value_t = 1, help = "Point cloud seed")]
    seed: u64,
    #[arg(long, value_enum, default_value_t = DemoScene::Sphere)]
    scene: DemoScene,
    #[arg(long, value_enum, default_value_t = BackendPreference::Auto)]
    backend: BackendPreference,
    #[arg(
        long,
        value_enum,
        default_value_t = SortDirection::Descending,
        help = "descending draws nearest first, ascending draws back-to-front"
    )]
    direction: SortDirection,
    #[arg(long, value_enum, default_value_t = MapFlags::WriteDiscard)]
    map_flags: MapFlags,
    #[arg(long, value_name = "N", help = "CPU device worker threads")]
    threads: Option<usize>,
    #[arg(long, help = "Read back each frame's draw order and check it")]
    verify: bool,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 0,
        help = "Rebuild the point cloud N times after the frame loop"
    )]
    reconfigure_cycles: u32,
    #[arg(
        long,
        value_name = "N",
        default_value_t = 0,
        help = "Create, sort once and dispose a sorter N times against one rasterizer"
    )]
    create_dispose_cycles: u32,
}

impl Cli {
    fn sorter_config(&self) -> SorterConfig {
        let config = SorterConfig::default()
            .with_backend(self.backend)
            .with_direction(self.direction)
            .with_map_flags(self.map_flags);
        match self.threads {
            Some(threads) => config.with_cpu_threads(threads),
            None => config,
        }
    }
}

fn orbit_view(center: Vec3, radius: f32, angle: f32) -> ViewMatrix {
    let eye = center + Vec3::new(angle.cos() * radius, radius * 0.25, angle.sin() * radius);
    ViewMatrix::look_at(eye, center, Vec3::new(0.0, 1.0, 0.0))
}

fn verify_order(
    sorter: &PointCloudSorter<HeadlessRaster>,
    positions: &[Vec3],
    view: &ViewMatrix,
) -> AppResult<()> {
    let buffer = sorter.index_buffer().ok_or("sorter has no index buffer")?;
    let order = sorter
        .raster()
        .read_indices(buffer)
        .ok_or("index buffer is no longer live")?;
    if order.len() != positions.len() {
        return Err(format!(
            "draw order has {} entries for {} splats",
            order.len(),
            positions.len()
        )
        .into());
    }

    let mut seen = vec![false; positions.len()];
    for &i in &order {
        let slot = seen
            .get_mut(i as usize)
            .ok_or_else(|| format!("index {i} out of range"))?;
        if *slot {
            return Err(format!("index {i} drawn twice").into());
        }
        *slot = true;
    }

    let descending = sorter.direction() == SortDirection::Descending;
    for pair in order.windows(2) {
        let a = camera_depth(positions[pair[0] as usize], view);
        let b = camera_depth(positions[pair[1] as usize], view);
        let in_order = if descending { a >= b } else { a <= b };
        if !in_order {
            let (first, second) = (pair[0], pair[1]);
            return Err(
                format!("splat {first} (depth {a}) drawn before {second} (depth {b})").into(),
            );
        }
    }
    Ok(())
}

fn main() -> AppResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let positions = demo::generate_positions(cli.scene, cli.count, cli.seed);
    let center = demo::scene_center(&positions);
    let radius = demo::scene_radius(&positions, center).max(1.0) * 2.5;

    // Initialization failures are fatal; nothing is sorted without a device.
    let config = cli.sorter_config();
    let context = AcceleratorContext::new(&config)?;
    let raster = HeadlessRaster::for_context(&context);
    let mut sorter = PointCloudSorter::with_context(context, config.clone(), raster, &positions)?;
    log::info!(
        "sorting {} splats ({:?} scene) on {}",
        sorter.len(),
        cli.scene,
        sorter.context().device_name()
    );

    let mut total = Duration::ZERO;
    let mut slowest = Duration::ZERO;
    for frame in 0..cli.frames {
        let angle = frame as f32 / cli.frames.max(1) as f32 * std::f32::consts::TAU;
        let view = orbit_view(center, radius, angle);

        let started = Instant::now();
        sorter.sort(&view)?;
        let elapsed = started.elapsed();
        total += elapsed;
        slowest = slowest.max(elapsed);

        if !sorter.is_valid() {
            return Err("index buffer lost by the rasterizer".into());
        }
        if cli.verify {
            verify_order(&sorter, &positions, &view)?;
        }
        log::debug!("frame {frame}: {elapsed:?}");
    }

    if cli.frames > 0 {
        log::info!(
            "{} frames: mean {:?}, worst {:?}{}",
            cli.frames,
            total / cli.frames,
            slowest,
            if cli.verify { ", every frame verified" } else { "" }
        );
    }

    if cli.reconfigure_cycles > 0 {
        let started = Instant::now();
        for cycle in 0..cli.reconfigure_cycles {
            let seed = cli.seed.wrapping_add(u64::from(cycle) + 1);
            let next = demo::generate_positions(cli.scene, cli.count, seed);
            sorter.reconfigure(&next)?;
        }
        sorter.reconfigure(&positions)?;
        log::info!(
            "{} reconfigure cycles in {:?}; {} registration(s) live",
            cli.reconfigure_cycles,
            started.elapsed(),
            sorter.context().live_registrations()
        );
    }

    sorter.dispose()?;

    if cli.create_dispose_cycles > 0 {
        run_create_dispose_cycles(&cli, &config, &positions, center, radius)?;
    }
    Ok(())
}

fn run_create_dispose_cycles(
    cli: &Cli,
    config: &SorterConfig,
    positions: &[Vec3],
    center: Vec3,
    radius: f32,
) -> AppResult<()> {
    let mut context = AcceleratorContext::new(config)?;
    let mut raster = HeadlessRaster::for_context(&context);
    let started = Instant::now();

    for cycle in 0..cli.create_dispose_cycles {
        let mut sorter =
            PointCloudSorter::with_context(&mut context, config.clone(), &mut raster, positions)?;
        let angle = cycle as f32 / cli.create_dispose_cycles as f32 * std::f32::consts::TAU;
        sorter.sort(&orbit_view(center, radius, angle))?;
        sorter.dispose()?;
        log::debug!(
            "cycle {cycle}: {} buffer(s), {} registration(s) live",
            raster.live_buffers(),
            context.live_registrations()
        );
    }

    log::info!(
        "{} create/dispose cycles in {:?}; {} buffer(s), {} registration(s) live",
        cli.create_dispose_cycles,
        started.elapsed(),
        raster.live_buffers(),
        context.live_registrations()
    );
    if raster.live_buffers() != 0 || context.live_registrations() != 0 {
        return Err("create/dispose cycles leaked device resources".into());
    }
    Ok(())
}
