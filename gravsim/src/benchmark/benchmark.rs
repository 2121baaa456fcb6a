use std::time::Instant;

use crate::simulation::forces::{BarnesHutGravity, DirectGravity, GravitySolver};
use crate::simulation::params::{CollisionMode, SimConfig, SolverKind};
use crate::simulation::rng::DeterministicRng;
use crate::simulation::states::{BodyKind, BodySpec, NVec3};
use crate::simulation::world::SimulationWorld;

/// Unit-scale settings shared by the benchmarks
fn bench_config(solver: SolverKind) -> SimConfig {
    SimConfig {
        dt: 1.0e-3,
        gravitational_constant: 0.1,
        softening: 1.0e-2,
        theta: 0.7,
        solver,
        collision_mode: CollisionMode::None,
        max_bodies: 100_000,
        ..SimConfig::default()
    }
}

/// `n` unit masses uniformly inside a sphere of radius 5, at rest
fn make_specs(n: usize, seed: u64) -> Vec<BodySpec> {
    let mut rng = DeterministicRng::new(seed);
    (0..n)
        .map(|_| BodySpec::new(BodyKind::Asteroid, 1.0, 0.01, rng.point_in_sphere(5.0), NVec3::zeros()))
        .collect()
}

fn make_world(n: usize, solver: SolverKind) -> Option<SimulationWorld> {
    let mut world = SimulationWorld::new(bench_config(solver), 42).ok()?;
    for spec in make_specs(n, 42) {
        world.add_body(spec).ok()?;
    }
    world.take_events();
    Some(world)
}

/// Time one global acceleration evaluation with each solver
pub fn bench_gravity() {
    let ns = [200, 400, 800, 1600, 3200, 6400];

    for n in ns {
        let Some(world) = make_world(n, SolverKind::Direct) else {
            eprintln!("N = {n}: could not build benchmark world");
            continue;
        };
        let bodies = world.bodies();
        let config = world.config();
        let mut out = vec![NVec3::zeros(); n];

        let direct = DirectGravity::from_config(config);
        let bh = BarnesHutGravity::from_config(config);

        // warm up
        direct.accelerations(bodies, &mut out);
        bh.accelerations(bodies, &mut out);

        let t0 = Instant::now();
        direct.accelerations(bodies, &mut out);
        let dt_direct = t0.elapsed().as_secs_f64();

        let t1 = Instant::now();
        bh.accelerations(bodies, &mut out);
        let dt_bh = t1.elapsed().as_secs_f64();

        println!("N = {n:5}, direct = {dt_direct:8.6} s, BH = {dt_bh:8.6} s");
    }
}

/// Time full world ticks (both evaluations, encounters, collisions, diagnostics)
pub fn bench_step() {
    let ns = [200, 400, 800, 1600, 3200, 6400];
    let steps = 3;

    for n in ns {
        let mut per_step = [0.0; 2];
        for (slot, solver) in [SolverKind::Direct, SolverKind::BarnesHut].into_iter().enumerate() {
            let Some(mut world) = make_world(n, solver) else {
                eprintln!("N = {n}: could not build benchmark world");
                continue;
            };
            let dt = world.config().dt;

            // warm up
            if let Err(e) = world.step(dt) {
                eprintln!("N = {n}: {e}");
                continue;
            }

            let t0 = Instant::now();
            for _ in 0..steps {
                if let Err(e) = world.step(dt) {
                    eprintln!("N = {n}: {e}");
                    break;
                }
            }
            per_step[slot] = t0.elapsed().as_secs_f64() / steps as f64;
        }

        println!("N = {:5}, direct step = {:8.6} s,   BH step = {:8.6} s", n, per_step[0], per_step[1]);
    }
}

/// CSV of milliseconds per tick against N, for plotting
pub fn bench_step_curve() {
    println!("N,direct_ms,bh_ms");

    for n in (200..=6400).step_by(200) {
        // average small runs to smooth noise, keep large ones short
        let steps_direct = if n <= 800 { 5 } else { 1 };
        let steps_bh = if n <= 2000 { 3 } else { 1 };

        let mut ms = [f64::NAN; 2];
        for (slot, (solver, steps)) in [(SolverKind::Direct, steps_direct), (SolverKind::BarnesHut, steps_bh)]
            .into_iter()
            .enumerate()
        {
            let Some(mut world) = make_world(n, solver) else {
                continue;
            };
            let dt = world.config().dt;
            let t0 = Instant::now();
            for _ in 0..steps {
                if world.step(dt).is_err() {
                    break;
                }
            }
            ms[slot] = t0.elapsed().as_secs_f64() * 1000.0 / steps as f64;
        }

        println!("{},{:.6},{:.6}", n, ms[0], ms[1]);
    }
}
