//! Build fully-initialized simulation worlds from configuration
//!
//! Takes a `ScenarioConfig` (YAML-facing) and produces a `SimulationWorld`
//! holding:
//! - the effective physics settings (server overrides applied)
//! - the seeded random generator
//! - the bodies of the chosen preset, then the explicitly listed bodies
//!
//! Presets are in SI units. Procedural presets draw from a sub-stream of the
//! world generator (`derive`), so building one never shifts the main stream.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::configuration::config::{ConfigError, ScenarioConfig};
use crate::simulation::error::SimResult;
use crate::simulation::rng::DeterministicRng;
use crate::simulation::states::{BodyId, BodyKind, BodySpec, NVec3};
use crate::simulation::world::SimulationWorld;

pub const AU: f64 = 1.495_978_707e11;
pub const PARSEC: f64 = 3.085_677_581e16;
pub const M_SUN: f64 = 1.988_47e30;
pub const R_SUN: f64 = 6.957e8;
pub const M_EARTH: f64 = 5.972_2e24;
pub const R_EARTH: f64 = 6.371e6;
pub const M_MOON: f64 = 7.342e22;
pub const R_MOON: f64 = 1.737_4e6;
pub const EARTH_MOON: f64 = 3.844e8;

/// Built-in body sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Empty,
    TwoBody,
    SunEarthMoon,
    InnerSolarSystem,
    AsteroidBelt,
    StarCluster,
}

impl Preset {
    pub const ALL: [Preset; 6] = [
        Preset::Empty,
        Preset::TwoBody,
        Preset::SunEarthMoon,
        Preset::InnerSolarSystem,
        Preset::AsteroidBelt,
        Preset::StarCluster,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Empty => "empty",
            Preset::TwoBody => "two_body",
            Preset::SunEarthMoon => "sun_earth_moon",
            Preset::InnerSolarSystem => "inner_solar_system",
            Preset::AsteroidBelt => "asteroid_belt",
            Preset::StarCluster => "star_cluster",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// Add this preset's bodies to `world`, returning their ids in insertion order
    pub fn populate(self, world: &mut SimulationWorld) -> SimResult<Vec<BodyId>> {
        let g = world.config().gravitational_constant;
        let mut specs = Vec::new();

        match self {
            Preset::Empty => {}
            Preset::TwoBody => {
                specs.push(sun());
                specs.push(orbiter(BodyKind::Planet, "Earth", M_EARTH, R_EARTH, g, M_SUN, AU, 0.0, NVec3::zeros()));
            }
            Preset::SunEarthMoon => {
                specs.push(sun());
                let earth = orbiter(BodyKind::Planet, "Earth", M_EARTH, R_EARTH, g, M_SUN, AU, 0.0, NVec3::zeros());
                let moon = orbiter(BodyKind::Moon, "Moon", M_MOON, R_MOON, g, M_EARTH, EARTH_MOON, 0.0, earth.velocity);
                let moon = BodySpec { position: earth.position + moon.position, ..moon };
                specs.push(earth);
                specs.push(moon);
            }
            Preset::InnerSolarSystem => {
                specs.push(sun());
                let planets = [
                    ("Mercury", 3.301e23, 2.439_7e6, 0.387, 0.0),
                    ("Venus", 4.867_5e24, 6.051_8e6, 0.723, 1.3),
                    ("Earth", M_EARTH, R_EARTH, 1.0, 2.6),
                    ("Mars", 6.417e23, 3.389_5e6, 1.524, 4.1),
                ];
                for (name, m, r, a, phase) in planets {
                    specs.push(orbiter(BodyKind::Planet, name, m, r, g, M_SUN, a * AU, phase, NVec3::zeros()));
                }
            }
            Preset::AsteroidBelt => {
                specs.push(sun());
                let mut rng = world.rng().derive("asteroid_belt");
                for i in 0..200 {
                    specs.push(asteroid(&mut rng, i, g));
                }
            }
            Preset::StarCluster => {
                let mut rng = world.rng().derive("star_cluster");
                specs.extend(star_cluster(&mut rng, 100, g));
            }
        }

        specs.into_iter().map(|s| world.add_body(s)).collect()
    }
}

fn sun() -> BodySpec {
    BodySpec::new(BodyKind::Star, M_SUN, R_SUN, NVec3::zeros(), NVec3::zeros())
        .named("Sun")
        .fixed()
}

/// Body on a circular orbit of radius `r` in the xy-plane around a mass `m_central`
/// at the origin (position relative to it, velocity offset by `frame_v`)
#[allow(clippy::too_many_arguments)]
fn orbiter(kind: BodyKind, name: &str, m: f64, radius: f64, g: f64, m_central: f64, r: f64, phase: f64, frame_v: NVec3) -> BodySpec {
    let dir = NVec3::new(phase.cos(), phase.sin(), 0.0);
    let tangent = NVec3::new(-phase.sin(), phase.cos(), 0.0);
    let speed = (g * m_central / r).sqrt();
    BodySpec::new(kind, m, radius, dir * r, frame_v + tangent * speed).named(name)
}

/// Radius of a sphere of rock (2000 kg/m³) of mass `m`
fn rock_radius(m: f64) -> f64 {
    (3.0 * m / (4.0 * std::f64::consts::PI * 2000.0)).cbrt()
}

fn asteroid(rng: &mut DeterministicRng, i: usize, g: f64) -> BodySpec {
    let r = rng.range(2.2, 3.2) * AU;
    let phase = rng.range(0.0, TAU);
    let z = rng.gaussian(0.0, 0.02 * AU);
    let m = 10f64.powf(rng.range(15.0, 18.0));

    let mut spec = orbiter(BodyKind::Asteroid, "", m, rock_radius(m), g, M_SUN, r, phase, NVec3::zeros());
    spec.position.z = z;
    spec.named(format!("asteroid-{i}"))
}

/// Roughly virialized cluster of `n` stars within one parsec
fn star_cluster(rng: &mut DeterministicRng, n: usize, g: f64) -> Vec<BodySpec> {
    let radius = PARSEC;
    let masses: Vec<f64> = (0..n).map(|_| rng.gaussian(1.0, 0.3).max(0.1) * M_SUN).collect();
    let total: f64 = masses.iter().sum();
    let sigma = (g * total / radius).sqrt() / 3f64.sqrt() * 0.5;

    masses
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let x = rng.point_in_sphere(radius);
            let v = NVec3::new(rng.gaussian(0.0, sigma), rng.gaussian(0.0, sigma), rng.gaussian(0.0, sigma));
            BodySpec::new(BodyKind::Star, m, R_SUN * (m / M_SUN).powf(0.8), x, v).named(format!("star-{i}"))
        })
        .collect()
}

/// Runtime bundle construction from a scenario file
pub struct Scenario;

impl Scenario {
    pub fn build(cfg: &ScenarioConfig) -> Result<SimulationWorld, ConfigError> {
        let mut world = SimulationWorld::with_rng(cfg.effective_sim_config(), cfg.server.seed.rng())?;

        if let Some(preset) = cfg.preset {
            let ids = preset.populate(&mut world)?;
            log::info!("preset '{}' added {} bodies", preset.name(), ids.len());
        }
        for bc in &cfg.bodies {
            world.add_body(bc.to_spec()?)?;
        }
        // construction is not a client-visible event stream
        world.take_events();
        Ok(world)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::params::SimConfig;

    #[test]
    fn preset_names_round_trip() {
        for p in Preset::ALL {
            assert_eq!(Preset::from_name(p.name()), Some(p));
        }
        assert_eq!(Preset::from_name("nope"), None);
    }

    #[test]
    fn procedural_presets_are_deterministic() {
        let build = |seed| {
            let mut world = SimulationWorld::new(SimConfig::default(), seed).unwrap();
            Preset::AsteroidBelt.populate(&mut world).unwrap();
            (world.positions_flat(), world.rng().get_state())
        };
        let (a, rng_a) = build(7);
        let (b, _) = build(7);
        let (c, _) = build(8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // the main stream is untouched by preset generation
        assert_eq!(rng_a, DeterministicRng::new(7).get_state());
    }

    #[test]
    fn moon_orbits_earth() {
        let mut world = SimulationWorld::new(SimConfig::default(), 1).unwrap();
        let ids = Preset::SunEarthMoon.populate(&mut world).unwrap();
        let earth = world.body(ids[1]).unwrap();
        let moon = world.body(ids[2]).unwrap();
        assert!((moon.distance_to(earth) - EARTH_MOON).abs() < 1.0);
        assert_eq!(moon.state.dominant, Some(ids[1]));
        assert_eq!(earth.state.dominant, Some(ids[0]));
    }
}
